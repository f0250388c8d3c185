//! The per-method instrumentation pass
//!
//! The rewriter takes a parsed method (instruction list, exception table,
//! per-instruction frames) and rebuilds it so that every call site that may
//! suspend can capture the full execution frame into a heap
//! [`MethodState`](runtime::method_state_constructor) and later restore it:
//!
//!   1. locate the continuation points (calls to `Continuation.suspend()` or
//!      to methods known to be instrumented) and number them in program
//!      order - the number is the dispatch key;
//!   2. acquire the support locals;
//!   3. wrap every continuation point in a save block and append a matching
//!      restore block;
//!   4. install the prologue dispatcher that routes a restoring continuation
//!      to the right restore block;
//!   5. extend the user's protected regions over the restore blocks of the
//!      continuation points they contain.
//!
//! The transform is all-or-nothing: any structural violation aborts the
//! method and nothing of the partial rewrite escapes.

use super::{fragments, frame_codec, runtime, Variable, VariableTable};
use crate::jvm::code::{Insn, InsnList, Label, LabelGenerator, MethodRef};
use crate::jvm::{
    BinaryName, Error, Frame, MethodAccessFlags, MethodDescriptor, StaticType, UnqualifiedName,
};
use std::collections::HashSet;

/// Transient stack depth the instrumentation needs on top of a fully
/// re-pushed operand stack (continuation + `new`/`dup` + the three method
/// state constructor operands)
const STACK_HEADROOM: u16 = 6;

/// Protected region in a method's exception table
#[derive(Clone, Debug, PartialEq)]
pub struct TryCatchBlock {
    pub start: Label,
    pub end: Label,
    pub handler: Label,
    /// `None` catches everything (the region of a `finally`)
    pub catch_type: Option<BinaryName>,
}

/// A parsed method as the class-file front-end hands it over
pub struct MethodBody {
    pub class: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor,
    pub access_flags: MethodAccessFlags,
    pub max_locals: u16,
    pub max_stack: u16,
    pub instructions: InsnList,
    pub try_catch_blocks: Vec<TryCatchBlock>,
    /// Verifier frame per instruction, same indexing as `instructions`;
    /// `None` for unreachable instructions
    pub frames: Vec<Option<Frame>>,
    /// Generator that continues the label sequence used by `instructions`
    pub label_generator: LabelGenerator,
}

/// The rewritten method
pub struct InstrumentedMethod {
    pub instructions: InsnList,
    pub try_catch_blocks: Vec<TryCatchBlock>,
    pub max_locals: u16,
    pub max_stack: u16,
}

/// Identity of an invocation target
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct MethodId {
    pub class: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor,
}

impl From<&MethodRef> for MethodId {
    fn from(method: &MethodRef) -> MethodId {
        MethodId {
            class: method.class.clone(),
            name: method.name.clone(),
            descriptor: method.descriptor.clone(),
        }
    }
}

/// What kind of call a continuation point wraps
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum PointKind {
    /// The `suspend()` primitive itself: the deepest frame of any suspension
    Suspend,
    /// A call into another instrumented method
    Invoke,
}

/// One call site that may suspend
struct ContinuationPoint {
    /// Dispatch key: position in program order
    dispatch_index: usize,
    /// Position of the invocation in the original instruction list
    insn_index: usize,
    /// The original invocation node
    invoke: Insn,
    /// Frame on entry to the invocation
    frame: Frame,
    kind: PointKind,
    /// Start of the restore block
    restore_label: Label,
    /// One past the end of the restore block (for handler regions)
    restore_end_label: Label,
    /// The mode check right after the invocation
    post_invoke_label: Label,
    /// First instruction after the whole save block
    continue_label: Label,
}

/// The support locals of one pass
struct CoreVariables {
    /// The active continuation (a method argument, never released)
    continuation: Variable,
    /// The method state being restored
    method_state: Variable,
    /// Saved local variable table (`Object[]`)
    saved_locals: Variable,
    /// Saved operand stack (`Object[]`)
    saved_stack: Variable,
    /// Scratch slot the codec stages boxed values through
    scratch: Variable,
}

/// Rewrites methods so they can suspend and resume
///
/// The set of already-instrumented targets is the transitive closure
/// computed by the enclosing pass; the rewriter takes it as given.
pub struct MethodRewriter<'a> {
    instrumented: &'a HashSet<MethodId>,
}

impl<'a> MethodRewriter<'a> {
    pub fn new(instrumented: &'a HashSet<MethodId>) -> MethodRewriter<'a> {
        MethodRewriter { instrumented }
    }

    /// Instrument one method
    ///
    /// Returns `Ok(None)` when the method cannot reach `suspend()` and is
    /// left untouched. Constructors are rejected outright: their frames
    /// cannot be restored around the `this` initialization rules.
    pub fn instrument(&self, mut method: MethodBody) -> Result<Option<InstrumentedMethod>, Error> {
        if method.name == UnqualifiedName::INIT {
            return Err(Error::invalid_request(
                "Instrumentation of constructors not allowed",
            ));
        }
        if method.frames.len() != method.instructions.len() {
            return Err(Error::malformed_frame(format!(
                "{} frames supplied for {} instructions",
                method.frames.len(),
                method.instructions.len()
            )));
        }

        let points = self.find_continuation_points(&mut method)?;
        if points.is_empty() {
            return Ok(None);
        }
        log::debug!(
            "Instrumenting {:?}.{:?} with {} continuation points",
            method.class,
            method.name,
            points.len()
        );

        // Fresh locals must sit above everything the original frames touch
        let mut reserved = method.max_locals;
        for frame in method.frames.iter().flatten() {
            reserved = reserved.max(frame.locals_len() as u16);
        }
        let mut variables = VariableTable::new(
            &method.class,
            &method.descriptor,
            method.access_flags,
            reserved,
        );

        let core = CoreVariables {
            continuation: find_continuation_argument(&variables, &method)?,
            method_state: variables.acquire(runtime::method_state_type())?,
            saved_locals: variables.acquire(StaticType::object_array())?,
            saved_stack: variables.acquire(StaticType::object_array())?,
            scratch: variables.acquire(StaticType::OBJECT)?,
        };

        let return_type = StaticType::from(method.descriptor.return_type.clone());

        let mut instructions =
            entry_dispatcher(&points, &core, &mut method.label_generator)?;

        // Original body, with each continuation point swapped for its save block
        let mut next_point = points.iter().peekable();
        for (index, insn) in method.instructions.iter().enumerate() {
            let reached_point = matches!(
                next_point.peek(),
                Some(point) if point.insn_index == index
            );
            if reached_point {
                if let Some(point) = next_point.next() {
                    instructions.extend(save_block(
                        point,
                        &core,
                        &return_type,
                        &mut method.label_generator,
                    )?);
                }
            } else {
                instructions.push(insn.clone());
            }
        }

        // Restore blocks go after the body; they are only reachable through
        // the dispatcher
        for point in &points {
            instructions.extend(restore_block(point, &core)?);
        }

        let try_catch_blocks =
            patch_exception_table(&method.instructions, method.try_catch_blocks, &points)?;

        let max_locals = variables.max_locals();
        variables.release(core.scratch)?;
        variables.release(core.saved_stack)?;
        variables.release(core.saved_locals)?;
        variables.release(core.method_state)?;

        Ok(Some(InstrumentedMethod {
            instructions,
            try_catch_blocks,
            max_locals,
            max_stack: method.max_stack + STACK_HEADROOM,
        }))
    }

    /// Scan the instruction list for call sites that may suspend
    fn find_continuation_points(
        &self,
        method: &mut MethodBody,
    ) -> Result<Vec<ContinuationPoint>, Error> {
        let mut points = vec![];
        for (insn_index, insn) in method.instructions.iter().enumerate() {
            let target = match insn {
                Insn::Invoke(_, target) => target,
                _ => continue,
            };
            let kind = if is_suspend(target) {
                PointKind::Suspend
            } else if self.instrumented.contains(&MethodId::from(target)) {
                PointKind::Invoke
            } else {
                continue;
            };

            let frame = match &method.frames[insn_index] {
                Some(frame) => frame.clone(),
                None => {
                    return Err(Error::malformed_frame(format!(
                        "No frame computed at continuation point {}",
                        insn_index
                    )))
                }
            };
            if kind == PointKind::Suspend && frame.stack.is_empty() {
                return Err(Error::malformed_frame(format!(
                    "Suspension at {} has no receiver on the operand stack",
                    insn_index
                )));
            }

            points.push(ContinuationPoint {
                dispatch_index: points.len(),
                insn_index,
                invoke: insn.clone(),
                frame,
                kind,
                restore_label: method.label_generator.fresh_label(),
                restore_end_label: method.label_generator.fresh_label(),
                post_invoke_label: method.label_generator.fresh_label(),
                continue_label: method.label_generator.fresh_label(),
            });
        }
        Ok(points)
    }
}

/// Is this the designated suspension primitive?
fn is_suspend(target: &MethodRef) -> bool {
    target.class == BinaryName::CONTINUATION
        && target.name == UnqualifiedName::SUSPEND
        && target.descriptor.parameters.is_empty()
        && target.descriptor.return_type.is_none()
}

/// The continuation reaches an instrumented method as an explicit parameter
fn find_continuation_argument(
    variables: &VariableTable,
    method: &MethodBody,
) -> Result<Variable, Error> {
    let this_params = if method.access_flags.contains(MethodAccessFlags::STATIC) {
        0
    } else {
        1
    };
    variables.arguments()[this_params..]
        .iter()
        .find(|argument| *argument.ty() == runtime::continuation_type())
        .cloned()
        .ok_or_else(|| {
            Error::invalid_request(format!(
                "Method {:?}.{:?} reaches suspend() but has no Continuation parameter",
                method.class, method.name
            ))
        })
}

/// Build the prologue dispatcher
///
/// When the continuation is restoring, the next method state's continuation
/// index picks the restore block to jump to; any other index is a corrupt
/// state and dies at run time. When it is not restoring, control falls
/// through to the original entry.
fn entry_dispatcher(
    points: &[ContinuationPoint],
    core: &CoreVariables,
    labels: &mut LabelGenerator,
) -> Result<InsnList, Error> {
    let cases = points
        .iter()
        .map(|point| fragments::jump_to(point.restore_label))
        .collect();
    let index = fragments::call(
        &runtime::get_continuation_index(),
        vec![fragments::call(
            &runtime::peek_state(),
            vec![fragments::load_var(&core.continuation)?],
        )?],
    )?;
    let switch = fragments::table_switch(
        index,
        fragments::throw_exception("invalid continuation state"),
        0,
        cases,
        labels,
    )?;

    Ok(fragments::if_integers_equal(
        fragments::call(
            &runtime::get_mode(),
            vec![fragments::load_var(&core.continuation)?],
        )?,
        fragments::load_int_const(runtime::MODE_RESTORING),
        switch,
        labels,
    ))
}

/// Build the save block for one continuation point
///
/// The emitted sequence snapshots the frame, pushes the method state, and
/// runs the original invocation; if the callee left the continuation in
/// saving mode the suspension is propagated up with a dummy return,
/// otherwise the now-useless state is discarded:
///
/// ```text
///   <save stack to S, re-push>  <save locals to L>
///   C.push(new MethodState(k, L, S))
///   <original invoke>
/// post_invoke_k:
///   if (C.getMode() == saving) return <dummy>
///   C.pop()
/// continue_k:
/// ```
fn save_block(
    point: &ContinuationPoint,
    core: &CoreVariables,
    return_type: &StaticType,
    labels: &mut LabelGenerator,
) -> Result<InsnList, Error> {
    let mut invoke = InsnList::new();
    invoke.push(point.invoke.clone());

    Ok(fragments::merge(vec![
        fragments::line_number(runtime::INSTRUMENTED_LINE),
        frame_codec::save_operand_stack(&core.saved_stack, &core.scratch, &point.frame)?,
        frame_codec::save_locals(&core.saved_locals, &core.scratch, &point.frame)?,
        fragments::call(
            &runtime::push_state(),
            vec![
                fragments::load_var(&core.continuation)?,
                fragments::construct(
                    &runtime::method_state_constructor(),
                    vec![
                        fragments::load_int_const(point.dispatch_index as i32),
                        fragments::load_var(&core.saved_locals)?,
                        fragments::load_var(&core.saved_stack)?,
                    ],
                )?,
            ],
        )?,
        invoke,
        fragments::add_label(point.post_invoke_label),
        fragments::if_integers_equal(
            fragments::call(
                &runtime::get_mode(),
                vec![fragments::load_var(&core.continuation)?],
            )?,
            fragments::load_int_const(runtime::MODE_SAVING),
            fragments::return_dummy(return_type)?,
            labels,
        ),
        fragments::call(
            &runtime::pop_state(),
            vec![fragments::load_var(&core.continuation)?],
        )?,
        fragments::pop(),
        fragments::add_label(point.continue_label),
    ]))
}

/// Build the restore block for one continuation point
///
/// Both kinds pop their state and rebuild the frame to the invocation's
/// incoming shape. A suspend point is the end of the line: the would-be
/// receiver of `suspend()` is dropped, the mode goes back to normal, and
/// control continues after the call. An invoke point saves its frame again
/// (the callee may suspend anew) and re-executes the call so the callee can
/// walk down its own dispatcher; the merge into the post-invocation check
/// then handles either outcome:
///
/// ```text
/// restore_k:
///   M = C.pop()
///   L = M.getLocals()   S = M.getStack()
///   <restore locals from L>  <restore stack from S>
///   -- suspend point --          -- invoke point --
///   pop                          C.push(M)
///   C.setMode(normal)            <cloned invoke>
///   goto continue_k              goto post_invoke_k
/// ```
fn restore_block(point: &ContinuationPoint, core: &CoreVariables) -> Result<InsnList, Error> {
    let mut pieces = vec![
        fragments::add_label(point.restore_label),
        fragments::line_number(runtime::INSTRUMENTED_LINE),
        fragments::call(
            &runtime::pop_state(),
            vec![fragments::load_var(&core.continuation)?],
        )?,
        fragments::save_var(&core.method_state)?,
        fragments::call(
            &runtime::get_locals(),
            vec![fragments::load_var(&core.method_state)?],
        )?,
        fragments::save_var(&core.saved_locals)?,
        fragments::call(
            &runtime::get_stack(),
            vec![fragments::load_var(&core.method_state)?],
        )?,
        fragments::save_var(&core.saved_stack)?,
        frame_codec::load_locals(&core.saved_locals, &core.scratch, &point.frame)?,
        frame_codec::load_operand_stack(&core.saved_stack, &core.scratch, &point.frame)?,
    ];

    match point.kind {
        PointKind::Suspend => {
            pieces.push(fragments::pop());
            pieces.push(fragments::call(
                &runtime::set_mode(),
                vec![
                    fragments::load_var(&core.continuation)?,
                    fragments::load_int_const(runtime::MODE_NORMAL),
                ],
            )?);
            pieces.push(fragments::jump_to(point.continue_label));
        }
        PointKind::Invoke => {
            pieces.push(fragments::call(
                &runtime::push_state(),
                vec![
                    fragments::load_var(&core.continuation)?,
                    fragments::load_var(&core.method_state)?,
                ],
            )?);
            pieces.push(fragments::clone_invoke(&point.invoke)?);
            pieces.push(fragments::jump_to(point.post_invoke_label));
        }
    }
    pieces.push(fragments::add_label(point.restore_end_label));
    Ok(fragments::merge(pieces))
}

/// Extend the user's protected regions over the restore blocks of the
/// continuation points they contain
///
/// Save blocks sit inline between the region's own start and end labels, so
/// they are covered already; the restore blocks live outside the body and
/// get their own entries. The prologue dispatcher is never covered.
fn patch_exception_table(
    original_instructions: &InsnList,
    original_blocks: Vec<TryCatchBlock>,
    points: &[ContinuationPoint],
) -> Result<Vec<TryCatchBlock>, Error> {
    let mut blocks = original_blocks;
    let mut extensions = vec![];
    for block in &blocks {
        let start = original_instructions.find_label(block.start).ok_or_else(|| {
            Error::invalid_request(format!(
                "Exception region start {:?} is not placed in the method",
                block.start
            ))
        })?;
        let end = original_instructions.find_label(block.end).ok_or_else(|| {
            Error::invalid_request(format!(
                "Exception region end {:?} is not placed in the method",
                block.end
            ))
        })?;

        for point in points {
            if (start..end).contains(&point.insn_index) {
                extensions.push(TryCatchBlock {
                    start: point.restore_label,
                    end: point.restore_end_label,
                    handler: block.handler,
                    catch_type: block.catch_type.clone(),
                });
            }
        }
    }
    blocks.extend(extensions);
    Ok(blocks)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::{InvokeType, StorageKind};
    use crate::jvm::Name;
    use crate::jvm::Descriptor;

    fn suspend_invoke() -> Insn {
        Insn::Invoke(InvokeType::Virtual, runtime::suspend())
    }

    fn run_descriptor() -> MethodDescriptor {
        MethodDescriptor {
            parameters: vec![crate::jvm::FieldType::object(BinaryName::CONTINUATION)],
            return_type: None,
        }
    }

    /// `void run(Continuation c) { c.suspend(); }` as a static method
    fn tiny_method() -> MethodBody {
        let instructions: InsnList = vec![
            Insn::Load(StorageKind::Reference, 0),
            suspend_invoke(),
            Insn::Return(None),
        ]
        .into();
        let frames = vec![
            Some(Frame::new(
                vec![Some(runtime::continuation_type())],
                vec![],
            )),
            Some(Frame::new(
                vec![Some(runtime::continuation_type())],
                vec![runtime::continuation_type()],
            )),
            Some(Frame::new(
                vec![Some(runtime::continuation_type())],
                vec![],
            )),
        ];
        MethodBody {
            class: BinaryName::from_string(String::from("Example")).unwrap(),
            name: UnqualifiedName::RUN,
            descriptor: run_descriptor(),
            access_flags: MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            max_locals: 1,
            max_stack: 1,
            instructions,
            try_catch_blocks: vec![],
            frames,
            label_generator: LabelGenerator::new(),
        }
    }

    #[test]
    fn constructors_are_rejected() {
        let no_targets = HashSet::new();
        let rewriter = MethodRewriter::new(&no_targets);
        let mut method = tiny_method();
        method.name = UnqualifiedName::INIT;

        match rewriter.instrument(method) {
            Err(Error::InvalidRequest(message)) => {
                assert_eq!(message, "Instrumentation of constructors not allowed")
            }
            other => panic!("expected InvalidRequest, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn methods_without_points_are_untouched() {
        let no_targets = HashSet::new();
        let rewriter = MethodRewriter::new(&no_targets);
        let mut method = tiny_method();
        method.instructions = vec![Insn::Return(None)].into();
        method.frames = vec![Some(Frame::new(
            vec![Some(runtime::continuation_type())],
            vec![],
        ))];

        assert!(rewriter.instrument(method).unwrap().is_none());
    }

    #[test]
    fn missing_continuation_parameter_is_rejected() {
        let no_targets = HashSet::new();
        let rewriter = MethodRewriter::new(&no_targets);
        let mut method = tiny_method();
        method.descriptor = MethodDescriptor::parse("()V").unwrap();

        assert!(matches!(
            rewriter.instrument(method),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn missing_frame_at_point_is_malformed() {
        let no_targets = HashSet::new();
        let rewriter = MethodRewriter::new(&no_targets);
        let mut method = tiny_method();
        method.frames[1] = None;

        assert!(matches!(
            rewriter.instrument(method),
            Err(Error::MalformedFrame(_))
        ));
    }

    #[test]
    fn support_locals_sit_above_original_locals() {
        let no_targets = HashSet::new();
        let rewriter = MethodRewriter::new(&no_targets);
        let original_max_locals = tiny_method().max_locals;
        let rewritten = rewriter.instrument(tiny_method()).unwrap().unwrap();

        // The state arrays land in slots strictly above the original frame
        let mut after_new_array = false;
        for insn in &rewritten.instructions {
            match insn {
                Insn::NewRefArray(_) => after_new_array = true,
                Insn::Store(StorageKind::Reference, index) if after_new_array => {
                    assert!(*index >= original_max_locals);
                    after_new_array = false;
                }
                _ => after_new_array = false,
            }
        }
        assert!(rewritten.max_locals >= original_max_locals + 4);
        assert_eq!(rewritten.max_stack, 1 + STACK_HEADROOM);
    }
}
