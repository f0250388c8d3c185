//! Small, composable instruction fragments
//!
//! Each function produces an [`InsnList`] whose net effect on the operand
//! stack is documented. Fragments are immutable once built; the caller
//! assembles them with [`merge`] and splices them into a method body.
//! Structural misuse (argument count mismatch, released variable slot, a
//! type tag outside the accepted set) surfaces as
//! [`Error::InvalidRequest`](crate::jvm::Error).

use super::Variable;
use crate::jvm::code::{
    ConstructorRef, Insn, InsnList, InvokeType, Label, LabelGenerator, MethodRef, StorageKind,
};
use crate::jvm::{BinaryName, Error, FieldType, MethodDescriptor, StaticType, UnqualifiedName};
use std::collections::HashMap;

/// Returns an empty instruction list
pub fn empty() -> InsnList {
    InsnList::new()
}

/// Combines multiple instruction lists into a single instruction list
pub fn merge(fragments: Vec<InsnList>) -> InsnList {
    let mut ret = InsnList::new();
    for fragment in fragments {
        ret.extend(fragment);
    }
    ret
}

/// Clones an invocation node and returns it as an instruction list
///
/// Labels are remapped through a fresh correspondence map (an invocation
/// carries none, so the clone is structural).
pub fn clone_invoke(insn: &Insn) -> Result<InsnList, Error> {
    if !insn.is_invoke() {
        return Err(Error::invalid_request(format!(
            "Cannot clone non-invocation instruction {:?}",
            insn
        )));
    }
    let mut ret = InsnList::new();
    ret.push(insn.clone_with_labels(&HashMap::new()));
    Ok(ret)
}

/// Generates an unconditional jump to a label
pub fn jump_to(label: Label) -> InsnList {
    let mut ret = InsnList::new();
    ret.push(Insn::Goto(label));
    ret
}

/// Places a label
pub fn add_label(label: Label) -> InsnList {
    let mut ret = InsnList::new();
    ret.push(Insn::Label(label));
    ret
}

/// Generates a source line marker
///
/// Useful for tagging instrumentation with a distinctive line number (eg.
/// 99999) so a stack trace shows at a glance whether generated code was
/// involved.
pub fn line_number(num: u32) -> InsnList {
    let mut ret = InsnList::new();
    ret.push(Insn::Line(num));
    ret
}

/// Generates instructions that print a string constant via `System.out`
///
/// Debugging aid: net stack effect is zero.
pub fn debug_print(text: &str) -> InsnList {
    let mut ret = InsnList::new();
    ret.push(Insn::GetStatic(
        BinaryName::SYSTEM,
        UnqualifiedName::OUT,
        FieldType::object(BinaryName::PRINTSTREAM),
    ));
    ret.push(Insn::PushString(text.to_owned()));
    ret.push(Insn::Invoke(
        InvokeType::Virtual,
        MethodRef {
            class: BinaryName::PRINTSTREAM,
            name: UnqualifiedName::PRINTLN,
            descriptor: MethodDescriptor {
                parameters: vec![FieldType::object(BinaryName::STRING)],
                return_type: None,
            },
            is_static: false,
            on_interface: false,
        },
    ));
    ret
}

/// Pops the top item off the stack
pub fn pop() -> InsnList {
    let mut ret = InsnList::new();
    ret.push(Insn::Pop);
    ret
}

/// Pushes an integer constant onto the stack
pub fn load_int_const(i: i32) -> InsnList {
    let mut ret = InsnList::new();
    ret.push(Insn::PushInt(i));
    ret
}

/// Pushes a string constant onto the stack
pub fn load_string_const(s: &str) -> InsnList {
    let mut ret = InsnList::new();
    ret.push(Insn::PushString(s.to_owned()));
    ret
}

/// Pushes a null onto the stack
pub fn load_null() -> InsnList {
    let mut ret = InsnList::new();
    ret.push(Insn::PushNull);
    ret
}

/// Copies a local variable onto the stack
///
/// References get a downcast to the variable's declared type, since values
/// pulled back out of the untyped state array would otherwise verify as
/// `Object`.
pub fn load_var(variable: &Variable) -> Result<InsnList, Error> {
    variable.check_live()?;
    let kind = storage_kind(variable.ty())?;

    let mut ret = InsnList::new();
    ret.push(Insn::Load(kind, variable.index()));
    if let StaticType::Ref(ref_type) = variable.ty() {
        ret.push(Insn::CheckCast(ref_type.clone()));
    }
    Ok(ret)
}

/// Pops the top of the stack into a local variable
///
/// The item on top of the stack must be of the variable's type.
pub fn save_var(variable: &Variable) -> Result<InsnList, Error> {
    variable.check_live()?;
    let kind = storage_kind(variable.ty())?;

    let mut ret = InsnList::new();
    ret.push(Insn::Store(kind, variable.index()));
    Ok(ret)
}

/// Calls a constructor with a set of arguments
///
/// Each argument fragment must leave exactly one item of the expected type
/// on the stack. After execution the new object sits on the stack.
pub fn construct(constructor: &ConstructorRef, args: Vec<InsnList>) -> Result<InsnList, Error> {
    if constructor.parameters.len() != args.len() {
        return Err(Error::invalid_request(format!(
            "Constructor for {:?} takes {} arguments but {} were supplied",
            constructor.class,
            constructor.parameters.len(),
            args.len()
        )));
    }

    let mut ret = InsnList::new();
    ret.push(Insn::New(constructor.class.clone()));
    ret.push(Insn::Dup);
    for arg in args {
        ret.extend(arg);
    }
    ret.push(Insn::Invoke(
        InvokeType::Special,
        MethodRef {
            class: constructor.class.clone(),
            name: UnqualifiedName::INIT,
            descriptor: constructor.descriptor(),
            is_static: false,
            on_interface: false,
        },
    ));
    Ok(ret)
}

/// Calls a method with a set of arguments
///
/// Dispatch (static/virtual/interface) follows the target's declared shape.
/// For non-static targets the first argument fragment must evaluate to the
/// receiver. After execution the return value (if any) sits on the stack.
pub fn call(method: &MethodRef, args: Vec<InsnList>) -> Result<InsnList, Error> {
    if method.argument_count() != args.len() {
        return Err(Error::invalid_request(format!(
            "Method {:?}.{:?} takes {} arguments but {} were supplied",
            method.class,
            method.name,
            method.argument_count(),
            args.len()
        )));
    }

    let mut ret = InsnList::new();
    for arg in args {
        ret.extend(arg);
    }
    ret.push(Insn::Invoke(method.invoke_type(), method.clone()));
    Ok(ret)
}

/// Generates instructions to throw a `RuntimeException` with a constant
/// message
pub fn throw_exception(message: &str) -> InsnList {
    let mut ret = InsnList::new();
    ret.push(Insn::New(BinaryName::RUNTIMEEXCEPTION));
    ret.push(Insn::Dup);
    ret.push(Insn::PushString(message.to_owned()));
    ret.push(Insn::Invoke(
        InvokeType::Special,
        MethodRef {
            class: BinaryName::RUNTIMEEXCEPTION,
            name: UnqualifiedName::INIT,
            descriptor: MethodDescriptor {
                parameters: vec![FieldType::object(BinaryName::STRING)],
                return_type: None,
            },
            is_static: false,
            on_interface: false,
        },
    ));
    ret.push(Insn::Throw);
    ret
}

/// Compares two integers and performs some action if they are equal
///
/// `lhs` and `rhs` must each leave an int on top of the stack; control falls
/// through past `action` when they differ.
pub fn if_integers_equal(
    lhs: InsnList,
    rhs: InsnList,
    action: InsnList,
    labels: &mut LabelGenerator,
) -> InsnList {
    let not_equal = labels.fresh_label();

    let mut ret = InsnList::new();
    ret.extend(lhs);
    ret.extend(rhs);
    ret.push(Insn::IfICmpNe(not_equal));
    ret.extend(action);
    ret.push(Insn::Label(not_equal));
    ret
}

/// Generates a dense switch table
///
/// Cases are zero-indexed from `case_start`. No implicit break is added:
/// every case fragment (and the default) must end in its own jump, return,
/// or throw, otherwise control falls through into the next case.
pub fn table_switch(
    index: InsnList,
    default: InsnList,
    case_start: i32,
    cases: Vec<InsnList>,
    labels: &mut LabelGenerator,
) -> Result<InsnList, Error> {
    if case_start < 0 {
        return Err(Error::invalid_request(format!(
            "Switch cases cannot start at {}",
            case_start
        )));
    }
    if cases.is_empty() {
        return Err(Error::invalid_request(
            "Switch table requires at least one case",
        ));
    }

    let default_label = labels.fresh_label();
    let case_labels: Vec<Label> = cases.iter().map(|_| labels.fresh_label()).collect();

    let mut ret = InsnList::new();
    ret.extend(index);
    ret.push(Insn::TableSwitch {
        low: case_start,
        default: default_label,
        targets: case_labels.clone(),
    });
    for (case_label, case) in case_labels.into_iter().zip(cases) {
        ret.push(Insn::Label(case_label));
        ret.extend(case);
    }
    ret.push(Insn::Label(default_label));
    ret.extend(default);
    Ok(ret)
}

/// Generates instructions that return a dummy value
///
/// The dummy is the zero of the type: `false`, `0`, `0L`, `0.0f`, `0.0`, or
/// `null`; `void` methods just return.
pub fn return_dummy(return_type: &StaticType) -> Result<InsnList, Error> {
    let mut ret = InsnList::new();
    match return_type {
        StaticType::Void => {
            ret.push(Insn::Return(None));
            return Ok(ret);
        }
        StaticType::Method(_) => {
            return Err(Error::invalid_request(
                "Cannot return a value of method type",
            ));
        }
        _ => {}
    }

    let kind = storage_kind(return_type)?;
    match kind {
        StorageKind::Int => ret.push(Insn::PushInt(0)),
        StorageKind::Long => ret.push(Insn::PushLong(0)),
        StorageKind::Float => ret.push(Insn::PushFloat(0.0)),
        StorageKind::Double => ret.push(Insn::PushDouble(0.0)),
        StorageKind::Reference => ret.push(Insn::PushNull),
    }
    ret.push(Insn::Return(Some(kind)));
    Ok(ret)
}

/// Generates instructions that return the value produced by a fragment
pub fn return_value(return_type: &StaticType, value: InsnList) -> Result<InsnList, Error> {
    let mut ret = InsnList::new();
    ret.extend(value);
    match return_type {
        StaticType::Void => {
            ret.push(Insn::Return(None));
            Ok(ret)
        }
        StaticType::Method(_) => Err(Error::invalid_request(
            "Cannot return a value of method type",
        )),
        other => {
            ret.push(Insn::Return(Some(storage_kind(other)?)));
            Ok(ret)
        }
    }
}

fn storage_kind(ty: &StaticType) -> Result<StorageKind, Error> {
    StorageKind::of(ty).ok_or_else(|| {
        Error::invalid_request(format!("Type {:?} has no runtime value", ty))
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::instrument::VariableTable;
    use crate::jvm::{BaseType, Descriptor, MethodAccessFlags, RefType};

    fn scratch_table() -> VariableTable {
        VariableTable::new(
            &BinaryName::OBJECT,
            &MethodDescriptor::parse("()V").unwrap(),
            MethodAccessFlags::STATIC,
            0,
        )
    }

    #[test]
    fn load_of_reference_downcasts() {
        let mut table = scratch_table();
        let var = table.acquire(StaticType::object(BinaryName::STRING)).unwrap();
        let fragment = load_var(&var).unwrap();
        assert_eq!(
            fragment.as_slice(),
            &[
                Insn::Load(StorageKind::Reference, 0),
                Insn::CheckCast(RefType::Object(BinaryName::STRING)),
            ]
        );
    }

    #[test]
    fn load_of_primitive_has_no_downcast() {
        let mut table = scratch_table();
        let var = table.acquire(StaticType::Base(BaseType::Long)).unwrap();
        let fragment = load_var(&var).unwrap();
        assert_eq!(fragment.as_slice(), &[Insn::Load(StorageKind::Long, 0)]);
    }

    #[test]
    fn released_variable_is_rejected() {
        let mut table = scratch_table();
        let var = table.acquire(StaticType::OBJECT).unwrap();
        let stale = var.clone();
        table.release(var).unwrap();
        assert!(matches!(load_var(&stale), Err(Error::InvalidRequest(_))));
        assert!(matches!(save_var(&stale), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn construct_arity_is_checked() {
        let ctor = ConstructorRef {
            class: BinaryName::RUNTIMEEXCEPTION,
            parameters: vec![FieldType::object(BinaryName::STRING)],
        };
        assert!(matches!(
            construct(&ctor, vec![]),
            Err(Error::InvalidRequest(_))
        ));

        let fragment = construct(&ctor, vec![load_string_const("boom")]).unwrap();
        assert!(matches!(fragment.get(0), Some(Insn::New(_))));
        assert_eq!(fragment.get(1), Some(&Insn::Dup));
        assert!(matches!(
            fragment.get(3),
            Some(Insn::Invoke(InvokeType::Special, _))
        ));
    }

    #[test]
    fn call_dispatch_follows_target_shape() {
        let static_target = MethodRef {
            class: BinaryName::INTEGER,
            name: UnqualifiedName::VALUEOF,
            descriptor: MethodDescriptor::parse("(I)Ljava/lang/Integer;").unwrap(),
            is_static: true,
            on_interface: false,
        };
        let fragment = call(&static_target, vec![load_int_const(3)]).unwrap();
        assert!(matches!(
            fragment.get(1),
            Some(Insn::Invoke(InvokeType::Static, _))
        ));

        // Non-static targets count the receiver
        let virtual_target = MethodRef {
            class: BinaryName::INTEGER,
            name: UnqualifiedName::INTVALUE,
            descriptor: MethodDescriptor::parse("()I").unwrap(),
            is_static: false,
            on_interface: false,
        };
        assert!(matches!(
            call(&virtual_target, vec![]),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn switch_validation() {
        let mut labels = LabelGenerator::new();
        assert!(matches!(
            table_switch(empty(), empty(), -1, vec![empty()], &mut labels),
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            table_switch(empty(), empty(), 0, vec![], &mut labels),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn switch_shape() {
        let mut labels = LabelGenerator::new();
        let fragment = table_switch(
            load_int_const(1),
            throw_exception("bad"),
            0,
            vec![pop(), pop()],
            &mut labels,
        )
        .unwrap();

        let (default, targets) = fragment
            .iter()
            .find_map(|insn| match insn {
                Insn::TableSwitch {
                    default, targets, ..
                } => Some((*default, targets.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(targets.len(), 2);
        for target in targets {
            assert!(fragment.find_label(target).is_some());
        }
        assert!(fragment.find_label(default).is_some());
    }

    #[test]
    fn dummy_returns() {
        let int_dummy = return_dummy(&StaticType::Base(BaseType::Boolean)).unwrap();
        assert_eq!(
            int_dummy.as_slice(),
            &[Insn::PushInt(0), Insn::Return(Some(StorageKind::Int))]
        );

        let long_dummy = return_dummy(&StaticType::Base(BaseType::Long)).unwrap();
        assert_eq!(
            long_dummy.as_slice(),
            &[Insn::PushLong(0), Insn::Return(Some(StorageKind::Long))]
        );

        let void_dummy = return_dummy(&StaticType::Void).unwrap();
        assert_eq!(void_dummy.as_slice(), &[Insn::Return(None)]);

        let object_dummy = return_dummy(&StaticType::OBJECT).unwrap();
        assert_eq!(
            object_dummy.as_slice(),
            &[Insn::PushNull, Insn::Return(Some(StorageKind::Reference))]
        );

        assert!(matches!(
            return_dummy(&StaticType::Method(MethodDescriptor::parse("()V").unwrap())),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn debug_print_is_stack_neutral() {
        let fragment = debug_print("trace");
        assert!(matches!(fragment.get(0), Some(Insn::GetStatic(_, _, _))));
        assert_eq!(fragment.get(1), Some(&Insn::PushString(String::from("trace"))));
        assert!(matches!(
            fragment.get(2),
            Some(Insn::Invoke(InvokeType::Virtual, _))
        ));
    }

    #[test]
    fn clone_invoke_rejects_other_nodes() {
        assert!(matches!(
            clone_invoke(&Insn::Pop),
            Err(Error::InvalidRequest(_))
        ));
    }
}
