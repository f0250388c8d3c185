//! Retrofit stackful coroutines onto JVM bytecode
//!
//! A user writes an ordinary method that calls the `suspend()` primitive at
//! arbitrary points. This library rewrites every method that may reach such
//! a call so that, at each of those call sites, the full execution frame
//! (operand stack, local variables, program location) can be captured into
//! a heap object and later restored, resuming execution exactly where it
//! left off - no language-level coroutine support required from the VM.
//!
//! The crate is the per-method instrumentation core: class-file parsing and
//! serialization, archive handling, and the runtime library holding the
//! live continuation are separate artifacts. The front-end hands over a
//! parsed [`MethodBody`](instrument::MethodBody) (instruction list,
//! exception table, per-instruction verifier frames) together with the set
//! of already-instrumented targets, and gets back the rewritten
//! instruction list, the patched exception table, and the new
//! `max_locals`/`max_stack`.
//!
//! ### Simple example
//!
//! ```
//! use coroutines_instrumenter::instrument::{runtime, MethodBody, MethodRewriter};
//! use coroutines_instrumenter::jvm::code::{Insn, InvokeType, LabelGenerator, StorageKind};
//! use coroutines_instrumenter::jvm::{
//!     BinaryName, Descriptor, Frame, MethodAccessFlags, MethodDescriptor, Name,
//!     UnqualifiedName,
//! };
//! use std::collections::HashSet;
//!
//! # fn instrument() -> Result<(), coroutines_instrumenter::jvm::Error> {
//! // static void tick(Continuation c) { c.suspend(); }
//! let continuation_local = vec![Some(runtime::continuation_type())];
//! let method = MethodBody {
//!     class: BinaryName::from_string(String::from("Ticker")).unwrap(),
//!     name: UnqualifiedName::from_string(String::from("tick")).unwrap(),
//!     descriptor: MethodDescriptor::parse("(Lcoroutines/user/Continuation;)V").unwrap(),
//!     access_flags: MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
//!     max_locals: 1,
//!     max_stack: 1,
//!     instructions: vec![
//!         Insn::Load(StorageKind::Reference, 0),
//!         Insn::Invoke(InvokeType::Virtual, runtime::suspend()),
//!         Insn::Return(None),
//!     ]
//!     .into(),
//!     try_catch_blocks: vec![],
//!     frames: vec![
//!         Some(Frame::new(continuation_local.clone(), vec![])),
//!         Some(Frame::new(
//!             continuation_local.clone(),
//!             vec![runtime::continuation_type()],
//!         )),
//!         Some(Frame::new(continuation_local, vec![])),
//!     ],
//!     label_generator: LabelGenerator::new(),
//! };
//!
//! let instrumented_targets = HashSet::new();
//! let rewriter = MethodRewriter::new(&instrumented_targets);
//! let rewritten = rewriter.instrument(method)?.expect("reaches suspend()");
//! assert!(rewritten.max_locals > 1);
//! # Ok(())
//! # }
//! # instrument().unwrap();
//! ```

pub mod instrument;
pub mod jvm;
pub mod util;
