//! Method refs for the coroutine runtime ABI
//!
//! The rewriter emits calls against a fixed, small capability set on the
//! runtime's `Continuation` and `MethodState` classes. The shapes here are
//! the contract; the runtime library implementing them is a separate
//! artifact.

use crate::jvm::code::{ConstructorRef, MethodRef};
use crate::jvm::{BinaryName, FieldType, MethodDescriptor, StaticType, UnqualifiedName};

/// Execution mode: running user code
pub const MODE_NORMAL: i32 = 0;
/// Execution mode: unwinding after a suspend, saving frames on the way out
pub const MODE_SAVING: i32 = 1;
/// Execution mode: walking back down the dispatchers to the suspend point
pub const MODE_RESTORING: i32 = 2;

/// Line number tagged on instrumentation so stack traces give it away
pub const INSTRUMENTED_LINE: u32 = 99999;

/// `Continuation` as a variable/parameter type
pub fn continuation_type() -> StaticType {
    StaticType::object(BinaryName::CONTINUATION)
}

/// `MethodState` as a variable type
pub fn method_state_type() -> StaticType {
    StaticType::object(BinaryName::METHODSTATE)
}

/// `Continuation.suspend()` - the designated suspension primitive
pub fn suspend() -> MethodRef {
    continuation_method(UnqualifiedName::SUSPEND, vec![], None)
}

/// `Continuation.getMode() -> int`
pub fn get_mode() -> MethodRef {
    continuation_method(UnqualifiedName::GETMODE, vec![], Some(FieldType::INT))
}

/// `Continuation.setMode(int)`
pub fn set_mode() -> MethodRef {
    continuation_method(UnqualifiedName::SETMODE, vec![FieldType::INT], None)
}

/// `Continuation.push(MethodState)`
pub fn push_state() -> MethodRef {
    continuation_method(
        UnqualifiedName::PUSH,
        vec![FieldType::object(BinaryName::METHODSTATE)],
        None,
    )
}

/// `Continuation.pop() -> MethodState`
pub fn pop_state() -> MethodRef {
    continuation_method(
        UnqualifiedName::POP,
        vec![],
        Some(FieldType::object(BinaryName::METHODSTATE)),
    )
}

/// `Continuation.peek() -> MethodState` - the next state to restore
pub fn peek_state() -> MethodRef {
    continuation_method(
        UnqualifiedName::PEEK,
        vec![],
        Some(FieldType::object(BinaryName::METHODSTATE)),
    )
}

/// `MethodState(int continuationIndex, Object[] locals, Object[] stack)`
pub fn method_state_constructor() -> ConstructorRef {
    ConstructorRef {
        class: BinaryName::METHODSTATE,
        parameters: vec![
            FieldType::INT,
            FieldType::array(FieldType::OBJECT),
            FieldType::array(FieldType::OBJECT),
        ],
    }
}

/// `Coroutine.run(Continuation)` - the user entry point
///
/// Its first argument is the continuation; the same shape assumption lets
/// the rewriter find the continuation in any instrumented method's
/// parameter list.
pub fn coroutine_run() -> MethodRef {
    MethodRef {
        class: BinaryName::COROUTINE,
        name: UnqualifiedName::RUN,
        descriptor: MethodDescriptor {
            parameters: vec![FieldType::object(BinaryName::CONTINUATION)],
            return_type: None,
        },
        is_static: false,
        on_interface: true,
    }
}

/// `MethodState.getContinuationIndex() -> int`
pub fn get_continuation_index() -> MethodRef {
    method_state_method(
        UnqualifiedName::GETCONTINUATIONINDEX,
        Some(FieldType::INT),
    )
}

/// `MethodState.getLocals() -> Object[]`
pub fn get_locals() -> MethodRef {
    method_state_method(
        UnqualifiedName::GETLOCALS,
        Some(FieldType::array(FieldType::OBJECT)),
    )
}

/// `MethodState.getStack() -> Object[]`
pub fn get_stack() -> MethodRef {
    method_state_method(
        UnqualifiedName::GETSTACK,
        Some(FieldType::array(FieldType::OBJECT)),
    )
}

fn continuation_method(
    name: UnqualifiedName,
    parameters: Vec<FieldType>,
    return_type: Option<FieldType>,
) -> MethodRef {
    MethodRef {
        class: BinaryName::CONTINUATION,
        name,
        descriptor: MethodDescriptor {
            parameters,
            return_type,
        },
        is_static: false,
        on_interface: false,
    }
}

fn method_state_method(name: UnqualifiedName, return_type: Option<FieldType>) -> MethodRef {
    MethodRef {
        class: BinaryName::METHODSTATE,
        name,
        descriptor: MethodDescriptor {
            parameters: vec![],
            return_type,
        },
        is_static: false,
        on_interface: false,
    }
}
