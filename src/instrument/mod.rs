//! The coroutine instrumentation pass
//!
//! ### Structure
//!
//! The pass is built from four layers, leaves first:
//!
//!   - [`fragments`] produces short, composable instruction fragments
//!     (typed loads and stores, constant pushes, invocations, switch
//!     tables, dummy returns);
//!   - [`VariableTable`] hands out fresh local variable slots above the
//!     method's own frame and tracks the high-water mark;
//!   - [`frame_codec`] turns a verifier frame into the dual save/restore
//!     fragments that round-trip the operand stack and locals through
//!     `Object[]` arrays, boxing primitives by their static type;
//!   - [`MethodRewriter`] orchestrates a whole method: continuation point
//!     discovery, save/restore block synthesis, the prologue dispatcher,
//!     and the exception table patch.
//!
//! ### Runtime protocol
//!
//! The emitted code talks to the runtime through the fixed ABI in
//! [`runtime`]: a `Continuation` holding a stack of `MethodState`s and a
//! mode flag. Suspending flips the mode to *saving* and unwinds through
//! dummy returns, each frame pushing its state on the way out; resuming
//! runs the same methods in *restoring* mode, where each prologue
//! dispatcher short-circuits to the restore block that rebuilds the frame
//! and re-enters the call chain, until the deepest frame clears the mode
//! and user code continues as if nothing happened.

pub mod fragments;
pub mod frame_codec;
mod rewriter;
pub mod runtime;
mod variables;

pub use rewriter::*;
pub use variables::*;
