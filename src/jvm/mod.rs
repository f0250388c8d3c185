//! The slice of the JVM class-file model the instrumenter works with
//!
//! Class-file parsing and serialization live in the front-end; what the
//! instrumenter needs from a method is its identity, descriptor, access
//! flags, instruction list, exception table, and the per-instruction
//! verifier frames. The types here model exactly that surface: names,
//! descriptors, static types, frames, and the two fatal error kinds.

mod access_flags;
pub mod code;
mod descriptors;
mod errors;
mod frame;
mod names;

pub use access_flags::*;
pub use descriptors::*;
pub use errors::*;
pub use frame::*;
pub use names::*;
