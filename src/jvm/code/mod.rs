//! Instruction lists and labels
//!
//! Method bodies are linear lists of [`Insn`] nodes. Control flow refers to
//! [`Label`]s, which appear in the list as pseudo-instructions; a
//! [`LabelGenerator`] hands out fresh ones per method so cloned code can be
//! rewired through a correspondence map.

mod insn_list;
mod instructions;
mod label;

pub use insn_list::*;
pub use instructions::*;
pub use label::*;
