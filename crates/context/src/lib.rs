//! Context assembly: turning unbounded thread history into a bounded,
//! ordered prompt.

pub mod assembler;
pub mod estimate;

pub use assembler::{AssembledContext, ContextAssembler};
pub use estimate::estimate_tokens;
