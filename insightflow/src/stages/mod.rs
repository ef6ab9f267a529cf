//! Stage declarations.
//!
//! A stage is data, not behaviour: an agent, a prompt template, the
//! dependencies it reads, what it expects back, and optionally a gate and a
//! run condition. The orchestrator interprets it.

mod condition;
mod gate;
mod spec;

pub use condition::StageCondition;
pub use gate::{Gate, GateVerdict};
pub use spec::StageSpec;
