//! Email processing pipeline.
//!
//! Every email flows through, per operation:
//! 1. `RuleCategorizer::evaluate()` — fast pattern matching (no completion call)
//! 2. `Processor::process_one()` — prompt resolution, completion, parsing
//! 3. Persistence — results, processed flags, and the append-only log
//!
//! **No email is ever sent.** Auto-reply produces stored drafts only.

pub mod processor;
pub mod rules;
pub mod types;

pub use processor::Processor;
pub use rules::{RuleCategorizer, RuleField};
pub use types::{BatchSummary, CancelFlag, ItemOutcome, OperationType};
