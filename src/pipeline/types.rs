//! Shared types for the email processing pipeline.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

// ── Operations ──────────────────────────────────────────────────────

/// Which completion-backed transformation to run.
///
/// The first three run against stored emails, each with its own prompt,
/// its own parser, and its own processed flag per email. The compose
/// operations (`NewEmail`, `DraftRefinement`) run on demand, produce or
/// rewrite a draft, and track no per-email state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Categorization,
    ActionExtraction,
    AutoReply,
    NewEmail,
    DraftRefinement,
}

impl OperationType {
    pub const ALL: [OperationType; 5] = [
        OperationType::Categorization,
        OperationType::ActionExtraction,
        OperationType::AutoReply,
        OperationType::NewEmail,
        OperationType::DraftRefinement,
    ];

    /// Stable identifier used in the store and the processing log.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Categorization => "categorization",
            OperationType::ActionExtraction => "action_extraction",
            OperationType::AutoReply => "auto_reply",
            OperationType::NewEmail => "new_email",
            OperationType::DraftRefinement => "draft_refinement",
        }
    }

    pub fn parse(s: &str) -> Option<OperationType> {
        match s {
            "categorization" => Some(OperationType::Categorization),
            "action_extraction" => Some(OperationType::ActionExtraction),
            "auto_reply" => Some(OperationType::AutoReply),
            "new_email" => Some(OperationType::NewEmail),
            "draft_refinement" => Some(OperationType::DraftRefinement),
            _ => None,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Item outcome ────────────────────────────────────────────────────

/// Outcome of processing a single email for one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Completion succeeded; the parsed result was persisted.
    Succeeded,
    /// Completion failed; the fallback result was persisted.
    Failed { error: String },
    /// The email was already processed for this operation.
    Skipped,
}

impl ItemOutcome {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed { .. } => "failed",
            Self::Skipped => "skipped",
        }
    }
}

// ── Batch summary ───────────────────────────────────────────────────

/// Summary of a batch run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Per-item failure details, capped at [`BatchSummary::MAX_ERROR_SAMPLES`].
    pub errors: Vec<String>,
}

impl BatchSummary {
    /// Cap on stored failure details; the counters stay exact.
    pub const MAX_ERROR_SAMPLES: usize = 5;

    /// Number of items accounted for.
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    pub(crate) fn record_error(&mut self, detail: String) {
        if self.errors.len() < Self::MAX_ERROR_SAMPLES {
            self.errors.push(detail);
        }
    }
}

// ── Cancellation ────────────────────────────────────────────────────

/// Cooperative cancellation flag for batch runs.
///
/// Checked between items only; the in-flight item always completes.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_identifiers_round_trip() {
        for operation in OperationType::ALL {
            assert_eq!(OperationType::parse(operation.as_str()), Some(operation));
        }
        assert_eq!(OperationType::parse("unknown"), None);
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(ItemOutcome::Succeeded.label(), "succeeded");
        assert_eq!(
            ItemOutcome::Failed { error: "timeout".into() }.label(),
            "failed"
        );
        assert_eq!(ItemOutcome::Skipped.label(), "skipped");
    }

    #[test]
    fn summary_caps_error_samples() {
        let mut summary = BatchSummary::default();
        for i in 0..10 {
            summary.failed += 1;
            summary.record_error(format!("error {i}"));
        }
        assert_eq!(summary.failed, 10);
        assert_eq!(summary.errors.len(), BatchSummary::MAX_ERROR_SAMPLES);
        assert_eq!(summary.errors[0], "error 0");
    }

    #[test]
    fn summary_totals() {
        let summary = BatchSummary {
            succeeded: 2,
            failed: 1,
            skipped: 3,
            errors: vec![],
        };
        assert_eq!(summary.total(), 6);
    }

    #[test]
    fn cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!flag.is_cancelled());
        clone.cancel();
        assert!(flag.is_cancelled());
    }
}
