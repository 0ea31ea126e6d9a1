//! Email processor. Drives emails through prompt resolution, the completion
//! client, output parsing, and persistence.
//!
//! **Core invariant: a processed email never reaches the completion backend
//! again.** Every email/operation pair is handled at most once; reruns skip
//! it without a completion call.
//!
//! Flow for one email and one operation:
//! 1. Skip check (processed flag, no completion call)
//! 2. Prompt resolution (exactly one active prompt, no completion call)
//! 3. Completion call through the bounded-retry client
//! 4. Parse and persist the result, or the fallback on failure
//! 5. Mark processed and append to the processing log
//!
//! Draft composition (`generate_email`, `refine_draft`) shares the client
//! and the processing log but runs against no stored email; its log entries
//! carry no email id.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::completion::{CompletionClient, CompletionRequest};
use crate::error::{CompletionError, PipelineError, StoreError};
use crate::parse;
use crate::parse::{Category, DraftContent};
use crate::pipeline::rules::RuleCategorizer;
use crate::pipeline::types::{BatchSummary, CancelFlag, ItemOutcome, OperationType};
use crate::prompts;
use crate::store::{Draft, EmailRecord, LogStatus, PromptSpec, Store};

/// Body excerpt cap for categorization prompts. A label decision does not
/// need the whole body.
const CATEGORIZATION_BODY_CHARS: usize = 500;

/// Output cap for categorization calls (a single label).
const CATEGORIZATION_MAX_TOKENS: u32 = 50;

/// Output cap for task extraction calls.
const EXTRACTION_MAX_TOKENS: u32 = 500;

/// Output cap for draft generation: replies, new emails, and refinements.
const DRAFT_MAX_TOKENS: u32 = 1000;

/// Temperature for draft generation; higher than the default so drafts
/// read less mechanical.
const DRAFT_TEMPERATURE: f32 = 0.8;

/// Email processor. Owns the completion client, the rule set, and the
/// store handle.
pub struct Processor {
    store: Arc<dyn Store>,
    client: CompletionClient,
    rules: RuleCategorizer,
    cancel: CancelFlag,
}

impl Processor {
    pub fn new(store: Arc<dyn Store>, client: CompletionClient, rules: RuleCategorizer) -> Self {
        Self {
            store,
            client,
            rules,
            cancel: CancelFlag::new(),
        }
    }

    /// Handle for cancelling batch runs from another task. Cancellation
    /// takes effect between items; the in-flight item completes.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Process a single email for one operation.
    ///
    /// Already-processed emails are skipped without a completion call.
    /// A completion failure persists the operation's fallback result and
    /// still marks the email processed; both paths append a log entry.
    /// Prompt-configuration problems surface as errors before any
    /// completion call, and the email stays unprocessed.
    pub async fn process_one(
        &self,
        email: &EmailRecord,
        operation: OperationType,
    ) -> Result<ItemOutcome, PipelineError> {
        if self.store.is_processed(&email.id, operation).await? {
            debug!(id = %email.id, operation = %operation, "Email already processed, skipping");
            return Ok(ItemOutcome::Skipped);
        }

        let prompt = self.active_prompt(operation).await?;
        let request = build_request(&prompt, email, operation);

        match self.client.complete(&request).await {
            Ok(completion) => {
                self.persist_success(email, operation, &completion.text).await?;
                self.store.mark_processed(&email.id, operation).await?;
                self.store
                    .append_log(Some(&email.id), operation, LogStatus::Success, None)
                    .await?;
                info!(id = %email.id, operation = %operation, "Email processed");
                Ok(ItemOutcome::Succeeded)
            }
            Err(e) => {
                let detail = failure_detail(&e);
                self.persist_fallback(email, operation).await?;
                self.store.mark_processed(&email.id, operation).await?;
                self.store
                    .append_log(Some(&email.id), operation, LogStatus::Failed, Some(&detail))
                    .await?;
                warn!(
                    id = %email.id,
                    operation = %operation,
                    kind = e.kind(),
                    error = %e,
                    "Completion failed, fallback applied"
                );
                Ok(ItemOutcome::Failed { error: detail })
            }
        }
    }

    /// Process an email looked up by id.
    pub async fn process_by_id(
        &self,
        id: &str,
        operation: OperationType,
    ) -> Result<ItemOutcome, PipelineError> {
        let email = self
            .store
            .get_email(id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "email".into(),
                id: id.into(),
            })?;
        self.process_one(&email, operation).await
    }

    /// Process a batch of emails for one operation, in the given order.
    ///
    /// Individual failures never abort the batch: completion failures count
    /// as failed (with the fallback persisted), configuration and store
    /// errors count as failed without marking the email processed. There is
    /// no rollback of items already handled.
    pub async fn process_batch(
        &self,
        emails: &[EmailRecord],
        operation: OperationType,
    ) -> BatchSummary {
        let total = emails.len();
        info!(total, operation = %operation, "Processing batch");

        let mut summary = BatchSummary::default();
        for email in emails {
            if self.cancel.is_cancelled() {
                warn!(
                    attempted = summary.total(),
                    total,
                    operation = %operation,
                    "Batch cancelled"
                );
                break;
            }

            match self.process_one(email, operation).await {
                Ok(ItemOutcome::Succeeded) => summary.succeeded += 1,
                Ok(ItemOutcome::Failed { error }) => {
                    summary.failed += 1;
                    summary.record_error(format!("{}: {error}", email.id));
                }
                Ok(ItemOutcome::Skipped) => summary.skipped += 1,
                Err(e) => {
                    summary.failed += 1;
                    summary.record_error(format!("{}: {e}", email.id));
                    error!(id = %email.id, error = %e, "Failed to process email in batch");
                    if let Err(log_err) = self
                        .store
                        .append_log(
                            Some(&email.id),
                            operation,
                            LogStatus::Failed,
                            Some(&e.to_string()),
                        )
                        .await
                    {
                        warn!(id = %email.id, error = %log_err, "Failed to append log entry");
                    }
                }
            }
        }

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            operation = %operation,
            "Batch complete"
        );
        summary
    }

    /// Fetch every email not yet processed for `operation` and run the batch.
    pub async fn process_pending(
        &self,
        operation: OperationType,
    ) -> Result<BatchSummary, PipelineError> {
        let pending = self.store.unprocessed_emails(operation, None).await?;
        if pending.is_empty() {
            info!(operation = %operation, "No pending emails");
            return Ok(BatchSummary::default());
        }
        Ok(self.process_batch(&pending, operation).await)
    }

    /// Rule-based categorization pass. Never calls the completion backend.
    ///
    /// A rule hit assigns the category, marks the email processed for
    /// categorization, and logs it; a To-Do hit also records the extracted
    /// action item. Emails with no rule hit are left untouched for the
    /// completion path.
    pub async fn apply_rules(
        &self,
        emails: &[EmailRecord],
    ) -> Result<BatchSummary, PipelineError> {
        let mut summary = BatchSummary::default();
        for email in emails {
            if self
                .store
                .is_processed(&email.id, OperationType::Categorization)
                .await?
            {
                summary.skipped += 1;
                continue;
            }

            let Some(category) = self.rules.evaluate(email) else {
                continue;
            };

            self.store.set_category(&email.id, category).await?;
            if category == Category::ToDo {
                let action = self.rules.todo_action(email);
                self.store.save_action_item(&email.id, &action).await?;
            }
            self.store
                .mark_processed(&email.id, OperationType::Categorization)
                .await?;
            self.store
                .append_log(
                    Some(&email.id),
                    OperationType::Categorization,
                    LogStatus::Success,
                    Some("rule match"),
                )
                .await?;
            debug!(id = %email.id, category = %category, "Rule categorization applied");
            summary.succeeded += 1;
        }

        info!(
            categorized = summary.succeeded,
            skipped = summary.skipped,
            total = emails.len(),
            "Rule pass complete"
        );
        Ok(summary)
    }

    // ── Draft composition ───────────────────────────────────────────

    /// Compose a brand-new email draft for a recipient and purpose.
    ///
    /// Runs against no stored email: the draft is saved standalone with a
    /// note naming the recipient, and the log entry carries no email id.
    /// On a completion failure nothing is saved; the failure is logged and
    /// returned.
    pub async fn generate_email(
        &self,
        recipient: &str,
        purpose: &str,
        key_points: Option<&str>,
    ) -> Result<Draft, PipelineError> {
        let request =
            CompletionRequest::new(prompts::new_email_prompt(recipient, purpose, key_points))
                .with_temperature(DRAFT_TEMPERATURE)
                .with_max_output_tokens(DRAFT_MAX_TOKENS);

        let completion = match self.client.complete(&request).await {
            Ok(completion) => completion,
            Err(e) => return self.compose_failure(OperationType::NewEmail, e).await,
        };

        let content = parse::parse_new_email(&completion.text, purpose);
        let note = format!("New email to {recipient}");
        let id = self
            .store
            .save_draft(None, &content.subject, &content.body, Some(&note))
            .await?;
        self.store
            .append_log(None, OperationType::NewEmail, LogStatus::Success, None)
            .await?;
        info!(id = %id, recipient = %recipient, "New email draft saved");
        self.fetch_draft(&id).await
    }

    /// Rewrite an existing draft according to free-form instructions.
    ///
    /// A completion without a recognizable subject and body leaves the
    /// draft's content as it was; the linked email and note always survive.
    pub async fn refine_draft(
        &self,
        draft_id: &str,
        instructions: &str,
    ) -> Result<Draft, PipelineError> {
        let draft = self.fetch_draft(draft_id).await?;

        let request = CompletionRequest::new(prompts::refinement_prompt(
            &draft.subject,
            &draft.body,
            instructions,
        ))
        .with_temperature(DRAFT_TEMPERATURE)
        .with_max_output_tokens(DRAFT_MAX_TOKENS);

        let completion = match self.client.complete(&request).await {
            Ok(completion) => completion,
            Err(e) => {
                return self
                    .compose_failure(OperationType::DraftRefinement, e)
                    .await;
            }
        };

        let content = parse::parse_refinement(&completion.text).unwrap_or(DraftContent {
            subject: draft.subject,
            body: draft.body,
        });
        self.store
            .update_draft(draft_id, &content.subject, &content.body)
            .await?;
        self.store
            .append_log(None, OperationType::DraftRefinement, LogStatus::Success, None)
            .await?;
        info!(id = %draft_id, "Draft refined");
        self.fetch_draft(draft_id).await
    }

    async fn fetch_draft(&self, id: &str) -> Result<Draft, PipelineError> {
        Ok(self
            .store
            .get_draft(id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "draft".into(),
                id: id.into(),
            })?)
    }

    /// Log a failed composition attempt and surface the error.
    async fn compose_failure(
        &self,
        operation: OperationType,
        error: CompletionError,
    ) -> Result<Draft, PipelineError> {
        let detail = failure_detail(&error);
        self.store
            .append_log(None, operation, LogStatus::Failed, Some(&detail))
            .await?;
        warn!(
            operation = %operation,
            kind = error.kind(),
            error = %error,
            "Draft composition failed"
        );
        Err(PipelineError::Completion(error))
    }

    /// Resolve the single active prompt for an operation.
    async fn active_prompt(&self, operation: OperationType) -> Result<PromptSpec, PipelineError> {
        let mut prompts = self.store.active_prompts(operation).await?;
        match prompts.len() {
            0 => Err(PipelineError::NoActivePrompt {
                operation: operation.to_string(),
            }),
            1 => Ok(prompts.remove(0)),
            count => Err(PipelineError::AmbiguousPrompts {
                operation: operation.to_string(),
                count,
            }),
        }
    }

    /// Persist the parsed result of a successful completion.
    async fn persist_success(
        &self,
        email: &EmailRecord,
        operation: OperationType,
        text: &str,
    ) -> Result<(), StoreError> {
        match operation {
            OperationType::Categorization => {
                let category = parse::parse_category(text);
                self.store.set_category(&email.id, category).await?;
            }
            OperationType::ActionExtraction => {
                for item in parse::parse_tasks(text) {
                    self.store.save_action_item(&email.id, &item).await?;
                }
            }
            // Any draft-producing operation run against an email saves a
            // draft linked to it.
            OperationType::AutoReply | OperationType::NewEmail | OperationType::DraftRefinement => {
                let draft = parse::parse_reply(text, &email.subject);
                self.store
                    .save_draft(Some(&email.id), &draft.subject, &draft.body, None)
                    .await?;
            }
        }
        Ok(())
    }

    /// Persist the operation's documented fallback after a completion
    /// failure: `Uncategorized` for categorization, nothing for the other
    /// operations.
    async fn persist_fallback(
        &self,
        email: &EmailRecord,
        operation: OperationType,
    ) -> Result<(), StoreError> {
        match operation {
            OperationType::Categorization => {
                self.store
                    .set_category(&email.id, Category::Uncategorized)
                    .await
            }
            _ => Ok(()),
        }
    }
}

/// Log detail for a completion failure: failure kind plus message.
fn failure_detail(error: &CompletionError) -> String {
    format!("{}: {error}", error.kind())
}

// ── Request construction ────────────────────────────────────────────

/// Build the completion request for one email and operation: the active
/// prompt's content followed by the email fields, with the operation's
/// generation parameters.
fn build_request(
    prompt: &PromptSpec,
    email: &EmailRecord,
    operation: OperationType,
) -> CompletionRequest {
    match operation {
        OperationType::Categorization => {
            let body: String = email.body.chars().take(CATEGORIZATION_BODY_CHARS).collect();
            let text = format!(
                "{}\n\nEmail:\nFrom: {}\nSubject: {}\nBody: {}",
                prompt.content, email.sender, email.subject, body
            );
            CompletionRequest::new(text).with_max_output_tokens(CATEGORIZATION_MAX_TOKENS)
        }
        OperationType::ActionExtraction => {
            let text = format!(
                "{}\n\nEmail:\nSender: {}\nSubject: {}\nBody: {}",
                prompt.content, email.sender, email.subject, email.body
            );
            CompletionRequest::new(text).with_max_output_tokens(EXTRACTION_MAX_TOKENS)
        }
        OperationType::AutoReply | OperationType::NewEmail | OperationType::DraftRefinement => {
            let text = format!(
                "{}\n\nOriginal Email:\nFrom: {}\nSubject: {}\nBody: {}",
                prompt.content, email.sender, email.subject, email.body
            );
            CompletionRequest::new(text)
                .with_temperature(DRAFT_TEMPERATURE)
                .with_max_output_tokens(DRAFT_MAX_TOKENS)
        }
    }
}
