//! Unified `Store` trait. Single async interface for all persistence:
//! emails, prompts, action items, drafts, processing state, and the log.
//!
//! Row structs mirror table rows. Parsed-output types (`ActionItem`,
//! `Category`, `Priority`) live in [`crate::parse`] and are persisted here.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StoreError;
use crate::parse::{ActionItem, Category, Priority};
use crate::pipeline::types::OperationType;

/// A stored email.
#[derive(Debug, Clone)]
pub struct EmailRecord {
    pub id: String,
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
    /// Assigned category, once categorization has run.
    pub category: Option<Category>,
    pub created_at: DateTime<Utc>,
}

/// A stored prompt template for one operation.
#[derive(Debug, Clone)]
pub struct PromptSpec {
    pub id: String,
    pub name: String,
    pub operation: OperationType,
    pub content: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored action item extracted from an email.
#[derive(Debug, Clone)]
pub struct StoredActionItem {
    pub id: String,
    pub email_id: String,
    pub task: String,
    pub deadline: Option<String>,
    pub priority: Priority,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

/// A stored reply draft. `email_id` is None when the source email has
/// been deleted.
#[derive(Debug, Clone)]
pub struct Draft {
    pub id: String,
    pub email_id: Option<String>,
    pub subject: String,
    pub body: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Outcome recorded in a processing log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStatus {
    /// The operation completed and its result was persisted.
    Success,
    /// The operation failed; the fallback (if any) was persisted.
    Failed,
    /// The operation was recorded before its outcome was known.
    Pending,
}

/// One entry in the append-only processing log.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub id: String,
    /// The email this entry refers to, if any.
    pub email_id: Option<String>,
    pub operation: OperationType,
    pub status: LogStatus,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Aggregate inbox counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InboxStats {
    pub total_emails: u64,
    /// Emails per category label; uncategorized emails appear under
    /// "Uncategorized".
    pub category_counts: BTreeMap<String, u64>,
    pub open_action_items: u64,
    pub total_drafts: u64,
}

/// Backend-agnostic store trait covering emails, prompts, action items,
/// drafts, processing state, and the processing log.
#[async_trait]
pub trait Store: Send + Sync {
    // ── Emails ──────────────────────────────────────────────────────

    /// Insert a new email. Returns the generated UUID string.
    async fn insert_email(
        &self,
        sender: &str,
        subject: &str,
        body: &str,
        received_at: DateTime<Utc>,
    ) -> Result<String, StoreError>;

    /// Get an email by ID.
    async fn get_email(&self, id: &str) -> Result<Option<EmailRecord>, StoreError>;

    /// List emails, newest first, optionally filtered by category and
    /// capped at `limit`.
    async fn list_emails(
        &self,
        category: Option<Category>,
        limit: Option<u32>,
    ) -> Result<Vec<EmailRecord>, StoreError>;

    /// Emails not yet processed for `operation`, oldest first.
    async fn unprocessed_emails(
        &self,
        operation: OperationType,
        limit: Option<u32>,
    ) -> Result<Vec<EmailRecord>, StoreError>;

    /// Set an email's category.
    async fn set_category(&self, id: &str, category: Category) -> Result<(), StoreError>;

    // ── Processing state ────────────────────────────────────────────

    /// Check whether an email has been processed for an operation.
    async fn is_processed(
        &self,
        email_id: &str,
        operation: OperationType,
    ) -> Result<bool, StoreError>;

    /// Mark an email processed for an operation. Idempotent.
    async fn mark_processed(
        &self,
        email_id: &str,
        operation: OperationType,
    ) -> Result<(), StoreError>;

    /// Clear processing state so emails can be reprocessed. Both filters
    /// are optional; passing neither clears everything. Returns the number
    /// of cleared entries.
    async fn reset_processed(
        &self,
        email_id: Option<&str>,
        operation: Option<OperationType>,
    ) -> Result<u64, StoreError>;

    // ── Prompts ─────────────────────────────────────────────────────

    /// Save a new active prompt. Returns the generated UUID string.
    async fn save_prompt(
        &self,
        name: &str,
        operation: OperationType,
        content: &str,
    ) -> Result<String, StoreError>;

    /// All active prompts for an operation, oldest first.
    async fn active_prompts(&self, operation: OperationType)
    -> Result<Vec<PromptSpec>, StoreError>;

    /// Deactivate a prompt. Returns false when the ID does not exist.
    async fn deactivate_prompt(&self, id: &str) -> Result<bool, StoreError>;

    // ── Action items ────────────────────────────────────────────────

    /// Save an extracted action item for an email. Returns the generated
    /// UUID string.
    async fn save_action_item(
        &self,
        email_id: &str,
        item: &ActionItem,
    ) -> Result<String, StoreError>;

    /// Action items for one email, oldest first.
    async fn action_items_for_email(
        &self,
        email_id: &str,
    ) -> Result<Vec<StoredActionItem>, StoreError>;

    /// All open (not completed) action items, oldest first.
    async fn open_action_items(&self) -> Result<Vec<StoredActionItem>, StoreError>;

    /// Mark an action item completed. Returns false when the ID does not
    /// exist.
    async fn complete_action_item(&self, id: &str) -> Result<bool, StoreError>;

    // ── Drafts ──────────────────────────────────────────────────────

    /// Save a draft. Returns the generated UUID string.
    async fn save_draft(
        &self,
        email_id: Option<&str>,
        subject: &str,
        body: &str,
        note: Option<&str>,
    ) -> Result<String, StoreError>;

    /// Fetch a draft by ID.
    async fn get_draft(&self, id: &str) -> Result<Option<Draft>, StoreError>;

    /// Replace a draft's subject and body. Returns false when the ID does
    /// not exist.
    async fn update_draft(&self, id: &str, subject: &str, body: &str)
    -> Result<bool, StoreError>;

    /// All drafts, newest first.
    async fn list_drafts(&self) -> Result<Vec<Draft>, StoreError>;

    // ── Processing log ──────────────────────────────────────────────

    /// Append a processing log entry. The log is append-only; entries are
    /// never updated or deleted. Returns the generated UUID string.
    async fn append_log(
        &self,
        email_id: Option<&str>,
        operation: OperationType,
        status: LogStatus,
        detail: Option<&str>,
    ) -> Result<String, StoreError>;

    /// Most recent log entries, newest first.
    async fn recent_log(&self, limit: u32) -> Result<Vec<LogEntry>, StoreError>;

    // ── Stats ───────────────────────────────────────────────────────

    /// Aggregate inbox counters.
    async fn stats(&self) -> Result<InboxStats, StoreError>;
}
