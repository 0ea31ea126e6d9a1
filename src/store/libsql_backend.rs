//! libSQL backend. Async `Store` implementation over a local file or
//! in-memory database. Migrations run when the store is opened.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::parse::{ActionItem, Category, Priority};
use crate::pipeline::types::OperationType;
use crate::store::migrations;
use crate::store::traits::{
    Draft, EmailRecord, InboxStats, LogEntry, LogStatus, PromptSpec, Store, StoredActionItem,
};

/// libSQL store backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Open(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run a single-value COUNT query.
    async fn scalar_count(&self, sql: &str, label: &str) -> Result<u64, StoreError> {
        let mut rows = self
            .conn()
            .query(sql, ())
            .await
            .map_err(|e| StoreError::Query(format!("{label}: {e}")))?;
        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| StoreError::Query(format!("{label}: {e}")))?;
                Ok(count.max(0) as u64)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(StoreError::Query(format!("{label}: {e}"))),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    // Try RFC 3339 first (our canonical write format)
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    // Try SQLite datetime() output with fractional seconds
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    // Try SQLite datetime() output without fractional seconds
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to a libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Convert a LogStatus to its DB string.
fn status_to_str(status: LogStatus) -> &'static str {
    match status {
        LogStatus::Success => "success",
        LogStatus::Failed => "failed",
        LogStatus::Pending => "pending",
    }
}

/// Parse a status string from the DB.
fn str_to_status(s: &str) -> LogStatus {
    match s {
        "success" => LogStatus::Success,
        "failed" => LogStatus::Failed,
        _ => LogStatus::Pending,
    }
}

/// Parse an operation string from the DB.
fn str_to_operation(s: &str) -> OperationType {
    OperationType::parse(s).unwrap_or(OperationType::Categorization)
}

/// Map a libsql Row to an EmailRecord.
///
/// Column order matches EMAIL_COLUMNS:
/// 0:id, 1:sender, 2:subject, 3:body, 4:received_at, 5:category, 6:created_at
fn row_to_email(row: &libsql::Row) -> Result<EmailRecord, libsql::Error> {
    let received_str: String = row.get(4)?;
    let category_str: Option<String> = row.get(5).ok();
    let created_str: String = row.get(6)?;

    Ok(EmailRecord {
        id: row.get(0)?,
        sender: row.get(1)?,
        subject: row.get(2)?,
        body: row.get(3)?,
        received_at: parse_datetime(&received_str),
        category: category_str.and_then(|s| Category::from_label(&s)),
        created_at: parse_datetime(&created_str),
    })
}

/// Map a libsql Row to a PromptSpec.
///
/// Column order matches PROMPT_COLUMNS:
/// 0:id, 1:name, 2:operation_type, 3:content, 4:is_active, 5:created_at, 6:updated_at
fn row_to_prompt(row: &libsql::Row) -> Result<PromptSpec, libsql::Error> {
    let operation_str: String = row.get(2)?;
    let active: i64 = row.get(4)?;
    let created_str: String = row.get(5)?;
    let updated_str: String = row.get(6)?;

    Ok(PromptSpec {
        id: row.get(0)?,
        name: row.get(1)?,
        operation: str_to_operation(&operation_str),
        content: row.get(3)?,
        active: active != 0,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

/// Map a libsql Row to a StoredActionItem.
///
/// Column order matches ACTION_ITEM_COLUMNS:
/// 0:id, 1:email_id, 2:task, 3:deadline, 4:priority, 5:is_completed, 6:created_at
fn row_to_action_item(row: &libsql::Row) -> Result<StoredActionItem, libsql::Error> {
    let priority_str: String = row.get(4)?;
    let completed: i64 = row.get(5)?;
    let created_str: String = row.get(6)?;

    Ok(StoredActionItem {
        id: row.get(0)?,
        email_id: row.get(1)?,
        task: row.get(2)?,
        deadline: row.get(3).ok(),
        priority: Priority::from_label(&priority_str),
        completed: completed != 0,
        created_at: parse_datetime(&created_str),
    })
}

/// Map a libsql Row to a Draft.
///
/// Column order matches DRAFT_COLUMNS:
/// 0:id, 1:email_id, 2:subject, 3:body, 4:note, 5:created_at
fn row_to_draft(row: &libsql::Row) -> Result<Draft, libsql::Error> {
    let created_str: String = row.get(5)?;

    Ok(Draft {
        id: row.get(0)?,
        email_id: row.get(1).ok(),
        subject: row.get(2)?,
        body: row.get(3)?,
        note: row.get(4).ok(),
        created_at: parse_datetime(&created_str),
    })
}

/// Map a libsql Row to a LogEntry.
///
/// Column order matches LOG_COLUMNS:
/// 0:id, 1:email_id, 2:operation_type, 3:status, 4:detail, 5:created_at
fn row_to_log(row: &libsql::Row) -> Result<LogEntry, libsql::Error> {
    let operation_str: String = row.get(2)?;
    let status_str: String = row.get(3)?;
    let created_str: String = row.get(5)?;

    Ok(LogEntry {
        id: row.get(0)?,
        email_id: row.get(1).ok(),
        operation: str_to_operation(&operation_str),
        status: str_to_status(&status_str),
        detail: row.get(4).ok(),
        created_at: parse_datetime(&created_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const EMAIL_COLUMNS: &str = "id, sender, subject, body, received_at, category, created_at";

const PROMPT_COLUMNS: &str = "id, name, operation_type, content, is_active, created_at, updated_at";

const ACTION_ITEM_COLUMNS: &str = "id, email_id, task, deadline, priority, is_completed, created_at";

const DRAFT_COLUMNS: &str = "id, email_id, subject, body, note, created_at";

const LOG_COLUMNS: &str = "id, email_id, operation_type, status, detail, created_at";

#[async_trait]
impl Store for LibSqlStore {
    // ── Emails ──────────────────────────────────────────────────────

    async fn insert_email(
        &self,
        sender: &str,
        subject: &str,
        body: &str,
        received_at: DateTime<Utc>,
    ) -> Result<String, StoreError> {
        let conn = self.conn();
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO emails (id, sender, subject, body, received_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id.clone(),
                sender,
                subject,
                body,
                received_at.to_rfc3339(),
                now
            ],
        )
        .await
        .map_err(|e| StoreError::Query(format!("insert_email: {e}")))?;

        debug!(id = %id, sender = %sender, "Email inserted");
        Ok(id)
    }

    async fn get_email(&self, id: &str) -> Result<Option<EmailRecord>, StoreError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {EMAIL_COLUMNS} FROM emails WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_email: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let email = row_to_email(&row)
                    .map_err(|e| StoreError::Query(format!("get_email row parse: {e}")))?;
                Ok(Some(email))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get_email: {e}"))),
        }
    }

    async fn list_emails(
        &self,
        category: Option<Category>,
        limit: Option<u32>,
    ) -> Result<Vec<EmailRecord>, StoreError> {
        let conn = self.conn();
        // LIMIT -1 means unlimited in SQLite.
        let cap = limit.map(i64::from).unwrap_or(-1);
        let mut rows = match category {
            Some(category) => conn
                .query(
                    &format!(
                        "SELECT {EMAIL_COLUMNS} FROM emails WHERE category = ?1
                         ORDER BY received_at DESC LIMIT ?2"
                    ),
                    params![category.as_str(), cap],
                )
                .await,
            None => {
                conn.query(
                    &format!(
                        "SELECT {EMAIL_COLUMNS} FROM emails ORDER BY received_at DESC LIMIT ?1"
                    ),
                    params![cap],
                )
                .await
            }
        }
        .map_err(|e| StoreError::Query(format!("list_emails: {e}")))?;

        let mut emails = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_email(&row) {
                Ok(email) => emails.push(email),
                Err(e) => {
                    tracing::warn!("Skipping email row: {e}");
                }
            }
        }
        Ok(emails)
    }

    async fn unprocessed_emails(
        &self,
        operation: OperationType,
        limit: Option<u32>,
    ) -> Result<Vec<EmailRecord>, StoreError> {
        let conn = self.conn();
        let cap = limit.map(i64::from).unwrap_or(-1);
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {EMAIL_COLUMNS} FROM emails e
                     WHERE NOT EXISTS (
                         SELECT 1 FROM processing_state ps
                         WHERE ps.email_id = e.id AND ps.operation_type = ?1
                     )
                     ORDER BY received_at ASC LIMIT ?2"
                ),
                params![operation.as_str(), cap],
            )
            .await
            .map_err(|e| StoreError::Query(format!("unprocessed_emails: {e}")))?;

        let mut emails = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_email(&row) {
                Ok(email) => emails.push(email),
                Err(e) => {
                    tracing::warn!("Skipping email row: {e}");
                }
            }
        }
        Ok(emails)
    }

    async fn set_category(&self, id: &str, category: Category) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "UPDATE emails SET category = ?1 WHERE id = ?2",
            params![category.as_str(), id],
        )
        .await
        .map_err(|e| StoreError::Query(format!("set_category: {e}")))?;

        debug!(id = %id, category = %category, "Email category updated");
        Ok(())
    }

    // ── Processing state ────────────────────────────────────────────

    async fn is_processed(
        &self,
        email_id: &str,
        operation: OperationType,
    ) -> Result<bool, StoreError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM processing_state
                 WHERE email_id = ?1 AND operation_type = ?2",
                params![email_id, operation.as_str()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("is_processed: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row.get(0).unwrap_or(0);
                Ok(count > 0)
            }
            Ok(None) => Ok(false),
            Err(e) => Err(StoreError::Query(format!("is_processed: {e}"))),
        }
    }

    async fn mark_processed(
        &self,
        email_id: &str,
        operation: OperationType,
    ) -> Result<(), StoreError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO processing_state (email_id, operation_type, processed_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(email_id, operation_type)
             DO UPDATE SET processed_at = excluded.processed_at",
            params![email_id, operation.as_str(), now],
        )
        .await
        .map_err(|e| StoreError::Query(format!("mark_processed: {e}")))?;

        debug!(id = %email_id, operation = %operation, "Email marked processed");
        Ok(())
    }

    async fn reset_processed(
        &self,
        email_id: Option<&str>,
        operation: Option<OperationType>,
    ) -> Result<u64, StoreError> {
        let conn = self.conn();
        let cleared = match (email_id, operation) {
            (Some(id), Some(op)) => {
                conn.execute(
                    "DELETE FROM processing_state WHERE email_id = ?1 AND operation_type = ?2",
                    params![id, op.as_str()],
                )
                .await
            }
            (Some(id), None) => {
                conn.execute(
                    "DELETE FROM processing_state WHERE email_id = ?1",
                    params![id],
                )
                .await
            }
            (None, Some(op)) => {
                conn.execute(
                    "DELETE FROM processing_state WHERE operation_type = ?1",
                    params![op.as_str()],
                )
                .await
            }
            (None, None) => conn.execute("DELETE FROM processing_state", ()).await,
        }
        .map_err(|e| StoreError::Query(format!("reset_processed: {e}")))?;

        debug!(cleared, "Processing state reset");
        Ok(cleared)
    }

    // ── Prompts ─────────────────────────────────────────────────────

    async fn save_prompt(
        &self,
        name: &str,
        operation: OperationType,
        content: &str,
    ) -> Result<String, StoreError> {
        let conn = self.conn();
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO prompts (id, name, operation_type, content, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6)",
            params![id.clone(), name, operation.as_str(), content, now.clone(), now],
        )
        .await
        .map_err(|e| StoreError::Query(format!("save_prompt: {e}")))?;

        debug!(id = %id, operation = %operation, name = %name, "Prompt saved");
        Ok(id)
    }

    async fn active_prompts(
        &self,
        operation: OperationType,
    ) -> Result<Vec<PromptSpec>, StoreError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {PROMPT_COLUMNS} FROM prompts
                     WHERE operation_type = ?1 AND is_active = 1
                     ORDER BY created_at ASC"
                ),
                params![operation.as_str()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("active_prompts: {e}")))?;

        let mut prompts = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_prompt(&row) {
                Ok(prompt) => prompts.push(prompt),
                Err(e) => {
                    tracing::warn!("Skipping prompt row: {e}");
                }
            }
        }
        Ok(prompts)
    }

    async fn deactivate_prompt(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let affected = conn
            .execute(
                "UPDATE prompts SET is_active = 0, updated_at = ?1 WHERE id = ?2",
                params![now, id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("deactivate_prompt: {e}")))?;

        debug!(id = %id, "Prompt deactivated");
        Ok(affected > 0)
    }

    // ── Action items ────────────────────────────────────────────────

    async fn save_action_item(
        &self,
        email_id: &str,
        item: &ActionItem,
    ) -> Result<String, StoreError> {
        let conn = self.conn();
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO action_items (id, email_id, task, deadline, priority, is_completed, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![
                id.clone(),
                email_id,
                item.task.as_str(),
                opt_text(item.deadline.as_deref()),
                item.priority.as_str(),
                now
            ],
        )
        .await
        .map_err(|e| StoreError::Query(format!("save_action_item: {e}")))?;

        debug!(id = %id, email_id = %email_id, "Action item saved");
        Ok(id)
    }

    async fn action_items_for_email(
        &self,
        email_id: &str,
    ) -> Result<Vec<StoredActionItem>, StoreError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {ACTION_ITEM_COLUMNS} FROM action_items
                     WHERE email_id = ?1 ORDER BY created_at ASC"
                ),
                params![email_id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("action_items_for_email: {e}")))?;

        let mut items = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_action_item(&row) {
                Ok(item) => items.push(item),
                Err(e) => {
                    tracing::warn!("Skipping action item row: {e}");
                }
            }
        }
        Ok(items)
    }

    async fn open_action_items(&self) -> Result<Vec<StoredActionItem>, StoreError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {ACTION_ITEM_COLUMNS} FROM action_items
                     WHERE is_completed = 0 ORDER BY created_at ASC"
                ),
                (),
            )
            .await
            .map_err(|e| StoreError::Query(format!("open_action_items: {e}")))?;

        let mut items = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_action_item(&row) {
                Ok(item) => items.push(item),
                Err(e) => {
                    tracing::warn!("Skipping action item row: {e}");
                }
            }
        }
        Ok(items)
    }

    async fn complete_action_item(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn();
        let affected = conn
            .execute(
                "UPDATE action_items SET is_completed = 1 WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("complete_action_item: {e}")))?;

        debug!(id = %id, "Action item completed");
        Ok(affected > 0)
    }

    // ── Drafts ──────────────────────────────────────────────────────

    async fn save_draft(
        &self,
        email_id: Option<&str>,
        subject: &str,
        body: &str,
        note: Option<&str>,
    ) -> Result<String, StoreError> {
        let conn = self.conn();
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO drafts (id, email_id, subject, body, note, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id.clone(),
                opt_text(email_id),
                subject,
                body,
                opt_text(note),
                now
            ],
        )
        .await
        .map_err(|e| StoreError::Query(format!("save_draft: {e}")))?;

        debug!(id = %id, "Draft saved");
        Ok(id)
    }

    async fn get_draft(&self, id: &str) -> Result<Option<Draft>, StoreError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {DRAFT_COLUMNS} FROM drafts WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_draft: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let draft = row_to_draft(&row)
                    .map_err(|e| StoreError::Query(format!("get_draft row parse: {e}")))?;
                Ok(Some(draft))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get_draft: {e}"))),
        }
    }

    async fn update_draft(&self, id: &str, subject: &str, body: &str)
    -> Result<bool, StoreError> {
        let conn = self.conn();
        let affected = conn
            .execute(
                "UPDATE drafts SET subject = ?1, body = ?2 WHERE id = ?3",
                params![subject, body, id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("update_draft: {e}")))?;

        debug!(id = %id, "Draft updated");
        Ok(affected > 0)
    }

    async fn list_drafts(&self) -> Result<Vec<Draft>, StoreError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {DRAFT_COLUMNS} FROM drafts ORDER BY created_at DESC"),
                (),
            )
            .await
            .map_err(|e| StoreError::Query(format!("list_drafts: {e}")))?;

        let mut drafts = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_draft(&row) {
                Ok(draft) => drafts.push(draft),
                Err(e) => {
                    tracing::warn!("Skipping draft row: {e}");
                }
            }
        }
        Ok(drafts)
    }

    // ── Processing log ──────────────────────────────────────────────

    async fn append_log(
        &self,
        email_id: Option<&str>,
        operation: OperationType,
        status: LogStatus,
        detail: Option<&str>,
    ) -> Result<String, StoreError> {
        let conn = self.conn();
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO processing_logs (id, email_id, operation_type, status, detail, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id.clone(),
                opt_text(email_id),
                operation.as_str(),
                status_to_str(status),
                opt_text(detail),
                now
            ],
        )
        .await
        .map_err(|e| StoreError::Query(format!("append_log: {e}")))?;

        Ok(id)
    }

    async fn recent_log(&self, limit: u32) -> Result<Vec<LogEntry>, StoreError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {LOG_COLUMNS} FROM processing_logs
                     ORDER BY created_at DESC LIMIT ?1"
                ),
                params![i64::from(limit)],
            )
            .await
            .map_err(|e| StoreError::Query(format!("recent_log: {e}")))?;

        let mut entries = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_log(&row) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!("Skipping log row: {e}");
                }
            }
        }
        Ok(entries)
    }

    // ── Stats ───────────────────────────────────────────────────────

    async fn stats(&self) -> Result<InboxStats, StoreError> {
        let total_emails = self
            .scalar_count("SELECT COUNT(*) FROM emails", "stats emails")
            .await?;
        let open_action_items = self
            .scalar_count(
                "SELECT COUNT(*) FROM action_items WHERE is_completed = 0",
                "stats action_items",
            )
            .await?;
        let total_drafts = self
            .scalar_count("SELECT COUNT(*) FROM drafts", "stats drafts")
            .await?;

        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT COALESCE(category, 'Uncategorized'), COUNT(*)
                 FROM emails GROUP BY category",
                (),
            )
            .await
            .map_err(|e| StoreError::Query(format!("stats categories: {e}")))?;

        let mut category_counts = BTreeMap::new();
        while let Ok(Some(row)) = rows.next().await {
            let label: String = match row.get(0) {
                Ok(label) => label,
                Err(_) => continue,
            };
            let count: i64 = row.get(1).unwrap_or(0);
            // NULL and an explicit Uncategorized label collapse into one bucket.
            *category_counts.entry(label).or_insert(0) += count.max(0) as u64;
        }

        Ok(InboxStats {
            total_emails,
            category_counts,
            open_action_items,
            total_drafts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn test_db() -> LibSqlStore {
        LibSqlStore::new_memory().await.unwrap()
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, hour, 0, 0).unwrap()
    }

    // ── Email tests ─────────────────────────────────────────────────

    #[tokio::test]
    async fn insert_and_get_email() {
        let db = test_db().await;
        let received = at(9);
        let id = db
            .insert_email("alice@example.com", "Hello", "Hello world", received)
            .await
            .unwrap();

        let loaded = db.get_email(&id).await.unwrap().unwrap();
        assert_eq!(loaded.id, id);
        assert_eq!(loaded.sender, "alice@example.com");
        assert_eq!(loaded.subject, "Hello");
        assert_eq!(loaded.body, "Hello world");
        assert_eq!(loaded.received_at, received);
        assert_eq!(loaded.category, None);
    }

    #[tokio::test]
    async fn get_email_not_found() {
        let db = test_db().await;
        let result = db.get_email("nonexistent").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn set_category_roundtrip() {
        let db = test_db().await;
        let id = db
            .insert_email("a@x.com", "Offer", "Buy now", at(9))
            .await
            .unwrap();

        db.set_category(&id, Category::Spam).await.unwrap();

        let loaded = db.get_email(&id).await.unwrap().unwrap();
        assert_eq!(loaded.category, Some(Category::Spam));
    }

    #[tokio::test]
    async fn list_emails_newest_first_with_filter_and_limit() {
        let db = test_db().await;
        let older = db
            .insert_email("a@x.com", "Old", "Body", at(8))
            .await
            .unwrap();
        let newer = db
            .insert_email("b@x.com", "New", "Body", at(10))
            .await
            .unwrap();
        let spam = db
            .insert_email("c@x.com", "Offer", "Body", at(9))
            .await
            .unwrap();
        db.set_category(&spam, Category::Spam).await.unwrap();

        let all = db.list_emails(None, None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id, newer);
        assert_eq!(all[2].id, older);

        let only_spam = db.list_emails(Some(Category::Spam), None).await.unwrap();
        assert_eq!(only_spam.len(), 1);
        assert_eq!(only_spam[0].id, spam);

        let capped = db.list_emails(None, Some(2)).await.unwrap();
        assert_eq!(capped.len(), 2);
    }

    // ── Processing state tests ──────────────────────────────────────

    #[tokio::test]
    async fn unprocessed_excludes_marked_and_orders_oldest_first() {
        let db = test_db().await;
        let older = db
            .insert_email("a@x.com", "Old", "Body", at(8))
            .await
            .unwrap();
        let newer = db
            .insert_email("b@x.com", "New", "Body", at(10))
            .await
            .unwrap();

        let pending = db
            .unprocessed_emails(OperationType::Categorization, None)
            .await
            .unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, older);
        assert_eq!(pending[1].id, newer);

        db.mark_processed(&older, OperationType::Categorization)
            .await
            .unwrap();

        let pending = db
            .unprocessed_emails(OperationType::Categorization, None)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, newer);
    }

    #[tokio::test]
    async fn processed_flags_are_per_operation() {
        let db = test_db().await;
        let id = db
            .insert_email("a@x.com", "Hi", "Body", at(9))
            .await
            .unwrap();

        db.mark_processed(&id, OperationType::Categorization)
            .await
            .unwrap();

        assert!(
            db.is_processed(&id, OperationType::Categorization)
                .await
                .unwrap()
        );
        assert!(
            !db.is_processed(&id, OperationType::ActionExtraction)
                .await
                .unwrap()
        );
        assert!(!db.is_processed(&id, OperationType::AutoReply).await.unwrap());
    }

    #[tokio::test]
    async fn mark_processed_is_idempotent() {
        let db = test_db().await;
        let id = db
            .insert_email("a@x.com", "Hi", "Body", at(9))
            .await
            .unwrap();

        db.mark_processed(&id, OperationType::Categorization)
            .await
            .unwrap();
        db.mark_processed(&id, OperationType::Categorization)
            .await
            .unwrap();

        assert!(
            db.is_processed(&id, OperationType::Categorization)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn reset_processed_by_email_operation_and_all() {
        let db = test_db().await;
        let first = db
            .insert_email("a@x.com", "One", "Body", at(8))
            .await
            .unwrap();
        let second = db
            .insert_email("b@x.com", "Two", "Body", at(9))
            .await
            .unwrap();

        for op in [OperationType::Categorization, OperationType::ActionExtraction] {
            db.mark_processed(&first, op).await.unwrap();
            db.mark_processed(&second, op).await.unwrap();
        }

        let cleared = db
            .reset_processed(Some(&first), Some(OperationType::Categorization))
            .await
            .unwrap();
        assert_eq!(cleared, 1);
        assert!(
            !db.is_processed(&first, OperationType::Categorization)
                .await
                .unwrap()
        );
        assert!(
            db.is_processed(&first, OperationType::ActionExtraction)
                .await
                .unwrap()
        );

        let cleared = db
            .reset_processed(None, Some(OperationType::ActionExtraction))
            .await
            .unwrap();
        assert_eq!(cleared, 2);

        let cleared = db.reset_processed(None, None).await.unwrap();
        assert_eq!(cleared, 1);
        assert!(
            !db.is_processed(&second, OperationType::Categorization)
                .await
                .unwrap()
        );
    }

    // ── Prompt tests ────────────────────────────────────────────────

    #[tokio::test]
    async fn prompt_lifecycle() {
        let db = test_db().await;
        let first = db
            .save_prompt("v1", OperationType::Categorization, "Categorize.")
            .await
            .unwrap();
        let second = db
            .save_prompt("v2", OperationType::Categorization, "Categorize better.")
            .await
            .unwrap();
        db.save_prompt("other", OperationType::AutoReply, "Reply.")
            .await
            .unwrap();

        let active = db
            .active_prompts(OperationType::Categorization)
            .await
            .unwrap();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].id, first);
        assert_eq!(active[0].name, "v1");
        assert_eq!(active[0].operation, OperationType::Categorization);
        assert!(active[0].active);

        assert!(db.deactivate_prompt(&first).await.unwrap());
        let active = db
            .active_prompts(OperationType::Categorization)
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second);

        assert!(!db.deactivate_prompt("nonexistent").await.unwrap());
    }

    // ── Action item tests ───────────────────────────────────────────

    #[tokio::test]
    async fn action_items_roundtrip_and_complete() {
        let db = test_db().await;
        let email_id = db
            .insert_email("a@x.com", "Review", "Please review", at(9))
            .await
            .unwrap();

        let item = ActionItem {
            task: "Review the parser".into(),
            deadline: Some("Friday".into()),
            priority: Priority::High,
        };
        let item_id = db.save_action_item(&email_id, &item).await.unwrap();
        db.save_action_item(
            &email_id,
            &ActionItem {
                task: "Send notes".into(),
                deadline: None,
                priority: Priority::Medium,
            },
        )
        .await
        .unwrap();

        let items = db.action_items_for_email(&email_id).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].task, "Review the parser");
        assert_eq!(items[0].deadline.as_deref(), Some("Friday"));
        assert_eq!(items[0].priority, Priority::High);
        assert!(!items[0].completed);
        assert_eq!(items[1].deadline, None);

        assert_eq!(db.open_action_items().await.unwrap().len(), 2);
        assert!(db.complete_action_item(&item_id).await.unwrap());
        let open = db.open_action_items().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].task, "Send notes");

        assert!(!db.complete_action_item("nonexistent").await.unwrap());
    }

    // ── Draft tests ─────────────────────────────────────────────────

    #[tokio::test]
    async fn drafts_roundtrip() {
        let db = test_db().await;
        let email_id = db
            .insert_email("a@x.com", "Budget", "Thoughts?", at(9))
            .await
            .unwrap();

        db.save_draft(Some(&email_id), "Re: Budget", "Looks fine.", None)
            .await
            .unwrap();
        db.save_draft(None, "Standalone", "No source email.", Some("manual"))
            .await
            .unwrap();

        let drafts = db.list_drafts().await.unwrap();
        assert_eq!(drafts.len(), 2);
        // Newest first.
        assert_eq!(drafts[0].subject, "Standalone");
        assert_eq!(drafts[0].email_id, None);
        assert_eq!(drafts[0].note.as_deref(), Some("manual"));
        assert_eq!(drafts[1].email_id.as_deref(), Some(email_id.as_str()));
        assert_eq!(drafts[1].note, None);
    }

    #[tokio::test]
    async fn get_and_update_draft() {
        let db = test_db().await;
        let id = db
            .save_draft(None, "Intro", "First version.", Some("manual"))
            .await
            .unwrap();

        let draft = db.get_draft(&id).await.unwrap().unwrap();
        assert_eq!(draft.subject, "Intro");
        assert_eq!(draft.body, "First version.");

        assert!(
            db.update_draft(&id, "Intro v2", "Second version.")
                .await
                .unwrap()
        );
        let updated = db.get_draft(&id).await.unwrap().unwrap();
        assert_eq!(updated.subject, "Intro v2");
        assert_eq!(updated.body, "Second version.");
        // Untouched columns survive the rewrite.
        assert_eq!(updated.note.as_deref(), Some("manual"));
        assert_eq!(updated.created_at, draft.created_at);

        assert!(db.get_draft("nonexistent").await.unwrap().is_none());
        assert!(!db.update_draft("nonexistent", "X", "Y").await.unwrap());
    }

    // ── Log tests ───────────────────────────────────────────────────

    #[tokio::test]
    async fn log_is_append_only_and_newest_first() {
        let db = test_db().await;
        let email_id = db
            .insert_email("a@x.com", "Hi", "Body", at(9))
            .await
            .unwrap();

        db.append_log(
            Some(&email_id),
            OperationType::Categorization,
            LogStatus::Success,
            None,
        )
        .await
        .unwrap();
        db.append_log(
            Some(&email_id),
            OperationType::ActionExtraction,
            LogStatus::Failed,
            Some("timeout: request timed out"),
        )
        .await
        .unwrap();
        db.append_log(None, OperationType::AutoReply, LogStatus::Pending, None)
            .await
            .unwrap();

        let entries = db.recent_log(2).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].operation, OperationType::AutoReply);
        assert_eq!(entries[0].status, LogStatus::Pending);
        assert_eq!(entries[0].email_id, None);
        assert_eq!(entries[1].status, LogStatus::Failed);
        assert_eq!(
            entries[1].detail.as_deref(),
            Some("timeout: request timed out")
        );

        let all = db.recent_log(10).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].status, LogStatus::Success);
        assert_eq!(all[2].email_id.as_deref(), Some(email_id.as_str()));
    }

    #[tokio::test]
    async fn status_roundtrip() {
        for status in [LogStatus::Success, LogStatus::Failed, LogStatus::Pending] {
            let s = status_to_str(status);
            assert_eq!(str_to_status(s), status);
        }
    }

    // ── Stats tests ─────────────────────────────────────────────────

    #[tokio::test]
    async fn stats_counts_everything() {
        let db = test_db().await;
        let first = db
            .insert_email("a@x.com", "One", "Body", at(8))
            .await
            .unwrap();
        let second = db
            .insert_email("b@x.com", "Two", "Body", at(9))
            .await
            .unwrap();
        db.insert_email("c@x.com", "Three", "Body", at(10))
            .await
            .unwrap();
        db.set_category(&first, Category::Spam).await.unwrap();
        db.set_category(&second, Category::Spam).await.unwrap();

        let item_id = db
            .save_action_item(
                &first,
                &ActionItem {
                    task: "Task".into(),
                    deadline: None,
                    priority: Priority::Low,
                },
            )
            .await
            .unwrap();
        db.save_action_item(
            &first,
            &ActionItem {
                task: "Other".into(),
                deadline: None,
                priority: Priority::Medium,
            },
        )
        .await
        .unwrap();
        db.complete_action_item(&item_id).await.unwrap();

        db.save_draft(None, "Re: One", "Body", None).await.unwrap();

        let stats = db.stats().await.unwrap();
        assert_eq!(stats.total_emails, 3);
        assert_eq!(stats.category_counts.get("Spam"), Some(&2));
        assert_eq!(stats.category_counts.get("Uncategorized"), Some(&1));
        assert_eq!(stats.open_action_items, 1);
        assert_eq!(stats.total_drafts, 1);
    }

    // ── File-backed tests ───────────────────────────────────────────

    #[tokio::test]
    async fn new_local_persists_across_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("assist.db");

        let id = {
            let db = LibSqlStore::new_local(&path).await.unwrap();
            db.insert_email("a@x.com", "Persisted", "Body", at(9))
                .await
                .unwrap()
        };

        let db = LibSqlStore::new_local(&path).await.unwrap();
        let loaded = db.get_email(&id).await.unwrap().unwrap();
        assert_eq!(loaded.subject, "Persisted");
    }
}
