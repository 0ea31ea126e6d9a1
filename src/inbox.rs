//! Mock inbox loading.
//!
//! Seeds the store from a JSON inbox document for demo and first-run use.
//! The load is skipped entirely when the store already holds emails, so
//! reruns against the same database never duplicate them.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::error::StoreError;
use crate::store::Store;

#[derive(Deserialize)]
struct MockInbox {
    emails: Vec<MockEmail>,
}

#[derive(Deserialize)]
struct MockEmail {
    sender: String,
    subject: String,
    body: String,
    #[serde(default)]
    timestamp: Option<String>,
}

/// Load mock inbox JSON into an empty store. Returns the number of emails
/// inserted; zero when the store already holds any.
pub async fn load_mock_inbox(store: &dyn Store, json: &str) -> Result<usize, StoreError> {
    let stats = store.stats().await?;
    if stats.total_emails > 0 {
        debug!("Store already has emails, skipping mock inbox");
        return Ok(0);
    }

    let inbox: MockInbox = serde_json::from_str(json)
        .map_err(|e| StoreError::Serialization(format!("mock inbox: {e}")))?;

    let mut loaded = 0;
    for email in inbox.emails {
        let received_at = email
            .timestamp
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        store
            .insert_email(&email.sender, &email.subject, &email.body, received_at)
            .await?;
        loaded += 1;
    }
    Ok(loaded)
}
