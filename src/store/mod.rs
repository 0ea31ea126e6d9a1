//! Persistence layer. libSQL-backed storage for emails, prompts, action
//! items, drafts, and the processing log.

pub mod libsql_backend;
mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use traits::{
    Draft, EmailRecord, InboxStats, LogEntry, LogStatus, PromptSpec, Store, StoredActionItem,
};
