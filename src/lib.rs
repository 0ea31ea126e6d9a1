//! Mail Assist — email triage over a generative completion backend.

pub mod completion;
pub mod config;
pub mod error;
pub mod inbox;
pub mod parse;
pub mod pipeline;
pub mod prompts;
pub mod store;
