//! Prompt templates: per-operation defaults with first-run seeding, plus
//! builders for the draft-composition prompts.
//!
//! Each batch operation needs exactly one active prompt before the pipeline
//! can run it. `seed_default_prompts` fills the gaps without touching
//! operations that already have an active prompt, so user-edited prompts
//! survive restarts. The compose operations build their prompts per call
//! and never touch the prompt table.

use tracing::info;

use crate::error::StoreError;
use crate::pipeline::types::OperationType;
use crate::store::Store;

const DEFAULT_CATEGORIZATION_PROMPT: &str = "\
Categorize this email into one of these categories: Important, Newsletter, Spam, To-Do, Project Update, Meeting Request, or General.

Guidelines:
- Important: urgent issues, production incidents, executive requests
- Newsletter: bulk mailings, digests, marketing
- Spam: scams, phishing, unsolicited offers
- To-Do: requests for review, approval, or feedback
- Project Update: status reports and progress summaries
- Meeting Request: invitations and scheduling
- General: everything else

Respond with ONLY the category name, nothing else.";

const DEFAULT_ACTION_EXTRACTION_PROMPT: &str = "\
Extract action items and tasks from this email. Return them as a JSON object in exactly this format:
{\"tasks\": [{\"task\": \"description\", \"deadline\": \"date or timeframe\", \"priority\": \"high/medium/low\"}]}
If no tasks are found, return: {\"tasks\": []}
Do not wrap the JSON in markdown formatting.";

const DEFAULT_AUTO_REPLY_PROMPT: &str = "\
Draft a professional reply to this email. Keep it concise and courteous, and address the sender's points directly. Include a subject line starting with \"Re: \".

Format your response as:
Subject: [subject line]
---
[email body]";

/// Default prompt (name, content) for one operation. `None` for the compose
/// operations, which have no prompt table entry.
pub fn default_prompt(operation: OperationType) -> Option<(&'static str, &'static str)> {
    match operation {
        OperationType::Categorization => {
            Some(("Default Categorization", DEFAULT_CATEGORIZATION_PROMPT))
        }
        OperationType::ActionExtraction => {
            Some(("Default Action Extraction", DEFAULT_ACTION_EXTRACTION_PROMPT))
        }
        OperationType::AutoReply => Some(("Default Auto Reply", DEFAULT_AUTO_REPLY_PROMPT)),
        OperationType::NewEmail | OperationType::DraftRefinement => None,
    }
}

/// Seed a default prompt for every operation that has no active prompt.
pub async fn seed_default_prompts(store: &dyn Store) -> Result<(), StoreError> {
    for operation in OperationType::ALL {
        let Some((name, content)) = default_prompt(operation) else {
            continue;
        };
        if store.active_prompts(operation).await?.is_empty() {
            store.save_prompt(name, operation, content).await?;
            info!(operation = %operation, name, "Seeded default prompt");
        }
    }
    Ok(())
}

/// Prompt for composing a new email from scratch.
pub fn new_email_prompt(recipient: &str, purpose: &str, key_points: Option<&str>) -> String {
    let points = match key_points {
        Some(points) => format!("Key Points to Include: {points}\n"),
        None => String::new(),
    };
    format!(
        "\
Generate a professional email with the following requirements:

Recipient: {recipient}
Purpose: {purpose}
{points}
Guidelines:
- Create an appropriate subject line
- Write a professional, concise email body (2-3 paragraphs)
- Match the tone to the purpose
- Be clear and direct

Format your response as:
Subject: [subject line]
---
[email body]"
    )
}

/// Prompt for refining an existing draft.
pub fn refinement_prompt(subject: &str, body: &str, instructions: &str) -> String {
    format!(
        "\
Refine this email draft based on the following instructions:

Original Draft:
Subject: {subject}
Body: {body}

Refinement Instructions: {instructions}

Provide the refined email in the same format:
Subject: [subject line]
---
[email body]"
    )
}
