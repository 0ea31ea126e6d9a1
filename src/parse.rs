//! Parsing of completion output into structured results.
//!
//! Generated text is untrusted input. Every parser here is total: malformed
//! or surprising output maps to a documented fallback, never a panic.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Fixed category label set. Anything a completion produces outside this set
/// collapses to [`Category::Uncategorized`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Important,
    Newsletter,
    Spam,
    ToDo,
    ProjectUpdate,
    MeetingRequest,
    General,
    Uncategorized,
}

impl Category {
    /// The assignable labels, in prompt order. Excludes `Uncategorized`,
    /// which is a fallback rather than a label the model may pick.
    pub const ALL: [Category; 7] = [
        Category::Important,
        Category::Newsletter,
        Category::Spam,
        Category::ToDo,
        Category::ProjectUpdate,
        Category::MeetingRequest,
        Category::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Important => "Important",
            Category::Newsletter => "Newsletter",
            Category::Spam => "Spam",
            Category::ToDo => "To-Do",
            Category::ProjectUpdate => "Project Update",
            Category::MeetingRequest => "Meeting Request",
            Category::General => "General",
            Category::Uncategorized => "Uncategorized",
        }
    }

    /// Exact label lookup, case-insensitive. `Uncategorized` is included so
    /// stored values round-trip.
    pub fn from_label(label: &str) -> Option<Category> {
        let lowered = label.trim().to_lowercase();
        if lowered == "uncategorized" {
            return Some(Category::Uncategorized);
        }
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().to_lowercase() == lowered)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority of an extracted action item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    /// Tolerant lookup. Unknown values map to `Medium`.
    pub fn from_label(label: &str) -> Priority {
        match label.trim().to_lowercase().as_str() {
            "high" => Priority::High,
            "low" => Priority::Low,
            _ => Priority::Medium,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An actionable task extracted from an email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionItem {
    pub task: String,
    pub deadline: Option<String>,
    #[serde(default)]
    pub priority: Priority,
}

/// Generated draft text split into subject and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftContent {
    pub subject: String,
    pub body: String,
}

/// Substring patterns mapped to categories, checked in order. Order encodes
/// precedence ("project update" must win over a bare "update", "meeting
/// request" over "meeting").
const CATEGORY_PATTERNS: &[(&str, Category)] = &[
    ("important", Category::Important),
    ("newsletter", Category::Newsletter),
    ("spam", Category::Spam),
    ("to-do", Category::ToDo),
    ("todo", Category::ToDo),
    ("to do", Category::ToDo),
    ("project update", Category::ProjectUpdate),
    ("meeting request", Category::MeetingRequest),
    ("meeting", Category::MeetingRequest),
    ("general", Category::General),
];

/// Parse a categorization completion into a category label.
///
/// Tolerates code fences, a `Category:` prefix, quoting, trailing punctuation,
/// and surrounding prose. Output that names no known label maps to
/// [`Category::Uncategorized`].
pub fn parse_category(text: &str) -> Category {
    // Exact match on any cleaned line wins over fuzzy matching.
    for line in content_lines(text) {
        if let Some(category) = Category::ALL
            .into_iter()
            .find(|c| clean_label(line).eq_ignore_ascii_case(c.as_str()))
        {
            return category;
        }
    }

    // Fall back to substring matching on the first content line only, so
    // prose further down cannot hijack the label.
    if let Some(first) = content_lines(text).next() {
        let lowered = clean_label(first).to_lowercase();
        for (pattern, category) in CATEGORY_PATTERNS {
            if lowered.contains(pattern) {
                return *category;
            }
        }
    }

    Category::Uncategorized
}

/// Lines of `text` that carry content: fence markers and blanks are skipped.
fn content_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("```"))
}

/// Strip a `Category:` prefix, quotes, and trailing sentence punctuation.
fn clean_label(line: &str) -> &str {
    let mut label = line.trim();
    for prefix in ["Category:", "category:", "CATEGORY:"] {
        if let Some(rest) = label.strip_prefix(prefix) {
            label = rest.trim();
            break;
        }
    }
    // Keep only the first sentence.
    if let Some(first) = label.split('.').next() {
        label = first;
    }
    label.trim_matches(|c| c == '"' || c == '\'' || c == '*' || c == '`').trim()
}

/// Parse an action-extraction completion into a list of tasks.
///
/// Expects a JSON object with a `tasks` array, possibly wrapped in fences or
/// prose. Invalid payloads and invalid entries produce an empty list or are
/// skipped; order of valid entries is preserved.
pub fn parse_tasks(text: &str) -> Vec<ActionItem> {
    let payload = extract_json_object(text);
    let Ok(value) = serde_json::from_str::<serde_json::Value>(&payload) else {
        return Vec::new();
    };
    let Some(tasks) = value.get("tasks").and_then(|t| t.as_array()) else {
        return Vec::new();
    };
    tasks.iter().filter_map(task_from_value).collect()
}

fn task_from_value(value: &serde_json::Value) -> Option<ActionItem> {
    let task = value.get("task")?.as_str()?.trim();
    if task.is_empty() {
        return None;
    }
    let deadline = value
        .get("deadline")
        .and_then(|d| d.as_str())
        .map(str::trim)
        .filter(|d| !d.is_empty() && !d.eq_ignore_ascii_case("none"))
        .map(String::from);
    let priority = value
        .get("priority")
        .and_then(|p| p.as_str())
        .map(Priority::from_label)
        .unwrap_or_default();
    Some(ActionItem {
        task: task.to_string(),
        deadline,
        priority,
    })
}

/// Parse a reply-draft completion into subject and body.
///
/// Recognizes the `Subject: ... --- body` convention. Anything else becomes
/// the body of a draft titled `Re: <original subject>`.
pub fn parse_reply(text: &str, original_subject: &str) -> DraftContent {
    split_subject_body(text).unwrap_or_else(|| DraftContent {
        subject: format!("Re: {original_subject}"),
        body: text.trim().to_string(),
    })
}

/// Parse a new-email completion into subject and body.
///
/// Same `Subject: ... --- body` convention as [`parse_reply`]. Without a
/// usable subject line, the stated purpose (capped at 50 characters) becomes
/// the subject and the whole text the body.
pub fn parse_new_email(text: &str, purpose: &str) -> DraftContent {
    split_subject_body(text).unwrap_or_else(|| DraftContent {
        subject: purpose.trim().chars().take(50).collect(),
        body: text.trim().to_string(),
    })
}

/// Parse a draft-refinement completion into subject and body.
///
/// Returns `None` when the text carries no usable subject line, in which
/// case the caller keeps the draft it already has.
pub fn parse_refinement(text: &str) -> Option<DraftContent> {
    split_subject_body(text)
}

/// Split `Subject: ... --- body` text. `None` when there is no `Subject:`
/// marker or the subject is empty.
fn split_subject_body(text: &str) -> Option<DraftContent> {
    let (_, rest) = text.trim().split_once("Subject:")?;
    let (subject, body) = match rest.split_once("---") {
        Some((subject_part, body_part)) => (subject_part.trim(), body_part.trim()),
        None => {
            // No separator: first line is the subject, the rest the body.
            let mut lines = rest.trim().splitn(2, '\n');
            let subject = lines.next().unwrap_or("").trim();
            let body = lines.next().unwrap_or("").trim();
            (subject, body)
        }
    };
    if subject.is_empty() {
        return None;
    }
    Some(DraftContent {
        subject: subject.to_string(),
        body: body.to_string(),
    })
}

/// Extract a JSON object from completion text that may wrap it in markdown
/// fences or explanatory prose.
pub fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    // Case 1: raw JSON.
    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    // Case 2: fenced code block.
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```")
            && after[..end].trim().starts_with('{')
        {
            return after[..end].trim().to_string();
        }
    }

    // Case 3: prose around a bare object.
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}
