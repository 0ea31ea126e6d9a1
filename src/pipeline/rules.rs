//! Rule-based categorization for fast pattern matching.
//!
//! Runs before the completion-backed categorization step to short-circuit
//! obvious cases: phishing and discount blasts, newsletter senders, status
//! reports, deadline requests, meeting invitations.
//!
//! A rule hit assigns the category directly and skips the completion call
//! for that email. Emails with no rule hit are left untouched for the
//! completion path.

use regex::Regex;
use tracing::debug;

use crate::parse::{ActionItem, Category, Priority};
use crate::store::EmailRecord;

/// Which field a rule matches against.
#[derive(Debug, Clone, Copy)]
pub enum RuleField {
    Sender,
    Subject,
    Body,
}

/// A single categorization rule with a compiled regex.
#[derive(Debug, Clone)]
pub struct CategoryRule {
    /// Human-readable pattern description.
    pub pattern: String,
    /// Compiled regex for matching.
    pub regex: Regex,
    /// Which email field to match.
    pub field: RuleField,
    /// Category assigned on a hit.
    pub category: Category,
}

/// Rule engine assigning categories without a completion call.
pub struct RuleCategorizer {
    /// Rules in precedence order; the first hit wins.
    rules: Vec<CategoryRule>,
    /// Deadline extraction patterns for To-Do emails, tried in order.
    deadline_patterns: Vec<Regex>,
    /// Subject markers that raise a To-Do's priority.
    priority_pattern: Regex,
}

impl RuleCategorizer {
    /// Create a categorizer with the default rule set.
    pub fn default_rules() -> Self {
        let rules = vec![
            // Phishing and discount blasts. Checked first so an "urgent
            // verify your account" subject never lands in Important.
            rule(
                "spam subject markers",
                r"(?i)(urgent verify|verify your account|suspicious|90% off|flash sale)",
                RuleField::Subject,
                Category::Spam,
            ),
            rule(
                "bulk sender",
                r"(?i)(newsletter|noreply|digest)",
                RuleField::Sender,
                Category::Newsletter,
            ),
            rule(
                "newsletter subject markers",
                r"(?i)(weekly digest|weekly updates|top stories|top 10|newsletter)",
                RuleField::Subject,
                Category::Newsletter,
            ),
            rule(
                "status report subject",
                r"(?i)(status update|project status)",
                RuleField::Subject,
                Category::ProjectUpdate,
            ),
            rule(
                "urgency subject markers",
                r"(?i)(urgent:|critical|emergency|server downtime|bug in production)",
                RuleField::Subject,
                Category::Important,
            ),
            rule(
                "request subject markers",
                r"(?i)(action required|approval required|code review request|review required)",
                RuleField::Subject,
                Category::ToDo,
            ),
            rule(
                "deadline body markers",
                r"(?i)(deadline|review by|by end of|by friday|by monday|approve by|provide feedback by)",
                RuleField::Body,
                Category::ToDo,
            ),
            rule(
                "meeting subject markers",
                r"(?i)(meeting|standup|conference|sprint planning)",
                RuleField::Subject,
                Category::MeetingRequest,
            ),
            rule(
                "scheduling body markers",
                r"(?i)(join us|meeting is scheduled|meeting room|meeting link)",
                RuleField::Body,
                Category::MeetingRequest,
            ),
        ];

        let deadline_patterns = vec![
            Regex::new(r"(?i)by\s+(?:end\s+of\s+)?(\w+\s+\d{1,2})").unwrap(),
            Regex::new(r"(?i)deadline[:\s]+(\w+\s+\d{1,2})").unwrap(),
            Regex::new(r"(?i)by\s+(friday|monday|tuesday|wednesday|thursday|saturday|sunday|tomorrow)").unwrap(),
        ];

        Self {
            rules,
            deadline_patterns,
            priority_pattern: Regex::new(r"(?i)(urgent|critical|immediate)").unwrap(),
        }
    }

    /// Create a categorizer with no rules, so every email falls through to
    /// the completion path.
    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            deadline_patterns: Vec::new(),
            priority_pattern: Regex::new(r"(?i)(urgent|critical|immediate)").unwrap(),
        }
    }

    /// Add a custom rule. Appended after existing rules, so it has the
    /// lowest precedence.
    pub fn add_rule(
        &mut self,
        pattern: &str,
        field: RuleField,
        category: Category,
    ) -> Result<(), regex::Error> {
        self.rules.push(CategoryRule {
            pattern: pattern.into(),
            regex: Regex::new(pattern)?,
            field,
            category,
        });
        Ok(())
    }

    /// Evaluate an email against all rules.
    ///
    /// Returns `Some(category)` on the first hit, `None` when no rule
    /// matches and the email should go to the completion path.
    pub fn evaluate(&self, email: &EmailRecord) -> Option<Category> {
        for rule in &self.rules {
            let field_value = match rule.field {
                RuleField::Sender => &email.sender,
                RuleField::Subject => &email.subject,
                RuleField::Body => &email.body,
            };

            if rule.regex.is_match(field_value) {
                debug!(
                    id = %email.id,
                    rule = %rule.pattern,
                    category = %rule.category,
                    "Email matched categorization rule"
                );
                return Some(rule.category);
            }
        }

        None
    }

    /// Build the action item for an email categorized as To-Do.
    ///
    /// Deadline comes from the first matching pattern in the body; priority
    /// from urgency markers in the subject; the task text from the kind of
    /// request the body makes.
    pub fn todo_action(&self, email: &EmailRecord) -> ActionItem {
        let deadline = self
            .deadline_patterns
            .iter()
            .find_map(|pattern| pattern.captures(&email.body))
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str().to_string());

        let priority = if self.priority_pattern.is_match(&email.subject) {
            Priority::High
        } else {
            Priority::Medium
        };

        let body_lower = email.body.to_lowercase();
        let task = if body_lower.contains("review") {
            format!("Review: {}", email.subject)
        } else if body_lower.contains("approve") {
            format!("Approve: {}", email.subject)
        } else if body_lower.contains("feedback") {
            format!("Provide feedback: {}", email.subject)
        } else {
            email.subject.clone()
        };

        ActionItem {
            task,
            deadline,
            priority,
        }
    }
}

fn rule(pattern: &str, regex: &str, field: RuleField, category: Category) -> CategoryRule {
    CategoryRule {
        pattern: pattern.into(),
        // Default patterns are static and known-valid.
        regex: Regex::new(regex).unwrap(),
        field,
        category,
    }
}
