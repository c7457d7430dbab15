use serde::{Deserialize, Serialize};

pub const MIN_QUESTION_CHARS: usize = 15;
pub const MAX_QUESTION_CHARS: usize = 220;
pub const MIN_DURATION_SECS: i64 = 60 * 60;
pub const MAX_DURATION_SECS: i64 = 60 * 60 * 24 * 30;

const SPAM_RUN: usize = 5;
const DISALLOWED_TERMS: [&str; 5] = ["pump", "moon", "100x", "guaranteed", "insider"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreatorType {
    Human,
    Agent,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreationRequest {
    pub user: String,
    pub question: String,
    pub duration_seconds: i64,
    pub creator_type: CreatorType,
}

/// Case- and whitespace-insensitive key for duplicate detection.
pub fn normalize_question(input: &str) -> String {
    input
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn starts_with_will(question: &str) -> bool {
    let mut chars = question.chars();
    let head: String = chars.by_ref().take(4).collect();
    head.eq_ignore_ascii_case("will") && chars.next().map_or(false, char::is_whitespace)
}

fn has_repeated_run(question: &str, run: usize) -> bool {
    let mut prev = None;
    let mut len = 0;
    for c in question.chars() {
        if Some(c) == prev {
            len += 1;
        } else {
            prev = Some(c);
            len = 1;
        }
        if len >= run {
            return true;
        }
    }
    false
}

/// Stateless question and duration checks; returns every failing reason.
pub fn content_reasons(question: &str, duration_seconds: i64) -> Vec<String> {
    let mut reasons = Vec::new();
    let question = question.trim();
    let lower = question.to_lowercase();
    let len = question.chars().count();

    if len < MIN_QUESTION_CHARS {
        reasons.push(format!("Question is too short (min {MIN_QUESTION_CHARS} chars)."));
    }
    if len > MAX_QUESTION_CHARS {
        reasons.push(format!("Question is too long (max {MAX_QUESTION_CHARS} chars)."));
    }
    if !question.ends_with('?') {
        reasons.push("Question should end with a '?'.".to_string());
    }
    if !starts_with_will(question) {
        reasons.push("Question should start with 'Will ...' for binary market clarity.".to_string());
    }
    if lower.contains("http://") || lower.contains("https://") {
        reasons.push("Question cannot include URLs.".to_string());
    }
    if has_repeated_run(question, SPAM_RUN) {
        reasons.push("Question appears spammy.".to_string());
    }
    if DISALLOWED_TERMS.iter().any(|t| lower.contains(t)) {
        reasons.push("Question contains disallowed hype/manipulation terms.".to_string());
    }

    if duration_seconds < MIN_DURATION_SECS {
        reasons.push("Duration must be at least 1 hour.".to_string());
    }
    if duration_seconds > MAX_DURATION_SECS {
        reasons.push("Duration must be 30 days or less for MVP.".to_string());
    }
    reasons
}
