use std::sync::Arc;

use tracing::{info, warn};

use common::{LanguageModel, ReviewOutcome};

use crate::prompts::{review_messages, MAX_TOKENS, REVIEW_TEMPERATURE};

/// Longest reason carried into a failure message.
const MAX_REASON_CHARS: usize = 200;

/// Parse a `VERDICT: / REASON: / SUGGESTION:` reply.
///
/// A pass needs at least one PASS verdict and no FAIL verdict. A reply without
/// any verdict line fails.
pub fn parse_review(response: &str) -> ReviewOutcome {
    let mut pass = false;
    let mut fail = false;
    let mut reason = Vec::new();
    let mut suggestion = Vec::new();
    let mut section = Section::None;

    for line in response.lines() {
        let trimmed = line.trim().trim_start_matches(['*', '#', ' ']);
        let upper = trimmed.to_ascii_uppercase();
        if let Some(rest) = strip_label(trimmed, &upper, "VERDICT") {
            let verdict = rest.to_ascii_uppercase();
            pass |= verdict.contains("PASS");
            fail |= verdict.contains("FAIL");
            section = Section::None;
        } else if let Some(rest) = strip_label(trimmed, &upper, "REASON") {
            reason.push(rest.to_string());
            section = Section::Reason;
        } else if let Some(rest) = strip_label(trimmed, &upper, "SUGGESTION") {
            suggestion.push(rest.to_string());
            section = Section::Suggestion;
        } else {
            match section {
                Section::Reason => reason.push(trimmed.to_string()),
                Section::Suggestion => suggestion.push(trimmed.to_string()),
                Section::None => {}
            }
        }
    }

    let join = |lines: Vec<String>| lines.join("\n").trim().to_string();
    let reason = join(reason);
    let suggestion = join(suggestion);
    ReviewOutcome {
        passed: pass && !fail,
        reason: if reason.is_empty() && !(pass || fail) {
            "review reply had no verdict".to_string()
        } else {
            reason
        },
        suggestion: (!suggestion.is_empty()).then_some(suggestion),
    }
}

enum Section {
    None,
    Reason,
    Suggestion,
}

fn strip_label<'a>(line: &'a str, upper: &str, label: &str) -> Option<&'a str> {
    if !upper.starts_with(label) {
        return None;
    }
    let rest = line[label.len()..].trim_start();
    rest.strip_prefix(':')
        .map(|r| r.trim_start_matches(['*', ' ']).trim())
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Stage 1: ask the model whether the program does what the description says.
#[derive(Clone)]
pub struct SelfReviewer {
    llm: Arc<dyn LanguageModel>,
}

impl SelfReviewer {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    /// Backend errors count as a failed review; the suggestion is never applied.
    pub async fn review(&self, description: &str, program: &str) -> ReviewOutcome {
        let messages = review_messages(description, program);
        let mut outcome = match self.llm.chat(&messages, REVIEW_TEMPERATURE, MAX_TOKENS).await {
            Ok(reply) => parse_review(&reply),
            Err(e) => {
                warn!(error = %e, "Review request failed");
                ReviewOutcome {
                    passed: false,
                    reason: format!("review request failed: {e}"),
                    suggestion: None,
                }
            }
        };
        outcome.reason = truncate(&outcome.reason, MAX_REASON_CHARS);
        info!(passed = outcome.passed, reason = %outcome.reason, "Stage 1 result");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedModel;

    #[test]
    fn parses_pass() {
        let out = parse_review("VERDICT: PASS\nREASON: matches the description\nSUGGESTION: none needed");
        assert!(out.passed);
        assert_eq!(out.reason, "matches the description");
        assert_eq!(out.suggestion.as_deref(), Some("none needed"));
    }

    #[test]
    fn parses_fail_with_multiline_reason() {
        let out = parse_review(
            "**VERDICT:** FAIL\n**REASON:** buys on RSI > 70\nwhich inverts the rule\nSUGGESTION: use < 30",
        );
        assert!(!out.passed);
        assert_eq!(out.reason, "buys on RSI > 70\nwhich inverts the rule");
        assert_eq!(out.suggestion.as_deref(), Some("use < 30"));
    }

    #[test]
    fn conflicting_or_missing_verdict_fails() {
        assert!(!parse_review("VERDICT: PASS\nVERDICT: FAIL\nREASON: x").passed);
        let out = parse_review("Looks good to me!");
        assert!(!out.passed);
        assert_eq!(out.reason, "review reply had no verdict");
    }

    #[test]
    fn truncates_on_char_boundary() {
        assert_eq!(truncate("αβγδ", 2), "αβ...");
        assert_eq!(truncate("ok", 5), "ok");
    }

    #[tokio::test]
    async fn backend_error_is_a_failed_review() {
        let reviewer = SelfReviewer::new(Arc::new(ScriptedModel::new(Vec::<String>::new())));
        let out = reviewer.review("d", "p").await;
        assert!(!out.passed);
        assert!(out.reason.starts_with("review request failed"), "{}", out.reason);
    }
}
