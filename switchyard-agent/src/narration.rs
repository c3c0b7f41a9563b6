// ABOUTME: Heuristic classifier separating model self-narration from user-directed text.
// ABOUTME: Pluggable behind a trait so the heuristic can be swapped or tested independently of the loop.

use regex::Regex;

/// Decides whether accompanying free text on a tool-calling turn is internal
/// narration (suppressed) or a genuine intermediate message for the user.
pub trait NarrationClassifier: Send + Sync {
    fn is_narration(&self, text: &str) -> bool;
}

/// Default regex-based heuristic.
///
/// Classified as narration: text ending in a colon or ellipsis, text shorter
/// than ten characters, or text opening with an "I will / let me <verb>"
/// style announcement.
pub struct RegexNarrationClassifier {
    intent: Regex,
}

impl RegexNarrationClassifier {
    pub fn new() -> Self {
        Self {
            intent: Regex::new(
                r"(?i)^(i['’]ll|i will|let me|i['’]m going to|i am going to|one (moment|sec|second))\b",
            )
            .unwrap_or_else(|e| panic!("invalid narration regex: {e}")),
        }
    }
}

impl Default for RegexNarrationClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl NarrationClassifier for RegexNarrationClassifier {
    fn is_narration(&self, text: &str) -> bool {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return true;
        }
        if trimmed.ends_with(':') || trimmed.ends_with('…') || trimmed.ends_with("...") {
            return true;
        }
        if trimmed.chars().count() < 10 {
            return true;
        }
        self.intent.is_match(trimmed)
    }
}
