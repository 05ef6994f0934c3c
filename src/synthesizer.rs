//! Response synthesizer
//!
//! Rule-based post-processing that keeps an answer short: no enumerations,
//! a bounded number of sentences and figures, and at least one action.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref ENUMERATION: Regex =
        Regex::new(r"^\s*(?:\d{1,3}[\).:\-]\s|[a-zA-Z]\)\s|[\-•*+]\s|[\-•]{2,})").unwrap();
    static ref NUMERIC_TOKEN: Regex =
        Regex::new(r"(?:\d+[\.,]?\d*\s*%|\$?\d{2,}(?:[\.,]\d{3})*(?:[\.,]\d+)?)").unwrap();
    static ref ACTION: Regex =
        Regex::new(r"(?i)recom|acci[oó]n|suger|action|suggest").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

pub const DEFAULT_FALLBACK_RECOMMENDATION: &str = "Recommended action: prioritize the banks with the largest outflows and confirm the liquidity needed for the coming period.";

#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    pub max_sentences: usize,
    pub max_numbers: usize,
    /// Also post-process deterministic single-dispatch reports.
    pub apply_to_single_dispatch: bool,
    /// Appended when no sentence carries an action keyword. Must be number-free.
    pub fallback_recommendation: String,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_sentences: 6,
            max_numbers: 4,
            apply_to_single_dispatch: false,
            fallback_recommendation: DEFAULT_FALLBACK_RECOMMENDATION.to_string(),
        }
    }
}

/// Condense a draft answer. Blank drafts stay blank.
pub fn synthesize(draft: &str, config: &SynthesisConfig) -> String {
    if draft.trim().is_empty() {
        return String::new();
    }

    let mut kept: Vec<String> = Vec::new();
    let mut numbers_used = 0usize;

    'lines: for line in draft.lines() {
        if ENUMERATION.is_match(line) {
            continue;
        }
        for sentence in split_sentences(line) {
            if kept.len() >= config.max_sentences {
                break 'lines;
            }
            if ENUMERATION.is_match(sentence) {
                continue;
            }

            let budget = config.max_numbers.saturating_sub(numbers_used);
            let trimmed = cap_numbers(sentence, budget);
            if !trimmed.chars().any(char::is_alphanumeric) {
                continue;
            }
            numbers_used += NUMERIC_TOKEN.find_iter(&trimmed).count();
            kept.push(trimmed);
        }
    }

    if config.max_sentences > 0 && !kept.iter().any(|s| ACTION.is_match(s)) {
        if kept.len() >= config.max_sentences {
            kept.pop();
        }
        kept.push(config.fallback_recommendation.clone());
    }

    let joined = kept.join(" ");
    // joining can fuse a trailing digit with a `%` that opened the next line
    if count_numbers(&joined) > config.max_numbers {
        cap_numbers(&joined, config.max_numbers)
    } else {
        joined
    }
}

/// Split after `.`, `!` or `?` followed by whitespace.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        if let Some(&(next_idx, next)) = chars.peek() {
            if next.is_whitespace() {
                let sentence = text[start..i + c.len_utf8()].trim();
                if !sentence.is_empty() {
                    out.push(sentence);
                }
                start = next_idx;
            }
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

/// Remove trailing numeric tokens until at most `budget` remain.
fn cap_numbers(sentence: &str, budget: usize) -> String {
    let mut current = sentence.to_string();
    loop {
        let matches: Vec<(usize, usize)> = NUMERIC_TOKEN
            .find_iter(&current)
            .map(|m| (m.start(), m.end()))
            .collect();
        if matches.len() <= budget {
            break;
        }

        let mut stripped = String::with_capacity(current.len());
        let mut cursor = 0;
        for (start, end) in &matches[budget..] {
            stripped.push_str(&current[cursor..*start]);
            stripped.push(' ');
            cursor = *end;
        }
        stripped.push_str(&current[cursor..]);
        current = stripped;
    }
    WHITESPACE.replace_all(current.trim(), " ").into_owned()
}

/// Numeric/percentage tokens as counted by the synthesizer.
pub fn count_numbers(text: &str) -> usize {
    NUMERIC_TOKEN.find_iter(text).count()
}
