//! Canned and reshaped response text.

use crate::recovery::error::ErrorKind;
use crate::text;

/// Words that ask for longer or more expensive output.
const COMPLEXITY_TERMS: &[&str] = &[
    "detailed",
    "comprehensive",
    "thorough",
    "thoroughly",
    "in-depth",
    "elaborate",
    "extensive",
    "exhaustive",
    "step-by-step",
    "advanced",
    "complex",
];

/// Remove complexity-signaling words from a query.
///
/// Returns the query unchanged if nothing else would be left.
pub fn simplify_query(query: &str) -> String {
    let kept: Vec<&str> = query
        .split_whitespace()
        .filter(|word| {
            let bare = word
                .trim_matches(|c: char| !c.is_alphanumeric() && c != '-')
                .to_lowercase();
            !COMPLEXITY_TERMS.contains(&bare.as_str())
        })
        .collect();

    if kept.is_empty() {
        query.trim().to_string()
    } else {
        kept.join(" ")
    }
}

pub fn interruption_notice(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::ConnectionFailure => {
            "[Connection was interrupted. The above should address your main question.]"
        }
        ErrorKind::ModelTimeout => {
            "[Response generation timed out. The above covers the key points requested.]"
        }
        ErrorKind::MemoryExhaustion | ErrorKind::ResourceConstraint => {
            "[Response was shortened due to memory constraints. The core information is above.]"
        }
        ErrorKind::ModelUnavailable | ErrorKind::ReasoningFailure => {
            "[A model failure interrupted the response. The available information is above.]"
        }
        _ => "[Response was interrupted. The information above should still help.]",
    }
}

pub fn emergency_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::ConnectionFailure | ErrorKind::StreamingInterruption => {
            "Sorry, the connection was interrupted. Please try your request again."
        }
        ErrorKind::ModelTimeout => {
            "Your request timed out. Please try breaking it into smaller parts or try again later."
        }
        ErrorKind::MemoryExhaustion | ErrorKind::ResourceConstraint => {
            "The system is short on resources. Please try a simpler request or try again in a moment."
        }
        ErrorKind::ModelUnavailable | ErrorKind::ReasoningFailure => {
            "The model encountered an error. Please try your request again or rephrase it."
        }
        _ => "Sorry, an error occurred. Please try your request again.",
    }
}

/// Interrupted output with unfinished trailing text removed and a notice appended.
pub fn deliver_partial(partial: &str, kind: ErrorKind) -> Option<String> {
    let cleaned = text::complete_sentences(partial);
    if cleaned.is_empty() {
        return None;
    }
    Some(format!("{cleaned}\n\n{}", interruption_notice(kind)))
}

/// Emergency text, prefixed by whatever usable output exists.
pub fn emergency_response(kind: ErrorKind, partial: Option<&str>) -> String {
    let message = emergency_message(kind);
    match partial.map(text::complete_sentences) {
        Some(cleaned) if !cleaned.is_empty() => format!("{cleaned}\n\n{message}"),
        _ => message.to_string(),
    }
}

/// Keep a share of `body` that shrinks as the degradation level rises.
///
/// Level 1 keeps 80%, each further level 20 points less, never below 20%.
pub fn degrade(body: &str, level: u8) -> String {
    let ratio = (1.0 - 0.2 * f64::from(level)).max(0.2);
    text::truncate_ratio(body, ratio)
}
