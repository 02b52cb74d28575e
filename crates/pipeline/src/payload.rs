//! Structured payload extraction from free-text generation responses.
//!
//! Models frequently wrap JSON in a markdown fence, sometimes labelled
//! (` ```json `), sometimes not, and sometimes send the bare object. The
//! functions here locate the payload without guessing beyond those three
//! shapes:
//!
//! 1. A fence labelled `json` (any case): the text between the label line and
//!    the next closing fence.
//! 2. An unlabelled fence: the text between the opening fence (plus any label
//!    on the same line) and the next closing fence.
//! 3. No fence: the whole trimmed response.
//!
//! A fence that is never closed runs to the end of the response.

use serde::de::DeserializeOwned;

use crate::errors::PayloadError;

const FENCE: &str = "```";
const JSON_LABEL: &str = "json";

/// Returns the slice of `response` that holds the structured payload.
pub fn locate_payload(response: &str) -> &str {
    if let Some(body_start) = labelled_fence_body(response) {
        return fenced_slice(response, body_start);
    }
    if let Some(open) = response.find(FENCE) {
        let after_fence = open + FENCE.len();
        // Skip a label such as `yaml` or `javascript` on the fence line.
        let body_start = match response[after_fence..].find('\n') {
            Some(newline)
                if response[after_fence..after_fence + newline]
                    .trim()
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric()) =>
            {
                after_fence + newline + 1
            }
            _ => after_fence,
        };
        return fenced_slice(response, body_start);
    }
    response.trim()
}

/// Locates the payload and deserializes it into `T`.
///
/// # Errors
///
/// - [`PayloadError::Empty`] when the located payload is blank.
/// - [`PayloadError::Parse`] when it is not valid JSON for `T`.
pub fn parse_payload<T: DeserializeOwned>(response: &str) -> Result<T, PayloadError> {
    let payload = locate_payload(response);
    if payload.is_empty() {
        return Err(PayloadError::Empty);
    }
    Ok(serde_json::from_str(payload)?)
}

/// Finds the first ```` ```json ```` fence and returns the byte offset where
/// its body begins.
fn labelled_fence_body(response: &str) -> Option<usize> {
    let mut search_from = 0;
    while let Some(rel) = response[search_from..].find(FENCE) {
        let after_fence = search_from + rel + FENCE.len();
        let rest = &response[after_fence..];
        let label_matches = rest
            .get(..JSON_LABEL.len())
            .is_some_and(|label| label.eq_ignore_ascii_case(JSON_LABEL));
        let label_ends = rest
            .get(JSON_LABEL.len()..)
            .and_then(|tail| tail.chars().next())
            .map_or(true, |c| !c.is_ascii_alphanumeric());
        if label_matches && label_ends {
            return Some(after_fence + JSON_LABEL.len());
        }
        search_from = after_fence;
    }
    None
}

/// Returns the trimmed text from `body_start` up to the next closing fence.
fn fenced_slice(response: &str, body_start: usize) -> &str {
    let body = &response[body_start..];
    match body.find(FENCE) {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}
