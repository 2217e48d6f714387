//! Parsing of structuring-agent replies.
//!
//! Models wrap JSON in markdown fences, prefix it with chatter, or answer
//! `null` for pages without an invoice. This module turns such a reply into
//! `Some(Invoice)`, `None` (no invoice on the page), or a serde error that the
//! agent feeds back into its validation retry.

use crate::invoice::{Invoice, NO_INVOICE};
use once_cell::sync::Lazy;
use regex::Regex;

static RE_JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)```").unwrap());

/// Parse a structuring reply.
///
/// * `null`, `{}`, empty text and `NO_INVOICE` mean "no invoice".
/// * Otherwise the first `{` … last `}` span is deserialised as an
///   [`Invoice`].
pub fn parse_invoice_reply(reply: &str) -> Result<Option<Invoice>, serde_json::Error> {
    let body = strip_fences(reply);
    let body = body.trim();

    if body.is_empty()
        || body.eq_ignore_ascii_case("null")
        || body.trim_matches('"').eq_ignore_ascii_case(NO_INVOICE)
    {
        return Ok(None);
    }

    let json = match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if end > start => &body[start..=end],
        _ => body,
    };

    let value: serde_json::Value = serde_json::from_str(json)?;
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Object(ref map) if map.is_empty() => Ok(None),
        other => serde_json::from_value(other).map(Some),
    }
}

fn strip_fences(reply: &str) -> &str {
    RE_JSON_FENCE
        .captures(reply)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(reply)
}
