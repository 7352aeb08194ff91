//! Decoding of recent-change events
//!
//! Only `meta.domain` is interpreted. Everything else in the payload is kept
//! opaque and the raw text is what travels on the bus.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct EventMeta {
    pub domain: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub dt: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WikiEvent {
    pub meta: EventMeta,
}

#[derive(Debug)]
pub enum DecodeError {
    Json(serde_json::Error),
    EmptyDomain,
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::Json(err)
    }
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Json(e) => write!(f, "Malformed event: {}", e),
            DecodeError::EmptyDomain => write!(f, "Malformed event: empty meta.domain"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl WikiEvent {
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        let event: WikiEvent = serde_json::from_str(raw)?;
        if event.meta.domain.trim().is_empty() {
            return Err(DecodeError::EmptyDomain);
        }
        Ok(event)
    }

    pub fn domain(&self) -> &str {
        &self.meta.domain
    }
}

/// Shorten a payload for log lines.
pub fn preview(raw: &str) -> &str {
    match raw.char_indices().nth(120) {
        Some((idx, _)) => &raw[..idx],
        None => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_extracts_domain() {
        let raw = r#"{"$schema":"/mediawiki/recentchange/1.0.0","meta":{"uri":"https://en.wikipedia.org/wiki/Rust","domain":"en.wikipedia.org","dt":"2024-01-01T00:00:00Z"},"type":"edit","title":"Rust"}"#;
        let event = WikiEvent::decode(raw).unwrap();

        assert_eq!(event.domain(), "en.wikipedia.org");
        assert_eq!(event.meta.dt.as_deref(), Some("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(matches!(WikiEvent::decode("not json"), Err(DecodeError::Json(_))));
        assert!(matches!(WikiEvent::decode(r#"{"type":"edit"}"#), Err(DecodeError::Json(_))));
        assert!(matches!(
            WikiEvent::decode(r#"{"meta":{"domain":42}}"#),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            WikiEvent::decode(r#"{"meta":{"domain":"  "}}"#),
            Err(DecodeError::EmptyDomain)
        ));
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let long = "é".repeat(300);
        assert_eq!(preview(&long).chars().count(), 120);
        assert_eq!(preview("short"), "short");
    }
}
