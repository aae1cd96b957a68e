//! Wire types for the stdio protocol.
//!
//! Each stdin line is one JSON request object; each stderr line is one JSON
//! status object. Stdout carries raw generated text only (see `stream`), so
//! everything structured lives here.
//!
//! Protocol:
//! - Requests (client → backend): {"type": "...", ...}
//! - Stderr messages (backend → client): {"type": "...", ..., "timestamp": ms}

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

// ============================================================================
// Requests (client → backend)
// ============================================================================

/// One request per stdin line. Unknown keys are ignored; an unknown `type`
/// or a missing required field fails the decode, and the dispatch loop
/// reports it on stderr instead of guessing at defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Run one chat turn against the current session.
    Chat {
        #[serde(default)]
        id: String,
        prompt: String,
        /// Generation cap, transported as a string. Non-numeric content is
        /// treated as absent (engine default applies).
        #[serde(default)]
        max_new_tokens: Option<String>,
    },

    /// Replace the session system prompt.
    SystemPrompt {
        #[serde(default)]
        id: String,
        #[serde(default)]
        content: String,
    },

    /// Query processing state and engine counters.
    Status {
        #[serde(default)]
        id: String,
    },

    /// Clear chat history (system prompt survives) and reset the engine.
    Reset {
        #[serde(default)]
        id: String,
    },

    /// Stop the dispatch loop.
    Exit,
}

/// Parse the `max_new_tokens` request parameter: optional sign plus digits.
/// Anything else (empty, junk, trailing garbage, overflow) means "absent".
pub fn parse_max_new_tokens(raw: &str) -> Option<i64> {
    raw.parse().ok()
}

// ============================================================================
// Stderr messages (backend → client)
// ============================================================================

/// One structured message per stderr line. Empty optional fields are omitted
/// from the JSON entirely; `timestamp` (epoch milliseconds) is always present
/// and serialized last.
#[derive(Debug, Clone, Serialize)]
pub struct StderrMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub timestamp: u64,
}

impl StderrMessage {
    fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            status: String::new(),
            message: String::new(),
            response: String::new(),
            data: None,
            timestamp: epoch_millis(),
        }
    }

    /// `status` message with an explicit status value (ready/success/info).
    pub fn status(status: &str, message: &str) -> Self {
        let mut msg = Self::new("status");
        msg.status = status.to_string();
        msg.message = message.to_string();
        msg
    }

    /// `error`/`error` message.
    pub fn error(message: &str) -> Self {
        let mut msg = Self::new("error");
        msg.status = "error".to_string();
        msg.message = message.to_string();
        msg
    }

    /// `message`/`success` acknowledgement.
    pub fn success(message: &str) -> Self {
        let mut msg = Self::new("message");
        msg.status = "success".to_string();
        msg.message = message.to_string();
        msg
    }

    /// `response`/`success` message carrying the full generated text.
    pub fn response(message: &str, response: &str) -> Self {
        let mut msg = Self::new("response");
        msg.status = "success".to_string();
        msg.message = message.to_string();
        msg.response = response.to_string();
        msg
    }

    /// Attach a raw JSON payload under `data`.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // Request decoding
    // -------------------------------------------------------------------------

    #[test]
    fn decode_chat_request() {
        let req: Request =
            serde_json::from_str(r#"{"type":"chat","id":"42","prompt":"hi","max_new_tokens":"64"}"#)
                .expect("valid chat request");
        match req {
            Request::Chat {
                id,
                prompt,
                max_new_tokens,
            } => {
                assert_eq!(id, "42");
                assert_eq!(prompt, "hi");
                assert_eq!(max_new_tokens.as_deref(), Some("64"));
            }
            other => panic!("expected chat, got {other:?}"),
        }
    }

    #[test]
    fn decode_chat_request_minimal() {
        let req: Request =
            serde_json::from_str(r#"{"type":"chat","prompt":"hi"}"#).expect("valid chat request");
        match req {
            Request::Chat {
                id,
                prompt,
                max_new_tokens,
            } => {
                assert_eq!(id, "");
                assert_eq!(prompt, "hi");
                assert_eq!(max_new_tokens, None);
            }
            other => panic!("expected chat, got {other:?}"),
        }
    }

    #[test]
    fn decode_ignores_unknown_keys() {
        let req: Request =
            serde_json::from_str(r#"{"type":"status","id":"1","extra":{"nested":true}}"#)
                .expect("unknown keys are ignored");
        assert!(matches!(req, Request::Status { .. }));
    }

    #[test]
    fn decode_chat_without_prompt_fails() {
        let err = serde_json::from_str::<Request>(r#"{"type":"chat","id":"1"}"#)
            .expect_err("prompt is required");
        assert!(err.to_string().contains("prompt"));
    }

    #[test]
    fn decode_unknown_type_names_the_method() {
        let err = serde_json::from_str::<Request>(r#"{"type":"frobnicate"}"#)
            .expect_err("unknown method must not decode");
        assert!(err.to_string().contains("frobnicate"));
    }

    #[test]
    fn decode_bare_exit() {
        let req: Request = serde_json::from_str(r#"{"type":"exit"}"#).expect("valid exit request");
        assert!(matches!(req, Request::Exit));
    }

    #[test]
    fn decode_system_prompt_defaults_to_empty_content() {
        let req: Request =
            serde_json::from_str(r#"{"type":"system_prompt"}"#).expect("valid request shape");
        match req {
            Request::SystemPrompt { content, .. } => assert_eq!(content, ""),
            other => panic!("expected system_prompt, got {other:?}"),
        }
    }

    // -------------------------------------------------------------------------
    // max_new_tokens parsing
    // -------------------------------------------------------------------------

    #[test]
    fn max_new_tokens_accepts_signed_digits() {
        assert_eq!(parse_max_new_tokens("128"), Some(128));
        assert_eq!(parse_max_new_tokens("+7"), Some(7));
        assert_eq!(parse_max_new_tokens("-1"), Some(-1));
    }

    #[test]
    fn max_new_tokens_rejects_everything_else() {
        assert_eq!(parse_max_new_tokens(""), None);
        assert_eq!(parse_max_new_tokens("+"), None);
        assert_eq!(parse_max_new_tokens("12x"), None);
        assert_eq!(parse_max_new_tokens(" 12"), None);
        assert_eq!(parse_max_new_tokens("1.5"), None);
    }

    // -------------------------------------------------------------------------
    // Stderr message encoding
    // -------------------------------------------------------------------------

    #[test]
    fn stderr_message_omits_empty_fields() {
        let json = serde_json::to_string(&StderrMessage::status("ready", "up")).expect("serialize");
        assert!(json.contains(r#""type":"status""#));
        assert!(json.contains(r#""status":"ready""#));
        assert!(json.contains(r#""message":"up""#));
        assert!(!json.contains("response"));
        assert!(!json.contains("data"));
    }

    #[test]
    fn stderr_message_timestamp_is_last() {
        let json = serde_json::to_string(&StderrMessage::error("boom")).expect("serialize");
        let tail = json.rfind(",\"timestamp\":").expect("timestamp present");
        assert!(json[tail..].ends_with('}'));
        assert!(!json[tail + 1..].contains(',')); // nothing after it
    }

    #[test]
    fn stderr_message_carries_raw_data() {
        let msg = StderrMessage::status("info", "counters")
            .with_data(serde_json::json!({"prompt_len": 3}));
        let json = serde_json::to_string(&msg).expect("serialize");
        assert!(json.contains(r#""data":{"prompt_len":3}"#));
    }

    #[test]
    fn stderr_escaping_round_trips_control_characters() {
        let original = "quote:\" backslash:\\ newline:\n tab:\t bell:\u{7}";
        let json = serde_json::to_string(&StderrMessage::error(original)).expect("serialize");
        let parsed: serde_json::Value = serde_json::from_str(&json).expect("valid JSON");
        assert_eq!(parsed["message"], original);
    }

    #[test]
    fn stderr_escaping_keeps_multibyte_text_intact() {
        let original = "系统提示词内容为空";
        let json = serde_json::to_string(&StderrMessage::error(original)).expect("serialize");
        let parsed: serde_json::Value = serde_json::from_str(&json).expect("valid JSON");
        assert_eq!(parsed["message"], original);
    }
}
