//! Tool response shape
//!
//! Every dispatcher returns `{content: [{type: "text", text}], isError?}`.
//! The text payload is either a JSON document or a plain message.

use serde::Serialize;

/// One content block of a tool response.
#[derive(Debug, Clone, Serialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

/// The wire response of both dispatchers.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResponse {
    pub content: Vec<ContentBlock>,
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ToolResponse {
    fn text(text: String, is_error: Option<bool>) -> Self {
        Self {
            content: vec![ContentBlock {
                kind: "text".to_string(),
                text,
            }],
            is_error,
        }
    }

    /// Success carrying a JSON payload.
    pub fn ok_json(value: &impl Serialize) -> Self {
        let text = serde_json::to_string(value)
            .unwrap_or_else(|e| format!("{{\"serialization_error\":\"{}\"}}", e));
        Self::text(text, None)
    }

    /// Success carrying a plain message.
    pub fn ok_message(message: impl Into<String>) -> Self {
        Self::text(message.into(), None)
    }

    /// Error with a human-readable message.
    pub fn error(message: impl Into<String>) -> Self {
        Self::text(message.into(), Some(true))
    }

    /// Whether this is an error response.
    pub fn is_error(&self) -> bool {
        self.is_error == Some(true)
    }

    /// The first content block's text.
    pub fn text_payload(&self) -> &str {
        self.content.first().map(|c| c.text.as_str()).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shapes() {
        let ok = ToolResponse::ok_json(&serde_json::json!({"a": 1}));
        assert!(!ok.is_error());
        let wire = serde_json::to_value(&ok).unwrap();
        assert_eq!(wire["content"][0]["type"], "text");
        assert!(wire.get("isError").is_none());

        let err = ToolResponse::error("nope");
        assert!(err.is_error());
        let wire = serde_json::to_value(&err).unwrap();
        assert_eq!(wire["isError"], true);
        assert_eq!(wire["content"][0]["text"], "nope");
    }
}
