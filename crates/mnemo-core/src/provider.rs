//! Upstream provider kinds.
//!
//! The proxy speaks to a small, fixed set of providers. The proxy tags each
//! event with one, or the canonicalizer infers it from the request path.
//! The provider fixes the request body shape. Response payloads are
//! classified payload by payload.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Provider kind an intercepted request was routed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    /// `OpenAI`-compatible `/v1/chat/completions`.
    #[serde(rename = "openai_chat")]
    OpenAiChat,
    /// `OpenAI` `/v1/responses` (structured input/output items).
    #[serde(rename = "openai_responses")]
    OpenAiResponses,
    /// Anthropic `/v1/messages`.
    #[serde(rename = "anthropic")]
    Anthropic,
}

/// Header names that carry credentials or session secrets for any provider.
///
/// Names are lowercase; comparisons against them must be case-insensitive.
pub const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "x-api-key",
    "api-key",
    "openai-organization",
    "cookie",
    "set-cookie",
];

/// Shape of a provider's request body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestShape {
    /// Flat `messages` array.
    MessageArray,
    /// Typed `input` item array.
    StructuredInput,
}

impl Provider {
    /// All provider kinds, in a stable order.
    pub const ALL: [Self; 3] = [Self::OpenAiChat, Self::OpenAiResponses, Self::Anthropic];

    /// Infer the provider from a request path.
    ///
    /// Matching is suffix-based so that proxy prefixes (`/openai/v1/...`)
    /// do not matter.
    pub fn from_path(path: &str) -> Option<Self> {
        let path = path.split('?').next().unwrap_or(path).trim_end_matches('/');
        if path.ends_with("/chat/completions") {
            Some(Self::OpenAiChat)
        } else if path.ends_with("/responses") {
            Some(Self::OpenAiResponses)
        } else if path.ends_with("/messages") {
            Some(Self::Anthropic)
        } else {
            None
        }
    }

    /// Body shape this provider's requests use.
    pub fn request_shape(self) -> RequestShape {
        match self {
            Self::OpenAiChat | Self::Anthropic => RequestShape::MessageArray,
            Self::OpenAiResponses => RequestShape::StructuredInput,
        }
    }

    /// Stable string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAiChat => "openai_chat",
            Self::OpenAiResponses => "openai_responses",
            Self::Anthropic => "anthropic",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown provider: {s}"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_provider_from_path() {
        assert_eq!(
            Provider::from_path("/v1/chat/completions"),
            Some(Provider::OpenAiChat)
        );
        assert_eq!(
            Provider::from_path("/openai/v1/responses?stream=true"),
            Some(Provider::OpenAiResponses)
        );
        assert_eq!(Provider::from_path("/v1/messages/"), Some(Provider::Anthropic));
        assert_eq!(Provider::from_path("/v1/models"), None);
    }

    #[test]
    fn request_shapes() {
        assert_eq!(
            Provider::OpenAiResponses.request_shape(),
            RequestShape::StructuredInput
        );
        assert_eq!(Provider::Anthropic.request_shape(), RequestShape::MessageArray);
    }

    #[test]
    fn string_roundtrip() {
        for p in Provider::ALL {
            assert_eq!(p.as_str().parse::<Provider>().unwrap(), p);
        }
        assert!("gemini".parse::<Provider>().is_err());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&Provider::OpenAiResponses).unwrap();
        assert_eq!(json, "\"openai_responses\"");
    }
}
