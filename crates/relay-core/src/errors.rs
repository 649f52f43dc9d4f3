//! Decode error types.

use thiserror::Error;

/// Errors produced by the envelope codec.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// `specversion` is not one of the supported versions.
    #[error("unsupported spec version: {0:?}")]
    InvalidSpecVersion(String),
    /// `datacontenttype` is not one of the supported content types.
    #[error("unsupported content type: {0:?}")]
    InvalidContentType(String),
    /// `source` is not a syntactically valid URI.
    #[error("invalid source URI {source_uri:?}: {reason}")]
    InvalidSource {
        /// The offending value.
        source_uri: String,
        /// Why it failed to parse.
        reason: String,
    },
    /// The outer JSON is malformed or missing a required attribute.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[from] serde_json::Error),
}

/// A message that could not be turned into a routed message.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The bus envelope failed to decode.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    /// The body (client wire shape) failed to parse.
    #[error("malformed message: {0}")]
    Message(#[source] serde_json::Error),
}

impl DecodeError {
    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Envelope(EnvelopeError::InvalidSpecVersion(_)) => "invalid_spec_version",
            Self::Envelope(EnvelopeError::InvalidContentType(_)) => "invalid_content_type",
            Self::Envelope(EnvelopeError::InvalidSource { .. }) => "invalid_source",
            Self::Envelope(EnvelopeError::MalformedEnvelope(_)) => "malformed_envelope",
            Self::Message(_) => "malformed_message",
        }
    }
}
