//! Top-level error type of the request layer.

use thiserror::Error;

use crate::envelope::ErrorEnvelope;
use crate::session::SessionError;
use crate::store::StoreError;
use crate::token::TokenError;

/// Every way a logical call can fail.
#[derive(Debug, Error)]
pub enum RequestError {
    /// Network, timeout or connection failure. Never recovered.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider answered with a structured error.
    #[error("{code}: {message}")]
    Api { code: String, message: String },

    /// Non-2xx response without a structured error body.
    #[error("bad status code {status}")]
    BadStatus { status: u16, body: String },

    /// Obtaining or renewing credentials failed.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Device session signing or creation failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Persisting credentials failed.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// A response body did not have the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// A response was well-formed JSON but missed a required field.
    #[error("unexpected response: {message}")]
    UnexpectedResponse { message: String },

    /// The inner status of a batch reply was not a success; carries the raw reply.
    #[error("batch request failed: {body}")]
    BatchFailed { body: String },

    /// A listing did not terminate within the configured number of pages.
    #[error("listing did not finish within {pages} pages")]
    PaginationLimit { pages: usize },

    /// The caller cancelled the operation.
    #[error("request cancelled")]
    Cancelled,

    /// The v2 signing collaborator failed or is not configured.
    #[error("signing hook error: {message}")]
    Hook { message: String },

    /// A header name or value could not be encoded.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// An external collaborator (directory listing, deletion) failed.
    #[error("{message}")]
    Collaborator { message: String },
}

impl RequestError {
    /// The provider's error envelope, if this error carries one.
    pub fn envelope(&self) -> Option<ErrorEnvelope> {
        match self {
            Self::Api { code, message } => Some(ErrorEnvelope {
                code: code.clone(),
                message: message.clone(),
            }),
            _ => None,
        }
    }
}

impl From<ErrorEnvelope> for RequestError {
    fn from(envelope: ErrorEnvelope) -> Self {
        Self::Api {
            code: envelope.code,
            message: envelope.message,
        }
    }
}
