//! Standardized error handling for the SAML service provider.
//!
//! Every pipeline stage and external-facing operation returns `SpError`.
//! The `Display` impl is truncated at the first `:` before it reaches an
//! HTTP response body, so internal detail (file paths, raw XML snippets,
//! library error chains) never leaks to a relying party; the untruncated
//! message still goes to `tracing`.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Error kinds for the SAML 2.0 service provider core.
///
/// Variant names mirror the pipeline stage or component that raises them
/// rather than a generic "bad request" catch-all, so callers (and log
/// lines) can tell exactly which invariant failed.
#[derive(Debug, Error)]
pub enum SpError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("destination mismatch: {0}")]
    DestinationMismatch(String),

    #[error("issuer mismatch: {0}")]
    IssuerMismatch(String),

    #[error("status failure: {0}")]
    StatusFailure(String),

    #[error("signature missing: {0}")]
    SignatureMissing(String),

    #[error("signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("signature wrapping detected: {0}")]
    SignatureWrapping(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("expired: {0}")]
    Expired(String),

    #[error("not yet valid: {0}")]
    NotYetValid(String),

    #[error("recipient mismatch: {0}")]
    RecipientMismatch(String),

    #[error("audience mismatch: {0}")]
    AudienceMismatch(String),

    #[error("correlation failure: {0}")]
    Correlation(String),

    #[error("replay detected: {0}")]
    Replay(String),

    #[error("key material error: {0}")]
    KeyMaterial(String),

    #[error("idp metadata error: {0}")]
    IdpMetadata(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SpError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            // The SP's own key material is the operator's responsibility,
            // not the relying party's — every other pipeline rejection is
            // a client (relying-party-facing) fault.
            Self::KeyMaterial(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MalformedRequest(_) => "MALFORMED_REQUEST",
            Self::MalformedResponse(_) => "MALFORMED_RESPONSE",
            Self::DestinationMismatch(_) => "DESTINATION_MISMATCH",
            Self::IssuerMismatch(_) => "ISSUER_MISMATCH",
            Self::StatusFailure(_) => "STATUS_FAILURE",
            Self::SignatureMissing(_) => "SIGNATURE_MISSING",
            Self::SignatureInvalid(_) => "SIGNATURE_INVALID",
            Self::SignatureWrapping(_) => "SIGNATURE_WRAPPING",
            Self::Decryption(_) => "DECRYPTION_FAILED",
            Self::Expired(_) => "EXPIRED",
            Self::NotYetValid(_) => "NOT_YET_VALID",
            Self::RecipientMismatch(_) => "RECIPIENT_MISMATCH",
            Self::AudienceMismatch(_) => "AUDIENCE_MISMATCH",
            Self::Correlation(_) => "CORRELATION_FAILURE",
            Self::Replay(_) => "REPLAY_DETECTED",
            Self::KeyMaterial(_) => "KEY_MATERIAL_ERROR",
            Self::IdpMetadata(_) => "IDP_METADATA_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// The message truncated at the first `:`, safe to send to a relying
    /// party. Logging still sees the full `Display` output via `tracing`.
    fn public_message(&self) -> String {
        let full = self.to_string();
        match full.split_once(':') {
            Some((head, _)) => head.to_string(),
            None => full,
        }
    }
}

impl IntoResponse for SpError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match status {
            StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!(error = %self, code = self.error_code(), "saml sp error");
            }
            _ => {
                tracing::warn!(error = %self, code = self.error_code(), "saml sp rejected response");
            }
        }

        (status, [(header::CONTENT_TYPE, "text/plain; charset=utf8")], self.public_message()).into_response()
    }
}

pub type SpResult<T> = Result<T, SpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_message_truncates_at_first_colon() {
        let err = SpError::DestinationMismatch("expected https://sp.example/acs, got https://evil.example".into());
        assert_eq!(err.public_message(), "destination mismatch");
    }

    #[test]
    fn status_codes_split_client_vs_server_fault() {
        assert_eq!(SpError::Expired("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(SpError::Decryption("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(SpError::IdpMetadata("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(SpError::Configuration("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(SpError::KeyMaterial("x".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(SpError::Internal("x".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
