//! Service provider configuration.
//!
//! Follows the same `from_env` + `unwrap_or_else` pattern as the rest of
//! this codebase's config loading, plus a programmatic builder for tests
//! and embedders that don't want env-based configuration.

use std::collections::HashSet;
use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SpError, SpResult};
use crate::saml::crypto::{CryptoErrorKind, EngineError};
use crate::saml::schema::NameIdFormat;

/// The two outcomes a crypto-engine error can be classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoErrorClass {
    /// Abort acceptance — this is a genuine security failure.
    SecurityFailure,
    /// Treat the engine call as if it had succeeded (e.g. schema noise
    /// from a canonicalization quirk the adapter can't fully resolve).
    IgnoreAndAccept,
}

/// Security knobs that gate which pipeline stages are enforced.
///
/// Defaults are the strict end of the spectrum; relaxing any of these is
/// an explicit, auditable configuration choice, not a silent fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityOpts {
    /// Reject `Response`/`Assertion` elements that are not signed.
    pub require_signed_assertions: bool,
    /// Reject plaintext `Assertion` elements when an `EncryptedAssertion`
    /// was expected.
    pub require_encrypted_assertions: bool,
    /// Clock-skew allowance applied to `NotBefore`/`NotOnOrAfter` checks.
    pub allowed_clock_skew: Duration,
    /// Crypto-engine error kinds classified as advisory rather than a
    /// genuine security failure. Empty by default — every engine error
    /// aborts acceptance unless explicitly allowlisted here. This is a
    /// trusted, security-critical policy surface: enumerate exactly
    /// which kinds belong here, never wildcard it.
    pub ignored_crypto_errors: HashSet<CryptoErrorKind>,
}

impl Default for SecurityOpts {
    fn default() -> Self {
        Self {
            require_signed_assertions: true,
            require_encrypted_assertions: false,
            allowed_clock_skew: Duration::from_secs(60),
            ignored_crypto_errors: HashSet::new(),
        }
    }
}

impl SecurityOpts {
    /// Classifies an `EngineError` per the ignore-and-accept allowlist
    /// above.
    pub fn classify(&self, error: &EngineError) -> CryptoErrorClass {
        if self.ignored_crypto_errors.contains(&error.kind()) {
            CryptoErrorClass::IgnoreAndAccept
        } else {
            CryptoErrorClass::SecurityFailure
        }
    }
}

/// Where the SP's own signing/decryption key material comes from.
///
/// Modeled as a sum type (one source, never a partially-filled struct)
/// per the "exactly one of" fields called out across the data model.
#[derive(Debug, Clone)]
pub enum SpKeySource {
    /// PEM-encoded certificate and private key, already in memory.
    Inline { cert_pem: String, key_pem: String },
    /// Paths to PEM files on disk, read once and cached.
    Files { cert_path: String, key_path: String },
}

#[derive(Debug, Clone)]
pub struct ServiceProviderConfig {
    pub entity_id: String,
    pub acs_url: String,
    pub slo_url: Option<String>,
    pub metadata_url: Option<String>,
    pub key_source: SpKeySource,
    pub name_id_format: NameIdFormat,
    pub security: SecurityOpts,
    pub metadata_fetch_timeout: Duration,
    /// Enables the in-memory replay cache (see `saml::request_cache`).
    pub replay_cache_enabled: bool,
    pub replay_cache_ttl: Duration,
}

impl ServiceProviderConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let entity_id = env::var("SAML_SP_ENTITY_ID")
            .unwrap_or_else(|_| "https://sp.example.com/saml/metadata".to_string());
        let acs_url = env::var("SAML_SP_ACS_URL")
            .unwrap_or_else(|_| "https://sp.example.com/saml/acs".to_string());
        let slo_url = env::var("SAML_SP_SLO_URL").ok();
        let metadata_url = env::var("SAML_SP_METADATA_URL").ok();

        let key_source = match (env::var("SAML_SP_CERT_PATH"), env::var("SAML_SP_KEY_PATH")) {
            (Ok(cert_path), Ok(key_path)) => SpKeySource::Files { cert_path, key_path },
            _ => SpKeySource::Inline {
                cert_pem: env::var("SAML_SP_CERT_PEM").unwrap_or_default(),
                key_pem: env::var("SAML_SP_KEY_PEM").unwrap_or_default(),
            },
        };

        let require_signed_assertions = env::var("SAML_REQUIRE_SIGNED_ASSERTIONS")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .unwrap_or(true);
        let require_encrypted_assertions = env::var("SAML_REQUIRE_ENCRYPTED_ASSERTIONS")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);
        let allowed_clock_skew_secs: u64 = env::var("SAML_CLOCK_SKEW_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .unwrap_or(60);

        let metadata_fetch_timeout_secs: u64 = env::var("SAML_IDP_METADATA_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);

        let replay_cache_enabled = env::var("SAML_REPLAY_CACHE_ENABLED")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);
        let replay_cache_ttl_secs: u64 = env::var("SAML_REPLAY_CACHE_TTL_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .unwrap_or(300);

        Ok(Self {
            entity_id,
            acs_url,
            slo_url,
            metadata_url,
            key_source,
            name_id_format: NameIdFormat::Unspecified,
            security: SecurityOpts {
                require_signed_assertions,
                require_encrypted_assertions,
                allowed_clock_skew: Duration::from_secs(allowed_clock_skew_secs),
                ignored_crypto_errors: HashSet::new(),
            },
            metadata_fetch_timeout: Duration::from_secs(metadata_fetch_timeout_secs),
            replay_cache_enabled,
            replay_cache_ttl: Duration::from_secs(replay_cache_ttl_secs),
        })
    }

    /// Programmatic builder entry point for tests/embedders.
    pub fn new(entity_id: impl Into<String>, acs_url: impl Into<String>, key_source: SpKeySource) -> Self {
        Self {
            entity_id: entity_id.into(),
            acs_url: acs_url.into(),
            slo_url: None,
            metadata_url: None,
            key_source,
            name_id_format: NameIdFormat::Unspecified,
            security: SecurityOpts::default(),
            metadata_fetch_timeout: Duration::from_secs(10),
            replay_cache_enabled: false,
            replay_cache_ttl: Duration::from_secs(300),
        }
    }

    pub fn with_security(mut self, security: SecurityOpts) -> Self {
        self.security = security;
        self
    }

    pub fn with_name_id_format(mut self, format: NameIdFormat) -> Self {
        self.name_id_format = format;
        self
    }

    pub fn validate(&self) -> SpResult<()> {
        if self.entity_id.is_empty() {
            return Err(SpError::Configuration("entity_id must not be empty".to_string()));
        }
        if self.acs_url.is_empty() {
            return Err(SpError::Configuration("acs_url must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_entity_id() {
        let cfg = ServiceProviderConfig::new(
            "",
            "https://sp.example.com/acs",
            SpKeySource::Inline { cert_pem: String::new(), key_pem: String::new() },
        );
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn default_security_is_strict() {
        let opts = SecurityOpts::default();
        assert!(opts.require_signed_assertions);
        assert!(!opts.require_encrypted_assertions);
    }

    #[test]
    fn classifier_defaults_every_engine_error_to_security_failure() {
        let opts = SecurityOpts::default();
        assert_eq!(opts.classify(&EngineError::SignatureInvalid), CryptoErrorClass::SecurityFailure);
        assert_eq!(
            opts.classify(&EngineError::MalformedXml("quirk".to_string())),
            CryptoErrorClass::SecurityFailure
        );
    }

    #[test]
    fn classifier_honors_explicit_allowlist() {
        let mut opts = SecurityOpts::default();
        opts.ignored_crypto_errors.insert(CryptoErrorKind::MalformedXml);
        assert_eq!(
            opts.classify(&EngineError::MalformedXml("quirk".to_string())),
            CryptoErrorClass::IgnoreAndAccept
        );
        assert_eq!(opts.classify(&EngineError::SignatureInvalid), CryptoErrorClass::SecurityFailure);
    }
}
