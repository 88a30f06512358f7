//! The response acceptance pipeline: the sequence of checks an inbound
//! `SAMLResponse` must pass before its assertion is handed to the
//! downstream application.
//!
//! Every stage runs in a fixed order and none is skipped. The one
//! ordering rule that matters most: the structural check binding a
//! `<Signature>` to the element it claims to cover runs strictly before
//! that signature is cryptographically trusted. Checking the binding
//! only *after* asking the crypto engine "is this signature valid"
//! would let an attacker splice a validly-signed assertion from one
//! response into the envelope of another and have it accepted — a
//! signature-wrapping attack. The engine only ever answers "is the
//! bytes-in-front-of-me well signed", never "does this signature belong
//! to this document", so that question has to be answered first, here.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::{CryptoErrorClass, SecurityOpts, ServiceProviderConfig};
use crate::error::{SpError, SpResult};
use crate::saml::crypto::{extract_element, CryptoEngine, VerifyOptions};
use crate::saml::key_material::KeyMaterial;
use crate::saml::request_cache::RequestIdCache;
use crate::saml::schema::{Assertion, Signature};

/// What the downstream application handler actually needs, carried as a
/// typed value rather than reaching back into the raw `Assertion` or an
/// untyped, string-keyed request-context map.
#[derive(Debug, Clone)]
pub struct AcceptedAssertion {
    pub assertion_id: String,
    pub name_id: Option<String>,
    pub session_index: Option<String>,
    pub attributes: HashMap<String, Vec<String>>,
    pub issued_at: Option<DateTime<Utc>>,
}

impl From<&Assertion> for AcceptedAssertion {
    fn from(assertion: &Assertion) -> Self {
        Self {
            assertion_id: assertion.id.clone(),
            name_id: assertion.name_id().map(|s| s.to_string()),
            session_index: assertion.authn_statements.first().and_then(|s| s.session_index.clone()),
            attributes: assertion.attributes(),
            issued_at: assertion.issue_instant,
        }
    }
}

pub struct PipelineInput<'a> {
    pub raw_xml: &'a [u8],
    pub expected_destination: &'a str,
    pub expected_idp_entity_id: &'a str,
    pub sp_entity_id: &'a str,
    pub cert_tempfile: &'a Path,
    pub key_material: &'a KeyMaterial,
}

pub fn accept(
    input: PipelineInput<'_>,
    engine: &dyn CryptoEngine,
    config: &ServiceProviderConfig,
    replay_cache: Option<&RequestIdCache>,
) -> SpResult<AcceptedAssertion> {
    let response = parse_response(input.raw_xml)?;

    check_destination(&response, input.expected_destination)?;
    check_issuer(response.issuer.as_ref().map(|i| i.value.as_str()), input.expected_idp_entity_id)?;
    check_status(&response.status)?;

    // S9/S10: a Response-level Signature, if present, is checked and
    // verified against the whole envelope before the Assertion is even
    // located — scenario A (signed Response, unsigned Assertion) must
    // be accepted on this alone.
    let mut signature_ok = false;
    if let Some(signature) = &response.signature {
        check_signature_binding(signature, &response.id, input.raw_xml)?;
        if verify_signature(input.raw_xml, input.cert_tempfile, engine, &config.security)? {
            signature_ok = true;
        }
    }

    let (assertion_xml, assertion) = resolve_assertion(&response, &input, engine, config)?;

    // S9/S10 again, against the Assertion's own (possibly decrypted)
    // bytes — independent of whether the Response was already signed.
    if let Some(signature) = &assertion.signature {
        check_signature_binding(signature, &assertion.id, &assertion_xml)?;
        if verify_signature(&assertion_xml, input.cert_tempfile, engine, &config.security)? {
            signature_ok = true;
        }
    }

    // S12: no unsigned response is accepted when signatures are
    // required, regardless of which element (or neither) carried one.
    if config.security.require_signed_assertions && !signature_ok {
        return Err(SpError::SignatureMissing(
            "neither the Response nor the Assertion carries a verified Signature".to_string(),
        ));
    }

    check_assertion_issuer(&assertion.issuer.value, input.expected_idp_entity_id)?;
    let confirmation_data =
        check_subject_confirmation(&assertion, input.expected_destination, config.security.allowed_clock_skew)?;
    check_conditions(&assertion, input.sp_entity_id, config.security.allowed_clock_skew)?;
    check_correlation(&response, confirmation_data, replay_cache)?;

    let accepted = AcceptedAssertion::from(&assertion);
    tracing::info!(assertion_id = %accepted.assertion_id, "saml assertion accepted");
    Ok(accepted)
}

fn parse_response(raw_xml: &[u8]) -> SpResult<crate::saml::schema::Response> {
    let xml_str = std::str::from_utf8(raw_xml)
        .map_err(|e| SpError::MalformedResponse(format!("response is not valid utf-8: {e}")))?;
    quick_xml::de::from_str(xml_str)
        .map_err(|e| SpError::MalformedResponse(format!("parsing Response xml: {e}")))
}

fn check_destination(response: &crate::saml::schema::Response, expected: &str) -> SpResult<()> {
    match &response.destination {
        Some(dest) if dest == expected => Ok(()),
        Some(dest) => Err(SpError::DestinationMismatch(format!(
            "response Destination {dest} does not match expected ACS URL {expected}"
        ))),
        None => Err(SpError::DestinationMismatch("response carries no Destination attribute".to_string())),
    }
}

fn check_issuer(issuer: Option<&str>, expected: &str) -> SpResult<()> {
    match issuer {
        Some(value) if value == expected => Ok(()),
        Some(value) => Err(SpError::IssuerMismatch(format!("response Issuer {value} does not match expected IdP entity ID {expected}"))),
        None => Ok(()), // Response-level Issuer is optional per core schema; Assertion.Issuer is checked separately.
    }
}

fn check_status(status: &crate::saml::schema::Status) -> SpResult<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(SpError::StatusFailure(format!(
            "status {}{}",
            status.status_code.value,
            status.status_message.as_ref().map(|m| format!(": {m}")).unwrap_or_default()
        )))
    }
}

/// Locates the single assertion this response carries — decrypting it
/// first if it arrived as an `EncryptedAssertion` — and returns both the
/// parsed struct and the raw XML bytes that were (or will be) signed, so
/// callers can still run the signature-binding and verification checks
/// against the exact bytes the IdP produced.
fn resolve_assertion(
    response: &crate::saml::schema::Response,
    input: &PipelineInput<'_>,
    engine: &dyn CryptoEngine,
    config: &ServiceProviderConfig,
) -> SpResult<(Vec<u8>, Assertion)> {
    match (&response.assertion, &response.encrypted_assertion) {
        (Some(_), Some(_)) => Err(SpError::MalformedResponse(
            "response carries both a plaintext Assertion and an EncryptedAssertion".to_string(),
        )),
        (None, None) => Err(SpError::MalformedResponse("response carries no Assertion".to_string())),
        (Some(_), None) if config.security.require_encrypted_assertions => {
            Err(SpError::MalformedResponse("plaintext Assertion present but encrypted assertions are required".to_string()))
        }
        (Some(assertion), None) => {
            let xml = extract_assertion_source(input.raw_xml, &assertion.id)?;
            Ok((xml, assertion.clone()))
        }
        (None, Some(_)) => {
            let raw_str = std::str::from_utf8(input.raw_xml)
                .map_err(|e| SpError::MalformedResponse(format!("response is not valid utf-8: {e}")))?;
            let encrypted_block = extract_element(raw_str, "EncryptedAssertion")
                .ok_or_else(|| SpError::MalformedResponse("could not locate EncryptedAssertion element".to_string()))?;

            let plaintext = engine
                .decrypt(encrypted_block.as_bytes(), &input.key_material.key_path)
                .map_err(|e| SpError::Decryption(e.to_string()))?;
            let xml_str = String::from_utf8(plaintext)
                .map_err(|e| SpError::Decryption(format!("decrypted assertion is not valid utf-8: {e}")))?;
            let assertion: Assertion = quick_xml::de::from_str(&xml_str)
                .map_err(|e| SpError::MalformedResponse(format!("parsing decrypted Assertion xml: {e}")))?;
            Ok((xml_str.into_bytes(), assertion))
        }
    }
}

/// Re-finds the raw `<Assertion ...>...</Assertion>` bytes for the
/// element with the given ID inside the full response document, since
/// the crypto engine verifies over raw bytes, not the re-serialized
/// struct (re-serializing would not reproduce the IdP's exact byte
/// stream and would break signature verification).
fn extract_assertion_source(raw_xml: &[u8], assertion_id: &str) -> SpResult<Vec<u8>> {
    let xml_str = std::str::from_utf8(raw_xml)
        .map_err(|e| SpError::MalformedResponse(format!("response is not valid utf-8: {e}")))?;
    let needle = format!("ID=\"{assertion_id}\"");
    let tag_start = xml_str
        .find(&needle)
        .and_then(|idx| xml_str[..idx].rfind('<'))
        .ok_or_else(|| SpError::MalformedResponse(format!("could not locate Assertion element with ID {assertion_id}")))?;
    let raw_name = xml_str[tag_start + 1..]
        .split(|c: char| c == ' ' || c == '>' || c == '\t' || c == '\n')
        .next()
        .unwrap_or("Assertion");
    let close_needle = format!("</{raw_name}>");
    let close_idx = xml_str[tag_start..]
        .find(&close_needle)
        .ok_or_else(|| SpError::MalformedResponse("Assertion element is not well-formed (no closing tag)".to_string()))?;
    let end = tag_start + close_idx + close_needle.len();
    Ok(xml_str[tag_start..end].as_bytes().to_vec())
}

/// The anti-wrapping check: the `<Signature>`'s `Reference/@URI` must
/// either be empty (an enveloping signature over the whole document, the
/// element carrying the `Signature` itself) or point via `#<ID>` at the
/// very element that carries it. A wrapped assertion smuggled in as a
/// sibling/decoy, with the genuinely-signed element hidden elsewhere in
/// the tree, fails this before any crypto runs.
fn check_signature_binding(signature: &Signature, owner_id: &str, owner_xml: &[u8]) -> SpResult<()> {
    let uri = &signature.signed_info.reference.uri;
    if uri.is_empty() {
        return Ok(());
    }

    let Some(uri) = uri.strip_prefix('#') else {
        return Err(SpError::SignatureWrapping(format!(
            "Signature Reference URI {uri} is not a same-document fragment reference"
        )));
    };
    if uri != owner_id {
        return Err(SpError::SignatureWrapping(format!(
            "Signature Reference URI #{uri} does not match the signed element's own ID {owner_id}"
        )));
    }

    let xml_str = std::str::from_utf8(owner_xml).unwrap_or_default();
    if !xml_str.contains(&format!("ID=\"{owner_id}\"")) {
        return Err(SpError::SignatureWrapping(
            "signed element ID does not appear in the candidate element bytes".to_string(),
        ));
    }
    Ok(())
}

/// Runs the crypto engine's signature verification and folds its result
/// through the `SecurityOpts` classifier: a genuine failure aborts
/// acceptance, but an error the operator has explicitly allowlisted as
/// advisory is treated as if verification had succeeded (`Ok(true)`), per
/// the classifier's "ignore-and-accept" outcome. Returns `Ok(false)` only
/// when the engine itself reports nothing wrong but the caller still
/// shouldn't treat this as a verified signature — currently unreachable,
/// kept so the boolean return stays meaningful if a third outcome is
/// ever added.
fn verify_signature(xml: &[u8], cert_tempfile: &Path, engine: &dyn CryptoEngine, security: &SecurityOpts) -> SpResult<bool> {
    match engine.verify(xml, cert_tempfile, &VerifyOptions { require_sha256: true }) {
        Ok(()) => Ok(true),
        Err(e) => match security.classify(&e) {
            CryptoErrorClass::IgnoreAndAccept => {
                tracing::warn!(error = %e, "crypto engine error classified as ignore-and-accept, treating signature as verified");
                Ok(true)
            }
            CryptoErrorClass::SecurityFailure => Err(SpError::SignatureInvalid(e.to_string())),
        },
    }
}

fn check_assertion_issuer(issuer: &str, expected: &str) -> SpResult<()> {
    if issuer == expected {
        Ok(())
    } else {
        Err(SpError::IssuerMismatch(format!(
            "assertion Issuer {issuer} does not match expected IdP entity ID {expected}"
        )))
    }
}

struct ConfirmationData {
    in_response_to: Option<String>,
}

/// Converts a `std::time::Duration` clock-skew allowance into its
/// `chrono` equivalent. Any allowance too large to represent collapses
/// to zero rather than panicking — an operator-supplied skew value is
/// never large enough in practice to hit that path.
fn chrono_skew(skew: Duration) -> chrono::Duration {
    chrono::Duration::from_std(skew).unwrap_or_else(|_| chrono::Duration::zero())
}

/// `now` must be no earlier than `bound - skew`. Used for `NotBefore`.
fn satisfies_forward_bound(now: DateTime<Utc>, bound: DateTime<Utc>, skew: chrono::Duration) -> bool {
    now >= bound - skew
}

/// `now` must be strictly earlier than `bound + skew`. Used for
/// `NotOnOrAfter`.
fn satisfies_backward_bound(now: DateTime<Utc>, bound: DateTime<Utc>, skew: chrono::Duration) -> bool {
    now < bound + skew
}

fn check_subject_confirmation(assertion: &Assertion, expected_recipient: &str, skew: Duration) -> SpResult<ConfirmationData> {
    let subject = assertion
        .subject
        .as_ref()
        .ok_or_else(|| SpError::MalformedResponse("assertion carries no Subject".to_string()))?;
    let confirmation = subject
        .subject_confirmation
        .as_ref()
        .ok_or_else(|| SpError::MalformedResponse("Subject carries no SubjectConfirmation".to_string()))?;
    let data = confirmation
        .subject_confirmation_data
        .as_ref()
        .ok_or_else(|| SpError::MalformedResponse("SubjectConfirmation carries no SubjectConfirmationData".to_string()))?;

    match &data.recipient {
        Some(recipient) if recipient == expected_recipient => {}
        Some(recipient) => {
            return Err(SpError::RecipientMismatch(format!(
                "SubjectConfirmationData Recipient {recipient} does not match ACS URL {expected_recipient}"
            )))
        }
        None => return Err(SpError::RecipientMismatch("SubjectConfirmationData carries no Recipient".to_string())),
    }

    // A missing NotOnOrAfter is "unspecified", not "expired" — it simply
    // carries no temporal constraint to enforce.
    if let Some(not_on_or_after) = data.not_on_or_after {
        let now = Utc::now();
        if !satisfies_backward_bound(now, not_on_or_after, chrono_skew(skew)) {
            return Err(SpError::Expired(format!(
                "SubjectConfirmationData expired at {not_on_or_after}, now is {now}"
            )));
        }
    }

    Ok(ConfirmationData { in_response_to: data.in_response_to.clone() })
}

fn check_conditions(assertion: &Assertion, sp_entity_id: &str, skew: Duration) -> SpResult<()> {
    let conditions = assertion
        .conditions
        .as_ref()
        .ok_or_else(|| SpError::Expired("assertion carries no Conditions".to_string()))?;
    let tolerance = chrono_skew(skew);
    let now = Utc::now();

    if let Some(not_before) = conditions.not_before {
        if !satisfies_forward_bound(now, not_before, tolerance) {
            return Err(SpError::NotYetValid(format!("Conditions NotBefore {not_before} is in the future, now is {now}")));
        }
    }
    // A missing NotOnOrAfter is "unspecified" and carries no expiry to
    // enforce — it is not itself an error.
    if let Some(not_on_or_after) = conditions.not_on_or_after {
        if !satisfies_backward_bound(now, not_on_or_after, tolerance) {
            return Err(SpError::Expired(format!("Conditions expired at {not_on_or_after}, now is {now}")));
        }
    }

    // A present AudienceRestriction must name this SP; an absent one is
    // not an error (the core schema's "SHOULD", not a hard "MUST", is
    // honored without being silently ignored when IdPs do include one).
    if let Some(restriction) = &conditions.audience_restriction {
        let names_this_sp = restriction.audience.iter().any(|a| a.value == sp_entity_id);
        if !names_this_sp {
            return Err(SpError::AudienceMismatch(format!(
                "AudienceRestriction does not name this SP's entity ID {sp_entity_id}"
            )));
        }
    }

    Ok(())
}

fn check_correlation(
    response: &crate::saml::schema::Response,
    confirmation: ConfirmationData,
    replay_cache: Option<&RequestIdCache>,
) -> SpResult<()> {
    let in_response_to = response
        .in_response_to
        .clone()
        .or(confirmation.in_response_to)
        .ok_or_else(|| SpError::Correlation("response carries no InResponseTo".to_string()))?;

    if let (Some(resp_irt), Some(conf_irt)) = (&response.in_response_to, &confirmation.in_response_to) {
        if resp_irt != conf_irt {
            return Err(SpError::Correlation(format!(
                "Response InResponseTo {resp_irt} does not match SubjectConfirmationData InResponseTo {conf_irt}"
            )));
        }
    }

    if let Some(cache) = replay_cache {
        if !cache.consume(&in_response_to) {
            return Err(SpError::Replay(format!(
                "InResponseTo {in_response_to} is not an outstanding request or has already been consumed"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpKeySource;
    use crate::saml::crypto::MockCryptoEngine;
    use std::time::Duration;

    fn base_config() -> ServiceProviderConfig {
        ServiceProviderConfig::new(
            "https://sp.example.com/metadata",
            "https://sp.example.com/acs",
            SpKeySource::Inline { cert_pem: String::new(), key_pem: String::new() },
        )
    }

    fn sample_response_xml(not_on_or_after: &str, conditions_not_on_or_after: &str, in_response_to: &str) -> String {
        format!(
            r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"
                    xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion"
                    ID="_resp1" InResponseTo="{in_response_to}" Destination="https://sp.example.com/acs">
  <saml:Issuer>https://idp.example.com</saml:Issuer>
  <samlp:Status><samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/></samlp:Status>
  <saml:Assertion ID="_assertion1">
    <saml:Issuer>https://idp.example.com</saml:Issuer>
    <ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
      <ds:SignedInfo><ds:Reference URI="#_assertion1"><ds:DigestValue>abcd</ds:DigestValue></ds:Reference></ds:SignedInfo>
      <ds:SignatureValue>c2lnbmF0dXJl</ds:SignatureValue>
    </ds:Signature>
    <saml:Subject>
      <saml:NameID>user@example.com</saml:NameID>
      <saml:SubjectConfirmation Method="urn:oasis:names:tc:SAML:2.0:cm:bearer">
        <saml:SubjectConfirmationData Recipient="https://sp.example.com/acs" NotOnOrAfter="{not_on_or_after}" InResponseTo="{in_response_to}"/>
      </saml:SubjectConfirmation>
    </saml:Subject>
    <saml:Conditions NotBefore="2020-01-01T00:00:00Z" NotOnOrAfter="{conditions_not_on_or_after}">
      <saml:AudienceRestriction><saml:Audience>https://sp.example.com/metadata</saml:Audience></saml:AudienceRestriction>
    </saml:Conditions>
  </saml:Assertion>
</samlp:Response>"#,
        )
    }

    fn future_timestamp() -> String {
        (Utc::now() + chrono::Duration::hours(1)).to_rfc3339()
    }

    fn past_timestamp() -> String {
        (Utc::now() - chrono::Duration::hours(1)).to_rfc3339()
    }

    #[test]
    fn happy_path_signed_assertion_is_accepted() {
        let future = future_timestamp();
        let xml = sample_response_xml(&future, &future, "_req1");

        let mut engine = MockCryptoEngine::new();
        engine.expect_verify().returning(|_, _, _| Ok(()));

        let mut config = base_config();
        config.security.require_signed_assertions = true;

        let tempfile = tempfile::NamedTempFile::new().unwrap();
        let key_material = KeyMaterial {
            cert_path: tempfile.path().to_path_buf(),
            key_path: tempfile.path().to_path_buf(),
            cert_pem: String::new(),
        };

        let cache = RequestIdCache::new(Duration::from_secs(60));
        cache.record("_req1");

        let input = PipelineInput {
            raw_xml: xml.as_bytes(),
            expected_destination: "https://sp.example.com/acs",
            expected_idp_entity_id: "https://idp.example.com",
            sp_entity_id: "https://sp.example.com/metadata",
            cert_tempfile: tempfile.path(),
            key_material: &key_material,
        };

        let result = accept(input, &engine, &config, Some(&cache));
        assert!(result.is_ok(), "{result:?}");
        let accepted = result.unwrap();
        assert_eq!(accepted.name_id.as_deref(), Some("user@example.com"));
    }

    #[test]
    fn destination_mismatch_is_rejected() {
        let future = future_timestamp();
        let xml = sample_response_xml(&future, &future, "_req1");
        let engine = MockCryptoEngine::new();
        let config = base_config();
        let tempfile = tempfile::NamedTempFile::new().unwrap();
        let key_material = KeyMaterial { cert_path: tempfile.path().to_path_buf(), key_path: tempfile.path().to_path_buf(), cert_pem: String::new() };

        let input = PipelineInput {
            raw_xml: xml.as_bytes(),
            expected_destination: "https://sp.example.com/WRONG",
            expected_idp_entity_id: "https://idp.example.com",
            sp_entity_id: "https://sp.example.com/metadata",
            cert_tempfile: tempfile.path(),
            key_material: &key_material,
        };

        let err = accept(input, &engine, &config, None).unwrap_err();
        assert!(matches!(err, SpError::DestinationMismatch(_)));
    }

    #[test]
    fn expired_assertion_is_rejected() {
        let past = past_timestamp();
        let xml = sample_response_xml(&past, &past, "_req1");
        let mut engine = MockCryptoEngine::new();
        engine.expect_verify().returning(|_, _, _| Ok(()));
        let config = base_config();
        let tempfile = tempfile::NamedTempFile::new().unwrap();
        let key_material = KeyMaterial { cert_path: tempfile.path().to_path_buf(), key_path: tempfile.path().to_path_buf(), cert_pem: String::new() };

        let input = PipelineInput {
            raw_xml: xml.as_bytes(),
            expected_destination: "https://sp.example.com/acs",
            expected_idp_entity_id: "https://idp.example.com",
            sp_entity_id: "https://sp.example.com/metadata",
            cert_tempfile: tempfile.path(),
            key_material: &key_material,
        };

        let err = accept(input, &engine, &config, None).unwrap_err();
        assert!(matches!(err, SpError::Expired(_)));
    }

    #[test]
    fn signature_wrapping_is_rejected_before_crypto_verify_runs() {
        let future = future_timestamp();
        let mut xml = sample_response_xml(&future, &future, "_req1");
        // Point the Reference at a different element ID than the one
        // actually signed — simulates a wrapped assertion.
        xml = xml.replace("URI=\"#_assertion1\"", "URI=\"#_decoy\"");

        // If the binding check didn't run before verify, this mock
        // would happily report the (wrong) signature as valid.
        let mut engine = MockCryptoEngine::new();
        engine.expect_verify().times(0).returning(|_, _, _| Ok(()));

        let config = base_config();
        let tempfile = tempfile::NamedTempFile::new().unwrap();
        let key_material = KeyMaterial { cert_path: tempfile.path().to_path_buf(), key_path: tempfile.path().to_path_buf(), cert_pem: String::new() };

        let input = PipelineInput {
            raw_xml: xml.as_bytes(),
            expected_destination: "https://sp.example.com/acs",
            expected_idp_entity_id: "https://idp.example.com",
            sp_entity_id: "https://sp.example.com/metadata",
            cert_tempfile: tempfile.path(),
            key_material: &key_material,
        };

        let err = accept(input, &engine, &config, None).unwrap_err();
        assert!(matches!(err, SpError::SignatureWrapping(_)));
    }

    #[test]
    fn unsigned_assertion_is_rejected_when_signatures_are_required() {
        let future = future_timestamp();
        let xml = sample_response_xml(&future, &future, "_req1").replace(
            r#"<ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
      <ds:SignedInfo><ds:Reference URI="#_assertion1"><ds:DigestValue>abcd</ds:DigestValue></ds:Reference></ds:SignedInfo>
      <ds:SignatureValue>c2lnbmF0dXJl</ds:SignatureValue>
    </ds:Signature>"#,
            "",
        );

        let engine = MockCryptoEngine::new();
        let config = base_config();
        let tempfile = tempfile::NamedTempFile::new().unwrap();
        let key_material = KeyMaterial { cert_path: tempfile.path().to_path_buf(), key_path: tempfile.path().to_path_buf(), cert_pem: String::new() };

        let input = PipelineInput {
            raw_xml: xml.as_bytes(),
            expected_destination: "https://sp.example.com/acs",
            expected_idp_entity_id: "https://idp.example.com",
            sp_entity_id: "https://sp.example.com/metadata",
            cert_tempfile: tempfile.path(),
            key_material: &key_material,
        };

        let err = accept(input, &engine, &config, None).unwrap_err();
        assert!(matches!(err, SpError::SignatureMissing(_)));
    }

    fn response_signed_assertion_unsigned_xml(not_on_or_after: &str, conditions_not_on_or_after: &str, in_response_to: &str) -> String {
        format!(
            r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"
                    xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion"
                    ID="_resp1" InResponseTo="{in_response_to}" Destination="https://sp.example.com/acs">
  <saml:Issuer>https://idp.example.com</saml:Issuer>
  <ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
    <ds:SignedInfo><ds:Reference URI=""><ds:DigestValue>abcd</ds:DigestValue></ds:Reference></ds:SignedInfo>
    <ds:SignatureValue>c2lnbmF0dXJl</ds:SignatureValue>
  </ds:Signature>
  <samlp:Status><samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/></samlp:Status>
  <saml:Assertion ID="_assertion1">
    <saml:Issuer>https://idp.example.com</saml:Issuer>
    <saml:Subject>
      <saml:NameID>user@example.com</saml:NameID>
      <saml:SubjectConfirmation Method="urn:oasis:names:tc:SAML:2.0:cm:bearer">
        <saml:SubjectConfirmationData Recipient="https://sp.example.com/acs" NotOnOrAfter="{not_on_or_after}" InResponseTo="{in_response_to}"/>
      </saml:SubjectConfirmation>
    </saml:Subject>
    <saml:Conditions NotBefore="2020-01-01T00:00:00Z" NotOnOrAfter="{conditions_not_on_or_after}">
      <saml:AudienceRestriction><saml:Audience>https://sp.example.com/metadata</saml:Audience></saml:AudienceRestriction>
    </saml:Conditions>
  </saml:Assertion>
</samlp:Response>"#,
        )
    }

    #[test]
    fn response_level_signature_alone_satisfies_require_signed_assertions() {
        let future = future_timestamp();
        let xml = response_signed_assertion_unsigned_xml(&future, &future, "_req1");

        let mut engine = MockCryptoEngine::new();
        engine.expect_verify().returning(|_, _, _| Ok(()));

        let config = base_config();
        let tempfile = tempfile::NamedTempFile::new().unwrap();
        let key_material = KeyMaterial { cert_path: tempfile.path().to_path_buf(), key_path: tempfile.path().to_path_buf(), cert_pem: String::new() };

        let cache = RequestIdCache::new(Duration::from_secs(60));
        cache.record("_req1");

        let input = PipelineInput {
            raw_xml: xml.as_bytes(),
            expected_destination: "https://sp.example.com/acs",
            expected_idp_entity_id: "https://idp.example.com",
            sp_entity_id: "https://sp.example.com/metadata",
            cert_tempfile: tempfile.path(),
            key_material: &key_material,
        };

        let result = accept(input, &engine, &config, Some(&cache));
        assert!(result.is_ok(), "{result:?}");
    }

    #[test]
    fn clock_skew_admits_an_assertion_just_past_its_strict_expiry() {
        let just_expired = (Utc::now() - chrono::Duration::seconds(30)).to_rfc3339();
        let future = future_timestamp();
        let xml = sample_response_xml(&future, &just_expired, "_req1");

        let mut engine = MockCryptoEngine::new();
        engine.expect_verify().returning(|_, _, _| Ok(()));

        let mut config = base_config();
        config.security.allowed_clock_skew = Duration::from_secs(120);

        let tempfile = tempfile::NamedTempFile::new().unwrap();
        let key_material = KeyMaterial { cert_path: tempfile.path().to_path_buf(), key_path: tempfile.path().to_path_buf(), cert_pem: String::new() };

        let cache = RequestIdCache::new(Duration::from_secs(60));
        cache.record("_req1");

        let input = PipelineInput {
            raw_xml: xml.as_bytes(),
            expected_destination: "https://sp.example.com/acs",
            expected_idp_entity_id: "https://idp.example.com",
            sp_entity_id: "https://sp.example.com/metadata",
            cert_tempfile: tempfile.path(),
            key_material: &key_material,
        };

        let result = accept(input, &engine, &config, Some(&cache));
        assert!(result.is_ok(), "{result:?}");
    }

    fn response_with_unspecified_conditions_expiry(not_on_or_after: &str, in_response_to: &str) -> String {
        format!(
            r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"
                    xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion"
                    ID="_resp1" InResponseTo="{in_response_to}" Destination="https://sp.example.com/acs">
  <saml:Issuer>https://idp.example.com</saml:Issuer>
  <samlp:Status><samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/></samlp:Status>
  <saml:Assertion ID="_assertion1">
    <saml:Issuer>https://idp.example.com</saml:Issuer>
    <ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
      <ds:SignedInfo><ds:Reference URI="#_assertion1"><ds:DigestValue>abcd</ds:DigestValue></ds:Reference></ds:SignedInfo>
      <ds:SignatureValue>c2lnbmF0dXJl</ds:SignatureValue>
    </ds:Signature>
    <saml:Subject>
      <saml:NameID>user@example.com</saml:NameID>
      <saml:SubjectConfirmation Method="urn:oasis:names:tc:SAML:2.0:cm:bearer">
        <saml:SubjectConfirmationData Recipient="https://sp.example.com/acs" NotOnOrAfter="{not_on_or_after}" InResponseTo="{in_response_to}"/>
      </saml:SubjectConfirmation>
    </saml:Subject>
    <saml:Conditions NotBefore="2020-01-01T00:00:00Z">
      <saml:AudienceRestriction><saml:Audience>https://sp.example.com/metadata</saml:Audience></saml:AudienceRestriction>
    </saml:Conditions>
  </saml:Assertion>
</samlp:Response>"#,
        )
    }

    #[test]
    fn missing_conditions_not_on_or_after_is_unspecified_not_expired() {
        let future = future_timestamp();
        let xml = response_with_unspecified_conditions_expiry(&future, "_req1");

        let mut engine = MockCryptoEngine::new();
        engine.expect_verify().returning(|_, _, _| Ok(()));

        let config = base_config();
        let tempfile = tempfile::NamedTempFile::new().unwrap();
        let key_material = KeyMaterial { cert_path: tempfile.path().to_path_buf(), key_path: tempfile.path().to_path_buf(), cert_pem: String::new() };

        let cache = RequestIdCache::new(Duration::from_secs(60));
        cache.record("_req1");

        let input = PipelineInput {
            raw_xml: xml.as_bytes(),
            expected_destination: "https://sp.example.com/acs",
            expected_idp_entity_id: "https://idp.example.com",
            sp_entity_id: "https://sp.example.com/metadata",
            cert_tempfile: tempfile.path(),
            key_material: &key_material,
        };

        let result = accept(input, &engine, &config, Some(&cache));
        assert!(result.is_ok(), "{result:?}");
    }

    #[test]
    fn classifier_ignore_and_accept_treats_engine_failure_as_verified() {
        let future = future_timestamp();
        let xml = sample_response_xml(&future, &future, "_req1");

        let mut engine = MockCryptoEngine::new();
        engine
            .expect_verify()
            .returning(|_, _, _| Err(crate::saml::crypto::EngineError::MalformedXml("canonicalization quirk".to_string())));

        let mut config = base_config();
        config.security.ignored_crypto_errors.insert(crate::saml::crypto::CryptoErrorKind::MalformedXml);

        let tempfile = tempfile::NamedTempFile::new().unwrap();
        let key_material = KeyMaterial { cert_path: tempfile.path().to_path_buf(), key_path: tempfile.path().to_path_buf(), cert_pem: String::new() };

        let cache = RequestIdCache::new(Duration::from_secs(60));
        cache.record("_req1");

        let input = PipelineInput {
            raw_xml: xml.as_bytes(),
            expected_destination: "https://sp.example.com/acs",
            expected_idp_entity_id: "https://idp.example.com",
            sp_entity_id: "https://sp.example.com/metadata",
            cert_tempfile: tempfile.path(),
            key_material: &key_material,
        };

        let result = accept(input, &engine, &config, Some(&cache));
        assert!(result.is_ok(), "{result:?}");
    }
}
