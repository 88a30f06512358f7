//! IdP metadata resolution and caching.
//!
//! Metadata can arrive three ways: already parsed, raw XML, or a URL to
//! fetch once. Whichever it is, the resolved `EntityDescriptor` is
//! cached behind a `OnceLock` for the life of the process — the IdP
//! does not rotate its descriptor mid-flight, and re-parsing or
//! re-fetching it on every `AuthnRequest`/`Response` would be wasted
//! work.
//!
//! The cert-selection rule below is preserved exactly as specified even
//! though it reads oddly: the certificate tagged for `encryption` use is
//! the one consulted for *signature verification*, with the `signing`-
//! tagged certificate only used as a fallback when no `encryption` key is
//! published. See `DESIGN.md` for why this is kept rather than silently
//! "fixed".

use std::sync::OnceLock;
use std::time::Duration;

use crate::error::{SpError, SpResult};
use crate::saml::schema::{EntityDescriptor, IdpSsoDescriptor, KeyUse, HTTP_POST_BINDING, HTTP_REDIRECT_BINDING};

/// Where an IdP's metadata comes from. Exactly one source, never a
/// partially-filled struct.
pub enum IdpMetadataSource {
    Parsed(EntityDescriptor),
    Xml(String),
    Url(String),
}

pub struct IdpMetadataResolver {
    source: IdpMetadataSource,
    fetch_timeout: Duration,
    cache: OnceLock<EntityDescriptor>,
}

impl IdpMetadataResolver {
    pub fn new(source: IdpMetadataSource, fetch_timeout: Duration) -> Self {
        Self { source, fetch_timeout, cache: OnceLock::new() }
    }

    pub async fn get(&self) -> SpResult<&EntityDescriptor> {
        if let Some(existing) = self.cache.get() {
            return Ok(existing);
        }
        let resolved = self.resolve().await?;
        Ok(self.cache.get_or_init(|| resolved))
    }

    async fn resolve(&self) -> SpResult<EntityDescriptor> {
        let xml = match &self.source {
            IdpMetadataSource::Parsed(descriptor) => return Ok(descriptor.clone()),
            IdpMetadataSource::Xml(xml) => xml.clone(),
            IdpMetadataSource::Url(url) => fetch_metadata_xml(url, self.fetch_timeout).await?,
        };
        parse_entity_descriptor(&xml)
    }
}

async fn fetch_metadata_xml(url: &str, timeout: Duration) -> SpResult<String> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| SpError::IdpMetadata(format!("building metadata HTTP client: {e}")))?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| SpError::IdpMetadata(format!("fetching IdP metadata from {url}: {e}")))?;

    if !response.status().is_success() {
        return Err(SpError::IdpMetadata(format!(
            "IdP metadata endpoint {url} returned status {}",
            response.status()
        )));
    }

    response
        .text()
        .await
        .map_err(|e| SpError::IdpMetadata(format!("reading IdP metadata body: {e}")))
}

fn parse_entity_descriptor(xml: &str) -> SpResult<EntityDescriptor> {
    quick_xml::de::from_str(xml)
        .map_err(|e| SpError::IdpMetadata(format!("parsing IdP EntityDescriptor: {e}")))
}

/// Picks the preferred `SingleSignOnService` binding location: this
/// service provider issues HTTP-Redirect AuthnRequests when the IdP
/// publishes that binding, falling back to HTTP-POST.
pub fn preferred_sso_binding(descriptor: &EntityDescriptor) -> SpResult<(String, String)> {
    let idp_sso = primary_idp_sso_descriptor(descriptor)?;

    if let Some(svc) = idp_sso
        .single_sign_on_services
        .iter()
        .find(|s| s.binding == HTTP_REDIRECT_BINDING)
    {
        return Ok((svc.binding.clone(), svc.location.clone()));
    }
    if let Some(svc) = idp_sso
        .single_sign_on_services
        .iter()
        .find(|s| s.binding == HTTP_POST_BINDING)
    {
        return Ok((svc.binding.clone(), svc.location.clone()));
    }
    Err(SpError::IdpMetadata(
        "IdP metadata publishes no HTTP-Redirect or HTTP-POST SingleSignOnService".to_string(),
    ))
}

/// The certificate used to verify a signature on an inbound `Response`
/// or `Assertion`. Intentionally prefers the `encryption`-tagged key
/// descriptor before the `signing`-tagged one — see module docs.
pub fn verification_cert_pem(descriptor: &EntityDescriptor) -> SpResult<String> {
    let idp_sso = primary_idp_sso_descriptor(descriptor)?;

    let encryption_cert = idp_sso
        .key_descriptors
        .iter()
        .find(|kd| matches!(kd.key_use, Some(KeyUse::Encryption)))
        .and_then(|kd| kd.certificate_pem());
    if let Some(cert) = encryption_cert {
        return Ok(cert);
    }

    idp_sso
        .key_descriptors
        .iter()
        .find(|kd| matches!(kd.key_use, Some(KeyUse::Signing)) || kd.key_use.is_none())
        .and_then(|kd| kd.certificate_pem())
        .ok_or_else(|| SpError::IdpMetadata("IdP metadata publishes no usable certificate".to_string()))
}

/// The certificate this SP should use when encrypting data toward the
/// IdP is out of scope (this SP only receives encrypted assertions, it
/// never emits `EncryptedID`); exposed for completeness of the resolver
/// contract described in the data model.
pub fn encryption_cert_pem(descriptor: &EntityDescriptor) -> SpResult<String> {
    let idp_sso = primary_idp_sso_descriptor(descriptor)?;
    idp_sso
        .key_descriptors
        .iter()
        .find(|kd| matches!(kd.key_use, Some(KeyUse::Encryption)))
        .and_then(|kd| kd.certificate_pem())
        .ok_or_else(|| SpError::IdpMetadata("IdP metadata publishes no encryption certificate".to_string()))
}

fn primary_idp_sso_descriptor(descriptor: &EntityDescriptor) -> SpResult<&IdpSsoDescriptor> {
    descriptor
        .idp_sso_descriptors
        .first()
        .ok_or_else(|| SpError::IdpMetadata("IdP metadata has no IDPSSODescriptor".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const METADATA_XML: &str = r#"<?xml version="1.0"?>
<EntityDescriptor entityID="https://idp.example.com/metadata" xmlns="urn:oasis:names:tc:SAML:2.0:metadata">
  <IDPSSODescriptor>
    <KeyDescriptor use="signing">
      <KeyInfo><X509Data><X509Certificate>signingcertdata</X509Certificate></X509Data></KeyInfo>
    </KeyDescriptor>
    <KeyDescriptor use="encryption">
      <KeyInfo><X509Data><X509Certificate>encryptioncertdata</X509Certificate></X509Data></KeyInfo>
    </KeyDescriptor>
    <SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="https://idp.example.com/sso/redirect"/>
    <SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" Location="https://idp.example.com/sso/post"/>
  </IDPSSODescriptor>
</EntityDescriptor>"#;

    #[test]
    fn parses_entity_descriptor() {
        let descriptor = parse_entity_descriptor(METADATA_XML).expect("parse");
        assert_eq!(descriptor.entity_id, "https://idp.example.com/metadata");
        assert_eq!(descriptor.idp_sso_descriptors.len(), 1);
    }

    #[test]
    fn prefers_http_redirect_binding() {
        let descriptor = parse_entity_descriptor(METADATA_XML).expect("parse");
        let (binding, location) = preferred_sso_binding(&descriptor).expect("binding");
        assert_eq!(binding, HTTP_REDIRECT_BINDING);
        assert_eq!(location, "https://idp.example.com/sso/redirect");
    }

    #[test]
    fn verification_cert_prefers_encryption_tagged_key() {
        let descriptor = parse_entity_descriptor(METADATA_XML).expect("parse");
        let pem = verification_cert_pem(&descriptor).expect("cert");
        assert!(pem.contains("encryptioncertdata"));
    }

    #[tokio::test]
    async fn resolver_fetches_and_caches_metadata_from_url() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/metadata"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(METADATA_XML))
            .expect(1)
            .mount(&server)
            .await;

        let resolver = IdpMetadataResolver::new(
            IdpMetadataSource::Url(format!("{}/metadata", server.uri())),
            Duration::from_secs(5),
        );

        let first = resolver.get().await.expect("first fetch");
        assert_eq!(first.entity_id, "https://idp.example.com/metadata");

        // Second call must hit the cache, not the mock server again —
        // `expect(1)` above is verified on drop.
        let second = resolver.get().await.expect("cached fetch");
        assert_eq!(second.entity_id, first.entity_id);
    }

    #[tokio::test]
    async fn resolver_surfaces_non_success_status_as_idp_metadata_error() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/metadata"))
            .respond_with(wiremock::ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let resolver = IdpMetadataResolver::new(
            IdpMetadataSource::Url(format!("{}/metadata", server.uri())),
            Duration::from_secs(5),
        );

        let err = resolver.get().await.expect_err("503 must not resolve");
        assert!(matches!(err, SpError::IdpMetadata(_)));
    }
}
