//! `AuthnRequest` construction and HTTP-Redirect binding dispatch.
//!
//! Builds the request XML with `format!`, matching this codebase's
//! existing XML-assembly idiom, then deflates, base64-encodes, and
//! URL-encodes it per the HTTP-Redirect binding (SAML core 3.4.4.1 /
//! bindings 3.4.4).

use std::io::Write;

use chrono::Utc;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use uuid::Uuid;

use crate::error::{SpError, SpResult};
use crate::saml::schema::HTTP_REDIRECT_BINDING;

#[derive(Debug, Clone)]
pub struct AuthnRequest {
    pub id: String,
    pub issue_instant: chrono::DateTime<Utc>,
    pub destination: String,
    pub xml: String,
}

/// Emits a fresh, never-before-seen request ID. Prefixed with `_`
/// because SAML IDs must be valid xs:ID values, which cannot start with
/// a digit, and a UUID's hex form can.
fn new_request_id() -> String {
    format!("_{}", Uuid::new_v4())
}

pub fn build_authn_request(
    sp_entity_id: &str,
    acs_url: &str,
    idp_sso_url: &str,
    name_id_format: &str,
) -> AuthnRequest {
    let id = new_request_id();
    let issue_instant = Utc::now();

    let xml = format!(
        r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"
                    xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion"
                    ID="{id}"
                    Version="2.0"
                    IssueInstant="{issue_instant}"
                    Destination="{destination}"
                    AssertionConsumerServiceURL="{acs_url}"
                    ProtocolBinding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST">
  <saml:Issuer>{sp_entity_id}</saml:Issuer>
  <samlp:NameIDPolicy Format="{name_id_format}" AllowCreate="true"/>
</samlp:AuthnRequest>"#,
        id = id,
        issue_instant = issue_instant.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        destination = idp_sso_url,
        acs_url = acs_url,
        sp_entity_id = sp_entity_id,
        name_id_format = name_id_format,
    );

    AuthnRequest { id, issue_instant, destination: idp_sso_url.to_string(), xml }
}

fn deflate_compress(data: &[u8]) -> SpResult<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| SpError::Internal(format!("deflating AuthnRequest: {e}")))?;
    encoder
        .finish()
        .map_err(|e| SpError::Internal(format!("finishing deflate stream: {e}")))
}

/// Encodes an `AuthnRequest` for the HTTP-Redirect binding and returns
/// the full `Location` URL: deflate, base64, then URL-encode into the
/// `SAMLRequest` query parameter, with an optional `RelayState` placed
/// first in the query string, per the binding's signing convention
/// (`RelayState` participates in the signed query string ahead of
/// `SAMLRequest`/`SigAlg`).
pub fn redirect_url(request: &AuthnRequest, relay_state: Option<&str>) -> SpResult<String> {
    let compressed = deflate_compress(request.xml.as_bytes())?;
    let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &compressed);
    let url_encoded = urlencoding::encode(&encoded);

    let mut url = format!("{destination}?", destination = request.destination);
    if let Some(relay) = relay_state {
        url.push_str(&format!("RelayState={}&", urlencoding::encode(relay)));
    }
    url.push_str(&format!("SAMLRequest={url_encoded}"));
    Ok(url)
}

/// Encodes an `AuthnRequest` for the HTTP-POST binding: plain base64,
/// no deflate (POST bodies aren't length-constrained like redirect
/// query strings), suitable for embedding in an auto-submitting form.
pub fn post_body(request: &AuthnRequest) -> String {
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, request.xml.as_bytes())
}

pub const PREFERRED_BINDING: &str = HTTP_REDIRECT_BINDING;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_unique_and_not_digit_prefixed() {
        let a = build_authn_request("https://sp.example.com", "https://sp.example.com/acs", "https://idp.example.com/sso", "urn:oasis:names:tc:SAML:2.0:nameid-format:unspecified");
        let b = build_authn_request("https://sp.example.com", "https://sp.example.com/acs", "https://idp.example.com/sso", "urn:oasis:names:tc:SAML:2.0:nameid-format:unspecified");
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with('_'));
    }

    #[test]
    fn redirect_url_round_trips_through_deflate_and_base64() {
        let request = build_authn_request("https://sp.example.com", "https://sp.example.com/acs", "https://idp.example.com/sso", "urn:oasis:names:tc:SAML:2.0:nameid-format:unspecified");
        let url = redirect_url(&request, Some("/return")).expect("redirect url");
        assert!(url.starts_with("https://idp.example.com/sso?RelayState=%2Freturn&SAMLRequest="));

        let query_start = url.find("SAMLRequest=").unwrap() + "SAMLRequest=".len();
        let saml_request_param = &url[query_start..];
        let decoded_b64 = urlencoding::decode(saml_request_param).unwrap();
        let compressed = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, decoded_b64.as_bytes()).unwrap();

        use std::io::Read;
        let mut decoder = flate2::read::DeflateDecoder::new(&compressed[..]);
        let mut xml = String::new();
        decoder.read_to_string(&mut xml).unwrap();
        assert!(xml.contains(&request.id));
    }
}
