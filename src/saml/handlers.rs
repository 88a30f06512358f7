//! axum endpoints: `GET` login, `GET` metadata, `POST` acs.
//!
//! The accepted assertion is handed to the rest of the application as a
//! typed `axum::Extension<AcceptedAssertion>` rather than an untyped,
//! string-keyed request-context map — callers that need the NameID or
//! attributes get them off a concrete struct, not a lookup that can
//! silently miss a key.

use std::sync::Arc;

use axum::extract::{Form, Query, State};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;

use crate::error::SpError;
use crate::saml::service_provider::{LoginDispatch, ServiceProvider};

pub fn saml_routes() -> Router<Arc<ServiceProvider>> {
    Router::new()
        .route("/login", get(login))
        .route("/metadata", get(metadata))
        .route("/acs", post(acs))
}

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    #[serde(rename = "RelayState")]
    relay_state: Option<String>,
}

async fn login(State(sp): State<Arc<ServiceProvider>>, Query(query): Query<LoginQuery>) -> Result<Response, SpError> {
    let dispatch = sp.start_login(query.relay_state.as_deref()).await?;
    Ok(match dispatch {
        LoginDispatch::Redirect(url) => Redirect::to(&url).into_response(),
        LoginDispatch::Post { action, saml_request, relay_state } => {
            Html(auto_submit_form(&action, &saml_request, relay_state.as_deref())).into_response()
        }
    })
}

async fn metadata(State(sp): State<Arc<ServiceProvider>>) -> Result<Response, SpError> {
    let xml = sp.metadata_xml()?;
    Ok(([(axum::http::header::CONTENT_TYPE, "application/samlmetadata+xml")], xml).into_response())
}

#[derive(Debug, Deserialize)]
pub struct AcsForm {
    #[serde(rename = "SAMLResponse")]
    saml_response: String,
    #[serde(rename = "RelayState")]
    relay_state: Option<String>,
}

async fn acs(State(sp): State<Arc<ServiceProvider>>, Form(form): Form<AcsForm>) -> Result<Response, SpError> {
    let assertion = sp.accept_response(&form.saml_response).await?;
    // A real deployment would establish a session here and redirect to
    // `form.relay_state`; this crate's scope ends at handing the
    // downstream application a trusted, typed assertion.
    let mut response = axum::Json(serde_json::json!({
        "assertion_id": assertion.assertion_id,
        "name_id": assertion.name_id,
        "session_index": assertion.session_index,
        "attributes": assertion.attributes,
    }))
    .into_response();
    response.extensions_mut().insert(assertion);
    if let Some(relay_state) = form.relay_state {
        response.extensions_mut().insert(RelayState(relay_state));
    }
    Ok(response)
}

/// Carries `RelayState` alongside the accepted assertion in the
/// response extensions, for a host that wants to redirect the browser
/// onward after establishing a session.
#[derive(Debug, Clone)]
pub struct RelayState(pub String);

fn auto_submit_form(action: &str, saml_request: &str, relay_state: Option<&str>) -> String {
    let relay_input = relay_state
        .map(|value| format!(r#"<input type="hidden" name="RelayState" value="{value}"/>"#))
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html>
<body onload="document.forms[0].submit()">
  <form method="post" action="{action}">
    <input type="hidden" name="SAMLRequest" value="{saml_request}"/>
    {relay_input}
    <noscript><input type="submit" value="Continue"/></noscript>
  </form>
</body>
</html>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_submit_form_embeds_request_and_relay_state() {
        let html = auto_submit_form("https://idp.example.com/sso", "bG9ycA==", Some("/after"));
        assert!(html.contains("action=\"https://idp.example.com/sso\""));
        assert!(html.contains("value=\"bG9ycA==\""));
        assert!(html.contains("name=\"RelayState\" value=\"/after\""));
    }
}
