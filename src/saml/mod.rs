//! SAML 2.0 service provider core.
//!
//! Submodules mirror the component split of the design this crate
//! implements: key material, IdP metadata, SP metadata, AuthnRequest
//! construction, the response schema, the crypto engine adapter, the
//! acceptance pipeline, and the top-level `ServiceProvider` that wires
//! them together behind the axum handlers.

pub mod authn_request;
pub mod crypto;
pub mod handlers;
pub mod idp_metadata;
pub mod key_material;
pub mod metadata;
pub mod pipeline;
pub mod request_cache;
pub mod schema;
pub mod service_provider;

pub use service_provider::ServiceProvider;
