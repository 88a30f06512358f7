//! SAML 2.0 service provider core: AuthnRequest construction, SAMLResponse
//! acceptance, SP metadata, and IdP metadata resolution.

pub mod config;
pub mod error;
pub mod saml;

pub use config::{SecurityOpts, ServiceProviderConfig, SpKeySource};
pub use error::{SpError, SpResult};
pub use saml::ServiceProvider;
