//! Shibboleth/SAML session cookie acquisition and reuse.
//!
//! [`login::LoginClient`] drives the IdP login form and yields a
//! [`session::SessionCookie`]; [`caller::ServiceCaller`] calls a cookie-protected
//! service with it and logs in again once when the service redirects.

pub mod caller;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod form;
pub mod jar;
pub mod login;
pub mod server;
pub mod session;
