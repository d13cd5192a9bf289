//! Broker session credentials
//!
//! Feed adapters never log in themselves. They ask a [`CredentialStore`]
//! for the tokens of an already authenticated user session.

#![deny(clippy::all)]
#![allow(clippy::multiple_crate_versions)]

pub mod credentials;
pub mod session;

pub use credentials::{
    CredentialError, CredentialField, CredentialStore, EnvCredentialStore,
    InMemoryCredentialStore, SessionCredentials,
};
pub use session::{FileSessionStore, SessionCache};
