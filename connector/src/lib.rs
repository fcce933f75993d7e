//! User repository access for the Oura source connector.
//!
//! The connector polls Oura on behalf of users registered in a separate
//! repository service. This crate keeps that repository's user directory
//! and each user's OAuth2 token cached, and exposes both through
//! [`repository::UserRepository`].

#![allow(missing_docs)]

pub mod cache;
pub mod client;
pub mod client_credentials;
pub mod credentials;
pub mod error;
pub mod http;
pub mod ingest;
pub mod metrics;
pub mod repository;
pub mod user;

pub use error::{RepositoryError, Result};
pub use repository::{RepositoryOptions, ServiceUserRepository, UserRepository};
pub use user::{OAuth2Credentials, User};
