//! Identity records and the persistence contracts the admission chain reads.
//!
//! Flow Overview:
//! - `models` holds users, the anonymous caller and password hashes.
//! - `token` mints opaque credentials and derives the digest that is stored.
//! - `repo` defines the credential store and permission resolver contracts.
//! - `postgres` implements both contracts over a `PgPool` with bounded queries.

pub mod models;
pub mod postgres;
pub mod repo;
pub mod token;

#[cfg(test)]
pub(crate) mod memory;

pub use models::{Identity, NewUser, Password, Permissions, User};
pub use postgres::PgStore;
pub use repo::{CredentialStore, PermissionResolver, StoreError};
pub use token::{Scope, Token};
