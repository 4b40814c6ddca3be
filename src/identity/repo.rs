//! Persistence contracts consumed by the admission chain.
//!
//! Both traits are object safe so the server can hold them as `Arc<dyn _>` and
//! tests can swap in the in-memory store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use super::models::{NewUser, Permissions, User};
use super::token::{Scope, Token};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("edit conflict")]
    EditConflict,
    #[error("duplicate email")]
    DuplicateEmail,
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Token and user records.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Persist a freshly minted token.
    async fn insert_token(&self, token: &Token) -> Result<(), StoreError>;

    /// Drop every token of `scope` owned by `user_id`; returns how many were removed.
    async fn delete_tokens_for_scope(&self, user_id: i64, scope: Scope) -> Result<u64, StoreError>;

    /// Drop every token whose expiry is at or before `now`.
    async fn delete_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Resolve the owner of a token with this digest and scope whose expiry is after `now`.
    ///
    /// Unknown, expired and wrong-scope tokens all yield [`StoreError::NotFound`].
    async fn find_user_for_token(
        &self,
        hash: &[u8],
        scope: Scope,
        now: DateTime<Utc>,
    ) -> Result<User, StoreError>;

    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError>;

    async fn get_user_by_email(&self, email: &str) -> Result<User, StoreError>;

    /// Write `user` back only if its `version` still matches the stored one.
    ///
    /// On success `user.version` is advanced; a stale version yields
    /// [`StoreError::EditConflict`] and nothing is written.
    async fn update_user(&self, user: &mut User) -> Result<(), StoreError>;

    async fn delete_user_by_email(&self, email: &str) -> Result<(), StoreError>;
}

/// Permission codes granted to users.
#[async_trait]
pub trait PermissionResolver: Send + Sync {
    async fn permissions_for_user(&self, user_id: i64) -> Result<Permissions, StoreError>;

    async fn add_permissions_for_user(&self, user_id: i64, codes: &[&str])
    -> Result<(), StoreError>;
}
