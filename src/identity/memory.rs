//! In-memory store used by unit and end-to-end tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard, PoisonError},
};

use super::models::{NewUser, Permissions, User};
use super::repo::{CredentialStore, PermissionResolver, StoreError};
use super::token::{Scope, Token};

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    users: HashMap<i64, User>,
    tokens: Vec<Token>,
    permissions: HashMap<i64, HashSet<String>>,
}

#[derive(Debug, Default)]
pub(crate) struct MemoryStore {
    tables: Mutex<Tables>,
    failing_lookups: bool,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every lookup and permission query fails with a non-`NotFound` error.
    pub(crate) fn with_failing_lookups() -> Self {
        Self {
            failing_lookups: true,
            ..Self::default()
        }
    }

    pub(crate) fn token_count(&self) -> usize {
        self.lock().tokens.len()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.failing_lookups {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn insert_token(&self, token: &Token) -> Result<(), StoreError> {
        self.lock().tokens.push(token.clone());
        Ok(())
    }

    async fn delete_tokens_for_scope(&self, user_id: i64, scope: Scope) -> Result<u64, StoreError> {
        let mut tables = self.lock();
        let before = tables.tokens.len();
        tables
            .tokens
            .retain(|token| !(token.user_id == user_id && token.scope == scope));
        Ok((before - tables.tokens.len()) as u64)
    }

    async fn delete_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.lock();
        let before = tables.tokens.len();
        tables.tokens.retain(|token| token.expiry > now);
        Ok((before - tables.tokens.len()) as u64)
    }

    async fn find_user_for_token(
        &self,
        hash: &[u8],
        scope: Scope,
        now: DateTime<Utc>,
    ) -> Result<User, StoreError> {
        self.check_available()?;
        let tables = self.lock();
        tables
            .tokens
            .iter()
            .find(|token| token.hash == hash && token.is_valid_at(scope, now))
            .and_then(|token| tables.users.get(&token.user_id))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut tables = self.lock();
        if tables.users.values().any(|existing| existing.email == user.email) {
            return Err(StoreError::DuplicateEmail);
        }
        tables.next_id += 1;
        let stored = User {
            id: tables.next_id,
            created_at: Utc::now(),
            name: user.name,
            description: user.description,
            nationality: user.nationality,
            birthday: user.birthday,
            email: user.email,
            password: user.password,
            activated: user.activated,
            verified_pro: user.verified_pro,
            version: 1,
        };
        tables.users.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_user_by_email(&self, email: &str) -> Result<User, StoreError> {
        self.check_available()?;
        self.lock()
            .users
            .values()
            .find(|user| user.email == email)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update_user(&self, user: &mut User) -> Result<(), StoreError> {
        let mut tables = self.lock();
        if tables
            .users
            .values()
            .any(|existing| existing.id != user.id && existing.email == user.email)
        {
            return Err(StoreError::DuplicateEmail);
        }
        let Some(stored) = tables.users.get_mut(&user.id) else {
            return Err(StoreError::EditConflict);
        };
        if stored.version != user.version {
            return Err(StoreError::EditConflict);
        }
        user.version += 1;
        *stored = user.clone();
        Ok(())
    }

    async fn delete_user_by_email(&self, email: &str) -> Result<(), StoreError> {
        let mut tables = self.lock();
        let Some(id) = tables
            .users
            .values()
            .find(|user| user.email == email)
            .map(|user| user.id)
        else {
            return Err(StoreError::NotFound);
        };
        tables.users.remove(&id);
        tables.tokens.retain(|token| token.user_id != id);
        tables.permissions.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl PermissionResolver for MemoryStore {
    async fn permissions_for_user(&self, user_id: i64) -> Result<Permissions, StoreError> {
        self.check_available()?;
        Ok(self
            .lock()
            .permissions
            .get(&user_id)
            .map(|codes| codes.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn add_permissions_for_user(
        &self,
        user_id: i64,
        codes: &[&str],
    ) -> Result<(), StoreError> {
        self.lock()
            .permissions
            .entry(user_id)
            .or_default()
            .extend(codes.iter().map(ToString::to_string));
        Ok(())
    }
}

/// A user ready to insert; `activated` controls the activation flag.
pub(crate) fn new_user(email: &str, activated: bool) -> NewUser {
    use super::models::Password;
    use chrono::NaiveDate;

    NewUser {
        name: "Faker".to_string(),
        description: "mid laner".to_string(),
        nationality: "KR".to_string(),
        birthday: NaiveDate::from_ymd_opt(1996, 5, 7).unwrap_or_default(),
        email: email.to_string(),
        password: Password::from_hash(String::new()),
        activated,
        verified_pro: false,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use std::time::Duration;

    async fn store_with_user(activated: bool) -> (MemoryStore, User) {
        let store = MemoryStore::new();
        let user = store
            .insert_user(new_user("faker@t1.gg", activated))
            .await
            .unwrap();
        (store, user)
    }

    #[tokio::test]
    async fn find_user_for_token_honours_expiry_boundary() {
        let (store, user) = store_with_user(true).await;
        let now = Utc::now();
        let (_, token) =
            Token::generate_at(user.id, Duration::from_secs(60), Scope::Authentication, now)
                .unwrap();
        store.insert_token(&token).await.unwrap();

        let found = store
            .find_user_for_token(&token.hash, Scope::Authentication, now)
            .await
            .unwrap();
        assert_eq!(found.id, user.id);

        let at_expiry = store
            .find_user_for_token(&token.hash, Scope::Authentication, token.expiry)
            .await;
        assert!(matches!(at_expiry, Err(StoreError::NotFound)));

        let after = store
            .find_user_for_token(
                &token.hash,
                Scope::Authentication,
                token.expiry + TimeDelta::seconds(1),
            )
            .await;
        assert!(matches!(after, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn find_user_for_token_rejects_other_scope() {
        let (store, user) = store_with_user(true).await;
        let (_, token) =
            Token::generate(user.id, Duration::from_secs(60), Scope::PasswordReset).unwrap();
        store.insert_token(&token).await.unwrap();

        let result = store
            .find_user_for_token(&token.hash, Scope::Authentication, Utc::now())
            .await;
        assert!(matches!(result, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn update_user_rejects_stale_version() {
        let (store, user) = store_with_user(false).await;
        let mut first = user.clone();
        let mut second = user;

        first.activated = true;
        store.update_user(&mut first).await.unwrap();
        assert_eq!(first.version, 2);

        second.name = "Hide on bush".to_string();
        let result = store.update_user(&mut second).await;
        assert!(matches!(result, Err(StoreError::EditConflict)));

        let stored = store.get_user_by_email("faker@t1.gg").await.unwrap();
        assert!(stored.activated);
        assert_eq!(stored.name, "Faker");
    }

    #[tokio::test]
    async fn insert_user_rejects_duplicate_email() {
        let (store, _) = store_with_user(true).await;
        let result = store.insert_user(new_user("faker@t1.gg", false)).await;
        assert!(matches!(result, Err(StoreError::DuplicateEmail)));
    }

    #[tokio::test]
    async fn delete_tokens_for_scope_keeps_other_scopes() {
        let (store, user) = store_with_user(true).await;
        for scope in [Scope::Authentication, Scope::Authentication, Scope::Activation] {
            let (_, token) = Token::generate(user.id, Duration::from_secs(60), scope).unwrap();
            store.insert_token(&token).await.unwrap();
        }

        let removed = store
            .delete_tokens_for_scope(user.id, Scope::Authentication)
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.token_count(), 1);
    }

    #[tokio::test]
    async fn delete_expired_tokens_removes_only_expired() {
        let (store, user) = store_with_user(true).await;
        let now = Utc::now();
        let (_, short) =
            Token::generate_at(user.id, Duration::from_secs(1), Scope::Authentication, now)
                .unwrap();
        let (_, long) =
            Token::generate_at(user.id, Duration::from_secs(600), Scope::Authentication, now)
                .unwrap();
        store.insert_token(&short).await.unwrap();
        store.insert_token(&long).await.unwrap();

        let removed = store
            .delete_expired_tokens(now + TimeDelta::seconds(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.token_count(), 1);
    }

    #[tokio::test]
    async fn delete_user_by_email_reports_missing() {
        let (store, _) = store_with_user(true).await;
        store.delete_user_by_email("faker@t1.gg").await.unwrap();
        let result = store.delete_user_by_email("faker@t1.gg").await;
        assert!(matches!(result, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn permissions_are_flat_codes() {
        let (store, user) = store_with_user(true).await;
        assert!(store.permissions_for_user(user.id).await.unwrap().is_empty());

        store
            .add_permissions_for_user(user.id, &["admin", "user"])
            .await
            .unwrap();
        let permissions = store.permissions_for_user(user.id).await.unwrap();
        assert!(permissions.includes("admin"));
        assert!(permissions.includes("user"));
        assert!(!permissions.includes("moderator"));
    }
}
