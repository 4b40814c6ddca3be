//! `PostgreSQL` implementation of the credential store and permission resolver.
//!
//! Every statement is bounded by `query_timeout` so a stalled database cannot pin
//! a request; an elapsed timeout surfaces as [`StoreError::Timeout`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::{future::Future, time::Duration};
use tracing::Instrument;

use super::models::{NewUser, Permissions, User};
use super::repo::{CredentialStore, PermissionResolver, StoreError};
use super::token::{Scope, Token};

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
    query_timeout: Duration,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_query_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = query_timeout;
        self
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn bounded<T, F>(
        &self,
        operation: &'static str,
        query: &'static str,
        fut: F,
    ) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = operation,
            db.statement = query
        );
        match tokio::time::timeout(self.query_timeout, fut.instrument(span)).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout(self.query_timeout)),
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn insert_token(&self, token: &Token) -> Result<(), StoreError> {
        let query = "INSERT INTO tokens (hash, user_id, expiry, scope) VALUES ($1, $2, $3, $4)";
        self.bounded(
            "INSERT",
            query,
            sqlx::query(query)
                .bind(&token.hash)
                .bind(token.user_id)
                .bind(token.expiry)
                .bind(token.scope.as_str())
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn delete_tokens_for_scope(&self, user_id: i64, scope: Scope) -> Result<u64, StoreError> {
        let query = "DELETE FROM tokens WHERE scope = $1 AND user_id = $2";
        let result = self
            .bounded(
                "DELETE",
                query,
                sqlx::query(query)
                    .bind(scope.as_str())
                    .bind(user_id)
                    .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let query = "DELETE FROM tokens WHERE expiry <= $1";
        let result = self
            .bounded("DELETE", query, sqlx::query(query).bind(now).execute(&self.pool))
            .await?;
        Ok(result.rows_affected())
    }

    async fn find_user_for_token(
        &self,
        hash: &[u8],
        scope: Scope,
        now: DateTime<Utc>,
    ) -> Result<User, StoreError> {
        let query = r"
            SELECT users.id, users.created_at, users.name, users.description,
                   users.nationality, users.birthday, users.email, users.password_hash,
                   users.activated, users.verified_pro, users.version
            FROM users
            INNER JOIN tokens ON users.id = tokens.user_id
            WHERE tokens.hash = $1
              AND tokens.scope = $2
              AND tokens.expiry > $3
        ";
        self.bounded(
            "SELECT",
            query,
            sqlx::query_as::<_, User>(query)
                .bind(hash)
                .bind(scope.as_str())
                .bind(now)
                .fetch_optional(&self.pool),
        )
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
        let query = r"
            INSERT INTO users
                (name, description, nationality, birthday, email, password_hash, activated, verified_pro)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, created_at, version
        ";
        let row = self
            .bounded(
                "INSERT",
                query,
                sqlx::query(query)
                    .bind(&user.name)
                    .bind(&user.description)
                    .bind(&user.nationality)
                    .bind(user.birthday)
                    .bind(&user.email)
                    .bind(user.password.as_hash())
                    .bind(user.activated)
                    .bind(user.verified_pro)
                    .fetch_one(&self.pool),
            )
            .await
            .map_err(|err| match err {
                StoreError::Database(db_err) if is_unique_violation(&db_err) => {
                    StoreError::DuplicateEmail
                }
                other => other,
            })?;

        Ok(User {
            id: row.try_get("id")?,
            created_at: row.try_get("created_at")?,
            version: row.try_get("version")?,
            name: user.name,
            description: user.description,
            nationality: user.nationality,
            birthday: user.birthday,
            email: user.email,
            password: user.password,
            activated: user.activated,
            verified_pro: user.verified_pro,
        })
    }

    async fn get_user_by_email(&self, email: &str) -> Result<User, StoreError> {
        let query = "SELECT id, created_at, name, description, nationality, birthday, email, \
                     password_hash, activated, verified_pro, version FROM users WHERE email = $1";
        self.bounded(
            "SELECT",
            query,
            sqlx::query_as::<_, User>(query)
                .bind(email)
                .fetch_optional(&self.pool),
        )
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn update_user(&self, user: &mut User) -> Result<(), StoreError> {
        let query = r"
            UPDATE users
            SET name = $1, description = $2, nationality = $3, birthday = $4, email = $5,
                password_hash = $6, activated = $7, verified_pro = $8, version = version + 1
            WHERE id = $9 AND version = $10
            RETURNING version
        ";
        let row = self
            .bounded(
                "UPDATE",
                query,
                sqlx::query(query)
                    .bind(&user.name)
                    .bind(&user.description)
                    .bind(&user.nationality)
                    .bind(user.birthday)
                    .bind(&user.email)
                    .bind(user.password.as_hash())
                    .bind(user.activated)
                    .bind(user.verified_pro)
                    .bind(user.id)
                    .bind(user.version)
                    .fetch_optional(&self.pool),
            )
            .await
            .map_err(|err| match err {
                StoreError::Database(db_err) if is_unique_violation(&db_err) => {
                    StoreError::DuplicateEmail
                }
                other => other,
            })?;

        // No row back means the id is gone or someone else bumped the version first.
        let row = row.ok_or(StoreError::EditConflict)?;
        user.version = row.try_get("version")?;
        Ok(())
    }

    async fn delete_user_by_email(&self, email: &str) -> Result<(), StoreError> {
        let query = "DELETE FROM users WHERE email = $1";
        let result = self
            .bounded("DELETE", query, sqlx::query(query).bind(email).execute(&self.pool))
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl PermissionResolver for PgStore {
    async fn permissions_for_user(&self, user_id: i64) -> Result<Permissions, StoreError> {
        let query = r"
            SELECT permissions.code
            FROM permissions
            INNER JOIN users_permissions ON users_permissions.permission_id = permissions.id
            WHERE users_permissions.user_id = $1
        ";
        let rows = self
            .bounded(
                "SELECT",
                query,
                sqlx::query(query).bind(user_id).fetch_all(&self.pool),
            )
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("code"))
            .collect::<Result<Permissions, _>>()
            .map_err(StoreError::from)
    }

    async fn add_permissions_for_user(
        &self,
        user_id: i64,
        codes: &[&str],
    ) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO users_permissions (user_id, permission_id)
            SELECT $1, permissions.id FROM permissions WHERE permissions.code = ANY($2)
            ON CONFLICT DO NOTHING
        ";
        let codes: Vec<String> = codes.iter().map(ToString::to_string).collect();
        self.bounded(
            "INSERT",
            query,
            sqlx::query(query)
                .bind(user_id)
                .bind(codes)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }
}
