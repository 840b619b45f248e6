//! services/companion/src/adapters/auth.rs
//!
//! The authentication adapter: implements the `AuthService` port over the same
//! SQLite database as the document store. Passwords are hashed with argon2, and
//! the signed-in principal is published on a `watch` channel so that every
//! `auth_state_changes` subscriber sees sign-ins and sign-outs.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, Params,
};
use async_trait::async_trait;
use chrono::Utc;
use minduni_core::domain::{Principal, UserId};
use minduni_core::ports::{AuthService, AuthStateStream, PortError, PortResult};
use sqlx::{FromRow, SqlitePool};
use tokio::sync::watch;
use tracing::{error, info};
use uuid::Uuid;

use crate::adapters::db::db_error;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `AuthService` with locally stored, hashed credentials.
pub struct AuthAdapter {
    pool: SqlitePool,
    project_id: String,
    min_password_len: usize,
    hasher: Argon2<'static>,
    current: watch::Sender<Option<Principal>>,
}

impl AuthAdapter {
    /// Creates a new `AuthAdapter` scoped to one project. Nobody is signed in.
    pub fn new(pool: SqlitePool, project_id: impl Into<String>, min_password_len: usize) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            pool,
            project_id: project_id.into(),
            min_password_len,
            hasher: Argon2::default(),
            current,
        }
    }

    /// Overrides the argon2 cost parameters used for new hashes.
    pub fn with_hash_params(mut self, params: Params) -> Self {
        self.hasher = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);
        self
    }

    fn hash_password(&self, password: &str) -> PortResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.hasher
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| {
                error!("Failed to hash password: {:?}", e);
                PortError::Unexpected("Failed to hash password".to_string())
            })
    }

    fn verify_password(&self, password: &str, hashed: &str) -> PortResult<bool> {
        let parsed_hash = PasswordHash::new(hashed).map_err(|e| {
            error!("Failed to parse password hash: {:?}", e);
            PortError::Unexpected("Authentication error".to_string())
        })?;
        Ok(self
            .hasher
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }
}

#[derive(FromRow)]
struct CredentialsRecord {
    uid: String,
    email: String,
    hashed_password: String,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// A deliberately loose shape check; the real proof of ownership is out of scope.
fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .map_or(false, |(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}

//=========================================================================================
// `AuthService` Trait Implementation
//=========================================================================================

#[async_trait]
impl AuthService for AuthAdapter {
    async fn sign_in(&self, email: &str, password: &str) -> PortResult<Principal> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(PortError::InvalidEmail(email));
        }

        // 1. Get credentials by email
        let record = sqlx::query_as::<_, CredentialsRecord>(
            "SELECT uid, email, hashed_password FROM principals WHERE project_id = ? AND email = ?",
        )
        .bind(&self.project_id)
        .bind(&email)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .ok_or(PortError::UserNotFound)?;

        // 2. Verify password
        if !self.verify_password(password, &record.hashed_password)? {
            return Err(PortError::InvalidCredentials);
        }

        // 3. Publish the new auth state
        let principal = Principal {
            uid: UserId::new(record.uid),
            email: record.email,
        };
        self.current.send_replace(Some(principal.clone()));
        info!("Principal {} signed in.", principal.uid);
        Ok(principal)
    }

    async fn sign_up(&self, email: &str, password: &str) -> PortResult<Principal> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(PortError::InvalidEmail(email));
        }
        if password.chars().count() < self.min_password_len {
            return Err(PortError::WeakPassword(format!(
                "must be at least {} characters",
                self.min_password_len
            )));
        }

        // 1. Reject duplicates before paying for a hash
        let existing: Option<String> = sqlx::query_scalar(
            "SELECT uid FROM principals WHERE project_id = ? AND email = ?",
        )
        .bind(&self.project_id)
        .bind(&email)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        if existing.is_some() {
            return Err(PortError::EmailAlreadyInUse);
        }

        // 2. Hash the password and create the principal
        let password_hash = self.hash_password(password)?;
        let uid = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO principals (uid, project_id, email, hashed_password, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&uid)
        .bind(&self.project_id)
        .bind(&email)
        .bind(&password_hash)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => PortError::EmailAlreadyInUse,
            other => db_error(other),
        })?;

        // 3. New principals are signed in straight away
        let principal = Principal {
            uid: UserId::new(uid),
            email,
        };
        self.current.send_replace(Some(principal.clone()));
        info!("Principal {} created.", principal.uid);
        Ok(principal)
    }

    async fn sign_out(&self) -> PortResult<()> {
        if let Some(previous) = self.current.send_replace(None) {
            info!("Principal {} signed out.", previous.uid);
        }
        Ok(())
    }

    fn current_principal(&self) -> Option<Principal> {
        self.current.borrow().clone()
    }

    fn auth_state_changes(&self) -> AuthStateStream {
        let mut rx = self.current.subscribe();
        Box::pin(async_stream::stream! {
            let initial = rx.borrow_and_update().clone();
            yield initial;
            while rx.changed().await.is_ok() {
                let next = rx.borrow_and_update().clone();
                yield next;
            }
        })
    }
}
