//! Sessions and the per-session workspace
//!
//! A `Session` exists from a successful sign-in until sign-out or expiry.
//! Every protected request resolves its bearer token through
//! [`SessionGate::authenticate`]; nothing else decides whether a caller is
//! signed in.
//!
//! Each session owns a `Workspace` holding its own selector, form and
//! listing, so two signed-in users never share controller state.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use preg_common::auth::{generate_session_token, hash_password, verify_password, MIN_PASSWORD_LEN};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::listing::{ListingController, PageSize};
use crate::location::LocationSource;
use crate::outbox::Outbox;
use crate::selector::SelectorController;
use crate::store::RecordStore;
use crate::submission::{FormError, SubmissionController, SubmitOutcome};

/// Authentication errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid email address")]
    InvalidEmail,

    #[error("Password must be at least {} characters", MIN_PASSWORD_LEN)]
    PasswordTooShort,

    #[error("Passwords do not match")]
    PasswordMismatch,

    #[error("An account with this email already exists")]
    EmailTaken,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Not signed in")]
    Unauthenticated,

    #[error("Session expired")]
    Expired,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Credential error: {0}")]
    Credentials(#[from] preg_common::Error),
}

/// A signed-up account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub user_id: String,
    pub email: String,
}

/// Account store and credential check
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Create an account; the password has already passed policy checks
    async fn create_account(&self, email: &str, password: &str) -> Result<Identity, SessionError>;

    /// Resolve an account from its credentials
    async fn verify(&self, email: &str, password: &str) -> Result<Identity, SessionError>;
}

/// Accounts in the local `users` table
pub struct LocalIdentityProvider {
    db: SqlitePool,
}

impl LocalIdentityProvider {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn create_account(&self, email: &str, password: &str) -> Result<Identity, SessionError> {
        let existing = sqlx::query("SELECT guid FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.db)
            .await?;
        if existing.is_some() {
            return Err(SessionError::EmailTaken);
        }

        let user_id = Uuid::new_v4().to_string();
        let hash = hash_password(password)?;

        let inserted = sqlx::query("INSERT INTO users (guid, email, password_hash) VALUES (?, ?, ?)")
            .bind(&user_id)
            .bind(email)
            .bind(&hash)
            .execute(&self.db)
            .await;

        match inserted {
            Ok(_) => Ok(Identity {
                user_id,
                email: email.to_string(),
            }),
            // Lost a race with a concurrent signup for the same address
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(SessionError::EmailTaken)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn verify(&self, email: &str, password: &str) -> Result<Identity, SessionError> {
        let row = sqlx::query("SELECT guid, email, password_hash FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.db)
            .await?
            .ok_or(SessionError::InvalidCredentials)?;

        let hash: String = row.try_get("password_hash")?;

        if !verify_password(password, &hash)? {
            return Err(SessionError::InvalidCredentials);
        }

        Ok(Identity {
            user_id: row.try_get("guid")?,
            email: row.try_get("email")?,
        })
    }
}

/// Per-session controllers
pub struct Workspace {
    pub selector: SelectorController,
    pub form: Mutex<SubmissionController>,
    pub listing: Mutex<ListingController>,
}

impl Workspace {
    /// Submit the form with the current location selection
    ///
    /// On success both the form and the selection are cleared for the next
    /// registration; the district options stay loaded. A location picked
    /// while the record was being queued is kept.
    pub async fn submit(&self) -> Result<SubmitOutcome, FormError> {
        let mut form = self.form.lock().await;
        let selection = self.selector.selection();
        let outcome = form.submit(&selection).await?;
        if !self.selector.reset_selection_if(&selection) {
            debug!("Location changed during submit; keeping the new selection");
        }
        Ok(outcome)
    }
}

/// Collaborators every new workspace is built from
#[derive(Clone)]
pub struct WorkspaceFactory {
    pub location: Arc<dyn LocationSource>,
    pub store: Arc<dyn RecordStore>,
    pub outbox: Outbox,
    pub page_size: PageSize,
}

impl WorkspaceFactory {
    pub fn build(&self) -> Workspace {
        Workspace {
            selector: SelectorController::new(self.location.clone()),
            form: Mutex::new(SubmissionController::new(self.outbox.clone())),
            listing: Mutex::new(ListingController::new(self.store.clone(), self.page_size)),
        }
    }
}

/// An authenticated session
pub struct Session {
    pub token: String,
    pub identity: Identity,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub workspace: Workspace,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Public view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub user_id: String,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

impl From<&Session> for SessionInfo {
    fn from(session: &Session) -> Self {
        Self {
            user_id: session.identity.user_id.clone(),
            email: session.identity.email.clone(),
            expires_at: session.expires_at,
        }
    }
}

fn normalize_email(raw: &str) -> Result<String, SessionError> {
    let email = raw.trim();
    match email.split_once('@') {
        Some((local, domain))
            if !local.is_empty() && !domain.is_empty() && !email.contains(char::is_whitespace) =>
        {
            Ok(email.to_string())
        }
        _ => Err(SessionError::InvalidEmail),
    }
}

/// Owns every live session
pub struct SessionGate {
    identity: Arc<dyn IdentityProvider>,
    workspaces: WorkspaceFactory,
    ttl: Duration,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionGate {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        workspaces: WorkspaceFactory,
        ttl_minutes: i64,
    ) -> Self {
        Self {
            identity,
            workspaces,
            ttl: Duration::minutes(ttl_minutes.max(0)),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create an account; the caller signs in separately afterwards
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        confirm_password: &str,
    ) -> Result<Identity, SessionError> {
        let email = normalize_email(email)?;

        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(SessionError::PasswordTooShort);
        }
        if password != confirm_password {
            return Err(SessionError::PasswordMismatch);
        }

        let identity = self.identity.create_account(&email, password).await?;
        info!(user_id = %identity.user_id, "Account created");
        Ok(identity)
    }

    /// Check credentials and open a new session
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Arc<Session>, SessionError> {
        let email = email.trim();
        let identity = match self.identity.verify(email, password).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(error = %e, "Sign-in rejected");
                return Err(e);
            }
        };

        let now = Utc::now();
        let session = Arc::new(Session {
            token: generate_session_token(),
            identity,
            created_at: now,
            expires_at: now + self.ttl,
            workspace: self.workspaces.build(),
        });

        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, s| !s.is_expired(now));
        sessions.insert(session.token.clone(), session.clone());

        info!(
            user_id = %session.identity.user_id,
            active_sessions = sessions.len(),
            "Signed in"
        );
        Ok(session)
    }

    /// Destroy a session; returns whether it existed
    pub async fn sign_out(&self, token: &str) -> bool {
        let removed = self.sessions.write().await.remove(token);
        if let Some(session) = &removed {
            info!(user_id = %session.identity.user_id, "Signed out");
        }
        removed.is_some()
    }

    /// Resolve a bearer token to its live session
    ///
    /// Expired sessions are destroyed here.
    pub async fn authenticate(&self, token: &str) -> Result<Arc<Session>, SessionError> {
        let now = Utc::now();

        let session = self
            .sessions
            .read()
            .await
            .get(token)
            .cloned()
            .ok_or(SessionError::Unauthenticated)?;

        if session.is_expired(now) {
            self.sessions.write().await.remove(token);
            debug!(user_id = %session.identity.user_id, "Session expired");
            return Err(SessionError::Expired);
        }

        Ok(session)
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::LocationError;
    use crate::outbox::RetryPolicy;
    use crate::store::SqliteRecordStore;
    use preg_common::db::init::init_database;
    use tempfile::TempDir;

    struct NoLocations;

    #[async_trait]
    impl LocationSource for NoLocations {
        async fn districts(&self) -> Result<Vec<String>, LocationError> {
            Ok(vec!["Gasabo".into()])
        }

        async fn sectors(&self, _district: &str) -> Result<Vec<String>, LocationError> {
            Ok(vec!["Remera".into()])
        }

        async fn cells(&self, _district: &str, _sector: &str) -> Result<Vec<String>, LocationError> {
            Ok(vec!["Rukiri I".into()])
        }

        async fn villages(
            &self,
            _district: &str,
            _sector: &str,
            _cell: &str,
        ) -> Result<Vec<String>, LocationError> {
            Ok(vec!["Amahoro".into()])
        }
    }

    async fn setup(ttl_minutes: i64) -> (TempDir, SessionGate) {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("preg.db")).await.unwrap();
        let factory = WorkspaceFactory {
            location: Arc::new(NoLocations),
            store: Arc::new(SqliteRecordStore::new(pool.clone())),
            outbox: Outbox::new(
                pool.clone(),
                RetryPolicy {
                    max_attempts: 3,
                    base_backoff: std::time::Duration::from_millis(10),
                    max_backoff: std::time::Duration::from_millis(100),
                },
            ),
            page_size: PageSize::default(),
        };
        let gate = SessionGate::new(
            Arc::new(LocalIdentityProvider::new(pool)),
            factory,
            ttl_minutes,
        );
        (dir, gate)
    }

    #[tokio::test]
    async fn test_sign_up_policy() {
        let (_dir, gate) = setup(60).await;

        assert!(matches!(
            gate.sign_up("not-an-email", "secret1", "secret1").await,
            Err(SessionError::InvalidEmail)
        ));
        assert!(matches!(
            gate.sign_up("keza@example.rw", "short", "short").await,
            Err(SessionError::PasswordTooShort)
        ));
        assert!(matches!(
            gate.sign_up("keza@example.rw", "secret1", "secret2").await,
            Err(SessionError::PasswordMismatch)
        ));

        let identity = gate
            .sign_up(" keza@example.rw ", "secret1", "secret1")
            .await
            .unwrap();
        assert_eq!(identity.email, "keza@example.rw");

        assert!(matches!(
            gate.sign_up("KEZA@example.rw", "secret1", "secret1").await,
            Err(SessionError::EmailTaken)
        ));
    }

    #[tokio::test]
    async fn test_sign_in_and_out() {
        let (_dir, gate) = setup(60).await;
        gate.sign_up("keza@example.rw", "secret1", "secret1")
            .await
            .unwrap();

        assert!(matches!(
            gate.sign_in("keza@example.rw", "wrong-pass").await,
            Err(SessionError::InvalidCredentials)
        ));
        assert!(matches!(
            gate.sign_in("nobody@example.rw", "secret1").await,
            Err(SessionError::InvalidCredentials)
        ));

        let session = gate.sign_in("keza@example.rw", "secret1").await.unwrap();
        assert_eq!(session.token.len(), 64);

        let resolved = gate.authenticate(&session.token).await.unwrap();
        assert!(Arc::ptr_eq(&resolved, &session));

        assert!(gate.sign_out(&session.token).await);
        assert!(!gate.sign_out(&session.token).await);
        assert!(matches!(
            gate.authenticate(&session.token).await,
            Err(SessionError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn test_password_stored_as_argon2id() {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("preg.db")).await.unwrap();
        let provider = LocalIdentityProvider::new(pool.clone());

        provider
            .create_account("keza@example.rw", "hunter22")
            .await
            .unwrap();

        let stored: String =
            sqlx::query_scalar("SELECT password_hash FROM users WHERE email = 'keza@example.rw'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(stored.starts_with("$argon2id$"));
        assert!(!stored.contains("hunter22"));

        provider.verify("keza@example.rw", "hunter22").await.unwrap();
        assert!(matches!(
            provider.verify("keza@example.rw", "hunter23").await,
            Err(SessionError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_unreadable_stored_hash_is_not_a_mismatch() {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("preg.db")).await.unwrap();
        sqlx::query("INSERT INTO users (guid, email, password_hash) VALUES ('u1', 'keza@example.rw', 'abc123')")
            .execute(&pool)
            .await
            .unwrap();

        let provider = LocalIdentityProvider::new(pool);
        assert!(matches!(
            provider.verify("keza@example.rw", "secret1").await,
            Err(SessionError::Credentials(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_token_rejected() {
        let (_dir, gate) = setup(60).await;
        assert!(matches!(
            gate.authenticate("deadbeef").await,
            Err(SessionError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn test_expired_session_destroyed() {
        let (_dir, gate) = setup(0).await;
        gate.sign_up("keza@example.rw", "secret1", "secret1")
            .await
            .unwrap();
        let session = gate.sign_in("keza@example.rw", "secret1").await.unwrap();

        assert!(matches!(
            gate.authenticate(&session.token).await,
            Err(SessionError::Expired)
        ));
        assert_eq!(gate.active_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_sessions_get_separate_workspaces() {
        let (_dir, gate) = setup(60).await;
        gate.sign_up("keza@example.rw", "secret1", "secret1")
            .await
            .unwrap();

        let first = gate.sign_in("keza@example.rw", "secret1").await.unwrap();
        let second = gate.sign_in("keza@example.rw", "secret1").await.unwrap();
        assert_ne!(first.token, second.token);

        first.workspace.selector.mount().await;
        first.workspace.selector.set_district("Gasabo").await.unwrap();

        assert_eq!(first.workspace.selector.selection().district, "Gasabo");
        assert_eq!(second.workspace.selector.selection().district, "");
    }

    #[tokio::test]
    async fn test_workspace_submit_clears_selection() {
        use crate::submission::FormField;

        let (_dir, gate) = setup(60).await;
        gate.sign_up("keza@example.rw", "secret1", "secret1")
            .await
            .unwrap();
        let session = gate.sign_in("keza@example.rw", "secret1").await.unwrap();
        let ws = &session.workspace;

        ws.selector.mount().await;
        ws.selector.set_district("Gasabo").await.unwrap();
        ws.selector.set_sector("Remera").await.unwrap();
        ws.selector.set_cell("Rukiri I").await.unwrap();
        ws.selector.set_village("Amahoro").await.unwrap();
        {
            let mut form = ws.form.lock().await;
            form.update_field(FormField::FullName, "Keza Uwase".into())
                .unwrap();
            form.update_field(FormField::Phone, "0788123456".into())
                .unwrap();
        }

        let outcome = ws.submit().await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Submitted { .. }));
        assert_eq!(ws.selector.selection(), preg_common::LocationSelection::default());
        assert_eq!(ws.selector.snapshot().district.options, vec!["Gasabo"]);
    }
}
