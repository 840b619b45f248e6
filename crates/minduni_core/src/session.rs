//! crates/minduni_core/src/session.rs
//!
//! The process-wide authority for "who is logged in".
//!
//! A `SessionContext` owns one standing subscription to the auth service's
//! state changes. Every notification triggers a profile load, and the result is
//! published on a `watch` channel that screens (or the journal feed) observe.
//! `login`, `register` and `logout` never write identity state themselves; they
//! only talk to the auth service and let the subscription react.

use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::{AvatarId, EmotionalProfile, NewProfile, Principal, UserId, UserIdentity};
use crate::ports::{AuthService, AuthStateStream, DocumentStore, PortError};

//=========================================================================================
// Errors
//=========================================================================================

/// Why a sign-in was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("invalid email format")]
    InvalidEmail,
    #[error("user not found")]
    UserNotFound,
    #[error("{0}")]
    Other(String),
}

/// Why an account could not be created.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationFailure {
    #[error("email already registered")]
    EmailAlreadyInUse,
    #[error("weak password: {0}")]
    WeakPassword(String),
    #[error("invalid email format")]
    InvalidEmail,
    #[error("display name is required")]
    MissingDisplayName,
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Authentication failed: {0}")]
    Authentication(AuthFailure),
    #[error("Registration failed: {0}")]
    Registration(RegistrationFailure),
    #[error("No authenticated session")]
    NotAuthenticated,
    #[error("Profile for {uid} does not exist")]
    ProfileMissing { uid: UserId },
    /// Signed in, but the profile is still being fetched. Retry once the state settles.
    #[error("Profile for {uid} is still loading")]
    ProfileLoading { uid: UserId },
    #[error("Persistence error: {0}")]
    Persistence(PortError),
    #[error("Account {uid} was created but its profile could not be provisioned: {source}")]
    PartialRegistration { uid: UserId, source: PortError },
    #[error("Auth service error: {0}")]
    Service(PortError),
}

impl SessionError {
    /// The message shown to the user for this failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            SessionError::Authentication(AuthFailure::InvalidCredentials)
            | SessionError::Authentication(AuthFailure::UserNotFound) => {
                "Correo o contraseña incorrectos."
            }
            SessionError::Authentication(AuthFailure::InvalidEmail)
            | SessionError::Registration(RegistrationFailure::InvalidEmail) => {
                "El correo electrónico no es válido."
            }
            SessionError::Registration(RegistrationFailure::EmailAlreadyInUse) => {
                "Ya existe una cuenta con ese correo."
            }
            SessionError::Registration(RegistrationFailure::WeakPassword(_)) => {
                "La contraseña es demasiado débil."
            }
            SessionError::Registration(RegistrationFailure::MissingDisplayName) => {
                "Por favor completa todos los campos."
            }
            SessionError::NotAuthenticated => "Necesitas iniciar sesión.",
            SessionError::ProfileLoading { .. } => {
                "Tu perfil se está cargando. Inténtalo en un momento."
            }
            SessionError::ProfileMissing { .. } | SessionError::PartialRegistration { .. } => {
                "Tu perfil no está completo. Inténtalo de nuevo."
            }
            SessionError::Authentication(AuthFailure::Other(_))
            | SessionError::Registration(RegistrationFailure::Other(_))
            | SessionError::Persistence(_)
            | SessionError::Service(_) => "Algo salió mal. Inténtalo más tarde.",
        }
    }
}

fn auth_failure(e: PortError) -> SessionError {
    let failure = match e {
        PortError::InvalidCredentials => AuthFailure::InvalidCredentials,
        PortError::InvalidEmail(_) => AuthFailure::InvalidEmail,
        PortError::UserNotFound => AuthFailure::UserNotFound,
        other => AuthFailure::Other(other.to_string()),
    };
    SessionError::Authentication(failure)
}

fn registration_failure(e: PortError) -> SessionError {
    let failure = match e {
        PortError::EmailAlreadyInUse => RegistrationFailure::EmailAlreadyInUse,
        PortError::WeakPassword(reason) => RegistrationFailure::WeakPassword(reason),
        PortError::InvalidEmail(_) => RegistrationFailure::InvalidEmail,
        other => RegistrationFailure::Other(other.to_string()),
    };
    SessionError::Registration(failure)
}

//=========================================================================================
// State
//=========================================================================================

/// Why an authenticated principal has no usable profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileIssue {
    /// The profile document does not exist.
    Missing,
    /// The profile document could not be read.
    Unreadable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the first auth notification, or for a profile load.
    Loading,
    Unauthenticated,
    Authenticated(UserIdentity),
    /// Signed in, but the profile document is missing or unreadable. Recoverable via
    /// [`SessionContext::refresh`] or [`SessionContext::complete_profile`].
    Incomplete { principal: Principal, issue: ProfileIssue },
}

impl SessionState {
    pub fn identity(&self) -> Option<&UserIdentity> {
        match self {
            SessionState::Authenticated(identity) => Some(identity),
            _ => None,
        }
    }

    /// The signed-in principal's id, whether or not its profile loaded.
    pub fn uid(&self) -> Option<&UserId> {
        match self {
            SessionState::Authenticated(identity) => Some(&identity.uid),
            SessionState::Incomplete { principal, .. } => Some(&principal.uid),
            SessionState::Loading | SessionState::Unauthenticated => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, SessionState::Loading)
    }
}

/// Everything needed to create an account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub password: String,
    pub display_name: String,
    pub avatar: AvatarId,
}

/// How hard registration tries to create the profile document.
#[derive(Debug, Clone, Copy)]
pub struct ProvisioningPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for ProvisioningPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

//=========================================================================================
// SessionContext
//=========================================================================================

struct SessionInner {
    auth: Arc<dyn AuthService>,
    store: Arc<dyn DocumentStore>,
    policy: ProvisioningPolicy,
    state: watch::Sender<SessionState>,
    /// Bumped under the state lock whenever a new profile load starts.
    generation: Mutex<u64>,
    /// Principal whose profile is being provisioned right now.
    provisioning: Mutex<Option<UserId>>,
}

/// Explicitly constructed session object, shared by reference with whoever needs it.
pub struct SessionContext {
    inner: Arc<SessionInner>,
    shutdown: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SessionContext {
    /// Creates the context and starts its auth-state subscription.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        auth: Arc<dyn AuthService>,
        store: Arc<dyn DocumentStore>,
        policy: ProvisioningPolicy,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Loading);
        let inner = Arc::new(SessionInner {
            auth,
            store,
            policy,
            state,
            generation: Mutex::new(0),
            provisioning: Mutex::new(None),
        });

        let shutdown = CancellationToken::new();
        let changes = inner.auth.auth_state_changes();
        let listener = tokio::spawn(listen(inner.clone(), changes, shutdown.clone()));
        info!("Session context started.");

        Self {
            inner,
            shutdown,
            listener: Mutex::new(Some(listener)),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn identity(&self) -> Option<UserIdentity> {
        self.inner.state.borrow().identity().cloned()
    }

    pub fn current_uid(&self) -> Option<UserId> {
        self.inner.state.borrow().uid().cloned()
    }

    /// Signs in. Identity state follows through the auth-state subscription.
    pub async fn login(&self, email: &str, password: &str) -> Result<(), SessionError> {
        let principal = self
            .inner
            .auth
            .sign_in(email, password)
            .await
            .map_err(|e| {
                warn!("Sign-in rejected: {}", e);
                auth_failure(e)
            })?;
        info!("Signed in as {}", principal.uid);
        Ok(())
    }

    /// Creates the principal and provisions its profile document.
    ///
    /// Returns `PartialRegistration` when the principal exists but the profile could
    /// not be written after every attempt; the session then settles on
    /// `Incomplete { issue: Missing }` and [`Self::complete_profile`] can repair it.
    pub async fn register(&self, account: NewAccount) -> Result<UserId, SessionError> {
        let display_name = account.display_name.trim();
        if display_name.is_empty() {
            return Err(SessionError::Registration(
                RegistrationFailure::MissingDisplayName,
            ));
        }

        let principal = self
            .inner
            .auth
            .sign_up(&account.email, &account.password)
            .await
            .map_err(|e| {
                warn!("Sign-up rejected: {}", e);
                registration_failure(e)
            })?;
        info!("Created principal {}", principal.uid);

        let profile = NewProfile {
            display_name: display_name.to_string(),
            avatar: account.avatar,
        };
        self.provision(&principal.uid, &profile).await?;
        Ok(principal.uid)
    }

    /// Repairs a principal whose profile document is missing.
    pub async fn complete_profile(
        &self,
        display_name: &str,
        avatar: AvatarId,
    ) -> Result<(), SessionError> {
        let principal = self
            .inner
            .auth
            .current_principal()
            .ok_or(SessionError::NotAuthenticated)?;
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(SessionError::Registration(
                RegistrationFailure::MissingDisplayName,
            ));
        }
        let profile = NewProfile {
            display_name: display_name.to_string(),
            avatar,
        };
        self.provision(&principal.uid, &profile).await
    }

    pub async fn logout(&self) -> Result<(), SessionError> {
        self.inner.auth.sign_out().await.map_err(|e| {
            error!("Sign-out failed: {}", e);
            SessionError::Service(e)
        })?;
        info!("Signed out.");
        Ok(())
    }

    /// The uid whose profile document may be edited right now.
    fn editable_profile(&self) -> Result<UserId, SessionError> {
        match &*self.inner.state.borrow() {
            SessionState::Authenticated(identity) => Ok(identity.uid.clone()),
            SessionState::Incomplete { principal, .. } => Err(SessionError::ProfileMissing {
                uid: principal.uid.clone(),
            }),
            SessionState::Loading => match self.inner.auth.current_principal() {
                Some(principal) => Err(SessionError::ProfileLoading { uid: principal.uid }),
                None => Err(SessionError::NotAuthenticated),
            },
            SessionState::Unauthenticated => Err(SessionError::NotAuthenticated),
        }
    }

    /// Writes the new avatar remotely, then mirrors it locally. Nothing changes
    /// locally if the write fails.
    pub async fn update_avatar(&self, avatar: AvatarId) -> Result<(), SessionError> {
        let uid = self.editable_profile()?;

        self.inner
            .store
            .update_avatar(&uid, avatar)
            .await
            .map_err(|e| {
                error!("Failed to update avatar for {}: {}", uid, e);
                SessionError::Persistence(e)
            })?;

        self.inner.state.send_if_modified(|state| match state {
            SessionState::Authenticated(identity) if identity.uid == uid => {
                identity.avatar = avatar;
                true
            }
            _ => false,
        });
        debug!("Avatar for {} set to {}", uid, avatar);
        Ok(())
    }

    /// Records the onboarding choice, with the same rules as [`Self::update_avatar`].
    pub async fn set_emotional_profile(
        &self,
        emotional_profile: EmotionalProfile,
    ) -> Result<(), SessionError> {
        let uid = self.editable_profile()?;

        self.inner
            .store
            .update_emotional_profile(&uid, emotional_profile)
            .await
            .map_err(|e| {
                error!("Failed to save emotional profile for {}: {}", uid, e);
                SessionError::Persistence(e)
            })?;

        self.inner.state.send_if_modified(|state| match state {
            SessionState::Authenticated(identity) if identity.uid == uid => {
                identity.emotional_profile = Some(emotional_profile);
                true
            }
            _ => false,
        });
        info!("Emotional profile for {} set to {}", uid, emotional_profile);
        Ok(())
    }

    /// Reloads the profile of whoever the auth service currently has signed in.
    pub async fn refresh(&self) {
        let principal = self.inner.auth.current_principal();
        self.inner.load(principal).await;
    }

    /// Stops the auth-state subscription and waits for it to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            if let Err(e) = listener.await {
                warn!("Session listener ended abnormally: {}", e);
            }
        }
        info!("Session context stopped.");
    }

    async fn provision(&self, uid: &UserId, profile: &NewProfile) -> Result<(), SessionError> {
        *self.inner.provisioning.lock() = Some(uid.clone());
        let result = self.inner.create_profile_with_retry(uid, profile).await;
        *self.inner.provisioning.lock() = None;

        // Either way the listener may have seen the principal before the profile existed.
        self.refresh().await;

        result.map_err(|source| {
            error!(
                "Principal {} has no profile after {} attempts: {}",
                uid, self.inner.policy.attempts, source
            );
            SessionError::PartialRegistration {
                uid: uid.clone(),
                source,
            }
        })
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl SessionInner {
    /// Starts a load: takes a fresh generation and publishes the interim state, all
    /// under the state lock so no older load can slip in between.
    fn begin_load(&self, interim: SessionState) -> u64 {
        let mut generation = 0;
        self.state.send_modify(|state| {
            let mut current = self.generation.lock();
            *current += 1;
            generation = *current;
            *state = interim;
        });
        generation
    }

    /// Publishes the result of a load unless a newer one has started since.
    fn finish_load(&self, generation: u64, next: SessionState) -> bool {
        self.state.send_if_modified(|state| {
            if *self.generation.lock() != generation {
                return false;
            }
            *state = next;
            true
        })
    }

    async fn load(&self, principal: Option<Principal>) {
        let Some(principal) = principal else {
            self.begin_load(SessionState::Unauthenticated);
            debug!("No principal signed in.");
            return;
        };

        let generation = self.begin_load(SessionState::Loading);
        let next = match self.store.get_profile(&principal.uid).await {
            Ok(Some(profile)) => {
                SessionState::Authenticated(UserIdentity::from_profile(principal, profile))
            }
            Ok(None) if self.provisioning.lock().as_ref() == Some(&principal.uid) => {
                SessionState::Loading
            }
            Ok(None) => {
                warn!("Principal {} has no profile document.", principal.uid);
                SessionState::Incomplete {
                    principal,
                    issue: ProfileIssue::Missing,
                }
            }
            Err(e) => {
                error!("Failed to load profile for {}: {}", principal.uid, e);
                SessionState::Incomplete {
                    principal,
                    issue: ProfileIssue::Unreadable(e.to_string()),
                }
            }
        };

        if !self.finish_load(generation, next) {
            debug!("Discarded superseded profile load (generation {}).", generation);
        }
    }

    async fn create_profile_with_retry(
        &self,
        uid: &UserId,
        profile: &NewProfile,
    ) -> Result<(), PortError> {
        let attempts = self.policy.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.store.create_profile(uid, profile).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    warn!(
                        "Profile creation for {} failed (attempt {}/{}): {}",
                        uid, attempt, attempts, e
                    );
                    attempt += 1;
                    tokio::time::sleep(self.policy.backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// The auth-state subscription. Runs until cancelled or until the service ends the stream.
async fn listen(inner: Arc<SessionInner>, mut changes: AuthStateStream, shutdown: CancellationToken) {
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = changes.next() => next,
        };
        match next {
            Some(principal) => inner.load(principal).await,
            None => {
                warn!("Auth-state stream ended; session will no longer follow sign-ins.");
                inner.begin_load(SessionState::Unauthenticated);
                break;
            }
        }
    }
    debug!("Auth-state listener stopped.");
}
