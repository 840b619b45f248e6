//! crates/minduni_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the hosted authentication and document-store service.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::domain::{
    AvatarId, EmotionalProfile, EntryId, JournalEntry, NewJournalEntry, NewProfile, Principal, UserId, UserProfile,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors of the backing service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("No account exists for that email")]
    UserNotFound,
    #[error("Invalid email address: {0}")]
    InvalidEmail(String),
    #[error("Email address already registered")]
    EmailAlreadyInUse,
    #[error("Password too weak: {0}")]
    WeakPassword(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// Auth-state notifications. `None` means nobody is signed in.
pub type AuthStateStream = Pin<Box<dyn Stream<Item = Option<Principal>> + Send>>;

/// Snapshots of one user's journal, newest entry first. An `Err` item ends the stream.
pub type JournalSnapshotStream = Pin<Box<dyn Stream<Item = PortResult<Vec<JournalEntry>>> + Send>>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait AuthService: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> PortResult<Principal>;

    /// Creates a principal and signs it in.
    async fn sign_up(&self, email: &str, password: &str) -> PortResult<Principal>;

    async fn sign_out(&self) -> PortResult<()>;

    fn current_principal(&self) -> Option<Principal>;

    /// Subscribes to auth-state changes. The first item is the state at subscription time.
    fn auth_state_changes(&self) -> AuthStateStream;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    // --- Profile documents ---
    async fn get_profile(&self, uid: &UserId) -> PortResult<Option<UserProfile>>;

    /// Creates the profile if it does not exist yet. Repeating the call is harmless.
    async fn create_profile(&self, uid: &UserId, profile: &NewProfile) -> PortResult<()>;

    async fn update_avatar(&self, uid: &UserId, avatar: AvatarId) -> PortResult<()>;

    /// Fails with `NotFound` when the profile document does not exist.
    async fn update_emotional_profile(
        &self,
        uid: &UserId,
        profile: EmotionalProfile,
    ) -> PortResult<()>;

    // --- Journal entries ---
    async fn add_journal_entry(&self, uid: &UserId, entry: &NewJournalEntry) -> PortResult<EntryId>;

    /// Standing query over the user's entries ordered by creation time, newest first.
    fn watch_journal(&self, uid: &UserId) -> JournalSnapshotStream;
}
