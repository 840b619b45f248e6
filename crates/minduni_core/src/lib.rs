pub mod breathing;
pub mod chat;
pub mod domain;
pub mod journal;
pub mod ports;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use domain::{
    AvatarId, DomainError, EmotionalProfile, EntryId, JournalEntry, Mood, NewJournalEntry, NewProfile, Principal,
    UserId, UserIdentity, UserProfile,
};
pub use journal::{JournalError, JournalFeed, JournalView};
pub use ports::{AuthService, DocumentStore, PortError, PortResult};
pub use session::{
    AuthFailure, NewAccount, ProfileIssue, ProvisioningPolicy, RegistrationFailure, SessionContext,
    SessionError, SessionState,
};
