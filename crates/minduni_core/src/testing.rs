//! In-memory stand-ins for the service ports, used by the unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

use crate::domain::{
    AvatarId, EmotionalProfile, EntryId, JournalEntry, NewJournalEntry, NewProfile, Principal, UserId, UserProfile,
};
use crate::ports::{
    AuthService, AuthStateStream, DocumentStore, JournalSnapshotStream, PortError, PortResult,
};

#[derive(Default)]
struct FakeState {
    accounts: HashMap<String, (Principal, String)>,
    profiles: HashMap<UserId, UserProfile>,
    journals: HashMap<UserId, Vec<JournalEntry>>,
    next_id: u64,
}

impl FakeState {
    fn tick(&mut self) -> (u64, DateTime<Utc>) {
        self.next_id += 1;
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        (self.next_id, base + Duration::seconds(self.next_id as i64))
    }
}

/// Auth service and document store sharing one in-memory state.
pub(crate) struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
    current: watch::Sender<Option<Principal>>,
    journal_changes: broadcast::Sender<UserId>,
    profile_create_failures: AtomicUsize,
    fail_profile_updates: AtomicBool,
    fail_journal_writes: AtomicBool,
    profile_reads_paused: watch::Sender<bool>,
}

impl FakeBackend {
    pub(crate) fn new() -> Arc<Self> {
        let (current, _) = watch::channel(None);
        let (journal_changes, _) = broadcast::channel(64);
        let (profile_reads_paused, _) = watch::channel(false);
        Arc::new(Self {
            state: Arc::new(Mutex::new(FakeState::default())),
            current,
            journal_changes,
            profile_create_failures: AtomicUsize::new(0),
            fail_profile_updates: AtomicBool::new(false),
            fail_journal_writes: AtomicBool::new(false),
            profile_reads_paused,
        })
    }

    /// Makes the next `count` profile creations fail.
    pub(crate) fn fail_profile_creates(&self, count: usize) {
        self.profile_create_failures.store(count, Ordering::SeqCst);
    }

    pub(crate) fn fail_profile_updates(&self, fail: bool) {
        self.fail_profile_updates.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_journal_writes(&self, fail: bool) {
        self.fail_journal_writes.store(fail, Ordering::SeqCst);
    }

    /// While paused, `get_profile` calls park until reads resume.
    pub(crate) fn pause_profile_reads(&self, paused: bool) {
        self.profile_reads_paused.send_replace(paused);
    }

    pub(crate) fn profile(&self, uid: &UserId) -> Option<UserProfile> {
        self.state.lock().profiles.get(uid).cloned()
    }

    pub(crate) fn journal_len(&self, uid: &UserId) -> usize {
        self.state.lock().journals.get(uid).map_or(0, Vec::len)
    }
}

#[async_trait]
impl AuthService for FakeBackend {
    async fn sign_in(&self, email: &str, password: &str) -> PortResult<Principal> {
        let principal = {
            let state = self.state.lock();
            let (principal, stored) = state.accounts.get(email).ok_or(PortError::UserNotFound)?;
            if stored != password {
                return Err(PortError::InvalidCredentials);
            }
            principal.clone()
        };
        self.current.send_replace(Some(principal.clone()));
        Ok(principal)
    }

    async fn sign_up(&self, email: &str, password: &str) -> PortResult<Principal> {
        if !email.contains('@') {
            return Err(PortError::InvalidEmail(email.to_string()));
        }
        if password.len() < 6 {
            return Err(PortError::WeakPassword("at least 6 characters".into()));
        }
        let principal = {
            let mut state = self.state.lock();
            if state.accounts.contains_key(email) {
                return Err(PortError::EmailAlreadyInUse);
            }
            let (id, _) = state.tick();
            let principal = Principal {
                uid: UserId::new(format!("uid-{id}")),
                email: email.to_string(),
            };
            state
                .accounts
                .insert(email.to_string(), (principal.clone(), password.to_string()));
            principal
        };
        self.current.send_replace(Some(principal.clone()));
        Ok(principal)
    }

    async fn sign_out(&self) -> PortResult<()> {
        self.current.send_replace(None);
        Ok(())
    }

    fn current_principal(&self) -> Option<Principal> {
        self.current.borrow().clone()
    }

    fn auth_state_changes(&self) -> AuthStateStream {
        let mut rx = self.current.subscribe();
        Box::pin(async_stream::stream! {
            let first = rx.borrow_and_update().clone();
            yield first;
            while rx.changed().await.is_ok() {
                let next = rx.borrow_and_update().clone();
                yield next;
            }
        })
    }
}

#[async_trait]
impl DocumentStore for FakeBackend {
    async fn get_profile(&self, uid: &UserId) -> PortResult<Option<UserProfile>> {
        let mut paused = self.profile_reads_paused.subscribe();
        let _ = paused.wait_for(|paused| !*paused).await;
        Ok(self.state.lock().profiles.get(uid).cloned())
    }

    async fn create_profile(&self, uid: &UserId, profile: &NewProfile) -> PortResult<()> {
        let pending = self.profile_create_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.profile_create_failures.store(pending - 1, Ordering::SeqCst);
            return Err(PortError::Unavailable("profile write dropped".into()));
        }
        let mut state = self.state.lock();
        if !state.profiles.contains_key(uid) {
            let (_, created_at) = state.tick();
            state.profiles.insert(
                uid.clone(),
                UserProfile {
                    display_name: profile.display_name.clone(),
                    avatar: profile.avatar,
                    emotional_profile: None,
                    created_at,
                },
            );
        }
        Ok(())
    }

    async fn update_avatar(&self, uid: &UserId, avatar: AvatarId) -> PortResult<()> {
        if self.fail_profile_updates.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("profile write dropped".into()));
        }
        let mut state = self.state.lock();
        let profile = state
            .profiles
            .get_mut(uid)
            .ok_or_else(|| PortError::NotFound(format!("profile {uid}")))?;
        profile.avatar = avatar;
        Ok(())
    }

    async fn update_emotional_profile(
        &self,
        uid: &UserId,
        emotional_profile: EmotionalProfile,
    ) -> PortResult<()> {
        if self.fail_profile_updates.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("profile write dropped".into()));
        }
        let mut state = self.state.lock();
        let profile = state
            .profiles
            .get_mut(uid)
            .ok_or_else(|| PortError::NotFound(format!("profile {uid}")))?;
        profile.emotional_profile = Some(emotional_profile);
        Ok(())
    }

    async fn add_journal_entry(&self, uid: &UserId, entry: &NewJournalEntry) -> PortResult<EntryId> {
        if self.fail_journal_writes.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("journal write dropped".into()));
        }
        let id = {
            let mut state = self.state.lock();
            let (n, created_at) = state.tick();
            let id = EntryId::new(format!("entry-{n}"));
            state.journals.entry(uid.clone()).or_default().insert(
                0,
                JournalEntry {
                    id: id.clone(),
                    text: entry.text.clone(),
                    mood: entry.mood,
                    created_at: Some(created_at),
                },
            );
            id
        };
        let _ = self.journal_changes.send(uid.clone());
        Ok(id)
    }

    fn watch_journal(&self, uid: &UserId) -> JournalSnapshotStream {
        let mut changes = self.journal_changes.subscribe();
        let state = self.state.clone();
        let uid = uid.clone();
        Box::pin(async_stream::stream! {
            loop {
                let snapshot = state.lock().journals.get(&uid).cloned().unwrap_or_default();
                yield Ok::<_, PortError>(snapshot);
                loop {
                    match changes.recv().await {
                        Ok(changed) if changed == uid => break,
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(_)) => break,
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        })
    }
}
