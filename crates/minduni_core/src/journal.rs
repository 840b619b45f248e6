//! crates/minduni_core/src/journal.rs
//!
//! Live mirror of one user's journal.
//!
//! A `JournalFeed` keeps at most one standing query open. Each snapshot the
//! store pushes replaces the mirror wholesale. Switching users tears the old
//! query down and clears the mirror in the same state update that bumps the
//! feed's generation; pump tasks only apply snapshots tagged with the current
//! generation, so a slow query for a previous user can never write into the
//! new user's mirror.

use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::domain::{EntryId, JournalEntry, Mood, NewJournalEntry, UserId};
use crate::ports::{DocumentStore, JournalSnapshotStream, PortError};
use crate::session::SessionContext;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JournalError {
    #[error("Journal entries need some text")]
    EmptyText,
    #[error("Persistence error: {0}")]
    Persistence(PortError),
}

/// What screens render: the mirrored entries, newest first, and a loading flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalView {
    generation: u64,
    pub user: Option<UserId>,
    pub entries: Vec<JournalEntry>,
    pub loading: bool,
}

impl JournalView {
    /// Incremented every time the feed opens or drops a query.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

struct ActiveQuery {
    user: UserId,
    cancel: CancellationToken,
    pump: JoinHandle<()>,
}

impl ActiveQuery {
    fn stop(self) {
        self.cancel.cancel();
        self.pump.abort();
    }
}

struct FeedInner {
    store: Arc<dyn DocumentStore>,
    view: Arc<watch::Sender<JournalView>>,
    active: Mutex<Option<ActiveQuery>>,
}

impl Drop for FeedInner {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().take() {
            active.stop();
        }
    }
}

/// Cloneable handle onto one journal mirror.
#[derive(Clone)]
pub struct JournalFeed {
    inner: Arc<FeedInner>,
}

impl JournalFeed {
    /// Creates an inactive feed. Nothing is queried until a user is set.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        let (view, _) = watch::channel(JournalView::default());
        Self {
            inner: Arc::new(FeedInner {
                store,
                view: Arc::new(view),
                active: Mutex::new(None),
            }),
        }
    }

    pub fn view(&self) -> JournalView {
        self.inner.view.borrow().clone()
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.inner.view.borrow().entries.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.view.borrow().loading
    }

    pub fn subscribe(&self) -> watch::Receiver<JournalView> {
        self.inner.view.subscribe()
    }

    pub fn active_user(&self) -> Option<UserId> {
        self.inner.active.lock().as_ref().map(|a| a.user.clone())
    }

    /// Points the feed at `user`, replacing any running query.
    ///
    /// Setting the user that is already active is a no-op while its query is still
    /// running. If that query has ended (the store reported an error or closed it),
    /// a fresh one is opened and the last mirrored entries stay visible until it
    /// delivers. Switching to a different user clears the mirror immediately;
    /// `loading` stays true until the new query delivers its first snapshot.
    pub fn set_user(&self, user: Option<UserId>) {
        let mut active = self.inner.active.lock();
        let same_user = active.as_ref().map(|a| &a.user) == user.as_ref();
        if same_user && active.as_ref().map_or(true, |a| !a.pump.is_finished()) {
            return;
        }
        if let Some(previous) = active.take() {
            if same_user {
                info!("Reopening ended journal query for {}", previous.user);
            } else {
                debug!("Closing journal query for {}", previous.user);
            }
            previous.stop();
        }

        let mut generation = 0;
        self.inner.view.send_modify(|view| {
            view.generation += 1;
            generation = view.generation;
            if !same_user {
                view.user = user.clone();
                view.entries.clear();
            }
            view.loading = user.is_some();
        });

        if let Some(user) = user {
            info!("Opening journal query for {} (generation {})", user, generation);
            let cancel = CancellationToken::new();
            let snapshots = self.inner.store.watch_journal(&user);
            let pump = tokio::spawn(pump(
                self.inner.view.clone(),
                snapshots,
                generation,
                user.clone(),
                cancel.clone(),
            ));
            *active = Some(ActiveQuery { user, cancel, pump });
        }
    }

    /// Tears the standing query down and empties the mirror.
    pub fn deactivate(&self) {
        self.set_user(None);
    }

    /// Keeps the feed pointed at whoever `session` has signed in.
    ///
    /// The returned task ends when the session's state channel closes; abort it to
    /// detach earlier.
    pub fn follow_session(&self, session: &SessionContext) -> JoinHandle<()> {
        let mut states = session.subscribe();
        let feed = self.clone();
        tokio::spawn(async move {
            loop {
                let user = states.borrow_and_update().uid().cloned();
                feed.set_user(user);
                if states.changed().await.is_err() {
                    break;
                }
            }
            debug!("Journal feed stopped following the session.");
        })
    }

    /// Appends an entry for the active user.
    ///
    /// Blank text is rejected and nothing is written. With no active user the call
    /// does nothing and returns `Ok(None)`. The mirror is not touched here: the new
    /// entry shows up with the next snapshot.
    pub async fn add_entry(&self, text: &str, mood: Mood) -> Result<Option<EntryId>, JournalError> {
        if text.trim().is_empty() {
            return Err(JournalError::EmptyText);
        }
        let Some(user) = self.active_user() else {
            debug!("Ignoring journal entry: no active user.");
            return Ok(None);
        };

        let entry = NewJournalEntry {
            text: text.to_string(),
            mood,
        };
        let id = self
            .inner
            .store
            .add_journal_entry(&user, &entry)
            .await
            .map_err(|e| {
                error!("Failed to save journal entry for {}: {}", user, e);
                JournalError::Persistence(e)
            })?;
        debug!("Saved journal entry {} for {}", id, user);
        Ok(Some(id))
    }
}

/// Replaces the mirror with `entries` if `generation` is still current.
fn apply_snapshot(view: &watch::Sender<JournalView>, generation: u64, entries: Vec<JournalEntry>) -> bool {
    view.send_if_modified(|view| {
        if view.generation != generation {
            return false;
        }
        view.entries = entries;
        view.loading = false;
        true
    })
}

/// Clears the loading flag after a failed query, keeping whatever was mirrored.
fn apply_failure(view: &watch::Sender<JournalView>, generation: u64) -> bool {
    view.send_if_modified(|view| {
        if view.generation != generation || !view.loading {
            return false;
        }
        view.loading = false;
        true
    })
}

async fn pump(
    view: Arc<watch::Sender<JournalView>>,
    mut snapshots: JournalSnapshotStream,
    generation: u64,
    user: UserId,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = snapshots.next() => next,
        };
        match next {
            Some(Ok(entries)) => {
                let count = entries.len();
                if apply_snapshot(&view, generation, entries) {
                    debug!("Journal snapshot for {}: {} entries", user, count);
                } else {
                    debug!("Dropped stale journal snapshot for {}", user);
                    break;
                }
            }
            Some(Err(e)) => {
                error!("Journal subscription for {} failed: {}", user, e);
                apply_failure(&view, generation);
                break;
            }
            None => {
                debug!("Journal subscription for {} closed by the store.", user);
                apply_failure(&view, generation);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AvatarId, EntryId};
    use crate::ports::PortResult;
    use crate::session::{NewAccount, ProvisioningPolicy};
    use crate::testing::FakeBackend;
    use async_trait::async_trait;
    use futures::channel::mpsc;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    async fn settle<F>(feed: &JournalFeed, pred: F) -> JournalView
    where
        F: FnMut(&JournalView) -> bool,
    {
        let mut rx = feed.subscribe();
        let view = timeout(WAIT, rx.wait_for(pred))
            .await
            .expect("journal feed did not settle in time")
            .expect("journal view channel closed");
        view.clone()
    }

    fn entry(id: &str, text: &str, mood: Mood) -> JournalEntry {
        JournalEntry {
            id: EntryId::new(id),
            text: text.into(),
            mood,
            created_at: None,
        }
    }

    /// Store whose snapshots are pushed by hand, one channel per `watch_journal` call.
    #[derive(Default)]
    struct ScriptedStore {
        senders: Mutex<HashMap<UserId, Vec<mpsc::UnboundedSender<PortResult<Vec<JournalEntry>>>>>>,
    }

    impl ScriptedStore {
        fn opened(&self, user: &str) -> usize {
            self.senders.lock().get(&UserId::new(user)).map_or(0, Vec::len)
        }

        fn push(&self, user: &str, snapshot: PortResult<Vec<JournalEntry>>) {
            let senders = self.senders.lock();
            for tx in senders.get(&UserId::new(user)).into_iter().flatten() {
                let _ = tx.unbounded_send(snapshot.clone());
            }
        }
    }

    #[async_trait]
    impl DocumentStore for ScriptedStore {
        async fn get_profile(&self, _: &UserId) -> PortResult<Option<crate::domain::UserProfile>> {
            Ok(None)
        }

        async fn create_profile(&self, _: &UserId, _: &crate::domain::NewProfile) -> PortResult<()> {
            Ok(())
        }

        async fn update_avatar(&self, _: &UserId, _: AvatarId) -> PortResult<()> {
            Ok(())
        }

        async fn update_emotional_profile(
            &self,
            _: &UserId,
            _: crate::domain::EmotionalProfile,
        ) -> PortResult<()> {
            Ok(())
        }

        async fn add_journal_entry(&self, _: &UserId, _: &NewJournalEntry) -> PortResult<EntryId> {
            Err(PortError::Unavailable("read-only".into()))
        }

        fn watch_journal(&self, uid: &UserId) -> JournalSnapshotStream {
            let (tx, rx) = mpsc::unbounded();
            self.senders.lock().entry(uid.clone()).or_default().push(tx);
            Box::pin(rx)
        }
    }

    #[tokio::test]
    async fn appended_entries_arrive_newest_first() {
        let backend = FakeBackend::new();
        let feed = JournalFeed::new(backend.clone());
        feed.set_user(Some(UserId::new("u1")));
        settle(&feed, |v| !v.loading).await;

        feed.add_entry("feeling ok", Mood::Calm).await.unwrap();
        settle(&feed, |v| v.entries.len() == 1).await;
        feed.add_entry("better now", Mood::Happy).await.unwrap();
        let view = settle(&feed, |v| v.entries.len() == 2).await;

        let got: Vec<(&str, &str)> = view
            .entries
            .iter()
            .map(|e| (e.text.as_str(), e.mood.symbol()))
            .collect();
        assert_eq!(got, vec![("better now", "😃"), ("feeling ok", "😌")]);
        assert!(view.entries[0].created_at > view.entries[1].created_at);
    }

    #[tokio::test]
    async fn mirror_length_tracks_successful_appends() {
        let backend = FakeBackend::new();
        let feed = JournalFeed::new(backend.clone());
        let user = UserId::new("u1");
        feed.set_user(Some(user.clone()));

        for i in 0..5 {
            feed.add_entry(&format!("entry {i}"), Mood::Neutral).await.unwrap();
        }
        backend.fail_journal_writes(true);
        assert!(matches!(
            feed.add_entry("lost", Mood::Sad).await,
            Err(JournalError::Persistence(_))
        ));

        let view = settle(&feed, |v| v.entries.len() == 5).await;
        assert_eq!(backend.journal_len(&user), 5);
        let stamps: Vec<_> = view.entries.iter().map(|e| e.created_at).collect();
        let mut sorted = stamps.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(stamps, sorted);
    }

    #[tokio::test]
    async fn blank_text_is_rejected_without_writing() {
        let backend = FakeBackend::new();
        let feed = JournalFeed::new(backend.clone());
        let user = UserId::new("u1");
        feed.set_user(Some(user.clone()));
        let before = settle(&feed, |v| !v.loading).await;

        assert_eq!(feed.add_entry("", Mood::Happy).await, Err(JournalError::EmptyText));
        assert_eq!(feed.add_entry("  \n", Mood::Happy).await, Err(JournalError::EmptyText));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(backend.journal_len(&user), 0);
        assert_eq!(feed.view(), before);
    }

    #[tokio::test]
    async fn add_entry_without_a_user_does_nothing() {
        let backend = FakeBackend::new();
        let feed = JournalFeed::new(backend.clone());

        assert_eq!(feed.add_entry("hola", Mood::Happy).await, Ok(None));
        assert!(feed.entries().is_empty());
        assert!(!feed.is_loading());
    }

    #[tokio::test]
    async fn loading_holds_until_the_first_snapshot() {
        let store = Arc::new(ScriptedStore::default());
        let feed = JournalFeed::new(store.clone());

        feed.set_user(Some(UserId::new("u1")));
        assert!(feed.is_loading());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(feed.is_loading());

        store.push("u1", Ok(vec![]));
        let view = settle(&feed, |v| !v.loading).await;
        assert!(view.entries.is_empty());
    }

    #[tokio::test]
    async fn switching_users_never_leaks_the_previous_mirror() {
        let store = Arc::new(ScriptedStore::default());
        let feed = JournalFeed::new(store.clone());

        feed.set_user(Some(UserId::new("ana")));
        store.push("ana", Ok(vec![entry("a1", "ana's secret", Mood::Sad)]));
        settle(&feed, |v| v.entries.len() == 1).await;

        feed.set_user(Some(UserId::new("ben")));
        let view = feed.view();
        assert!(view.entries.is_empty());
        assert!(view.loading);

        // A late snapshot from the superseded query must not land.
        store.push("ana", Ok(vec![entry("a2", "more of ana", Mood::Sad)]));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(feed.entries().is_empty());

        store.push("ben", Ok(vec![entry("b1", "ben's day", Mood::Happy)]));
        let view = settle(&feed, |v| !v.loading).await;
        assert_eq!(view.user, Some(UserId::new("ben")));
        assert_eq!(view.entries.len(), 1);
        assert_eq!(view.entries[0].text, "ben's day");
    }

    #[tokio::test]
    async fn stale_generations_are_rejected_by_the_guard() {
        let (view, _) = watch::channel(JournalView::default());
        view.send_modify(|v| v.generation = 7);

        assert!(!apply_snapshot(&view, 6, vec![entry("x", "stale", Mood::Sad)]));
        assert!(view.borrow().entries.is_empty());
        assert!(apply_snapshot(&view, 7, vec![entry("y", "fresh", Mood::Happy)]));
        assert_eq!(view.borrow().entries[0].text, "fresh");
    }

    #[tokio::test]
    async fn subscription_errors_clear_loading_and_freeze_the_list() {
        let store = Arc::new(ScriptedStore::default());
        let feed = JournalFeed::new(store.clone());
        feed.set_user(Some(UserId::new("u1")));

        store.push("u1", Err(PortError::PermissionDenied("rules".into())));
        let view = settle(&feed, |v| !v.loading).await;
        assert!(view.entries.is_empty());

        // The failed query is terminal; later pushes are not consumed.
        store.push("u1", Ok(vec![entry("e1", "late", Mood::Calm)]));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(feed.entries().is_empty());
    }

    #[tokio::test]
    async fn a_failed_query_is_reopened_for_the_same_user() {
        let store = Arc::new(ScriptedStore::default());
        let feed = JournalFeed::new(store.clone());
        let user = UserId::new("u1");
        feed.set_user(Some(user.clone()));
        store.push("u1", Ok(vec![entry("e1", "one", Mood::Calm)]));
        settle(&feed, |v| v.entries.len() == 1).await;

        // Re-selecting the user of a live query keeps it.
        feed.set_user(Some(user.clone()));
        assert_eq!(store.opened("u1"), 1);

        store.push("u1", Err(PortError::Unavailable("connection lost".into())));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!feed.is_loading());

        feed.set_user(Some(user.clone()));
        assert_eq!(store.opened("u1"), 2);
        let view = feed.view();
        assert!(view.loading);
        assert_eq!(view.entries.len(), 1, "last known entries stay visible");

        store.push(
            "u1",
            Ok(vec![entry("e2", "two", Mood::Happy), entry("e1", "one", Mood::Calm)]),
        );
        let view = settle(&feed, |v| !v.loading).await;
        assert_eq!(view.user, Some(user));
        assert_eq!(view.entries.len(), 2);
    }

    #[tokio::test]
    async fn deactivate_clears_and_stops_updates() {
        let store = Arc::new(ScriptedStore::default());
        let feed = JournalFeed::new(store.clone());
        feed.set_user(Some(UserId::new("u1")));
        store.push("u1", Ok(vec![entry("e1", "one", Mood::Calm)]));
        settle(&feed, |v| v.entries.len() == 1).await;

        feed.deactivate();
        assert_eq!(feed.active_user(), None);
        assert!(feed.entries().is_empty());
        assert!(!feed.is_loading());

        store.push("u1", Ok(vec![entry("e2", "two", Mood::Calm)]));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(feed.entries().is_empty());
    }

    #[tokio::test]
    async fn follows_the_signed_in_user() {
        let backend = FakeBackend::new();
        let session = SessionContext::start(
            backend.clone(),
            backend.clone(),
            ProvisioningPolicy {
                attempts: 1,
                backoff: Duration::from_millis(1),
            },
        );
        let feed = JournalFeed::new(backend.clone());
        let follower = feed.follow_session(&session);

        let uid = session
            .register(NewAccount {
                email: "a@x.com".into(),
                password: "secret1".into(),
                display_name: "Ana".into(),
                avatar: AvatarId::default(),
            })
            .await
            .unwrap();
        let view = settle(&feed, |v| v.user.as_ref() == Some(&uid) && !v.loading).await;
        assert!(view.entries.is_empty());

        feed.add_entry("primer día", Mood::Calm).await.unwrap();
        settle(&feed, |v| v.entries.len() == 1).await;

        session.logout().await.unwrap();
        let view = settle(&feed, |v| v.user.is_none()).await;
        assert!(view.entries.is_empty());

        follower.abort();
    }
}
