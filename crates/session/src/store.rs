//! Keyed in-memory session store.
//!
//! The id → slot map sits behind a `std::sync::Mutex` that is only held for
//! map bookkeeping. Each session has its own `tokio::sync::Mutex`, so a
//! long-running request on one session never blocks another session.

use chrono::Utc;
use cxloop_core::error::SessionError;
use cxloop_core::event::{DomainEvent, EventBus};
use cxloop_core::turn::{SessionId, Turn};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::session::{Session, SessionInfo};

/// Capacity and idle-time reclamation settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionPolicy {
    /// Maximum live sessions; least-recently-accessed are evicted first.
    pub max_sessions: Option<usize>,

    /// Idle time after which a session is reclaimed.
    pub ttl: Option<Duration>,
}

impl SessionPolicy {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = Some(max);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

struct SessionSlot {
    session: Arc<AsyncMutex<Session>>,
    evicted: Arc<AtomicBool>,
    last_access: Mutex<Instant>,
    created_at: chrono::DateTime<Utc>,
}

impl SessionSlot {
    fn new(id: SessionId) -> Self {
        let session = Session::new(id);
        let created_at = session.created_at;
        Self {
            session: Arc::new(AsyncMutex::new(session)),
            evicted: Arc::new(AtomicBool::new(false)),
            last_access: Mutex::new(Instant::now()),
            created_at,
        }
    }

    fn touch(&self) {
        *self.last_access.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.duration_since(*self.last_access.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn is_busy(&self) -> bool {
        self.session.try_lock().is_err()
    }
}

/// Exclusive access to one session for the duration of a request.
///
/// Holding a lease serializes all other writers of the same session.
/// If the session is evicted while leased, further appends fail with
/// [`SessionError::NotFound`].
pub struct SessionLease {
    id: SessionId,
    guard: OwnedMutexGuard<Session>,
    slot: Arc<SessionSlot>,
}

impl SessionLease {
    pub fn session_id(&self) -> &SessionId {
        &self.id
    }

    /// All turns, oldest first.
    pub fn turns(&self) -> &[Turn] {
        self.guard.turns()
    }

    pub fn is_evicted(&self) -> bool {
        self.slot.evicted.load(Ordering::SeqCst)
    }

    pub fn append(&mut self, turn: Turn) -> Result<(), SessionError> {
        if self.is_evicted() {
            return Err(SessionError::NotFound(self.id.to_string()));
        }
        self.guard.push(turn);
        self.slot.touch();
        Ok(())
    }
}

/// In-memory store of all live sessions.
///
/// Constructed once at startup and shared as `Arc<SessionStore>`.
/// Nothing survives a process restart.
pub struct SessionStore {
    slots: Mutex<HashMap<SessionId, Arc<SessionSlot>>>,
    policy: SessionPolicy,
    events: Option<Arc<EventBus>>,
}

impl SessionStore {
    pub fn new(policy: SessionPolicy) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            policy,
            events: None,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(SessionPolicy::unbounded())
    }

    /// Publish eviction events on the given bus.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, Arc<SessionSlot>>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn announce_eviction(&self, id: &SessionId, reason: &str) {
        debug!(session_id = %id, reason, "Session evicted");
        if let Some(events) = &self.events {
            events.publish(DomainEvent::SessionEvicted {
                session_id: id.to_string(),
                reason: reason.to_string(),
                timestamp: Utc::now(),
            });
        }
    }

    fn remove_slot(
        &self,
        slots: &mut HashMap<SessionId, Arc<SessionSlot>>,
        id: &SessionId,
        reason: &str,
    ) -> bool {
        match slots.remove(id) {
            Some(slot) => {
                slot.evicted.store(true, Ordering::SeqCst);
                self.announce_eviction(id, reason);
                true
            }
            None => false,
        }
    }

    fn expired_ids(&self, slots: &HashMap<SessionId, Arc<SessionSlot>>) -> Vec<SessionId> {
        let Some(ttl) = self.policy.ttl else {
            return Vec::new();
        };
        let now = Instant::now();
        slots
            .iter()
            .filter(|(_, slot)| !slot.is_busy() && slot.idle_for(now) > ttl)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Pick the least-recently-accessed session other than `keep`,
    /// preferring sessions with no request in flight.
    fn lru_victim(
        slots: &HashMap<SessionId, Arc<SessionSlot>>,
        keep: &SessionId,
    ) -> Option<SessionId> {
        let now = Instant::now();
        let candidates = slots.iter().filter(|(id, _)| *id != keep);
        candidates
            .clone()
            .filter(|(_, slot)| !slot.is_busy())
            .max_by_key(|(_, slot)| slot.idle_for(now))
            .or_else(|| candidates.max_by_key(|(_, slot)| slot.idle_for(now)))
            .map(|(id, _)| id.clone())
    }

    fn slot_for(&self, id: &SessionId) -> (Arc<SessionSlot>, bool) {
        let mut slots = self.slots();

        for expired in self.expired_ids(&slots) {
            if &expired != id {
                self.remove_slot(&mut slots, &expired, "ttl");
            }
        }

        if let Some(slot) = slots.get(id) {
            if self.policy.ttl.is_none_or(|ttl| slot.is_busy() || slot.idle_for(Instant::now()) <= ttl) {
                slot.touch();
                return (slot.clone(), false);
            }
            self.remove_slot(&mut slots, id, "ttl");
        }

        let slot = Arc::new(SessionSlot::new(id.clone()));
        slots.insert(id.clone(), slot.clone());
        info!(session_id = %id, active = slots.len(), "Session created");

        if let Some(max) = self.policy.max_sessions {
            while slots.len() > max.max(1) {
                let Some(victim) = Self::lru_victim(&slots, id) else {
                    break;
                };
                self.remove_slot(&mut slots, &victim, "capacity");
            }
        }

        (slot, true)
    }

    /// Look up a session, creating it on first use.
    pub fn get_or_create(&self, id: &SessionId) -> SessionInfo {
        let (slot, created) = self.slot_for(id);
        SessionInfo {
            id: id.clone(),
            created_at: slot.created_at,
            created,
        }
    }

    /// Get-or-create the session and wait for exclusive access to it.
    pub async fn lease(&self, id: &SessionId) -> SessionLease {
        let (slot, _) = self.slot_for(id);
        let guard = slot.session.clone().lock_owned().await;
        slot.touch();
        SessionLease {
            id: id.clone(),
            guard,
            slot,
        }
    }

    /// Append a single turn to an existing session.
    pub async fn append(&self, id: &SessionId, turn: Turn) -> Result<(), SessionError> {
        let slot = self
            .slots()
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        let mut session = slot.session.lock().await;
        if slot.evicted.load(Ordering::SeqCst) {
            return Err(SessionError::NotFound(id.to_string()));
        }
        session.push(turn);
        slot.touch();
        Ok(())
    }

    /// Remove a session. Returns whether it existed; unknown ids are a no-op.
    pub fn evict(&self, id: &SessionId) -> bool {
        let mut slots = self.slots();
        self.remove_slot(&mut slots, id, "explicit")
    }

    /// Reclaim every session idle for longer than the TTL.
    pub fn purge_expired(&self) -> usize {
        let mut slots = self.slots();
        let expired = self.expired_ids(&slots);
        for id in &expired {
            self.remove_slot(&mut slots, id, "ttl");
        }
        expired.len()
    }

    /// A copy of the session's current state, waiting for any in-flight request.
    pub async fn snapshot(&self, id: &SessionId) -> Option<Session> {
        let slot = self.slots().get(id).cloned()?;
        let session = slot.session.lock().await;
        Some(session.clone())
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.slots().contains_key(id)
    }

    pub fn list_active(&self) -> BTreeSet<SessionId> {
        self.slots().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cxloop_core::turn::TurnRole;

    fn sid(s: &str) -> SessionId {
        SessionId::from(s)
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let store = SessionStore::unbounded();
        let first = store.get_or_create(&sid("user-123"));
        let second = store.get_or_create(&sid("user-123"));
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn append_preserves_order() {
        let store = SessionStore::unbounded();
        let id = sid("s1");
        store.get_or_create(&id);
        for i in 0..5 {
            store.append(&id, Turn::user(format!("msg {i}"))).await.unwrap();
        }
        let session = store.snapshot(&id).await.unwrap();
        let contents: Vec<&str> = session.turns().iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["msg 0", "msg 1", "msg 2", "msg 3", "msg 4"]);
    }

    #[tokio::test]
    async fn append_to_unknown_session_fails() {
        let store = SessionStore::unbounded();
        let err = store.append(&sid("ghost"), Turn::user("hi")).await.unwrap_err();
        assert_eq!(err, SessionError::NotFound("ghost".into()));
    }

    #[test]
    fn evict_twice_is_a_noop() {
        let store = SessionStore::unbounded();
        store.get_or_create(&sid("user-123"));
        assert!(store.evict(&sid("user-123")));
        assert!(!store.evict(&sid("user-123")));
        assert!(!store.evict(&sid("never-existed")));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn eviction_starts_fresh_history() {
        let store = SessionStore::unbounded();
        let id = sid("user-123");
        store.get_or_create(&id);
        store.append(&id, Turn::user("remember me")).await.unwrap();

        store.evict(&id);
        let info = store.get_or_create(&id);
        assert!(info.created);
        assert!(store.snapshot(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lease_append_fails_after_eviction() {
        let store = SessionStore::unbounded();
        let id = sid("s1");
        let mut lease = store.lease(&id).await;
        lease.append(Turn::user("before")).unwrap();

        assert!(store.evict(&id));
        assert!(lease.is_evicted());
        let err = lease.append(Turn::agent("after")).unwrap_err();
        assert_eq!(err, SessionError::NotFound("s1".into()));
    }

    #[tokio::test]
    async fn list_active_reports_ids() {
        let store = SessionStore::unbounded();
        store.get_or_create(&sid("b"));
        store.get_or_create(&sid("a"));
        let ids: Vec<String> = store.list_active().into_iter().map(|s| s.0).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let store = SessionStore::new(SessionPolicy::unbounded().with_max_sessions(2));
        store.get_or_create(&sid("old"));
        std::thread::sleep(Duration::from_millis(5));
        store.get_or_create(&sid("mid"));
        std::thread::sleep(Duration::from_millis(5));
        // Touching "old" makes "mid" the least recently used.
        store.get_or_create(&sid("old"));
        std::thread::sleep(Duration::from_millis(5));
        store.get_or_create(&sid("new"));

        assert_eq!(store.len(), 2);
        assert!(store.contains(&sid("old")));
        assert!(store.contains(&sid("new")));
        assert!(!store.contains(&sid("mid")));
    }

    #[tokio::test]
    async fn capacity_prefers_idle_sessions() {
        let store = SessionStore::new(SessionPolicy::unbounded().with_max_sessions(2));
        let busy = store.lease(&sid("busy")).await;
        std::thread::sleep(Duration::from_millis(5));
        store.get_or_create(&sid("idle"));
        std::thread::sleep(Duration::from_millis(5));
        store.get_or_create(&sid("new"));

        assert!(store.contains(&sid("busy")));
        assert!(!store.contains(&sid("idle")));
        assert!(!busy.is_evicted());
    }

    #[test]
    fn ttl_reclaims_idle_sessions() {
        let store = SessionStore::new(SessionPolicy::unbounded().with_ttl(Duration::from_millis(20)));
        store.get_or_create(&sid("stale"));
        std::thread::sleep(Duration::from_millis(40));
        store.get_or_create(&sid("fresh"));

        assert!(!store.contains(&sid("stale")));
        assert!(store.contains(&sid("fresh")));
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(store.purge_expired(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn expired_session_is_recreated_empty() {
        let store = SessionStore::new(SessionPolicy::unbounded().with_ttl(Duration::from_millis(20)));
        assert!(store.get_or_create(&sid("s")).created);
        std::thread::sleep(Duration::from_millis(40));
        assert!(store.get_or_create(&sid("s")).created);
    }

    #[tokio::test]
    async fn eviction_events_are_published() {
        let bus = Arc::new(EventBus::new(8));
        let mut rx = bus.subscribe();
        let store = SessionStore::unbounded().with_events(bus);
        store.get_or_create(&sid("s"));
        store.evict(&sid("s"));

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::SessionEvicted { session_id, reason, .. } => {
                assert_eq!(session_id, "s");
                assert_eq!(reason, "explicit");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_leases_never_interleave() {
        const WRITERS: usize = 8;
        const TURNS: usize = 25;

        let store = Arc::new(SessionStore::unbounded());
        let id = sid("shared");
        let mut handles = Vec::new();
        for writer in 0..WRITERS {
            let store = store.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                let mut lease = store.lease(&id).await;
                for n in 0..TURNS {
                    lease.append(Turn::user(format!("{writer}:{n}"))).unwrap();
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let session = store.snapshot(&id).await.unwrap();
        assert_eq!(session.len(), WRITERS * TURNS);
        assert!(session.turns().iter().all(|t| t.role == TurnRole::User));

        // Each writer's turns must form one contiguous, ordered block.
        for block in session.turns().chunks(TURNS) {
            let writer = block[0].content.split(':').next().unwrap().to_string();
            for (n, turn) in block.iter().enumerate() {
                assert_eq!(turn.content, format!("{writer}:{n}"));
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn different_sessions_proceed_in_parallel() {
        let store = Arc::new(SessionStore::unbounded());
        let _held = store.lease(&sid("a")).await;
        // A lease on "a" must not block work on "b".
        let other = tokio::time::timeout(Duration::from_secs(1), store.lease(&sid("b"))).await;
        assert!(other.is_ok());
    }
}
