//! Per-session sliding window of recent turns.
//!
//! Entirely in-process.  Each session keeps at most `capacity` turns and
//! drops its oldest turn when a new one would exceed that.  The session map
//! itself is bounded: at most `max_sessions` sessions are kept (least
//! recently written dropped first) and sessions idle longer than `idle_ttl`
//! are forgotten.  A forgotten session reads as empty.
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use lru::LruCache;
use tracing::debug;

use recall_config::MemoryConfig;

use crate::schema::{BufferEntry, Role};

#[derive(Debug, Clone)]
pub struct BufferSettings {
    pub capacity: usize,
    pub max_sessions: NonZeroUsize,
    /// `None` disables idle expiry.
    pub idle_ttl: Option<Duration>,
}

impl BufferSettings {
    pub fn from_config(config: &MemoryConfig) -> Self {
        Self {
            capacity: config.buffer_capacity,
            max_sessions: NonZeroUsize::new(config.max_sessions).unwrap_or(NonZeroUsize::MIN),
            idle_ttl: (config.session_idle_ttl_secs > 0)
                .then(|| Duration::from_secs(config.session_idle_ttl_secs)),
        }
    }
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self::from_config(&MemoryConfig::default())
    }
}

#[derive(Debug)]
struct SessionBuffer {
    entries: VecDeque<BufferEntry>,
    last_active: Instant,
}

impl SessionBuffer {
    fn is_expired(&self, ttl: Option<Duration>, now: Instant) -> bool {
        ttl.is_some_and(|ttl| now.saturating_duration_since(self.last_active) > ttl)
    }
}

pub struct SessionBuffers {
    sessions: Mutex<LruCache<String, SessionBuffer>>,
    settings: BufferSettings,
}

impl SessionBuffers {
    pub fn new(settings: BufferSettings) -> Self {
        Self {
            sessions: Mutex::new(LruCache::new(settings.max_sessions)),
            settings,
        }
    }

    pub fn capacity(&self) -> usize {
        self.settings.capacity
    }

    fn sessions(&self) -> MutexGuard<'_, LruCache<String, SessionBuffer>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn append(&self, session_id: &str, role: Role, content: impl Into<String>) {
        self.append_at(session_id, role, content.into(), Instant::now());
    }

    fn append_at(&self, session_id: &str, role: Role, content: String, now: Instant) {
        let mut sessions = self.sessions();
        self.expire_idle(&mut sessions, now);

        if !sessions.contains(session_id) {
            if let Some((evicted, _)) = sessions.push(
                session_id.to_string(),
                SessionBuffer {
                    entries: VecDeque::with_capacity(self.settings.capacity + 1),
                    last_active: now,
                },
            ) {
                debug!(session_id = %evicted, "session buffer evicted (session cap reached)");
            }
        }
        let Some(buffer) = sessions.get_mut(session_id) else {
            return;
        };

        buffer.entries.push_back(BufferEntry::new(role, content));
        if buffer.entries.len() > self.settings.capacity {
            buffer.entries.pop_front();
        }
        buffer.last_active = now;
    }

    /// Snapshot of a session's turns, oldest first.  Unknown or expired
    /// sessions read as empty.
    pub fn read(&self, session_id: &str) -> Vec<BufferEntry> {
        self.read_at(session_id, Instant::now())
    }

    fn read_at(&self, session_id: &str, now: Instant) -> Vec<BufferEntry> {
        let sessions = self.sessions();
        match sessions.peek(session_id) {
            Some(buffer) if !buffer.is_expired(self.settings.idle_ttl, now) => {
                buffer.entries.iter().cloned().collect()
            }
            _ => Vec::new(),
        }
    }

    /// Number of live session buffers.
    pub fn len(&self) -> usize {
        let mut sessions = self.sessions();
        self.expire_idle(&mut sessions, Instant::now());
        sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget one session immediately.
    pub fn remove(&self, session_id: &str) -> bool {
        self.sessions().pop(session_id).is_some()
    }

    /// Drop idle sessions.  Reads use `peek`, so LRU order is write order
    /// and the expired sessions are exactly a prefix from the LRU end.
    fn expire_idle(&self, sessions: &mut LruCache<String, SessionBuffer>, now: Instant) {
        let ttl = self.settings.idle_ttl;
        while sessions
            .peek_lru()
            .is_some_and(|(_, buffer)| buffer.is_expired(ttl, now))
        {
            if let Some((session_id, _)) = sessions.pop_lru() {
                debug!(%session_id, "session buffer expired");
            }
        }
    }
}

impl Default for SessionBuffers {
    fn default() -> Self {
        Self::new(BufferSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffers(capacity: usize, max_sessions: usize, ttl: Option<Duration>) -> SessionBuffers {
        SessionBuffers::new(BufferSettings {
            capacity,
            max_sessions: NonZeroUsize::new(max_sessions).unwrap(),
            idle_ttl: ttl,
        })
    }

    #[test]
    fn keeps_only_the_most_recent_turns_in_order() {
        let buffers = buffers(3, 8, None);
        for i in 0..5 {
            buffers.append("s", Role::User, format!("turn {i}"));
        }
        let contents: Vec<String> = buffers.read("s").into_iter().map(|e| e.content).collect();
        assert_eq!(contents, vec!["turn 2", "turn 3", "turn 4"]);
    }

    #[test]
    fn preserves_roles() {
        let buffers = buffers(6, 8, None);
        buffers.append("s", Role::User, "hi");
        buffers.append("s", Role::Assistant, "hello");
        assert_eq!(
            buffers.read("s"),
            vec![
                BufferEntry::new(Role::User, "hi"),
                BufferEntry::new(Role::Assistant, "hello"),
            ]
        );
    }

    #[test]
    fn unknown_session_reads_empty() {
        let buffers = buffers(6, 8, None);
        assert!(buffers.read("nobody").is_empty());
        assert!(buffers.is_empty());
    }

    #[test]
    fn sessions_are_independent() {
        let buffers = buffers(2, 8, None);
        buffers.append("a", Role::User, "a1");
        buffers.append("b", Role::User, "b1");
        buffers.append("a", Role::User, "a2");
        buffers.append("a", Role::User, "a3");
        assert_eq!(buffers.read("a").len(), 2);
        assert_eq!(buffers.read("b")[0].content, "b1");
        assert_eq!(buffers.len(), 2);
    }

    #[test]
    fn least_recently_written_session_is_evicted_at_cap() {
        let buffers = buffers(4, 2, None);
        buffers.append("a", Role::User, "a");
        buffers.append("b", Role::User, "b");
        // Reading does not refresh recency.
        let _ = buffers.read("a");
        buffers.append("c", Role::User, "c");
        assert!(buffers.read("a").is_empty());
        assert_eq!(buffers.read("b").len(), 1);
        assert_eq!(buffers.read("c").len(), 1);
    }

    #[test]
    fn idle_sessions_expire() {
        let buffers = buffers(4, 8, Some(Duration::from_secs(60)));
        let start = Instant::now();
        buffers.append_at("old", Role::User, "x".to_string(), start);
        buffers.append_at("new", Role::User, "y".to_string(), start + Duration::from_secs(50));

        let later = start + Duration::from_secs(90);
        assert!(buffers.read_at("old", later).is_empty());
        assert_eq!(buffers.read_at("new", later).len(), 1);

        buffers.append_at("other", Role::User, "z".to_string(), later);
        assert_eq!(buffers.sessions().len(), 2);
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let buffers = buffers(0, 8, None);
        buffers.append("s", Role::User, "dropped");
        assert!(buffers.read("s").is_empty());
    }

    #[test]
    fn remove_forgets_a_session() {
        let buffers = buffers(4, 8, None);
        buffers.append("s", Role::User, "x");
        assert!(buffers.remove("s"));
        assert!(!buffers.remove("s"));
        assert!(buffers.read("s").is_empty());
    }
}
