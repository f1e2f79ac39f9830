//! NAT session tracking
//!
//! The session table is a concurrent map from session id to session record,
//! paired with an LRU index used for eviction under capacity pressure.
//!
//! # Thread Safety
//!
//! The map is a `DashMap` shared by flow tasks and the sweeper. All map
//! mutations happen while holding the LRU mutex, so the map entry and the
//! LRU entry of a session always publish and retract together; lookups stay
//! lock-free.
//!
//! # Capacity
//!
//! The effective capacity is the configured session cap bounded by a memory
//! estimate (`maxMemoryMB` at roughly 2 KiB per session). Creating a session
//! at capacity evicts least-recently-used entries rather than rejecting the
//! new flow.

use std::cmp;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::endpoint::{Endpoint, Network};
use crate::error::FlowError;
use crate::stats::NatStats;

/// Rough per-session memory footprint used for the memory cap
const SESSION_MEMORY_ESTIMATE: u64 = 2048;

/// Direction of the flow that created a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Flow initiated from this site
    Outbound,
    /// Flow initiated from the remote site
    Inbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Outbound => f.write_str("outbound"),
            Self::Inbound => f.write_str("inbound"),
        }
    }
}

/// Session timeout configuration, per protocol
#[derive(Debug, Clone, Copy)]
pub struct SessionTimeouts {
    /// Idle timeout for TCP sessions
    pub tcp: Duration,
    /// Idle timeout for UDP sessions
    pub udp: Duration,
    /// Interval between sweeper runs
    pub sweep_interval: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            tcp: Duration::from_secs(300),
            udp: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Session table resource limits
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    /// Maximum concurrently tracked sessions
    pub max_sessions: u64,
    /// Memory budget for session records, in MiB
    pub max_memory_mb: u64,
    /// Occupancy fraction above which the sweeper reports pressure
    pub evict_threshold: f64,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_sessions: 10_000,
            max_memory_mb: 100,
            evict_threshold: 0.8,
        }
    }
}

impl SessionLimits {
    /// The session cap after applying the memory budget
    ///
    /// Both caps are enforced with one eviction loop against this value.
    #[must_use]
    pub fn effective_max_sessions(&self) -> u64 {
        let from_memory = self.max_memory_mb * 1024 * 1024 / SESSION_MEMORY_ESTIMATE;
        cmp::min(self.max_sessions, from_memory)
    }
}

/// A single NAT translation session
///
/// Created when a flow first matches a rule; removed when the flow closes,
/// when the sweeper expires it, or when it is evicted under pressure. Each
/// of those happens at most once per session.
#[derive(Debug)]
pub struct NatSession {
    id: String,
    protocol: Network,
    virtual_dest: Endpoint,
    real_dest: Endpoint,
    direction: Direction,
    created_at: Instant,
    last_activity: Mutex<Instant>,
}

impl NatSession {
    fn new(
        id: String,
        virtual_dest: Endpoint,
        real_dest: Endpoint,
        direction: Direction,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            protocol: virtual_dest.network,
            virtual_dest,
            real_dest,
            direction,
            created_at: now,
            last_activity: Mutex::new(now),
        }
    }

    /// Opaque session identifier, unique among live sessions
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Transport protocol of the flow
    #[must_use]
    pub const fn protocol(&self) -> Network {
        self.protocol
    }

    /// The virtual destination the flow was addressed to
    #[must_use]
    pub const fn virtual_dest(&self) -> &Endpoint {
        &self.virtual_dest
    }

    /// The real destination after translation
    #[must_use]
    pub const fn real_dest(&self) -> &Endpoint {
        &self.real_dest
    }

    /// Direction of the flow that created the session
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Session age
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Last observed activity
    #[must_use]
    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    fn mark_active(&self) {
        *self.last_activity.lock() = Instant::now();
    }
}

/// Concurrent session table with LRU eviction and TTL sweep
pub struct SessionTable {
    sessions: DashMap<String, Arc<NatSession>>,
    /// LRU index, most-recent first; guarded so map and index mutate together
    lru: Mutex<LruCache<String, ()>>,
    timeouts: SessionTimeouts,
    capacity: u64,
    evict_threshold: f64,
    next_seq: AtomicU64,
    stats: Arc<NatStats>,
}

impl SessionTable {
    /// Create a session table
    #[must_use]
    pub fn new(timeouts: SessionTimeouts, limits: SessionLimits, stats: Arc<NatStats>) -> Self {
        Self {
            sessions: DashMap::new(),
            lru: Mutex::new(LruCache::unbounded()),
            timeouts,
            capacity: limits.effective_max_sessions(),
            evict_threshold: limits.evict_threshold,
            next_seq: AtomicU64::new(1),
            stats,
        }
    }

    /// The effective session capacity
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Number of tracked sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Create and track a new session
    ///
    /// Evicts least-recently-used sessions until the new one fits.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::SessionTableFull` only when the capacity is zero,
    /// i.e. no session can ever be admitted.
    pub fn create(
        &self,
        virtual_dest: Endpoint,
        real_dest: Endpoint,
        direction: Direction,
    ) -> Result<Arc<NatSession>, FlowError> {
        if self.capacity == 0 {
            return Err(FlowError::SessionTableFull { capacity: 0 });
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let id = format!("{virtual_dest}->{real_dest}#{seq}");
        let session = Arc::new(NatSession::new(id.clone(), virtual_dest, real_dest, direction));

        let mut lru = self.lru.lock();
        while self.sessions.len() as u64 >= self.capacity {
            let Some((victim, ())) = lru.pop_lru() else {
                // Index drained but the map still reports occupancy; refuse
                // rather than overshoot the cap.
                return Err(FlowError::SessionTableFull {
                    capacity: self.capacity,
                });
            };
            if self.sessions.remove(&victim).is_some() {
                self.stats.record_session_removed();
                debug!(session_id = %victim, "NAT session evicted (LRU pressure)");
            }
        }
        self.sessions.insert(id.clone(), Arc::clone(&session));
        lru.put(id, ());
        // Counted before the lock drops so an immediate eviction by another
        // flow cannot observe the session uncounted.
        self.stats.record_session_created();
        drop(lru);

        debug!(
            session_id = %session.id,
            virtual_dest = %session.virtual_dest,
            real_dest = %session.real_dest,
            direction = %session.direction,
            "NAT session created"
        );
        Ok(session)
    }

    /// Look up a session by id without touching it
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<NatSession>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Mark activity on a session and move it to the LRU head
    pub fn touch(&self, session: &NatSession) {
        session.mark_active();
        self.lru.lock().promote(session.id());
    }

    /// Remove a session; idempotent
    ///
    /// Returns the removed session, or `None` if it was already gone.
    pub fn remove(&self, id: &str) -> Option<Arc<NatSession>> {
        let mut lru = self.lru.lock();
        lru.pop(id);
        let removed = self.sessions.remove(id).map(|(_, session)| session);
        drop(lru);

        if let Some(session) = &removed {
            self.stats.record_session_removed();
            debug!(
                session_id = %session.id,
                age_secs = session.age().as_secs(),
                "NAT session removed"
            );
        }
        removed
    }

    /// Remove every session idle past its protocol timeout
    ///
    /// Returns the number of sessions removed. `now` may lie in the future
    /// relative to the sessions' clocks; entries older than their timeout at
    /// `now` are expired.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut expired = Vec::new();
        for entry in self.sessions.iter() {
            let timeout = self.timeout_for(entry.protocol());
            if now.saturating_duration_since(entry.last_activity()) > timeout {
                expired.push(entry.key().clone());
            }
        }

        let mut removed = 0;
        for id in expired {
            if self.remove(&id).is_some() {
                removed += 1;
            }
        }

        let occupancy = self.sessions.len() as f64 / self.capacity as f64;
        if occupancy > self.evict_threshold {
            warn!(
                active = self.sessions.len(),
                capacity = self.capacity,
                threshold = self.evict_threshold,
                "Session table occupancy above threshold"
            );
        }
        removed
    }

    /// Idle timeout for a protocol
    #[must_use]
    pub const fn timeout_for(&self, protocol: Network) -> Duration {
        match protocol {
            Network::Tcp => self.timeouts.tcp,
            Network::Udp => self.timeouts.udp,
        }
    }

    /// Interval between sweeper runs
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        self.timeouts.sweep_interval
    }
}

impl fmt::Debug for SessionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTable")
            .field("len", &self.sessions.len())
            .field("capacity", &self.capacity)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_limits(limits: SessionLimits) -> SessionTable {
        SessionTable::new(SessionTimeouts::default(), limits, Arc::new(NatStats::new()))
    }

    fn dests(n: u8) -> (Endpoint, Endpoint) {
        (
            Endpoint::tcp(format!("240.2.2.{n}").parse().unwrap(), 80),
            Endpoint::tcp(format!("192.168.1.{n}").parse().unwrap(), 80),
        )
    }

    #[test]
    fn test_create_get_remove() {
        let table = table_with_limits(SessionLimits::default());
        let (virt, real) = dests(20);

        let session = table.create(virt.clone(), real.clone(), Direction::Outbound).unwrap();
        assert_eq!(session.virtual_dest(), &virt);
        assert_eq!(session.real_dest(), &real);
        assert_eq!(session.protocol(), Network::Tcp);
        assert_eq!(table.len(), 1);

        let found = table.get(session.id()).unwrap();
        assert_eq!(found.id(), session.id());

        let removed = table.remove(session.id()).unwrap();
        assert_eq!(removed.id(), session.id());
        assert!(table.is_empty());

        // Idempotent
        assert!(table.remove(session.id()).is_none());
    }

    #[test]
    fn test_session_ids_unique() {
        let table = table_with_limits(SessionLimits::default());
        let (virt, real) = dests(20);

        let a = table.create(virt.clone(), real.clone(), Direction::Outbound).unwrap();
        let b = table.create(virt, real, Direction::Outbound).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_lru_eviction_order() {
        let table = table_with_limits(SessionLimits {
            max_sessions: 2,
            ..SessionLimits::default()
        });

        let (virt_a, real_a) = dests(1);
        let (virt_b, real_b) = dests(2);
        let (virt_c, real_c) = dests(3);

        let a = table.create(virt_a, real_a, Direction::Outbound).unwrap();
        let b = table.create(virt_b, real_b, Direction::Outbound).unwrap();
        let c = table.create(virt_c, real_c, Direction::Outbound).unwrap();

        // Oldest session was evicted to make room.
        assert_eq!(table.len(), 2);
        assert!(table.get(a.id()).is_none());
        assert!(table.get(b.id()).is_some());
        assert!(table.get(c.id()).is_some());
    }

    #[test]
    fn test_touch_protects_from_eviction() {
        let table = table_with_limits(SessionLimits {
            max_sessions: 2,
            ..SessionLimits::default()
        });

        let (virt_a, real_a) = dests(1);
        let (virt_b, real_b) = dests(2);
        let (virt_c, real_c) = dests(3);

        let a = table.create(virt_a, real_a, Direction::Outbound).unwrap();
        let b = table.create(virt_b, real_b, Direction::Outbound).unwrap();

        // Activity on A makes B the eviction candidate.
        table.touch(&a);
        table.create(virt_c, real_c, Direction::Outbound).unwrap();

        assert!(table.get(a.id()).is_some());
        assert!(table.get(b.id()).is_none());
    }

    #[test]
    fn test_zero_capacity_rejects() {
        let table = table_with_limits(SessionLimits {
            max_sessions: 0,
            ..SessionLimits::default()
        });
        let (virt, real) = dests(20);
        let err = table.create(virt, real, Direction::Outbound).unwrap_err();
        assert!(matches!(err, FlowError::SessionTableFull { capacity: 0 }));
    }

    #[test]
    fn test_memory_cap_bounds_capacity() {
        // 1 MiB at 2 KiB per session admits 512 sessions.
        let limits = SessionLimits {
            max_sessions: 10_000,
            max_memory_mb: 1,
            evict_threshold: 0.8,
        };
        assert_eq!(limits.effective_max_sessions(), 512);

        // The smaller of the two caps always wins.
        let limits = SessionLimits {
            max_sessions: 100,
            max_memory_mb: 1,
            evict_threshold: 0.8,
        };
        assert_eq!(limits.effective_max_sessions(), 100);
    }

    #[test]
    fn test_capacity_never_exceeded() {
        let table = table_with_limits(SessionLimits {
            max_sessions: 3,
            ..SessionLimits::default()
        });

        for n in 0..20 {
            let (virt, real) = dests(n);
            table.create(virt, real, Direction::Outbound).unwrap();
            assert!(table.len() as u64 <= table.capacity());
        }
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_sweep_expires_by_protocol_timeout() {
        let timeouts = SessionTimeouts {
            tcp: Duration::from_secs(300),
            udp: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(30),
        };
        let table = SessionTable::new(
            timeouts,
            SessionLimits::default(),
            Arc::new(NatStats::new()),
        );

        let tcp = table
            .create(
                Endpoint::tcp("240.2.2.1".parse().unwrap(), 80),
                Endpoint::tcp("192.168.1.1".parse().unwrap(), 80),
                Direction::Outbound,
            )
            .unwrap();
        let udp = table
            .create(
                Endpoint::udp("240.2.2.2".parse().unwrap(), 53),
                Endpoint::udp("192.168.1.2".parse().unwrap(), 53),
                Direction::Outbound,
            )
            .unwrap();

        // One second in: nothing expires.
        assert_eq!(table.sweep(Instant::now() + Duration::from_secs(1)), 0);
        assert_eq!(table.len(), 2);

        // Past the UDP timeout but inside the TCP one.
        assert_eq!(table.sweep(Instant::now() + Duration::from_secs(61)), 1);
        assert!(table.get(udp.id()).is_none());
        assert!(table.get(tcp.id()).is_some());

        // Past the TCP timeout.
        assert_eq!(table.sweep(Instant::now() + Duration::from_secs(301)), 1);
        assert!(table.get(tcp.id()).is_none());
    }

    #[test]
    fn test_touch_defers_expiry() {
        let table = table_with_limits(SessionLimits::default());
        let (virt, real) = dests(20);
        let session = table.create(virt, real, Direction::Outbound).unwrap();

        let before = session.last_activity();
        std::thread::sleep(Duration::from_millis(5));
        table.touch(&session);
        assert!(session.last_activity() > before);
    }

    #[test]
    fn test_stats_track_lifecycle() {
        let stats = Arc::new(NatStats::new());
        let table = SessionTable::new(
            SessionTimeouts::default(),
            SessionLimits {
                max_sessions: 1,
                ..SessionLimits::default()
            },
            Arc::clone(&stats),
        );

        let (virt_a, real_a) = dests(1);
        let (virt_b, real_b) = dests(2);

        table.create(virt_a, real_a, Direction::Outbound).unwrap();
        // Second create evicts the first.
        let b = table.create(virt_b, real_b, Direction::Outbound).unwrap();

        assert_eq!(stats.total_sessions_created(), 2);
        assert_eq!(stats.active_sessions(), 1);

        table.remove(b.id());
        assert_eq!(stats.active_sessions(), 0);
    }
}
