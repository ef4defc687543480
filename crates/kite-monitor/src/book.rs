//! The position book and the duplicate-suppression ring.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::RwLock;

use crate::exit::{ExitReason, MonitoredPosition};

/// Capacity of the recent-signals ring.
pub const SIGNAL_RING_CAPACITY: usize = 50;

// ---------------------------------------------------------------------------
// SignalRing
// ---------------------------------------------------------------------------

/// Fixed-capacity ring of recently emitted `(code, reason)` pairs, used to
/// suppress duplicate signals inside the dedup window.
#[derive(Debug)]
pub struct SignalRing {
    entries: VecDeque<(String, ExitReason, DateTime<Utc>)>,
    capacity: usize,
}

impl Default for SignalRing {
    fn default() -> Self {
        Self::new(SIGNAL_RING_CAPACITY)
    }
}

impl SignalRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// True when the same `(code, reason)` was recorded within
    /// `window_secs` before `now`.
    pub fn suppressed(
        &self,
        code: &str,
        reason: ExitReason,
        now: DateTime<Utc>,
        window_secs: i64,
    ) -> bool {
        let cutoff = now - Duration::seconds(window_secs);
        self.entries
            .iter()
            .any(|(c, r, at)| c == code && *r == reason && *at > cutoff)
    }

    pub fn record(&mut self, code: &str, reason: ExitReason, at: DateTime<Utc>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((code.to_string(), reason, at));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// PositionBook
// ---------------------------------------------------------------------------

/// The single authority over monitored positions.
///
/// The map lock is `tokio::sync::RwLock` because the sweep holds the write
/// guard across broker price calls (acceptable: position counts are tens,
/// and the serialization is the point — no two decisions for one position
/// can interleave). The ring never crosses an await and stays on a plain
/// mutex.
pub struct PositionBook {
    positions: RwLock<BTreeMap<String, MonitoredPosition>>,
    recent_signals: Mutex<SignalRing>,
}

impl Default for PositionBook {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionBook {
    pub fn new() -> Self {
        Self {
            positions: RwLock::new(BTreeMap::new()),
            recent_signals: Mutex::new(SignalRing::default()),
        }
    }

    /// Add (or replace) a monitored position, keyed by code.
    pub async fn add(&self, position: MonitoredPosition) {
        self.positions
            .write()
            .await
            .insert(position.code.clone(), position);
    }

    pub async fn remove(&self, code: &str) -> Option<MonitoredPosition> {
        self.positions.write().await.remove(code)
    }

    pub async fn get(&self, code: &str) -> Option<MonitoredPosition> {
        self.positions.read().await.get(code).cloned()
    }

    pub async fn snapshot(&self) -> Vec<MonitoredPosition> {
        self.positions.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.positions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.positions.read().await.is_empty()
    }

    /// The sweep borrows the whole map for its critical section.
    pub(crate) fn positions(&self) -> &RwLock<BTreeMap<String, MonitoredPosition>> {
        &self.positions
    }

    /// Check-and-record against the dedup ring in one step.
    /// Returns false (and records nothing) when the signal is suppressed.
    pub fn admit_signal(
        &self,
        code: &str,
        reason: ExitReason,
        now: DateTime<Utc>,
        window_secs: i64,
    ) -> bool {
        let mut ring = self.recent_signals.lock();
        if ring.suppressed(code, reason, now, window_secs) {
            return false;
        }
        ring.record(code, reason, now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_suppresses_inside_window() {
        let mut ring = SignalRing::default();
        let t0 = Utc::now();
        ring.record("005930", ExitReason::Tp1, t0);
        assert!(ring.suppressed("005930", ExitReason::Tp1, t0 + Duration::seconds(30), 60));
        assert!(!ring.suppressed("005930", ExitReason::Tp1, t0 + Duration::seconds(61), 60));
    }

    #[test]
    fn ring_distinguishes_code_and_reason() {
        let mut ring = SignalRing::default();
        let t0 = Utc::now();
        ring.record("005930", ExitReason::Tp1, t0);
        assert!(!ring.suppressed("000660", ExitReason::Tp1, t0, 60));
        assert!(!ring.suppressed("005930", ExitReason::Tp2, t0, 60));
    }

    #[test]
    fn ring_evicts_oldest_at_capacity() {
        let mut ring = SignalRing::new(3);
        let t0 = Utc::now();
        for i in 0..4 {
            ring.record(&format!("{:06}", i), ExitReason::Tp1, t0);
        }
        assert_eq!(ring.len(), 3);
        // The first entry fell off.
        assert!(!ring.suppressed("000000", ExitReason::Tp1, t0, 60));
        assert!(ring.suppressed("000003", ExitReason::Tp1, t0, 60));
    }

    #[tokio::test]
    async fn admit_signal_records_on_first_pass() {
        let book = PositionBook::new();
        let now = Utc::now();
        assert!(book.admit_signal("005930", ExitReason::Tp1, now, 60));
        assert!(!book.admit_signal("005930", ExitReason::Tp1, now, 60));
        assert!(book.admit_signal("005930", ExitReason::Tp2, now, 60));
    }

    #[tokio::test]
    async fn book_add_get_remove() {
        let book = PositionBook::new();
        let cfg = kite_config::MonitorConfig::default();
        book.add(MonitoredPosition::open("005930", 10_000, 100, 0.02, Utc::now(), &cfg))
            .await;
        assert_eq!(book.len().await, 1);
        assert!(book.get("005930").await.is_some());
        assert!(book.remove("005930").await.is_some());
        assert!(book.is_empty().await);
    }
}
