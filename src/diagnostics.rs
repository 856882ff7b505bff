//! Counters and session history of the link.
//!
//! The running counters are atomics so the receive path never waits on a reader. Session
//! start and history sit behind a mutex that is only touched on connection boundaries and
//! when a snapshot is taken.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::frame::Drained;
use crate::message::Ignored;

/// One completed connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub duration: Duration,
    pub writes: u64,
    pub notifications: u64,
    pub ended_at: DateTime<Utc>,
}

/// A point-in-time copy of the link's diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// When the current session reached `Connected`, `None` outside a session
    pub connection_start_time: Option<DateTime<Utc>>,
    /// Successful writes since the current connection attempt began
    pub write_count: u64,
    /// Inbound notifications since the current connection attempt began
    pub notification_count: u64,
    pub last_heartbeat_time: Option<DateTime<Utc>>,
    /// Oldest first
    pub session_history: Vec<SessionRecord>,
    pub malformed_scans: u64,
    pub discarded_bytes: u64,
    pub ignored_frames: u64,
    pub implausible_readings: u64,
    pub unexpected_disconnects: u64,
}

#[derive(Debug, Default)]
struct SessionClock {
    started: Option<(Instant, DateTime<Utc>)>,
    last_heartbeat: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct DiagnosticsRecorder {
    writes: AtomicU64,
    notifications: AtomicU64,
    malformed_scans: AtomicU64,
    discarded_bytes: AtomicU64,
    ignored_frames: AtomicU64,
    implausible_readings: AtomicU64,
    unexpected_disconnects: AtomicU64,
    clock: Mutex<SessionClock>,
    history: Mutex<VecDeque<SessionRecord>>,
    history_len: usize,
}

impl DiagnosticsRecorder {
    pub fn new(history_len: usize) -> Self {
        Self {
            writes: AtomicU64::new(0),
            notifications: AtomicU64::new(0),
            malformed_scans: AtomicU64::new(0),
            discarded_bytes: AtomicU64::new(0),
            ignored_frames: AtomicU64::new(0),
            implausible_readings: AtomicU64::new(0),
            unexpected_disconnects: AtomicU64::new(0),
            clock: Mutex::new(SessionClock::default()),
            history: Mutex::new(VecDeque::with_capacity(history_len)),
            history_len,
        }
    }

    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_heartbeat(&self) {
        lock(&self.clock).last_heartbeat = Some(Utc::now());
    }

    /// Count one inbound chunk, however many frames it held
    pub fn record_notification(&self) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drain(&self, drained: &Drained) {
        if drained.malformed {
            self.malformed_scans.fetch_add(1, Ordering::Relaxed);
        }
        self.discarded_bytes.fetch_add(drained.discarded as u64, Ordering::Relaxed);
    }

    pub fn record_ignored(&self, reason: Ignored) {
        self.ignored_frames.fetch_add(1, Ordering::Relaxed);
        if reason.is_implausible() {
            self.implausible_readings.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_unexpected_disconnect(&self) {
        self.unexpected_disconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// A new connection attempt starts counting from zero
    pub fn begin_attempt(&self) {
        self.reset_counters();
    }

    pub fn session_started(&self) {
        lock(&self.clock).started = Some((Instant::now(), Utc::now()));
    }

    /// Close the running session, if any, and move it into the history
    pub fn session_ended(&self) {
        let Some((started, _)) = lock(&self.clock).started.take() else {
            return;
        };
        let (writes, notifications) = self.reset_counters();
        let record = SessionRecord {
            duration: started.elapsed(),
            writes,
            notifications,
            ended_at: Utc::now(),
        };

        let mut history = lock(&self.history);
        if history.len() == self.history_len {
            history.pop_front();
        }
        if self.history_len > 0 {
            history.push_back(record);
        }
    }

    pub fn snapshot(&self) -> Diagnostics {
        let (connection_start_time, last_heartbeat_time) = {
            let clock = lock(&self.clock);
            (clock.started.map(|(_, at)| at), clock.last_heartbeat)
        };
        Diagnostics {
            connection_start_time,
            write_count: self.writes.load(Ordering::Relaxed),
            notification_count: self.notifications.load(Ordering::Relaxed),
            last_heartbeat_time,
            session_history: lock(&self.history).iter().cloned().collect(),
            malformed_scans: self.malformed_scans.load(Ordering::Relaxed),
            discarded_bytes: self.discarded_bytes.load(Ordering::Relaxed),
            ignored_frames: self.ignored_frames.load(Ordering::Relaxed),
            implausible_readings: self.implausible_readings.load(Ordering::Relaxed),
            unexpected_disconnects: self.unexpected_disconnects.load(Ordering::Relaxed),
        }
    }

    fn reset_counters(&self) -> (u64, u64) {
        (
            self.writes.swap(0, Ordering::Relaxed),
            self.notifications.swap(0, Ordering::Relaxed),
        )
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[test]
fn test_session_record_on_end() {
    let recorder = DiagnosticsRecorder::new(10);
    recorder.begin_attempt();
    recorder.record_write();
    recorder.session_started();
    recorder.record_write();
    recorder.record_notification();

    let running = recorder.snapshot();
    assert!(running.connection_start_time.is_some());
    assert_eq!(running.write_count, 2);
    assert_eq!(running.notification_count, 1);

    recorder.session_ended();
    let ended = recorder.snapshot();
    assert_eq!(ended.connection_start_time, None);
    assert_eq!(ended.write_count, 0);
    assert_eq!(ended.notification_count, 0);
    assert_eq!(ended.session_history.len(), 1);
    assert_eq!(ended.session_history[0].writes, 2);
    assert_eq!(ended.session_history[0].notifications, 1);
}

#[test]
fn test_session_ended_without_session_is_noop() {
    let recorder = DiagnosticsRecorder::new(10);
    recorder.record_write();
    recorder.session_ended();
    let snapshot = recorder.snapshot();
    assert!(snapshot.session_history.is_empty());
    assert_eq!(snapshot.write_count, 1);
}

#[test]
fn test_history_is_bounded() {
    let recorder = DiagnosticsRecorder::new(2);
    for writes in 1..=3 {
        recorder.session_started();
        for _ in 0..writes {
            recorder.record_write();
        }
        recorder.session_ended();
    }
    let history = recorder.snapshot().session_history;
    let writes: Vec<u64> = history.iter().map(|r| r.writes).collect();
    assert_eq!(writes, vec![2, 3]);
}

#[test]
fn test_ignored_and_malformed_counters() {
    let recorder = DiagnosticsRecorder::new(1);
    recorder.record_ignored(Ignored::Implausible);
    recorder.record_ignored(Ignored::UnknownType(0x42));
    recorder.record_drain(&Drained { frames: Vec::new(), discarded: 3, malformed: true });
    let snapshot = recorder.snapshot();
    assert_eq!(snapshot.ignored_frames, 2);
    assert_eq!(snapshot.implausible_readings, 1);
    assert_eq!(snapshot.malformed_scans, 1);
    assert_eq!(snapshot.discarded_bytes, 3);
}
