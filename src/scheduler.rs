//! Scan request coalescing
//!
//! Scan requests from startup, the watcher and callers all funnel into one
//! [`ScanScheduler`]. A dedicated thread owns the scan callback, so at most
//! one pass runs at a time. Requests arriving while a pass is pending are
//! merged into it; requests arriving while a pass runs produce exactly one
//! follow-up pass.

use chrono::{DateTime, Utc};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::{LibraryError, Result};

/// The callback the scheduler runs for every pass
pub type ScanFn = Box<dyn FnMut() -> Result<()> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    /// A pass is due once the deadline passes
    Pending,
    Running,
}

#[derive(Default)]
struct SchedulerInner {
    deadline: Option<Instant>,
    /// Bumped by every request; compared across a pass to detect new requests
    requests: u64,
    running: bool,
    stopped: bool,
    last_scan_time: Option<DateTime<Utc>>,
    completed_passes: u64,
    subscribers: Vec<Sender<DateTime<Utc>>>,
}

struct Shared {
    inner: Mutex<SchedulerInner>,
    /// Signalled when a request arrives or the scheduler stops
    wake: Condvar,
    /// Signalled after every completed pass
    done: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SchedulerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Coalesces scan requests and runs passes on a dedicated thread
pub struct ScanScheduler {
    shared: Arc<Shared>,
    debounce: Duration,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ScanScheduler {
    /// Start the scheduler thread. No pass runs until one is requested.
    pub fn start(debounce: Duration, scan: ScanFn) -> Result<Self> {
        let shared = Arc::new(Shared {
            inner: Mutex::new(SchedulerInner::default()),
            wake: Condvar::new(),
            done: Condvar::new(),
        });
        let worker = std::thread::Builder::new()
            .name("scan-scheduler".to_string())
            .spawn({
                let shared = Arc::clone(&shared);
                move || run(&shared, scan)
            })
            .map_err(LibraryError::from)?;
        Ok(Self {
            shared,
            debounce,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Ask for a pass.
    ///
    /// A non-immediate request pushes the deadline out to at least
    /// `now + debounce`; an immediate one makes the pass due now.
    pub fn request(&self, immediate: bool) {
        let mut inner = self.shared.lock();
        if inner.stopped {
            return;
        }
        let now = Instant::now();
        inner.deadline = if immediate {
            Some(now)
        } else {
            let due = now + self.debounce;
            Some(inner.deadline.map_or(due, |d| d.max(due)))
        };
        inner.requests += 1;
        log::trace!("Scan requested (immediate: {})", immediate);
        self.shared.wake.notify_all();
    }

    pub fn state(&self) -> SchedulerState {
        let inner = self.shared.lock();
        if inner.running {
            SchedulerState::Running
        } else if inner.deadline.is_some() && !inner.stopped {
            SchedulerState::Pending
        } else {
            SchedulerState::Idle
        }
    }

    /// Completion time of the most recent pass
    pub fn last_scan_time(&self) -> Option<DateTime<Utc>> {
        self.shared.lock().last_scan_time
    }

    pub fn completed_passes(&self) -> u64 {
        self.shared.lock().completed_passes
    }

    /// Block until more than `after` passes have completed.
    ///
    /// Returns false if `timeout` elapsed first.
    pub fn wait_for_pass(&self, after: u64, timeout: Duration) -> bool {
        let inner = self.shared.lock();
        let (inner, _) = self
            .shared
            .done
            .wait_timeout_while(inner, timeout, |inner| {
                inner.completed_passes <= after && !inner.stopped
            })
            .unwrap_or_else(PoisonError::into_inner);
        inner.completed_passes > after
    }

    /// Receive the completion time of every later pass
    pub fn subscribe(&self) -> Receiver<DateTime<Utc>> {
        let (tx, rx) = mpsc::channel();
        self.shared.lock().subscribers.push(tx);
        rx
    }

    /// Stop the scheduler. An in-flight pass finishes first; no pass starts
    /// afterwards.
    pub fn stop(&self) {
        {
            let mut inner = self.shared.lock();
            if inner.stopped {
                return;
            }
            inner.stopped = true;
            self.shared.wake.notify_all();
            self.shared.done.notify_all();
        }
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("Scan scheduler thread panicked");
            }
        }
    }
}

impl Drop for ScanScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(shared: &Shared, mut scan: ScanFn) {
    let mut inner = shared.lock();
    loop {
        if inner.stopped {
            break;
        }
        let Some(deadline) = inner.deadline else {
            inner = shared
                .wake
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
            continue;
        };
        let now = Instant::now();
        if deadline > now {
            inner = shared
                .wake
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            continue;
        }

        let requests_at_start = inner.requests;
        inner.running = true;
        drop(inner);

        log::debug!("Starting scheduled scan");
        if let Err(e) = scan() {
            log::error!("Scan pass failed: {}", e);
        }
        let finished = Utc::now();

        inner = shared.lock();
        inner.running = false;
        if inner.requests == requests_at_start {
            inner.deadline = None;
        }
        inner.last_scan_time = Some(finished);
        inner.completed_passes += 1;
        inner.subscribers.retain(|tx| tx.send(finished).is_ok());
        shared.done.notify_all();
    }
    log::debug!("Scan scheduler stopped");
}
