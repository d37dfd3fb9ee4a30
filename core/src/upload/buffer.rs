use crate::detection::DetectionEvent;
use crate::telemetry::log::LogManager;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Immutable snapshot of outbound events, taken by a single drain.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadBatch {
    events: Vec<DetectionEvent>,
}

impl UploadBatch {
    pub fn events(&self) -> &[DetectionEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn into_events(self) -> Vec<DetectionEvent> {
        self.events
    }
}

/// Backpressure result of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// The buffer was full and its oldest event was discarded.
    DroppedOldest,
}

/// Why the upload worker woke up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    Timer,
    BatchReady,
    Stop,
}

struct BufferState {
    events: VecDeque<DetectionEvent>,
    dropped: usize,
    stopping: bool,
}

/// Mutex-protected hand-off between the capture loop and the upload worker.
pub struct OutboundBuffer {
    state: Mutex<BufferState>,
    wake: Condvar,
    capacity: usize,
    batch_size: usize,
    logger: LogManager,
}

impl OutboundBuffer {
    pub fn new(capacity: usize, batch_size: usize) -> Self {
        Self {
            state: Mutex::new(BufferState {
                events: VecDeque::new(),
                dropped: 0,
                stopping: false,
            }),
            wake: Condvar::new(),
            capacity: capacity.max(1),
            batch_size: batch_size.max(1),
            logger: LogManager::new("outbound"),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends an event, discarding the oldest one when full.
    pub fn push(&self, event: DetectionEvent) -> PushOutcome {
        let mut state = self.lock();
        let mut outcome = PushOutcome::Queued;
        if state.events.len() >= self.capacity {
            state.events.pop_front();
            state.dropped += 1;
            outcome = PushOutcome::DroppedOldest;
            self.logger.warn(&format!(
                "buffer full at {} events, dropped oldest ({} total)",
                self.capacity, state.dropped
            ));
        }
        state.events.push_back(event);
        if state.events.len() >= self.batch_size {
            self.wake.notify_all();
        }
        outcome
    }

    /// Takes every buffered event in one step; `None` when empty.
    pub fn drain(&self) -> Option<UploadBatch> {
        let mut state = self.lock();
        if state.events.is_empty() {
            return None;
        }
        let events: Vec<_> = state.events.drain(..).collect();
        Some(UploadBatch { events })
    }

    /// Puts an undeliverable batch back in front of newer events. Capacity
    /// is not enforced here so restored events are never discarded.
    pub fn restore(&self, batch: UploadBatch) {
        let mut state = self.lock();
        for event in batch.events.into_iter().rev() {
            state.events.push_front(event);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events discarded by the drop-oldest policy so far.
    pub fn dropped(&self) -> usize {
        self.lock().dropped
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn request_stop(&self) {
        self.lock().stopping = true;
        self.wake.notify_all();
    }

    pub fn is_stopping(&self) -> bool {
        self.lock().stopping
    }

    /// Blocks until the timer elapses, a full batch is buffered, or a stop
    /// is requested, whichever comes first.
    pub fn wait_for_work(&self, interval: Duration) -> WakeReason {
        let state = self.lock();
        let batch_size = self.batch_size;
        let (state, _) = self
            .wake
            .wait_timeout_while(state, interval, |s| {
                !s.stopping && s.events.len() < batch_size
            })
            .unwrap_or_else(PoisonError::into_inner);
        if state.stopping {
            WakeReason::Stop
        } else if state.events.len() >= batch_size {
            WakeReason::BatchReady
        } else {
            WakeReason::Timer
        }
    }

    /// Blocks until a stop is requested.
    pub fn wait_for_stop(&self) {
        let state = self.lock();
        let _state = self
            .wake
            .wait_while(state, |s| !s.stopping)
            .unwrap_or_else(PoisonError::into_inner);
    }
}
