use crate::models::{LogRecord, TraceItem};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// A record with its arrival sequence; ties on time keep arrival order.
#[derive(Debug)]
struct Pending {
    time: f64,
    seq: u64,
    record: LogRecord,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Bounded time-reorder window in front of latency pairing.
///
/// Holds up to `window` records and releases the earliest one each time it
/// overflows. Input whose records are displaced by at most `window` positions
/// comes out sorted by time; a record older than one already released is
/// passed through as is and counted in [`late`](Self::late).
#[derive(Debug)]
pub struct TimeOrderBuffer {
    heap: BinaryHeap<Reverse<Pending>>,
    window: usize,
    seq: u64,
    last_released: Option<f64>,
    late: u64,
}

impl TimeOrderBuffer {
    pub fn new(window: usize) -> Self {
        TimeOrderBuffer {
            heap: BinaryHeap::with_capacity(window.min(1 << 16) + 1),
            window,
            seq: 0,
            last_released: None,
            late: 0,
        }
    }

    /// Records that arrived after a later record had already been released.
    pub fn late(&self) -> u64 {
        self.late
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Add a record; returns the earliest held record once the window is full.
    pub fn push(&mut self, record: LogRecord) -> Option<LogRecord> {
        let time = record.time();
        if self.last_released.is_some_and(|t| time < t) {
            self.late += 1;
        }
        self.heap.push(Reverse(Pending {
            time,
            seq: self.seq,
            record,
        }));
        self.seq += 1;

        if self.heap.len() > self.window {
            self.pop()
        } else {
            None
        }
    }

    /// Earliest held record, regardless of the window.
    pub fn pop(&mut self) -> Option<LogRecord> {
        let Reverse(pending) = self.heap.pop()?;
        self.last_released = Some(match self.last_released {
            Some(t) => t.max(pending.time),
            None => pending.time,
        });
        Some(pending.record)
    }
}
