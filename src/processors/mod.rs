mod block;
mod reorder;
mod ufs;

pub use block::{BlockLatencyTracker, DEFAULT_MAX_PENDING};
pub use reorder::TimeOrderBuffer;
pub use ufs::UfsLatencyTracker;

use crate::models::{LogRecord, TraceType};

/// Records held for time ordering before latency pairing.
pub const DEFAULT_REORDER_WINDOW: usize = 65_536;

#[derive(Debug)]
enum Tracker {
    Ufs(UfsLatencyTracker),
    Block(BlockLatencyTracker),
}

impl Tracker {
    fn process(&mut self, record: LogRecord) -> Option<LogRecord> {
        match (self, record) {
            (Tracker::Ufs(tracker), LogRecord::Ufs(ufs)) => Some(LogRecord::Ufs(tracker.process(ufs))),
            (Tracker::Block(tracker), LogRecord::Block(block)) => {
                tracker.process(block).map(LogRecord::Block)
            }
            (_, other) => Some(other),
        }
    }
}

/// Per-job latency derivation for the committed family.
///
/// Records pass through a [`TimeOrderBuffer`] first, so pairing sees them in
/// time order even when sources interleave. Call [`finish`](Self::finish)
/// after the last record to flush what the window still holds.
#[derive(Debug)]
pub struct LatencyEnricher {
    tracker: Tracker,
    order: TimeOrderBuffer,
}

impl LatencyEnricher {
    /// No reordering: records are paired in arrival order.
    pub fn for_family(family: TraceType) -> Self {
        Self::with_limits(family, 0, DEFAULT_MAX_PENDING)
    }

    pub fn with_limits(family: TraceType, reorder_window: usize, max_pending: usize) -> Self {
        let tracker = match family {
            TraceType::Ufs => Tracker::Ufs(UfsLatencyTracker::new()),
            TraceType::Block => Tracker::Block(BlockLatencyTracker::with_max_pending(max_pending)),
        };
        LatencyEnricher {
            tracker,
            order: TimeOrderBuffer::new(reorder_window),
        }
    }

    /// Feed one record; returns the record released from the window with its
    /// derived fields filled in. `None` means nothing was released yet, or
    /// the released record was a duplicate event and is dropped.
    pub fn enrich(&mut self, record: LogRecord) -> Option<LogRecord> {
        let released = self.order.push(record)?;
        self.tracker.process(released)
    }

    /// Drain the window, oldest first.
    pub fn finish(&mut self) -> Vec<LogRecord> {
        let mut out = Vec::with_capacity(self.order.len());
        while let Some(record) = self.order.pop() {
            out.extend(self.tracker.process(record));
        }
        out
    }

    pub fn dropped(&self) -> u64 {
        match &self.tracker {
            Tracker::Ufs(_) => 0,
            Tracker::Block(tracker) => tracker.dropped(),
        }
    }

    /// UFS completions without an issue, or block issues given up without a completion.
    pub fn unpaired(&self) -> u64 {
        match &self.tracker {
            Tracker::Ufs(tracker) => tracker.unpaired_completes(),
            Tracker::Block(tracker) => tracker.unpaired(),
        }
    }

    /// Records that arrived too late for the window to order them.
    pub fn late(&self) -> u64 {
        self.order.late()
    }
}
