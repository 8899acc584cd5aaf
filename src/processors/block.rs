use crate::models::Block;
use crate::utils::constants::MILLISECONDS;
use std::collections::{HashMap, VecDeque};

/// In-flight requests tracked before the oldest is given up as unpaired.
pub const DEFAULT_MAX_PENDING: usize = 65_536;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum IoOperation {
    Read,
    Write,
    Discard,
    Other,
}

impl IoOperation {
    fn of(io_type: &str) -> Self {
        match io_type.as_bytes().first() {
            Some(b'R') => IoOperation::Read,
            Some(b'W') => IoOperation::Write,
            Some(b'D') => IoOperation::Discard,
            _ => IoOperation::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Issue,
    Complete,
    Other,
}

// ftrace는 block_rq_issue/complete, blktrace는 Q(dispatch)/C(complete)
fn phase(action: &str) -> Phase {
    match action {
        "block_rq_issue" | "Q" => Phase::Issue,
        "block_rq_complete" | "C" => Phase::Complete,
        _ => Phase::Other,
    }
}

/// Incremental block-layer latency derivation with duplicate-issue removal.
///
/// A repeated issue of the same `(sector, operation, size)` before its
/// completion is dropped, as is the second flush completion (write of size 0).
///
/// At most `max_pending` issues wait for their completion. Past that the
/// oldest one is evicted and counted in [`unpaired`](Self::unpaired); a
/// completion arriving for it later keeps `dtoc = 0`.
#[derive(Debug)]
pub struct BlockLatencyTracker {
    // 요청 -> issue 시각
    pending_issues: HashMap<(u64, IoOperation, u32), f64>,
    issue_order: VecDeque<((u64, IoOperation, u32), f64)>,
    max_pending: usize,
    unpaired: u64,
    req_times: HashMap<(u64, IoOperation), f64>,
    current_qd: u32,
    last_complete_time: Option<f64>,
    last_complete_qd0_time: Option<f64>,
    prev_end_sector: Option<u64>,
    prev_operation: Option<IoOperation>,
    first_c: bool,
    first_complete_time: f64,
    dropped: u64,
}

impl Default for BlockLatencyTracker {
    fn default() -> Self {
        Self::with_max_pending(DEFAULT_MAX_PENDING)
    }
}

impl BlockLatencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_pending(max_pending: usize) -> Self {
        BlockLatencyTracker {
            pending_issues: HashMap::new(),
            issue_order: VecDeque::new(),
            max_pending: max_pending.max(1),
            unpaired: 0,
            req_times: HashMap::new(),
            current_qd: 0,
            last_complete_time: None,
            last_complete_qd0_time: None,
            prev_end_sector: None,
            prev_operation: None,
            first_c: false,
            first_complete_time: 0.0,
            dropped: 0,
        }
    }

    /// Issues given up after waiting too long for a completion.
    pub fn unpaired(&self) -> u64 {
        self.unpaired
    }

    /// Issues still waiting for their completion.
    pub fn pending(&self) -> usize {
        self.pending_issues.len()
    }

    /// Events removed as duplicates so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn queue_depth(&self) -> u32 {
        self.current_qd
    }

    /// Returns `None` when the event is a duplicate and must not be emitted.
    pub fn process(&mut self, mut block: Block) -> Option<Block> {
        let operation = IoOperation::of(&block.io_type);
        let phase = phase(&block.action);

        match phase {
            Phase::Issue => {
                let request = (block.sector, operation, block.size);
                if self.pending_issues.contains_key(&request) {
                    self.dropped += 1;
                    return None;
                }
                self.pending_issues.insert(request, block.time);
                self.issue_order.push_back((request, block.time));
                self.evict_overflow();
            }
            Phase::Complete => {
                // Flush는 두 번 찍힘 (FF->WS)
                if operation == IoOperation::Write && block.size == 0 {
                    self.dropped += 1;
                    return None;
                }
                self.pending_issues
                    .remove(&(block.sector, operation, block.size));
                if self.issue_order.len() > 2 * self.max_pending {
                    self.compact_order();
                }
            }
            Phase::Other => {}
        }

        block.continuous = false;
        let key = (block.sector, operation);

        match phase {
            Phase::Issue => {
                if operation != IoOperation::Other {
                    if let (Some(end_sector), Some(prev_op)) =
                        (self.prev_end_sector, self.prev_operation)
                    {
                        block.continuous = block.sector == end_sector && operation == prev_op;
                    }
                    self.prev_end_sector = Some(block.sector.saturating_add(block.size as u64));
                    self.prev_operation = Some(operation);
                }

                self.req_times.insert(key, block.time);
                self.current_qd += 1;

                if let Some(t) = self.last_complete_qd0_time {
                    block.ctod = (block.time - t) * MILLISECONDS;
                }
                if self.current_qd == 1 {
                    self.first_c = true;
                    self.first_complete_time = block.time;
                }
            }
            Phase::Complete => {
                if let Some(issue_time) = self.req_times.remove(&key) {
                    block.dtoc = (block.time - issue_time) * MILLISECONDS;
                }

                if self.first_c {
                    block.ctoc = (block.time - self.first_complete_time) * MILLISECONDS;
                    self.first_c = false;
                } else if let Some(t) = self.last_complete_time {
                    block.ctoc = (block.time - t) * MILLISECONDS;
                }

                self.current_qd = self.current_qd.saturating_sub(1);
                if self.current_qd == 0 {
                    self.last_complete_qd0_time = Some(block.time);
                }
                self.last_complete_time = Some(block.time);
            }
            Phase::Other => {}
        }

        block.qd = self.current_qd;
        Some(block)
    }

    fn is_live(&self, request: &(u64, IoOperation, u32), time: f64) -> bool {
        self.pending_issues.get(request) == Some(&time)
    }

    // 오래된 순서로 미완료 요청 제거
    fn evict_overflow(&mut self) {
        while self.pending_issues.len() > self.max_pending {
            let Some((request, time)) = self.issue_order.pop_front() else {
                break;
            };
            if !self.is_live(&request, time) {
                continue;
            }
            self.pending_issues.remove(&request);
            let key = (request.0, request.1);
            if self.req_times.get(&key) == Some(&time) {
                self.req_times.remove(&key);
            }
            self.current_qd = self.current_qd.saturating_sub(1);
            self.unpaired += 1;
        }
    }

    fn compact_order(&mut self) {
        let pending = &self.pending_issues;
        self.issue_order
            .retain(|(request, time)| pending.get(request) == Some(time));
    }
}
