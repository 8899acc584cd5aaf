use crate::models::Ufs;
use crate::utils::constants::MILLISECONDS;
use std::collections::HashMap;

/// Derives qd, dtoc, ctoc, ctod and continuity for UFS events, one event at a time.
///
/// Events must arrive in time order (see [`TimeOrderBuffer`](super::TimeOrderBuffer)).
/// `send_req` and `complete_rsp` are paired on `(tag, opcode)`.
#[derive(Debug, Default)]
pub struct UfsLatencyTracker {
    req_times: HashMap<(u32, String), f64>,
    current_qd: u32,
    last_complete_time: Option<f64>,
    last_complete_qd0_time: Option<f64>,
    first_c: bool,
    first_complete_time: f64,
    // 이전 send_req 정보 (lba, size, opcode)
    prev_send_req: Option<(u64, u32, String)>,
    unpaired_completes: u64,
}

impl UfsLatencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests currently in flight.
    pub fn queue_depth(&self) -> u32 {
        self.current_qd
    }

    /// `complete_rsp` events that had no matching `send_req`.
    pub fn unpaired_completes(&self) -> u64 {
        self.unpaired_completes
    }

    pub fn process(&mut self, mut ufs: Ufs) -> Ufs {
        match ufs.action.as_str() {
            "send_req" => {
                // 시작 주소가 이전 요청의 끝 주소와 같고 opcode가 같으면 연속
                ufs.continuous = match &self.prev_send_req {
                    Some((prev_lba, prev_size, prev_opcode)) => {
                        ufs.lba == prev_lba.saturating_add(*prev_size as u64) && ufs.opcode == *prev_opcode
                    }
                    None => false,
                };
                self.prev_send_req = Some((ufs.lba, ufs.size, ufs.opcode.clone()));

                self.req_times
                    .insert((ufs.tag, ufs.opcode.clone()), ufs.time);

                self.current_qd += 1;
                if self.current_qd == 1 {
                    if let Some(t) = self.last_complete_qd0_time {
                        ufs.ctod = (ufs.time - t) * MILLISECONDS;
                    }
                    self.first_c = true;
                    self.first_complete_time = ufs.time;
                }
            }
            "complete_rsp" => {
                ufs.continuous = false;
                self.current_qd = self.current_qd.saturating_sub(1);

                match self.req_times.remove(&(ufs.tag, ufs.opcode.clone())) {
                    Some(send_time) => ufs.dtoc = (ufs.time - send_time) * MILLISECONDS,
                    None => self.unpaired_completes += 1,
                }

                if self.first_c {
                    ufs.ctoc = (ufs.time - self.first_complete_time) * MILLISECONDS;
                    self.first_c = false;
                } else if let Some(t) = self.last_complete_time {
                    ufs.ctoc = (ufs.time - t) * MILLISECONDS;
                }

                if self.current_qd == 0 {
                    self.last_complete_qd0_time = Some(ufs.time);
                }
                self.last_complete_time = Some(ufs.time);
            }
            _ => {
                ufs.continuous = false;
            }
        }
        ufs.qd = self.current_qd;
        ufs
    }
}
