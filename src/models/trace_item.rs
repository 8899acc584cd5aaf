use super::{Block, TraceType, Ufs};
use serde::{Deserialize, Serialize};

// 공통 트레이트 정의 - 모든 트레이스 타입이 구현해야 함
pub trait TraceItem {
    fn time(&self) -> f64;

    // 트레이스 항목의 타입을 반환 (UFS의 opcode나 Block의 io_type 등)
    fn get_type(&self) -> &str;

    // 액션 타입 (UFS의 send_req/complete_rsp, Block의 block_rq_issue/block_rq_complete)
    fn get_action(&self) -> &str;

    // 지연 시간 관련 메서드들
    fn get_dtoc(&self) -> f64; // Dispatch to Complete 지연 시간
    fn get_ctoc(&self) -> f64; // Complete to Complete 지연 시간
    fn get_ctod(&self) -> f64; // Complete to Dispatch 지연 시간

    fn get_qd(&self) -> u32;
    fn get_cpu(&self) -> u32;
    fn is_continuous(&self) -> bool;

    /// Addressed extent `(start, end)` in sectors. Only block records have one;
    /// LBA ranges are not filterable.
    fn sector_extent(&self) -> Option<(u64, u64)> {
        None
    }
}

impl TraceItem for Ufs {
    fn time(&self) -> f64 {
        self.time
    }
    fn get_type(&self) -> &str {
        &self.opcode
    }
    fn get_action(&self) -> &str {
        &self.action
    }
    fn get_dtoc(&self) -> f64 {
        self.dtoc
    }
    fn get_ctoc(&self) -> f64 {
        self.ctoc
    }
    fn get_ctod(&self) -> f64 {
        self.ctod
    }
    fn get_qd(&self) -> u32 {
        self.qd
    }
    fn get_cpu(&self) -> u32 {
        self.cpu
    }
    fn is_continuous(&self) -> bool {
        self.continuous
    }
}

impl TraceItem for Block {
    fn time(&self) -> f64 {
        self.time
    }
    fn get_type(&self) -> &str {
        &self.io_type
    }
    fn get_action(&self) -> &str {
        &self.action
    }
    fn get_dtoc(&self) -> f64 {
        self.dtoc
    }
    fn get_ctoc(&self) -> f64 {
        self.ctoc
    }
    fn get_ctod(&self) -> f64 {
        self.ctod
    }
    fn get_qd(&self) -> u32 {
        self.qd
    }
    fn get_cpu(&self) -> u32 {
        self.cpu
    }
    fn is_continuous(&self) -> bool {
        self.continuous
    }
    fn sector_extent(&self) -> Option<(u64, u64)> {
        Some((self.sector, self.sector.saturating_add(self.size as u64)))
    }
}

/// One parsed trace record of either family.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "family", rename_all = "lowercase")]
pub enum LogRecord {
    Ufs(Ufs),
    Block(Block),
}

impl LogRecord {
    pub fn trace_type(&self) -> TraceType {
        match self {
            LogRecord::Ufs(_) => TraceType::Ufs,
            LogRecord::Block(_) => TraceType::Block,
        }
    }

    fn item(&self) -> &dyn TraceItem {
        match self {
            LogRecord::Ufs(u) => u,
            LogRecord::Block(b) => b,
        }
    }
}

impl TraceItem for LogRecord {
    fn time(&self) -> f64 {
        self.item().time()
    }
    fn get_type(&self) -> &str {
        self.item().get_type()
    }
    fn get_action(&self) -> &str {
        self.item().get_action()
    }
    fn get_dtoc(&self) -> f64 {
        self.item().get_dtoc()
    }
    fn get_ctoc(&self) -> f64 {
        self.item().get_ctoc()
    }
    fn get_ctod(&self) -> f64 {
        self.item().get_ctod()
    }
    fn get_qd(&self) -> u32 {
        self.item().get_qd()
    }
    fn get_cpu(&self) -> u32 {
        self.item().get_cpu()
    }
    fn is_continuous(&self) -> bool {
        self.item().is_continuous()
    }
    fn sector_extent(&self) -> Option<(u64, u64)> {
        self.item().sector_extent()
    }
}
