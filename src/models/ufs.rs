use serde::{Deserialize, Serialize};

// UFS는 Universal Flash Storage의 약어이므로 UFs로 변경하지 않고 원래 이름 유지
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Ufs {
    pub time: f64,
    pub process: String,
    pub cpu: u32,
    pub action: String,
    pub tag: u32,
    pub opcode: String,
    pub lba: u64,
    pub size: u32, // 4KB units
    pub groupid: u32,
    pub hwqid: u32,
    pub qd: u32,   // Queue Depth
    pub dtoc: f64, // Dispatch to Complete latency (ms)
    pub ctoc: f64, // Complete to Complete latency (ms)
    pub ctod: f64, // Complete to Dispatch latency (ms)
    pub continuous: bool,
    pub aligned: bool, // LBA alignment check
}
