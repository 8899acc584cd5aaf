use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub time: f64,
    pub process: String,
    pub cpu: u32,
    pub flags: String,
    pub action: String,
    pub devmajor: u32,
    pub devminor: u32,
    pub io_type: String,
    pub extra: u32,
    pub sector: u64,
    pub size: u32, // 512-byte sectors
    pub comm: String,
    pub qd: u32,   // Queue Depth
    pub dtoc: f64, // Dispatch to Complete latency (ms)
    pub ctoc: f64, // Complete to Complete latency (ms)
    pub ctod: f64, // Complete to Dispatch latency (ms)
    pub continuous: bool,
    pub aligned: bool, // Sector alignment check
}
