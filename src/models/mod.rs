mod block;
mod trace_item;
mod trace_type;
mod ufs;

pub use block::Block;
pub use trace_item::{LogRecord, TraceItem};
pub use trace_type::{LogTypeHint, TraceType};
pub use ufs::Ufs;
