pub mod compression;
pub mod constants;
pub mod encoding;
pub mod filter;
pub mod logger;

use self::constants::ALIGNMENT_SIZE_KB;

/// Check if LBA is aligned for UFS (4KB units)
pub fn is_ufs_aligned(lba: u64) -> bool {
    let alignment_units = ALIGNMENT_SIZE_KB / 4;
    lba % alignment_units == 0
}

/// Check if sector is aligned for Block (512-byte sectors)
pub fn is_block_aligned(sector: u64) -> bool {
    let alignment_sectors = (ALIGNMENT_SIZE_KB * 1024) / 512;
    sector % alignment_sectors == 0
}

pub use self::encoding::{decode_bytes_auto, open_encoded_reader, EncodedBufReader};
pub use self::filter::{filter_records, FilterOptions};
pub use self::logger::Logger;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_checks() {
        // 64KB = 16 UFS blocks = 128 sectors
        assert!(is_ufs_aligned(0));
        assert!(is_ufs_aligned(32));
        assert!(!is_ufs_aligned(33));
        assert!(is_block_aligned(256));
        assert!(!is_block_aligned(100));
    }
}
