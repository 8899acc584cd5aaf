use crate::models::TraceItem;
use serde::{Deserialize, Serialize};

// 필터링 옵션을 저장할 구조체 정의. None은 해당 축에 제한이 없음을 의미
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<f64>, // 시작 시간 (s)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>, // 종료 시간 (s)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_sector: Option<u64>, // 시작 섹터 (Block 전용)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_sector: Option<u64>, // 종료 섹터 (Block 전용)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_dtoc: Option<f64>, // 최소 Dispatch to Complete 레이턴시 (ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_dtoc: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_ctoc: Option<f64>, // 최소 Complete to Complete 레이턴시 (ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ctoc: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_ctod: Option<f64>, // 최소 Complete to Dispatch 레이턴시 (ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ctod: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_qd: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_qd: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cpu_list: Vec<u32>,
}

/// One filter axis. A record passes the filter iff every axis accepts it;
/// an axis whose bounds are unset must accept everything.
type Axis = fn(&FilterOptions, &dyn TraceItem) -> bool;

const AXES: [Axis; 7] = [
    time_axis,
    sector_axis,
    dtoc_axis,
    ctoc_axis,
    ctod_axis,
    qd_axis,
    cpu_axis,
];

#[inline]
fn within<T: PartialOrd + Copy>(value: T, min: Option<T>, max: Option<T>) -> bool {
    min.map_or(true, |lo| value >= lo) && max.map_or(true, |hi| value <= hi)
}

fn time_axis(f: &FilterOptions, item: &dyn TraceItem) -> bool {
    within(item.time(), f.start_time, f.end_time)
}

// 섹터 범위가 겹치는지 확인. UFS(LBA)는 섹터 필터 대상이 아님
fn sector_axis(f: &FilterOptions, item: &dyn TraceItem) -> bool {
    match item.sector_extent() {
        Some((start, end)) => {
            f.start_sector.map_or(true, |lo| end >= lo)
                && f.end_sector.map_or(true, |hi| start <= hi)
        }
        None => true,
    }
}

fn dtoc_axis(f: &FilterOptions, item: &dyn TraceItem) -> bool {
    within(item.get_dtoc(), f.min_dtoc, f.max_dtoc)
}

fn ctoc_axis(f: &FilterOptions, item: &dyn TraceItem) -> bool {
    within(item.get_ctoc(), f.min_ctoc, f.max_ctoc)
}

fn ctod_axis(f: &FilterOptions, item: &dyn TraceItem) -> bool {
    within(item.get_ctod(), f.min_ctod, f.max_ctod)
}

fn qd_axis(f: &FilterOptions, item: &dyn TraceItem) -> bool {
    within(item.get_qd(), f.min_qd, f.max_qd)
}

fn cpu_axis(f: &FilterOptions, item: &dyn TraceItem) -> bool {
    f.cpu_list.is_empty() || f.cpu_list.contains(&item.get_cpu())
}

impl FilterOptions {
    /// Whether any bound is set at all.
    pub fn is_active(&self) -> bool {
        !self.active_axes().is_empty()
    }

    /// Names of the axes that constrain records, for logging.
    pub fn active_axes(&self) -> Vec<&'static str> {
        let mut axes = Vec::new();
        if self.start_time.is_some() || self.end_time.is_some() {
            axes.push("time");
        }
        if self.start_sector.is_some() || self.end_sector.is_some() {
            axes.push("sector");
        }
        if self.min_dtoc.is_some() || self.max_dtoc.is_some() {
            axes.push("dtoc");
        }
        if self.min_ctoc.is_some() || self.max_ctoc.is_some() {
            axes.push("ctoc");
        }
        if self.min_ctod.is_some() || self.max_ctod.is_some() {
            axes.push("ctod");
        }
        if self.min_qd.is_some() || self.max_qd.is_some() {
            axes.push("qd");
        }
        if !self.cpu_list.is_empty() {
            axes.push("cpu");
        }
        axes
    }

    /// Evaluate the predicate against one record.
    pub fn matches<T: TraceItem>(&self, item: &T) -> bool {
        let item: &dyn TraceItem = item;
        AXES.iter().all(|axis| axis(self, item))
    }

    /// Reject bounds that can never be satisfied or are not numbers.
    pub fn validate(&self) -> Result<(), String> {
        fn pair<T: PartialOrd + std::fmt::Display + Copy>(
            name: &str,
            lo: Option<T>,
            hi: Option<T>,
        ) -> Result<(), String> {
            if let (Some(lo), Some(hi)) = (lo, hi) {
                if lo > hi {
                    return Err(format!("{name}: lower bound {lo} exceeds upper bound {hi}"));
                }
            }
            Ok(())
        }

        let floats = [
            self.start_time,
            self.end_time,
            self.min_dtoc,
            self.max_dtoc,
            self.min_ctoc,
            self.max_ctoc,
            self.min_ctod,
            self.max_ctod,
        ];
        if floats.iter().flatten().any(|v| v.is_nan()) {
            return Err("filter bounds must not be NaN".to_string());
        }

        pair("time", self.start_time, self.end_time)?;
        pair("sector", self.start_sector, self.end_sector)?;
        pair("dtoc", self.min_dtoc, self.max_dtoc)?;
        pair("ctoc", self.min_ctoc, self.max_ctoc)?;
        pair("ctod", self.min_ctod, self.max_ctod)?;
        pair("qd", self.min_qd, self.max_qd)?;
        Ok(())
    }

    /// Wire encodings that cannot express "absent" send 0 for unset bounds.
    /// Turn those zeros back into `None`.
    pub fn zero_as_unset(self) -> Self {
        fn f(v: Option<f64>) -> Option<f64> {
            v.filter(|x| *x > 0.0)
        }
        fn u<T: Default + PartialEq>(v: Option<T>) -> Option<T> {
            v.filter(|x| *x != T::default())
        }
        FilterOptions {
            start_time: f(self.start_time),
            end_time: f(self.end_time),
            start_sector: u(self.start_sector),
            end_sector: u(self.end_sector),
            min_dtoc: f(self.min_dtoc),
            max_dtoc: f(self.max_dtoc),
            min_ctoc: f(self.min_ctoc),
            max_ctoc: f(self.max_ctoc),
            min_ctod: f(self.min_ctod),
            max_ctod: f(self.max_ctod),
            min_qd: u(self.min_qd),
            max_qd: u(self.max_qd),
            cpu_list: self.cpu_list,
        }
    }
}

/// Keep only the records accepted by `filter`.
pub fn filter_records<T: TraceItem>(records: Vec<T>, filter: &FilterOptions) -> Vec<T> {
    if !filter.is_active() {
        return records;
    }
    records.into_iter().filter(|r| filter.matches(r)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Block, LogRecord, Ufs};

    fn ufs_at(time: f64, dtoc: f64) -> Ufs {
        Ufs {
            time,
            dtoc,
            lba: 1_000,
            opcode: "0x2a".into(),
            action: "complete_rsp".into(),
            ..Default::default()
        }
    }

    fn block_at(sector: u64, size: u32) -> Block {
        Block {
            time: 1.0,
            sector,
            size,
            io_type: "W".into(),
            action: "block_rq_complete".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_no_bounds_accepts_everything() {
        let filter = FilterOptions::default();
        assert!(!filter.is_active());
        assert!(filter.matches(&ufs_at(0.0, 0.0)));
        assert!(filter.matches(&block_at(u64::MAX - 10, 8)));
    }

    #[test]
    fn test_extent_at_end_of_sector_space() {
        let block = block_at(u64::MAX - 3, 8);
        assert_eq!(block.sector_extent(), Some((u64::MAX - 3, u64::MAX)));
        assert!(FilterOptions::default().matches(&block));

        let tail = FilterOptions {
            start_sector: Some(u64::MAX),
            ..Default::default()
        };
        assert!(tail.matches(&block));
        let head = FilterOptions {
            end_sector: Some(u64::MAX - 4),
            ..Default::default()
        };
        assert!(!head.matches(&block));
    }

    #[test]
    fn test_time_window_is_inclusive() {
        let filter = FilterOptions {
            start_time: Some(100.0),
            end_time: Some(500.0),
            ..Default::default()
        };
        let kept: Vec<f64> = [50.0, 100.0, 150.0, 450.0, 500.0, 600.0]
            .into_iter()
            .filter(|t| filter.matches(&ufs_at(*t, 0.0)))
            .collect();
        assert_eq!(kept, vec![100.0, 150.0, 450.0, 500.0]);
    }

    #[test]
    fn test_all_bounds_must_hold() {
        let filter = FilterOptions {
            start_time: Some(1.0),
            end_time: Some(10.0),
            min_dtoc: Some(0.5),
            max_dtoc: Some(2.0),
            ..Default::default()
        };
        assert!(filter.matches(&ufs_at(5.0, 1.0)));
        assert!(!filter.matches(&ufs_at(5.0, 3.0)));
        assert!(!filter.matches(&ufs_at(11.0, 1.0)));
        assert!(!filter.matches(&ufs_at(0.5, 0.1)));
    }

    #[test]
    fn test_sector_bounds_only_apply_to_block() {
        let filter = FilterOptions {
            start_sector: Some(1_000),
            end_sector: Some(2_000),
            ..Default::default()
        };
        // LBA is not filterable, so the UFS record passes regardless of address
        assert!(filter.matches(&ufs_at(1.0, 0.0)));
        assert!(filter.matches(&LogRecord::Ufs(ufs_at(1.0, 0.0))));

        // extent [992, 1000] touches the window start
        assert!(filter.matches(&block_at(992, 8)));
        assert!(filter.matches(&block_at(1_500, 8)));
        assert!(!filter.matches(&block_at(2_001, 8)));
        assert!(!filter.matches(&block_at(100, 8)));
        assert!(!filter.matches(&LogRecord::Block(block_at(100, 8))));
    }

    #[test]
    fn test_cpu_and_qd_axes() {
        let filter = FilterOptions {
            cpu_list: vec![1, 3],
            max_qd: Some(4),
            ..Default::default()
        };
        let mut ufs = ufs_at(1.0, 0.0);
        ufs.cpu = 3;
        ufs.qd = 4;
        assert!(filter.matches(&ufs));
        ufs.qd = 5;
        assert!(!filter.matches(&ufs));
        ufs.qd = 1;
        ufs.cpu = 2;
        assert!(!filter.matches(&ufs));
    }

    #[test]
    fn test_validate_rejects_inverted_and_nan_bounds() {
        let inverted = FilterOptions {
            min_dtoc: Some(5.0),
            max_dtoc: Some(1.0),
            ..Default::default()
        };
        assert!(inverted.validate().unwrap_err().contains("dtoc"));

        let nan = FilterOptions {
            start_time: Some(f64::NAN),
            ..Default::default()
        };
        assert!(nan.validate().is_err());
        assert!(FilterOptions::default().validate().is_ok());
    }

    #[test]
    fn test_zero_as_unset() {
        let filter = FilterOptions {
            start_time: Some(0.0),
            end_time: Some(5.0),
            start_sector: Some(0),
            max_qd: Some(0),
            ..Default::default()
        }
        .zero_as_unset();
        assert_eq!(filter.start_time, None);
        assert_eq!(filter.end_time, Some(5.0));
        assert_eq!(filter.start_sector, None);
        assert_eq!(filter.max_qd, None);
        assert_eq!(filter.active_axes(), vec!["time"]);
    }

    #[test]
    fn test_filter_records_keeps_order() {
        let filter = FilterOptions {
            min_dtoc: Some(1.0),
            ..Default::default()
        };
        let records = vec![ufs_at(1.0, 2.0), ufs_at(2.0, 0.5), ufs_at(3.0, 1.0)];
        let kept = filter_records(records, &filter);
        assert_eq!(kept.iter().map(|u| u.time).collect::<Vec<_>>(), vec![1.0, 3.0]);
    }
}
