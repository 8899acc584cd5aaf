use super::status::JobStatus;
use log::debug;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Entries {
    jobs: HashMap<String, JobStatus>,
    // 완료 순서 (오래된 것부터)
    finished: VecDeque<String>,
}

/// Shared job id -> status map.
///
/// Every update replaces the whole entry. Terminal entries are immutable and
/// only the newest `max_retained` of them are kept.
#[derive(Debug)]
pub struct JobRegistry {
    entries: Mutex<Entries>,
    max_retained: usize,
}

impl JobRegistry {
    pub fn new(max_retained: usize) -> Self {
        JobRegistry {
            entries: Mutex::new(Entries::default()),
            max_retained: max_retained.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, job_id: &str) -> Option<JobStatus> {
        self.lock().jobs.get(job_id).cloned()
    }

    /// Replace the entry for `status.job_id`. Returns false, leaving the
    /// entry untouched, if the job already finished.
    pub fn update(&self, status: JobStatus) -> bool {
        let mut entries = self.lock();
        if entries
            .jobs
            .get(&status.job_id)
            .is_some_and(|current| current.is_completed)
        {
            return false;
        }

        let job_id = status.job_id.clone();
        let finished = status.is_completed;
        entries.jobs.insert(job_id.clone(), status);

        if finished {
            entries.finished.push_back(job_id);
            while entries.finished.len() > self.max_retained {
                if let Some(evicted) = entries.finished.pop_front() {
                    entries.jobs.remove(&evicted);
                    debug!("Evicted finished job {evicted} from the registry");
                }
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::status::{JobKind, Stage};

    fn finished(id: &str) -> JobStatus {
        JobStatus {
            stage: Stage::Completed,
            progress_percent: 100,
            is_completed: true,
            success: Some(true),
            ..JobStatus::queued(id, JobKind::ProcessLogs)
        }
    }

    #[test]
    fn test_terminal_entries_are_frozen() {
        let registry = JobRegistry::new(10);
        assert!(registry.update(JobStatus::queued("a", JobKind::ProcessLogs)));
        assert!(registry.update(finished("a")));

        let late = JobStatus::queued("a", JobKind::ProcessLogs);
        assert!(!registry.update(late));
        assert_eq!(registry.get("a").unwrap().stage, Stage::Completed);
    }

    #[test]
    fn test_retention_evicts_oldest_finished() {
        let registry = JobRegistry::new(2);
        registry.update(JobStatus::queued("running", JobKind::ConvertToCsv));
        for id in ["j1", "j2", "j3"] {
            registry.update(finished(id));
        }

        assert!(registry.get("j1").is_none());
        assert!(registry.get("j2").is_some());
        assert!(registry.get("j3").is_some());
        // 실행 중인 작업은 제거 대상이 아님
        assert!(registry.get("running").is_some());
        assert_eq!(registry.len(), 3);
    }
}
