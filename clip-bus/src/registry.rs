use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::{
    error::RegistryError,
    pipeline::{ExportJob, JobControl},
    progress::{ExportEvents, ProgressCoordinator},
};

/// Running exports keyed by journey, so one journey is never exported twice
/// at once. Finished jobs are forgotten on the next lookup.
#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<PathBuf, JobControl>>,
}

impl JobRegistry {
    fn with_jobs<T>(&self, f: impl FnOnce(&mut HashMap<PathBuf, JobControl>) -> T) -> T {
        let mut jobs = match self.jobs.lock() {
            Ok(jobs) => jobs,
            Err(poisoned) => poisoned.into_inner(),
        };
        jobs.retain(|_, control| !control.state().is_terminal());
        f(&mut jobs)
    }

    pub fn start(
        &self,
        key: &Path,
        coordinator: &ProgressCoordinator,
        job: ExportJob,
    ) -> Result<ExportEvents, RegistryError> {
        self.with_jobs(|jobs| {
            if jobs.contains_key(key) {
                return Err(RegistryError::AlreadyRunning(key.to_path_buf()));
            }
            let (control, events) = coordinator.start(job)?;
            jobs.insert(key.to_path_buf(), control);
            Ok(events)
        })
    }

    pub fn is_running(&self, key: &Path) -> bool {
        self.with_jobs(|jobs| jobs.contains_key(key))
    }

    /// Returns false when nothing is running for `key`.
    pub fn cancel(&self, key: &Path) -> bool {
        self.with_jobs(|jobs| match jobs.get(key) {
            Some(control) => {
                control.cancel();
                true
            }
            None => false,
        })
    }

    pub fn len(&self) -> usize {
        self.with_jobs(|jobs| jobs.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
