//! In-memory job store

use async_trait::async_trait;
use mastr_batch::dispatch::{JobSource, ResultSink};
use mastr_batch::models::{Job, JobFilter};
use mastr_batch::BatchResult;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Jobs kept in id order, with every page request recorded
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<BTreeMap<String, Job>>,
    cursors: Mutex<Vec<Option<String>>>,
    saves: Mutex<usize>,
}

impl MemoryJobStore {
    pub fn with_jobs(jobs: impl IntoIterator<Item = Job>) -> Self {
        let store = Self::default();
        {
            let mut map = store.jobs.lock().unwrap();
            for job in jobs {
                map.insert(job.id.clone(), job);
            }
        }
        store
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.jobs.lock().unwrap().get(id).cloned()
    }

    /// `after` argument of every page request, in order
    pub fn cursors(&self) -> Vec<Option<String>> {
        self.cursors.lock().unwrap().clone()
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap()
    }
}

#[async_trait]
impl JobSource<Job> for MemoryJobStore {
    type Filter = JobFilter;

    async fn next_page(
        &self,
        after: Option<&str>,
        page_size: usize,
        filter: &JobFilter,
    ) -> BatchResult<Vec<Job>> {
        self.cursors.lock().unwrap().push(after.map(str::to_string));
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .values()
            .filter(|job| after.map_or(true, |a| job.id.as_str() > a))
            .filter(|job| filter.matches(job))
            .take(page_size)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ResultSink<Job> for MemoryJobStore {
    async fn fetch(&self, id: &str) -> BatchResult<Option<Job>> {
        Ok(self.get(id))
    }

    async fn save(&self, job: &Job) -> BatchResult<()> {
        self.jobs.lock().unwrap().insert(job.id.clone(), job.clone());
        *self.saves.lock().unwrap() += 1;
        Ok(())
    }
}
