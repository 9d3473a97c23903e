// Download manager - registry of running jobs
//
// One job per (URL, media kind). A second submission for the same key is
// rejected while the first is still in flight.

use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::errors::DownloadError;
use super::models::{JobEvent, JobOutcome, JobRequest, JobState, MediaKind};
use super::worker::{join_task, JobController, JobWorker};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub url: String,
    pub kind: MediaKind,
}

impl JobKey {
    pub fn for_request(request: &JobRequest) -> Self {
        Self {
            url: request.url.clone(),
            kind: request.kind,
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.url, self.kind)
    }
}

struct ManagedJob {
    controller: JobController,
    task: JoinHandle<JobOutcome>,
}

pub struct DownloadManager {
    worker: JobWorker,
    jobs: Mutex<HashMap<JobKey, ManagedJob>>,
}

impl DownloadManager {
    pub fn new(worker: JobWorker) -> Self {
        Self {
            worker,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Start a job; the caller receives its event stream
    pub async fn submit(
        &self,
        request: JobRequest,
    ) -> Result<(JobKey, UnboundedReceiver<JobEvent>), DownloadError> {
        let key = JobKey::for_request(&request);
        let mut jobs = self.jobs.lock().await;

        if let Some(job) = jobs.get(&key) {
            if !job.task.is_finished() {
                log::warn!("[Manager] Rejecting duplicate job {}", key);
                return Err(DownloadError::DuplicateJob(key.to_string()));
            }
        }

        let (controller, events, task) = self.worker.start(request).into_parts();
        jobs.insert(key.clone(), ManagedJob { controller, task });
        log::info!("[Manager] Submitted {} ({} tracked)", key, jobs.len());
        Ok((key, events))
    }

    /// Flip pause of a job; `None` if the key is unknown
    pub async fn toggle_pause(&self, key: &JobKey) -> Option<bool> {
        let jobs = self.jobs.lock().await;
        jobs.get(key).map(|job| job.controller.toggle_pause())
    }

    pub async fn state(&self, key: &JobKey) -> Option<JobState> {
        let jobs = self.jobs.lock().await;
        jobs.get(key).map(|job| job.controller.state())
    }

    /// Keys of jobs whose task has not ended yet
    pub async fn active_jobs(&self) -> Vec<JobKey> {
        let jobs = self.jobs.lock().await;
        jobs.iter()
            .filter(|(_, job)| !job.task.is_finished())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Cancel a job and wait for it to end
    pub async fn cancel(&self, key: &JobKey) -> Option<JobOutcome> {
        let job = self.jobs.lock().await.remove(key)?;
        job.controller.cancel();
        Some(join_task(job.task).await)
    }

    /// Drop jobs that have ended, returning their outcomes
    pub async fn remove_finished(&self) -> Vec<(JobKey, JobOutcome)> {
        let finished: Vec<(JobKey, ManagedJob)> = {
            let mut jobs = self.jobs.lock().await;
            let keys: Vec<JobKey> = jobs
                .iter()
                .filter(|(_, job)| job.task.is_finished())
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| jobs.remove(&key).map(|job| (key, job)))
                .collect()
        };

        let mut outcomes = Vec::with_capacity(finished.len());
        for (key, job) in finished {
            outcomes.push((key, join_task(job.task).await));
        }
        outcomes
    }

    /// Cancel everything and wait for all workers
    pub async fn shutdown(&self) {
        let jobs: Vec<(JobKey, ManagedJob)> = self.jobs.lock().await.drain().collect();
        log::info!("[Manager] Shutting down {} job(s)", jobs.len());
        for (_, job) in &jobs {
            job.controller.cancel();
        }
        for (key, job) in jobs {
            let outcome = join_task(job.task).await;
            log::debug!("[Manager] {} ended: {:?}", key, outcome);
        }
    }
}
