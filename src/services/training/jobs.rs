use super::{TopicModelTrainer, TrainOptions};
use crate::algorithms::SweepControl;
use crate::error::{RecommenderError, Result};
use crate::models::*;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Fit a new model and commit edges under a new version.
    Train,
    /// Re-run the sweep with the latest saved model.
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running { rows_done: usize },
    Completed { outcome: TrainingOutcome },
    Failed { message: String },
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed { .. } | JobStatus::Failed { .. } | JobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingJob {
    pub id: Uuid,
    pub item_type: ItemType,
    pub kind: JobKind,
    pub n_topics: Option<usize>,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

struct JobEntry {
    job: TrainingJob,
    control: Arc<SweepControl>,
}

/// Runs training jobs one at a time on a background worker.
///
/// A single consumer drains the queue, so runs never overlap, for the same
/// item type or otherwise.
pub struct TrainingService {
    trainer: Arc<TopicModelTrainer>,
    jobs: Arc<DashMap<Uuid, JobEntry>>,
    sender: mpsc::Sender<Uuid>,
    retention: usize,
}

impl TrainingService {
    /// Spawns the worker; must be called inside a tokio runtime.
    pub fn start(trainer: Arc<TopicModelTrainer>, queue_capacity: usize, retention: usize) -> Self {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let jobs = Arc::new(DashMap::new());

        tokio::spawn(run_worker(trainer.clone(), jobs.clone(), receiver, retention));
        info!(queue_capacity, retention, "Training worker started");

        Self {
            trainer,
            jobs,
            sender,
            retention,
        }
    }

    pub fn trainer(&self) -> &Arc<TopicModelTrainer> {
        &self.trainer
    }

    pub fn submit(&self, item_type: ItemType, kind: JobKind, n_topics: Option<usize>) -> Result<TrainingJob> {
        let job = TrainingJob {
            id: Uuid::new_v4(),
            item_type,
            kind,
            n_topics,
            status: JobStatus::Queued,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        evict_finished(&self.jobs, self.retention);
        self.jobs.insert(
            job.id,
            JobEntry {
                job: job.clone(),
                control: Arc::new(SweepControl::new()),
            },
        );

        if let Err(e) = self.sender.try_send(job.id) {
            self.jobs.remove(&job.id);
            return Err(RecommenderError::InvalidRequest(format!(
                "training queue unavailable: {}",
                e
            )));
        }

        info!(job_id = %job.id, item_type = %item_type, kind = ?kind, "Training job queued");
        Ok(job)
    }

    pub fn job(&self, id: Uuid) -> Option<TrainingJob> {
        self.jobs.get(&id).map(|entry| snapshot(&entry))
    }

    pub fn jobs(&self) -> Vec<TrainingJob> {
        evict_finished(&self.jobs, self.retention);
        let mut jobs: Vec<TrainingJob> = self.jobs.iter().map(|entry| snapshot(&entry)).collect();
        jobs.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        jobs
    }

    /// Queued jobs are cancelled immediately; a running job stops at its
    /// next checkpoint without committing anything.
    pub fn cancel(&self, id: Uuid) -> Option<TrainingJob> {
        let mut entry = self.jobs.get_mut(&id)?;
        let current = entry.job.status.clone();
        match current {
            JobStatus::Queued => {
                entry.control.cancel();
                entry.job.status = JobStatus::Cancelled;
                entry.job.finished_at = Some(Utc::now());
                info!(job_id = %id, "Cancelled queued training job");
            }
            JobStatus::Running { .. } => {
                entry.control.cancel();
                info!(job_id = %id, "Cancellation requested for running training job");
            }
            _ => {}
        }
        Some(snapshot(&entry))
    }

    /// Polls until the job reaches a terminal state or `timeout` elapses.
    pub async fn wait(&self, id: Uuid, timeout: Duration) -> Option<TrainingJob> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let job = self.job(id)?;
            if job.status.is_terminal() || tokio::time::Instant::now() >= deadline {
                return Some(job);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// Drops the oldest finished jobs beyond `retention`. Queued and running
/// jobs are never evicted.
fn evict_finished(jobs: &DashMap<Uuid, JobEntry>, retention: usize) {
    let mut finished: Vec<(DateTime<Utc>, Uuid)> = jobs
        .iter()
        .filter(|entry| entry.job.status.is_terminal())
        .map(|entry| (entry.job.finished_at.unwrap_or(entry.job.submitted_at), entry.job.id))
        .collect();
    if finished.len() <= retention {
        return;
    }

    finished.sort();
    let excess = finished.len() - retention;
    for (_, id) in finished.into_iter().take(excess) {
        jobs.remove(&id);
    }
    debug!(evicted = excess, retention, "Evicted finished training jobs");
}

fn snapshot(entry: &JobEntry) -> TrainingJob {
    let mut job = entry.job.clone();
    if let JobStatus::Running { rows_done } = &mut job.status {
        *rows_done = entry.control.rows_done();
    }
    job
}

async fn run_worker(
    trainer: Arc<TopicModelTrainer>,
    jobs: Arc<DashMap<Uuid, JobEntry>>,
    mut receiver: mpsc::Receiver<Uuid>,
    retention: usize,
) {
    while let Some(id) = receiver.recv().await {
        let (item_type, kind, n_topics, control) = match jobs.get_mut(&id) {
            Some(mut entry) => {
                if entry.job.status != JobStatus::Queued {
                    continue;
                }
                entry.job.status = JobStatus::Running { rows_done: 0 };
                entry.job.started_at = Some(Utc::now());
                (entry.job.item_type, entry.job.kind, entry.job.n_topics, entry.control.clone())
            }
            None => continue,
        };

        info!(job_id = %id, item_type = %item_type, kind = ?kind, "Training job started");
        let result = match kind {
            JobKind::Train => {
                trainer
                    .train_with(item_type, &TrainOptions { n_topics }, control)
                    .await
            }
            JobKind::Refresh => trainer.refresh_similarities(item_type, control).await,
        };

        let status = match result {
            Ok(outcome) => {
                info!(
                    job_id = %id,
                    trained = outcome.trained_count,
                    version_id = outcome.latest_version_id,
                    "Training job completed"
                );
                JobStatus::Completed { outcome }
            }
            Err(RecommenderError::TrainingCancelled { .. }) => {
                warn!(job_id = %id, "Training job cancelled");
                JobStatus::Cancelled
            }
            Err(e) => {
                error!(job_id = %id, "Training job failed: {}", e);
                JobStatus::Failed { message: e.to_string() }
            }
        };

        if let Some(mut entry) = jobs.get_mut(&id) {
            entry.job.status = status;
            entry.job.finished_at = Some(Utc::now());
        }
        evict_finished(&jobs, retention);
    }

    warn!("Training queue closed, worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::TextPreprocessor;
    use crate::config::{SimilarityConfig, TextConfig, TopicModelConfig, TrainingConfig};
    use crate::services::catalog::{InMemoryItemRepository, ItemRegistry};
    use crate::services::similarity::{InMemorySimilarityRepository, SimilarityStore};
    use crate::services::training::ArtifactStore;

    async fn service(dir: &std::path::Path, with_items: bool) -> TrainingService {
        service_with_retention(dir, with_items, 10).await
    }

    async fn service_with_retention(dir: &std::path::Path, with_items: bool, retention: usize) -> TrainingService {
        let events = Arc::new(InMemoryItemRepository::new(ItemType::Events));
        if with_items {
            events
                .insert_many(vec![
                    Item::new(1, ItemType::Events, "Jazz night").with_description("Live jazz quartet concert"),
                    Item::new(2, ItemType::Events, "Jazz brunch").with_description("Live jazz quartet brunch"),
                ])
                .await
                .unwrap();
        }
        let mut registry = ItemRegistry::new();
        registry.register(events);

        let similarity = Arc::new(SimilarityStore::new(
            Arc::new(InMemorySimilarityRepository::new()),
            SimilarityConfig::default(),
            &TrainingConfig::default(),
        ));
        let trainer = TopicModelTrainer::new(
            Arc::new(registry),
            similarity,
            ArtifactStore::new(dir),
            Arc::new(TextPreprocessor::new(&TextConfig::default()).unwrap()),
            TopicModelConfig {
                n_topics: 2,
                iterations: 20,
                ..TopicModelConfig::default()
            },
        );
        TrainingService::start(Arc::new(trainer), 4, retention)
    }

    #[tokio::test]
    async fn test_job_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), true).await;

        let job = service.submit(ItemType::Events, JobKind::Train, None).unwrap();
        let finished = service.wait(job.id, Duration::from_secs(30)).await.unwrap();
        match finished.status {
            JobStatus::Completed { outcome } => assert_eq!(outcome.trained_count, 2),
            other => panic!("unexpected status {:?}", other),
        }
        assert!(finished.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_empty_corpus_job_fails() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), false).await;

        let job = service.submit(ItemType::Events, JobKind::Train, None).unwrap();
        let finished = service.wait(job.id, Duration::from_secs(30)).await.unwrap();
        assert_eq!(
            finished.status,
            JobStatus::Failed { message: "No events items to train on".to_string() }
        );
    }

    #[tokio::test]
    async fn test_unknown_and_cancelled_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), true).await;
        assert!(service.job(Uuid::new_v4()).is_none());
        assert!(service.cancel(Uuid::new_v4()).is_none());

        let job = service.submit(ItemType::Events, JobKind::Refresh, None).unwrap();
        service.cancel(job.id);
        let finished = service.wait(job.id, Duration::from_secs(30)).await.unwrap();
        assert!(finished.status.is_terminal());
        assert!(matches!(
            finished.status,
            JobStatus::Cancelled | JobStatus::Failed { .. }
        ));
        assert_eq!(service.jobs().len(), 1);
    }

    #[tokio::test]
    async fn test_finished_jobs_are_evicted_beyond_retention() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with_retention(dir.path(), false, 2).await;

        let mut ids = Vec::new();
        for _ in 0..4 {
            let job = service.submit(ItemType::Events, JobKind::Train, None).unwrap();
            service.wait(job.id, Duration::from_secs(30)).await.unwrap();
            ids.push(job.id);
        }

        let kept: Vec<Uuid> = service.jobs().iter().map(|job| job.id).collect();
        assert_eq!(kept, ids[2..].to_vec());
        assert!(service.job(ids[0]).is_none());
        assert!(service.jobs().iter().all(|job| job.status.is_terminal()));
    }
}
