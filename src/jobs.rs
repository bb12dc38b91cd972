use crate::{
    models::{ApiError, BatchRequest, BatchResponse},
    pipeline::Pipeline,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::{info, warn};
use uuid::Uuid;

/// Background batch queue. A single worker drains it, so batches run one
/// after another and never overlap.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    board: Arc<Mutex<HashMap<Uuid, JobEntry>>>,
}

struct Job {
    id: Uuid,
    request: BatchRequest,
}

#[derive(Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed { result: BatchResponse },
    Failed { error: String },
}

#[derive(Clone)]
struct JobEntry {
    state: JobState,
    sources: usize,
    submitted_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub sources: usize,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub state: JobState,
}

impl JobQueue {
    pub fn spawn(pipeline: Pipeline) -> (Self, JoinHandle<()>) {
        Self::spawn_with_capacity(pipeline, queue_capacity_from_env())
    }

    pub fn spawn_with_capacity(pipeline: Pipeline, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity.max(1));
        let queue = Self {
            tx,
            board: Arc::new(Mutex::new(HashMap::new())),
        };
        let board = queue.board.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                transition(&board, job.id, JobState::Running).await;
                info!(target = "lister.jobs", job_id = %job.id, "job_started");

                let result = pipeline.run_batch(job.request).await;
                info!(
                    target = "lister.jobs",
                    job_id = %job.id,
                    items = result.items.len(),
                    skipped = result.skipped.len(),
                    "job_completed"
                );
                transition(&board, job.id, JobState::Completed { result }).await;
            }
        });

        (queue, handle)
    }

    pub async fn enqueue_batch(&self, request: BatchRequest) -> Result<Uuid, ApiError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        self.board.lock().await.insert(
            id,
            JobEntry {
                state: JobState::Queued,
                sources: request.sources.entries().len(),
                submitted_at: now,
                updated_at: now,
            },
        );
        if self.tx.send(Job { id, request }).await.is_err() {
            warn!(target = "lister.jobs", job_id = %id, "job_queue_closed");
            transition(
                &self.board,
                id,
                JobState::Failed {
                    error: "worker not available".into(),
                },
            )
            .await;
            return Err(ApiError {
                error: "queue_send_failed".into(),
                detail: Some("worker not available".into()),
            });
        }
        info!(target = "lister.jobs", job_id = %id, "job_queued");
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        let board = self.board.lock().await;
        board.get(&id).map(|entry| JobInfo {
            id: id.to_string(),
            sources: entry.sources,
            submitted_at: entry.submitted_at,
            updated_at: entry.updated_at,
            state: entry.state.clone(),
        })
    }
}

async fn transition(board: &Mutex<HashMap<Uuid, JobEntry>>, id: Uuid, state: JobState) {
    if let Some(entry) = board.lock().await.get_mut(&id) {
        entry.state = state;
        entry.updated_at = Utc::now();
    }
}

fn queue_capacity_from_env() -> usize {
    std::env::var("QUEUE_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::generation::testing::{RecordingSleeper, ScriptedService};
    use crate::models::SourceList;
    use std::time::Duration;

    fn pipeline(config: PipelineConfig) -> Pipeline {
        Pipeline::new(
            config,
            Arc::new(ScriptedService::new(|_, _| Ok("unused".into()))),
            Arc::new(RecordingSleeper::default()),
        )
    }

    #[tokio::test]
    async fn batch_job_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let page = dir.path().join("page.html");
        std::fs::write(&page, "<h1>큐 테스트 상품</h1>").unwrap();
        let config = PipelineConfig {
            output_dir: dir.path().join("out"),
            ..PipelineConfig::default()
        };
        let (queue, _worker) = JobQueue::spawn_with_capacity(pipeline(config), 4);

        let id = queue
            .enqueue_batch(BatchRequest {
                sources: SourceList::Single(page.to_str().unwrap().to_string()),
                category_id: Some("100001".into()),
                instructions: None,
                api_key: None,
                categories: None,
            })
            .await
            .unwrap();

        let mut finished = None;
        for _ in 0..100 {
            if let Some(info) = queue.get(id).await
                && let JobState::Completed { result } = info.state
            {
                assert_eq!(info.sources, 1);
                assert!(info.updated_at >= info.submitted_at);
                finished = Some(result);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let result = finished.expect("job did not complete");
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].record.title, "큐 테스트 상품");
        // No credential: the listing is degraded, the item still completes.
        assert!(result.items[0].record.generation.as_ref().unwrap().degraded);
    }

    #[tokio::test]
    async fn closed_worker_rejects_enqueue() {
        let (queue, worker) = JobQueue::spawn_with_capacity(pipeline(PipelineConfig::default()), 1);
        worker.abort();
        let _ = worker.await;

        let err = queue
            .enqueue_batch(BatchRequest {
                sources: SourceList::Single("https://shop.example.com/p/1".into()),
                category_id: None,
                instructions: None,
                api_key: None,
                categories: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.error, "queue_send_failed");
    }

    #[tokio::test]
    async fn unknown_job_is_none() {
        let (queue, _worker) = JobQueue::spawn_with_capacity(pipeline(PipelineConfig::default()), 1);
        assert!(queue.get(Uuid::new_v4()).await.is_none());
    }
}
