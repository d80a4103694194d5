//! Background data retrieval for the context display.
//!
//! A single task consumes a request queue and talks to the production
//! tracking service. Results are posted back on the engine's event channel
//! as [`WorkerEvent`]s tagged with the request's uid, so the engine can
//! ignore answers it no longer cares about.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::events::{EngineEvent, EventSender};

/// Access to the production tracking service.
#[async_trait]
pub trait DataService: Send + Sync {
    /// Fetch `fields` of one entity.
    ///
    /// # Errors
    ///
    /// Returns the service failure.
    async fn find_one(
        &self,
        entity_type: &str,
        id: u64,
        fields: &[String],
    ) -> anyhow::Result<Value>;

    /// Download a thumbnail and return its local path.
    ///
    /// # Errors
    ///
    /// Returns the download failure.
    async fn download_thumbnail(
        &self,
        url: &str,
        entity_type: &str,
        id: u64,
    ) -> anyhow::Result<PathBuf>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkKind {
    FindOne,
    Thumbnail,
}

/// A finished request.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Completed {
        uid: Uuid,
        kind: WorkKind,
        data: Value,
    },
    Failed {
        uid: Uuid,
        kind: WorkKind,
        message: String,
    },
}

impl WorkerEvent {
    #[must_use]
    pub fn uid(&self) -> Uuid {
        match self {
            Self::Completed { uid, .. } | Self::Failed { uid, .. } => *uid,
        }
    }
}

#[derive(Debug)]
enum JobRequest {
    FindOne {
        entity_type: String,
        id: u64,
        fields: Vec<String>,
    },
    Thumbnail {
        url: String,
        entity_type: String,
        id: u64,
    },
}

#[derive(Debug)]
struct Job {
    uid: Uuid,
    generation: u64,
    request: JobRequest,
}

/// Handle on the background retriever task.
#[derive(Debug)]
pub struct DataRetriever {
    jobs: mpsc::UnboundedSender<Job>,
    generation: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl DataRetriever {
    /// Spawn the retriever task.
    #[must_use]
    pub fn start(service: Arc<dyn DataService>, events: EventSender) -> Self {
        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();
        let generation = Arc::new(AtomicU64::new(0));
        let current = Arc::clone(&generation);

        let task = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if job.generation != current.load(Ordering::SeqCst) {
                    debug!(uid = %job.uid, "skipping cleared request");
                    continue;
                }
                let event = run_job(service.as_ref(), job).await;
                if events.send(EngineEvent::Worker(event)).is_err() {
                    break;
                }
            }
            debug!("data retriever stopped");
        });

        info!("data retriever started");
        Self {
            jobs,
            generation,
            task,
        }
    }

    fn submit(&self, request: JobRequest) -> Uuid {
        let uid = Uuid::new_v4();
        let job = Job {
            uid,
            generation: self.generation.load(Ordering::SeqCst),
            request,
        };
        if self.jobs.send(job).is_err() {
            debug!(uid = %uid, "data retriever is gone; request dropped");
        }
        uid
    }

    /// Queue a single-entity query.
    pub fn execute_find_one(&self, entity_type: &str, id: u64, fields: Vec<String>) -> Uuid {
        self.submit(JobRequest::FindOne {
            entity_type: entity_type.to_string(),
            id,
            fields,
        })
    }

    /// Queue a thumbnail download.
    pub fn request_thumbnail(&self, url: &str, entity_type: &str, id: u64) -> Uuid {
        self.submit(JobRequest::Thumbnail {
            url: url.to_string(),
            entity_type: entity_type.to_string(),
            id,
        })
    }

    /// Drop every request queued so far. A request already running still
    /// reports its result.
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Stop accepting work and wait for the task to finish.
    pub async fn stop(self) {
        let Self { jobs, task, .. } = self;
        drop(jobs);
        if let Err(e) = task.await {
            debug!(error = %e, "data retriever task ended abnormally");
        }
    }
}

async fn run_job(service: &dyn DataService, job: Job) -> WorkerEvent {
    let Job { uid, request, .. } = job;
    let (kind, result) = match request {
        JobRequest::FindOne {
            entity_type,
            id,
            fields,
        } => (
            WorkKind::FindOne,
            service.find_one(&entity_type, id, &fields).await,
        ),
        JobRequest::Thumbnail {
            url,
            entity_type,
            id,
        } => (
            WorkKind::Thumbnail,
            service
                .download_thumbnail(&url, &entity_type, id)
                .await
                .map(|path| Value::String(path.display().to_string())),
        ),
    };
    match result {
        Ok(data) => WorkerEvent::Completed { uid, kind, data },
        Err(e) => WorkerEvent::Failed {
            uid,
            kind,
            message: format!("{e:#}"),
        },
    }
}
