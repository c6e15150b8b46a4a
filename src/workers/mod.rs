use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{
    ai::classifier_from_config,
    config::AppConfig,
    error::AppResult,
    jobs::{reserve_job, settle_job, Settlement},
    models::Job,
    state::AppState,
};

pub mod categorize;

#[derive(Debug)]
pub enum JobExecution {
    Success,
    Retry { delay: Duration, error: String },
    Failed { error: String },
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;
    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution;
}

pub struct Worker {
    state: Arc<AppState>,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        state: Arc<AppState>,
        handlers: Vec<Arc<dyn JobHandler>>,
        poll_interval: Duration,
    ) -> Self {
        let map = handlers
            .into_iter()
            .map(|handler| (handler.job_type(), handler))
            .collect();
        Self {
            state,
            handlers: map,
            poll_interval,
        }
    }

    pub async fn run(&self) {
        info!("worker started");
        loop {
            match self.tick().await {
                Ok(true) => {}
                Ok(false) => sleep(self.poll_interval).await,
                Err(err) => {
                    error!(error = ?err, "worker tick failed");
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Reserves and runs at most one job. `Ok(false)` means the queue was
    /// empty and the caller should back off.
    async fn tick(&self) -> AppResult<bool> {
        let job_types: Vec<&'static str> = self.handlers.keys().copied().collect();
        if job_types.is_empty() {
            return Ok(false);
        }

        let reserved = self
            .state
            .run_blocking(move |conn| Ok(reserve_job(conn, &job_types)?))
            .await?;
        let Some(job) = reserved else {
            return Ok(false);
        };

        let settlement = match self.handlers.get(job.job_type.as_str()) {
            Some(handler) => Settlement::from(handler.handle(self.state.clone(), job.clone()).await),
            None => Settlement::Failed {
                error: format!("no handler registered for {}", job.job_type),
            },
        };
        self.settle(&job, settlement).await?;
        Ok(true)
    }

    async fn settle(&self, job: &Job, settlement: Settlement) -> AppResult<()> {
        match &settlement {
            Settlement::Succeeded => {
                info!(job_id = %job.id, job_type = %job.job_type, "job completed")
            }
            Settlement::RetryAfter { delay, error } => {
                warn!(job_id = %job.id, job_type = %job.job_type, ?delay, %error, "job will retry")
            }
            Settlement::Failed { error } => {
                error!(job_id = %job.id, job_type = %job.job_type, %error, "job failed")
            }
        }

        let job_id = job.id;
        self.state
            .run_blocking(move |conn| Ok(settle_job(conn, job_id, &settlement)?))
            .await
    }
}

impl From<JobExecution> for Settlement {
    fn from(execution: JobExecution) -> Self {
        match execution {
            JobExecution::Success => Settlement::Succeeded,
            JobExecution::Retry { delay, error } => Settlement::RetryAfter { delay, error },
            JobExecution::Failed { error } => Settlement::Failed { error },
        }
    }
}

pub fn default_handlers(config: &AppConfig) -> anyhow::Result<Vec<Arc<dyn JobHandler>>> {
    let classifier = Arc::from(classifier_from_config(&config.ai)?);
    let handlers: Vec<Arc<dyn JobHandler>> =
        vec![Arc::new(categorize::CategorizeDocumentJob::new(classifier))];
    Ok(handlers)
}
