//! Background worker draining webhook updates in arrival order.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::bot::BotHandler;
use crate::update::Incoming;

/// Pending jobs before the webhook starts refusing new ones.
pub const QUEUE_CAPACITY: usize = 256;

#[derive(Debug)]
pub enum Job {
    Update(Incoming),
}

pub type JobSender = mpsc::Sender<Job>;

pub fn channel() -> (JobSender, mpsc::Receiver<Job>) {
    mpsc::channel(QUEUE_CAPACITY)
}

/// Run jobs one at a time until every sender is dropped.
pub fn spawn(handler: Arc<BotHandler>, mut rx: mpsc::Receiver<Job>) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("👷 Worker started");
        while let Some(job) = rx.recv().await {
            let handler = handler.clone();
            // panics stay inside the job task
            let result = tokio::spawn(async move {
                match job {
                    Job::Update(incoming) => handler.handle(incoming).await,
                }
            })
            .await;
            if let Err(e) = result {
                error!("Job crashed: {e}");
            }
        }
        info!("👷 Worker stopped");
    })
}
