//! Bounded-concurrency image generation.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::error::WorkflowError;

/// One image backend. Returns the path or URL of the stored image.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        prompt: &str,
        file_name: &str,
        save_folder: &str,
    ) -> Result<String, WorkflowError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageJob {
    /// Position of the originating item in the prompt list.
    pub index: usize,
    pub prompt: String,
    pub file_name: String,
}

/// Collects a job for every item with a non-empty `prompt`.
pub fn jobs_for(items: &[Value], file_prefix: &str) -> Vec<ImageJob> {
    items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| {
            let prompt = item.get("prompt")?.as_str()?.trim();
            (!prompt.is_empty()).then(|| ImageJob {
                index,
                prompt: prompt.to_string(),
                file_name: format!("{file_prefix}_{:02}", index + 1),
            })
        })
        .collect()
}

/// Runs `jobs` with at most `max_concurrency` in flight.
///
/// Returns `(index, path)` for every job that succeeded. Failed jobs are
/// logged and skipped.
pub async fn generate_batch(
    generator: Arc<dyn ImageGenerator>,
    jobs: Vec<ImageJob>,
    max_concurrency: usize,
    save_folder: &str,
) -> Vec<(usize, String)> {
    let sem = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut futs: FuturesUnordered<_> = FuturesUnordered::new();

    for job in jobs {
        let sem = sem.clone();
        let generator = generator.clone();
        let save_folder = save_folder.to_string();

        futs.push(async move {
            let _permit = sem
                .acquire_owned()
                .await
                .map_err(|_| WorkflowError::Image("semaphore closed unexpectedly".into()))?;

            let path = generator
                .generate(&job.prompt, &job.file_name, &save_folder)
                .await;
            Ok::<_, WorkflowError>((job, path))
        });
    }

    let mut done: Vec<(usize, String)> = Vec::new();
    while let Some(res) = futs.next().await {
        match res {
            Ok((job, Ok(path))) => {
                tracing::info!(
                    target: "briefsmith.workflow",
                    stage = "image.generated",
                    backend = %generator.name(),
                    index = job.index,
                    path = %path
                );
                done.push((job.index, path));
            }
            Ok((job, Err(err))) => {
                tracing::warn!(
                    target: "briefsmith.workflow",
                    stage = "image.failed",
                    backend = %generator.name(),
                    index = job.index,
                    error = %err
                );
            }
            Err(err) => {
                tracing::error!(
                    target: "briefsmith.workflow",
                    stage = "image.scheduler",
                    error = %err
                );
            }
        }
    }

    done.sort_by_key(|(index, _)| *index);
    done
}
