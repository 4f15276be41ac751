//! Concurrent execution of one request across every shard of an alias

use super::alias::IndexAlias;
use super::SearchRequest;
use crate::error::{Result, ShardfuseError};
use crate::index::ShardExecutor;
use crate::model::PartialResult;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn, Instrument, Span};

/// Boxed shard search, so nested aliases can recurse
pub type ShardFuture = Pin<Box<dyn Future<Output = Result<PartialResult>> + Send>>;

/// A child of an alias: a leaf executor or another alias
#[derive(Clone)]
pub enum Shard {
    Index(Arc<dyn ShardExecutor>),
    Alias(Arc<IndexAlias>),
}

impl Shard {
    pub fn index(executor: impl ShardExecutor + 'static) -> Self {
        Shard::Index(Arc::new(executor))
    }

    pub fn alias(alias: IndexAlias) -> Self {
        Shard::Alias(Arc::new(alias))
    }

    pub fn name(&self) -> &str {
        match self {
            Shard::Index(executor) => executor.name(),
            Shard::Alias(alias) => alias.name(),
        }
    }

    /// Run `request` on this shard.
    ///
    /// Leaf executors block, so they go to tokio's blocking pool. Aliases
    /// return their lossless merge so the caller can finish it.
    pub fn execute(self, request: SearchRequest) -> ShardFuture {
        match self {
            Shard::Index(executor) => Box::pin(async move {
                let name = executor.name().to_string();
                let span = Span::current();
                tokio::task::spawn_blocking(move || {
                    let _entered = span.enter();
                    executor.execute(&request)
                })
                .await
                .map_err(|e| ShardfuseError::Executor {
                    index: name,
                    message: format!("executor task failed: {}", e),
                })?
            }),
            Shard::Alias(alias) => Box::pin(async move { alias.search_partial(request).await }),
        }
    }
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Shard::Index(executor) => write!(f, "Shard::Index({})", executor.name()),
            Shard::Alias(alias) => write!(f, "Shard::Alias({})", alias.name()),
        }
    }
}

/// Scatter step: one task per shard, bounded by a semaphore
#[derive(Debug, Clone)]
pub struct ShardFanout {
    max_concurrent: usize,
}

impl ShardFanout {
    /// Create a fan-out
    ///
    /// # Arguments
    /// * `max_concurrent` - Maximum shard searches running at once (at least 1)
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Execute the child form of `request` on every shard.
    ///
    /// Every task is awaited, even after a failure. On success the results
    /// come back in shard order; otherwise the error names the first failed
    /// shard in shard order and carries every shard's error.
    pub async fn run(
        &self,
        request: &SearchRequest,
        shards: &[Shard],
    ) -> Result<Vec<PartialResult>> {
        let total = shards.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let child = request.child_request();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        // room for every result, so no task waits to deliver
        let (tx, mut rx) = mpsc::channel::<(usize, Result<PartialResult>)>(total);

        let mut handles = Vec::with_capacity(total);
        for (idx, shard) in shards.iter().enumerate() {
            let shard = shard.clone();
            let request = child.clone();
            let semaphore = semaphore.clone();
            let tx = tx.clone();
            debug!("Dispatching search to shard {} ({})", idx, shard.name());

            let task = async move {
                let name = shard.name().to_string();
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => shard.execute(request).await,
                    Err(e) => Err(ShardfuseError::Executor {
                        index: name,
                        message: format!("fan-out closed: {}", e),
                    }),
                };
                if tx.send((idx, result)).await.is_err() {
                    warn!("Result receiver dropped before shard {} reported", idx);
                }
            };
            handles.push(tokio::spawn(task.instrument(Span::current())));
        }
        drop(tx);

        let mut slots: Vec<Option<Result<PartialResult>>> = (0..total).map(|_| None).collect();
        let mut completed = 0;
        while let Some((idx, result)) = rx.recv().await {
            if let Err(e) = &result {
                warn!("Shard {} ({}) failed: {}", idx, shards[idx].name(), e);
            }
            slots[idx] = Some(result);
            completed += 1;
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Shard task did not finish cleanly: {}", e);
            }
        }
        debug!("{} of {} shards reported", completed, total);

        let mut partials = Vec::with_capacity(total);
        let mut errors = BTreeMap::new();
        let mut first_failure: Option<(String, String)> = None;

        for (idx, slot) in slots.into_iter().enumerate() {
            let name = shards[idx].name().to_string();
            // an empty slot means the task panicked before sending
            let outcome = slot.unwrap_or_else(|| {
                Err(ShardfuseError::Executor {
                    index: name.clone(),
                    message: "shard task panicked".to_string(),
                })
            });
            match outcome {
                Ok(partial) => partials.push(partial),
                Err(e) => {
                    let message = e.to_string();
                    if first_failure.is_none() {
                        first_failure = Some((name.clone(), message.clone()));
                    }
                    let key = if errors.contains_key(&name) {
                        format!("{}#{}", name, idx)
                    } else {
                        name
                    };
                    errors.insert(key, message);
                }
            }
        }

        match first_failure {
            Some((shard, message)) => Err(ShardfuseError::ShardFailure {
                shard,
                message,
                errors,
            }),
            None => Ok(partials),
        }
    }
}

impl Default for ShardFanout {
    fn default() -> Self {
        Self::new(crate::config::FanoutConfig::default().max_concurrent_shards)
    }
}
