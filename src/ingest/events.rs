//! Progress notifications for ingestion runs.
//!
//! After every handled height the pipeline dispatches a [`ProgressUpdate`] to the registered
//! sinks. Sinks are how presentation layers (dashboards, logs) follow a run without the pipeline
//! knowing about them; any `Fn(&ProgressUpdate)` closure is a sink.

use crate::ingest::types::IngestError;

use tracing::{debug, info};

/// Emitted once per indexed or skipped height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub chain_id: String,
    /// The height just handled
    pub height: u64,
    /// The height was skipped because its state was pruned
    pub skipped: bool,
    pub last_indexed_block: Option<u64>,
    pub blocks_indexed: u64,
    pub transactions_indexed: u64,
    pub events_indexed: u64,
    /// Fetches still outstanding for later heights
    pub in_flight: usize,
}

/// Trait for receiving progress updates.
#[async_trait::async_trait]
pub trait ProgressSink: Send + Sync {
    async fn handle(&self, update: &ProgressUpdate) -> Result<(), IngestError>;

    /// Get the name of this sink for logging and diagnostics.
    fn name(&self) -> &'static str;
}

#[async_trait::async_trait]
impl<F> ProgressSink for F
where
    F: Fn(&ProgressUpdate) + Send + Sync,
{
    async fn handle(&self, update: &ProgressUpdate) -> Result<(), IngestError> {
        self(update);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "callback"
    }
}

/// Fans progress updates out to every registered sink.
#[derive(Default)]
pub struct ProgressDispatcher {
    sinks: Vec<Box<dyn ProgressSink>>,
}

impl ProgressDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new sink. Sinks are called in the order they are registered.
    pub fn register(&mut self, sink: Box<dyn ProgressSink>) {
        self.sinks.push(sink);
    }

    /// Number of registered sinks.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Dispatch an update to all registered sinks.
    ///
    /// A failing sink is logged and does not stop the others, nor the run.
    pub async fn dispatch(&self, update: &ProgressUpdate) {
        for sink in &self.sinks {
            if let Err(e) = sink.handle(update).await {
                tracing::error!("Progress sink {} failed: {}", sink.name(), e);
            }
        }
    }
}

/// Logs skipped heights at info level, indexed ones at debug level.
pub struct LoggingProgressSink;

#[async_trait::async_trait]
impl ProgressSink for LoggingProgressSink {
    async fn handle(&self, update: &ProgressUpdate) -> Result<(), IngestError> {
        if update.skipped {
            info!(
                "[{}] skipped height {} ({} in flight)",
                update.chain_id, update.height, update.in_flight
            );
        } else {
            debug!(
                "[{}] indexed height {}: {} blocks, {} transactions, {} events ({} in flight)",
                update.chain_id,
                update.height,
                update.blocks_indexed,
                update.transactions_indexed,
                update.events_indexed,
                update.in_flight
            );
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "LoggingProgressSink"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct FailingSink;

    #[async_trait::async_trait]
    impl ProgressSink for FailingSink {
        async fn handle(&self, _update: &ProgressUpdate) -> Result<(), IngestError> {
            Err(IngestError::Config("sink closed".to_string()))
        }

        fn name(&self) -> &'static str {
            "FailingSink"
        }
    }

    fn update(height: u64) -> ProgressUpdate {
        ProgressUpdate {
            chain_id: "test".to_string(),
            height,
            skipped: false,
            last_indexed_block: Some(height),
            blocks_indexed: height + 1,
            transactions_indexed: 0,
            events_indexed: 0,
            in_flight: 0,
        }
    }

    #[tokio::test]
    async fn failing_sinks_do_not_stop_the_others() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = {
            let seen = seen.clone();
            move |update: &ProgressUpdate| seen.lock().unwrap().push(update.height)
        };

        let mut dispatcher = ProgressDispatcher::new();
        dispatcher.register(Box::new(FailingSink));
        dispatcher.register(Box::new(recorder));
        dispatcher.register(Box::new(LoggingProgressSink));
        assert_eq!(dispatcher.len(), 3);

        dispatcher.dispatch(&update(1)).await;
        dispatcher.dispatch(&update(2)).await;

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }
}
