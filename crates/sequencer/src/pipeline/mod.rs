//! The speculative batch pipeline between two confirmed blocks.

use std::sync::Arc;

use async_trait::async_trait;
use rollup_node_objects::Timestamp;
use tokio::{
    sync::{watch, Notify},
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::{errors::PipelineError, InterruptToken, COMPONENT};

mod default;

pub use default::{DefaultPipeline, DefaultPipelineFactory, DefaultPipelineOptions};

// PIPELINE
// ================================================================================================

/// One epoch of batch building and publishing.
///
/// A pipeline runs until its stop token is requested. It must return promptly once that
/// happens, leaving any world-state writes it staged for the synchronizer to commit or roll
/// back.
#[async_trait]
pub trait BatchPipeline: Send + 'static {
    async fn run(self: Box<Self>, control: PipelineControl) -> Result<(), PipelineError>;
}

/// Creates a fresh pipeline every time the synchronizer starts a new epoch.
pub trait PipelineFactory: Send + Sync + 'static {
    fn create(&self) -> Box<dyn BatchPipeline>;
}

/// Signals from the synchronizer to a running pipeline.
#[derive(Clone, Debug, Default)]
pub struct PipelineControl {
    /// Requested when the pipeline has to stop.
    pub stop: InterruptToken,
    /// Notified when pending transactions should be batched without waiting.
    pub flush: Arc<Notify>,
    pub last_published: LastPublished,
}

/// When a batch published by this node was last mined.
///
/// Shared by consecutive pipelines, so it outlives the pipeline which published the batch.
#[derive(Clone, Debug)]
pub struct LastPublished {
    time: Arc<watch::Sender<Option<Timestamp>>>,
}

impl LastPublished {
    pub fn record(&self, time: Timestamp) {
        self.time.send_replace(Some(time));
    }

    pub fn get(&self) -> Option<Timestamp> {
        *self.time.borrow()
    }
}

impl Default for LastPublished {
    fn default() -> Self {
        let (time, _) = watch::channel(None);
        Self { time: Arc::new(time) }
    }
}

// PIPELINE HANDLE
// ================================================================================================

/// A pipeline running as a tokio task.
pub struct PipelineHandle {
    control: PipelineControl,
    task: JoinHandle<Result<(), PipelineError>>,
}

impl PipelineHandle {
    pub fn spawn(pipeline: Box<dyn BatchPipeline>, last_published: LastPublished) -> Self {
        let control = PipelineControl { last_published, ..Default::default() };
        let task = tokio::spawn(pipeline.run(control.clone()));

        info!(target: COMPONENT, "Pipeline started");

        Self { control, task }
    }

    pub fn flush_txs(&self) {
        self.control.flush.notify_one();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the pipeline and waits until its task has finished.
    ///
    /// Returns the error the pipeline failed with, if any.
    pub async fn stop(self) -> Result<(), PipelineError> {
        self.control.stop.request();

        let result = self.task.await.map_err(PipelineError::Panicked).and_then(|result| result);
        match &result {
            Ok(()) => info!(target: COMPONENT, "Pipeline stopped"),
            Err(err) => warn!(target: COMPONENT, %err, "Pipeline stopped with an error"),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::{errors::StoreError, test_utils::MockPipelineFactory};

    struct FailingPipeline;

    #[async_trait]
    impl BatchPipeline for FailingPipeline {
        async fn run(self: Box<Self>, _control: PipelineControl) -> Result<(), PipelineError> {
            Err(StoreError::Unavailable("disk full".into()).into())
        }
    }

    struct PanickingPipeline;

    #[async_trait]
    impl BatchPipeline for PanickingPipeline {
        async fn run(self: Box<Self>, control: PipelineControl) -> Result<(), PipelineError> {
            control.stop.requested().await;
            panic!("pipeline bug");
        }
    }

    #[tokio::test]
    async fn stop_waits_for_the_pipeline() {
        let factory = MockPipelineFactory::default();
        let handle = PipelineHandle::spawn(factory.create(), LastPublished::default());

        handle.flush_txs();
        handle.stop().await.unwrap();

        assert_eq!(factory.created(), 1);
        assert_eq!(factory.stopped(), 1);
    }

    #[tokio::test]
    async fn stop_reports_pipeline_failures() {
        let handle = PipelineHandle::spawn(Box::new(FailingPipeline), LastPublished::default());
        assert_matches!(handle.stop().await, Err(PipelineError::StoreError(_)));

        let handle = PipelineHandle::spawn(Box::new(PanickingPipeline), LastPublished::default());
        assert_matches!(handle.stop().await, Err(PipelineError::Panicked(_)));
    }
}
