use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use rollup_node_objects::Timestamp;

use crate::{
    errors::PipelineError,
    pipeline::{BatchPipeline, PipelineControl, PipelineFactory},
};

#[derive(Debug, Default)]
struct Counters {
    created: AtomicUsize,
    stopped: AtomicUsize,
    flushes: AtomicUsize,
}

/// Creates pipelines which do nothing but count what happens to them.
///
/// A flush stands in for a published batch and is recorded as such.
#[derive(Clone, Debug, Default)]
pub struct MockPipelineFactory {
    counters: Arc<Counters>,
}

impl MockPipelineFactory {
    pub fn created(&self) -> usize {
        self.counters.created.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.counters.stopped.load(Ordering::SeqCst)
    }

    pub fn flushes(&self) -> usize {
        self.counters.flushes.load(Ordering::SeqCst)
    }

    /// Number of pipelines created and not yet stopped.
    pub fn running(&self) -> usize {
        self.created() - self.stopped()
    }
}

impl PipelineFactory for MockPipelineFactory {
    fn create(&self) -> Box<dyn BatchPipeline> {
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Box::new(MockPipeline { counters: Arc::clone(&self.counters) })
    }
}

struct MockPipeline {
    counters: Arc<Counters>,
}

#[async_trait]
impl BatchPipeline for MockPipeline {
    async fn run(self: Box<Self>, control: PipelineControl) -> Result<(), PipelineError> {
        loop {
            tokio::select! {
                () = control.stop.requested() => break,
                () = control.flush.notified() => {
                    control.last_published.record(Timestamp::now());
                    self.counters.flushes.fetch_add(1, Ordering::SeqCst);
                },
            }
        }

        self.counters.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
