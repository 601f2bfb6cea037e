//! Shared plumbing for pipeline stages.
//!
//! Stages run as detached tokio tasks wired together with bounded
//! channels. There is no user-initiated cancellation: a fatal error in a
//! stage is recorded in the [`ErrorSink`], the stage's sender clones
//! drop, downstream channels close, and everything drains. The binary
//! waits for the sink to go idle, then turns any recorded error into a
//! nonzero exit.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use tracing::{debug, error};

pub mod copier;
pub mod deleter;
pub mod downloader;
pub mod streamer;

/// Shared error state across the stages of one invocation.
///
/// Cloned into every stage. `wait_idle` returns once every registered
/// stage has finished and recorded its outcome, so a caller that drained
/// a result channel can safely inspect the error state afterwards.
#[derive(Debug, Clone, Default)]
pub struct ErrorSink {
    has_error: Arc<AtomicBool>,
    errors: Arc<Mutex<VecDeque<anyhow::Error>>>,
    active_stages: Arc<AtomicUsize>,
    stage_finished: Arc<tokio::sync::Notify>,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, error: anyhow::Error) {
        self.has_error.store(true, Ordering::SeqCst);
        self.errors.lock().unwrap().push_back(error);
    }

    pub fn has_error(&self) -> bool {
        self.has_error.load(Ordering::SeqCst)
    }

    /// Consume and return all accumulated errors.
    pub fn take_errors(&self) -> Vec<anyhow::Error> {
        self.errors.lock().unwrap().drain(..).collect()
    }

    /// Wait until every registered stage has finished.
    pub async fn wait_idle(&self) {
        loop {
            let finished = self.stage_finished.notified();
            if self.active_stages.load(Ordering::SeqCst) == 0 {
                return;
            }
            finished.await;
        }
    }

    /// Fold the recorded errors into one result; the first error wins.
    pub fn into_result(self) -> Result<()> {
        if !self.has_error() {
            return Ok(());
        }
        let mut errors = self.take_errors();
        if errors.is_empty() {
            return Err(anyhow!("pipeline failed"));
        }
        Err(errors.remove(0))
    }

    fn register_stage(&self) {
        self.active_stages.fetch_add(1, Ordering::SeqCst);
    }

    fn finish_stage(&self) {
        self.active_stages.fetch_sub(1, Ordering::SeqCst);
        self.stage_finished.notify_waiters();
    }
}

/// Spawn a pipeline stage with error capture.
///
/// The double-spawn catches panics in the stage body: the inner task
/// runs the stage, the outer one records the outcome and marks the stage
/// finished in the sink.
pub(crate) fn spawn_stage<F>(stage_name: &'static str, sink: ErrorSink, stage: F)
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    sink.register_stage();
    tokio::spawn(async move {
        let join_result = tokio::spawn(stage).await;
        match join_result {
            Ok(Ok(())) => {
                debug!("{stage_name} completed.");
            }
            Ok(Err(e)) => {
                error!("{stage_name} failed: {e:#}");
                sink.record(e);
            }
            Err(e) => {
                error!("{stage_name} task panicked: {e}");
                sink.record(anyhow!("{stage_name} task panicked: {e}"));
            }
        }
        sink.finish_stage();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sink_starts_clean() {
        let sink = ErrorSink::new();
        assert!(!sink.has_error());
        assert!(sink.take_errors().is_empty());
        sink.wait_idle().await;
        assert!(sink.into_result().is_ok());
    }

    #[tokio::test]
    async fn record_sets_flag_and_stores_error() {
        let sink = ErrorSink::new();
        sink.record(anyhow!("boom"));
        assert!(sink.has_error());

        let errors = sink.take_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].to_string(), "boom");

        // the flag stays set after consuming
        assert!(sink.has_error());
    }

    #[tokio::test]
    async fn stage_error_is_recorded_before_idle() {
        let sink = ErrorSink::new();
        spawn_stage("failing stage", sink.clone(), async {
            Err(anyhow!("stage exploded"))
        });

        sink.wait_idle().await;
        assert!(sink.has_error());
        assert!(sink.clone().into_result().is_err());
    }

    #[tokio::test]
    async fn stage_panic_is_recorded() {
        let sink = ErrorSink::new();
        spawn_stage("panicking stage", sink.clone(), async { panic!("kaboom") });

        sink.wait_idle().await;
        assert!(sink.has_error());
        let errors = sink.take_errors();
        assert!(errors[0].to_string().contains("panicked"));
    }

    #[tokio::test]
    async fn successful_stage_leaves_sink_clean() {
        let sink = ErrorSink::new();
        spawn_stage("ok stage", sink.clone(), async { Ok(()) });
        sink.wait_idle().await;
        assert!(!sink.has_error());
    }
}
