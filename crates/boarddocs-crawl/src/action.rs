//! Steps that must run at most once

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use boarddocs_core::Result;
use tracing::debug;

/// A navigation step shared by several later steps
///
/// Opening an item's agenda, for example, is needed both to scrape the item
/// and to download its attachments, but must only happen once per meeting.
/// Create one per logical step and pass it down to everything that needs the
/// step done.
#[derive(Debug)]
pub struct OnceAction {
    name: &'static str,
    done: AtomicBool,
}

impl OnceAction {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            done: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Run `step` unless an earlier call already ran it
    ///
    /// Returns whether `step` ran. The action counts as done as soon as it
    /// starts, so a failed step is not attempted again.
    pub async fn run<F, Fut>(&self, step: F) -> Result<bool>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        if self.done.swap(true, Ordering::SeqCst) {
            debug!("{} already done", self.name);
            return Ok(false);
        }
        step().await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boarddocs_core::ScrapeError;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_runs_once() {
        let action = OnceAction::new("agenda");
        let calls = AtomicUsize::new(0);
        let counter = &calls;

        let step = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), ScrapeError>(())
        };
        assert!(action.run(step).await.unwrap());
        assert!(!action.run(step).await.unwrap());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(action.is_done());
    }

    #[tokio::test]
    async fn test_failed_step_not_retried() {
        let action = OnceAction::new("open item");

        let err = action
            .run(|| async { Err(ScrapeError::Browser("tab crashed".to_string())) })
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Browser(_)));

        assert!(!action.run(|| async { Ok(()) }).await.unwrap());
    }
}
