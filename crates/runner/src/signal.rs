//! Interrupt handling for a run.
//!
//! The first interrupt cancels dispatch and lets in-flight scripts finish.
//! A second one asks the caller to abort the process.

use std::future::Future;

use tokio_util::sync::CancellationToken;

/// Why [`watch_interrupts`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// A second interrupt arrived while the run was draining.
    Forced,
    /// The signal source failed; interrupts are no longer observed.
    Unavailable,
}

/// Forward interrupts from `next_signal` to `cancel`.
///
/// `next_signal` is called once per awaited interrupt, e.g.
/// `tokio::signal::ctrl_c`.
pub async fn watch_interrupts<S, F>(mut next_signal: S, cancel: CancellationToken) -> Interrupt
where
    S: FnMut() -> F,
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = next_signal().await {
        tracing::warn!(error = %e, "Unable to listen for interrupts");
        return Interrupt::Unavailable;
    }
    tracing::warn!("Interrupt received, finishing in-flight scripts (interrupt again to abort)");
    cancel.cancel();

    match next_signal().await {
        Ok(()) => Interrupt::Forced,
        Err(e) => {
            tracing::warn!(error = %e, "Unable to listen for interrupts");
            Interrupt::Unavailable
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::Notify;

    use super::*;

    type Signal = Pin<Box<dyn Future<Output = io::Result<()>> + Send>>;

    /// Each call waits for one `notify_one` on `notify`.
    fn signal_source(notify: &Arc<Notify>) -> impl FnMut() -> Signal + Send + 'static {
        let notify = Arc::clone(notify);
        move || {
            let notify = Arc::clone(&notify);
            Box::pin(async move {
                notify.notified().await;
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn first_interrupt_cancels_second_forces() {
        let interrupts = Arc::new(Notify::new());
        let cancel = CancellationToken::new();
        let watcher = tokio::spawn(watch_interrupts(signal_source(&interrupts), cancel.clone()));

        interrupts.notify_one();
        tokio::time::timeout(Duration::from_secs(1), cancel.cancelled())
            .await
            .expect("first interrupt cancels the run");
        assert!(!watcher.is_finished());

        interrupts.notify_one();
        let outcome = tokio::time::timeout(Duration::from_secs(1), watcher)
            .await
            .expect("second interrupt ends the watcher")
            .unwrap();
        assert_eq!(outcome, Interrupt::Forced);
    }

    #[tokio::test]
    async fn failing_signal_source_leaves_run_alone() {
        let cancel = CancellationToken::new();
        let outcome = watch_interrupts(
            || async { Err(io::Error::new(io::ErrorKind::Other, "no signal handler")) },
            cancel.clone(),
        )
        .await;

        assert_eq!(outcome, Interrupt::Unavailable);
        assert!(!cancel.is_cancelled());
    }
}
