//! Per-call options for pull and push.

use std::future::Future;
use std::sync::Arc;

use onmetal_oci::Descriptor;
use tokio::sync::watch;

use crate::error::SyncError;
use crate::observer::{Direction, Stage, TracingObserver, TransferEvent, TransferObserver};

/// Cancellation and diagnostics for one pull or push.
#[derive(Clone)]
pub struct SyncContext {
    cancel: Option<watch::Receiver<bool>>,
    observer: Arc<dyn TransferObserver>,
}

impl Default for SyncContext {
    fn default() -> Self {
        Self {
            cancel: None,
            observer: Arc::new(TracingObserver),
        }
    }
}

impl SyncContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the operation once the channel holds `true`.
    #[must_use]
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn TransferObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Completes once cancellation is requested. Never completes without a
    /// cancel channel or after its sender is gone.
    pub async fn cancelled(&self) {
        if let Some(rx) = &self.cancel {
            let mut rx = rx.clone();
            if rx.wait_for(|cancelled| *cancelled).await.is_ok() {
                return;
            }
        }
        std::future::pending::<()>().await;
    }

    /// Run a transfer, abandoning it when cancelled.
    ///
    /// The future is dropped on cancellation, which discards any blob write
    /// still in flight.
    pub(crate) async fn run<T>(
        &self,
        transfer: impl Future<Output = Result<T, SyncError>>,
    ) -> Result<T, SyncError> {
        if self.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        tokio::select! {
            biased;
            () = self.cancelled() => Err(SyncError::Cancelled),
            result = transfer => result,
        }
    }

    pub(crate) fn emit(&self, direction: Direction, stage: Stage, descriptor: &Descriptor) {
        self.observer.on_event(&TransferEvent {
            direction,
            stage,
            descriptor,
        });
    }
}
