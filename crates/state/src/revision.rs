//! Write revision counter behind the live snapshot streams

use futures::future::Future;
use futures::stream::{self, BoxStream, StreamExt};
use orchard_errors::Error;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;

#[derive(Debug, Clone)]
pub(crate) struct Revision(Arc<watch::Sender<u64>>);

impl Revision {
    pub(crate) fn new() -> Self {
        Self(Arc::new(watch::Sender::new(0)))
    }

    /// Wake every stream; called after each committed write
    pub(crate) fn bump(&self) {
        self.0.send_modify(|revision| *revision = revision.wrapping_add(1));
    }

    pub(crate) fn current(&self) -> u64 {
        *self.0.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.0.subscribe()
    }
}

/// Yield a fresh snapshot now and after every later write.
///
/// Writes that land while a snapshot is being read coalesce into the next
/// one. A failed read is logged and skipped.
pub(crate) fn snapshots<T, F, Fut>(revision: &Revision, fetch: F) -> BoxStream<'static, T>
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, Error>> + Send + 'static,
{
    let rx = revision.subscribe();
    stream::unfold((rx, fetch, true), |(mut rx, fetch, first)| async move {
        if !first && rx.changed().await.is_err() {
            return None;
        }
        loop {
            rx.borrow_and_update();
            match fetch().await {
                Ok(snapshot) => return Some((snapshot, (rx, fetch, false))),
                Err(e) => {
                    warn!(error = %e, "Failed to read snapshot");
                    if rx.changed().await.is_err() {
                        return None;
                    }
                }
            }
        }
    })
    .boxed()
}
