// ── Change notification stream ──
//
// Stream adapter over the store's broadcast channel, for hosts that
// drive their entity updates with `StreamExt` combinators rather than
// a receiver loop.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use crate::store::ChangeSet;

/// A subscription to changed-id notifications.
///
/// A consumer that falls behind far enough to lag the broadcast buffer
/// skips the missed notifications (with a warning); it should pull a
/// fresh snapshot rather than replaying them.
pub struct ChangeStream {
    inner: BroadcastStream<ChangeSet>,
}

impl ChangeStream {
    pub(crate) fn new(rx: tokio::sync::broadcast::Receiver<ChangeSet>) -> Self {
        Self {
            inner: BroadcastStream::new(rx),
        }
    }
}

impl Stream for ChangeStream {
    type Item = ChangeSet;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(changes))) => return Poll::Ready(Some(changes)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    tracing::warn!(skipped, "change stream lagged, notifications dropped");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
