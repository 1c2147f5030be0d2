//! Deferred result of an outbound request.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use parley_core::{Message, MessageId, ParleyError, ParleyResult};

/// Future that settles when the request gets a correlated reply, exhausts its
/// retries, or is cancelled.
///
/// If the protocol is dropped while the request is pending, the future
/// resolves to [`ParleyError::Cancelled`].
#[derive(Debug)]
pub struct ResponseFuture {
    request_id: MessageId,
    receiver: oneshot::Receiver<ParleyResult<Message>>,
}

impl ResponseFuture {
    pub(crate) fn new(
        request_id: MessageId,
        receiver: oneshot::Receiver<ParleyResult<Message>>,
    ) -> Self {
        Self {
            request_id,
            receiver,
        }
    }

    /// Id of the request this future waits on.
    pub fn request_id(&self) -> &MessageId {
        &self.request_id
    }
}

impl Future for ResponseFuture {
    type Output = ParleyResult<Message>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ParleyError::Cancelled {
                request_id: this.request_id.clone(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}
