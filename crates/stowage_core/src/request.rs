//! Bridges host callbacks to futures.
//!
//! Every host request is paired with a oneshot channel: the callback handed
//! to the host sends the outcome, and the [`Request`] future receives it. A
//! host that drops the callback without calling it cancels the channel,
//! which resolves the future with an `Abort` error instead of hanging.

use futures_channel::oneshot;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use stowage_host::{Callback, HostError, HostResult};

/// Future resolving with the outcome of one host request.
#[derive(Debug)]
#[must_use = "a request does nothing useful unless awaited"]
pub(crate) struct Request<T> {
    receiver: oneshot::Receiver<HostResult<T>>,
}

impl<T> Future for Request<T> {
    type Output = HostResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(HostError::abort(
                "host dropped the request without answering",
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Creates a callback and the future it completes.
pub(crate) fn request<T: 'static>() -> (Callback<T>, Request<T>) {
    let (sender, receiver) = oneshot::channel();
    let callback: Callback<T> = Box::new(move |result| {
        // The receiver is gone only if the caller stopped waiting.
        let _ = sender.send(result);
    });
    (callback, Request { receiver })
}

/// Issues one request and waits for its outcome.
pub(crate) async fn issue<T, F>(send: F) -> HostResult<T>
where
    T: 'static,
    F: FnOnce(Callback<T>),
{
    let (callback, pending) = request();
    send(callback);
    pending.await
}
