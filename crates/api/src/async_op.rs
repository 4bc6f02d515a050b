//! Asynchronous operation facade.
//!
//! A mutation is handed off as a unit of work and the caller gets back a
//! [`Pending`] that resolves exactly once, to either the resulting value or a
//! failure [`Status`].

use std::future::Future;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use metrics::counter;
use tokio::sync::oneshot;
use tracing::debug;
use vessel_core::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum OperationResult<T> {
    Success(T),
    Failure(Status),
}

impl<T> OperationResult<T> {
    pub fn from_result(res: Result<T, Error>) -> Self {
        match res {
            Ok(v) => OperationResult::Success(v),
            Err(e) => OperationResult::Failure(e.to_status()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OperationResult::Success(_))
    }

    pub fn into_result(self) -> Result<T, Status> {
        match self {
            OperationResult::Success(v) => Ok(v),
            OperationResult::Failure(st) => Err(st),
        }
    }

    /// Failure message, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            OperationResult::Success(_) => None,
            OperationResult::Failure(st) => st.message.as_deref(),
        }
    }
}

/// Single-reader handle on an in-flight operation. Await it for the result.
#[derive(Debug)]
pub struct Pending<T> {
    rx: oneshot::Receiver<OperationResult<T>>,
}

impl<T> Future for Pending<T> {
    type Output = OperationResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|res| match res {
            Ok(out) => out,
            // The work panicked or was torn down before reporting.
            Err(_) => OperationResult::Failure(Error::Internal("operation ended without a result".into()).to_status()),
        })
    }
}

/// Run `work` on the runtime and return immediately.
///
/// The work is not cancellable: dropping the [`Pending`] discards the result
/// but the mutation still runs to completion.
pub fn make_async<T, F, Fut>(work: F) -> Pending<T>
where
    T: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, Error>> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let out = match work().await {
            Ok(v) => {
                counter!("async_ops_total", 1u64, "outcome" => "success");
                OperationResult::Success(v)
            }
            Err(e) => {
                debug!(error = %e, code = e.code(), "api: operation failed");
                counter!("async_ops_total", 1u64, "outcome" => "failure");
                OperationResult::Failure(e.to_status())
            }
        };
        let _ = tx.send(out);
    });
    Pending { rx }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn success_carries_value() {
        let out = make_async(|| async { Ok::<_, Error>(42) }).await;
        assert_eq!(out, OperationResult::Success(42));
    }

    #[tokio::test]
    async fn failure_carries_status_of_error() {
        let out = make_async(|| async { Err::<(), _>(Error::not_found("Route", "foo")) }).await;
        let st = out.into_result().unwrap_err();
        assert_eq!(st.code, Some(404));
        assert_eq!(st.message.as_deref(), Some("Route foo not found"));
        assert_eq!(st.status.as_deref(), Some("Failure"));
    }

    #[tokio::test]
    async fn panicking_work_still_resolves() {
        let explode = true;
        let out = make_async(move || async move {
            if explode {
                panic!("boom");
            }
            Ok::<(), Error>(())
        })
        .await;
        assert_eq!(out.message(), Some("internal error: operation ended without a result"));
    }

    #[tokio::test]
    async fn work_runs_even_if_result_is_dropped() {
        let (tx, rx) = oneshot::channel();
        drop(make_async(move || async move {
            let _ = tx.send(());
            Ok::<_, Error>(())
        }));
        assert!(rx.await.is_ok());
    }
}
