// src/client/isolate.rs — Bounded-time isolated call
//
// A blocked network read cannot observe a cancellation flag, so every model
// call attempt runs on its own task that is aborted when the deadline passes
// or when the caller stops waiting for it.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::ClientError;

/// Aborts the wrapped task when dropped, so an abandoned call never outlives
/// the worker that started it.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run `call` on a separate task and give it at most `limit` to finish.
pub async fn bounded<F, T>(limit: Duration, call: F) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>> + Send + 'static,
    T: Send + 'static,
{
    let mut guard = AbortOnDrop(tokio::spawn(call));

    match tokio::time::timeout(limit, &mut guard.0).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(ClientError::Isolation {
            message: if join_err.is_panic() {
                "model call panicked".into()
            } else {
                "model call was cancelled".into()
            },
        }),
        Err(_) => {
            tracing::warn!(
                timeout_secs = limit.as_secs_f64(),
                "Model call exceeded its deadline and was aborted"
            );
            Err(ClientError::Timeout {
                seconds: limit.as_secs(),
            })
        }
    }
}
