use std::future::Future;

use futures::future::{self, Either};

use crate::errors::*;

#[async_trait]
pub trait CancellationToken: 'static + Send + Sync {
    async fn wait(&self);
}

/// Races `future` against `cancellation_token.wait()`, completing with
/// `Cancelled` (and no side effect beyond whatever `future` already
/// committed before the race was lost) if the token resolves first. With no
/// token, just awaits `future` directly.
pub async fn with_cancellation<T, Fut>(
    future: Fut,
    cancellation_token: Option<&dyn CancellationToken>,
) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match cancellation_token {
        None => future.await,
        Some(token) => {
            // Poll the cancellation signal first so an already-cancelled
            // token always wins, even racing a future that would otherwise
            // resolve on its very first poll.
            let cancel = Box::pin(token.wait());
            let future = Box::pin(future);
            match future::select(cancel, future).await {
                Either::Left((_, _)) => Err(ErrorKind::Cancelled.into()),
                Either::Right((result, _)) => result,
            }
        }
    }
}