//! Supervision of the resolver's background tasks.

use std::any::Any;
use std::future::Future;

use tokio::task::JoinHandle;
use tracing::{debug, error, Instrument, Span};

use crate::error::Result;

/// Run `task` on the runtime and contain its failure.
///
/// Errors and panics are logged under `span` and go no further: the process
/// keeps running and nothing else is torn down. The returned handle resolves
/// once the task has ended, however it ended.
pub(crate) fn supervise<F>(name: &'static str, span: Span, task: F) -> JoinHandle<()>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let inner = tokio::spawn(task.instrument(span.clone()));

    tokio::spawn(
        async move {
            match inner.await {
                Ok(Ok(())) => debug!(task = name, "background task finished"),
                Ok(Err(e)) => error!(task = name, error = %e, "background task failed"),
                Err(e) if e.is_panic() => {
                    error!(task = name, panic = %panic_message(e.into_panic()), "background task panicked")
                }
                Err(_) => debug!(task = name, "background task cancelled"),
            }
        }
        .instrument(span),
    )
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
