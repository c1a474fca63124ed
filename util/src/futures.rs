use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::FutureExt;
use tokio::task::JoinHandle;

/// A spawned task which is aborted when dropped before completion.
///
/// Panics inside the task are propagated to the awaiting side.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct JoinTask<T> {
    handle: Option<JoinHandle<T>>,
}

impl<T> JoinTask<T>
where
    T: Send + 'static,
{
    pub fn new<F>(f: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self {
            handle: Some(tokio::spawn(f)),
        }
    }
}

impl<T> Drop for JoinTask<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl<T> Future for JoinTask<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(handle) = self.handle.as_mut() else {
            panic!("JoinTask polled after completion");
        };

        let res = futures_util::ready!(handle.poll_unpin(cx));
        self.handle = None;

        match res {
            Ok(value) => Poll::Ready(value),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            // Tasks are only cancelled through `Drop`.
            Err(_) => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn returns_task_output() {
        let task = JoinTask::new(async { 40 + 2 });
        assert_eq!(task.await, 42);
    }

    #[tokio::test]
    async fn aborts_on_drop() {
        let finished = Arc::new(AtomicBool::new(false));

        let task = JoinTask::new({
            let finished = finished.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                finished.store(true, Ordering::Release);
            }
        });
        drop(task);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!finished.load(Ordering::Acquire));
    }
}
