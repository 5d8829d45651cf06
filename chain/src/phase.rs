//! Fan-out helpers for bootstrap phases.
//!
//! Every phase runs one task per node and is joined by a barrier before the
//! next phase begins. When any task fails, the remaining tasks of the phase
//! are dropped (and with them any in-flight container operation).

use crate::Error;
use futures::future::{join_all, try_join_all};
use std::future::Future;

/// Run every task concurrently, failing fast on the first error.
pub async fn join<I, F, T>(tasks: I) -> Result<Vec<T>, Error>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, Error>>,
{
    try_join_all(tasks).await
}

/// Run `task(i)` for every `i < n` concurrently, collecting results by index.
///
/// Each task writes only its own pre-allocated slot, so results line up with
/// indices regardless of completion order.
pub async fn join_indexed<T, F, Fut>(n: usize, task: F) -> Result<Vec<T>, Error>
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut slots: Vec<Option<T>> = (0..n).map(|_| None).collect();
    try_join_all(slots.iter_mut().enumerate().map(|(i, slot)| {
        let fut = task(i);
        async move {
            *slot = Some(fut.await?);
            Ok::<_, Error>(())
        }
    }))
    .await?;
    slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| slot.ok_or(Error::MissingSlot(i)))
        .collect()
}

/// Run every task to completion, then return the first error (if any).
pub async fn join_settled<I, F>(tasks: I) -> Result<(), Error>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<(), Error>>,
{
    join_all(tasks).await.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{executor::block_on, future::ready};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use test_case::test_case;

    /// Yield `n` times before completing, so tasks finish out of order.
    async fn yield_times(n: usize) {
        for _ in 0..n {
            let mut yielded = false;
            futures::future::poll_fn(|cx| {
                if yielded {
                    std::task::Poll::Ready(())
                } else {
                    yielded = true;
                    cx.waker().wake_by_ref();
                    std::task::Poll::Pending
                }
            })
            .await;
        }
    }

    #[test_case(1)]
    #[test_case(5)]
    #[test_case(20)]
    fn test_join_indexed(n: usize) {
        let results = block_on(join_indexed(n, |i| async move {
            yield_times(n - i).await;
            Ok(i * 10)
        }))
        .unwrap();
        assert_eq!(results, (0..n).map(|i| i * 10).collect::<Vec<_>>());
    }

    #[test]
    fn test_join_indexed_fails_fast() {
        let completed = AtomicUsize::new(0);
        let result = block_on(join_indexed(5, |i| {
            let completed = &completed;
            async move {
                if i == 0 {
                    return Err(Error::MissingField(format!("slot {i}")));
                }
                yield_times(3).await;
                completed.fetch_add(1, Ordering::SeqCst);
                Ok(i)
            }
        }));
        assert!(matches!(result, Err(Error::MissingField(_))));
        assert_eq!(completed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_join() {
        let results = block_on(join((0..3).map(|i| ready(Ok::<_, Error>(i))))).unwrap();
        assert_eq!(results, vec![0, 1, 2]);
    }

    #[test]
    fn test_join_settled_runs_everything() {
        let completed = AtomicUsize::new(0);
        let result = block_on(join_settled((0..4).map(|i| {
            let completed = &completed;
            async move {
                completed.fetch_add(1, Ordering::SeqCst);
                if i % 2 == 1 {
                    Err(Error::MissingSlot(i))
                } else {
                    Ok(())
                }
            }
        })));
        assert!(matches!(result, Err(Error::MissingSlot(1))));
        assert_eq!(completed.load(Ordering::SeqCst), 4);
    }
}
