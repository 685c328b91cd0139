//! Single-flight execution: concurrent callers share one in-flight operation.
//!
//! The first caller spawns the operation as a task and publishes a shared
//! handle to its result; callers arriving while it runs await that same
//! handle instead of starting their own. The task clears the slot when it
//! finishes, so the next caller starts a fresh operation and failures are
//! never cached.
//!
//! Because the work runs in its own task, cancelling (dropping) every waiter
//! does not abort it halfway through.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::task::JoinError;

type SharedResult<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

struct Flight<T, E> {
    id: u64,
    future: SharedResult<T, E>,
}

/// Deduplicates concurrent executions of one operation.
pub struct SingleFlight<T, E> {
    inflight: Mutex<Option<Flight<T, E>>>,
    next_id: AtomicU64,
}

impl<T, E> Default for SingleFlight<T, E> {
    fn default() -> Self {
        Self {
            inflight: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<T, E> SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<JoinError> + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an operation is currently running.
    pub fn is_in_flight(&self) -> bool {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Run `work` unless an identical operation is already in flight, in
    /// which case wait for that one's result instead.
    ///
    /// `work` is only invoked by the caller that starts a new flight.
    pub async fn run<F, Fut>(self: &Arc<Self>, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let future = {
            let mut slot = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(flight) => {
                    tracing::debug!("Joining in-flight operation #{}", flight.id);
                    flight.future.clone()
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let this = Arc::clone(self);
                    let operation = work();

                    // The slot lock is held until the flight is published, so
                    // `finish` cannot run before the slot holds this id.
                    let handle = tokio::spawn(async move {
                        let result = operation.await;
                        this.finish(id);
                        result
                    });

                    let shared = async move {
                        match handle.await {
                            Ok(result) => result,
                            Err(e) => Err(E::from(e)),
                        }
                    }
                    .boxed()
                    .shared();

                    tracing::debug!("Started operation #{}", id);
                    *slot = Some(Flight {
                        id,
                        future: shared.clone(),
                    });
                    shared
                }
            }
        };

        future.await
    }

    fn finish(&self, id: u64) {
        let mut slot = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().map(|flight| flight.id) == Some(id) {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct TestError(String);

    impl From<JoinError> for TestError {
        fn from(e: JoinError) -> Self {
            TestError(e.to_string())
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_execution() {
        let flight: Arc<SingleFlight<usize, TestError>> = Arc::new(SingleFlight::new());
        let executions = Arc::new(AtomicUsize::new(0));

        let calls = (0..10).map(|_| {
            let flight = flight.clone();
            let executions = executions.clone();
            async move {
                flight
                    .run(|| async move {
                        let n = executions.fetch_add(1, Ordering::SeqCst) + 1;
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(n)
                    })
                    .await
            }
        });

        let results = futures::future::join_all(calls).await;

        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r == &Ok(1)));
        assert!(!flight.is_in_flight());
    }

    #[tokio::test]
    async fn test_failure_reaches_every_waiter_and_is_not_cached() {
        let flight: Arc<SingleFlight<(), TestError>> = Arc::new(SingleFlight::new());
        let executions = Arc::new(AtomicUsize::new(0));

        let make_call = || {
            let flight = flight.clone();
            let executions = executions.clone();
            async move {
                flight
                    .run(|| async move {
                        executions.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Err(TestError("remote unreachable".into()))
                    })
                    .await
            }
        };

        let (a, b, c) = tokio::join!(make_call(), make_call(), make_call());
        for result in [a, b, c] {
            assert_eq!(result, Err(TestError("remote unreachable".into())));
        }
        assert_eq!(executions.load(Ordering::SeqCst), 1);

        // A later caller starts a fresh attempt
        let _ = make_call().await;
        assert_eq!(executions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_work_survives_cancelled_callers() {
        let flight: Arc<SingleFlight<(), TestError>> = Arc::new(SingleFlight::new());
        let completed = Arc::new(AtomicUsize::new(0));

        let done = completed.clone();
        let call = flight.run(|| async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            done.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        // Give up on the call long before the work finishes
        let timed_out = tokio::time::timeout(Duration::from_millis(5), call).await;
        assert!(timed_out.is_err());
        assert!(flight.is_in_flight());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 1);
        assert!(!flight.is_in_flight());
    }
}
