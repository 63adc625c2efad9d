use crate::client::fetch::{DependencyKey, FetchRequest, Loader};
use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, PartialEq)]
pub struct PollState<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub last_updated: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

/// Re-fetches one endpoint on a fixed period. A failed tick keeps the last
/// good value; nothing runs once stopped or dropped.
pub struct Poller<T> {
    endpoint: String,
    state: watch::Receiver<PollState<T>>,
    attempts: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl<T> Poller<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Fires the first fetch immediately. Must be called inside a tokio runtime.
    /// A zero period is rejected.
    pub fn start(loader: Loader<T>, endpoint: impl Into<String>, period: Duration) -> AppResult<Self> {
        let endpoint = endpoint.into();
        if period.is_zero() {
            return Err(AppError::BadRequest(format!(
                "poll period for {} must be greater than zero",
                endpoint
            )));
        }
        let (sender, receiver) = watch::channel(PollState {
            data: None,
            loading: true,
            last_updated: None,
            consecutive_failures: 0,
        });
        let attempts = Arc::new(AtomicU64::new(0));

        let task = tokio::spawn({
            let endpoint = endpoint.clone();
            let attempts = attempts.clone();
            async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    let request = FetchRequest {
                        endpoint: endpoint.clone(),
                        dependencies: DependencyKey::empty(),
                        generation: attempt,
                    };
                    match loader(request).await {
                        Ok(data) => sender.send_modify(|state| {
                            state.data = Some(data);
                            state.loading = false;
                            state.last_updated = Some(Utc::now());
                            state.consecutive_failures = 0;
                        }),
                        Err(error) => {
                            tracing::warn!(endpoint = %endpoint, attempt, error = %error, "poll failed");
                            sender.send_modify(|state| {
                                state.loading = false;
                                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                            });
                        }
                    }
                }
            }
        });

        tracing::debug!(endpoint = %endpoint, period_ms = period.as_millis() as u64, "poller started");
        Ok(Self {
            endpoint,
            state: receiver,
            attempts,
            task: Some(task),
        })
    }

    pub fn snapshot(&self) -> PollState<T> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollState<T>> {
        self.state.clone()
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Waits until the first fetch attempt has completed.
    pub async fn ready(&self) -> PollState<T> {
        let mut receiver = self.state.clone();
        let ready = match receiver.wait_for(|state| !state.loading).await {
            Ok(state) => state.clone(),
            Err(_) => self.snapshot(),
        };
        ready
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!(endpoint = %self.endpoint, "poller stopped");
        }
    }
}

impl<T> Drop for Poller<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Poller;
    use crate::client::fetch::{FetchRequest, Loader};
    use crate::errors::AppError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn counting_loader(calls: Arc<AtomicUsize>) -> Loader<usize> {
        Arc::new(move |_request: FetchRequest| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Box::pin(async move { Ok(n) })
        })
    }

    #[tokio::test]
    async fn first_fetch_is_immediate_and_repeats_on_period() {
        let calls = Arc::new(AtomicUsize::new(0));
        let poller = Poller::start(
            counting_loader(calls.clone()),
            "/api/realtime",
            Duration::from_millis(40),
        )
        .expect("start poller");

        let first = poller.ready().await;
        assert_eq!(first.data, Some(1));
        assert!(first.last_updated.is_some());

        let mut receiver = poller.subscribe();
        receiver.borrow_and_update();
        receiver.changed().await.expect("next tick published");
        assert!(receiver.borrow().data.unwrap_or_default() >= 2);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(calls.load(Ordering::SeqCst) >= 3);
        assert!(poller.snapshot().data.unwrap_or_default() >= 3);
    }

    #[tokio::test]
    async fn no_fetch_after_stop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut poller = Poller::start(
            counting_loader(calls.clone()),
            "/api/realtime",
            Duration::from_millis(20),
        )
        .expect("start poller");
        poller.ready().await;
        poller.stop();
        assert!(!poller.is_running());

        let seen = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn dropping_poller_cancels_schedule() {
        let calls = Arc::new(AtomicUsize::new(0));
        let poller = Poller::start(
            counting_loader(calls.clone()),
            "/api/realtime",
            Duration::from_millis(20),
        )
        .expect("start poller");
        poller.ready().await;
        drop(poller);

        let seen = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn failed_tick_keeps_last_good_snapshot() {
        let calls = Arc::new(AtomicUsize::new(0));
        let loader: Loader<usize> = {
            let calls = calls.clone();
            Arc::new(move |_request: FetchRequest| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Box::pin(async move {
                    if n == 1 {
                        Ok(42)
                    } else {
                        Err(AppError::Http(503))
                    }
                })
            })
        };
        let poller = Poller::start(loader, "/api/realtime", Duration::from_millis(20))
            .expect("start poller");
        poller.ready().await;

        tokio::time::sleep(Duration::from_millis(90)).await;
        let state = poller.snapshot();
        assert_eq!(state.data, Some(42));
        assert!(state.consecutive_failures >= 1);
        assert!(poller.attempts() >= 2);
    }

    #[tokio::test]
    async fn zero_period_is_rejected_without_fetching() {
        let calls = Arc::new(AtomicUsize::new(0));
        let err = Poller::start(counting_loader(calls.clone()), "/api/realtime", Duration::ZERO)
            .err()
            .expect("zero period rejected");
        assert!(err.to_string().starts_with("BAD_REQUEST"));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failure_before_any_success_stops_loading_without_data() {
        let loader: Loader<usize> =
            Arc::new(|_request: FetchRequest| Box::pin(async { Err(AppError::Http(500)) }));
        let poller = Poller::start(loader, "/api/realtime", Duration::from_secs(60))
            .expect("start poller");

        let state = poller.ready().await;
        assert!(state.data.is_none());
        assert_eq!(state.consecutive_failures, 1);
    }
}
