use crate::client::http::ApiClient;
use crate::errors::{AppError, AppResult};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const FALLBACK_ERROR_MESSAGE: &str = "An error occurred";

pub type LoaderFuture<T> = Pin<Box<dyn Future<Output = AppResult<T>> + Send>>;
pub type Loader<T> = Arc<dyn Fn(FetchRequest) -> LoaderFuture<T> + Send + Sync>;

/// Values whose change should trigger a new fetch. Compared element-wise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DependencyKey(Vec<String>);

impl DependencyKey {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(values.into_iter().map(Into::into).collect())
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn values(&self) -> &[String] {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub endpoint: String,
    pub dependencies: DependencyKey,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchState<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub error: Option<String>,
}

impl<T> FetchState<T> {
    fn initial() -> Self {
        Self {
            data: None,
            loading: true,
            error: None,
        }
    }
}

pub fn http_loader<T>(client: ApiClient) -> Loader<T>
where
    T: DeserializeOwned + Send + 'static,
{
    Arc::new(move |request: FetchRequest| {
        let client = client.clone();
        Box::pin(async move { client.get_json::<T>(&request.endpoint).await })
    })
}

/// One endpoint's request/response lifecycle. At most one request is live;
/// a response from a superseded cycle is dropped, never published.
pub struct DataFetcher<T> {
    loader: Loader<T>,
    endpoint: String,
    timeout: Option<Duration>,
    state: Arc<watch::Sender<FetchState<T>>>,
    generation: Arc<AtomicU64>,
    dependencies: Mutex<Option<DependencyKey>>,
    in_flight: Mutex<Option<JoinHandle<()>>>,
}

impl<T> DataFetcher<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(loader: Loader<T>, endpoint: impl Into<String>) -> Self {
        let (state, _) = watch::channel(FetchState::initial());
        Self {
            loader,
            endpoint: endpoint.into(),
            timeout: None,
            state: Arc::new(state),
            generation: Arc::new(AtomicU64::new(0)),
            dependencies: Mutex::new(None),
            in_flight: Mutex::new(None),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Starts the first cycle. Must be called inside a tokio runtime.
    pub fn mount(&self, dependencies: DependencyKey) {
        *self.lock_dependencies() = Some(dependencies.clone());
        self.start_cycle(dependencies);
    }

    /// Returns whether a new cycle was started.
    pub fn set_dependencies(&self, dependencies: DependencyKey) -> bool {
        {
            let mut current = self.lock_dependencies();
            if current.as_ref() == Some(&dependencies) {
                return false;
            }
            *current = Some(dependencies.clone());
        }
        self.start_cycle(dependencies);
        true
    }

    pub fn refetch(&self) {
        let dependencies = self.lock_dependencies().clone().unwrap_or_default();
        self.start_cycle(dependencies);
    }

    pub fn state(&self) -> FetchState<T> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FetchState<T>> {
        self.state.subscribe()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Waits for the latest cycle to finish and returns the resulting state.
    /// Before `mount` there is no cycle, so the current state is returned as is.
    pub async fn settled(&self) -> FetchState<T> {
        if self.generation() == 0 {
            return self.state();
        }
        let mut receiver = self.state.subscribe();
        let settled = match receiver.wait_for(|state| !state.loading).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        };
        settled
    }

    fn start_cycle(&self, dependencies: DependencyKey) {
        let mut generation = 0;
        self.state.send_modify(|state| {
            generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            state.loading = true;
            state.error = None;
        });

        let request = FetchRequest {
            endpoint: self.endpoint.clone(),
            dependencies,
            generation,
        };
        let pending = (self.loader)(request);
        let timeout = self.timeout;
        let state = self.state.clone();
        let latest = self.generation.clone();
        let endpoint = self.endpoint.clone();

        let handle = tokio::spawn(async move {
            let outcome = match timeout {
                Some(limit) => match tokio::time::timeout(limit, pending).await {
                    Ok(result) => result,
                    Err(_) => Err(AppError::Timeout(limit.as_millis() as u64)),
                },
                None => pending.await,
            };

            let published = state.send_if_modified(|current| {
                if latest.load(Ordering::SeqCst) != generation {
                    return false;
                }
                match outcome {
                    Ok(data) => {
                        current.data = Some(data);
                        current.error = None;
                    }
                    Err(error) => {
                        tracing::warn!(endpoint = %endpoint, error = %error, "fetch failed");
                        current.data = None;
                        current.error = Some(error_message(&error));
                    }
                }
                current.loading = false;
                true
            });

            if !published {
                tracing::debug!(endpoint = %endpoint, generation, "dropped stale response");
            }
        });

        let previous = self.lock_in_flight().replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn lock_dependencies(&self) -> std::sync::MutexGuard<'_, Option<DependencyKey>> {
        self.dependencies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> Drop for DataFetcher<T> {
    fn drop(&mut self) {
        let handle = match self.in_flight.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

fn error_message(error: &AppError) -> String {
    let message = error.to_string();
    if message.trim().is_empty() {
        FALLBACK_ERROR_MESSAGE.to_string()
    } else {
        message
    }
}
