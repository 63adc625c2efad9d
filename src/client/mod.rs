pub mod fetch;
pub mod http;
pub mod polling;
pub mod session;
pub mod storage;

use crate::config::DashboardConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{AnalyticsRecord, PerformanceMetric, RealtimeSnapshot, SalesRecord, Session};
use fetch::{http_loader, DataFetcher, DependencyKey};
use http::ApiClient;
use polling::Poller;
use serde::de::DeserializeOwned;
use session::{DemoDirectory, SessionStore};
use std::sync::Arc;
use std::time::Duration;
use storage::FileStorage;

pub const SALES_ENDPOINT: &str = "/api/sales";
pub const ANALYTICS_ENDPOINT: &str = "/api/analytics";
pub const METRICS_ENDPOINT: &str = "/api/metrics";
pub const REALTIME_ENDPOINT: &str = "/api/realtime";

/// Everything a view needs: the API transport and, inside an authenticated
/// shell, the session store.
#[derive(Clone)]
pub struct ViewContext {
    api: ApiClient,
    session: Option<Arc<SessionStore>>,
    realtime_interval: Duration,
}

impl ViewContext {
    pub fn new(api: ApiClient, session: Arc<SessionStore>, realtime_interval: Duration) -> Self {
        Self {
            api,
            session: Some(session),
            realtime_interval,
        }
    }

    pub fn without_session(api: ApiClient, realtime_interval: Duration) -> Self {
        Self {
            api,
            session: None,
            realtime_interval,
        }
    }

    /// Wires transport, the file-backed store under `<data_dir>/local-storage`
    /// and the demo directory from config.
    pub fn from_config(base_url: &str, config: &DashboardConfig) -> AppResult<Self> {
        let api = ApiClient::new(base_url, config.request_timeout());
        let storage = FileStorage::new(config.local_storage_dir())?;
        let store = SessionStore::open(
            Arc::new(storage),
            DemoDirectory::new(config.demo_accounts.clone()),
            config.login_delay(),
        );
        Ok(Self::new(api, Arc::new(store), config.realtime_interval()))
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn session(&self) -> AppResult<&Arc<SessionStore>> {
        self.session
            .as_ref()
            .ok_or_else(|| AppError::Internal("session store requested outside the authenticated shell".to_string()))
    }

    pub fn require_session(&self) -> AppResult<Session> {
        self.session()?
            .current_session()
            .ok_or_else(|| AppError::Unauthorized("sign in required".to_string()))
    }

    /// Mounted fetcher for any JSON endpoint.
    pub fn fetch<T>(&self, endpoint: &str, dependencies: DependencyKey) -> DataFetcher<T>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let fetcher = DataFetcher::new(http_loader(self.api.clone()), endpoint);
        fetcher.mount(dependencies);
        fetcher
    }

    pub fn sales_data(&self) -> DataFetcher<Vec<SalesRecord>> {
        self.fetch(SALES_ENDPOINT, DependencyKey::empty())
    }

    pub fn user_analytics(&self) -> DataFetcher<Vec<AnalyticsRecord>> {
        self.fetch(ANALYTICS_ENDPOINT, DependencyKey::empty())
    }

    pub fn performance_metrics(&self) -> DataFetcher<Vec<PerformanceMetric>> {
        self.fetch(METRICS_ENDPOINT, DependencyKey::empty())
    }

    pub fn realtime_metrics(&self) -> AppResult<Poller<RealtimeSnapshot>> {
        Poller::start(http_loader(self.api.clone()), REALTIME_ENDPOINT, self.realtime_interval)
    }
}
