use crate::client::storage::LocalStorage;
use crate::config::DemoAccount;
use crate::errors::AppResult;
use crate::models::Session;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub const SESSION_STORAGE_KEY: &str = "dataflow_user";

/// What views observe: the session plus the two loading flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub session: Option<Session>,
    pub is_initializing: bool,
    pub is_authenticating: bool,
}

impl SessionView {
    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }
}

/// Credential table keyed by the exact configured email.
#[derive(Debug, Clone)]
pub struct DemoDirectory {
    accounts: HashMap<String, DemoAccount>,
}

impl DemoDirectory {
    pub fn new(accounts: impl IntoIterator<Item = DemoAccount>) -> Self {
        let accounts = accounts
            .into_iter()
            .map(|account| (account.email.clone(), account))
            .collect();
        Self { accounts }
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn verify(&self, email: &str, password: &str) -> Option<&DemoAccount> {
        let account = self.accounts.get(email)?;
        let expected = blake3::Hash::from_hex(account.password_hash.as_bytes()).ok()?;
        // blake3::Hash equality is constant time.
        if expected == blake3::hash(password.as_bytes()) {
            Some(account)
        } else {
            None
        }
    }
}

impl Default for DemoDirectory {
    fn default() -> Self {
        Self::new(crate::config::DashboardConfig::default().demo_accounts)
    }
}

pub struct SessionStore {
    storage: Arc<dyn LocalStorage>,
    directory: DemoDirectory,
    login_delay: Duration,
    state: watch::Sender<SessionView>,
    epoch: AtomicU64,
    pending_logins: AtomicUsize,
    restored: AtomicBool,
}

struct PendingLoginGuard<'a> {
    store: &'a SessionStore,
}

impl<'a> PendingLoginGuard<'a> {
    fn new(store: &'a SessionStore) -> Self {
        store.pending_logins.fetch_add(1, Ordering::SeqCst);
        store.publish_authenticating();
        Self { store }
    }
}

impl Drop for PendingLoginGuard<'_> {
    fn drop(&mut self) {
        self.store.pending_logins.fetch_sub(1, Ordering::SeqCst);
        self.store.publish_authenticating();
    }
}

impl SessionStore {
    pub fn new(storage: Arc<dyn LocalStorage>, directory: DemoDirectory, login_delay: Duration) -> Self {
        let (state, _) = watch::channel(SessionView {
            session: None,
            is_initializing: true,
            is_authenticating: false,
        });
        Self {
            storage,
            directory,
            login_delay,
            state,
            epoch: AtomicU64::new(0),
            pending_logins: AtomicUsize::new(0),
            restored: AtomicBool::new(false),
        }
    }

    /// Builds the store and immediately restores any persisted session.
    pub fn open(storage: Arc<dyn LocalStorage>, directory: DemoDirectory, login_delay: Duration) -> Self {
        let store = Self::new(storage, directory, login_delay);
        store.restore_on_startup();
        store
    }

    pub fn snapshot(&self) -> SessionView {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.state.subscribe()
    }

    pub fn current_session(&self) -> Option<Session> {
        self.state.borrow().session.clone()
    }

    /// Reads the persisted session once. A corrupt entry is dropped and
    /// treated as signed out.
    pub fn restore_on_startup(&self) {
        if self.restored.swap(true, Ordering::SeqCst) {
            return;
        }

        let restored = match self.storage.get_item(SESSION_STORAGE_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Session>(&raw) {
                Ok(session) => Some(session),
                Err(error) => {
                    tracing::warn!(error = %error, "discarding unreadable saved session");
                    if let Err(error) = self.storage.remove_item(SESSION_STORAGE_KEY) {
                        tracing::warn!(error = %error, "failed to remove unreadable saved session");
                    }
                    None
                }
            },
            Ok(None) => None,
            Err(error) => {
                tracing::warn!(error = %error, "failed to read saved session");
                None
            }
        };

        self.state.send_modify(|view| {
            if view.session.is_none() {
                view.session = restored;
            }
            view.is_initializing = false;
        });
    }

    pub async fn login(&self, email: &str, password: &str) -> AppResult<bool> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let _pending = PendingLoginGuard::new(self);

        tokio::time::sleep(self.login_delay).await;

        let Some(account) = self.directory.verify(email, password) else {
            tracing::info!(email = %email, "demo login rejected");
            return Ok(false);
        };

        if self.epoch.load(Ordering::SeqCst) != epoch {
            tracing::info!(email = %account.email, "login discarded after concurrent logout");
            return Ok(false);
        }

        let session = Session {
            email: account.email.clone(),
            name: account.name.clone(),
            role: account.role.clone(),
            login_time: Utc::now(),
        };
        self.storage
            .set_item(SESSION_STORAGE_KEY, &serde_json::to_string(&session)?)?;
        tracing::info!(email = %session.email, role = %session.role, "demo login succeeded");
        self.state.send_modify(|view| view.session = Some(session));
        Ok(true)
    }

    pub fn logout(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.state.send_modify(|view| view.session = None);
        if let Err(error) = self.storage.remove_item(SESSION_STORAGE_KEY) {
            tracing::warn!(error = %error, "failed to remove saved session");
        }
    }

    fn publish_authenticating(&self) {
        let busy = self.pending_logins.load(Ordering::SeqCst) > 0;
        self.state.send_if_modified(|view| {
            if view.is_authenticating == busy {
                return false;
            }
            view.is_authenticating = busy;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::{DemoDirectory, SessionStore, SESSION_STORAGE_KEY};
    use crate::client::storage::{FileStorage, LocalStorage, MemoryStorage};
    use crate::config::DemoAccount;
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;

    fn store_with(storage: Arc<dyn LocalStorage>, delay_ms: u64) -> SessionStore {
        SessionStore::open(storage, DemoDirectory::default(), Duration::from_millis(delay_ms))
    }

    #[tokio::test]
    async fn valid_login_persists_and_restores_in_fresh_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage: Arc<dyn LocalStorage> = Arc::new(FileStorage::new(dir.path()).expect("storage"));
        let store = store_with(storage, 0);

        let before = Utc::now();
        let ok = store.login("admin@dataflow.com", "admin123").await.expect("login");
        let after = Utc::now();
        assert!(ok);

        let session = store.current_session().expect("session set");
        assert_eq!(session.role, "Administrator");
        assert!(session.login_time >= before && session.login_time <= after);

        let reopened_storage: Arc<dyn LocalStorage> =
            Arc::new(FileStorage::new(dir.path()).expect("storage"));
        let fresh = store_with(reopened_storage, 0);
        let view = fresh.snapshot();
        assert!(!view.is_initializing);
        assert_eq!(view.session, Some(session));
    }

    #[tokio::test]
    async fn invalid_login_leaves_absent_session_absent() {
        let store = store_with(Arc::new(MemoryStorage::new()), 0);
        assert!(!store.login("admin@dataflow.com", "wrong").await.expect("login"));
        assert!(!store.login("nobody@dataflow.com", "admin123").await.expect("login"));
        assert!(store.current_session().is_none());
    }

    #[tokio::test]
    async fn email_must_match_exactly() {
        let store = store_with(Arc::new(MemoryStorage::new()), 0);
        assert!(!store.login("ADMIN@dataflow.com", "admin123").await.expect("login"));
        assert!(!store.login("  admin@dataflow.com ", "admin123").await.expect("login"));
        assert!(store.current_session().is_none());
        assert!(store.login("admin@dataflow.com", "admin123").await.expect("login"));
    }

    #[tokio::test]
    async fn invalid_login_keeps_existing_session() {
        let store = store_with(Arc::new(MemoryStorage::new()), 0);
        assert!(store.login("demo@dataflow.com", "password123").await.expect("login"));
        assert!(!store.login("admin@dataflow.com", "nope").await.expect("login"));
        assert_eq!(
            store.current_session().map(|session| session.email),
            Some("demo@dataflow.com".to_string())
        );
    }

    #[tokio::test]
    async fn logout_clears_session_and_storage_and_is_idempotent() {
        let storage = Arc::new(MemoryStorage::new());
        let store = store_with(storage.clone(), 0);
        store.logout();
        assert!(store.current_session().is_none());

        assert!(store.login("user@dataflow.com", "user123").await.expect("login"));
        store.logout();
        store.logout();
        assert!(store.current_session().is_none());
        assert_eq!(storage.get_item(SESSION_STORAGE_KEY).expect("get"), None);
    }

    #[test]
    fn corrupt_saved_session_is_discarded() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set_item(SESSION_STORAGE_KEY, "{not json")
            .expect("seed corrupt entry");
        let store = store_with(storage.clone(), 0);

        let view = store.snapshot();
        assert!(view.session.is_none());
        assert!(!view.is_initializing);
        assert_eq!(storage.get_item(SESSION_STORAGE_KEY).expect("get"), None);
    }

    #[test]
    fn initializing_flag_flips_once() {
        let store = SessionStore::new(
            Arc::new(MemoryStorage::new()),
            DemoDirectory::default(),
            Duration::ZERO,
        );
        let mut receiver = store.subscribe();
        assert!(store.snapshot().is_initializing);

        store.restore_on_startup();
        assert!(receiver.has_changed().expect("sender alive"));
        receiver.borrow_and_update();
        store.restore_on_startup();
        assert!(!receiver.has_changed().expect("sender alive"));
        assert!(!store.snapshot().is_initializing);
    }

    #[tokio::test]
    async fn logout_during_login_delay_wins() {
        let store = Arc::new(store_with(Arc::new(MemoryStorage::new()), 200));
        let login = tokio::spawn({
            let store = store.clone();
            async move { store.login("manager@dataflow.com", "manager123").await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.snapshot().is_authenticating);
        store.logout();

        let ok = login.await.expect("join").expect("login");
        assert!(!ok);
        let view = store.snapshot();
        assert!(view.session.is_none());
        assert!(!view.is_authenticating);
    }

    #[test]
    fn directory_accepts_injected_accounts() {
        let directory = DemoDirectory::new(vec![DemoAccount::with_password(
            "ops@dataflow.com",
            "s3cret",
            "Ops",
            "Operator",
        )]);
        assert_eq!(directory.len(), 1);
        assert!(directory.verify("ops@dataflow.com", "s3cret").is_some());
        assert!(directory.verify("ops@dataflow.com", "S3cret").is_none());
        assert!(DemoDirectory::default().verify("ops@dataflow.com", "s3cret").is_none());
    }
}
