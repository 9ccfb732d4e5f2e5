//! The service worker: lifecycle state machine plus event handlers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use swcache_net::{Fetcher, Request};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::classify::{RequestClassifier, RouteCategory};
use crate::config::WorkerConfig;
use crate::control::{ClientMessage, ClientRegistry, ControlChannel, ControlMessage, ControlReply};
use crate::fallback::FallbackResolver;
use crate::lifecycle::{ActivateReport, CacheLifecycleManager, InstallReport};
use crate::notify::{click_opens_window, NotificationRequest};
use crate::store::{CacheStore, PartitionRole, PartitionSet, RequestKey, VersionTag};
use crate::strategy::{Handled, StrategyExecutor, StrategyTable};
use crate::{ServiceWorkerState, WorkerError};

/// Events delivered to the host.
#[derive(Debug)]
pub enum WorkerEvent {
    /// State changed.
    StateChange {
        version: VersionTag,
        new_state: ServiceWorkerState,
    },
    /// Open sessions were taken over at activation.
    ClientsClaimed { version: VersionTag, count: usize },
    /// The host should display a notification.
    ShowNotification(NotificationRequest),
    /// A window was opened in response to a notification click. The host
    /// delivers `messages` to it.
    OpenWindow {
        client_id: String,
        url: Url,
        messages: mpsc::UnboundedReceiver<ClientMessage>,
    },
}

/// What the host should do with an intercepted request.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Answer with this response.
    Respond(Handled),
    /// Let the request go to the network untouched.
    PassThrough,
}

impl FetchOutcome {
    pub fn is_pass_through(&self) -> bool {
        matches!(self, FetchOutcome::PassThrough)
    }

    pub fn into_handled(self) -> Option<Handled> {
        match self {
            FetchOutcome::Respond(handled) => Some(handled),
            FetchOutcome::PassThrough => None,
        }
    }
}

/// One version of the caching worker.
pub struct ServiceWorker {
    config: WorkerConfig,
    classifier: RequestClassifier,
    executor: StrategyExecutor,
    lifecycle: CacheLifecycleManager,
    control: ControlChannel,
    clients: Arc<ClientRegistry>,

    state: RwLock<ServiceWorkerState>,
    /// Serializes install and activate.
    transition: Mutex<()>,
    skip_waiting: AtomicBool,

    event_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl ServiceWorker {
    /// Create a worker for a validated configuration.
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        clients: Arc<ClientRegistry>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<WorkerEvent>), WorkerError> {
        config.validate()?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let partitions = PartitionSet::new(&config.partitions, &config.version);
        let fallback_key = |value: &Option<String>| {
            value
                .as_deref()
                .and_then(|v| config.resolve(v))
                .map(|url| RequestKey::get(&url))
        };
        let fallback = FallbackResolver::new(
            Arc::clone(&store),
            partitions.get(PartitionRole::Static).clone(),
            fallback_key(&config.offline_document),
            fallback_key(&config.fallback_image),
        );
        let executor = StrategyExecutor::new(
            Arc::clone(&store),
            Arc::clone(&fetcher),
            partitions.clone(),
            StrategyTable::new(config.strategy_overrides.clone()),
            fallback,
        );
        let lifecycle = CacheLifecycleManager::new(
            store,
            fetcher,
            partitions,
            Arc::clone(&clients),
            config.origin.clone(),
            config.precache_policy,
        );

        let worker = Self {
            classifier: RequestClassifier::from_config(&config),
            executor,
            lifecycle,
            control: ControlChannel::new(Arc::clone(&clients), config.version.clone()),
            clients,
            state: RwLock::new(ServiceWorkerState::Parsed),
            transition: Mutex::new(()),
            skip_waiting: AtomicBool::new(false),
            event_tx,
            config,
        };
        Ok((worker, event_rx))
    }

    pub fn version(&self) -> &VersionTag {
        &self.config.version
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    pub async fn state(&self) -> ServiceWorkerState {
        *self.state.read().await
    }

    async fn set_state(&self, new_state: ServiceWorkerState) {
        *self.state.write().await = new_state;
        debug!(version = %self.config.version, state = ?new_state, "State changed");
        let _ = self.event_tx.send(WorkerEvent::StateChange {
            version: self.config.version.clone(),
            new_state,
        });
    }

    // ==================== Lifecycle ====================

    /// Run the install event. On success the worker is `Installed`, or
    /// `Activated` when skip-waiting was requested or configured.
    pub async fn install(&self) -> Result<InstallReport, WorkerError> {
        let transition = self.transition.lock().await;
        let current = self.state().await;
        if current != ServiceWorkerState::Parsed {
            return Err(WorkerError::StateError(format!(
                "cannot install from {current:?}"
            )));
        }

        self.set_state(ServiceWorkerState::Installing).await;
        let report = match self.lifecycle.on_install(&self.config.manifest).await {
            Ok(report) => report,
            Err(e) => {
                warn!(version = %self.config.version, error = %e, "Install failed");
                self.set_state(ServiceWorkerState::Redundant).await;
                return Err(e.into());
            }
        };
        self.set_state(ServiceWorkerState::Installed).await;

        let activate_now =
            self.config.skip_waiting_on_install || self.skip_waiting.load(Ordering::SeqCst);
        drop(transition);

        if activate_now {
            self.activate().await?;
        }
        Ok(report)
    }

    /// Run the activate event. Returns `None` when this version is already
    /// active.
    pub async fn activate(&self) -> Result<Option<ActivateReport>, WorkerError> {
        let _transition = self.transition.lock().await;
        match self.state().await {
            ServiceWorkerState::Installed => {}
            ServiceWorkerState::Activating | ServiceWorkerState::Activated => return Ok(None),
            other => {
                return Err(WorkerError::StateError(format!(
                    "cannot activate from {other:?}"
                )))
            }
        }

        self.set_state(ServiceWorkerState::Activating).await;
        let report = self.lifecycle.on_activate().await;
        self.set_state(ServiceWorkerState::Activated).await;

        info!(
            version = %self.config.version,
            deleted = report.deleted.len(),
            claimed = report.claimed,
            "Activated"
        );
        let _ = self.event_tx.send(WorkerEvent::ClientsClaimed {
            version: self.config.version.clone(),
            count: report.claimed,
        });
        Ok(Some(report))
    }

    /// Activate without waiting. While install is still running, activation
    /// follows its completion.
    pub async fn skip_waiting(&self) -> Result<Option<ActivateReport>, WorkerError> {
        self.skip_waiting.store(true, Ordering::SeqCst);
        match self.state().await {
            ServiceWorkerState::Installed => self.activate().await,
            state => {
                debug!(?state, "Skip waiting recorded");
                Ok(None)
            }
        }
    }

    /// The previous version no longer controls any client; a waiting worker
    /// may activate.
    pub async fn clients_released(&self) -> Result<Option<ActivateReport>, WorkerError> {
        match self.state().await {
            ServiceWorkerState::Installed => self.activate().await,
            _ => Ok(None),
        }
    }

    // ==================== Fetch ====================

    /// Handle an intercepted request.
    ///
    /// Requests are only answered while `Activated`. Non-GET, non-http(s)
    /// and cross-origin requests always pass through.
    pub async fn handle_fetch(&self, request: &Request) -> FetchOutcome {
        if !self.state().await.can_intercept_fetch() {
            return FetchOutcome::PassThrough;
        }
        if !RequestClassifier::is_interceptable(request) {
            return FetchOutcome::PassThrough;
        }

        match self.classifier.classify(request) {
            RouteCategory::CrossOrigin => {
                debug!(url = %request.url, "Cross-origin request passes through");
                FetchOutcome::PassThrough
            }
            category => FetchOutcome::Respond(self.executor.execute(request, category).await),
        }
    }

    // ==================== Messages ====================

    /// Handle a control message. The reply channel, if any, is acknowledged
    /// exactly once whatever the message was.
    pub async fn handle_message(
        &self,
        payload: &serde_json::Value,
        reply: Option<oneshot::Sender<ControlReply>>,
    ) {
        match ControlChannel::parse(payload) {
            ControlMessage::SkipWaiting => {
                if let Err(e) = self.skip_waiting().await {
                    warn!(error = %e, "Skip waiting failed");
                }
            }
            ControlMessage::SyncNow => {
                let delivered = self.control.broadcast_sync().await;
                debug!(delivered, "Broadcast SYNC_NOW");
            }
            ControlMessage::Unknown => debug!(%payload, "Unrecognized message"),
        }
        self.control.acknowledge(reply);
    }

    /// Handle a push message by asking the host to show a notification.
    pub fn handle_push(&self, payload: Option<&str>) -> NotificationRequest {
        let notification = NotificationRequest::from_push(&self.config.notification, payload);
        debug!(title = %notification.title, "Push received");
        let _ = self
            .event_tx
            .send(WorkerEvent::ShowNotification(notification.clone()));
        notification
    }

    /// Handle a notification click. Returns the URL of the window opened, if
    /// any.
    pub async fn handle_notification_click(&self, action: Option<&str>) -> Option<Url> {
        if !click_opens_window(action) {
            debug!(?action, "Notification dismissed");
            return None;
        }

        let Some(url) = self.config.resolve(&self.config.notification.open_url) else {
            warn!(url = %self.config.notification.open_url, "Notification target is not a valid URL");
            return None;
        };
        let (client_id, messages) = self.clients.open_window(url.clone()).await;
        let _ = self.event_tx.send(WorkerEvent::OpenWindow {
            client_id,
            url: url.clone(),
            messages,
        });
        Some(url)
    }

    /// Handle a background sync event. Nothing is synchronized; returns
    /// whether the tag is one this worker knows.
    pub fn handle_sync(&self, tag: &str) -> bool {
        let known = self.config.sync_tags.iter().any(|t| t == tag);
        if known {
            info!(tag, "Background sync requested");
        } else {
            debug!(tag, "Ignoring unknown sync tag");
        }
        known
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::AssetManifest;
    use crate::store::MemoryCacheStore;
    use crate::testing::StubFetcher;
    use crate::lifecycle::PrecachePolicy;
    use crate::InstallError;
    use serde_json::json;

    fn config() -> WorkerConfig {
        WorkerConfig {
            manifest: AssetManifest::new(&["./", "./offline.html"], &[]),
            ..WorkerConfig::new(Url::parse("https://app.test/").unwrap())
        }
    }

    fn fetcher() -> Arc<StubFetcher> {
        let fetcher = Arc::new(StubFetcher::new());
        fetcher.respond("/", 200, "root");
        fetcher.respond("/offline.html", 200, "offline");
        fetcher
    }

    fn worker(
        config: WorkerConfig,
        fetcher: Arc<StubFetcher>,
    ) -> (ServiceWorker, mpsc::UnboundedReceiver<WorkerEvent>) {
        ServiceWorker::new(
            config,
            Arc::new(MemoryCacheStore::new()),
            fetcher,
            Arc::new(ClientRegistry::new()),
        )
        .unwrap()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<WorkerEvent>) -> Vec<WorkerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_rejects_invalid_config() {
        let bad = WorkerConfig {
            version: VersionTag::new(""),
            ..config()
        };
        let result = ServiceWorker::new(
            bad,
            Arc::new(MemoryCacheStore::new()),
            fetcher(),
            Arc::new(ClientRegistry::new()),
        );
        assert!(matches!(result, Err(WorkerError::Config(_))));
    }

    #[tokio::test]
    async fn test_install_then_activate() {
        let (sw, mut rx) = worker(config(), fetcher());
        assert_eq!(sw.state().await, ServiceWorkerState::Parsed);

        let report = sw.install().await.unwrap();
        assert_eq!(report.stored, 2);
        assert_eq!(sw.state().await, ServiceWorkerState::Activated);

        let states: Vec<ServiceWorkerState> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                WorkerEvent::StateChange { new_state, .. } => Some(new_state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                ServiceWorkerState::Installing,
                ServiceWorkerState::Installed,
                ServiceWorkerState::Activating,
                ServiceWorkerState::Activated,
            ]
        );
    }

    #[tokio::test]
    async fn test_install_twice_is_a_state_error() {
        let (sw, _rx) = worker(config(), fetcher());
        sw.install().await.unwrap();
        assert!(matches!(sw.install().await, Err(WorkerError::StateError(_))));
    }

    #[tokio::test]
    async fn test_waits_without_skip_waiting() {
        let config = WorkerConfig {
            skip_waiting_on_install: false,
            ..config()
        };
        let (sw, _rx) = worker(config, fetcher());
        sw.install().await.unwrap();
        assert_eq!(sw.state().await, ServiceWorkerState::Installed);

        let request = Request::navigate(Url::parse("https://app.test/").unwrap());
        assert!(sw.handle_fetch(&request).await.is_pass_through());

        assert!(sw.clients_released().await.unwrap().is_some());
        assert_eq!(sw.state().await, ServiceWorkerState::Activated);
        assert!(sw.clients_released().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_skip_waiting_message_activates_and_replies() {
        let config = WorkerConfig {
            skip_waiting_on_install: false,
            ..config()
        };
        let (sw, _rx) = worker(config, fetcher());
        sw.install().await.unwrap();

        let (tx, reply) = oneshot::channel();
        sw.handle_message(&json!({"type": "SKIP_WAITING"}), Some(tx)).await;
        assert_eq!(sw.state().await, ServiceWorkerState::Activated);
        let reply = reply.await.unwrap();
        assert_eq!(reply.status, "OK");
        assert_eq!(&reply.version, sw.version());
    }

    #[tokio::test]
    async fn test_strict_install_failure_makes_worker_redundant() {
        let config = WorkerConfig {
            precache_policy: PrecachePolicy::Strict,
            manifest: AssetManifest::new(&["./", "./missing.js"], &[]),
            ..config()
        };
        let (sw, _rx) = worker(config, fetcher());
        let result = sw.install().await;
        assert!(matches!(
            result,
            Err(WorkerError::Install(InstallError::RequiredEntriesFailed { .. }))
        ));
        assert_eq!(sw.state().await, ServiceWorkerState::Redundant);
        assert!(matches!(sw.activate().await, Err(WorkerError::StateError(_))));
    }

    #[tokio::test]
    async fn test_unknown_message_still_acknowledged() {
        let (sw, _rx) = worker(config(), fetcher());
        let (tx, reply) = oneshot::channel();
        sw.handle_message(&json!({"type": "PING"}), Some(tx)).await;
        assert_eq!(reply.await.unwrap().status, "OK");
        assert_eq!(sw.state().await, ServiceWorkerState::Parsed);
    }

    #[tokio::test]
    async fn test_sync_now_broadcasts() {
        let (sw, _rx) = worker(config(), fetcher());
        let (_id, mut messages) = sw.clients().connect(Url::parse("https://app.test/").unwrap()).await;
        sw.handle_message(&json!({"type": "SYNC_NOW"}), None).await;
        assert!(matches!(
            messages.recv().await,
            Some(ClientMessage::SyncNow { .. })
        ));
    }

    #[tokio::test]
    async fn test_push_and_notification_click() {
        let (sw, mut rx) = worker(config(), fetcher());

        let notification = sw.handle_push(Some("New results"));
        assert_eq!(notification.body, "New results");
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [WorkerEvent::ShowNotification(n)] if n.body == "New results"
        ));

        assert!(sw.handle_notification_click(Some("close")).await.is_none());
        assert!(sw.clients().is_empty().await);

        let opened = sw.handle_notification_click(Some("explore")).await.unwrap();
        assert_eq!(opened.as_str(), "https://app.test/");
        assert_eq!(sw.clients().len().await, 1);
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [WorkerEvent::OpenWindow { url, .. }] if url.as_str() == "https://app.test/"
        ));
    }

    #[test]
    fn test_sync_tags() {
        let (sw, _rx) = worker(config(), fetcher());
        assert!(sw.handle_sync("sync-races"));
        assert!(!sw.handle_sync("sync-other"));
    }
}
