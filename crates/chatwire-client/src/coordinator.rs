//! SessionCoordinator: ties the store, history loader, live channel and
//! message stream into one chat session.
//!
//! Startup (`restore`):
//! 1. Load the persisted identity.
//! 2. If there is one, the session is started right away; history fetch and
//!    channel resume then run concurrently, and dedup in the stream makes
//!    their completion order irrelevant.
//! 3. If there is none, nothing happens until `start_new`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use chatwire_core::bus::{EventBus, SessionEvent};
use chatwire_core::config::{Config, ConnectionConfig, ReconnectConfig};
use chatwire_core::session::{FileSessionStore, SessionStore};
use chatwire_core::{
    utils, ChatError, ChatMessage, ConnectionState, CustomerInfo, Identity, Result,
};

use crate::backoff::Backoff;
use crate::connection::ConnectionManager;
use crate::history::{HistoryLoader, HttpHistoryLoader};
use crate::stream::MessageStream;
use crate::transport::LiveTransport;
use crate::websocket::SocketIoTransport;

pub struct SessionCoordinator {
    store: Arc<dyn SessionStore>,
    history: Arc<dyn HistoryLoader>,
    connection: Arc<ConnectionManager>,
    stream: Arc<MessageStream>,
    bus: Arc<EventBus>,
    reconnect: ReconnectConfig,
    started: AtomicBool,
    history_task: Mutex<Option<JoinHandle<()>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl SessionCoordinator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        history: Arc<dyn HistoryLoader>,
        transport: Arc<dyn LiveTransport>,
        bus: Arc<EventBus>,
        config: ConnectionConfig,
    ) -> Self {
        let stream = Arc::new(MessageStream::new(bus.clone()));
        let reconnect = config.reconnect.clone();
        let connection = Arc::new(ConnectionManager::new(
            transport,
            stream.clone(),
            bus.clone(),
            config,
        ));

        SessionCoordinator {
            store,
            history,
            connection,
            stream,
            bus,
            reconnect,
            started: AtomicBool::new(false),
            history_task: Mutex::new(None),
            supervisor: Mutex::new(None),
        }
    }

    /// Wire up the production stack: file store, HTTP history, Socket.IO channel.
    pub fn from_config(config: &Config, bus: Arc<EventBus>) -> Result<Self> {
        let store_path = utils::resolve_session_path(config.session.store_path.as_deref());
        let store = Arc::new(FileSessionStore::new(Some(store_path)));
        let history = Arc::new(HttpHistoryLoader::new(
            &config.server,
            Duration::from_secs(config.history.timeout_secs),
        )?);
        let transport = Arc::new(SocketIoTransport::new(&config.server.url)?);

        Ok(Self::new(
            store,
            history,
            transport,
            bus,
            config.connection.clone(),
        ))
    }

    // ─────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────

    /// Restore a persisted session, if any.
    ///
    /// Returns the restored identity. A channel that fails to open is
    /// reported on the bus; the session still counts as started.
    pub async fn restore(&self) -> Result<Option<Identity>> {
        let Some(identity) = self.store.load() else {
            debug!("no persisted session");
            return Ok(None);
        };

        self.mark_started(&identity);
        self.spawn_history(identity.clone()).await;
        self.spawn_supervisor().await;

        if let Err(e) = self.connection.start(Some(identity.clone())).await {
            warn!(error = %e, "live channel failed to open on restore");
        }
        Ok(Some(identity))
    }

    /// Open a brand-new conversation and persist its identity.
    pub async fn start_new(&self, info: &CustomerInfo) -> Result<Identity> {
        if self.is_started() {
            return Err(ChatError::AlreadyStarted);
        }

        let identity = self.connection.start_new(info).await?;

        if let Err(e) = self.store.save(&identity) {
            error!(error = %e, "failed to persist session, continuing in memory");
        }
        self.mark_started(&identity);
        self.spawn_supervisor().await;
        Ok(identity)
    }

    pub async fn send_message(&self, text: &str) -> Result<()> {
        self.connection.send_message(text).await
    }

    /// Manually reopen the live channel.
    pub async fn reconnect(&self) -> Result<()> {
        self.connection.reconnect().await
    }

    /// Forget the session everywhere: channel, store, memory, log.
    pub async fn reset(&self) -> Result<()> {
        self.abort_history().await;
        self.connection.stop().await;
        self.connection.forget_identity().await;
        let cleared = self.store.clear();
        self.stream.clear().await;
        self.started.store(false, Ordering::SeqCst);
        info!("chat session reset");
        cleared
    }

    /// Tear everything down. Results arriving afterwards are discarded.
    pub async fn shutdown(&self) {
        self.abort_history().await;
        self.stream.close().await;
        if let Some(handle) = self.supervisor.lock().await.take() {
            handle.abort();
        }
        self.connection.stop().await;
        debug!("session coordinator shut down");
    }

    /// Wait for an in-flight history fetch to finish merging.
    pub async fn wait_for_history(&self) {
        let handle = self.history_task.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    // ─────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub async fn identity(&self) -> Option<Identity> {
        self.connection.identity().await
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.stream.snapshot().await
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    // ─────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────

    fn mark_started(&self, identity: &Identity) {
        self.started.store(true, Ordering::SeqCst);
        info!(conversation = %identity.conversation_id, "chat session started");
        self.bus.publish(SessionEvent::Started(identity.clone()));
    }

    async fn spawn_history(&self, identity: Identity) {
        let history = self.history.clone();
        let stream = self.stream.clone();
        let bus = self.bus.clone();

        let handle = tokio::spawn(async move {
            let fetched = history
                .fetch_history(&identity.conversation_id, &identity.access_token)
                .await;
            match fetched {
                Ok(items) => {
                    if stream.seed(items).await.is_none() {
                        debug!("history arrived after teardown, ignored");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "history unavailable, continuing with live channel only");
                    bus.publish(SessionEvent::HistoryFailed(e.to_string()));
                }
            }
        });

        if let Some(old) = self.history_task.lock().await.replace(handle) {
            old.abort();
        }
    }

    async fn abort_history(&self) {
        if let Some(handle) = self.history_task.lock().await.take() {
            handle.abort();
        }
    }

    async fn spawn_supervisor(&self) {
        if !self.reconnect.enabled {
            return;
        }
        let mut slot = self.supervisor.lock().await;
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        debug!(
            initial_delay_ms = self.reconnect.initial_delay_ms,
            max_attempts = self.reconnect.max_attempts,
            "reconnect supervisor enabled"
        );
        *slot = Some(tokio::spawn(supervise(
            self.connection.clone(),
            Backoff::new(&self.reconnect),
        )));
    }
}

/// Reopen the channel whenever it errors, backing off between attempts.
///
/// The backoff restarts once a reconnect gets a channel open, so only
/// consecutive failed attempts count towards `max_attempts`.
async fn supervise(connection: Arc<ConnectionManager>, mut backoff: Backoff) {
    let mut states = connection.subscribe();
    let mut seen_opens = connection.opened_count();

    loop {
        if states
            .wait_for(|s| *s == ConnectionState::Errored)
            .await
            .is_err()
        {
            return;
        }

        let opens = connection.opened_count();
        if opens != seen_opens {
            seen_opens = opens;
            backoff.reset();
        }

        let Some(delay) = backoff.next_delay() else {
            error!(
                attempts = backoff.attempts(),
                "giving up on reconnecting the live channel"
            );
            return;
        };

        warn!(
            attempt = backoff.attempts(),
            delay_ms = delay.as_millis() as u64,
            "live channel errored, reconnecting"
        );
        tokio::time::sleep(delay).await;

        if let Err(e) = connection.reconnect().await {
            warn!(error = %e, "reconnect attempt failed");
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use chatwire_core::session::MemorySessionStore;
    use chatwire_core::MessageId;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use crate::connection::{EVENT_MESSAGE_NEW, EVENT_RESUME, EVENT_START};
    use crate::transport::mock::{AckReply, MockTransport};
    use crate::transport::TransportEvent;

    struct FakeHistory {
        items: Vec<ChatMessage>,
        delay: Duration,
        fail: bool,
        calls: AtomicUsize,
    }

    impl FakeHistory {
        fn with(items: Vec<ChatMessage>) -> Self {
            FakeHistory {
                items,
                delay: Duration::ZERO,
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            FakeHistory {
                fail: true,
                ..Self::with(vec![])
            }
        }

        fn slow(items: Vec<ChatMessage>, delay: Duration) -> Self {
            FakeHistory {
                delay,
                ..Self::with(items)
            }
        }
    }

    #[async_trait]
    impl HistoryLoader for FakeHistory {
        async fn fetch_history(
            &self,
            conversation_id: &str,
            access_token: &str,
        ) -> Result<Vec<ChatMessage>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(conversation_id, "conv-1");
            assert_eq!(access_token, "tok-1");
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(ChatError::HistoryFetch("HTTP 500".into()));
            }
            Ok(self.items.clone())
        }
    }

    /// Store whose writes always fail.
    struct ReadOnlyStore;

    impl SessionStore for ReadOnlyStore {
        fn load(&self) -> Option<Identity> {
            None
        }

        fn save(&self, _identity: &Identity) -> Result<()> {
            Err(ChatError::store(
                "/readonly/session.json",
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            ))
        }

        fn clear(&self) -> Result<()> {
            Ok(())
        }
    }

    fn ana() -> Identity {
        Identity::new("conv-1", "tok-1", "Ana")
    }

    fn first_message() -> ChatMessage {
        ChatMessage::customer("hi", Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()).with_id(1)
    }

    fn live(msg: &ChatMessage) -> TransportEvent {
        TransportEvent::Event {
            name: EVENT_MESSAGE_NEW.to_string(),
            data: serde_json::to_value(msg).unwrap(),
        }
    }

    fn test_config() -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout_secs: 1,
            ack_timeout_secs: 1,
            ..Default::default()
        }
    }

    fn coordinator(
        store: Arc<dyn SessionStore>,
        history: Arc<dyn HistoryLoader>,
        transport: Arc<MockTransport>,
        config: ConnectionConfig,
    ) -> SessionCoordinator {
        SessionCoordinator::new(store, history, transport, Arc::new(EventBus::new(256)), config)
    }

    async fn wait_for_state(coord: &SessionCoordinator, want: ConnectionState) {
        let mut rx = coord.subscribe_state();
        tokio::time::timeout(Duration::from_secs(3), rx.wait_for(|s| *s == want))
            .await
            .expect("state not reached")
            .unwrap();
    }

    async fn wait_for_len(coord: &SessionCoordinator, len: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while coord.messages().await.len() < len {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("log did not grow");
    }

    #[tokio::test]
    async fn test_resume_with_history_and_live_echo() {
        let transport = Arc::new(MockTransport::new());
        let coord = coordinator(
            Arc::new(MemorySessionStore::with_identity(ana())),
            Arc::new(FakeHistory::with(vec![first_message()])),
            transport.clone(),
            test_config(),
        );

        let restored = coord.restore().await.unwrap();
        assert_eq!(restored, Some(ana()));
        assert!(coord.is_started());

        coord.wait_for_history().await;
        wait_for_state(&coord, ConnectionState::Resuming).await;
        assert_eq!(transport.emitted_names(), [EVENT_RESUME]);

        // The server redelivers the message that history already holds.
        transport.push(live(&first_message())).await;
        wait_for_state(&coord, ConnectionState::Connected).await;

        let messages = coord.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, Some(MessageId::Number(1)));
    }

    #[tokio::test]
    async fn test_live_before_history_has_no_duplicates() {
        let transport = Arc::new(MockTransport::new());
        let history = Arc::new(FakeHistory::slow(
            vec![first_message()],
            Duration::from_millis(200),
        ));
        let coord = coordinator(
            Arc::new(MemorySessionStore::with_identity(ana())),
            history.clone(),
            transport.clone(),
            test_config(),
        );

        coord.restore().await.unwrap();
        wait_for_state(&coord, ConnectionState::Resuming).await;
        transport.push(live(&first_message())).await;
        wait_for_len(&coord, 1).await;

        coord.wait_for_history().await;
        assert_eq!(coord.messages().await.len(), 1);
        assert_eq!(history.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_restore_publishes_started() {
        let coord = coordinator(
            Arc::new(MemorySessionStore::with_identity(ana())),
            Arc::new(FakeHistory::with(vec![])),
            Arc::new(MockTransport::new()),
            test_config(),
        );
        coord.restore().await.unwrap();

        let events = coord.bus().drain().await;
        assert_eq!(events.first(), Some(&SessionEvent::Started(ana())));
    }

    #[tokio::test]
    async fn test_no_identity_waits_for_start_new() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let transport = Arc::new(MockTransport::new());
        transport.reply_with(AckReply::Reply(json!({
            "conversationId": "conv-1",
            "customerToken": "tok-1",
        })));
        let coord = coordinator(
            Arc::new(FileSessionStore::new(Some(path.clone()))),
            Arc::new(FakeHistory::with(vec![])),
            transport.clone(),
            test_config(),
        );

        assert_eq!(coord.restore().await.unwrap(), None);
        assert!(!coord.is_started());
        assert_eq!(transport.open_count(), 0);
        assert!(matches!(
            coord.send_message("hello").await.unwrap_err(),
            ChatError::NotStarted
        ));

        let info = CustomerInfo::new("Ana", "0901234567", "hi");
        let identity = coord.start_new(&info).await.unwrap();
        assert_eq!(identity, ana());
        assert!(coord.is_started());
        assert_eq!(transport.emitted_names(), [EVENT_START]);
        // The opening message only appears once the server echoes it.
        assert!(coord.messages().await.is_empty());

        let reopened = FileSessionStore::new(Some(path));
        assert_eq!(reopened.load(), Some(ana()));
    }

    #[tokio::test]
    async fn test_start_new_when_started_is_rejected() {
        let coord = coordinator(
            Arc::new(MemorySessionStore::with_identity(ana())),
            Arc::new(FakeHistory::with(vec![])),
            Arc::new(MockTransport::new()),
            test_config(),
        );
        coord.restore().await.unwrap();

        let info = CustomerInfo::new("Ana", "0901234567", "hi");
        let err = coord.start_new(&info).await.unwrap_err();
        assert!(matches!(err, ChatError::AlreadyStarted));
    }

    #[tokio::test]
    async fn test_failed_start_leaves_session_unstarted() {
        let store = Arc::new(MemorySessionStore::new());
        let transport = Arc::new(MockTransport::new());
        transport.reply_with(AckReply::Reply(json!({"customerToken": "tok-1"})));
        let coord = coordinator(
            store.clone(),
            Arc::new(FakeHistory::with(vec![])),
            transport,
            test_config(),
        );

        let info = CustomerInfo::new("Ana", "0901234567", "hi");
        assert!(coord.start_new(&info).await.is_err());
        assert!(!coord.is_started());
        assert!(coord.identity().await.is_none());
        assert!(store.load().is_none());
    }

    #[tokio::test]
    async fn test_save_failure_keeps_session() {
        let transport = Arc::new(MockTransport::new());
        transport.reply_with(AckReply::Reply(json!({
            "conversationId": "conv-1",
            "customerToken": "tok-1",
        })));
        let coord = coordinator(
            Arc::new(ReadOnlyStore),
            Arc::new(FakeHistory::with(vec![])),
            transport,
            test_config(),
        );

        let info = CustomerInfo::new("Ana", "0901234567", "hi");
        coord.start_new(&info).await.unwrap();
        assert!(coord.is_started());
        coord.send_message("còn đó không?").await.unwrap();
    }

    #[tokio::test]
    async fn test_history_failure_is_tolerated() {
        let transport = Arc::new(MockTransport::new());
        let coord = coordinator(
            Arc::new(MemorySessionStore::with_identity(ana())),
            Arc::new(FakeHistory::failing()),
            transport.clone(),
            test_config(),
        );

        coord.restore().await.unwrap();
        coord.wait_for_history().await;
        assert!(coord.is_started());
        assert!(coord.messages().await.is_empty());

        wait_for_state(&coord, ConnectionState::Resuming).await;
        transport.push(live(&first_message())).await;
        wait_for_len(&coord, 1).await;

        let events = coord.bus().drain().await;
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::HistoryFailed(reason) if reason.contains("500"))));
    }

    #[tokio::test]
    async fn test_history_after_shutdown_is_ignored() {
        let coord = coordinator(
            Arc::new(MemorySessionStore::with_identity(ana())),
            Arc::new(FakeHistory::slow(
                vec![first_message()],
                Duration::from_millis(200),
            )),
            Arc::new(MockTransport::new()),
            test_config(),
        );

        coord.restore().await.unwrap();
        coord.shutdown().await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(coord.messages().await.is_empty());
        assert_eq!(coord.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_reset_forgets_everything() {
        let store = Arc::new(MemorySessionStore::with_identity(ana()));
        let coord = coordinator(
            store.clone(),
            Arc::new(FakeHistory::with(vec![first_message()])),
            Arc::new(MockTransport::new()),
            test_config(),
        );

        coord.restore().await.unwrap();
        coord.wait_for_history().await;
        assert_eq!(coord.messages().await.len(), 1);

        coord.reset().await.unwrap();
        assert!(!coord.is_started());
        assert!(coord.identity().await.is_none());
        assert!(coord.messages().await.is_empty());
        assert!(store.load().is_none());
        assert_eq!(coord.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_supervisor_reconnects_after_error() {
        let transport = Arc::new(MockTransport::new());
        let mut config = test_config();
        config.reconnect = ReconnectConfig {
            enabled: true,
            initial_delay_ms: 10,
            max_delay_ms: 50,
            max_attempts: 3,
        };
        let coord = coordinator(
            Arc::new(MemorySessionStore::with_identity(ana())),
            Arc::new(FakeHistory::with(vec![])),
            transport.clone(),
            config,
        );

        coord.restore().await.unwrap();
        wait_for_state(&coord, ConnectionState::Resuming).await;

        transport.push(TransportEvent::Error("ping timeout".into())).await;

        tokio::time::timeout(Duration::from_secs(3), async {
            while transport.open_count() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("supervisor did not reconnect");

        wait_for_state(&coord, ConnectionState::Resuming).await;
        assert_eq!(transport.emitted_names(), [EVENT_RESUME, EVENT_RESUME]);
        coord.shutdown().await;
    }

    #[tokio::test]
    async fn test_supervisor_keeps_reconnecting_after_successful_reopens() {
        let transport = Arc::new(MockTransport::new());
        let mut config = test_config();
        config.reconnect = ReconnectConfig {
            enabled: true,
            initial_delay_ms: 10,
            max_delay_ms: 50,
            max_attempts: 2,
        };
        let coord = coordinator(
            Arc::new(MemorySessionStore::with_identity(ana())),
            Arc::new(FakeHistory::with(vec![])),
            transport.clone(),
            config,
        );

        coord.restore().await.unwrap();
        wait_for_state(&coord, ConnectionState::Resuming).await;

        // More drops than max_attempts, each followed by a quiet but
        // successful resume. None of them should exhaust the backoff.
        for round in 1..=3 {
            transport.push(TransportEvent::Error("ping timeout".into())).await;

            tokio::time::timeout(Duration::from_secs(3), async {
                while transport.open_count() < round + 1 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("supervisor stopped reconnecting");

            wait_for_state(&coord, ConnectionState::Resuming).await;
        }

        assert_eq!(transport.open_count(), 4);
        coord.shutdown().await;
    }

    #[tokio::test]
    async fn test_supervisor_gives_up_after_consecutive_failures() {
        let transport = Arc::new(MockTransport::new());
        let mut config = test_config();
        config.reconnect = ReconnectConfig {
            enabled: true,
            initial_delay_ms: 10,
            max_delay_ms: 20,
            max_attempts: 2,
        };
        let coord = coordinator(
            Arc::new(MemorySessionStore::with_identity(ana())),
            Arc::new(FakeHistory::with(vec![])),
            transport.clone(),
            config,
        );

        coord.restore().await.unwrap();
        wait_for_state(&coord, ConnectionState::Resuming).await;

        // Every reopen errors before the channel comes up.
        transport.set_auto_open(false);
        transport.push(TransportEvent::Error("ping timeout".into())).await;
        for _ in 0..2 {
            let seen = transport.open_count();
            tokio::time::timeout(Duration::from_secs(3), async {
                while transport.open_count() == seen {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("supervisor did not retry");
            transport.push(TransportEvent::Error("refused".into())).await;
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(transport.open_count(), 3);
        assert_eq!(coord.connection_state(), ConnectionState::Errored);
        coord.shutdown().await;
    }

    #[tokio::test]
    async fn test_no_supervisor_by_default() {
        let transport = Arc::new(MockTransport::new());
        let coord = coordinator(
            Arc::new(MemorySessionStore::with_identity(ana())),
            Arc::new(FakeHistory::with(vec![])),
            transport.clone(),
            test_config(),
        );

        coord.restore().await.unwrap();
        wait_for_state(&coord, ConnectionState::Resuming).await;
        transport.push(TransportEvent::Error("ping timeout".into())).await;
        wait_for_state(&coord, ConnectionState::Errored).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.open_count(), 1);
        assert_eq!(coord.connection_state(), ConnectionState::Errored);
    }
}
