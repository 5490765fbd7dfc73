// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_utility::{task, time};
use async_wsocket::Message;
use futures::{SinkExt, StreamExt};
use nostr::message::MachineReadablePrefix;
use nostr::prelude::*;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::{broadcast, oneshot, Mutex, MutexGuard};

use super::constants::{WAIT_FOR_OK_TIMEOUT, WEBSOCKET_TX_TIMEOUT};
use super::error::Error;
use super::notification::RelayNotification;
use super::options::RelayOptions;
use super::stats::RelayConnectionStats;
use super::status::{AtomicConnectionState, ConnectionState};
use super::subscription::{Subscription, SubscriptionActivity, SubscriptionClosedReason};
use crate::transport::{BoxSink, BoxStream, WebSocketTransport};

#[derive(Debug)]
struct JsonMessageItem {
    json: String,
    /// Session the message was queued for
    session: u64,
}

#[derive(Debug)]
enum IngesterCommand {
    Authenticate { challenge: String },
}

#[derive(Debug)]
struct RelayChannels {
    nostr: (Sender<JsonMessageItem>, Mutex<Receiver<JsonMessageItem>>),
}

impl RelayChannels {
    fn new(size: usize) -> Self {
        let (tx_nostr, rx_nostr) = mpsc::channel(size);

        Self {
            nostr: (tx_nostr, Mutex::new(rx_nostr)),
        }
    }

    fn send_client_msg(&self, msg: JsonMessageItem) -> Result<(), Error> {
        self.nostr
            .0
            .try_send(msg)
            .map_err(|_| Error::CantSendMessageToDispatcher)
    }

    async fn rx_nostr(&self) -> MutexGuard<'_, Receiver<JsonMessageItem>> {
        self.nostr.1.lock().await
    }
}

#[derive(Debug)]
struct SubscriptionData {
    filters: Vec<Filter>,
    /// Session in which the `REQ` was sent (`None` = pending)
    sent_in: Option<u64>,
    /// Closed by the relay with `auth-required`, waiting for authentication
    auth_required: bool,
    activity: mpsc::UnboundedSender<SubscriptionActivity>,
}

#[derive(Debug)]
struct AtomicPrivateData {
    state: AtomicConnectionState,
    channels: RelayChannels,
    subscriptions: StdMutex<HashMap<SubscriptionId, SubscriptionData>>,
    /// Current session number, bumped every time a session opens
    session: AtomicU64,
    shutdown: StdMutex<Option<oneshot::Sender<()>>>,
    connect_lock: Mutex<()>,
    signer: RwLock<Option<Arc<dyn NostrSigner>>>,
}

#[derive(Debug, Clone)]
pub(super) struct InnerRelayConnection {
    pub(super) url: RelayUrl,
    atomic: Arc<AtomicPrivateData>,
    pub(super) opts: RelayOptions,
    pub(super) stats: RelayConnectionStats,
    transport: Arc<dyn WebSocketTransport>,
    notification_sender: broadcast::Sender<RelayNotification>,
}

impl InnerRelayConnection {
    pub(super) fn new(
        url: RelayUrl,
        transport: Arc<dyn WebSocketTransport>,
        opts: RelayOptions,
    ) -> Self {
        let (notification_sender, ..) = broadcast::channel(opts.notification_channel_size);

        Self {
            url,
            atomic: Arc::new(AtomicPrivateData {
                state: AtomicConnectionState::default(),
                channels: RelayChannels::new(opts.message_queue_size),
                subscriptions: StdMutex::new(HashMap::new()),
                session: AtomicU64::new(0),
                shutdown: StdMutex::new(None),
                connect_lock: Mutex::new(()),
                signer: RwLock::new(None),
            }),
            opts,
            stats: RelayConnectionStats::default(),
            transport,
            notification_sender,
        }
    }

    #[inline]
    pub(super) fn state(&self) -> ConnectionState {
        self.atomic.state.load()
    }

    fn set_state(&self, state: ConnectionState) {
        let prev: ConnectionState = self.atomic.state.swap(state);

        if prev == state {
            return;
        }

        match state {
            ConnectionState::Connected => tracing::info!(url = %self.url, "Connected to relay."),
            ConnectionState::Error => {
                tracing::debug!(url = %self.url, prev = %prev, "Relay connection went down.")
            }
            ConnectionState::Disconnected => {
                tracing::info!(url = %self.url, "Disconnected from relay.")
            }
            ConnectionState::Connecting => {
                tracing::debug!(url = %self.url, "Connecting to relay.")
            }
        }

        self.send_notification(RelayNotification::State { state });
    }

    #[inline]
    fn current_session(&self) -> u64 {
        self.atomic.session.load(Ordering::SeqCst)
    }

    #[inline]
    pub(super) fn notifications(&self) -> broadcast::Receiver<RelayNotification> {
        self.notification_sender.subscribe()
    }

    fn send_notification(&self, notification: RelayNotification) {
        // An error only means that there are no listeners
        let _ = self.notification_sender.send(notification);
    }

    fn subscriptions(&self) -> StdMutexGuard<'_, HashMap<SubscriptionId, SubscriptionData>> {
        self.atomic
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn subscription_ids(&self) -> Vec<SubscriptionId> {
        self.subscriptions().keys().cloned().collect()
    }

    pub(super) fn set_signer(&self, signer: Option<Arc<dyn NostrSigner>>) {
        let mut current = self
            .atomic
            .signer
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *current = signer;
    }

    fn signer(&self) -> Option<Arc<dyn NostrSigner>> {
        self.atomic
            .signer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[inline]
    fn has_signer(&self) -> bool {
        self.signer().is_some()
    }

    fn set_shutdown(&self, sender: Option<oneshot::Sender<()>>) -> Option<oneshot::Sender<()>> {
        let mut shutdown = self
            .atomic
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *shutdown, sender)
    }

    /// Open a session
    ///
    /// Concurrent callers are serialized: who waited while another attempt ran returns
    /// without attempting again.
    pub(super) async fn connect(&self) {
        let attempts: usize = self.stats.attempts();

        let _guard = self.atomic.connect_lock.lock().await;

        if self.stats.attempts() != attempts || self.state().is_connected() {
            tracing::trace!(url = %self.url, "Connection attempt already concluded.");
            return;
        }

        // Wait for the previous session to release the message queue
        drop(self.atomic.channels.rx_nostr().await);

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        self.set_shutdown(Some(shutdown_tx));

        self.set_state(ConnectionState::Connecting);
        self.stats.new_attempt();

        let started: Instant = Instant::now();
        let timeout: Duration = self.opts.connection_timeout;

        let res = tokio::select! {
            res = time::timeout(Some(timeout), self.transport.connect(&self.url, &self.opts.connection_mode, timeout)) => {
                Some(res.unwrap_or_else(|| Err(crate::transport::TransportError::timeout())))
            }
            _ = &mut shutdown_rx => None,
        };

        match res {
            Some(Ok((mut ws_tx, ws_rx))) => {
                // `disconnect` may have run while the transport was completing
                if !matches!(shutdown_rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)) {
                    tracing::debug!(url = %self.url, "Connection attempt aborted.");
                    let _ = close_ws(&mut ws_tx).await;
                    return;
                }

                self.stats.new_success(started.elapsed());

                let session: u64 = self.atomic.session.fetch_add(1, Ordering::SeqCst) + 1;

                self.set_state(ConnectionState::Connected);

                // Queue the pending REQs before the session starts draining the queue
                self.send_pending_subscriptions();

                let relay = self.clone();
                task::spawn(relay.run_session(ws_tx, ws_rx, shutdown_rx, session));
            }
            Some(Err(e)) => {
                tracing::warn!(url = %self.url, error = %e, "Connection failed.");

                self.set_shutdown(None);
                self.set_state(ConnectionState::Error);
                self.close_subscriptions(SubscriptionClosedReason::ConnectionFailed);
            }
            None => {
                tracing::debug!(url = %self.url, "Connection attempt aborted.");
            }
        }
    }

    async fn run_session(
        self,
        mut ws_tx: BoxSink,
        ws_rx: BoxStream,
        shutdown_rx: oneshot::Receiver<()>,
        session: u64,
    ) {
        let mut rx_nostr = self.atomic.channels.rx_nostr().await;

        let (ingester_tx, ingester_rx) = mpsc::unbounded_channel();

        let requested: bool = tokio::select! {
            res = self.sender_message_handler(&mut ws_tx, &mut rx_nostr, session) => {
                if let Err(e) = res {
                    tracing::error!(url = %self.url, error = %e, "Relay sender exited with error.");
                }
                false
            }
            res = self.receiver_message_handler(ws_rx, ingester_tx) => {
                match res {
                    Ok(()) => tracing::debug!(url = %self.url, "Relay closed the connection."),
                    Err(e) => tracing::error!(url = %self.url, error = %e, "Relay receiver exited with error."),
                }
                false
            }
            res = self.ingester(ingester_rx) => {
                if let Err(e) = res {
                    tracing::error!(url = %self.url, error = %e, "Relay ingester exited with error.");
                }
                false
            }
            _ = shutdown_rx => true,
        };

        match close_ws(&mut ws_tx).await {
            Ok(()) => tracing::debug!(url = %self.url, "WebSocket connection closed."),
            Err(e) => tracing::debug!(url = %self.url, error = %e, "Can't close WebSocket connection."),
        }

        // A newer session may be running: leave it alone
        if self.current_session() == session {
            if requested {
                // Subscriptions were already closed by `disconnect`
                self.set_state(ConnectionState::Disconnected);
            } else {
                self.set_shutdown(None);
                self.set_state(ConnectionState::Error);
                self.close_subscriptions(SubscriptionClosedReason::Disconnected);
            }
        }

        drop(rx_nostr);
    }

    async fn sender_message_handler(
        &self,
        ws_tx: &mut BoxSink,
        rx_nostr: &mut MutexGuard<'_, Receiver<JsonMessageItem>>,
        session: u64,
    ) -> Result<(), Error> {
        while let Some(JsonMessageItem { json, session: queued_for }) = rx_nostr.recv().await {
            // Queued for a previous session
            if queued_for != session {
                tracing::trace!(url = %self.url, msg = %json, "Dropping stale message.");
                continue;
            }

            let size: usize = json.len();

            tracing::debug!("Sending '{json}' to '{}' (size: {size} bytes)", self.url);

            send_ws_msg(ws_tx, Message::Text(json)).await?;

            self.stats.add_bytes_sent(size);
        }

        Ok(())
    }

    async fn receiver_message_handler(
        &self,
        mut ws_rx: BoxStream,
        ingester_tx: mpsc::UnboundedSender<IngesterCommand>,
    ) -> Result<(), Error> {
        while let Some(msg) = ws_rx.next().await {
            match msg? {
                Message::Text(json) => self.handle_relay_message(&json, &ingester_tx),
                Message::Binary(_) => {
                    tracing::warn!(url = %self.url, "Binary messages aren't supported.");
                }
                Message::Close(None) => break,
                Message::Close(Some(frame)) => {
                    tracing::info!(url = %self.url, code = %frame.code, reason = %frame.reason, "Connection closed by peer.");
                    break;
                }
                _ => {}
            }
        }

        Ok(())
    }

    async fn ingester(
        &self,
        mut rx: mpsc::UnboundedReceiver<IngesterCommand>,
    ) -> Result<(), Error> {
        while let Some(command) = rx.recv().await {
            match command {
                IngesterCommand::Authenticate { challenge } => match self.auth(challenge).await {
                    Ok(()) => {
                        tracing::info!(url = %self.url, "Authenticated to relay.");

                        self.send_notification(RelayNotification::Authenticated);

                        // Resend the subscriptions the relay refused before authentication
                        self.send_pending_subscriptions();
                    }
                    Err(e) => {
                        tracing::error!(url = %self.url, error = %e, "Can't authenticate to relay.");

                        self.send_notification(RelayNotification::AuthenticationFailed);

                        self.close_auth_required_subscriptions(e.to_string());
                    }
                },
            }
        }

        Ok(())
    }

    fn handle_relay_message(
        &self,
        msg: &str,
        ingester_tx: &mpsc::UnboundedSender<IngesterCommand>,
    ) {
        match self.handle_raw_relay_message(msg) {
            Ok(Some(message)) => {
                match &message {
                    RelayMessage::EndOfStoredEvents(id) => {
                        self.deliver(id, SubscriptionActivity::EndOfStoredEvents);
                    }
                    RelayMessage::Closed {
                        subscription_id,
                        message,
                    } => self.handle_closed(subscription_id, message),
                    RelayMessage::Auth { challenge } => {
                        if self.has_signer() {
                            let _ = ingester_tx.send(IngesterCommand::Authenticate {
                                challenge: challenge.to_string(),
                            });
                        } else {
                            tracing::debug!(url = %self.url, "Received AUTH challenge but no signer is installed.");
                        }
                    }
                    RelayMessage::Notice(notice) => {
                        tracing::warn!(url = %self.url, notice = %notice, "Received notice.");
                    }
                    _ => (),
                }

                self.send_notification(RelayNotification::Message { message });
            }
            Ok(None) => (),
            Err(e) => tracing::error!(
                url = %self.url,
                msg = %msg,
                error = %e,
                "Impossible to handle relay message."
            ),
        }
    }

    fn handle_raw_relay_message(&self, msg: &str) -> Result<Option<RelayMessage<'static>>, Error> {
        let msg: &str = msg.trim();

        let size: usize = msg.len();

        tracing::debug!("Received '{msg}' from '{}' (size: {size} bytes)", self.url);

        self.stats.add_bytes_received(size);

        if let Some(max_size) = self.opts.max_message_size {
            if size > max_size {
                return Err(Error::RelayMessageTooLarge { size, max_size });
            }
        }

        match RelayMessage::from_json(msg)? {
            RelayMessage::Event {
                subscription_id,
                event,
            } => {
                let subscription_id: SubscriptionId = subscription_id.into_owned();
                let event: Event = event.into_owned();

                self.deliver(
                    &subscription_id,
                    SubscriptionActivity::Event(Box::new(event.clone())),
                );

                self.send_notification(RelayNotification::Event {
                    subscription_id,
                    event: Box::new(event),
                });

                Ok(None)
            }
            m => Ok(Some(m)),
        }
    }

    /// Route an activity to its subscription
    ///
    /// If the handle was dropped the subscription is removed and `CLOSE` is sent.
    fn deliver(&self, id: &SubscriptionId, activity: SubscriptionActivity) {
        let mut subscriptions = self.subscriptions();

        let receiver_dropped: bool = match subscriptions.get(id) {
            Some(data) => data.activity.send(activity).is_err(),
            None => {
                tracing::trace!(url = %self.url, id = %id, "Activity for unknown subscription.");
                false
            }
        };

        if receiver_dropped {
            subscriptions.remove(id);
            drop(subscriptions);

            tracing::debug!(url = %self.url, id = %id, "Subscription handle dropped, closing.");

            if let Err(e) = self.send_close(id) {
                tracing::debug!(url = %self.url, id = %id, error = %e, "Can't send CLOSE.");
            }
        }
    }

    fn handle_closed(&self, id: &SubscriptionId, message: &str) {
        let mut subscriptions = self.subscriptions();

        if let Some(MachineReadablePrefix::AuthRequired) = MachineReadablePrefix::parse(message) {
            if self.has_signer() {
                if let Some(data) = subscriptions.get_mut(id) {
                    tracing::debug!(url = %self.url, id = %id, "Subscription waiting for authentication.");
                    data.sent_in = None;
                    data.auth_required = true;
                    return;
                }
            }
        }

        if let Some(data) = subscriptions.remove(id) {
            tracing::debug!(url = %self.url, id = %id, message = %message, "Subscription closed by relay.");

            let _ = data
                .activity
                .send(SubscriptionActivity::Closed(SubscriptionClosedReason::Closed(
                    message.to_string(),
                )));
        }
    }

    fn close_auth_required_subscriptions(&self, reason: String) {
        let mut subscriptions = self.subscriptions();
        subscriptions.retain(|_, data| {
            if data.auth_required {
                let _ = data
                    .activity
                    .send(SubscriptionActivity::Closed(SubscriptionClosedReason::Closed(
                        reason.clone(),
                    )));
                false
            } else {
                true
            }
        });
    }

    /// End every subscription with `reason`
    pub(super) fn close_subscriptions(&self, reason: SubscriptionClosedReason) {
        let mut subscriptions = self.subscriptions();

        for (id, data) in subscriptions.drain() {
            tracing::trace!(url = %self.url, id = %id, reason = %reason, "Closing subscription.");
            let _ = data
                .activity
                .send(SubscriptionActivity::Closed(reason.clone()));
        }
    }

    fn send_msg(&self, msg: ClientMessage<'_>) -> Result<(), Error> {
        if !self.state().is_connected() {
            return Err(Error::NotConnected);
        }

        self.atomic.channels.send_client_msg(JsonMessageItem {
            json: msg.as_json(),
            session: self.current_session(),
        })
    }

    fn send_req(&self, id: &SubscriptionId, filters: &[Filter]) -> Result<(), Error> {
        self.send_msg(ClientMessage::Req {
            subscription_id: Cow::Borrowed(id),
            filters: filters.iter().map(Cow::Borrowed).collect(),
        })
    }

    #[inline]
    fn send_close(&self, id: &SubscriptionId) -> Result<(), Error> {
        self.send_msg(ClientMessage::Close(Cow::Borrowed(id)))
    }

    /// Send `REQ` for the subscriptions not yet sent in the current session
    fn send_pending_subscriptions(&self) {
        let session: u64 = self.current_session();

        let mut subscriptions = self.subscriptions();

        for (id, data) in subscriptions.iter_mut() {
            if data.sent_in == Some(session) {
                continue;
            }

            match self.send_req(id, &data.filters) {
                Ok(()) => {
                    data.sent_in = Some(session);
                    data.auth_required = false;
                }
                Err(e) => {
                    tracing::warn!(url = %self.url, id = %id, error = %e, "Can't send REQ.")
                }
            }
        }
    }

    pub(super) fn subscribe(
        &self,
        id: SubscriptionId,
        filters: Vec<Filter>,
    ) -> Result<Subscription, Error> {
        if filters.is_empty() {
            return Err(Error::EmptyFilters);
        }

        let (tx, rx) = mpsc::unbounded_channel();

        let mut data = SubscriptionData {
            filters,
            sent_in: None,
            auth_required: false,
            activity: tx,
        };

        let mut subscriptions = self.subscriptions();

        // Sent now if connected, otherwise when the next session opens
        if self.state().is_connected() {
            self.send_req(&id, &data.filters)?;
            data.sent_in = Some(self.current_session());
        }

        tracing::debug!(url = %self.url, id = %id, pending = data.sent_in.is_none(), "Subscription registered.");

        // Replacing an existing subscription drops its sender: the old handle sees the end
        subscriptions.insert(id.clone(), data);

        Ok(Subscription::new(id, self.url.clone(), rx))
    }

    pub(super) fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        let removed: Option<SubscriptionData> = self.subscriptions().remove(id);

        match removed {
            Some(data) => {
                if data.sent_in == Some(self.current_session()) {
                    if let Err(e) = self.send_close(id) {
                        tracing::debug!(url = %self.url, id = %id, error = %e, "Can't send CLOSE.");
                    }
                }
                true
            }
            None => false,
        }
    }

    /// Abort the connection attempt or close the running session
    pub(super) fn disconnect(&self) {
        if let Some(shutdown) = self.set_shutdown(None) {
            let _ = shutdown.send(());
        }

        if self.state() != ConnectionState::Disconnected {
            self.set_state(ConnectionState::Disconnected);
        }

        self.close_subscriptions(SubscriptionClosedReason::Disconnected);
    }

    async fn auth(&self, challenge: String) -> Result<(), Error> {
        let signer: Arc<dyn NostrSigner> = self.signer().ok_or(Error::SignerNotConfigured)?;

        let event: Event = EventBuilder::auth(challenge, self.url.clone())
            .sign(&signer)
            .await
            .map_err(|e| Error::Signer(e.to_string()))?;

        // Subscribe before sending, to not miss the OK
        let mut notifications = self.notification_sender.subscribe();

        self.send_msg(ClientMessage::Auth(Cow::Borrowed(&event)))?;

        let (status, message) = self
            .wait_for_ok(&mut notifications, &event.id, WAIT_FOR_OK_TIMEOUT)
            .await?;

        if status {
            Ok(())
        } else {
            Err(Error::RelayMessage(message))
        }
    }

    async fn wait_for_ok(
        &self,
        notifications: &mut broadcast::Receiver<RelayNotification>,
        id: &EventId,
        timeout: Duration,
    ) -> Result<(bool, String), Error> {
        time::timeout(Some(timeout), async {
            while let Ok(notification) = notifications.recv().await {
                match notification {
                    RelayNotification::Message {
                        message:
                            RelayMessage::Ok {
                                event_id,
                                status,
                                message,
                            },
                    } => {
                        if id == &event_id {
                            return Ok((status, message.into_owned()));
                        }
                    }
                    RelayNotification::State { state } => {
                        if state.is_down() {
                            return Err(Error::NotConnected);
                        }
                    }
                    _ => (),
                }
            }

            Err(Error::PrematureExit)
        })
        .await
        .ok_or(Error::Timeout)?
    }
}

async fn send_ws_msg(tx: &mut BoxSink, msg: Message) -> Result<(), Error> {
    match time::timeout(Some(WEBSOCKET_TX_TIMEOUT), tx.send(msg)).await {
        Some(res) => Ok(res?),
        None => Err(Error::Timeout),
    }
}

async fn close_ws(tx: &mut BoxSink) -> Result<(), Error> {
    match time::timeout(Some(WEBSOCKET_TX_TIMEOUT), tx.close()).await {
        Some(res) => Ok(res?),
        None => Err(Error::Timeout),
    }
}
