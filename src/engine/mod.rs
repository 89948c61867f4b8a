//! STOMP protocol engine.
//!
//! Owns one broker session: connection state, the subscription table, the
//! event store, and the background receive thread.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──CONNECTED──► Connected
//!      ▲                          │ (open/send/reply fails)   │
//!      └──────────────────────────┘                           │
//!      ▲                                                      │
//!      ├──── receive loop read failure ───────────────────────┤
//!      │                                                      │
//!      └──── Disconnecting ◄──────────── disconnect() ────────┘
//! ```
//!
//! # Threads and locks
//!
//! The caller thread issues requests; one `stomp-receiver` thread reads
//! frames and folds MESSAGE bodies into the [`EventStore`]. Shared state:
//!
//! - session (status + username): checked before every request;
//! - subscription table: held across "write frame, update table";
//! - writer half of the transport: only the caller thread writes;
//! - event store: its own lock, see [`crate::store`];
//! - receipt / subscription-id counters: atomics.
//!
//! Lock order is subscriptions → writer. The receive thread never takes
//! either of them.
//!
//! Public operations log failures and report them as `bool`; nothing
//! panics or propagates an error across the session boundary.

// Rust guideline compliant 2026-02

mod receiver;

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::config::Config;
use crate::event::{Event, EventBatch};
use crate::frame::{self, command, Frame};
use crate::store::{EventStore, TOPIC_PREFIX};
use crate::subscriptions::SubscriptionTable;
use crate::summary::Summary;
use crate::transport::{FrameReader, FrameWriter, Transport};

/// Connection state of an [`Engine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No session.
    Disconnected,
    /// CONNECT sent, waiting for the reply.
    Connecting,
    /// Session established.
    Connected,
    /// DISCONNECT in progress.
    Disconnecting,
}

#[derive(Debug)]
struct Session {
    status: ConnectionStatus,
    username: String,
}

/// State shared between the caller and the receive thread.
struct Shared {
    config: Config,
    transport: Box<dyn Transport>,
    session: Mutex<Session>,
    writer: Mutex<Option<Box<dyn FrameWriter>>>,
    subscriptions: Mutex<SubscriptionTable>,
    store: EventStore,
    /// Outstanding receipt ids and what they acknowledge.
    receipts: Mutex<HashMap<u64, String>>,
    receipt_counter: AtomicU64,
    subscription_counter: AtomicU64,
    stop: AtomicBool,
    /// Receipt id of the in-flight DISCONNECT, 0 when none.
    disconnect_receipt: AtomicU64,
}

/// Running receive thread.
struct ReceiverHandle {
    join: JoinHandle<()>,
    /// Signalled (or dropped) when the thread leaves its loop.
    done: mpsc::Receiver<()>,
}

/// Client-side STOMP session engine.
pub struct Engine {
    shared: Arc<Shared>,
    receiver: Mutex<Option<ReceiverHandle>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("status", &self.status())
            .field("subscriptions", &self.shared.lock_subscriptions().len())
            .field("stored_events", &self.shared.store.len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create a disconnected engine that will reach the broker through
    /// `transport`.
    pub fn new(config: Config, transport: impl Transport + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                transport: Box::new(transport),
                session: Mutex::new(Session {
                    status: ConnectionStatus::Disconnected,
                    username: String::new(),
                }),
                writer: Mutex::new(None),
                subscriptions: Mutex::new(SubscriptionTable::new()),
                store: EventStore::new(),
                receipts: Mutex::new(HashMap::new()),
                receipt_counter: AtomicU64::new(0),
                subscription_counter: AtomicU64::new(0),
                stop: AtomicBool::new(false),
                disconnect_receipt: AtomicU64::new(0),
            }),
            receiver: Mutex::new(None),
        }
    }

    // ── Connection lifecycle ────────────────────────────────────────────────

    /// Log in to the broker and start the receive thread.
    ///
    /// Only valid while disconnected. Opens the transport, sends CONNECT and
    /// waits for one reply; anything but CONNECTED leaves the engine
    /// disconnected. No retry is attempted.
    pub fn connect(&self, username: &str, password: &str) -> bool {
        {
            let mut session = self.shared.lock_session();
            if session.status != ConnectionStatus::Disconnected {
                log::error!("[engine] Client already logged in. Log out before trying again.");
                return false;
            }
            session.status = ConnectionStatus::Connecting;
        }

        // A lost connection leaves its finished receive thread and writer behind.
        self.reap_receiver();
        self.shared.reset_session_state();

        // The session lock is not held across the handshake; `Connecting`
        // already turns away concurrent requests.
        let reader = match self.shared.open_session(username, password) {
            Ok(reader) => reader,
            Err(e) => {
                log::error!("[engine] Could not connect as {username}: {e:#}");
                self.shared.end_session();
                return false;
            }
        };

        self.shared.stop.store(false, Ordering::SeqCst);
        {
            let mut session = self.shared.lock_session();
            session.status = ConnectionStatus::Connected;
            session.username = username.to_string();
        }

        match receiver::spawn(Arc::clone(&self.shared), reader) {
            Ok(handle) => {
                *self.lock_receiver() = Some(handle);
            }
            Err(e) => {
                log::error!("[engine] Could not start receive thread: {e}");
                self.shared.close_writer();
                self.shared.end_session();
                return false;
            }
        }

        log::info!("[engine] User {username} connected to server.");
        true
    }

    /// End the session.
    ///
    /// Sends DISCONNECT (best effort), waits up to the configured timeout for
    /// the broker's receipt, closes the transport, joins the receive thread
    /// and clears subscriptions. A no-op when not connected.
    pub fn disconnect(&self) -> bool {
        {
            let mut session = self.shared.lock_session();
            if session.status != ConnectionStatus::Connected {
                log::info!("[engine] No active session to disconnect. Ignoring request.");
                return false;
            }
            session.status = ConnectionStatus::Disconnecting;
        }

        let receipt = self.shared.next_receipt("disconnect");
        self.shared.disconnect_receipt.store(receipt, Ordering::SeqCst);
        self.shared.stop.store(true, Ordering::SeqCst);

        let sent = self.shared.write(&frame::encode_disconnect(receipt));
        if let Err(e) = &sent {
            log::error!("[engine] Failed to send DISCONNECT frame: {e:#}");
            self.shared.disconnect_receipt.store(0, Ordering::SeqCst);
        }

        let handle = self.lock_receiver().take();
        if let Some(handle) = handle {
            if sent.is_ok() {
                let timeout = self.shared.config.disconnect_timeout();
                if let Err(RecvTimeoutError::Timeout) = handle.done.recv_timeout(timeout) {
                    log::warn!("[engine] No DISCONNECT receipt within {timeout:?}; closing anyway");
                }
            }
            // Closing unblocks a receive thread still parked in read.
            self.shared.close_writer();
            if handle.join.join().is_err() {
                log::error!("[engine] Receive thread panicked");
            }
        }

        self.shared.reset_session_state();
        self.shared.end_session();
        log::info!("[engine] User session disconnected.");
        true
    }

    // ── Subscriptions ───────────────────────────────────────────────────────

    /// Subscribe to `destination`.
    ///
    /// Fails without sending anything if not connected or already
    /// subscribed. The table is updated only after the frame is written.
    pub fn subscribe(&self, destination: &str) -> bool {
        if !self.require_connected() {
            return false;
        }
        if destination.is_empty() {
            log::error!("[engine] Cannot subscribe to an empty destination");
            return false;
        }

        let mut subscriptions = self.shared.lock_subscriptions();
        if subscriptions.contains(destination) {
            log::error!("[engine] Already subscribed to topic: {destination}");
            return false;
        }

        let id = self.shared.next_subscription_id();
        let receipt = self.shared.next_receipt(format!("subscribe {destination}"));
        match self.shared.write(&frame::encode_subscribe(destination, id, receipt)) {
            Ok(()) => {
                subscriptions.insert(destination, id);
                log::info!("[engine] Subscribed to: {destination} (id {id})");
                true
            }
            Err(e) => {
                self.shared.forget_receipt(receipt);
                log::error!("[engine] Failed to subscribe to topic {destination}: {e:#}");
                false
            }
        }
    }

    /// Cancel the subscription to `destination`.
    pub fn unsubscribe(&self, destination: &str) -> bool {
        if !self.require_connected() {
            return false;
        }

        let mut subscriptions = self.shared.lock_subscriptions();
        let Some(id) = subscriptions.get(destination) else {
            log::error!("[engine] Not subscribed to topic: {destination}");
            return false;
        };

        let receipt = self.shared.next_receipt(format!("unsubscribe {destination}"));
        match self.shared.write(&frame::encode_unsubscribe(id, receipt)) {
            Ok(()) => {
                subscriptions.remove(destination);
                log::info!("[engine] Unsubscribed from: {destination}");
                true
            }
            Err(e) => {
                self.shared.forget_receipt(receipt);
                log::error!("[engine] Failed to unsubscribe from topic {destination}: {e:#}");
                false
            }
        }
    }

    /// Publish `body` to `destination`.
    ///
    /// The sender must itself be subscribed to `destination`. On the wire
    /// the destination is addressed as `/<destination>`, the broker's topic
    /// namespace.
    pub fn send(&self, destination: &str, body: &str) -> bool {
        if !self.require_connected() {
            return false;
        }

        let subscriptions = self.shared.lock_subscriptions();
        if !subscriptions.contains(destination) {
            log::error!("[engine] Not subscribed to topic: {destination}");
            return false;
        }

        let receipt = self.shared.next_receipt(format!("send {destination}"));
        let topic = format!("{TOPIC_PREFIX}{destination}");
        match self.shared.write(&frame::encode_send(&topic, body, receipt)) {
            Ok(()) => {
                log::info!("[engine] Message sent to: {destination}");
                true
            }
            Err(e) => {
                self.shared.forget_receipt(receipt);
                log::error!("[engine] Failed to send message to topic {destination}: {e:#}");
                false
            }
        }
    }

    // ── Reporting ───────────────────────────────────────────────────────────

    /// Store a batch of events for its channel and publish each one.
    ///
    /// Events are sorted by timestamp and stamped with the logged-in user
    /// and the batch's channel before they replace the channel's stored
    /// events; then each is sent in that order. Returns true only if every
    /// event was sent.
    pub fn report_events(&self, batch: EventBatch) -> bool {
        let Some(username) = self.username() else {
            log::error!("[engine] Client not connected.");
            return false;
        };

        let EventBatch {
            channel_name,
            mut events,
        } = batch;
        events.sort_by_key(Event::timestamp);
        for event in &mut events {
            event.set_owner(username.as_str());
            event.set_channel(channel_name.as_str());
        }

        self.shared.store.replace(&channel_name, events.clone());
        log::info!(
            "[engine] Stored {} events for channel: {channel_name}",
            events.len()
        );

        let mut all_sent = true;
        for event in &events {
            log::debug!("[engine] Reporting {} as {username}", event.name());
            all_sent &= self.send(&channel_name, &event.to_body());
        }
        all_sent
    }

    /// Summary of `user`'s events on `channel`, or `None` if there are none.
    ///
    /// Unknown channels never fail: see [`EventStore::owned_events`] for
    /// the name fallbacks.
    pub fn summarize(&self, channel: &str, user: &str) -> Option<Summary> {
        let (resolved, events) = self.shared.store.owned_events(channel, user);
        let summary = Summary::build(channel, user, events);
        if summary.is_none() {
            log::info!("[engine] No events found for user: {user} in channel: {resolved}");
        }
        summary
    }

    /// Write the summary for `user` on `channel` to `out`.
    ///
    /// Writes nothing and returns false when the user has no events there.
    pub fn write_summary<W: Write + ?Sized>(&self, channel: &str, user: &str, out: &mut W) -> bool {
        let Some(summary) = self.summarize(channel, user) else {
            return false;
        };
        match summary.write_to(out) {
            Ok(()) => true,
            Err(e) => {
                log::error!("[engine] Failed to write summary: {e}");
                false
            }
        }
    }

    /// Write the summary for `user` on `channel` to a file.
    ///
    /// Relative paths resolve against the configured summary directory. The
    /// file is only created when there is something to write.
    pub fn generate_summary(&self, channel: &str, user: &str, file: &Path) -> bool {
        let Some(summary) = self.summarize(channel, user) else {
            return false;
        };
        let path = self.shared.config.summary_path(file);
        let written = File::create(&path)
            .map(BufWriter::new)
            .and_then(|mut out| summary.write_to(&mut out));
        match written {
            Ok(()) => {
                log::info!("[engine] Summary successfully written to: {}", path.display());
                true
            }
            Err(e) => {
                log::error!("[engine] Failed to write summary to {}: {e}", path.display());
                false
            }
        }
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    /// Current connection state.
    pub fn status(&self) -> ConnectionStatus {
        self.shared.lock_session().status
    }

    /// Logged-in username while connected.
    pub fn username(&self) -> Option<String> {
        let session = self.shared.lock_session();
        (session.status == ConnectionStatus::Connected).then(|| session.username.clone())
    }

    /// Subscription id for `destination`, if subscribed.
    pub fn subscription_id(&self, destination: &str) -> Option<u64> {
        self.shared.lock_subscriptions().get(destination)
    }

    /// Active `(destination, id)` pairs sorted by id.
    pub fn subscriptions(&self) -> Vec<(String, u64)> {
        self.shared.lock_subscriptions().entries()
    }

    /// Stored events for `channel` (empty if none).
    pub fn events(&self, channel: &str) -> Vec<Event> {
        self.shared.store.events(channel).unwrap_or_default()
    }

    /// Channels with stored events.
    pub fn channels(&self) -> Vec<String> {
        self.shared.store.channels()
    }

    /// Number of requests still waiting for a RECEIPT.
    pub fn pending_receipts(&self) -> usize {
        self.shared.lock_receipts().len()
    }

    // ── Internal ────────────────────────────────────────────────────────────

    fn require_connected(&self) -> bool {
        let connected = self.status() == ConnectionStatus::Connected;
        if !connected {
            log::error!("[engine] Client not connected.");
        }
        connected
    }

    fn lock_receiver(&self) -> MutexGuard<'_, Option<ReceiverHandle>> {
        self.receiver.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join a receive thread left over from a lost connection.
    fn reap_receiver(&self) {
        let handle = self.lock_receiver().take();
        if let Some(handle) = handle {
            self.shared.close_writer();
            if handle.join.join().is_err() {
                log::error!("[engine] Receive thread panicked");
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.status() == ConnectionStatus::Connected {
            self.disconnect();
        } else {
            self.reap_receiver();
            self.shared.close_writer();
        }
    }
}

impl Shared {
    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_writer(&self) -> MutexGuard<'_, Option<Box<dyn FrameWriter>>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_subscriptions(&self) -> MutexGuard<'_, SubscriptionTable> {
        self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_receipts(&self) -> MutexGuard<'_, HashMap<u64, String>> {
        self.receipts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the transport and complete the CONNECT handshake.
    ///
    /// On success the writer is installed and the reader is returned for the
    /// receive thread.
    fn open_session(&self, username: &str, password: &str) -> Result<Box<dyn FrameReader>> {
        let (mut writer, mut reader) = self.transport.open().context("open transport")?;
        if let Err(e) = self.handshake(writer.as_mut(), reader.as_mut(), username, password) {
            writer.close();
            return Err(e);
        }
        *self.lock_writer() = Some(writer);
        Ok(reader)
    }

    fn handshake(
        &self,
        writer: &mut dyn FrameWriter,
        reader: &mut dyn FrameReader,
        username: &str,
        password: &str,
    ) -> Result<()> {
        let connect = frame::encode_connect(&self.config.host, username, password);
        writer.write_frame(&connect).context("send CONNECT frame")?;

        let timeout = Some(self.config.connect_timeout()).filter(|t| !t.is_zero());
        reader.set_read_timeout(timeout)?;
        let raw = reader.read_frame().context("receive CONNECT reply")?;
        let reply = Frame::decode(&raw).context("decode CONNECT reply")?;
        if reply.command != command::CONNECTED {
            bail!(
                "server refused connection ({}): {}",
                reply.command,
                reply.header("message").unwrap_or_else(|| reply.body.trim())
            );
        }
        reader.set_read_timeout(None)
    }

    fn write(&self, frame: &str) -> Result<()> {
        match self.lock_writer().as_mut() {
            Some(writer) => writer.write_frame(frame),
            None => bail!("transport is not open"),
        }
    }

    fn close_writer(&self) {
        let writer = self.lock_writer().take();
        if let Some(mut writer) = writer {
            writer.close();
        }
    }

    fn next_receipt(&self, request: impl Into<String>) -> u64 {
        let id = self.receipt_counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.lock_receipts().insert(id, request.into());
        id
    }

    fn forget_receipt(&self, id: u64) {
        self.lock_receipts().remove(&id);
    }

    fn next_subscription_id(&self) -> u64 {
        self.subscription_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Forget everything tied to the previous session. Ids restart at 1.
    fn reset_session_state(&self) {
        self.close_writer();
        self.lock_subscriptions().clear();
        self.lock_receipts().clear();
        self.receipt_counter.store(0, Ordering::SeqCst);
        self.subscription_counter.store(0, Ordering::SeqCst);
        self.disconnect_receipt.store(0, Ordering::SeqCst);
    }

    fn end_session(&self) {
        let mut session = self.lock_session();
        session.status = ConnectionStatus::Disconnected;
        session.username.clear();
    }

    /// Receive-side failure: drop to `Disconnected` without a DISCONNECT.
    fn mark_connection_lost(&self) {
        let mut session = self.lock_session();
        if session.status == ConnectionStatus::Connected {
            session.status = ConnectionStatus::Disconnected;
            session.username.clear();
        }
    }
}
