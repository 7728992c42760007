// file: src/channel.rs
// description: Reconnecting push-update channel with bounded exponential backoff

use crate::{
    emitter::{Emitter, HandlerId},
    monitoring,
    retry::RetryPolicy,
    transport::{Transport, TransportEvent},
    types::{CONTROL_SUBSCRIBE, CONTROL_UNSUBSCRIBE, Envelope},
};
use serde_json::Value;
use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex},
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Connection lifecycle as observed through [`ReconnectingChannel::on_state_change`].
/// `Failed` is terminal until the caller explicitly calls `connect()` again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

enum Command {
    Connect { session: u64 },
    Subscribe(String),
    Unsubscribe(String),
    Close,
}

struct ChannelShared {
    state: ConnectionState,
    // Bumped by close() and connect(); driver work tagged with an older
    // session is discarded, which is what makes close() final.
    session: u64,
    subscriptions: BTreeSet<String>,
}

/// A persistent duplex connection to one push-update endpoint.
///
/// The channel transparently recovers from transport drops with bounded
/// exponential backoff, replays the subscription set on every successful
/// (re)connect, and fans inbound messages out to per-topic handlers. All
/// public methods are synchronous and non-blocking; the connection itself is
/// driven by a background task owned by this handle.
///
/// Transport failures never cross this API: they surface only as
/// [`ConnectionState`] transitions, with `Failed` reported once the retry
/// budget is exhausted.
pub struct ReconnectingChannel {
    shared: Arc<Mutex<ChannelShared>>,
    topics: Arc<Mutex<HashMap<String, Arc<Emitter<Value>>>>>,
    state_events: Arc<Emitter<ConnectionState>>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    driver: tokio::task::JoinHandle<()>,
}

impl ReconnectingChannel {
    /// Creates the channel and spawns its driver task. Must be called from
    /// within a tokio runtime. No connection is attempted until `connect()`.
    pub fn new<T: Transport>(transport: T, retry: RetryPolicy) -> Self {
        let shared = Arc::new(Mutex::new(ChannelShared {
            state: ConnectionState::Disconnected,
            session: 0,
            subscriptions: BTreeSet::new(),
        }));
        let topics: Arc<Mutex<HashMap<String, Arc<Emitter<Value>>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let state_events = Arc::new(Emitter::new());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let driver = tokio::spawn(
            Driver {
                transport,
                retry,
                shared: Arc::clone(&shared),
                topics: Arc::clone(&topics),
                state_events: Arc::clone(&state_events),
                cmd_rx,
            }
            .run(),
        );

        Self {
            shared,
            topics,
            state_events,
            cmd_tx,
            driver,
        }
    }

    /// Starts connecting. Idempotent: a no-op while already connecting or
    /// connected. Resets the retry budget, so this is also how a caller
    /// restarts after `Failed`.
    pub fn connect(&self) {
        let session = {
            let mut shared = self.shared.lock().unwrap();
            match shared.state {
                ConnectionState::Connecting | ConnectionState::Connected => return,
                ConnectionState::Disconnected | ConnectionState::Failed => {}
            }
            shared.session += 1;
            shared.state = ConnectionState::Connecting;
            shared.session
        };
        self.state_events.emit(&ConnectionState::Connecting);
        let _ = self.cmd_tx.send(Command::Connect { session });
    }

    /// Registers interest in a topic. Sent to the server immediately when
    /// connected; otherwise replayed on the next successful connect.
    pub fn subscribe(&self, topic: &str) {
        let send_now = {
            let mut shared = self.shared.lock().unwrap();
            shared.subscriptions.insert(topic.to_string())
                && shared.state == ConnectionState::Connected
        };
        if send_now {
            let _ = self.cmd_tx.send(Command::Subscribe(topic.to_string()));
        }
    }

    /// Drops interest in a topic. No-op if the topic was never subscribed.
    pub fn unsubscribe(&self, topic: &str) {
        let send_now = {
            let mut shared = self.shared.lock().unwrap();
            shared.subscriptions.remove(topic) && shared.state == ConnectionState::Connected
        };
        if send_now {
            let _ = self.cmd_tx.send(Command::Unsubscribe(topic.to_string()));
        }
    }

    /// Registers a handler for inbound messages on a topic. Multiple handlers
    /// per topic are allowed and run in registration order; a panicking
    /// handler is isolated and does not stop the others.
    pub fn on_message(
        &self,
        topic: &str,
        handler: impl Fn(&Value) + Send + Sync + 'static,
    ) -> HandlerId {
        let emitter = {
            let mut topics = self.topics.lock().unwrap();
            Arc::clone(topics.entry(topic.to_string()).or_default())
        };
        emitter.on(handler)
    }

    /// Detaches a message handler previously registered with `on_message`.
    pub fn off_message(&self, topic: &str, id: HandlerId) -> bool {
        let emitter = { self.topics.lock().unwrap().get(topic).cloned() };
        emitter.map(|e| e.off(id)).unwrap_or(false)
    }

    /// Registers a handler invoked on every [`ConnectionState`] transition.
    pub fn on_state_change(
        &self,
        handler: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) -> HandlerId {
        self.state_events.on(move |state| handler(*state))
    }

    pub fn off_state_change(&self, id: HandlerId) -> bool {
        self.state_events.off(id)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().unwrap().state
    }

    /// Terminates the transport and cancels any pending reconnect. Once this
    /// returns, no reconnect attempt and no state transition will occur; a
    /// subsequent `connect()` starts fresh with a full retry budget.
    pub fn close(&self) {
        let emit = {
            let mut shared = self.shared.lock().unwrap();
            shared.session += 1;
            if shared.state == ConnectionState::Disconnected {
                false
            } else {
                shared.state = ConnectionState::Disconnected;
                true
            }
        };
        if emit {
            self.state_events.emit(&ConnectionState::Disconnected);
        }
        let _ = self.cmd_tx.send(Command::Close);
    }
}

impl Drop for ReconnectingChannel {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

enum ConnEnd {
    /// The transport dropped on its own; the backoff loop takes over.
    Dropped,
    /// close() was called; park until the next explicit connect().
    Closed,
    /// The channel handle is gone; the driver exits.
    Shutdown,
}

enum OpenOutcome {
    Opened(Result<(), crate::error::TickwireError>),
    Closed,
    Shutdown,
}

enum Step {
    Event(TransportEvent),
    Cmd(Option<Command>),
}

struct Driver<T: Transport> {
    transport: T,
    retry: RetryPolicy,
    shared: Arc<Mutex<ChannelShared>>,
    topics: Arc<Mutex<HashMap<String, Arc<Emitter<Value>>>>>,
    state_events: Arc<Emitter<ConnectionState>>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
}

impl<T: Transport> Driver<T> {
    async fn run(mut self) {
        'parked: loop {
            // Park until an explicit connect() for the live session arrives.
            let session = loop {
                let cmd = self.cmd_rx.recv().await;
                match cmd {
                    Some(Command::Connect { session }) if self.is_live(session) => break session,
                    Some(_) => {}
                    None => return,
                }
            };
            self.retry.reset();

            // State is already Connecting when we get here, set either by
            // connect() or by the backoff step below.
            loop {
                // close() must be able to abandon an in-flight open; racing
                // it against the command queue drops the connect future.
                let outcome = {
                    let transport = &mut self.transport;
                    let cmd_rx = &mut self.cmd_rx;
                    tokio::select! {
                        result = transport.open() => OpenOutcome::Opened(result),
                        alive = wait_for_close(cmd_rx) => {
                            if alive { OpenOutcome::Closed } else { OpenOutcome::Shutdown }
                        }
                    }
                };

                match outcome {
                    OpenOutcome::Opened(Ok(())) => match self.run_connected(session).await {
                        ConnEnd::Dropped => {}
                        ConnEnd::Closed => continue 'parked,
                        ConnEnd::Shutdown => return,
                    },
                    OpenOutcome::Opened(Err(e)) => warn!("connect attempt failed: {}", e),
                    OpenOutcome::Closed => {
                        self.transport.close().await;
                        continue 'parked;
                    }
                    OpenOutcome::Shutdown => {
                        self.transport.close().await;
                        return;
                    }
                }

                if !self.set_state(session, ConnectionState::Disconnected) {
                    continue 'parked;
                }

                match self.retry.next_delay() {
                    Some(delay) => {
                        if !self.set_state(session, ConnectionState::Connecting) {
                            continue 'parked;
                        }
                        monitoring::RECONNECT_COUNTER.increment(1);
                        warn!(
                            "reconnecting in {}ms (attempt {}/{})",
                            delay.as_millis(),
                            self.retry.attempt(),
                            self.retry.max_attempts()
                        );
                        let sleep = tokio::time::sleep(delay);
                        tokio::pin!(sleep);
                        loop {
                            tokio::select! {
                                _ = &mut sleep => break,
                                cmd = self.cmd_rx.recv() => match cmd {
                                    Some(Command::Close) => continue 'parked,
                                    Some(_) => {}
                                    None => return,
                                }
                            }
                        }
                    }
                    None => {
                        error!(
                            "retry budget exhausted after {} attempts",
                            self.retry.max_attempts()
                        );
                        self.set_state(session, ConnectionState::Failed);
                        continue 'parked;
                    }
                }
            }
        }
    }

    async fn run_connected(&mut self, session: u64) -> ConnEnd {
        self.retry.reset();
        let connection_id = Uuid::new_v4().to_string();
        if !self.set_state(session, ConnectionState::Connected) {
            self.transport.close().await;
            return ConnEnd::Closed;
        }
        monitoring::CONNECTED_GAUGE.set(1.0);
        info!(connection_id = %connection_id, "connected");

        // Commands that queued up while we were offline are already reflected
        // in the subscription set; drop them so the replay stays exactly-once.
        loop {
            match self.cmd_rx.try_recv() {
                Ok(Command::Close) => {
                    self.transport.close().await;
                    monitoring::CONNECTED_GAUGE.set(0.0);
                    return ConnEnd::Closed;
                }
                Ok(_) => {}
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.transport.close().await;
                    monitoring::CONNECTED_GAUGE.set(0.0);
                    return ConnEnd::Shutdown;
                }
            }
        }

        let topics: Vec<String> = {
            let shared = self.shared.lock().unwrap();
            shared.subscriptions.iter().cloned().collect()
        };
        for topic in &topics {
            if let Err(e) = self.send_control(CONTROL_SUBSCRIBE, topic).await {
                warn!("subscription replay failed for {}: {}", topic, e);
                monitoring::CONNECTED_GAUGE.set(0.0);
                return ConnEnd::Dropped;
            }
        }
        if !topics.is_empty() {
            debug!("replayed {} subscriptions", topics.len());
        }

        let end = loop {
            let step = {
                let transport = &mut self.transport;
                let cmd_rx = &mut self.cmd_rx;
                tokio::select! {
                    event = transport.next_event() => Step::Event(event),
                    cmd = cmd_rx.recv() => Step::Cmd(cmd),
                }
            };
            match step {
                Step::Event(TransportEvent::Message { topic, payload }) => {
                    self.dispatch(&topic, payload)
                }
                Step::Event(TransportEvent::Closed) => {
                    warn!("connection closed by peer");
                    break ConnEnd::Dropped;
                }
                Step::Event(TransportEvent::Errored(e)) => {
                    warn!("connection error: {}", e);
                    break ConnEnd::Dropped;
                }
                Step::Cmd(Some(Command::Subscribe(topic))) => {
                    if let Err(e) = self.send_control(CONTROL_SUBSCRIBE, &topic).await {
                        warn!("subscribe send failed for {}: {}", topic, e);
                        break ConnEnd::Dropped;
                    }
                }
                Step::Cmd(Some(Command::Unsubscribe(topic))) => {
                    if let Err(e) = self.send_control(CONTROL_UNSUBSCRIBE, &topic).await {
                        warn!("unsubscribe send failed for {}: {}", topic, e);
                        break ConnEnd::Dropped;
                    }
                }
                Step::Cmd(Some(Command::Close)) => {
                    self.transport.close().await;
                    break ConnEnd::Closed;
                }
                Step::Cmd(Some(Command::Connect { .. })) => {}
                Step::Cmd(None) => {
                    self.transport.close().await;
                    break ConnEnd::Shutdown;
                }
            }
        };
        monitoring::CONNECTED_GAUGE.set(0.0);
        end
    }

    async fn send_control(
        &mut self,
        control: &str,
        topic: &str,
    ) -> Result<(), crate::error::TickwireError> {
        self.transport
            .send(control, &Envelope::control_payload(topic))
            .await
    }

    fn dispatch(&self, topic: &str, payload: Value) {
        monitoring::MESSAGES_RECEIVED_COUNTER.increment(1);
        let emitter = { self.topics.lock().unwrap().get(topic).cloned() };
        match emitter {
            Some(emitter) => emitter.emit(&payload),
            None => trace!(topic, "no handlers registered for topic"),
        }
    }

    fn is_live(&self, session: u64) -> bool {
        self.shared.lock().unwrap().session == session
    }

    /// Applies a state transition for `session` and notifies listeners.
    /// Returns false when the session is stale (close() or a newer connect()
    /// superseded it), in which case nothing is emitted.
    fn set_state(&self, session: u64, next: ConnectionState) -> bool {
        {
            let mut shared = self.shared.lock().unwrap();
            if shared.session != session {
                return false;
            }
            if shared.state == next {
                return true;
            }
            shared.state = next;
        }
        self.state_events.emit(&next);
        true
    }
}

/// Drains the command queue until close() or handle drop. Anything else that
/// arrives while offline is bookkeeping already applied to the shared state.
/// Returns false when the channel handle is gone.
async fn wait_for_close(cmd_rx: &mut mpsc::UnboundedReceiver<Command>) -> bool {
    loop {
        match cmd_rx.recv().await {
            Some(Command::Close) => return true,
            Some(_) => {}
            None => return false,
        }
    }
}
