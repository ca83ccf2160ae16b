//! Connection manager.
//!
//! Drives the [`ConnectionMachine`] with real I/O: executes its actions by
//! dialing the transport, owns the outbound frame channel, answers
//! application-level pings, and fans incoming frames and lifecycle events
//! out to subscribers.
//!
//! Lock discipline: machine actions are collected under the lock and
//! executed after it is released. No lock is ever held across an await.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tideline_core::{
    ConnectAction, ConnectionError, ConnectionEvent, ConnectionMachine, ConnectionState,
    ReconnectPolicy, SendError, UserId,
};
use tideline_proto::{ClientFrame, ServerFrame};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::ws::{TransportEvent, WsTransport};

/// How often the supervisor ticks the machine for timeouts and retries.
const TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Who we are to the server.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Our authenticated user ID.
    pub user_id: UserId,
    /// Bearer token, also embedded in the WebSocket path.
    pub token: String,
}

/// Registered callbacks, dispatched in registration order.
struct HandlerSet<T> {
    handlers: Vec<(u64, Box<dyn Fn(&T) + Send + Sync>)>,
    next_id: u64,
}

impl<T> HandlerSet<T> {
    fn new() -> Self {
        Self {
            handlers: Vec::new(),
            next_id: 0,
        }
    }

    fn insert(&mut self, handler: Box<dyn Fn(&T) + Send + Sync>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.handlers.push((id, handler));
        id
    }

    fn remove(&mut self, id: u64) {
        self.handlers.retain(|(h, _)| *h != id);
    }

    fn dispatch(&self, value: &T) {
        for (_, handler) in &self.handlers {
            handler(value);
        }
    }
}

/// Cancels a handler registration when dropped or explicitly unsubscribed.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Remove the handler now.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

struct ManagerInner {
    machine: Mutex<ConnectionMachine<Instant>>,
    ws_base: String,
    token: Mutex<String>,
    handshake_timeout: Duration,
    outbound: Mutex<Option<mpsc::Sender<ClientFrame>>>,
    frame_handlers: Mutex<HandlerSet<ServerFrame>>,
    event_handlers: Mutex<HandlerSet<ConnectionEvent>>,
    state_tx: watch::Sender<ConnectionState>,
}

impl ManagerInner {
    fn publish_state(&self) {
        let state = self.machine.lock().state();
        let _ = self.state_tx.send_replace(state);
    }

    fn dispatch_event(&self, event: &ConnectionEvent) {
        self.event_handlers.lock().dispatch(event);
    }

    fn dispatch_frame(&self, frame: &ServerFrame) {
        self.frame_handlers.lock().dispatch(frame);
    }

    fn socket_url(&self) -> String {
        format!("{}/chat/ws/{}", self.ws_base, self.token.lock())
    }
}

/// Owns the WebSocket connection lifecycle.
///
/// Reconnects run in the background according to the machine's policy; the
/// manager only ever has one live transport at a time.
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    /// Manager for `ws_base` (no trailing slash), authenticating with
    /// `token`. Starts disconnected.
    pub fn new(ws_base: impl Into<String>, token: impl Into<String>, policy: ReconnectPolicy) -> Self {
        let handshake_timeout = policy.handshake_timeout;
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Disconnected);

        let inner = Arc::new(ManagerInner {
            machine: Mutex::new(ConnectionMachine::new(policy)),
            ws_base: ws_base.into(),
            token: Mutex::new(token.into()),
            handshake_timeout,
            outbound: Mutex::new(None),
            frame_handlers: Mutex::new(HandlerSet::new()),
            event_handlers: Mutex::new(HandlerSet::new()),
            state_tx,
        });

        spawn_supervisor(&inner);
        Self { inner }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Watch channel following the connection state.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Whether frames can currently be sent.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Replace the bearer token used for future connection attempts.
    pub fn set_token(&self, token: impl Into<String>) {
        *self.inner.token.lock() = token.into();
    }

    /// Connect, resolving once the in-flight attempt succeeds or fails.
    ///
    /// Callers that arrive while an attempt is already dialing wait for
    /// that attempt to settle and report its outcome. On a transient
    /// failure the background retry schedule keeps running after this
    /// returns the error.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let mut state_rx = self.inner.state_tx.subscribe();
        let actions = self.inner.machine.lock().connect(Instant::now());
        self.inner.publish_state();
        execute_actions(Arc::clone(&self.inner), actions).await;

        loop {
            // Mark the current notification seen before inspecting the
            // machine, so a settlement between the check and the wait
            // still wakes us.
            let _ = state_rx.borrow_and_update();

            {
                let machine = self.inner.machine.lock();
                match machine.state() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Connecting => {
                        if let Some(error) = machine.last_error() {
                            return Err(error.clone());
                        }
                    },
                    ConnectionState::Disconnected | ConnectionState::Failed => {
                        return Err(machine
                            .last_error()
                            .cloned()
                            .unwrap_or(ConnectionError::Timeout));
                    },
                }
            }

            if state_rx.changed().await.is_err() {
                return Err(ConnectionError::Timeout);
            }
        }
    }

    /// Tear down deliberately. No reconnect follows.
    pub fn disconnect(&self) {
        // Dropping the sender makes the transport send a normal close.
        self.inner.outbound.lock().take();
        let actions = self.inner.machine.lock().disconnect();
        for action in actions {
            if let ConnectAction::Notify(event) = action {
                self.inner.publish_state();
                self.inner.dispatch_event(&event);
            }
        }
    }

    /// Send a frame over the live connection.
    pub async fn send(&self, frame: ClientFrame) -> Result<(), SendError> {
        let sender = self.inner.outbound.lock().clone();
        let Some(sender) = sender else {
            return Err(SendError::NotConnected);
        };
        if !self.is_connected() {
            return Err(SendError::NotConnected);
        }

        sender.send(frame).await.map_err(|_| SendError::NotConnected)
    }

    /// Register a handler for decoded server frames.
    ///
    /// Control frames (handshake confirmation, ping, pong, unrecognized
    /// types) are consumed internally and never reach handlers.
    pub fn on_frame(&self, handler: impl Fn(&ServerFrame) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.frame_handlers.lock().insert(Box::new(handler));
        let weak = Arc::downgrade(&self.inner);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.frame_handlers.lock().remove(id);
                }
            })),
        }
    }

    /// Register a handler for connection lifecycle events.
    pub fn on_event(
        &self,
        handler: impl Fn(&ConnectionEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.inner.event_handlers.lock().insert(Box::new(handler));
        let weak = Arc::downgrade(&self.inner);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.event_handlers.lock().remove(id);
                }
            })),
        }
    }
}

/// Run the machine's actions. `OpenTransport` results feed further actions
/// back into the queue, so this loops instead of recursing.
///
/// Returns a boxed future: the read loop awaits this function while
/// `open_transport` spawns the read loop, and type-erasing this link keeps
/// the async call graph acyclic for the compiler.
fn execute_actions(
    inner: Arc<ManagerInner>,
    actions: Vec<ConnectAction>,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        let mut queue: VecDeque<ConnectAction> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                ConnectAction::OpenTransport => {
                    queue.extend(open_transport(&inner).await);
                },
                ConnectAction::Notify(event) => {
                    inner.publish_state();
                    inner.dispatch_event(&event);
                },
            }
        }
    })
}

async fn open_transport(inner: &Arc<ManagerInner>) -> Vec<ConnectAction> {
    let url = inner.socket_url();
    let Some(token) = inner.machine.lock().current_attempt() else {
        return vec![];
    };

    match WsTransport::connect(&url, inner.handshake_timeout).await {
        Ok(transport) => {
            let actions = {
                let mut machine = inner.machine.lock();
                if machine.current_attempt() != Some(token) {
                    // The supervisor timed this dial out already; the
                    // socket belongs to no attempt. Dropping it sends a
                    // normal close.
                    return vec![];
                }
                machine.handshake_succeeded(Instant::now())
            };
            let (sender, events) = transport.split();
            *inner.outbound.lock() = Some(sender);
            tokio::spawn(read_loop(Arc::clone(inner), events));
            actions
        },
        Err(error) => {
            let mut machine = inner.machine.lock();
            if machine.current_attempt() != Some(token) {
                return vec![];
            }
            tracing::warn!(%error, "connection attempt failed");
            machine.handshake_failed(error, Instant::now())
        },
    }
}

async fn read_loop(inner: Arc<ManagerInner>, mut events: mpsc::Receiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Frame(frame) => match frame {
                ServerFrame::Ping => {
                    let sender = inner.outbound.lock().clone();
                    if let Some(sender) = sender {
                        let _ = sender.send(ClientFrame::Pong).await;
                    }
                },
                ServerFrame::Pong => {},
                ServerFrame::ConnectionConfirmed { user_id } => {
                    tracing::debug!(?user_id, "connection confirmed");
                },
                ServerFrame::Unknown => {
                    tracing::debug!("ignoring unrecognized frame type");
                },
                other => inner.dispatch_frame(&other),
            },
            TransportEvent::Closed(reason) => {
                inner.outbound.lock().take();
                let actions = inner
                    .machine
                    .lock()
                    .transport_closed(reason, Instant::now());
                execute_actions(Arc::clone(&inner), actions).await;
                return;
            },
        }
    }
}

fn spawn_supervisor(inner: &Arc<ManagerInner>) {
    let weak: Weak<ManagerInner> = Arc::downgrade(inner);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else { return };
            let actions = inner.machine.lock().tick(Instant::now());
            execute_actions(inner, actions).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn handlers_dispatch_in_registration_order() {
        let mut set: HandlerSet<u32> = HandlerSet::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let log = Arc::clone(&log);
            set.insert(Box::new(move |_| log.lock().push(tag)));
        }

        set.dispatch(&0);
        assert_eq!(*log.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn removed_handler_is_not_called() {
        let mut set: HandlerSet<u32> = HandlerSet::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let id = set.insert(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        set.dispatch(&0);
        set.remove(id);
        set.dispatch(&0);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn subscription_drop_unregisters() {
        let manager = ConnectionManager::new(
            "ws://localhost:0",
            "token",
            ReconnectPolicy::default(),
        );
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let subscription = manager.on_frame(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        manager
            .inner
            .dispatch_frame(&ServerFrame::Error { message: None });
        drop(subscription);
        manager
            .inner
            .dispatch_frame(&ServerFrame::Error { message: None });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn send_without_connection_is_rejected() {
        let manager = ConnectionManager::new(
            "ws://localhost:0",
            "token",
            ReconnectPolicy::default(),
        );
        let result = manager.send(ClientFrame::Pong).await;
        assert_eq!(result, Err(SendError::NotConnected));
    }
}
