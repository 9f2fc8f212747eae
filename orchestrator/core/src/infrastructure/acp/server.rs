// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// ACP Server - WebSocket listener for agent connections
//
// One axum route upgrades agent connections; every upgraded socket runs in its
// own task that feeds text frames to the Gateway and drains the connection's
// outbound queue. All tasks are tracked so stop() can wait for them.
//
// A closed connection only marks the agent disconnected in the container.
// Unregistration is left to the dispatcher's heartbeat check.

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::connection::ConnectionHandle;
use super::container::{AgentConnectionInfo, AgentContainer};
use super::gateway::AcpGateway;
use super::router::AcpRouter;
use crate::application::control::ControlDispatcher;
use crate::domain::behavior::BehaviorPackage;
use crate::domain::message::{AcpMessage, MessageType};
use crate::domain::node_config::ServerSettings;
use crate::domain::trace::TraceSink;
use crate::domain::transport::{BehaviorTransport, TaskTransport, TransportError};
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, Error)]
pub enum AcpServerError {
    #[error("ACP server is already running on {0}")]
    AlreadyRunning(SocketAddr),

    #[error("ACP server is not running")]
    NotRunning,

    #[error("Failed to bind {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

struct RunningServer {
    addr: SocketAddr,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

#[derive(Clone)]
struct ConnectionState {
    gateway: Arc<AcpGateway>,
    container: Arc<AgentContainer>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

pub struct AcpServer {
    settings: ServerSettings,
    container: Arc<AgentContainer>,
    event_bus: EventBus,
    trace_sink: Arc<dyn TraceSink>,
    control: Option<Arc<ControlDispatcher>>,
    agent_messages: Option<mpsc::Sender<AcpMessage>>,
    running: Mutex<Option<RunningServer>>,
}

impl AcpServer {
    /// Traces go to `event_bus` unless [`AcpServer::with_trace_sink`] overrides it.
    pub fn new(settings: ServerSettings, event_bus: EventBus) -> Self {
        let trace_sink: Arc<dyn TraceSink> = Arc::new(event_bus.clone());
        Self {
            settings,
            container: Arc::new(AgentContainer::new()),
            event_bus,
            trace_sink,
            control: None,
            agent_messages: None,
            running: Mutex::new(None),
        }
    }

    pub fn with_control_dispatcher(mut self, control: Arc<ControlDispatcher>) -> Self {
        self.control = Some(control);
        self
    }

    pub fn with_trace_sink(mut self, trace_sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = trace_sink;
        self
    }

    /// Lossless feed of routed agent messages, for consumers that must not miss
    /// a register or result. The event bus copy stays best-effort.
    pub fn with_agent_messages(mut self, sender: mpsc::Sender<AcpMessage>) -> Self {
        self.agent_messages = Some(sender);
        self
    }

    pub fn container(&self) -> Arc<AgentContainer> {
        self.container.clone()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.addr)
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Binds the listener and starts accepting connections. Returns the bound
    /// address, which differs from the configured one when port 0 was requested.
    pub async fn start(&self) -> Result<SocketAddr, AcpServerError> {
        if let Some(addr) = self.local_addr() {
            return Err(AcpServerError::AlreadyRunning(addr));
        }

        let address = self.settings.socket_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| AcpServerError::BindFailed {
                address: address.clone(),
                source,
            })?;
        let addr = listener.local_addr()?;

        let mut router = AcpRouter::new(&self.settings.node_id, self.container.clone())
            .with_event_bus(self.event_bus.clone());
        if let Some(control) = &self.control {
            router = router.with_control_dispatcher(control.clone());
        }
        if let Some(sender) = &self.agent_messages {
            router = router.with_agent_messages(sender.clone());
        }
        let gateway = Arc::new(AcpGateway::new(
            &self.settings.node_id,
            Arc::new(router),
            self.container.clone(),
            self.trace_sink.clone(),
        ));

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let state = ConnectionState {
            gateway,
            container: self.container.clone(),
            cancel: cancel.clone(),
            tracker: tracker.clone(),
        };

        let app = Router::new()
            .route(&self.settings.path, get(upgrade_handler))
            .with_state(state);

        let shutdown = cancel.clone();
        tracker.spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                error!(error = %e, "ACP listener failed");
            }
        });

        {
            let mut running = self.running.lock();
            if let Some(existing) = running.as_ref() {
                // Lost a race with a concurrent start(); tear ours down
                cancel.cancel();
                return Err(AcpServerError::AlreadyRunning(existing.addr));
            }
            *running = Some(RunningServer {
                addr,
                cancel,
                tracker,
            });
        }

        info!(address = %addr, path = %self.settings.path, "ACP server listening");
        Ok(addr)
    }

    /// Stops accepting, closes every connection and waits for their tasks.
    pub async fn stop(&self) -> Result<(), AcpServerError> {
        let running = self.running.lock().take().ok_or(AcpServerError::NotRunning)?;
        running.cancel.cancel();
        running.tracker.close();
        running.tracker.wait().await;
        info!(address = %running.addr, "ACP server stopped");
        Ok(())
    }

    /// Sends `data` as the body of a `task` message. Returns `false` when the agent
    /// has no live connection.
    pub fn send_task_to_agent(&self, agent_id: &str, data: Map<String, Value>) -> bool {
        let message = AcpMessage::builder(MessageType::Task)
            .sender(&self.settings.node_id)
            .receiver(agent_id)
            .command("task")
            .data(data)
            .build();
        self.container.dispatch_task(agent_id, &message).is_ok()
    }

    pub fn get_agent_info(&self, agent_id: &str) -> Option<AgentConnectionInfo> {
        self.container.get_agent_info(agent_id)
    }

    pub fn get_all_agents(&self) -> Vec<AgentConnectionInfo> {
        self.container.get_all_agents()
    }
}

#[async_trait]
impl TaskTransport for AcpServer {
    async fn send_task(&self, agent_id: &str, message: AcpMessage) -> Result<(), TransportError> {
        self.container.dispatch_task(agent_id, &message)
    }

    async fn notify_cancel(&self, agent_id: &str, message: AcpMessage) -> Result<(), TransportError> {
        self.container.dispatch_task(agent_id, &message)
    }
}

#[async_trait]
impl BehaviorTransport for AcpServer {
    async fn deliver(&self, package: &BehaviorPackage) -> Result<(), TransportError> {
        let message = AcpMessage::from_behavior(package, &self.settings.node_id);
        self.container.dispatch_task(&package.to_agent, &message)
    }
}

async fn upgrade_handler(ws: WebSocketUpgrade, State(state): State<ConnectionState>) -> Response {
    ws.on_upgrade(move |socket| {
        let tracker = state.tracker.clone();
        tracker.track_future(run_connection(socket, state))
    })
}

async fn run_connection(socket: WebSocket, state: ConnectionState) {
    let (handle, mut outbound) = ConnectionHandle::new();
    let connection_id = handle.id();
    let (mut sink, mut stream) = socket.split();
    info!(connection_id = %connection_id, "ACP connection opened");

    loop {
        tokio::select! {
            _ = state.cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = sink.send(Message::Text(frame.into())).await {
                    warn!(connection_id = %connection_id, error = %e, "Write failed, closing connection");
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    state.gateway.handle_frame(&handle, text.as_str()).await;
                }
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => state.gateway.handle_frame(&handle, text).await,
                    Err(_) => state.gateway.reject(&handle, "binary frame is not valid UTF-8"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    debug!(connection_id = %connection_id, "Peer closed connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(connection_id = %connection_id, error = %e, "Read failed, closing connection");
                    break;
                }
            },
        }
    }

    if let Some(agent_id) = state.container.mark_disconnected(connection_id) {
        info!(connection_id = %connection_id, agent_id = %agent_id, "Agent connection closed");
    } else {
        info!(connection_id = %connection_id, "ACP connection closed");
    }
}
