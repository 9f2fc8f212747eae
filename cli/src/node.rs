// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Node process: ACP server, task dispatcher, monitor and the bridge between them.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use acp_core::application::control::{ControlDispatcher, SimulatedModelBackend, ToolExecAdapter};
use acp_core::domain::node_config::NodeConfigManifest;
use acp_core::domain::tool::ToolFn;
use acp_core::domain::trace::TraceSink;
use acp_core::infrastructure::acp::AcpServer;
use acp_core::infrastructure::event_bus::EventBus;
use acp_core::infrastructure::tool_registry::InMemoryToolRegistry;
use acp_swarm::TaskDispatcher;

use crate::bridge;

/// Agent messages buffered between the server and the bridge before readers
/// are held back.
const AGENT_MESSAGE_BUFFER: usize = 1024;

pub struct AcpNode {
    server: Arc<AcpServer>,
    dispatcher: Arc<TaskDispatcher>,
    control: Arc<ControlDispatcher>,
    tools: Arc<InMemoryToolRegistry>,
    tool_adapter: Arc<ToolExecAdapter>,
    addr: SocketAddr,
    bridge_cancel: CancellationToken,
    bridge: JoinHandle<()>,
}

impl AcpNode {
    pub async fn start(config: &NodeConfigManifest) -> Result<Self> {
        let event_bus = EventBus::new(config.spec.trace.channel_capacity);
        let trace_sink: Arc<dyn TraceSink> = Arc::new(event_bus.clone());

        let tools = Arc::new(InMemoryToolRegistry::new());
        let tool_adapter = Arc::new(ToolExecAdapter::new(tools.clone()));
        let control = Arc::new(ControlDispatcher::with_tool_adapter(
            trace_sink.clone(),
            tool_adapter.clone(),
            Arc::new(SimulatedModelBackend),
        ));

        let (agent_messages, agent_inbox) = mpsc::channel(AGENT_MESSAGE_BUFFER);
        let server = Arc::new(
            AcpServer::new(config.spec.server.clone(), event_bus)
                .with_control_dispatcher(control.clone())
                .with_agent_messages(agent_messages),
        );
        let dispatcher = Arc::new(
            TaskDispatcher::new(config.spec.dispatcher.clone())
                .with_transport(server.clone())
                .with_trace_sink(trace_sink),
        );

        let addr = server.start().await.context("Failed to start ACP server")?;
        dispatcher.start_monitor();

        let bridge_cancel = CancellationToken::new();
        let bridge = tokio::spawn(bridge::run_bridge(
            dispatcher.clone(),
            agent_inbox,
            bridge_cancel.clone(),
        ));

        info!(
            node = %config.metadata.name,
            address = %addr,
            strategy = %config.spec.dispatcher.strategy,
            "ACP node started"
        );

        Ok(Self {
            server,
            dispatcher,
            control,
            tools,
            tool_adapter,
            addr,
            bridge_cancel,
            bridge,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn server(&self) -> &Arc<AcpServer> {
        &self.server
    }

    pub fn dispatcher(&self) -> &Arc<TaskDispatcher> {
        &self.dispatcher
    }

    pub fn control(&self) -> &Arc<ControlDispatcher> {
        &self.control
    }

    /// Registry consulted by `tool_exec` control actions.
    pub fn tools(&self) -> &Arc<InMemoryToolRegistry> {
        &self.tools
    }

    /// Binds a tool on the node's `tool_exec` adapter. Bound tools shadow
    /// registry entries of the same name.
    pub fn register_tool(&self, name: impl Into<String>, tool: ToolFn) {
        self.tool_adapter.register_tool(name, tool);
    }

    /// Stops the monitor first so no assignment races the closing listener.
    pub async fn shutdown(self) -> Result<()> {
        self.dispatcher.stop_monitor().await;
        self.bridge_cancel.cancel();
        if let Err(e) = self.bridge.await {
            warn!(error = %e, "Bridge task ended abnormally");
        }
        self.server.stop().await.context("Failed to stop ACP server")?;

        let stats = self.dispatcher.get_dispatcher_stats();
        info!(
            submitted = stats.tasks_submitted,
            completed = stats.tasks_completed,
            failed = stats.tasks_failed,
            timed_out = stats.tasks_timed_out,
            pending = stats.pending_tasks,
            active = stats.active_tasks,
            "ACP node shut down"
        );
        Ok(())
    }
}

/// Starts the node and runs it until Ctrl+C or SIGTERM.
pub async fn run(config: NodeConfigManifest) -> Result<()> {
    let node = AcpNode::start(&config).await?;
    shutdown_signal().await;
    node.shutdown().await
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
