// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Background loop driving [`TaskDispatcher::monitor_tick`] every
//! `monitor_interval_ms`.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dispatcher::TaskDispatcher;

pub(crate) struct MonitorHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl TaskDispatcher {
    /// Spawns the monitor on the current runtime. Returns `false` if one is
    /// already running. The loop holds only a weak reference and exits once the
    /// dispatcher is dropped.
    pub fn start_monitor(self: &Arc<Self>) -> bool {
        let mut slot = self.monitor.lock();
        if slot.is_some() {
            return false;
        }

        let interval_ms = self.settings().monitor_interval_ms.max(1);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let dispatcher = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(dispatcher) = dispatcher.upgrade() else {
                            break;
                        };
                        dispatcher.monitor_tick().await;
                    }
                }
            }
            debug!("Dispatcher monitor loop exited");
        });

        *slot = Some(MonitorHandle { cancel, handle });
        info!(interval_ms, "Dispatcher monitor started");
        true
    }

    /// Stops the monitor and waits for the in-progress tick to finish.
    pub async fn stop_monitor(&self) -> bool {
        let monitor = self.monitor.lock().take();
        let Some(monitor) = monitor else {
            return false;
        };
        monitor.cancel.cancel();
        if let Err(e) = monitor.handle.await {
            warn!(error = %e, "Dispatcher monitor task ended abnormally");
        }
        info!("Dispatcher monitor stopped");
        true
    }

    pub fn is_monitor_running(&self) -> bool {
        self.monitor.lock().is_some()
    }
}
