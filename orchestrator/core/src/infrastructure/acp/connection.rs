// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::transport::TransportError;

/// Write side of one live ACP connection.
///
/// The socket itself is owned by the connection task in [`super::server`]; a
/// handle only queues serialized frames for that task to write. Writing on a
/// handle is reserved to the [`super::container::AgentContainer`].
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<String>,
}

impl ConnectionHandle {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub(super) fn send(&self, frame: String) -> Result<(), TransportError> {
        self.tx
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed(self.id.to_string()))
    }
}
