//! Direct-message lookup and broadcast fan-out.
//!
//! Routing only queues lines into recipients' outboxes, so it never waits on
//! another connection's socket. A recipient whose outbox is closed is treated
//! as disconnected and unregistered on the spot.

use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    error::{DeliveryError, RouteError},
    registry::{ConnectionHandle, ConnectionId, Registry},
};

#[derive(Clone)]
pub struct Router {
    registry: Arc<Registry>,
}

impl Router {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Sends `body` to `target` only. Returns whether it was queued.
    pub fn route_direct(
        &self,
        sender: ConnectionId,
        target: &str,
        body: &str,
    ) -> Result<bool, RouteError> {
        let sender_name = self.sender_name(sender)?;
        let recipient = self
            .registry
            .lookup(target)
            .ok_or_else(|| RouteError::RecipientNotFound(target.to_string()))?;

        Ok(self.deliver(&recipient, format!("{sender_name} says (private): {body}")))
    }

    /// Sends `body` to every registered connection, the sender included.
    /// Returns how many recipients it was queued for.
    pub fn route_broadcast(&self, sender: ConnectionId, body: &str) -> Result<usize, RouteError> {
        let sender_name = self.sender_name(sender)?;
        Ok(self.fan_out(&format!("{sender_name} says: {body}")))
    }

    /// Sends a server-originated line to everyone.
    pub fn announce(&self, line: &str) -> usize {
        self.fan_out(line)
    }

    fn sender_name(&self, sender: ConnectionId) -> Result<String, RouteError> {
        self.registry
            .name_of(sender)
            .ok_or(RouteError::SenderUnknown)
    }

    fn fan_out(&self, line: &str) -> usize {
        self.registry
            .snapshot()
            .iter()
            .filter(|recipient| self.deliver(recipient, line.to_string()))
            .count()
    }

    fn deliver(&self, recipient: &ConnectionHandle, line: String) -> bool {
        match recipient.deliver(line) {
            Ok(()) => true,
            Err(DeliveryError::Full) => {
                warn!(
                    peer = %recipient.peer(),
                    connection = %recipient.id(),
                    "recipient is not keeping up; dropping message"
                );
                false
            }
            Err(DeliveryError::Closed) => {
                if let Some(name) = self.registry.unregister(recipient.id()) {
                    info!(peer = %recipient.peer(), %name, "unregistered unreachable client");
                }
                false
            }
        }
    }
}
