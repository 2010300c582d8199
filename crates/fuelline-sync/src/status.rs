//! Read-only node snapshot for the admin display.

use std::fmt;

use serde::Serialize;

use crate::config::NodeRole;
use fuelline_core::{FuelType, Price};

/// Point-in-time view of a running node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeStatus {
    pub role: NodeRole,
    pub node_id: String,
    /// Downstream connections (relays at the hub, leaves at a relay).
    pub connections: usize,
    /// Upstream link state; `None` at the hub.
    pub linked: Option<bool>,
    /// Reports not yet delivered upstream: the outbox backlog at a relay,
    /// the in-memory queue at a leaf. `None` at the hub.
    pub unsynced: Option<i64>,
    /// Sale in progress; leaves only.
    pub operating: Option<bool>,
    /// Price updates held until the running sale ends; leaves only.
    pub queued_updates: usize,
    /// Cached prices sorted by fuel type.
    pub prices: Vec<(FuelType, Price)>,
}

impl NodeStatus {
    pub fn new(role: NodeRole, node_id: impl Into<String>) -> Self {
        NodeStatus {
            role,
            node_id: node_id.into(),
            connections: 0,
            linked: None,
            unsynced: None,
            operating: None,
            queued_updates: 0,
            prices: Vec::new(),
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.role, self.node_id)?;
        match self.role {
            NodeRole::Hub => write!(f, " | relays: {}", self.connections)?,
            NodeRole::Relay => write!(f, " | leaves: {}", self.connections)?,
            NodeRole::Leaf => {}
        }
        if let Some(linked) = self.linked {
            write!(f, " | upstream: {}", if linked { "linked" } else { "down" })?;
        }
        if let Some(unsynced) = self.unsynced {
            write!(f, " | unsynced: {}", unsynced)?;
        }
        match self.operating {
            Some(true) if self.queued_updates > 0 => {
                write!(f, " | operating, {} update(s) queued", self.queued_updates)?
            }
            Some(true) => write!(f, " | operating")?,
            Some(false) => write!(f, " | idle")?,
            None => {}
        }
        if self.prices.is_empty() {
            write!(f, " | prices: none")
        } else {
            let prices: Vec<String> = self
                .prices
                .iter()
                .map(|(fuel, price)| format!("{}={}", fuel, price))
                .collect();
            write!(f, " | prices: {}", prices.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let mut status = NodeStatus::new(NodeRole::Relay, "relay-1");
        status.connections = 2;
        status.linked = Some(false);
        status.unsynced = Some(3);
        status.prices = vec![("93".into(), 1035), ("95".into(), 1150)];

        assert_eq!(
            status.to_string(),
            "relay relay-1 | leaves: 2 | upstream: down | unsynced: 3 | prices: 93=1035, 95=1150"
        );
        assert_eq!(
            NodeStatus::new(NodeRole::Hub, "hub").to_string(),
            "hub hub | relays: 0 | prices: none"
        );

        let mut leaf = NodeStatus::new(NodeRole::Leaf, "pump-1");
        leaf.linked = Some(true);
        leaf.unsynced = Some(0);
        leaf.operating = Some(true);
        leaf.queued_updates = 1;
        assert_eq!(
            leaf.to_string(),
            "leaf pump-1 | upstream: linked | unsynced: 0 | operating, 1 update(s) queued | prices: none"
        );
    }
}
