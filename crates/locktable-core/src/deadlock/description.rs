//! Human-readable deadlock chains.

use std::fmt;

use serde::Serialize;

use crate::client::ClientId;
use crate::mode::LockMode;
use crate::resource::ResourceKey;

/// One "client waits for lock" edge of a deadlock cycle.
///
/// The lock is held by the client of the next link; the last link's lock is
/// held by the first link's client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadlockLink {
    /// Waiting client.
    pub client_id: ClientId,
    /// Waiting client's name.
    pub client_name: String,
    /// Mode the client is waiting for.
    pub mode: LockMode,
    /// Resource the client is waiting for.
    pub resource: ResourceKey,
}

/// An ordered wait-for cycle, starting and ending at the client that
/// detected it.
///
/// ```text
/// Deadlock[(X)-[:WAITS_FOR]->(Lock(Node[2]))-[:HELD_BY]->(Y)-[:WAITS_FOR]->(Lock(Node[1]))-[:HELD_BY]->(X)]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadlockDescription {
    links: Vec<DeadlockLink>,
}

impl DeadlockDescription {
    pub(crate) fn new(links: Vec<DeadlockLink>) -> Self {
        Self { links }
    }

    /// Chain links; the first and last link belong to the detecting client.
    #[must_use]
    pub fn links(&self) -> &[DeadlockLink] {
        &self.links
    }

    /// Distinct clients in the cycle, in chain order.
    #[must_use]
    pub fn clients(&self) -> Vec<ClientId> {
        let mut clients: Vec<ClientId> = Vec::with_capacity(self.links.len());
        for link in &self.links {
            if !clients.contains(&link.client_id) {
                clients.push(link.client_id);
            }
        }
        clients
    }

    /// Number of distinct clients in the cycle.
    #[must_use]
    pub fn cycle_len(&self) -> usize {
        self.clients().len()
    }
}

impl fmt::Display for DeadlockDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Deadlock[")?;
        if let Some((last, edges)) = self.links.split_last() {
            for link in edges {
                write!(
                    f,
                    "({})-[:WAITS_FOR]->(Lock({}))-[:HELD_BY]->",
                    link.client_name, link.resource
                )?;
            }
            write!(f, "({})", last.client_name)?;
        }
        f.write_str("]")
    }
}
