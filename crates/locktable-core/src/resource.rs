//! Resource identity: the `(type, id)` pair every lock is keyed by.

use std::fmt;

use serde::Serialize;

/// A class of lockable resources (nodes, relationships, schema objects...).
///
/// Resource types are supplied by the host application. The numeric `id`
/// selects the per-type lock map inside each partition and must be lower
/// than the configured number of resource types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ResourceType {
    id: u32,
    name: &'static str,
}

impl ResourceType {
    /// Creates a resource type with a dense numeric id and a display name.
    #[must_use]
    pub const fn new(id: u32, name: &'static str) -> Self {
        Self { id, name }
    }

    /// Returns the numeric id used to index per-type lock maps.
    #[must_use]
    pub const fn id(self) -> u32 {
        self.id
    }

    /// Returns the display name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        self.name
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Fully qualified identity of a lockable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ResourceKey {
    /// Resource class.
    pub resource_type: ResourceType,
    /// Resource id within its class.
    pub resource_id: u64,
}

impl ResourceKey {
    /// Creates a key for `resource_id` of `resource_type`.
    #[must_use]
    pub const fn new(resource_type: ResourceType, resource_id: u64) -> Self {
        Self {
            resource_type,
            resource_id,
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.resource_type, self.resource_id)
    }
}
