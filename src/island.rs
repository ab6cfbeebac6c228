//! Island wrapping and instance identifiers.
//!
//! Every mounted island gets an instance identifier `<typeId>$$<ordinal>`.
//! Ordinals come from a [`RenderPass`], created fresh for each traversal of
//! one request's tree, so repeated renders never leak counts into each other.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::resource::{Element, IslandDef, Node, Props};

/// Separator between type id and ordinal. Part of the wire contract.
pub const INSTANCE_SEPARATOR: &str = "$$";

/// Attribute carried by every island's boundary element.
pub const MARKER_ATTR: &str = "data-instance-id";

/// Tag of the boundary element.
pub const MARKER_TAG: &str = "div";

// ---------------------------------------------------------------------------
// InstanceId
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId {
    type_id: String,
    ordinal: usize,
}

impl InstanceId {
    pub fn new(type_id: impl Into<String>, ordinal: usize) -> Self {
        Self {
            type_id: type_id.into(),
            ordinal,
        }
    }

    /// Split a marker on the last `$$`, which must be followed by decimal
    /// digits only. Agrees with the runtime's `^(.+?)\$\$(\d+)$`.
    pub fn parse(marker: &str) -> Option<Self> {
        let (type_id, ordinal) = marker.rsplit_once(INSTANCE_SEPARATOR)?;
        if type_id.is_empty() || ordinal.is_empty() || !ordinal.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let ordinal = ordinal.parse::<usize>().ok()?;
        Some(Self::new(type_id, ordinal))
    }

    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.type_id, INSTANCE_SEPARATOR, self.ordinal)
    }
}

/// One occurrence of an island in one rendered tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IslandInstance {
    pub instance_id: String,
    pub type_id: String,
    pub ordinal: usize,
    pub props: Props,
}

impl IslandInstance {
    pub fn new(id: &InstanceId, props: Props) -> Self {
        Self {
            instance_id: id.to_string(),
            type_id: id.type_id().to_string(),
            ordinal: id.ordinal(),
            props,
        }
    }
}

// ---------------------------------------------------------------------------
// RenderPass
// ---------------------------------------------------------------------------

/// Per-traversal ordinal counters, one per island type.
#[derive(Debug, Default)]
pub struct RenderPass {
    next: HashMap<String, usize>,
}

impl RenderPass {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the next ordinal for `type_id`, starting at 0.
    pub fn next_instance(&mut self, type_id: &str) -> InstanceId {
        let slot = self.next.entry(type_id.to_string()).or_insert(0);
        let id = InstanceId::new(type_id, *slot);
        *slot += 1;
        id
    }

    /// Instances claimed so far for `type_id`.
    pub fn count(&self, type_id: &str) -> usize {
        self.next.get(type_id).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.next.values().sum()
    }
}

// ---------------------------------------------------------------------------
// Wrapping
// ---------------------------------------------------------------------------

/// Whether `type_id` can appear in a marker: non-empty and free of `$$`.
pub fn is_valid_type_id(type_id: &str) -> bool {
    !type_id.is_empty() && !type_id.contains(INSTANCE_SEPARATOR)
}

/// Tag `island` so the collector and renderer recognise it.
///
/// Idempotent: an island that already carries an id is returned as is.
/// The island's own type id wins over `type_id` when it is non-empty.
/// An id that is not [valid](is_valid_type_id) leaves the island untagged;
/// it then renders inline without a marker.
pub fn wrap(type_id: &str, island: Arc<IslandDef>) -> Arc<IslandDef> {
    if island.is_wrapped() {
        return island;
    }
    let island_id = if island.type_id().is_empty() {
        type_id.to_string()
    } else {
        island.type_id().to_string()
    };
    if !is_valid_type_id(&island_id) {
        warn!(island = %island_id, "refusing to wrap island with an unusable type id");
        return island;
    }
    Arc::new(island.tagged(island_id))
}

/// Put `rendered` inside the DOM-attachable boundary for `instance`.
pub fn marker_boundary(instance: &InstanceId, rendered: Node) -> Node {
    Element::new(MARKER_TAG)
        .attr(MARKER_ATTR, instance.to_string())
        .child(rendered)
        .into()
}
