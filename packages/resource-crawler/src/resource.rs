//! The resource model: the persisted unit of crawl data and work.
//!
//! A [`Resource`] is what the store holds. A [`ResourceDescriptor`] is what a
//! transform returns; the store turns descriptors into resources by filling
//! in identity, lineage and timestamps.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::handler::{Fingerprint, HandlerId};

/// Kind tag for resources produced from a failed transform.
pub const KIND_ERROR: &str = "error";
/// Kind tag for the "ran, produced nothing" sentinel.
pub const KIND_EMPTY: &str = "empty";
pub const KIND_URL: &str = "url";
pub const KIND_HTML: &str = "html";
pub const KIND_IMAGE: &str = "image";

// =============================================================================
// Identity
// =============================================================================

/// Unique identifier for a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(pub Uuid);

impl ResourceId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ResourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// State
// =============================================================================

/// Dispatch state of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandledState {
    /// Not yet dispatched (or revived from cache and awaiting re-dispatch)
    #[default]
    Pending,
    /// Dispatched to at least one handler
    Handled,
    /// Dispatched, but no handler matched. Terminal.
    Orphaned,
}

impl HandledState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandledState::Pending => "pending",
            HandledState::Handled => "handled",
            HandledState::Orphaned => "orphaned",
        }
    }
}

impl fmt::Display for HandledState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HandledState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(HandledState::Pending),
            "handled" => Ok(HandledState::Handled),
            "orphaned" => Ok(HandledState::Orphaned),
            other => Err(format!("unknown handled state: {other}")),
        }
    }
}

// =============================================================================
// Payload
// =============================================================================

/// Payload of a resource.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "encoding", content = "value", rename_all = "snake_case")]
pub enum ResourceData {
    #[default]
    None,
    Value(Value),
    Bytes(Vec<u8>),
}

impl ResourceData {
    pub fn is_none(&self) -> bool {
        matches!(self, ResourceData::None)
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            ResourceData::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ResourceData::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Look up a field when the payload is a JSON object.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.as_value().and_then(|v| v.get(key))
    }

    /// Canonical JSON form used for content fingerprinting.
    fn canonical(&self) -> Value {
        match self {
            ResourceData::None => Value::Null,
            ResourceData::Value(v) => v.clone(),
            ResourceData::Bytes(b) => json!({ "bytes": hex::encode(b) }),
        }
    }
}

impl From<Value> for ResourceData {
    fn from(v: Value) -> Self {
        ResourceData::Value(v)
    }
}

impl From<String> for ResourceData {
    fn from(s: String) -> Self {
        ResourceData::Value(Value::String(s))
    }
}

impl From<&str> for ResourceData {
    fn from(s: &str) -> Self {
        ResourceData::Value(Value::String(s.to_string()))
    }
}

impl From<Vec<u8>> for ResourceData {
    fn from(b: Vec<u8>) -> Self {
        ResourceData::Bytes(b)
    }
}

// =============================================================================
// Descriptor
// =============================================================================

/// What a transform produces: a resource without identity or lineage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub meta: Map<String, Value>,
    #[serde(default)]
    pub data: ResourceData,
}

impl ResourceDescriptor {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            meta: Map::new(),
            data: ResourceData::None,
        }
    }

    /// Descriptor of an arbitrary kind carrying `data`.
    pub fn of_kind(kind: impl Into<String>, data: impl Into<ResourceData>) -> Self {
        Self::new(kind).with_data(data)
    }

    pub fn with_data(mut self, data: impl Into<ResourceData>) -> Self {
        self.data = data.into();
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self::of_kind(KIND_URL, url.into())
    }

    /// HTML page body, tagged with the URL it was fetched from.
    pub fn html(body: impl Into<String>, url: impl Into<String>) -> Self {
        Self::of_kind(KIND_HTML, body.into()).with_meta("url", url.into())
    }

    pub fn image(bytes: Vec<u8>, url: impl Into<String>) -> Self {
        Self::of_kind(KIND_IMAGE, bytes).with_meta("url", url.into())
    }

    /// Record of a failed transform.
    pub fn error(message: impl Into<String>, causes: Vec<String>) -> Self {
        Self::of_kind(
            KIND_ERROR,
            json!({ "message": message.into(), "causes": causes }),
        )
    }

    /// Sentinel recording that a transform ran and produced nothing.
    pub fn empty() -> Self {
        Self::new(KIND_EMPTY)
    }

    pub fn is_sentinel(&self) -> bool {
        self.kind == KIND_EMPTY
    }
}

// =============================================================================
// Resource
// =============================================================================

/// Process-local lineage. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lineage {
    /// Identity of the handler that produced (or revived) this resource in this process.
    pub produced_by: Option<HandlerId>,
    /// Whether this resource was replayed from the result cache.
    pub from_cache: bool,
}

/// A persisted crawl item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: ResourceId,
    #[serde(rename = "type")]
    pub kind: String,
    pub meta: Map<String, Value>,
    pub data: ResourceData,
    pub depth: u32,
    pub parent_resource: Option<ResourceId>,
    pub parent_handler_fingerprint: Option<Fingerprint>,
    pub content_fingerprint: String,
    pub handled_state: HandledState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub lineage: Lineage,
}

impl Resource {
    /// Build a depth-0 seed from a descriptor.
    pub fn seed(descriptor: ResourceDescriptor) -> Self {
        let now = Utc::now();
        let mut resource = Self {
            id: ResourceId::new(),
            kind: descriptor.kind,
            meta: descriptor.meta,
            data: descriptor.data,
            depth: 0,
            parent_resource: None,
            parent_handler_fingerprint: None,
            content_fingerprint: String::new(),
            handled_state: HandledState::Pending,
            created_at: now,
            updated_at: now,
            lineage: Lineage::default(),
        };
        resource.refresh_fingerprint();
        resource
    }

    /// Build a child of `parent` produced by the handler with `fingerprint` and `handler_id`.
    pub fn child_of(
        descriptor: ResourceDescriptor,
        parent: &Resource,
        fingerprint: &Fingerprint,
        handler_id: HandlerId,
    ) -> Self {
        let mut resource = Self::seed(descriptor);
        resource.depth = parent.depth + 1;
        resource.parent_resource = Some(parent.id);
        resource.parent_handler_fingerprint = Some(fingerprint.clone());
        resource.lineage.produced_by = Some(handler_id);
        resource
    }

    pub fn is_sentinel(&self) -> bool {
        self.kind == KIND_EMPTY
    }

    pub fn is_error(&self) -> bool {
        self.kind == KIND_ERROR
    }

    pub fn meta_value(&self, key: &str) -> Option<&Value> {
        self.meta.get(key)
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta.get(key).and_then(Value::as_str)
    }

    pub fn descriptor(&self) -> ResourceDescriptor {
        ResourceDescriptor {
            kind: self.kind.clone(),
            meta: self.meta.clone(),
            data: self.data.clone(),
        }
    }

    /// SHA-256 over the canonical JSON of (type, meta, data).
    pub fn compute_content_fingerprint(&self) -> String {
        let canonical = json!({
            "type": self.kind,
            "meta": self.meta,
            "data": self.data.canonical(),
        });
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Recompute the content fingerprint and bump `updated_at`. Called on every save.
    pub fn refresh_fingerprint(&mut self) {
        self.content_fingerprint = self.compute_content_fingerprint();
        self.updated_at = Utc::now();
    }
}
