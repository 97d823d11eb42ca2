//! Content-object model seen by the dispatcher and deletion lifecycle.
//!
//! The document layer itself lives outside this crate. [`ContentObject`]
//! is the narrow view of it that provider selection and garbage
//! collection need, and [`SimpleDocument`] is an in-memory implementation
//! for embedding and tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Attachment path of the main blob of a document.
pub const MAIN_BLOB_XPATH: &str = "file:content";

/// Descriptive metadata of a blob, independent of where it is stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobInfo {
    pub filename: Option<String>,
    pub mime_type: Option<String>,
    pub encoding: Option<String>,
    pub digest: Option<String>,
    pub length: Option<u64>,
}

/// A blob reference held by a provider under a key.
///
/// This is the only blob representation the dispatcher and deletion
/// logic reason about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedBlob {
    pub provider_id: String,
    pub key: String,
    #[serde(flatten)]
    pub info: BlobInfo,
}

impl ManagedBlob {
    pub fn new(provider_id: impl Into<String>, key: impl Into<String>, info: BlobInfo) -> Self {
        Self {
            provider_id: provider_id.into(),
            key: key.into(),
            info,
        }
    }
}

/// A stored property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Null,
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    DateTime(DateTime<Utc>),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Null => f.write_str("null"),
            PropertyValue::String(s) => f.write_str(s),
            PropertyValue::Integer(i) => write!(f, "{i}"),
            PropertyValue::Float(x) => write!(f, "{x}"),
            PropertyValue::Boolean(b) => write!(f, "{b}"),
            PropertyValue::DateTime(dt) => f.write_str(&dt.to_rfc3339()),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Integer(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Boolean(value)
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(value: DateTime<Utc>) -> Self {
        PropertyValue::DateTime(value)
    }
}

/// The document layer's view of a content object.
pub trait ContentObject: Send + Sync {
    fn id(&self) -> &str;

    /// Name of the repository that owns this object.
    fn repository_name(&self) -> &str;

    /// Hierarchical path, if the object has one.
    fn path(&self) -> Option<&str>;

    /// Look up a property. `None` means the property does not exist on
    /// this object; an existing but unset property is
    /// `Some(PropertyValue::Null)`.
    fn property(&self, xpath: &str) -> Option<PropertyValue>;

    fn is_record(&self) -> bool;

    fn is_flexible_record(&self) -> bool;

    /// Whether the attachment at `xpath` is under an active retain-until
    /// date or a legal hold.
    fn is_under_retention_or_legal_hold(&self, xpath: &str) -> bool;

    /// All blob attachments, keyed by attachment path.
    fn blob_attachments(&self) -> Vec<(String, ManagedBlob)>;

    fn blob(&self, xpath: &str) -> Option<ManagedBlob> {
        self.blob_attachments()
            .into_iter()
            .find(|(path, _)| path == xpath)
            .map(|(_, blob)| blob)
    }

    /// Replace the blob reference stored at `xpath`.
    fn set_blob(&mut self, xpath: &str, blob: ManagedBlob);

    fn main_blob_xpath(&self) -> &str {
        MAIN_BLOB_XPATH
    }

    /// Whether the owning repository can list every blob key referenced
    /// by this object. Legacy backends cannot.
    fn enumerates_blob_keys(&self) -> bool {
        true
    }
}

/// Capabilities a principal may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Allows deleting blobs that are under retention or legal hold.
    DeleteUndeletable,
}

/// The acting user or system identity.
#[derive(Debug, Clone, Default)]
pub struct Principal {
    pub name: String,
    capabilities: HashSet<Capability>,
}

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: HashSet::new(),
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// In-memory [`ContentObject`].
#[derive(Debug, Clone)]
pub struct SimpleDocument {
    id: String,
    repository: String,
    path: Option<String>,
    properties: HashMap<String, PropertyValue>,
    blobs: BTreeMap<String, ManagedBlob>,
    record: bool,
    flexible_record: bool,
    retained: HashSet<String>,
    enumerates_blob_keys: bool,
}

impl SimpleDocument {
    pub fn new(id: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            repository: repository.into(),
            path: None,
            properties: HashMap::new(),
            blobs: BTreeMap::new(),
            record: false,
            flexible_record: false,
            retained: HashSet::new(),
            enumerates_blob_keys: true,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_property(mut self, xpath: &str, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(xpath.to_string(), value.into());
        self
    }

    pub fn set_property(&mut self, xpath: &str, value: impl Into<PropertyValue>) {
        self.properties.insert(xpath.to_string(), value.into());
    }

    pub fn with_blob(mut self, xpath: &str, blob: ManagedBlob) -> Self {
        self.blobs.insert(xpath.to_string(), blob);
        self
    }

    /// Mark as a record. A flexible record only retains the attachments
    /// explicitly put under retention.
    pub fn as_record(mut self, flexible: bool) -> Self {
        self.record = true;
        self.flexible_record = flexible;
        self
    }

    pub fn retain(&mut self, xpath: &str) {
        self.retained.insert(xpath.to_string());
    }

    pub fn release(&mut self, xpath: &str) {
        self.retained.remove(xpath);
    }

    pub fn without_blob_enumeration(mut self) -> Self {
        self.enumerates_blob_keys = false;
        self
    }
}

impl ContentObject for SimpleDocument {
    fn id(&self) -> &str {
        &self.id
    }

    fn repository_name(&self) -> &str {
        &self.repository
    }

    fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    fn property(&self, xpath: &str) -> Option<PropertyValue> {
        self.properties.get(xpath).cloned()
    }

    fn is_record(&self) -> bool {
        self.record
    }

    fn is_flexible_record(&self) -> bool {
        self.flexible_record
    }

    fn is_under_retention_or_legal_hold(&self, xpath: &str) -> bool {
        self.retained.contains(xpath)
    }

    fn blob_attachments(&self) -> Vec<(String, ManagedBlob)> {
        self.blobs
            .iter()
            .map(|(xpath, blob)| (xpath.clone(), blob.clone()))
            .collect()
    }

    fn blob(&self, xpath: &str) -> Option<ManagedBlob> {
        self.blobs.get(xpath).cloned()
    }

    fn set_blob(&mut self, xpath: &str, blob: ManagedBlob) {
        self.blobs.insert(xpath.to_string(), blob);
    }

    fn enumerates_blob_keys(&self) -> bool {
        self.enumerates_blob_keys
    }
}
