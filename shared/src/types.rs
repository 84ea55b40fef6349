use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use crate::protocol::{HEADER_LOCATION, HEADER_SERVER, HEADER_ST, HEADER_USN};

/// Header fields of one SSDP search response.
/// Names are stored upper-cased, values trimmed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnouncementRecord {
    headers: BTreeMap<String, String>,
}

impl AnnouncementRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: &str) {
        self.headers
            .insert(name.trim().to_ascii_uppercase(), value.trim().to_string());
    }

    /// Case-insensitive header lookup
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_uppercase())
            .map(String::as_str)
    }

    /// Search target the reply answers for
    pub fn st(&self) -> Option<&str> {
        self.get(HEADER_ST)
    }

    /// URL of the root device description
    pub fn location(&self) -> Option<&str> {
        self.get(HEADER_LOCATION)
    }

    pub fn usn(&self) -> Option<&str> {
        self.get(HEADER_USN)
    }

    pub fn server(&self) -> Option<&str> {
        self.get(HEADER_SERVER)
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for AnnouncementRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Self::new();
        for (name, value) in iter {
            record.insert(name.as_ref(), value.as_ref());
        }
        record
    }
}

/// host -> short service identifier -> announcement
pub type ServiceAnnouncementIndex = BTreeMap<String, BTreeMap<String, AnnouncementRecord>>;

/// One value of a parsed descriptor document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeValue {
    /// Trimmed text of an element without child elements
    Leaf(String),
    Node(DescriptorNode),
}

impl TreeValue {
    pub fn as_leaf(&self) -> Option<&str> {
        match self {
            TreeValue::Leaf(text) => Some(text),
            TreeValue::Node(_) => None,
        }
    }

    pub fn as_node(&self) -> Option<&DescriptorNode> {
        match self {
            TreeValue::Leaf(_) => None,
            TreeValue::Node(node) => Some(node),
        }
    }
}

/// Element tree keyed by (possibly re-keyed) tag name, in document order.
///
/// Keys are unique per level: once a key is present, later siblings that
/// derive the same key are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DescriptorNode {
    entries: IndexMap<String, TreeValue>,
}

impl DescriptorNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value` under `key` unless the key is already taken.
    /// Returns false when the value was dropped.
    pub fn insert_first(&mut self, key: impl Into<String>, value: TreeValue) -> bool {
        match self.entries.entry(key.into()) {
            indexmap::map::Entry::Occupied(_) => false,
            indexmap::map::Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&TreeValue> {
        self.entries.get(key)
    }

    pub fn leaf(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(TreeValue::as_leaf)
    }

    pub fn node(&self, key: &str) -> Option<&DescriptorNode> {
        self.get(key).and_then(TreeValue::as_node)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove a key, keeping the order of the remaining entries
    pub fn remove(&mut self, key: &str) -> Option<TreeValue> {
        self.entries.shift_remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TreeValue)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A UPnP device taken from a root descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Full device type URN, e.g. "urn:schemas-upnp-org:device:InternetGatewayDevice:1"
    pub device_type: String,

    /// Short type name, e.g. "InternetGatewayDevice"
    pub short_type: String,

    pub friendly_name: Option<String>,

    /// scheme://host:port of the descriptor, used to resolve relative URLs
    pub base_url: Option<String>,

    /// Services keyed by short service name; None when the device has no serviceList
    pub services: Option<IndexMap<String, ServiceRecord>>,

    /// Every other field of the device element (deviceList and serviceList excluded)
    pub fields: DescriptorNode,
}

impl DeviceRecord {
    pub fn service(&self, short_name: &str) -> Option<&ServiceRecord> {
        self.services.as_ref()?.get(short_name)
    }

    /// Resolve a descriptor-relative URL against the device base URL.
    /// Absolute URLs are returned unchanged.
    pub fn resolve_url(&self, path: &str) -> Option<String> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Some(path.to_string());
        }
        let base = self.base_url.as_deref()?;
        Some(format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        ))
    }

    /// Absolute control endpoint of one of the device services
    pub fn control_endpoint(&self, short_name: &str) -> Option<String> {
        let control_url = self.service(short_name)?.control_url.as_deref()?;
        self.resolve_url(control_url)
    }
}

/// Service entry of a device serviceList.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub service_type: Option<String>,
    pub service_id: Option<String>,
    pub control_url: Option<String>,
    pub event_sub_url: Option<String>,
    pub scpd_url: Option<String>,

    /// None until the capability document has been read;
    /// Some(empty) when it was read and declares no action.
    pub actions: Option<IndexMap<String, ActionRecord>>,
}

impl ServiceRecord {
    pub fn action(&self, name: &str) -> Option<&ActionRecord> {
        self.actions.as_ref()?.get(name)
    }
}

/// Remote action declared by a capability document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub name: String,

    /// None when the action has no argumentList element at all
    pub arguments: Option<IndexMap<String, ArgumentRecord>>,
}

impl ActionRecord {
    pub fn is_argument_less(&self) -> bool {
        self.arguments.is_none()
    }

    /// Arguments a caller has to supply
    pub fn input_arguments(&self) -> impl Iterator<Item = &ArgumentRecord> {
        self.arguments
            .iter()
            .flat_map(|args| args.values())
            .filter(|arg| arg.is_input())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentRecord {
    pub name: String,
    pub direction: Option<String>,
    pub related_state_variable: Option<String>,
}

impl ArgumentRecord {
    pub fn is_input(&self) -> bool {
        self.direction
            .as_deref()
            .is_some_and(|d| d.eq_ignore_ascii_case("in"))
    }
}

/// host -> device short type -> device
pub type DiscoveryResult = BTreeMap<String, BTreeMap<String, DeviceRecord>>;

/// Counters of one SSDP scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    /// Datagrams received before the deadline
    pub replies: usize,
    pub indexed: usize,
    /// Replies without an ST header
    pub malformed: usize,
    /// Header lines without a colon
    pub malformed_lines: usize,
    /// ST neither urn: nor upnp:rootdevice
    pub filtered: usize,
    pub missing_location: usize,
    /// Replies whose (host, service) was already indexed
    pub duplicates: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkipStage {
    /// Root device descriptor
    Root,
    /// Service capability document
    Capability,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    Fetch(String),
    Parse(String),
    MalformedDescriptor(String),
}

/// A descriptor document whose contribution was left out of a discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skipped {
    pub stage: SkipStage,
    pub host: String,
    pub url: String,
    pub reason: SkipReason,
}

/// Completed discovery as served by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySnapshot {
    pub completed_at: DateTime<Utc>,
    pub fingerprint: String,
    pub devices: DiscoveryResult,
    pub scan: ScanStats,
    pub skipped: Vec<Skipped>,
    pub socket_error: Option<String>,
}

/// 4th colon-delimited segment of a UPnP URN:
/// "urn:schemas-upnp-org:device:InternetGatewayDevice:1" -> "InternetGatewayDevice"
pub fn short_type_name(urn: &str) -> Option<&str> {
    urn.split(':').nth(3).filter(|segment| !segment.is_empty())
}
