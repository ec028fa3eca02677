//! The in-memory device model.
//!
//! A device carries five disjoint property maps, one per property
//! family (Text, Number, Switch, Light, BLOB). The families share a
//! common envelope (name, label, group, state, permissions, timeout,
//! last-updated, message log) and differ in their value shape; keeping
//! five separate maps keeps every value access monomorphic. A name may
//! collide across families without conflict.
//!
//! Everything here is plain data: snapshots handed to API callers are
//! clones, and all types serialize to camelCase JSON for dashboards.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::wire::model::{PropertyPermission, PropertyState, SwitchRule, SwitchState};

/// An INDI device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub name: String,
    pub text_properties: HashMap<String, TextProperty>,
    pub switch_properties: HashMap<String, SwitchProperty>,
    pub number_properties: HashMap<String, NumberProperty>,
    pub light_properties: HashMap<String, LightProperty>,
    pub blob_properties: HashMap<String, BlobProperty>,
    pub messages: Vec<Message>,
}

/// A message received from the server, stamped when it was applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// A text property on a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextProperty {
    pub name: String,
    pub label: String,
    pub group: String,
    pub state: PropertyState,
    pub timeout: i32,
    pub last_updated: DateTime<Utc>,
    pub messages: Vec<Message>,
    pub permissions: PropertyPermission,
    pub values: HashMap<String, TextValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextValue {
    pub name: String,
    pub label: String,
    pub value: String,
}

/// A switch property on a device. `rule` is a presentation hint;
/// enforcement lives in the device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchProperty {
    pub name: String,
    pub label: String,
    pub group: String,
    pub state: PropertyState,
    pub timeout: i32,
    pub last_updated: DateTime<Utc>,
    pub messages: Vec<Message>,
    pub rule: SwitchRule,
    pub permissions: PropertyPermission,
    pub values: HashMap<String, SwitchValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchValue {
    pub name: String,
    pub label: String,
    pub value: SwitchState,
}

/// A number property on a device. Numeric fields stay strings to
/// preserve the server's formatting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberProperty {
    pub name: String,
    pub label: String,
    pub group: String,
    pub state: PropertyState,
    pub timeout: i32,
    pub last_updated: DateTime<Utc>,
    pub messages: Vec<Message>,
    pub permissions: PropertyPermission,
    pub values: HashMap<String, NumberValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberValue {
    pub name: String,
    pub label: String,
    pub value: String,
    pub format: String,
    pub min: String,
    pub max: String,
    pub step: String,
}

/// A light property on a device. Lights are read-only indicators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightProperty {
    pub name: String,
    pub label: String,
    pub group: String,
    pub state: PropertyState,
    pub last_updated: DateTime<Utc>,
    pub messages: Vec<Message>,
    pub values: HashMap<String, LightValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightValue {
    pub name: String,
    pub label: String,
    pub value: PropertyState,
}

/// A BLOB property on a device. Values point at the decoded on-disk
/// artifact; they stay empty until the first payload arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobProperty {
    pub name: String,
    pub label: String,
    pub group: String,
    pub state: PropertyState,
    pub timeout: i32,
    pub last_updated: DateTime<Utc>,
    pub messages: Vec<Message>,
    pub permissions: PropertyPermission,
    pub values: HashMap<String, BlobValue>,
}

/// A BLOB value. `value` is the path of the decoded artifact in the
/// injected filesystem; `size` the byte count actually written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobValue {
    pub name: String,
    pub label: String,
    pub value: String,
    pub size: i64,
}

impl Device {
    pub fn new(name: &str) -> Self {
        Device {
            name: name.to_string(),
            ..Device::default()
        }
    }

    /// All group labels used by this device's properties, for display
    /// purposes. Duplicates are collapsed and the result is sorted
    /// ascending.
    pub fn groups(&self) -> Vec<String> {
        let mut groups = BTreeSet::new();

        for p in self.text_properties.values() {
            groups.insert(p.group.clone());
        }
        for p in self.switch_properties.values() {
            groups.insert(p.group.clone());
        }
        for p in self.number_properties.values() {
            groups.insert(p.group.clone());
        }
        for p in self.light_properties.values() {
            groups.insert(p.group.clone());
        }
        for p in self.blob_properties.values() {
            groups.insert(p.group.clone());
        }

        groups.into_iter().collect()
    }
}
