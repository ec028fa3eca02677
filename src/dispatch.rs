//! Message dispatcher: applies inbound elements to the device registry.
//!
//! The dispatcher is the sole consumer of the inbound queue and the only
//! writer of the registry besides the optimistic Busy marks set by the
//! client façade. Elements are applied in wire order. Policy per kind:
//!
//! - `def*Vector` upserts the property, fully overwriting any previous
//!   definition and (re)initializing all contained values.
//! - `set*Vector` updates an existing property; unknown devices or
//!   properties are dropped with a warning, unknown value names inside a
//!   known property are dropped silently.
//! - `message` appends to the named device's message log.
//! - `delProperty` deletes at registry, device or property granularity.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use crossbeam_channel::Receiver;

use crate::blob::{BlobSink, BlobStreams};
use crate::devices::{
    BlobProperty, BlobValue, LightProperty, LightValue, Message, NumberProperty, NumberValue,
    SwitchProperty, SwitchValue, TextProperty, TextValue,
};
use crate::fs::BlobFs;
use crate::registry::DeviceRegistry;
use crate::wire::model::*;

pub struct Dispatcher {
    registry: Arc<DeviceRegistry>,
    sink: BlobSink,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        fs: Arc<dyn BlobFs>,
        streams: Arc<BlobStreams>,
    ) -> Self {
        Dispatcher {
            registry,
            sink: BlobSink::new(fs, streams),
        }
    }

    /// Consume the inbound queue until it closes.
    pub fn run(&self, inbound: Receiver<ServerElement>) {
        for element in inbound.iter() {
            log::debug!("got message: {}", element.kind());
            self.apply(element);
        }
        log::debug!("dispatcher exiting");
    }

    /// Apply one element to the registry.
    pub fn apply(&self, element: ServerElement) {
        match element {
            ServerElement::DefText(item) => self.def_text(item),
            ServerElement::DefNumber(item) => self.def_number(item),
            ServerElement::DefSwitch(item) => self.def_switch(item),
            ServerElement::DefLight(item) => self.def_light(item),
            ServerElement::DefBlob(item) => self.def_blob(item),
            ServerElement::SetText(item) => self.set_text(item),
            ServerElement::SetNumber(item) => self.set_number(item),
            ServerElement::SetSwitch(item) => self.set_switch(item),
            ServerElement::SetLight(item) => self.set_light(item),
            ServerElement::SetBlob(item) => self.set_blob(item),
            ServerElement::Message(item) => self.message(item),
            ServerElement::DelProperty(item) => self.del_property(item),
        }
    }

    fn def_text(&self, item: DefTextVector) {
        let mut values = HashMap::new();
        for val in &item.texts {
            values.insert(
                val.name.clone(),
                TextValue {
                    name: val.name.clone(),
                    label: val.label.clone(),
                    value: val.value.trim().to_string(),
                },
            );
        }

        let mut prop = TextProperty {
            name: item.name.clone(),
            label: item.label.clone(),
            group: item.group.clone(),
            state: item.state,
            timeout: item.timeout,
            last_updated: Utc::now(),
            messages: Vec::new(),
            permissions: item.perm,
            values,
        };
        push_message(&mut prop.messages, &item.message);

        self.registry.upsert(&item.device, |device| {
            device.text_properties.insert(item.name.clone(), prop);
        });
    }

    fn def_number(&self, item: DefNumberVector) {
        let mut values = HashMap::new();
        for val in &item.numbers {
            values.insert(
                val.name.clone(),
                NumberValue {
                    name: val.name.clone(),
                    label: val.label.clone(),
                    value: val.value.trim().to_string(),
                    format: val.format.clone(),
                    min: val.min.clone(),
                    max: val.max.clone(),
                    step: val.step.clone(),
                },
            );
        }

        let mut prop = NumberProperty {
            name: item.name.clone(),
            label: item.label.clone(),
            group: item.group.clone(),
            state: item.state,
            timeout: item.timeout,
            last_updated: Utc::now(),
            messages: Vec::new(),
            permissions: item.perm,
            values,
        };
        push_message(&mut prop.messages, &item.message);

        self.registry.upsert(&item.device, |device| {
            device.number_properties.insert(item.name.clone(), prop);
        });
    }

    fn def_switch(&self, item: DefSwitchVector) {
        let mut values = HashMap::new();
        for val in &item.switches {
            values.insert(
                val.name.clone(),
                SwitchValue {
                    name: val.name.clone(),
                    label: val.label.clone(),
                    value: val.value,
                },
            );
        }

        let mut prop = SwitchProperty {
            name: item.name.clone(),
            label: item.label.clone(),
            group: item.group.clone(),
            state: item.state,
            timeout: item.timeout,
            last_updated: Utc::now(),
            messages: Vec::new(),
            rule: item.rule,
            permissions: item.perm,
            values,
        };
        push_message(&mut prop.messages, &item.message);

        self.registry.upsert(&item.device, |device| {
            device.switch_properties.insert(item.name.clone(), prop);
        });
    }

    fn def_light(&self, item: DefLightVector) {
        let mut values = HashMap::new();
        for val in &item.lights {
            values.insert(
                val.name.clone(),
                LightValue {
                    name: val.name.clone(),
                    label: val.label.clone(),
                    value: val.value,
                },
            );
        }

        let mut prop = LightProperty {
            name: item.name.clone(),
            label: item.label.clone(),
            group: item.group.clone(),
            state: item.state,
            last_updated: Utc::now(),
            messages: Vec::new(),
            values,
        };
        push_message(&mut prop.messages, &item.message);

        self.registry.upsert(&item.device, |device| {
            device.light_properties.insert(item.name.clone(), prop);
        });
    }

    fn def_blob(&self, item: DefBlobVector) {
        let mut values = HashMap::new();
        for val in &item.blobs {
            // BLOBs are defined without a payload; value and size stay
            // empty until the first setBLOBVector.
            values.insert(
                val.name.clone(),
                BlobValue {
                    name: val.name.clone(),
                    label: val.label.clone(),
                    value: String::new(),
                    size: 0,
                },
            );
        }

        let mut prop = BlobProperty {
            name: item.name.clone(),
            label: item.label.clone(),
            group: item.group.clone(),
            state: item.state,
            timeout: item.timeout,
            last_updated: Utc::now(),
            messages: Vec::new(),
            permissions: item.perm,
            values,
        };
        push_message(&mut prop.messages, &item.message);

        self.registry.upsert(&item.device, |device| {
            device.blob_properties.insert(item.name.clone(), prop);
        });
    }

    fn set_text(&self, item: SetTextVector) {
        let found = self.registry.modify(&item.device, |device| {
            let Some(prop) = device.text_properties.get_mut(&item.name) else {
                return false;
            };
            if let Some(state) = item.state {
                prop.state = state;
            }
            if let Some(timeout) = item.timeout {
                prop.timeout = timeout;
            }
            prop.last_updated = timestamp_or_now(&item.timestamp);
            for val in &item.texts {
                if let Some(v) = prop.values.get_mut(&val.name) {
                    v.value = val.value.trim().to_string();
                }
            }
            push_message(&mut prop.messages, &item.message);
            true
        });
        warn_if_missing(found, "setTextVector", &item.device, &item.name);
    }

    fn set_number(&self, item: SetNumberVector) {
        let found = self.registry.modify(&item.device, |device| {
            let Some(prop) = device.number_properties.get_mut(&item.name) else {
                return false;
            };
            if let Some(state) = item.state {
                prop.state = state;
            }
            if let Some(timeout) = item.timeout {
                prop.timeout = timeout;
            }
            prop.last_updated = timestamp_or_now(&item.timestamp);
            for val in &item.numbers {
                if let Some(v) = prop.values.get_mut(&val.name) {
                    v.value = val.value.trim().to_string();
                }
            }
            push_message(&mut prop.messages, &item.message);
            true
        });
        warn_if_missing(found, "setNumberVector", &item.device, &item.name);
    }

    fn set_switch(&self, item: SetSwitchVector) {
        let found = self.registry.modify(&item.device, |device| {
            let Some(prop) = device.switch_properties.get_mut(&item.name) else {
                return false;
            };
            if let Some(state) = item.state {
                prop.state = state;
            }
            if let Some(timeout) = item.timeout {
                prop.timeout = timeout;
            }
            prop.last_updated = timestamp_or_now(&item.timestamp);
            for val in &item.switches {
                if let Some(v) = prop.values.get_mut(&val.name) {
                    v.value = val.value;
                }
            }
            push_message(&mut prop.messages, &item.message);
            true
        });
        warn_if_missing(found, "setSwitchVector", &item.device, &item.name);
    }

    fn set_light(&self, item: SetLightVector) {
        let found = self.registry.modify(&item.device, |device| {
            let Some(prop) = device.light_properties.get_mut(&item.name) else {
                return false;
            };
            if let Some(state) = item.state {
                prop.state = state;
            }
            prop.last_updated = timestamp_or_now(&item.timestamp);
            for val in &item.lights {
                if let Some(v) = prop.values.get_mut(&val.name) {
                    v.value = val.value;
                }
            }
            push_message(&mut prop.messages, &item.message);
            true
        });
        warn_if_missing(found, "setLightVector", &item.device, &item.name);
    }

    fn set_blob(&self, item: SetBlobVector) {
        // The copy-modify-store round trip keeps base64 decode and file
        // I/O outside the registry lock.
        let Some(mut device) = self.registry.get(&item.device) else {
            log::warn!("setBLOBVector: could not find device: device={}", item.device);
            return;
        };
        let Some(mut prop) = device.blob_properties.get(&item.name).cloned() else {
            log::warn!(
                "setBLOBVector: could not find property: device={} property={}",
                item.device,
                item.name
            );
            return;
        };

        if let Some(state) = item.state {
            prop.state = state;
        }
        if let Some(timeout) = item.timeout {
            prop.timeout = timeout;
        }
        prop.last_updated = timestamp_or_now(&item.timestamp);

        self.sink.ingest(&item, &mut prop);

        push_message(&mut prop.messages, &item.message);

        device.blob_properties.insert(item.name.clone(), prop);
        self.registry.store(device);
    }

    fn message(&self, item: MessageElement) {
        let found = self.registry.modify(&item.device, |device| {
            device.messages.push(Message {
                timestamp: Utc::now(),
                message: item.message.clone(),
            });
        });
        if found.is_none() {
            log::warn!("message: could not find device: device={}", item.device);
        }
    }

    fn del_property(&self, item: DelProperty) {
        if item.device.is_empty() {
            self.registry.clear();
            return;
        }

        if item.name.is_empty() {
            self.registry.remove(&item.device);
            return;
        }

        // Property-level delete removes the name from all five kind
        // maps; an unknown device or name is a no-op.
        self.registry.modify(&item.device, |device| {
            device.text_properties.remove(&item.name);
            device.number_properties.remove(&item.name);
            device.switch_properties.remove(&item.name);
            device.light_properties.remove(&item.name);
            device.blob_properties.remove(&item.name);
        });
    }
}

fn warn_if_missing(found: Option<bool>, kind: &str, device: &str, property: &str) {
    match found {
        None => log::warn!("{}: could not find device: device={}", kind, device),
        Some(false) => log::warn!(
            "{}: could not find property: device={} property={}",
            kind,
            device,
            property
        ),
        Some(true) => {}
    }
}

fn push_message(messages: &mut Vec<Message>, text: &str) {
    if !text.is_empty() {
        messages.push(Message {
            timestamp: Utc::now(),
            message: text.to_string(),
        });
    }
}

/// Parse an INDI timestamp (`YYYY-MM-DDTHH:MM:SS[.f]`, UTC, any
/// fractional precision). Absence or a parse failure falls back to the
/// current wall clock with a warning.
fn timestamp_or_now(timestamp: &str) -> DateTime<Utc> {
    if timestamp.is_empty() {
        return Utc::now();
    }
    match NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S%.f") {
        Ok(naive) => naive.and_utc(),
        Err(e) => {
            log::warn!("could not parse timestamp {:?}: {}", timestamp, e);
            Utc::now()
        }
    }
}
