//! Typed representations of the INDI 1.7 protocol elements.
//!
//! The protocol is a closed set of element kinds. The server sends
//! `def*Vector` (property definitions), `set*Vector` (value updates),
//! `message` and `delProperty`; the client sends `getProperties`,
//! `enableBLOB` and `new*Vector` commands. Each kind is modeled as a
//! struct carrying its attributes and repeated inner-value children,
//! grouped into the [`ServerElement`] and [`Command`] enums.
//!
//! Enumeration literals are validated at the decode/encode boundary:
//! `FromStr` rejects anything outside the wire alphabet.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Current state of a property, recommended for traffic-light display:
/// Idle = gray, Ok = green, Busy = yellow, Alert = red.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyState {
    Idle,
    Ok,
    Busy,
    Alert,
}

impl PropertyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyState::Idle => "Idle",
            PropertyState::Ok => "Ok",
            PropertyState::Busy => "Busy",
            PropertyState::Alert => "Alert",
        }
    }
}

impl FromStr for PropertyState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "Idle" => Ok(PropertyState::Idle),
            "Ok" => Ok(PropertyState::Ok),
            "Busy" => Ok(PropertyState::Busy),
            "Alert" => Ok(PropertyState::Alert),
            other => Err(Error::Parse(format!("unknown property state: {other:?}"))),
        }
    }
}

impl fmt::Display for PropertyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a single switch value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwitchState {
    On,
    Off,
}

impl SwitchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchState::On => "On",
            SwitchState::Off => "Off",
        }
    }
}

impl FromStr for SwitchState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "On" => Ok(SwitchState::On),
            "Off" => Ok(SwitchState::Off),
            other => Err(Error::Parse(format!("unknown switch state: {other:?}"))),
        }
    }
}

impl fmt::Display for SwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cardinality hint for the switches in a vector. Rules are implemented
/// wholly within the device; the client only records the hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwitchRule {
    OneOfMany,
    AtMostOne,
    AnyOfMany,
}

impl SwitchRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchRule::OneOfMany => "OneOfMany",
            SwitchRule::AtMostOne => "AtMostOne",
            SwitchRule::AnyOfMany => "AnyOfMany",
        }
    }
}

impl FromStr for SwitchRule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "OneOfMany" => Ok(SwitchRule::OneOfMany),
            "AtMostOne" => Ok(SwitchRule::AtMostOne),
            "AnyOfMany" => Ok(SwitchRule::AnyOfMany),
            other => Err(Error::Parse(format!("unknown switch rule: {other:?}"))),
        }
    }
}

/// Permission hint for the client: `ro`, `wo` or `rw`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyPermission {
    #[serde(rename = "ro")]
    ReadOnly,
    #[serde(rename = "wo")]
    WriteOnly,
    #[serde(rename = "rw")]
    ReadWrite,
}

impl PropertyPermission {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyPermission::ReadOnly => "ro",
            PropertyPermission::WriteOnly => "wo",
            PropertyPermission::ReadWrite => "rw",
        }
    }
}

impl FromStr for PropertyPermission {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "ro" => Ok(PropertyPermission::ReadOnly),
            "wo" => Ok(PropertyPermission::WriteOnly),
            "rw" => Ok(PropertyPermission::ReadWrite),
            other => Err(Error::Parse(format!("unknown permission: {other:?}"))),
        }
    }
}

/// Whether the server should send BLOBs on this connection: turned off
/// completely with `Never` (the default), intermixed with other traffic
/// with `Also`, or made the only traffic with `Only`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlobEnable {
    Never,
    Also,
    Only,
}

impl BlobEnable {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlobEnable::Never => "Never",
            BlobEnable::Also => "Also",
            BlobEnable::Only => "Only",
        }
    }
}

impl FromStr for BlobEnable {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "Never" => Ok(BlobEnable::Never),
            "Also" => Ok(BlobEnable::Also),
            "Only" => Ok(BlobEnable::Only),
            other => Err(Error::InvalidBlobEnable(other.to_string())),
        }
    }
}

impl fmt::Display for BlobEnable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Inbound elements (server → client)
// ============================================================================

/// Define a property that holds one or more text elements.
#[derive(Debug, Clone, PartialEq)]
pub struct DefTextVector {
    pub device: String,
    pub name: String,
    pub label: String,
    pub group: String,
    pub state: PropertyState,
    pub perm: PropertyPermission,
    pub timeout: i32,
    pub timestamp: String,
    pub message: String,
    pub texts: Vec<DefText>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DefText {
    pub name: String,
    pub label: String,
    pub value: String,
}

/// Define a property that holds one or more numeric values. Numeric
/// fields stay strings to preserve the server's formatting.
#[derive(Debug, Clone, PartialEq)]
pub struct DefNumberVector {
    pub device: String,
    pub name: String,
    pub label: String,
    pub group: String,
    pub state: PropertyState,
    pub perm: PropertyPermission,
    pub timeout: i32,
    pub timestamp: String,
    pub message: String,
    pub numbers: Vec<DefNumber>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DefNumber {
    pub name: String,
    pub label: String,
    pub format: String,
    pub min: String,
    pub max: String,
    pub step: String,
    pub value: String,
}

/// Define a collection of switches.
#[derive(Debug, Clone, PartialEq)]
pub struct DefSwitchVector {
    pub device: String,
    pub name: String,
    pub label: String,
    pub group: String,
    pub state: PropertyState,
    pub perm: PropertyPermission,
    pub rule: SwitchRule,
    pub timeout: i32,
    pub timestamp: String,
    pub message: String,
    pub switches: Vec<DefSwitch>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DefSwitch {
    pub name: String,
    pub label: String,
    pub value: SwitchState,
}

/// Define a collection of passive indicator lights. Lights are
/// implicitly read-only and carry no permission or timeout.
#[derive(Debug, Clone, PartialEq)]
pub struct DefLightVector {
    pub device: String,
    pub name: String,
    pub label: String,
    pub group: String,
    pub state: PropertyState,
    pub timestamp: String,
    pub message: String,
    pub lights: Vec<DefLight>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DefLight {
    pub name: String,
    pub label: String,
    pub value: PropertyState,
}

/// Define a property that holds one or more BLOBs. Unlike the other
/// definitions, members carry no initial value; payloads arrive later
/// via `setBLOBVector`.
#[derive(Debug, Clone, PartialEq)]
pub struct DefBlobVector {
    pub device: String,
    pub name: String,
    pub label: String,
    pub group: String,
    pub state: PropertyState,
    pub perm: PropertyPermission,
    pub timeout: i32,
    pub timestamp: String,
    pub message: String,
    pub blobs: Vec<DefBlob>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DefBlob {
    pub name: String,
    pub label: String,
}

/// New values for a Text vector, with optional new state and timeout.
#[derive(Debug, Clone, PartialEq)]
pub struct SetTextVector {
    pub device: String,
    pub name: String,
    pub state: Option<PropertyState>,
    pub timeout: Option<i32>,
    pub timestamp: String,
    pub message: String,
    pub texts: Vec<OneText>,
}

/// New values for a Number vector.
#[derive(Debug, Clone, PartialEq)]
pub struct SetNumberVector {
    pub device: String,
    pub name: String,
    pub state: Option<PropertyState>,
    pub timeout: Option<i32>,
    pub timestamp: String,
    pub message: String,
    pub numbers: Vec<OneNumber>,
}

/// New values for a Switch vector.
#[derive(Debug, Clone, PartialEq)]
pub struct SetSwitchVector {
    pub device: String,
    pub name: String,
    pub state: Option<PropertyState>,
    pub timeout: Option<i32>,
    pub timestamp: String,
    pub message: String,
    pub switches: Vec<OneSwitch>,
}

/// New values for a Light vector. Lights have no timeout.
#[derive(Debug, Clone, PartialEq)]
pub struct SetLightVector {
    pub device: String,
    pub name: String,
    pub state: Option<PropertyState>,
    pub timestamp: String,
    pub message: String,
    pub lights: Vec<OneLight>,
}

/// New values for a BLOB vector. Each member carries a base64 payload.
#[derive(Debug, Clone, PartialEq)]
pub struct SetBlobVector {
    pub device: String,
    pub name: String,
    pub state: Option<PropertyState>,
    pub timeout: Option<i32>,
    pub timestamp: String,
    pub message: String,
    pub blobs: Vec<OneBlob>,
}

/// One member of a Text vector.
#[derive(Debug, Clone, PartialEq)]
pub struct OneText {
    pub name: String,
    pub value: String,
}

/// One member of a Number vector.
#[derive(Debug, Clone, PartialEq)]
pub struct OneNumber {
    pub name: String,
    pub value: String,
}

/// One member of a Switch vector.
#[derive(Debug, Clone, PartialEq)]
pub struct OneSwitch {
    pub name: String,
    pub value: SwitchState,
}

/// State of one member of a Light vector.
#[derive(Debug, Clone, PartialEq)]
pub struct OneLight {
    pub name: String,
    pub value: PropertyState,
}

/// One member of a BLOB vector. The character data is always base64
/// (standard alphabet). `format` is a chain of dot-prefixed file name
/// suffixes (e.g. `.fits.z`); `size` is the byte count after decoding
/// and any implied decompression.
#[derive(Debug, Clone, PartialEq)]
pub struct OneBlob {
    pub name: String,
    pub size: i64,
    pub format: String,
    pub value: String,
}

/// A message associated with a device or the entire system.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageElement {
    pub device: String,
    pub timestamp: String,
    pub message: String,
}

/// Delete the given property, the entire device if no property is
/// specified, or every device if no device is specified.
#[derive(Debug, Clone, PartialEq)]
pub struct DelProperty {
    pub device: String,
    pub name: String,
    pub timestamp: String,
    pub message: String,
}

/// An element received from the server, ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerElement {
    DefText(DefTextVector),
    DefNumber(DefNumberVector),
    DefSwitch(DefSwitchVector),
    DefLight(DefLightVector),
    DefBlob(DefBlobVector),
    SetText(SetTextVector),
    SetNumber(SetNumberVector),
    SetSwitch(SetSwitchVector),
    SetLight(SetLightVector),
    SetBlob(SetBlobVector),
    Message(MessageElement),
    DelProperty(DelProperty),
}

impl ServerElement {
    /// Wire name of the element, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerElement::DefText(_) => "defTextVector",
            ServerElement::DefNumber(_) => "defNumberVector",
            ServerElement::DefSwitch(_) => "defSwitchVector",
            ServerElement::DefLight(_) => "defLightVector",
            ServerElement::DefBlob(_) => "defBLOBVector",
            ServerElement::SetText(_) => "setTextVector",
            ServerElement::SetNumber(_) => "setNumberVector",
            ServerElement::SetSwitch(_) => "setSwitchVector",
            ServerElement::SetLight(_) => "setLightVector",
            ServerElement::SetBlob(_) => "setBLOBVector",
            ServerElement::Message(_) => "message",
            ServerElement::DelProperty(_) => "delProperty",
        }
    }
}

// ============================================================================
// Outbound commands (client → server)
// ============================================================================

/// Ask the server for property definitions, optionally scoped to a
/// device and/or property name.
#[derive(Debug, Clone, PartialEq)]
pub struct GetProperties {
    pub version: String,
    pub device: String,
    pub name: String,
}

/// Control whether BLOBs are sent on this connection.
#[derive(Debug, Clone, PartialEq)]
pub struct EnableBlobCommand {
    pub device: String,
    pub name: String,
    pub value: BlobEnable,
}

/// Inform the device of new target values for a Text property. After
/// sending, the client sets its local state for the property to Busy and
/// leaves it to the device to change it when it sees fit.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTextVector {
    pub device: String,
    pub name: String,
    pub timestamp: String,
    pub texts: Vec<OneText>,
}

/// Inform the device of new target values for a Number property.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNumberVector {
    pub device: String,
    pub name: String,
    pub timestamp: String,
    pub numbers: Vec<OneNumber>,
}

/// Inform the device of new target values for a Switch property.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSwitchVector {
    pub device: String,
    pub name: String,
    pub timestamp: String,
    pub switches: Vec<OneSwitch>,
}

/// Inform the device of new target values for a BLOB property.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBlobVector {
    pub device: String,
    pub name: String,
    pub timestamp: String,
    pub blobs: Vec<OneBlob>,
}

/// A command queued for transmission to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    GetProperties(GetProperties),
    EnableBlob(EnableBlobCommand),
    NewText(NewTextVector),
    NewNumber(NewNumberVector),
    NewSwitch(NewSwitchVector),
    NewBlob(NewBlobVector),
}

impl Command {
    /// Wire name of the command, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::GetProperties(_) => "getProperties",
            Command::EnableBlob(_) => "enableBLOB",
            Command::NewText(_) => "newTextVector",
            Command::NewNumber(_) => "newNumberVector",
            Command::NewSwitch(_) => "newSwitchVector",
            Command::NewBlob(_) => "newBLOBVector",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_round_trip() {
        for s in ["Idle", "Ok", "Busy", "Alert"] {
            assert_eq!(s.parse::<PropertyState>().unwrap().as_str(), s);
        }
        for s in ["On", "Off"] {
            assert_eq!(s.parse::<SwitchState>().unwrap().as_str(), s);
        }
        for s in ["OneOfMany", "AtMostOne", "AnyOfMany"] {
            assert_eq!(s.parse::<SwitchRule>().unwrap().as_str(), s);
        }
        for s in ["ro", "wo", "rw"] {
            assert_eq!(s.parse::<PropertyPermission>().unwrap().as_str(), s);
        }
        for s in ["Never", "Also", "Only"] {
            assert_eq!(s.parse::<BlobEnable>().unwrap().as_str(), s);
        }
    }

    #[test]
    fn test_unknown_literals_rejected() {
        assert!("busy".parse::<PropertyState>().is_err());
        assert!("ON".parse::<SwitchState>().is_err());
        assert!("r".parse::<PropertyPermission>().is_err());
    }

    #[test]
    fn test_invalid_blob_enable_error_kind() {
        let err = "bogus".parse::<BlobEnable>().unwrap_err();
        assert!(matches!(err, Error::InvalidBlobEnable(v) if v == "bogus"));
    }
}
