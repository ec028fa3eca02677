//! Error types for the INDI client
//!
//! # Error Recovery Strategies
//!
//! ## Caller Errors (Fix the Call)
//!
//! - **`DeviceNotFound`**, **`PropertyNotFound`**, **`PropertyValueNotFound`**:
//!   the device model does not (yet) contain the named item. Either the name
//!   is wrong, or the server has not sent the definition yet. Issue
//!   `get_properties` and retry once the model is populated.
//!
//! - **`PropertyReadOnly`**: the property's permission is `ro`. The server
//!   would silently ignore the command, so it is rejected client-side.
//!
//! - **`PropertyWithoutDevice`**: `get_properties` was scoped to a property
//!   name without a device name, which the protocol does not allow.
//!
//! - **`InvalidBlobEnable`**: a BLOB-enable literal outside
//!   {Never, Also, Only}.
//!
//! ## Connection Errors (Reconnect)
//!
//! - **`NotConnected`**: a command was issued with no live connection.
//! - **`ConnectionClosed`**: the connection went away while a command was
//!   being enqueued. The client has already torn down its workers.
//! - **`Io`**: transport or filesystem error. The dialer's error surfaces
//!   verbatim from `connect`.
//!
//! ## Protocol Errors (Log and Continue)
//!
//! - **`Xml`** / **`Parse`**: a malformed element or unknown enumeration
//!   literal. Inside the worker loops these are logged and the offending
//!   element is dropped; they only surface to callers from serialization
//!   entry points.

use thiserror::Error;

/// Errors that can occur in the INDI client.
///
/// See module-level documentation for recovery strategies.
#[derive(Error, Debug)]
pub enum Error {
    #[error("device not found")]
    DeviceNotFound,

    #[error("property not found")]
    PropertyNotFound,

    #[error("property value not found")]
    PropertyValueNotFound,

    #[error("property read only")]
    PropertyReadOnly,

    #[error("property specified without device")]
    PropertyWithoutDevice,

    #[error("invalid BlobEnable value: {0}")]
    InvalidBlobEnable(String),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, Error>;
