//! Client library for the INDI protocol, version 1.7.
//!
//! INDI (Instrument-Neutral Distributed Interface) is an XML-over-TCP
//! protocol for controlling astronomical instruments (cameras, mounts,
//! focusers) through an `indiserver`. This crate keeps a live model of
//! every device the server advertises, lets the embedding application
//! inspect and mutate that model, and demultiplexes the server's BLOB
//! stream (typically FITS images) into files and live byte streams while
//! the same connection continues to carry control traffic.
//!
//! One of the awesome, but sometimes infuriating features of the INDI
//! protocol is that a device that receives a command it doesn't understand
//! is under no obligation to respond, and usually won't. This library
//! checks the parameters of every call against the device model and
//! returns an error up front if something doesn't look right.
//!
//! See <http://indilib.org/develop/developer-manual/106-client-development.html>
//! and <http://www.clearskyinstitute.com/INDI/INDI.pdf>.

pub mod blob;
pub mod client;
pub mod devices;
pub mod dispatch;
pub mod error;
pub mod fs;
pub mod pipe;
pub mod registry;
pub mod transport;
pub mod wire;

// Re-export commonly used types
pub use client::IndiClient;
pub use devices::Device;
pub use error::{Error, Result};
pub use wire::model::{
    BlobEnable, PropertyPermission, PropertyState, SwitchRule, SwitchState,
};
