//! Client façade for a live INDI connection.
//!
//! [`IndiClient`] owns the connection lifecycle. While connected, three
//! named workers run per connection:
//!
//! 1. `indi-reader`: sole consumer of the socket's read half, sole
//!    producer into the bounded inbound queue. Backpressure on the
//!    queue blocks the reader, which throttles the server through the
//!    kernel socket buffer.
//! 2. `indi-dispatch`: sole consumer of the inbound queue; mutates the
//!    registry and drives the BLOB sink.
//! 3. `indi-writer`: sole consumer of the outbound queue, sole
//!    producer into the socket's write half.
//!
//! Callers never touch the socket: queries read registry snapshots and
//! mutations enqueue commands. Every mutation is validated against the
//! device model before anything is enqueued, because an INDI device
//! that receives a command it doesn't understand is under no obligation
//! to respond, and usually won't.
//!
//! `disconnect` is the only cancellation primitive: it clears the
//! registry, shuts the socket down (the reader sees EOF) and closes the
//! outbound queue (the writer drains and exits). EOF from the server
//! triggers the same teardown from inside the reader.

use std::io::{BufReader, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::blob::{stream_key, BlobStreams};
use crate::devices::Device;
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::fs::BlobFs;
use crate::pipe::PipeReader;
use crate::registry::DeviceRegistry;
use crate::transport::{Connection, Dialer};
use crate::wire::model::*;
use crate::wire::{serialize_command, ElementReader, ServerElement};

/// A client connection to an `indiserver`.
///
/// Construct with [`IndiClient::new`], then [`connect`](Self::connect)
/// and issue [`get_properties`](Self::get_properties) to populate the
/// device model.
pub struct IndiClient {
    dialer: Box<dyn Dialer>,
    fs: Arc<dyn BlobFs>,
    buffer_size: usize,

    registry: Arc<DeviceRegistry>,
    streams: Arc<BlobStreams>,

    link: Arc<Link>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Shared connection state, reachable from the reader worker so EOF can
/// tear the connection down without going through the façade.
struct Link {
    conn: Mutex<Option<Box<dyn Connection>>>,
    outbound: Mutex<Option<Sender<Command>>>,
}

impl Link {
    /// Drop the connection and the outbound sender. Idempotent.
    fn teardown(&self) {
        let conn = self.conn.lock().take();
        self.outbound.lock().take();

        if let Some(conn) = conn {
            if let Err(e) = conn.shutdown() {
                log::warn!("error shutting down connection: {}", e);
            }
        }
    }
}

impl IndiClient {
    /// Create a client. `buffer_size` is the capacity of the inbound
    /// and outbound queues allocated per connection.
    pub fn new(dialer: Box<dyn Dialer>, fs: Arc<dyn BlobFs>, buffer_size: usize) -> Self {
        IndiClient {
            dialer,
            fs,
            buffer_size,
            registry: Arc::new(DeviceRegistry::new()),
            streams: Arc::new(BlobStreams::new()),
            link: Arc::new(Link {
                conn: Mutex::new(None),
                outbound: Mutex::new(None),
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Dial the server and start the connection workers.
    ///
    /// The device model is cleared; issue
    /// [`get_properties`](Self::get_properties) to repopulate it. Fails
    /// with the dialer's error verbatim. An existing connection is torn
    /// down first.
    pub fn connect(&self, network: &str, address: &str) -> Result<()> {
        let conn = self.dialer.dial(network, address)?;

        self.disconnect()?;
        self.registry.clear();

        let (in_tx, in_rx) = bounded::<ServerElement>(self.buffer_size);
        let (out_tx, out_rx) = bounded::<Command>(self.buffer_size);

        let read_half = conn.try_clone()?;
        let write_half = conn.try_clone()?;

        *self.link.conn.lock() = Some(conn);
        *self.link.outbound.lock() = Some(out_tx);

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.fs),
            Arc::clone(&self.streams),
        );

        let link = Arc::clone(&self.link);
        let registry = Arc::clone(&self.registry);
        let reader = thread::Builder::new()
            .name("indi-reader".to_string())
            .spawn(move || reader_loop(read_half, in_tx, link, registry))?;

        let dispatch = thread::Builder::new()
            .name("indi-dispatch".to_string())
            .spawn(move || dispatcher.run(in_rx))?;

        let writer = thread::Builder::new()
            .name("indi-writer".to_string())
            .spawn(move || writer_loop(write_half, out_rx))?;

        let mut workers = self.workers.lock();
        workers.push(reader);
        workers.push(dispatch);
        workers.push(writer);

        log::info!("connected to {} ({})", address, network);
        Ok(())
    }

    /// Clear the device model, close the connection and both queues,
    /// and wait for the workers to exit. Succeeds when not connected.
    pub fn disconnect(&self) -> Result<()> {
        self.registry.clear();
        self.link.teardown();

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in workers {
            if handle.join().is_err() {
                log::error!("connection worker panicked");
            }
        }

        Ok(())
    }

    /// True while a live connection is held.
    pub fn is_connected(&self) -> bool {
        self.link.conn.lock().is_some()
    }

    /// Snapshot of the current device model.
    pub fn devices(&self) -> Vec<Device> {
        self.registry.snapshot()
    }

    /// Ask the server for property definitions. Both names are
    /// optional, but a property name without a device name is invalid.
    pub fn get_properties(&self, device: &str, property: &str) -> Result<()> {
        if !property.is_empty() && device.is_empty() {
            return Err(Error::PropertyWithoutDevice);
        }

        self.enqueue(Command::GetProperties(GetProperties {
            version: "1.7".to_string(),
            device: device.to_string(),
            name: property.to_string(),
        }))
    }

    /// Enable or disable BLOB traffic for a device (and optionally one
    /// property) on this connection. BLOBs are off by default; it is
    /// recommended to enable them on a dedicated client and keep the
    /// control connection clear of large transfers.
    pub fn enable_blob(&self, device: &str, property: &str, value: BlobEnable) -> Result<()> {
        if self.registry.get(device).is_none() {
            return Err(Error::DeviceNotFound);
        }

        self.enqueue(Command::EnableBlob(EnableBlobCommand {
            device: device.to_string(),
            name: property.to_string(),
            value,
        }))
    }

    /// Send a new value for one member of a text property.
    pub fn set_text_value(
        &self,
        device: &str,
        property: &str,
        value_name: &str,
        value: &str,
    ) -> Result<()> {
        self.registry
            .modify(device, |d| {
                let prop = d
                    .text_properties
                    .get_mut(property)
                    .ok_or(Error::PropertyNotFound)?;
                if prop.permissions == PropertyPermission::ReadOnly {
                    return Err(Error::PropertyReadOnly);
                }
                if !prop.values.contains_key(value_name) {
                    return Err(Error::PropertyValueNotFound);
                }
                prop.state = PropertyState::Busy;
                Ok(())
            })
            .ok_or(Error::DeviceNotFound)??;

        self.enqueue(Command::NewText(NewTextVector {
            device: device.to_string(),
            name: property.to_string(),
            timestamp: String::new(),
            texts: vec![OneText {
                name: value_name.to_string(),
                value: value.to_string(),
            }],
        }))
    }

    /// Send a new value for one member of a number property. The value
    /// is passed through as formatted by the caller.
    pub fn set_number_value(
        &self,
        device: &str,
        property: &str,
        value_name: &str,
        value: &str,
    ) -> Result<()> {
        self.registry
            .modify(device, |d| {
                let prop = d
                    .number_properties
                    .get_mut(property)
                    .ok_or(Error::PropertyNotFound)?;
                if prop.permissions == PropertyPermission::ReadOnly {
                    return Err(Error::PropertyReadOnly);
                }
                if !prop.values.contains_key(value_name) {
                    return Err(Error::PropertyValueNotFound);
                }
                prop.state = PropertyState::Busy;
                Ok(())
            })
            .ok_or(Error::DeviceNotFound)??;

        self.enqueue(Command::NewNumber(NewNumberVector {
            device: device.to_string(),
            name: property.to_string(),
            timestamp: String::new(),
            numbers: vec![OneNumber {
                name: value_name.to_string(),
                value: value.to_string(),
            }],
        }))
    }

    /// Send a new state for one member of a switch property.
    ///
    /// You will usually set the desired member to `On` and let the
    /// device decide how to switch the other members off.
    pub fn set_switch_value(
        &self,
        device: &str,
        property: &str,
        value_name: &str,
        value: SwitchState,
    ) -> Result<()> {
        self.registry
            .modify(device, |d| {
                let prop = d
                    .switch_properties
                    .get_mut(property)
                    .ok_or(Error::PropertyNotFound)?;
                if prop.permissions == PropertyPermission::ReadOnly {
                    return Err(Error::PropertyReadOnly);
                }
                if !prop.values.contains_key(value_name) {
                    return Err(Error::PropertyValueNotFound);
                }
                prop.state = PropertyState::Busy;
                Ok(())
            })
            .ok_or(Error::DeviceNotFound)??;

        self.enqueue(Command::NewSwitch(NewSwitchVector {
            device: device.to_string(),
            name: property.to_string(),
            timestamp: String::new(),
            switches: vec![OneSwitch {
                name: value_name.to_string(),
                value,
            }],
        }))
    }

    /// Upload a new payload for one member of a BLOB property. `value`
    /// is the base64-encoded payload, `size` the decoded byte count.
    pub fn set_blob_value(
        &self,
        device: &str,
        property: &str,
        value_name: &str,
        value: &str,
        format: &str,
        size: i64,
    ) -> Result<()> {
        self.registry
            .modify(device, |d| {
                let prop = d
                    .blob_properties
                    .get_mut(property)
                    .ok_or(Error::PropertyNotFound)?;
                if prop.permissions == PropertyPermission::ReadOnly {
                    return Err(Error::PropertyReadOnly);
                }
                if !prop.values.contains_key(value_name) {
                    return Err(Error::PropertyValueNotFound);
                }
                prop.state = PropertyState::Busy;
                Ok(())
            })
            .ok_or(Error::DeviceNotFound)??;

        self.enqueue(Command::NewBlob(NewBlobVector {
            device: device.to_string(),
            name: property.to_string(),
            timestamp: String::new(),
            blobs: vec![OneBlob {
                name: value_name.to_string(),
                size,
                format: format.to_string(),
                value: value.to_string(),
            }],
        }))
    }

    /// Open the last-received artifact for a BLOB value. Returns the
    /// reader, the artifact's file basename, and its recorded size.
    /// The caller owns closing the reader.
    pub fn get_blob(
        &self,
        device: &str,
        property: &str,
        value_name: &str,
    ) -> Result<(Box<dyn Read + Send>, String, i64)> {
        let device = self.registry.get(device).ok_or(Error::DeviceNotFound)?;
        let prop = device
            .blob_properties
            .get(property)
            .ok_or(Error::PropertyNotFound)?;
        let value = prop
            .values
            .get(value_name)
            .ok_or(Error::PropertyValueNotFound)?;

        let reader = self.fs.open(&value.value)?;
        let file_name = Path::new(&value.value)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok((reader, file_name, value.size))
    }

    /// Subscribe to the live byte stream of a BLOB value. Every payload
    /// received for it from now on is copied to the returned reader.
    ///
    /// Returns the reader and a subscription id for
    /// [`close_blob_stream`](Self::close_blob_stream). Close the stream
    /// when done: payload delivery to an abandoned reader fails and
    /// truncates that copy.
    pub fn get_blob_stream(
        &self,
        device: &str,
        property: &str,
        value_name: &str,
    ) -> Result<(PipeReader, String)> {
        let found = self.registry.get(device).ok_or(Error::DeviceNotFound)?;
        let prop = found
            .blob_properties
            .get(property)
            .ok_or(Error::PropertyNotFound)?;
        if !prop.values.contains_key(value_name) {
            return Err(Error::PropertyValueNotFound);
        }

        let key = stream_key(device, property, value_name);
        Ok(self.streams.subscribe(&key))
    }

    /// Close a stream opened by [`get_blob_stream`](Self::get_blob_stream).
    /// Closing an already-closed stream succeeds.
    pub fn close_blob_stream(
        &self,
        device: &str,
        property: &str,
        value_name: &str,
        id: &str,
    ) -> Result<()> {
        let found = self.registry.get(device).ok_or(Error::DeviceNotFound)?;
        let prop = found
            .blob_properties
            .get(property)
            .ok_or(Error::PropertyNotFound)?;
        if !prop.values.contains_key(value_name) {
            return Err(Error::PropertyValueNotFound);
        }

        let key = stream_key(device, property, value_name);
        self.streams.close(&key, id);
        Ok(())
    }

    fn enqueue(&self, cmd: Command) -> Result<()> {
        let sender = self.link.outbound.lock().clone();
        match sender {
            Some(tx) => tx.send(cmd).map_err(|_| Error::ConnectionClosed),
            None => Err(Error::NotConnected),
        }
    }
}

impl Drop for IndiClient {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            log::error!("error disconnecting: {}", e);
        }
    }
}

/// Reader worker: decode inbound elements into the inbound queue. EOF
/// or a transport error tears the connection down.
fn reader_loop(
    conn: Box<dyn Connection>,
    inbound: Sender<ServerElement>,
    link: Arc<Link>,
    registry: Arc<DeviceRegistry>,
) {
    let mut reader = ElementReader::new(BufReader::new(conn));

    loop {
        match reader.next_element() {
            Ok(Some(element)) => {
                if inbound.send(element).is_err() {
                    break;
                }
            }
            Ok(None) => {
                log::info!("server closed the connection");
                registry.clear();
                link.teardown();
                break;
            }
            Err(e) => {
                log::warn!("transport error on inbound stream: {}", e);
                registry.clear();
                link.teardown();
                break;
            }
        }
    }

    log::debug!("reader exiting");
}

/// Writer worker: drain the outbound queue onto the socket.
/// Serialization and write errors drop the command and continue.
fn writer_loop(mut conn: Box<dyn Connection>, outbound: Receiver<Command>) {
    for cmd in outbound.iter() {
        let bytes = match serialize_command(&cmd) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("error serializing {}: {}", cmd.kind(), e);
                continue;
            }
        };

        log::debug!("sending command: {}", String::from_utf8_lossy(&bytes));

        if let Err(e) = conn.write_all(&bytes).and_then(|_| conn.flush()) {
            log::error!("error writing {}: {}", cmd.kind(), e);
            continue;
        }
    }

    log::debug!("writer exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemFs;
    use crate::transport::MockDialer;

    fn offline_client() -> IndiClient {
        IndiClient::new(
            Box::new(MockDialer::failing("unused")),
            Arc::new(MemFs::new()),
            5,
        )
    }

    #[test]
    fn test_get_properties_property_without_device() {
        let client = offline_client();
        let err = client.get_properties("", "prop1").unwrap_err();
        assert!(matches!(err, Error::PropertyWithoutDevice));
    }

    #[test]
    fn test_commands_require_connection() {
        let client = offline_client();
        assert!(matches!(
            client.get_properties("", "").unwrap_err(),
            Error::NotConnected
        ));
    }

    #[test]
    fn test_enable_blob_unknown_device() {
        let client = offline_client();
        let err = client.enable_blob("X", "", BlobEnable::Also).unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound));
    }

    #[test]
    fn test_disconnect_without_connect() {
        let client = offline_client();
        client.disconnect().unwrap();
        assert!(!client.is_connected());
    }

    fn blob_client(fs: MemFs) -> IndiClient {
        use crate::devices::{BlobProperty, BlobValue};
        use std::collections::HashMap;

        let client = IndiClient::new(
            Box::new(MockDialer::failing("unused")),
            Arc::new(fs),
            5,
        );

        let mut values = HashMap::new();
        values.insert(
            "blob1".to_string(),
            BlobValue {
                name: "blob1".to_string(),
                label: "label1".to_string(),
                value: "file.fit".to_string(),
                size: 10,
            },
        );
        let mut device = Device::new("device1");
        device.blob_properties.insert(
            "prop1".to_string(),
            BlobProperty {
                name: "prop1".to_string(),
                label: String::new(),
                group: String::new(),
                state: PropertyState::Ok,
                timeout: 0,
                last_updated: chrono::Utc::now(),
                messages: Vec::new(),
                permissions: PropertyPermission::ReadOnly,
                values,
            },
        );
        client.registry.store(device);

        client
    }

    #[test]
    fn test_get_blob_success() {
        let fs = MemFs::new();
        fs.put("file.fit", b"1234567890");
        let client = blob_client(fs);

        let (mut reader, name, size) = client.get_blob("device1", "prop1", "blob1").unwrap();
        assert_eq!(name, "file.fit");
        assert_eq!(size, 10);

        let mut content = Vec::new();
        reader.read_to_end(&mut content).unwrap();
        assert_eq!(content, b"1234567890");
    }

    fn get_blob_err(client: &IndiClient, device: &str, property: &str, value: &str) -> Error {
        match client.get_blob(device, property, value) {
            Ok(_) => panic!("expected get_blob to fail"),
            Err(err) => err,
        }
    }

    #[test]
    fn test_get_blob_lookup_errors() {
        let client = blob_client(MemFs::new());

        assert!(matches!(
            get_blob_err(&client, "nobody", "prop1", "blob1"),
            Error::DeviceNotFound
        ));
        assert!(matches!(
            get_blob_err(&client, "device1", "nope", "blob1"),
            Error::PropertyNotFound
        ));
        assert!(matches!(
            get_blob_err(&client, "device1", "prop1", "nope"),
            Error::PropertyValueNotFound
        ));
    }

    #[test]
    fn test_get_blob_file_open_error_propagates() {
        // registry points at file.fit but the filesystem has nothing
        let client = blob_client(MemFs::new());
        assert!(matches!(
            get_blob_err(&client, "device1", "prop1", "blob1"),
            Error::Io(_)
        ));
    }

    #[test]
    fn test_blob_stream_validation_and_idempotent_close() {
        let client = blob_client(MemFs::new());

        let Err(err) = client.get_blob_stream("device1", "prop1", "nope") else {
            panic!("expected get_blob_stream to fail");
        };
        assert!(matches!(err, Error::PropertyValueNotFound));

        let (_reader, id) = client.get_blob_stream("device1", "prop1", "blob1").unwrap();
        client
            .close_blob_stream("device1", "prop1", "blob1", &id)
            .unwrap();
        client
            .close_blob_stream("device1", "prop1", "blob1", &id)
            .unwrap();
    }

    #[test]
    fn test_set_blob_value_read_only() {
        let client = blob_client(MemFs::new());
        let err = client
            .set_blob_value("device1", "prop1", "blob1", "MTIz", ".fits", 3)
            .unwrap_err();
        assert!(matches!(err, Error::PropertyReadOnly));

        // the rejected mutation must not have marked the property busy
        let device = client.registry.get("device1").unwrap();
        assert_eq!(device.blob_properties["prop1"].state, PropertyState::Ok);
    }
}
