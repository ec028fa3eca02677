//! Transport layer for I/O abstraction.
//!
//! The client never dials on its own: it consumes an already-opened
//! bidirectional byte stream obtained from an injected [`Dialer`]. A
//! [`Connection`] must be cloneable so the reader and writer workers can
//! each own a handle to their half, and must support an out-of-band
//! shutdown that unblocks a reader parked in `read`.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};

use crate::error::{Error, Result};

pub mod mock;
pub use mock::{MockConnection, MockDialer};

/// A live duplex byte stream to the server.
pub trait Connection: Read + Write + Send {
    /// A second handle to the same underlying stream.
    fn try_clone(&self) -> Result<Box<dyn Connection>>;

    /// Close both halves. A reader blocked in `read` observes EOF.
    fn shutdown(&self) -> Result<()>;
}

/// Connects the client to an INDI server.
pub trait Dialer: Send + Sync {
    fn dial(&self, network: &str, address: &str) -> Result<Box<dyn Connection>>;
}

/// [`Dialer`] for plain TCP, the transport `indiserver` listens on
/// (conventionally port 7624).
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

impl Dialer for TcpDialer {
    fn dial(&self, network: &str, address: &str) -> Result<Box<dyn Connection>> {
        if network != "tcp" {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                format!("unsupported network: {network}"),
            )));
        }
        let stream = TcpStream::connect(address)?;
        Ok(Box::new(stream))
    }
}

impl Connection for TcpStream {
    fn try_clone(&self) -> Result<Box<dyn Connection>> {
        Ok(Box::new(TcpStream::try_clone(self)?))
    }

    fn shutdown(&self) -> Result<()> {
        match TcpStream::shutdown(self, Shutdown::Both) {
            Ok(()) => Ok(()),
            // The peer may already have torn the socket down.
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
