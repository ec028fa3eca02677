//! Two-connection setup: a control client for commands and a dedicated
//! BLOB client that receives only image traffic, so large transfers
//! never slow the control channel down.
//!
//! Run an indiserver first, e.g.:
//!   indiserver -v indi_simulator_ccd
//!   cargo run --example blob_client

use std::io::Read;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tara_indi::fs::DiskFs;
use tara_indi::transport::TcpDialer;
use tara_indi::{BlobEnable, IndiClient, SwitchState};

const CAMERA: &str = "CCD Simulator";

fn main() -> tara_indi::Result<()> {
    env_logger::init();

    let control = IndiClient::new(Box::new(TcpDialer), Arc::new(DiskFs), 10);
    control.connect("tcp", "localhost:7624")?;
    control.get_properties("", "")?;
    thread::sleep(Duration::from_secs(2));

    control.set_switch_value(CAMERA, "CONNECTION", "CONNECT", SwitchState::On)?;

    // A second connection that only carries BLOBs for the camera.
    let blobs = IndiClient::new(Box::new(TcpDialer), Arc::new(DiskFs), 10);
    blobs.connect("tcp", "localhost:7624")?;
    blobs.get_properties(CAMERA, "CCD1")?;
    thread::sleep(Duration::from_secs(2));
    blobs.enable_blob(CAMERA, "CCD1", BlobEnable::Only)?;

    // Stream exposures as they arrive.
    let (mut stream, id) = blobs.get_blob_stream(CAMERA, "CCD1", "CCD1")?;
    let pump = thread::spawn(move || {
        let mut chunk = [0u8; 8192];
        let mut total = 0usize;
        while let Ok(n) = stream.read(&mut chunk) {
            if n == 0 {
                break;
            }
            total += n;
        }
        println!("streamed {total} bytes");
    });

    // Commands still go over the control connection.
    control.set_number_value(CAMERA, "CCD_EXPOSURE", "CCD_EXPOSURE_VALUE", "5")?;
    thread::sleep(Duration::from_secs(7));

    blobs.close_blob_stream(CAMERA, "CCD1", "CCD1", &id)?;
    let _ = pump.join();

    blobs.disconnect()?;
    control.disconnect()
}
