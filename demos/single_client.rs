//! Control a camera through a local indiserver on one connection:
//! discover devices, connect the CCD, take an exposure, fetch the
//! resulting FITS image.
//!
//! Run an indiserver first, e.g.:
//!   indiserver -v indi_simulator_ccd
//!   cargo run --example single_client

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

    let client = IndiClient::new(Box::new(TcpDialer), Arc::new(DiskFs), 10);

    client.connect("tcp", "localhost:7624")?;
    client.get_properties("", "")?;

    // Wait for the server to send the device definitions.
    thread::sleep(Duration::from_secs(2));

    for device in client.devices() {
        println!("{} (groups: {:?})", device.name, device.groups());
    }

    // Connect the camera and ask for its images on this connection.
    client.set_switch_value(CAMERA, "CONNECTION", "CONNECT", SwitchState::On)?;
    thread::sleep(Duration::from_secs(2));
    client.enable_blob(CAMERA, "CCD1", BlobEnable::Also)?;

    // Take a 5 second exposure and wait for it to transfer.
    client.set_number_value(CAMERA, "CCD_EXPOSURE", "CCD_EXPOSURE_VALUE", "5")?;
    thread::sleep(Duration::from_secs(7));

    let (mut reader, file_name, size) = client.get_blob(CAMERA, "CCD1", "CCD1")?;
    let mut image = Vec::new();
    reader.read_to_end(&mut image)?;
    println!("{} ({} bytes)", file_name, size);

    client.disconnect()
}
