//! Serialization of outbound commands.
//!
//! Commands are rendered as bare elements with explicit end tags and no
//! XML declaration, matching what `indiserver` expects on the wire:
//! `<getProperties version="1.7"></getProperties>`.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use super::model::*;
use crate::error::Result;

/// Serialize one command to its wire bytes.
pub fn serialize_command(cmd: &Command) -> Result<Vec<u8>> {
    let mut writer = Writer::new(Vec::new());

    match cmd {
        Command::GetProperties(c) => {
            let mut start = BytesStart::new("getProperties");
            start.push_attribute(("version", c.version.as_str()));
            if !c.device.is_empty() {
                start.push_attribute(("device", c.device.as_str()));
            }
            if !c.name.is_empty() {
                start.push_attribute(("name", c.name.as_str()));
            }
            writer.write_event(Event::Start(start))?;
            writer.write_event(Event::End(BytesEnd::new("getProperties")))?;
        }
        Command::EnableBlob(c) => {
            let mut start = BytesStart::new("enableBLOB");
            start.push_attribute(("device", c.device.as_str()));
            start.push_attribute(("name", c.name.as_str()));
            writer.write_event(Event::Start(start))?;
            writer.write_event(Event::Text(BytesText::new(c.value.as_str())))?;
            writer.write_event(Event::End(BytesEnd::new("enableBLOB")))?;
        }
        Command::NewText(c) => {
            write_vector(&mut writer, "newTextVector", &c.device, &c.name, &c.timestamp, |w| {
                for text in &c.texts {
                    write_value(w, "oneText", &[("name", &text.name)], &text.value)?;
                }
                Ok(())
            })?;
        }
        Command::NewNumber(c) => {
            write_vector(&mut writer, "newNumberVector", &c.device, &c.name, &c.timestamp, |w| {
                for number in &c.numbers {
                    write_value(w, "oneNumber", &[("name", &number.name)], &number.value)?;
                }
                Ok(())
            })?;
        }
        Command::NewSwitch(c) => {
            write_vector(&mut writer, "newSwitchVector", &c.device, &c.name, &c.timestamp, |w| {
                for switch in &c.switches {
                    write_value(w, "oneSwitch", &[("name", &switch.name)], switch.value.as_str())?;
                }
                Ok(())
            })?;
        }
        Command::NewBlob(c) => {
            write_vector(&mut writer, "newBLOBVector", &c.device, &c.name, &c.timestamp, |w| {
                for blob in &c.blobs {
                    let size = blob.size.to_string();
                    write_value(
                        w,
                        "oneBLOB",
                        &[
                            ("name", blob.name.as_str()),
                            ("size", size.as_str()),
                            ("format", blob.format.as_str()),
                        ],
                        &blob.value,
                    )?;
                }
                Ok(())
            })?;
        }
    }

    Ok(writer.into_inner())
}

/// Write a `new*Vector` envelope: device and name attributes, timestamp
/// only when set, then the member values.
fn write_vector<F>(
    writer: &mut Writer<Vec<u8>>,
    tag: &str,
    device: &str,
    name: &str,
    timestamp: &str,
    body: F,
) -> Result<()>
where
    F: FnOnce(&mut Writer<Vec<u8>>) -> Result<()>,
{
    let mut start = BytesStart::new(tag);
    start.push_attribute(("device", device));
    start.push_attribute(("name", name));
    if !timestamp.is_empty() {
        start.push_attribute(("timestamp", timestamp));
    }
    writer.write_event(Event::Start(start))?;
    body(writer)?;
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

fn write_value(
    writer: &mut Writer<Vec<u8>>,
    tag: &str,
    attrs: &[(&str, &str)],
    value: &str,
) -> Result<()> {
    let mut start = BytesStart::new(tag);
    for (key, val) in attrs {
        start.push_attribute((*key, *val));
    }
    writer.write_event(Event::Start(start))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(cmd: Command) -> String {
        String::from_utf8(serialize_command(&cmd).unwrap()).unwrap()
    }

    #[test]
    fn test_get_properties_unscoped() {
        let out = bytes(Command::GetProperties(GetProperties {
            version: "1.7".to_string(),
            device: String::new(),
            name: String::new(),
        }));
        assert_eq!(out, r#"<getProperties version="1.7"></getProperties>"#);
    }

    #[test]
    fn test_get_properties_scoped() {
        let out = bytes(Command::GetProperties(GetProperties {
            version: "1.7".to_string(),
            device: "Camera".to_string(),
            name: "CCD1".to_string(),
        }));
        assert_eq!(
            out,
            r#"<getProperties version="1.7" device="Camera" name="CCD1"></getProperties>"#
        );
    }

    #[test]
    fn test_enable_blob() {
        let out = bytes(Command::EnableBlob(EnableBlobCommand {
            device: "device1".to_string(),
            name: String::new(),
            value: BlobEnable::Also,
        }));
        assert_eq!(out, r#"<enableBLOB device="device1" name="">Also</enableBLOB>"#);
    }

    #[test]
    fn test_new_switch_vector() {
        let out = bytes(Command::NewSwitch(NewSwitchVector {
            device: "Camera".to_string(),
            name: "CONNECTION".to_string(),
            timestamp: String::new(),
            switches: vec![OneSwitch {
                name: "CONNECT".to_string(),
                value: SwitchState::On,
            }],
        }));
        assert_eq!(
            out,
            r#"<newSwitchVector device="Camera" name="CONNECTION"><oneSwitch name="CONNECT">On</oneSwitch></newSwitchVector>"#
        );
    }

    #[test]
    fn test_new_text_vector_escapes() {
        let out = bytes(Command::NewText(NewTextVector {
            device: "Camera".to_string(),
            name: "INFO".to_string(),
            timestamp: String::new(),
            texts: vec![OneText {
                name: "NOTE".to_string(),
                value: "a < b & c".to_string(),
            }],
        }));
        assert_eq!(
            out,
            r#"<newTextVector device="Camera" name="INFO"><oneText name="NOTE">a &lt; b &amp; c</oneText></newTextVector>"#
        );
    }

    #[test]
    fn test_new_blob_vector() {
        let out = bytes(Command::NewBlob(NewBlobVector {
            device: "Camera".to_string(),
            name: "CCD1".to_string(),
            timestamp: String::new(),
            blobs: vec![OneBlob {
                name: "CCD1".to_string(),
                size: 10,
                format: ".fits".to_string(),
                value: "MTIzNDU2Nzg5MA==".to_string(),
            }],
        }));
        assert_eq!(
            out,
            r#"<newBLOBVector device="Camera" name="CCD1"><oneBLOB name="CCD1" size="10" format=".fits">MTIzNDU2Nzg5MA==</oneBLOB></newBLOBVector>"#
        );
    }
}
