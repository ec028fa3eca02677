//! Streaming decoder for the inbound XML element stream.
//!
//! The server sends a never-terminating sequence of top-level elements
//! with no enclosing root and no XML declaration, so there is nothing to
//! hand to a whole-document parser. [`ElementReader`] works on raw
//! events instead: each call to [`ElementReader::next_element`] pulls
//! events until a start tag from the closed inbound set appears, decodes
//! that element (attributes and all descendants) into a typed
//! [`ServerElement`], and returns it. Unknown elements are skipped,
//! malformed ones are dropped with a warning, and the loop resumes with
//! the next token. `Ok(None)` means the stream ended.

use std::collections::HashMap;
use std::io::BufRead;
use std::str::FromStr;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::QName;
use quick_xml::Reader;

use super::model::*;
use crate::error::{Error, Result};

/// Streaming reader producing typed elements from the inbound byte
/// stream.
pub struct ElementReader<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
}

/// A decoded child element: its local name, attributes, and collected
/// character data.
struct Child {
    name: String,
    attrs: HashMap<String, String>,
    text: String,
}

impl<R: BufRead> ElementReader<R> {
    pub fn new(inner: R) -> Self {
        ElementReader {
            reader: Reader::from_reader(inner),
            buf: Vec::with_capacity(4096),
        }
    }

    /// Read the next inbound element.
    ///
    /// Returns `Ok(None)` when the stream has ended. Transport-level
    /// failures surface as `Err`; element-level decode failures are
    /// logged, the element is dropped, and reading continues.
    pub fn next_element(&mut self) -> Result<Option<ServerElement>> {
        loop {
            // Name and attributes are extracted first so the event's
            // borrow of the buffer ends before the element body pulls
            // more events.
            self.buf.clear();
            let opening = match self.reader.read_event_into(&mut self.buf) {
                Ok(Event::Start(start)) => Some((
                    String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
                    parse_attrs(&start),
                    false,
                )),
                Ok(Event::Empty(start)) => Some((
                    String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
                    parse_attrs(&start),
                    true,
                )),
                Ok(Event::Eof) => return Ok(None),
                // Inter-element whitespace, comments, declarations.
                Ok(_) => None,
                Err(quick_xml::Error::Io(e)) => {
                    return Err(Error::Io(std::io::Error::new(e.kind(), e.to_string())));
                }
                Err(e) => {
                    log::warn!("dropping malformed XML: {}", e);
                    None
                }
            };

            let Some((name, attrs, is_empty)) = opening else {
                continue;
            };

            if !is_known_element(&name) {
                log::error!("unknown element: {}", name);
                if !is_empty {
                    self.skip_element(&name)?;
                }
                continue;
            }

            let attrs = match attrs {
                Ok(attrs) => attrs,
                Err(e) => {
                    log::warn!("element {}: bad attributes: {}", name, e);
                    if !is_empty {
                        self.skip_element(&name)?;
                    }
                    continue;
                }
            };

            // The children are consumed before validation so a decode
            // failure leaves the stream aligned on the next top-level
            // token.
            let children = if is_empty {
                Vec::new()
            } else {
                match self.read_children(&name) {
                    Ok(children) => children,
                    Err(e) => {
                        if is_transport_error(&e) {
                            return Err(e);
                        }
                        log::warn!("element {}: {}", name, e);
                        continue;
                    }
                }
            };

            match build_element(&name, &attrs, children) {
                Ok(element) => return Ok(Some(element)),
                Err(e) => {
                    log::warn!("dropping element {}: {}", name, e);
                    continue;
                }
            }
        }
    }

    /// Consume events up to and including the end tag of an element we
    /// are not going to decode.
    fn skip_element(&mut self, name: &str) -> Result<()> {
        let mut sink = Vec::new();
        match self
            .reader
            .read_to_end_into(QName(name.as_bytes()), &mut sink)
        {
            Ok(_) => Ok(()),
            Err(quick_xml::Error::Io(e)) => {
                Err(Error::Io(std::io::Error::new(e.kind(), e.to_string())))
            }
            Err(e) => {
                log::warn!("skipping element {}: {}", name, e);
                Ok(())
            }
        }
    }

    /// Collect the direct children of the element currently open under
    /// `parent`, consuming events up to its end tag.
    fn read_children(&mut self, parent: &str) -> Result<Vec<Child>> {
        let mut children = Vec::new();
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match self.reader.read_event_into(&mut buf)? {
                Event::Start(start) => {
                    let name =
                        String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
                    let attrs = parse_attrs(&start)?;
                    let text = self.read_child_text(&name)?;
                    children.push(Child { name, attrs, text });
                }
                Event::Empty(start) => {
                    let name =
                        String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
                    let attrs = parse_attrs(&start)?;
                    children.push(Child {
                        name,
                        attrs,
                        text: String::new(),
                    });
                }
                Event::End(end) if end.local_name().as_ref() == parent.as_bytes() => break,
                Event::Eof => {
                    return Err(Error::Parse(format!(
                        "stream ended inside <{}>",
                        parent
                    )))
                }
                _ => continue,
            }
        }

        Ok(children)
    }

    /// Collect the character data of a child element up to its end tag.
    fn read_child_text(&mut self, name: &str) -> Result<String> {
        let mut text = String::new();
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match self.reader.read_event_into(&mut buf)? {
                Event::Text(t) => text.push_str(&t.unescape()?),
                Event::CData(c) => {
                    text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
                Event::End(end) if end.local_name().as_ref() == name.as_bytes() => break,
                Event::Start(nested) => {
                    // Value elements have no structure below them.
                    let nested_name = nested.name().as_ref().to_vec();
                    let mut sink = Vec::new();
                    self.reader
                        .read_to_end_into(QName(&nested_name), &mut sink)?;
                }
                Event::Eof => {
                    return Err(Error::Parse(format!("stream ended inside <{}>", name)))
                }
                _ => continue,
            }
        }

        Ok(text)
    }
}

fn is_transport_error(err: &Error) -> bool {
    match err {
        Error::Io(_) => true,
        Error::Xml(quick_xml::Error::Io(_)) => true,
        _ => false,
    }
}

fn is_known_element(name: &str) -> bool {
    matches!(
        name,
        "defTextVector"
            | "defNumberVector"
            | "defSwitchVector"
            | "defLightVector"
            | "defBLOBVector"
            | "setTextVector"
            | "setNumberVector"
            | "setSwitchVector"
            | "setLightVector"
            | "setBLOBVector"
            | "message"
            | "delProperty"
    )
}

fn parse_attrs(start: &BytesStart<'_>) -> Result<HashMap<String, String>> {
    let mut attrs = HashMap::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| Error::Parse(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        attrs.insert(key, value);
    }
    Ok(attrs)
}

fn build_element(
    name: &str,
    attrs: &HashMap<String, String>,
    children: Vec<Child>,
) -> Result<ServerElement> {
    match name {
        "defTextVector" => Ok(ServerElement::DefText(def_text_vector(attrs, children)?)),
        "defNumberVector" => Ok(ServerElement::DefNumber(def_number_vector(
            attrs, children,
        )?)),
        "defSwitchVector" => Ok(ServerElement::DefSwitch(def_switch_vector(
            attrs, children,
        )?)),
        "defLightVector" => Ok(ServerElement::DefLight(def_light_vector(attrs, children)?)),
        "defBLOBVector" => Ok(ServerElement::DefBlob(def_blob_vector(attrs, children)?)),
        "setTextVector" => Ok(ServerElement::SetText(set_text_vector(attrs, children)?)),
        "setNumberVector" => Ok(ServerElement::SetNumber(set_number_vector(
            attrs, children,
        )?)),
        "setSwitchVector" => Ok(ServerElement::SetSwitch(set_switch_vector(
            attrs, children,
        )?)),
        "setLightVector" => Ok(ServerElement::SetLight(set_light_vector(attrs, children)?)),
        "setBLOBVector" => Ok(ServerElement::SetBlob(set_blob_vector(attrs, children)?)),
        "message" => Ok(ServerElement::Message(MessageElement {
            device: attr(attrs, "device"),
            timestamp: attr(attrs, "timestamp"),
            message: attr(attrs, "message"),
        })),
        "delProperty" => Ok(ServerElement::DelProperty(DelProperty {
            device: attr(attrs, "device"),
            name: attr(attrs, "name"),
            timestamp: attr(attrs, "timestamp"),
            message: attr(attrs, "message"),
        })),
        other => Err(Error::Parse(format!("unknown element: {other}"))),
    }
}

// --- attribute accessors ---

fn attr(attrs: &HashMap<String, String>, key: &str) -> String {
    attrs.get(key).cloned().unwrap_or_default()
}

/// A required enumeration attribute. Absence or an unknown literal
/// rejects the element.
fn req_enum<T>(attrs: &HashMap<String, String>, key: &str) -> Result<T>
where
    T: FromStr<Err = Error>,
{
    match attrs.get(key) {
        Some(value) => value.parse(),
        None => Err(Error::Parse(format!("missing attribute {key:?}"))),
    }
}

/// An optional enumeration attribute. Absence means "unchanged"; an
/// unknown literal still rejects the element.
fn opt_enum<T>(attrs: &HashMap<String, String>, key: &str) -> Result<Option<T>>
where
    T: FromStr<Err = Error>,
{
    match attrs.get(key) {
        Some(value) => value.parse().map(Some),
        None => Ok(None),
    }
}

fn attr_i32(attrs: &HashMap<String, String>, key: &str) -> Result<i32> {
    match attrs.get(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| Error::Parse(format!("bad {key} attribute: {value:?}"))),
        None => Ok(0),
    }
}

fn opt_i32(attrs: &HashMap<String, String>, key: &str) -> Result<Option<i32>> {
    match attrs.get(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Parse(format!("bad {key} attribute: {value:?}"))),
        None => Ok(None),
    }
}

fn attr_i64(attrs: &HashMap<String, String>, key: &str) -> Result<i64> {
    match attrs.get(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| Error::Parse(format!("bad {key} attribute: {value:?}"))),
        None => Ok(0),
    }
}

// --- element builders ---

fn def_text_vector(
    attrs: &HashMap<String, String>,
    children: Vec<Child>,
) -> Result<DefTextVector> {
    let mut texts = Vec::new();
    for child in children {
        if child.name == "defText" {
            texts.push(DefText {
                name: attr(&child.attrs, "name"),
                label: attr(&child.attrs, "label"),
                value: child.text,
            });
        }
    }
    Ok(DefTextVector {
        device: attr(attrs, "device"),
        name: attr(attrs, "name"),
        label: attr(attrs, "label"),
        group: attr(attrs, "group"),
        state: req_enum(attrs, "state")?,
        perm: req_enum(attrs, "perm")?,
        timeout: attr_i32(attrs, "timeout")?,
        timestamp: attr(attrs, "timestamp"),
        message: attr(attrs, "message"),
        texts,
    })
}

fn def_number_vector(
    attrs: &HashMap<String, String>,
    children: Vec<Child>,
) -> Result<DefNumberVector> {
    let mut numbers = Vec::new();
    for child in children {
        if child.name == "defNumber" {
            numbers.push(DefNumber {
                name: attr(&child.attrs, "name"),
                label: attr(&child.attrs, "label"),
                format: attr(&child.attrs, "format"),
                min: attr(&child.attrs, "min"),
                max: attr(&child.attrs, "max"),
                step: attr(&child.attrs, "step"),
                value: child.text,
            });
        }
    }
    Ok(DefNumberVector {
        device: attr(attrs, "device"),
        name: attr(attrs, "name"),
        label: attr(attrs, "label"),
        group: attr(attrs, "group"),
        state: req_enum(attrs, "state")?,
        perm: req_enum(attrs, "perm")?,
        timeout: attr_i32(attrs, "timeout")?,
        timestamp: attr(attrs, "timestamp"),
        message: attr(attrs, "message"),
        numbers,
    })
}

fn def_switch_vector(
    attrs: &HashMap<String, String>,
    children: Vec<Child>,
) -> Result<DefSwitchVector> {
    let mut switches = Vec::new();
    for child in children {
        if child.name == "defSwitch" {
            switches.push(DefSwitch {
                name: attr(&child.attrs, "name"),
                label: attr(&child.attrs, "label"),
                value: child.text.trim().parse()?,
            });
        }
    }
    Ok(DefSwitchVector {
        device: attr(attrs, "device"),
        name: attr(attrs, "name"),
        label: attr(attrs, "label"),
        group: attr(attrs, "group"),
        state: req_enum(attrs, "state")?,
        perm: req_enum(attrs, "perm")?,
        rule: req_enum(attrs, "rule")?,
        timeout: attr_i32(attrs, "timeout")?,
        timestamp: attr(attrs, "timestamp"),
        message: attr(attrs, "message"),
        switches,
    })
}

fn def_light_vector(
    attrs: &HashMap<String, String>,
    children: Vec<Child>,
) -> Result<DefLightVector> {
    let mut lights = Vec::new();
    for child in children {
        if child.name == "defLight" {
            lights.push(DefLight {
                name: attr(&child.attrs, "name"),
                label: attr(&child.attrs, "label"),
                value: child.text.trim().parse()?,
            });
        }
    }
    Ok(DefLightVector {
        device: attr(attrs, "device"),
        name: attr(attrs, "name"),
        label: attr(attrs, "label"),
        group: attr(attrs, "group"),
        state: req_enum(attrs, "state")?,
        timestamp: attr(attrs, "timestamp"),
        message: attr(attrs, "message"),
        lights,
    })
}

fn def_blob_vector(
    attrs: &HashMap<String, String>,
    children: Vec<Child>,
) -> Result<DefBlobVector> {
    let mut blobs = Vec::new();
    for child in children {
        if child.name == "defBLOB" {
            blobs.push(DefBlob {
                name: attr(&child.attrs, "name"),
                label: attr(&child.attrs, "label"),
            });
        }
    }
    Ok(DefBlobVector {
        device: attr(attrs, "device"),
        name: attr(attrs, "name"),
        label: attr(attrs, "label"),
        group: attr(attrs, "group"),
        state: req_enum(attrs, "state")?,
        perm: req_enum(attrs, "perm")?,
        timeout: attr_i32(attrs, "timeout")?,
        timestamp: attr(attrs, "timestamp"),
        message: attr(attrs, "message"),
        blobs,
    })
}

fn set_text_vector(
    attrs: &HashMap<String, String>,
    children: Vec<Child>,
) -> Result<SetTextVector> {
    let mut texts = Vec::new();
    for child in children {
        if child.name == "oneText" {
            texts.push(OneText {
                name: attr(&child.attrs, "name"),
                value: child.text,
            });
        }
    }
    Ok(SetTextVector {
        device: attr(attrs, "device"),
        name: attr(attrs, "name"),
        state: opt_enum(attrs, "state")?,
        timeout: opt_i32(attrs, "timeout")?,
        timestamp: attr(attrs, "timestamp"),
        message: attr(attrs, "message"),
        texts,
    })
}

fn set_number_vector(
    attrs: &HashMap<String, String>,
    children: Vec<Child>,
) -> Result<SetNumberVector> {
    let mut numbers = Vec::new();
    for child in children {
        if child.name == "oneNumber" {
            numbers.push(OneNumber {
                name: attr(&child.attrs, "name"),
                value: child.text,
            });
        }
    }
    Ok(SetNumberVector {
        device: attr(attrs, "device"),
        name: attr(attrs, "name"),
        state: opt_enum(attrs, "state")?,
        timeout: opt_i32(attrs, "timeout")?,
        timestamp: attr(attrs, "timestamp"),
        message: attr(attrs, "message"),
        numbers,
    })
}

fn set_switch_vector(
    attrs: &HashMap<String, String>,
    children: Vec<Child>,
) -> Result<SetSwitchVector> {
    let mut switches = Vec::new();
    for child in children {
        if child.name == "oneSwitch" {
            switches.push(OneSwitch {
                name: attr(&child.attrs, "name"),
                value: child.text.trim().parse()?,
            });
        }
    }
    Ok(SetSwitchVector {
        device: attr(attrs, "device"),
        name: attr(attrs, "name"),
        state: opt_enum(attrs, "state")?,
        timeout: opt_i32(attrs, "timeout")?,
        timestamp: attr(attrs, "timestamp"),
        message: attr(attrs, "message"),
        switches,
    })
}

fn set_light_vector(
    attrs: &HashMap<String, String>,
    children: Vec<Child>,
) -> Result<SetLightVector> {
    let mut lights = Vec::new();
    for child in children {
        if child.name == "oneLight" {
            lights.push(OneLight {
                name: attr(&child.attrs, "name"),
                value: child.text.trim().parse()?,
            });
        }
    }
    Ok(SetLightVector {
        device: attr(attrs, "device"),
        name: attr(attrs, "name"),
        state: opt_enum(attrs, "state")?,
        timestamp: attr(attrs, "timestamp"),
        message: attr(attrs, "message"),
        lights,
    })
}

fn set_blob_vector(
    attrs: &HashMap<String, String>,
    children: Vec<Child>,
) -> Result<SetBlobVector> {
    let mut blobs = Vec::new();
    for child in children {
        if child.name == "oneBLOB" {
            blobs.push(OneBlob {
                name: attr(&child.attrs, "name"),
                size: attr_i64(&child.attrs, "size")?,
                format: attr(&child.attrs, "format"),
                value: child.text,
            });
        }
    }
    Ok(SetBlobVector {
        device: attr(attrs, "device"),
        name: attr(attrs, "name"),
        state: opt_enum(attrs, "state")?,
        timeout: opt_i32(attrs, "timeout")?,
        timestamp: attr(attrs, "timestamp"),
        message: attr(attrs, "message"),
        blobs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(xml: &str) -> Vec<ServerElement> {
        let mut reader = ElementReader::new(xml.as_bytes());
        let mut elements = Vec::new();
        while let Some(element) = reader.next_element().unwrap() {
            elements.push(element);
        }
        elements
    }

    #[test]
    fn test_def_switch_vector() {
        let xml = r#"<defSwitchVector device="Camera" name="Binning" rule="OneOfMany" state="Ok" perm="wo" timeout="0"
        label="Binning">
   <defSwitch name="One" label="1:1">Off</defSwitch>
   <defSwitch name="Two" label="2:1">On </defSwitch>
   </defSwitchVector>"#;

        let elements = read_all(xml);
        assert_eq!(elements.len(), 1);
        let ServerElement::DefSwitch(v) = &elements[0] else {
            panic!("expected defSwitchVector, got {}", elements[0].kind());
        };

        assert_eq!(v.device, "Camera");
        assert_eq!(v.name, "Binning");
        assert_eq!(v.label, "Binning");
        assert_eq!(v.rule, SwitchRule::OneOfMany);
        assert_eq!(v.state, PropertyState::Ok);
        assert_eq!(v.perm, PropertyPermission::WriteOnly);
        assert_eq!(v.timeout, 0);
        assert_eq!(v.switches.len(), 2);
        assert_eq!(v.switches[0].name, "One");
        assert_eq!(v.switches[0].label, "1:1");
        assert_eq!(v.switches[0].value, SwitchState::Off);
        assert_eq!(v.switches[1].value, SwitchState::On);
    }

    #[test]
    fn test_def_number_vector_preserves_number_strings() {
        let xml = r#"<defNumberVector device="Camera" name="CCD_EXPOSURE" state="Idle" perm="rw" timeout="60">
   <defNumber name="CCD_EXPOSURE_VALUE" label="Duration (s)" format="%5.2f" min="0.01" max="3600" step="1">1.00</defNumber>
   </defNumberVector>"#;

        let elements = read_all(xml);
        let ServerElement::DefNumber(v) = &elements[0] else {
            panic!("wrong element");
        };
        assert_eq!(v.timeout, 60);
        assert_eq!(v.numbers[0].format, "%5.2f");
        assert_eq!(v.numbers[0].min, "0.01");
        assert_eq!(v.numbers[0].max, "3600");
        assert_eq!(v.numbers[0].value.trim(), "1.00");
    }

    #[test]
    fn test_set_vector_optional_attrs() {
        let xml = r#"<setNumberVector device="Camera" name="CCD_EXPOSURE">
   <oneNumber name="CCD_EXPOSURE_VALUE">5.00</oneNumber>
   </setNumberVector>"#;

        let elements = read_all(xml);
        let ServerElement::SetNumber(v) = &elements[0] else {
            panic!("wrong element");
        };
        assert_eq!(v.state, None);
        assert_eq!(v.timeout, None);
        assert_eq!(v.numbers[0].value.trim(), "5.00");
    }

    #[test]
    fn test_set_blob_vector_payload() {
        let xml = r#"<setBLOBVector device="Camera" name="CCD1" state="Ok" timeout="0" timestamp="2024-03-01T12:00:00">
   <oneBLOB name="CCD1" size="10" format=".fits">
MTIzNDU2Nzg5MA==
</oneBLOB>
   </setBLOBVector>"#;

        let elements = read_all(xml);
        let ServerElement::SetBlob(v) = &elements[0] else {
            panic!("wrong element");
        };
        assert_eq!(v.state, Some(PropertyState::Ok));
        assert_eq!(v.blobs[0].size, 10);
        assert_eq!(v.blobs[0].format, ".fits");
        assert_eq!(v.blobs[0].value.trim(), "MTIzNDU2Nzg5MA==");
    }

    #[test]
    fn test_self_closing_del_property() {
        let xml = r#"<delProperty device="Camera" name="Binning"/>"#;
        let elements = read_all(xml);
        let ServerElement::DelProperty(d) = &elements[0] else {
            panic!("wrong element");
        };
        assert_eq!(d.device, "Camera");
        assert_eq!(d.name, "Binning");
    }

    #[test]
    fn test_unknown_element_skipped() {
        let xml = r#"<pingRequest uid="1"><payload>x</payload></pingRequest>
<message device="Camera" message="hello"/>"#;
        let elements = read_all(xml);
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].kind(), "message");
    }

    #[test]
    fn test_bad_enum_drops_element_and_resumes() {
        let xml = r#"<defSwitchVector device="C" name="P" rule="SomeOfMany" state="Ok" perm="rw">
   <defSwitch name="A">Off</defSwitch>
   </defSwitchVector>
<delProperty device="C"/>"#;
        let elements = read_all(xml);
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].kind(), "delProperty");
    }

    #[test]
    fn test_escaped_attribute_and_text() {
        let xml = r#"<setTextVector device="Scope &amp; Co" name="INFO">
   <oneText name="NOTE">a &lt; b</oneText>
   </setTextVector>"#;
        let elements = read_all(xml);
        let ServerElement::SetText(v) = &elements[0] else {
            panic!("wrong element");
        };
        assert_eq!(v.device, "Scope & Co");
        assert_eq!(v.texts[0].value, "a < b");
    }

    #[test]
    fn test_eof_returns_none() {
        let mut reader = ElementReader::new(&b""[..]);
        assert!(reader.next_element().unwrap().is_none());
    }
}
