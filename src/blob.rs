//! BLOB ingestion and fan-out.
//!
//! Payloads arrive base64-encoded inside `setBLOBVector` elements on the
//! same connection as control traffic. For each member the sink decodes
//! the payload on the fly, writing every byte both to a file in the
//! injected filesystem and to every live stream subscriber registered
//! for that value. The subscriber set is snapshotted at the start of
//! each copy: a subscriber that unsubscribes mid-copy receives a partial
//! payload with no error, and one that subscribes mid-copy receives the
//! next full payload.

use std::collections::HashMap;
use std::io::{self, Cursor, Write};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::read::DecoderReader;
use parking_lot::Mutex;

use crate::devices::BlobProperty;
use crate::fs::BlobFs;
use crate::pipe::{pipe, PipeReader, PipeWriter};
use crate::wire::model::SetBlobVector;

/// Chunks a subscriber pipe can hold before it backpressures the copy
/// feeding it.
const SUBSCRIBER_PIPE_CHUNKS: usize = 64;

/// Fan-out key for one BLOB value.
pub fn stream_key(device: &str, property: &str, value: &str) -> String {
    format!("{device}_{property}_{value}")
}

/// Registry of live BLOB stream subscriptions, keyed by
/// `<device>_<property>_<valueName>` and then by subscription id.
#[derive(Default)]
pub struct BlobStreams {
    streams: Mutex<HashMap<String, HashMap<String, PipeWriter>>>,
}

impl BlobStreams {
    pub fn new() -> Self {
        BlobStreams::default()
    }

    /// Register a new subscriber under `key`. Returns the reader half
    /// and the subscription id used to close it again.
    pub fn subscribe(&self, key: &str) -> (PipeReader, String) {
        let id = format!("{:032x}", rand::random::<u128>());
        let (reader, writer) = pipe(SUBSCRIBER_PIPE_CHUNKS);

        let mut streams = self.streams.lock();
        streams
            .entry(key.to_string())
            .or_default()
            .insert(id.clone(), writer);

        (reader, id)
    }

    /// Close one subscription. Closing an unknown key or id is a no-op,
    /// so double-close is safe.
    pub fn close(&self, key: &str, id: &str) {
        let mut streams = self.streams.lock();
        if let Some(writers) = streams.get_mut(key) {
            writers.remove(id);
            if writers.is_empty() {
                streams.remove(key);
            }
        }
    }

    /// Snapshot of the writers currently subscribed under `key`.
    fn writers(&self, key: &str) -> Vec<PipeWriter> {
        self.streams
            .lock()
            .get(key)
            .map(|writers| writers.values().cloned().collect())
            .unwrap_or_default()
    }
}

/// Decodes inbound BLOB payloads into files and live streams.
pub struct BlobSink {
    fs: Arc<dyn BlobFs>,
    streams: Arc<BlobStreams>,
}

impl BlobSink {
    pub fn new(fs: Arc<dyn BlobFs>, streams: Arc<BlobStreams>) -> Self {
        BlobSink { fs, streams }
    }

    /// Ingest every member of a `setBLOBVector` into `prop`.
    ///
    /// Members whose value name was not introduced by a prior
    /// definition are skipped. A filesystem or copy failure skips the
    /// offending member with a warning and continues with its siblings;
    /// subscribers of a failed copy receive truncated output.
    pub fn ingest(&self, item: &SetBlobVector, prop: &mut BlobProperty) {
        for blob in &item.blobs {
            let Some(value) = prop.values.get_mut(&blob.name) else {
                continue;
            };

            let fname = format!("{}_{}_{}{}", item.device, item.name, blob.name, blob.format);

            let file = match self.fs.create(&fname) {
                Ok(file) => file,
                Err(e) => {
                    log::warn!("could not create blob file {}: {}", fname, e);
                    continue;
                }
            };

            let key = stream_key(&item.device, &item.name, &blob.name);
            let mut writers: Vec<Box<dyn Write + Send>> = self
                .streams
                .writers(&key)
                .into_iter()
                .map(|w| Box::new(w) as Box<dyn Write + Send>)
                .collect();
            writers.push(file);

            let payload = blob.value.trim();
            match decode_into(payload, MultiWriter { writers }) {
                Ok(written) => {
                    value.value = fname;
                    value.size = written as i64;
                }
                Err(e) => {
                    log::warn!("error decoding blob {}: {}", fname, e);
                    continue;
                }
            }
        }
    }
}

/// Decode a base64 payload into `dest`, returning the bytes written.
/// Line wrapping inside the payload is tolerated.
fn decode_into(payload: &str, mut dest: MultiWriter) -> io::Result<u64> {
    // The standard engine rejects embedded whitespace, so strip the
    // line wrapping servers insert before decoding.
    let compact: Vec<u8> = payload
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();

    let mut decoder = DecoderReader::new(Cursor::new(compact), &STANDARD);
    let written = io::copy(&mut decoder, &mut dest)?;
    dest.flush()?;
    Ok(written)
}

/// Composite writer fanning each byte out to every target.
struct MultiWriter {
    writers: Vec<Box<dyn Write + Send>>,
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for writer in &mut self.writers {
            writer.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        for writer in &mut self.writers {
            writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::BlobValue;
    use crate::fs::MemFs;
    use crate::wire::model::{OneBlob, PropertyPermission, PropertyState};
    use chrono::Utc;
    use std::io::Read;

    fn blob_prop(value_name: &str) -> BlobProperty {
        let mut values = HashMap::new();
        values.insert(
            value_name.to_string(),
            BlobValue {
                name: value_name.to_string(),
                label: String::new(),
                value: String::new(),
                size: 0,
            },
        );
        BlobProperty {
            name: "CCD1".to_string(),
            label: String::new(),
            group: String::new(),
            state: PropertyState::Ok,
            timeout: 0,
            last_updated: Utc::now(),
            messages: Vec::new(),
            permissions: PropertyPermission::ReadOnly,
            values,
        }
    }

    fn set_vector(value_name: &str, payload: &str) -> SetBlobVector {
        SetBlobVector {
            device: "Camera".to_string(),
            name: "CCD1".to_string(),
            state: Some(PropertyState::Ok),
            timeout: None,
            timestamp: String::new(),
            message: String::new(),
            blobs: vec![OneBlob {
                name: value_name.to_string(),
                size: 10,
                format: ".fits".to_string(),
                value: payload.to_string(),
            }],
        }
    }

    #[test]
    fn test_ingest_writes_file_and_updates_value() {
        let fs = MemFs::new();
        let sink = BlobSink::new(Arc::new(fs.clone()), Arc::new(BlobStreams::new()));
        let mut prop = blob_prop("CCD1");

        // base64("1234567890")
        sink.ingest(&set_vector("CCD1", "\n  MTIzNDU2Nzg5MA==\n"), &mut prop);

        let value = &prop.values["CCD1"];
        assert_eq!(value.value, "Camera_CCD1_CCD1.fits");
        assert_eq!(value.size, 10);
        assert_eq!(fs.get("Camera_CCD1_CCD1.fits").unwrap(), b"1234567890");
    }

    #[test]
    fn test_ingest_tolerates_line_wrapping() {
        let fs = MemFs::new();
        let sink = BlobSink::new(Arc::new(fs.clone()), Arc::new(BlobStreams::new()));
        let mut prop = blob_prop("CCD1");

        sink.ingest(&set_vector("CCD1", "MTIzNDU2\nNzg5MA=="), &mut prop);

        assert_eq!(fs.get("Camera_CCD1_CCD1.fits").unwrap(), b"1234567890");
    }

    #[test]
    fn test_ingest_skips_undefined_value_names() {
        let fs = MemFs::new();
        let sink = BlobSink::new(Arc::new(fs.clone()), Arc::new(BlobStreams::new()));
        let mut prop = blob_prop("CCD1");

        sink.ingest(&set_vector("OTHER", "MTIzNDU2Nzg5MA=="), &mut prop);

        assert!(fs.get("Camera_CCD1_OTHER.fits").is_none());
        assert_eq!(prop.values["CCD1"].size, 0);
    }

    #[test]
    fn test_ingest_bad_base64_keeps_value_untouched() {
        let fs = MemFs::new();
        let sink = BlobSink::new(Arc::new(fs.clone()), Arc::new(BlobStreams::new()));
        let mut prop = blob_prop("CCD1");

        sink.ingest(&set_vector("CCD1", "!!not-base64!!"), &mut prop);

        assert_eq!(prop.values["CCD1"].value, "");
        assert_eq!(prop.values["CCD1"].size, 0);
    }

    #[test]
    fn test_subscriber_receives_payload() {
        let fs = MemFs::new();
        let streams = Arc::new(BlobStreams::new());
        let sink = BlobSink::new(Arc::new(fs), Arc::clone(&streams));
        let mut prop = blob_prop("CCD1");

        let key = stream_key("Camera", "CCD1", "CCD1");
        let (mut reader, id) = streams.subscribe(&key);

        sink.ingest(&set_vector("CCD1", "MTIzNDU2Nzg5MA=="), &mut prop);
        streams.close(&key, &id);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"1234567890");
    }

    #[test]
    fn test_dead_subscriber_aborts_copy() {
        let fs = MemFs::new();
        let streams = Arc::new(BlobStreams::new());
        let sink = BlobSink::new(Arc::new(fs.clone()), Arc::clone(&streams));
        let mut prop = blob_prop("CCD1");

        let key = stream_key("Camera", "CCD1", "CCD1");
        let (reader, _id) = streams.subscribe(&key);
        drop(reader); // subscriber went away without closing

        sink.ingest(&set_vector("CCD1", "MTIzNDU2Nzg5MA=="), &mut prop);

        // The copy aborted on the dead subscriber, so the value was not
        // updated, but the next ingest with no subscribers succeeds.
        streams.close(&key, "whatever"); // idempotent close of unknown id
        assert_eq!(prop.values["CCD1"].size, 0);
    }

    #[test]
    fn test_close_is_idempotent() {
        let streams = BlobStreams::new();
        let (_reader, id) = streams.subscribe("k");
        streams.close("k", &id);
        streams.close("k", &id);
        streams.close("unknown", "nope");
    }
}
