//! Local Shared Object container
//!
//! Local Shared Objects ("Flash cookies", `.sol` files) wrap a flat
//! name/value mapping in a fixed header:
//!
//! ```text
//! +-------+-----------+------------------------+----------+------+
//! | 00 BF | u32 rest  | "TCSO" 00 04 00 00 00 00 | u16+name | ...  |
//! +-------+-----------+------------------------+----------+------+
//! ... | 00 00 00 | version (0|3) | (name, value, 00)* until EOF |
//! ```
//!
//! `rest` counts every byte after the length field itself and is
//! back-patched once the body is written. Body entry names use the native
//! string form of the chosen AMF version: a bare u16-prefixed string for
//! AMF0, an interned U29 string for AMF3. Each entry carries a single
//! trailing zero padding byte.

use std::fs;
use std::io::SeekFrom;
use std::path::Path;

use bytes::Bytes;

use crate::amf0;
use crate::amf3;
use crate::error::{DecodeError, Error, Result};
use crate::stream::ByteStream;
use crate::value::Value;
use crate::{AMF0, AMF3};

/// Magic number - 2 bytes
const HEADER_VERSION: [u8; 2] = [0x00, 0xBF];
/// Marker - 10 bytes
const HEADER_SIGNATURE: [u8; 10] = *b"TCSO\x00\x04\x00\x00\x00\x00";
/// Padding byte
const PADDING_BYTE: u8 = 0x00;

/// A decoded shared object: root name plus insertion-ordered entries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sol {
    /// Root name recorded in the header
    pub name: String,
    entries: Vec<(String, Value)>,
}

impl Sol {
    /// Create an empty shared object with the given root name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Insert or update an entry, preserving first-insertion order
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    /// Iterate entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Serialize a shared object into an in-memory SOL stream
pub fn encode(sol: &Sol, version: u8) -> Result<Bytes> {
    let mut stream = ByteStream::new();

    stream.write_bytes(&HEADER_VERSION);
    let length_pos = stream.tell();
    stream.write_u32(0);
    stream.write_bytes(&HEADER_SIGNATURE);

    stream.write_u16(sol.name.len() as u16);
    stream.write_bytes(sol.name.as_bytes());

    stream.write_bytes(&[PADDING_BYTE; 3]);
    stream.write_u8(version);

    match version {
        AMF0 => {
            let mut encoder = amf0::Encoder::new();
            for (name, value) in sol.iter() {
                stream.write_u16(name.len() as u16);
                stream.write_bytes(name.as_bytes());
                encoder.encode(&mut stream, value)?;
                stream.write_u8(PADDING_BYTE);
            }
        }
        AMF3 => {
            let mut encoder = amf3::Encoder::new();
            for (name, value) in sol.iter() {
                encoder.serialize_string(&mut stream, name);
                encoder.encode(&mut stream, value)?;
                stream.write_u8(PADDING_BYTE);
            }
        }
        v => return Err(Error::Decode(DecodeError::UnknownAmfVersion(v))),
    }

    // back-patch the length field: everything after the field itself
    let total = stream.len();
    stream.seek(SeekFrom::Start(length_pos as u64))?;
    stream.write_u32((total - length_pos - 4) as u32);

    Ok(stream.take_bytes())
}

/// Decode a SOL stream, validating the header strictly
pub fn decode(data: &[u8]) -> Result<Sol> {
    let mut stream = ByteStream::from(data);

    if stream.read_bytes(2)? != HEADER_VERSION {
        return Err(Error::Decode(DecodeError::InvalidSolHeader("bad magic")));
    }

    let declared = stream.read_u32()? as usize;
    if declared != stream.remaining() {
        return Err(Error::Decode(DecodeError::InvalidSolHeader(
            "inconsistent length field",
        )));
    }

    if stream.read_bytes(10)? != HEADER_SIGNATURE {
        return Err(Error::Decode(DecodeError::InvalidSolHeader("bad signature")));
    }

    let name_len = stream.read_u16()? as usize;
    let name = stream.read_utf8(name_len)?;

    if stream.read_bytes(3)? != [PADDING_BYTE; 3] {
        return Err(Error::Decode(DecodeError::InvalidSolHeader("bad padding")));
    }

    let version = stream.read_u8()?;
    let mut sol = Sol::new(name);

    match version {
        AMF0 => {
            let mut decoder = amf0::Decoder::new();
            while !stream.at_eof() {
                let len = stream.read_u16()? as usize;
                let entry_name = stream.read_utf8(len)?;
                let value = decoder.decode(&mut stream)?;
                if stream.read_u8()? != PADDING_BYTE {
                    return Err(Error::Decode(DecodeError::MissingPadding));
                }
                sol.insert(entry_name, value);
            }
        }
        AMF3 => {
            let mut decoder = amf3::Decoder::new();
            while !stream.at_eof() {
                let entry_name = decoder.read_string(&mut stream)?;
                let value = decoder.decode(&mut stream)?;
                if stream.read_u8()? != PADDING_BYTE {
                    return Err(Error::Decode(DecodeError::MissingPadding));
                }
                sol.insert(entry_name, value);
            }
        }
        v => return Err(Error::Decode(DecodeError::UnknownAmfVersion(v))),
    }

    Ok(sol)
}

/// Write a shared object to disk atomically: the payload lands in a
/// sibling temp file which is renamed over the target, and every handle is
/// released on every exit path.
pub fn save(sol: &Sol, path: impl AsRef<Path>, version: u8) -> Result<()> {
    let path = path.as_ref();
    let bytes = encode(sol, version)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!("{}.tmp", file_name));

    if let Err(e) = fs::write(&tmp, &bytes) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }

    tracing::debug!(path = %path.display(), bytes = bytes.len(), "Shared object saved");
    Ok(())
}

/// Load a shared object from disk
pub fn load(path: impl AsRef<Path>) -> Result<Sol> {
    let path = path.as_ref();
    let data = fs::read(path)?;
    let sol = decode(&data)?;

    tracing::debug!(path = %path.display(), entries = sol.len(), "Shared object loaded");
    Ok(sol)
}
