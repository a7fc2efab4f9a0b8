//! AMF0 encoder and decoder
//!
//! AMF0 is the original Action Message Format used in Flash.
//! Reference: AMF0 File Format Specification (amf0-file-format-specification.pdf)
//!
//! Type Markers:
//! ```text
//! 0x00 - Number (IEEE 754 double)
//! 0x01 - Boolean
//! 0x02 - String (UTF-8, 16-bit length prefix)
//! 0x03 - Object (key-value pairs until 0x000009)
//! 0x04 - MovieClip (reserved, not supported)
//! 0x05 - Null
//! 0x06 - Undefined
//! 0x07 - Reference (16-bit index)
//! 0x08 - ECMA Array (associative array)
//! 0x09 - Object End (0x000009 sequence)
//! 0x0A - Strict Array (dense array)
//! 0x0B - Date (double + timezone)
//! 0x0C - Long String (UTF-8, 32-bit length prefix)
//! 0x0D - Unsupported
//! 0x0E - RecordSet (reserved, not supported)
//! 0x0F - XML Document
//! 0x10 - Typed Object (class name + properties)
//! 0x11 - AVM+ (switch to AMF3)
//! ```
//!
//! AMF0 keeps a single reference table, for complex values only: objects,
//! arrays and the AMF3-only aggregates downgraded through them. Strings,
//! dates and XML documents are always written inline. The 0x11 marker
//! switches one value to AMF3 rules; the embedded AMF3 context is carried
//! across every 0x11 occurrence in the payload.

use std::cell::RefCell;
use std::io::SeekFrom;
use std::rc::Rc;

use bytes::Bytes;

use crate::amf3;
use crate::codec;
use crate::dispatch::{self, ElementSink};
use crate::error::{DecodeError, EncodeError, Error, Result};
use crate::stream::ByteStream;
use crate::value::{Array, Date, Object, Value};
use crate::xml::{self, XmlKind};

// AMF0 type markers
const MARKER_NUMBER: u8 = 0x00;
const MARKER_BOOLEAN: u8 = 0x01;
const MARKER_STRING: u8 = 0x02;
const MARKER_OBJECT: u8 = 0x03;
const MARKER_NULL: u8 = 0x05;
const MARKER_UNDEFINED: u8 = 0x06;
const MARKER_REFERENCE: u8 = 0x07;
const MARKER_ECMA_ARRAY: u8 = 0x08;
const MARKER_OBJECT_END: u8 = 0x09;
const MARKER_STRICT_ARRAY: u8 = 0x0A;
const MARKER_DATE: u8 = 0x0B;
const MARKER_LONG_STRING: u8 = 0x0C;
const MARKER_UNSUPPORTED: u8 = 0x0D;
const MARKER_XML_DOCUMENT: u8 = 0x0F;
const MARKER_TYPED_OBJECT: u8 = 0x10;
const MARKER_AVMPLUS: u8 = 0x11;

/// Maximum nesting depth for objects/arrays (prevent stack overflow)
const MAX_NESTING_DEPTH: usize = 64;

/// Write a UTF-8 string with 16-bit length prefix (no type marker)
fn write_utf8(stream: &mut ByteStream, s: &str) {
    let len = s.len().min(0xFFFF);
    stream.write_u16(len as u16);
    stream.write_bytes(&s.as_bytes()[..len]);
}

/// AMF0 decoder
#[derive(Debug, Default)]
pub struct Decoder {
    context: codec::Context,
    amf3: amf3::Decoder,
    strict: bool,
    depth: usize,
}

impl Decoder {
    /// Create a decoder with default settings (lenient alias resolution)
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a decoder with explicit strict mode: unregistered class
    /// aliases become errors instead of anonymous fallbacks
    pub fn with_strict(strict: bool) -> Self {
        Self {
            strict,
            ..Self::default()
        }
    }

    /// Reset decoder state, including the embedded AMF3 context
    pub fn reset(&mut self) {
        self.context.clear();
        self.amf3.reset();
        self.depth = 0;
    }

    pub fn context(&self) -> &codec::Context {
        &self.context
    }

    /// Decode a single top-level element, running the post-decode
    /// processor chain on the result
    pub fn decode(&mut self, stream: &mut ByteStream) -> Result<Value> {
        let value = self.read_element(stream)?;
        Ok(dispatch::finalise(value, &mut self.context.extra))
    }

    /// Decode elements until the stream is exhausted
    pub fn decode_all(&mut self, stream: &mut ByteStream) -> Result<Vec<Value>> {
        let mut values = Vec::new();
        while !stream.at_eof() {
            values.push(self.decode(stream)?);
        }
        Ok(values)
    }

    /// Iterate values off the stream. A top-level `EndOfStream` rewinds to
    /// the element start, rolls the tables back and signals exhaustion, so
    /// the stream can be re-fed and retried.
    pub fn iter<'a>(&'a mut self, stream: &'a mut ByteStream) -> Values<'a> {
        Values {
            decoder: self,
            stream,
        }
    }

    fn table_sizes(&self) -> (usize, (usize, usize, usize)) {
        (self.context.object_count(), self.amf3.table_sizes())
    }

    fn truncate_tables(&mut self, sizes: (usize, (usize, usize, usize))) {
        self.context.objects.truncate(sizes.0);
        self.amf3.truncate_tables(sizes.1);
    }

    fn read_element(&mut self, stream: &mut ByteStream) -> Result<Value> {
        self.depth += 1;
        let result = if self.depth > MAX_NESTING_DEPTH {
            Err(Error::Decode(DecodeError::NestingTooDeep))
        } else {
            self.read_marker_value(stream)
        };
        self.depth -= 1;
        result
    }

    fn read_marker_value(&mut self, stream: &mut ByteStream) -> Result<Value> {
        let marker = stream.read_u8()?;

        match marker {
            MARKER_NUMBER => Ok(Value::Double(stream.read_f64()?)),
            MARKER_BOOLEAN => Ok(Value::Bool(stream.read_u8()? != 0)),
            MARKER_STRING => {
                let len = stream.read_u16()? as usize;
                Ok(Value::String(stream.read_utf8(len)?))
            }
            MARKER_OBJECT => self.read_object(stream, None),
            MARKER_NULL => Ok(Value::Null),
            MARKER_UNDEFINED => Ok(Value::Undefined),
            MARKER_REFERENCE => {
                let index = stream.read_u16()? as usize;
                self.context
                    .get_object(index)
                    .ok_or(Error::Decode(DecodeError::ReferenceOutOfRange(index)))
            }
            MARKER_ECMA_ARRAY => self.read_ecma_array(stream),
            MARKER_STRICT_ARRAY => self.read_strict_array(stream),
            MARKER_DATE => {
                let millis = stream.read_f64()?;
                let timezone_offset = stream.read_i16()?;
                Ok(Value::date(Date {
                    millis,
                    timezone_offset,
                }))
            }
            MARKER_LONG_STRING => {
                let len = stream.read_u32()? as usize;
                Ok(Value::String(stream.read_utf8(len)?))
            }
            MARKER_UNSUPPORTED => Ok(Value::Undefined),
            MARKER_XML_DOCUMENT => {
                let len = stream.read_u32()? as usize;
                let xml = {
                    let bytes = stream.read_bytes(len)?;
                    xml::provider().from_bytes(
                        bytes,
                        XmlKind::Document,
                        self.context.forbid_dtd,
                        self.context.forbid_entities,
                    )?
                };
                Ok(Value::Xml(Rc::new(xml)))
            }
            MARKER_TYPED_OBJECT => {
                let len = stream.read_u16()? as usize;
                let class_name = stream.read_utf8(len)?;
                self.read_object(stream, Some(class_name))
            }
            MARKER_AVMPLUS => self.amf3.read_element(stream),
            _ => Err(Error::Decode(DecodeError::UnknownMarker(marker))),
        }
    }

    /// Object bodies are name/value pairs terminated by the empty-name +
    /// 0x09 sentinel. The node registers in the reference table before its
    /// members are read so self-references resolve to it.
    fn read_object(&mut self, stream: &mut ByteStream, class_name: Option<String>) -> Result<Value> {
        let alias = match &class_name {
            Some(name) => Some(self.context.class_alias(name, self.strict)?),
            None => None,
        };

        let node = Rc::new(RefCell::new(match class_name {
            Some(name) => Object::typed(name),
            None => Object::new(),
        }));
        let value = Value::Object(node.clone());
        self.context.add_object(&value);

        loop {
            let len = stream.read_u16()? as usize;
            let key = stream.read_utf8(len)?;

            if key.is_empty() {
                let end = stream.read_u8()?;
                if end == MARKER_OBJECT_END {
                    break;
                }
                return Err(Error::Decode(DecodeError::InvalidObjectEnd));
            }

            let element = self.read_element(stream)?;
            node.borrow_mut().insert(key, element);
        }

        if let Some(alias) = alias {
            alias.apply_decoded(&mut node.borrow_mut());
        }

        Ok(value)
    }

    /// The u32 length prefix is an advisory hint: entries named "0", "1", …
    /// up to the hint are lifted back into the dense part, everything else
    /// stays associative.
    fn read_ecma_array(&mut self, stream: &mut ByteStream) -> Result<Value> {
        let hint = stream.read_u32()? as usize;

        let node = Rc::new(RefCell::new(Array::new()));
        let value = Value::Array(node.clone());
        self.context.add_object(&value);

        let mut entries: Vec<(String, Value)> = Vec::new();
        loop {
            let len = stream.read_u16()? as usize;
            let key = stream.read_utf8(len)?;

            if key.is_empty() {
                let end = stream.read_u8()?;
                if end == MARKER_OBJECT_END {
                    break;
                }
                return Err(Error::Decode(DecodeError::InvalidObjectEnd));
            }

            let element = self.read_element(stream)?;
            entries.push((key, element));
        }

        let mut array = node.borrow_mut();
        for index in 0..hint {
            let name = index.to_string();
            match entries.iter().position(|(k, _)| *k == name) {
                Some(at) => array.dense.push(entries.remove(at).1),
                None => break,
            }
        }
        for (key, element) in entries {
            array.insert(key, element);
        }
        drop(array);

        Ok(value)
    }

    fn read_strict_array(&mut self, stream: &mut ByteStream) -> Result<Value> {
        let count = stream.read_u32()? as usize;

        let node = Rc::new(RefCell::new(Array::new()));
        let value = Value::Array(node.clone());
        self.context.add_object(&value);

        for _ in 0..count {
            let element = self.read_element(stream)?;
            node.borrow_mut().dense.push(element);
        }

        Ok(value)
    }
}

/// Streaming value iterator over a decoder and its stream
pub struct Values<'a> {
    decoder: &'a mut Decoder,
    stream: &'a mut ByteStream,
}

impl Iterator for Values<'_> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stream.at_eof() {
            return None;
        }

        let pos = self.stream.tell();
        let sizes = self.decoder.table_sizes();

        match self.decoder.decode(self.stream) {
            Ok(value) => Some(Ok(value)),
            Err(Error::EndOfStream) => {
                let _ = self.stream.seek(SeekFrom::Start(pos as u64));
                self.decoder.truncate_tables(sizes);
                None
            }
            Err(e) => Some(Err(e)),
        }
    }
}

/// AMF0 encoder
#[derive(Debug, Default)]
pub struct Encoder {
    context: codec::Context,
    amf3: amf3::Encoder,
    use_amf3: bool,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route every element through the 0x11 AVM+ marker as AMF3
    pub fn with_amf3(mut self) -> Self {
        self.use_amf3 = true;
        self
    }

    /// Reset encoder state, including the embedded AMF3 context
    pub fn reset(&mut self) {
        self.context.clear();
        self.amf3.reset();
    }

    /// Encode a single element onto the stream
    pub fn encode(&mut self, stream: &mut ByteStream, value: &Value) -> Result<()> {
        if self.use_amf3 {
            stream.write_u8(MARKER_AVMPLUS);
            return self.amf3.encode(stream, value);
        }
        self.write_element(stream, value)
    }

    /// Encode one element and hand back exactly the bytes it produced,
    /// keeping the reference tables shared across calls
    pub fn encode_to_bytes(&mut self, value: &Value) -> Result<Bytes> {
        let mut stream = ByteStream::new();
        self.encode(&mut stream, value)?;
        Ok(stream.take_bytes())
    }

    fn write_element(&mut self, stream: &mut ByteStream, value: &Value) -> Result<()> {
        match value {
            Value::Undefined => {
                stream.write_u8(MARKER_UNDEFINED);
                Ok(())
            }
            Value::Null => {
                stream.write_u8(MARKER_NULL);
                Ok(())
            }
            Value::Bool(b) => {
                stream.write_u8(MARKER_BOOLEAN);
                stream.write_u8(u8::from(*b));
                Ok(())
            }
            Value::Integer(n) => {
                // AMF0 has no integer type
                stream.write_u8(MARKER_NUMBER);
                stream.write_f64(f64::from(*n));
                Ok(())
            }
            Value::Double(n) => {
                stream.write_u8(MARKER_NUMBER);
                stream.write_f64(*n);
                Ok(())
            }
            Value::String(s) => {
                self.write_string(stream, s.as_bytes());
                Ok(())
            }
            Value::ByteArray(bytes) => {
                // raw bytes through the string writers, as the original
                // wire format has no byte-array type
                self.write_string(stream, &bytes.borrow());
                Ok(())
            }
            Value::Date(date) => {
                stream.write_u8(MARKER_DATE);
                stream.write_f64(date.millis);
                stream.write_i16(date.timezone_offset);
                Ok(())
            }
            Value::Xml(x) => {
                stream.write_u8(MARKER_XML_DOCUMENT);
                let bytes = xml::provider().to_bytes(x);
                stream.write_u32(bytes.len() as u32);
                stream.write_bytes(&bytes);
                Ok(())
            }
            Value::Array(node) => {
                if self.write_reference(stream, value)? {
                    return Ok(());
                }
                let (dense, assoc) = {
                    let array = node.borrow();
                    let assoc: Vec<(String, Value)> = array
                        .assoc_iter()
                        .map(|(k, v)| (k.to_owned(), v.clone()))
                        .collect();
                    (array.dense.clone(), assoc)
                };
                if assoc.is_empty() {
                    self.write_strict_array(stream, &dense)
                } else {
                    self.write_ecma_array(stream, &dense, &assoc)
                }
            }
            Value::Object(node) => self.write_object(stream, value, node),
            Value::VectorInt(node) => {
                if self.write_reference(stream, value)? {
                    return Ok(());
                }
                let data: Vec<Value> = node.borrow().data.iter().map(|n| Value::Integer(*n)).collect();
                self.write_strict_array(stream, &data)
            }
            Value::VectorUint(node) => {
                if self.write_reference(stream, value)? {
                    return Ok(());
                }
                let data: Vec<Value> =
                    node.borrow().data.iter().map(|n| Value::Double(f64::from(*n))).collect();
                self.write_strict_array(stream, &data)
            }
            Value::VectorDouble(node) => {
                if self.write_reference(stream, value)? {
                    return Ok(());
                }
                let data: Vec<Value> = node.borrow().data.iter().map(|n| Value::Double(*n)).collect();
                self.write_strict_array(stream, &data)
            }
            Value::VectorObject(node) => {
                if self.write_reference(stream, value)? {
                    return Ok(());
                }
                let data = node.borrow().data.clone();
                self.write_strict_array(stream, &data)
            }
            Value::Dictionary(node) => {
                if self.write_reference(stream, value)? {
                    return Ok(());
                }
                let entries = node.borrow().entries.clone();
                let mut assoc = Vec::with_capacity(entries.len());
                for (key, val) in entries {
                    match key {
                        Value::String(k) => assoc.push((k, val)),
                        _ => return Err(Error::Encode(EncodeError::NonStringDictionaryKey)),
                    }
                }
                self.write_ecma_array(stream, &[], &assoc)
            }
            Value::Custom(c) => {
                let handled = {
                    let mut sink = Sink {
                        encoder: self,
                        stream,
                    };
                    dispatch::dispatch(value, &mut sink)?
                };
                if handled {
                    Ok(())
                } else {
                    Err(Error::Encode(EncodeError::Unencodable(
                        c.type_name().to_owned(),
                    )))
                }
            }
        }
    }

    fn write_string(&mut self, stream: &mut ByteStream, bytes: &[u8]) {
        if bytes.len() > 0xFFFF {
            stream.write_u8(MARKER_LONG_STRING);
            stream.write_u32(bytes.len() as u32);
        } else {
            stream.write_u8(MARKER_STRING);
            stream.write_u16(bytes.len() as u16);
        }
        stream.write_bytes(bytes);
    }

    /// Emit a back-reference if this node was already written; otherwise
    /// register it and report that the caller must write the inline form.
    /// Indices past the u16 range cannot be referenced and re-encode
    /// inline.
    fn write_reference(&mut self, stream: &mut ByteStream, value: &Value) -> Result<bool> {
        match self.context.object_reference(value)? {
            Some(index) if index <= usize::from(u16::MAX) => {
                stream.write_u8(MARKER_REFERENCE);
                stream.write_u16(index as u16);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => {
                self.context.add_object(value);
                Ok(false)
            }
        }
    }

    fn write_strict_array(&mut self, stream: &mut ByteStream, dense: &[Value]) -> Result<()> {
        stream.write_u8(MARKER_STRICT_ARRAY);
        stream.write_u32(dense.len() as u32);
        for element in dense {
            self.write_element(stream, element)?;
        }
        Ok(())
    }

    /// The u32 prefix is the dense-length hint; dense entries are written
    /// first under their stringified indices, then the associative entries
    /// in insertion order.
    fn write_ecma_array(
        &mut self,
        stream: &mut ByteStream,
        dense: &[Value],
        assoc: &[(String, Value)],
    ) -> Result<()> {
        stream.write_u8(MARKER_ECMA_ARRAY);
        stream.write_u32(dense.len() as u32);

        for (index, element) in dense.iter().enumerate() {
            write_utf8(stream, &index.to_string());
            self.write_element(stream, element)?;
        }
        for (key, element) in assoc {
            write_utf8(stream, key);
            self.write_element(stream, element)?;
        }

        stream.write_u16(0);
        stream.write_u8(MARKER_OBJECT_END);
        Ok(())
    }

    fn write_object(
        &mut self,
        stream: &mut ByteStream,
        value: &Value,
        node: &Rc<RefCell<Object>>,
    ) -> Result<()> {
        let alias = {
            let obj = node.borrow();
            match obj.alias.clone() {
                Some(name) => Some(self.context.class_alias(&name, false)?),
                None => None,
            }
        };

        // per-alias upgrade: the object is written as AMF3 behind 0x11
        if let Some(alias) = &alias {
            if alias.amf3 {
                stream.write_u8(MARKER_AVMPLUS);
                return self.amf3.encode(stream, value);
            }
        }

        if self.write_reference(stream, value)? {
            return Ok(());
        }

        match &alias {
            Some(alias) => {
                stream.write_u8(MARKER_TYPED_OBJECT);
                write_utf8(stream, &alias.alias);

                let (statics, dynamics) = {
                    let obj = node.borrow();
                    alias.encodable_entries(&obj)?
                };
                for (key, element) in statics.iter().chain(dynamics.iter()) {
                    write_utf8(stream, key);
                    self.write_element(stream, element)?;
                }
            }
            None => {
                stream.write_u8(MARKER_OBJECT);
                let entries: Vec<(String, Value)> = {
                    let obj = node.borrow();
                    obj.iter().map(|(k, v)| (k.to_owned(), v.clone())).collect()
                };
                for (key, element) in &entries {
                    write_utf8(stream, key);
                    self.write_element(stream, element)?;
                }
            }
        }

        stream.write_u16(0);
        stream.write_u8(MARKER_OBJECT_END);
        Ok(())
    }
}

/// [`ElementSink`] shim handing dispatch-table adapters encoder access
struct Sink<'a> {
    encoder: &'a mut Encoder,
    stream: &'a mut ByteStream,
}

impl ElementSink for Sink<'_> {
    fn write_element(&mut self, value: &Value) -> Result<()> {
        self.encoder.write_element(self.stream, value)
    }

    fn stream(&mut self) -> &mut ByteStream {
        self.stream
    }
}

/// Convenience function to encode a single value
pub fn encode(value: &Value) -> Result<Bytes> {
    let mut encoder = Encoder::new();
    encoder.encode_to_bytes(value)
}

/// Convenience function to encode multiple values sharing one context
pub fn encode_all(values: &[Value]) -> Result<Bytes> {
    let mut encoder = Encoder::new();
    let mut stream = ByteStream::new();
    for value in values {
        encoder.encode(&mut stream, value)?;
    }
    Ok(stream.take_bytes())
}

/// Convenience function to decode a single value
pub fn decode(data: &[u8]) -> Result<Value> {
    let mut decoder = Decoder::new();
    let mut stream = ByteStream::from(data);
    decoder.decode(&mut stream)
}

/// Convenience function to decode all values
pub fn decode_all(data: &[u8]) -> Result<Vec<Value>> {
    let mut decoder = Decoder::new();
    let mut stream = ByteStream::from(data);
    decoder.decode_all(&mut stream)
}
