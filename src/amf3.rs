//! AMF3 encoder and decoder
//!
//! AMF3 is the serialization format of ActionScript 3.0. It adds the U29
//! variable-length integer, dedicated boolean markers, interning tables
//! for strings and class traits, byte arrays, typed vectors and
//! dictionaries on top of AMF0.
//! Reference: AMF3 Format Specification (amf3_spec_05_05_08.pdf)
//!
//! Type Markers:
//! ```text
//! 0x00 - Undefined
//! 0x01 - Null
//! 0x02 - False
//! 0x03 - True
//! 0x04 - Integer (signed 29-bit varint)
//! 0x05 - Double (IEEE 754)
//! 0x06 - String (UTF-8, interned)
//! 0x07 - XMLDocument (legacy flash.xml)
//! 0x08 - Date (double milliseconds, UTC)
//! 0x09 - Array (dense + associative)
//! 0x0A - Object (trait-described)
//! 0x0B - XML (E4X)
//! 0x0C - ByteArray
//! 0x0D - Vector<int>
//! 0x0E - Vector<uint>
//! 0x0F - Vector<Number>
//! 0x10 - Vector<Object>
//! 0x11 - Dictionary
//! ```
//!
//! Every reference-eligible value opens with a U29 header whose low bit
//! selects between "reference, upper bits are the index" (0) and "inline,
//! upper bits carry length/count/flags" (1). The encoder checks the
//! matching table before writing an inline body and registers the value
//! before writing it, so self-referential graphs terminate; the decoder
//! registers a placeholder node before filling its children for the same
//! reason.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::SeekFrom;
use std::rc::Rc;

use bytes::Bytes;

use crate::codec;
use crate::dispatch::{self, ElementSink};
use crate::error::{DecodeError, EncodeError, Error, Result};
use crate::stream::ByteStream;
use crate::value::{Array, Date, Dictionary, Object, ObjectVector, Value, Vector};
use crate::xml::{self, XmlKind};

// AMF3 type markers
const MARKER_UNDEFINED: u8 = 0x00;
const MARKER_NULL: u8 = 0x01;
const MARKER_FALSE: u8 = 0x02;
const MARKER_TRUE: u8 = 0x03;
const MARKER_INTEGER: u8 = 0x04;
const MARKER_DOUBLE: u8 = 0x05;
const MARKER_STRING: u8 = 0x06;
const MARKER_XML_DOC: u8 = 0x07;
const MARKER_DATE: u8 = 0x08;
const MARKER_ARRAY: u8 = 0x09;
const MARKER_OBJECT: u8 = 0x0A;
const MARKER_XML: u8 = 0x0B;
const MARKER_BYTE_ARRAY: u8 = 0x0C;
const MARKER_VECTOR_INT: u8 = 0x0D;
const MARKER_VECTOR_UINT: u8 = 0x0E;
const MARKER_VECTOR_DOUBLE: u8 = 0x0F;
const MARKER_VECTOR_OBJECT: u8 = 0x10;
const MARKER_DICTIONARY: u8 = 0x11;

/// Largest integer that avoids promotion to Double: 2^28 - 1
pub const MAX_29B_INT: i32 = 0x0FFF_FFFF;

/// Smallest integer representable in the signed 29-bit range: -2^28
pub const MIN_29B_INT: i32 = -0x1000_0000;

/// Maximum nesting depth for objects/arrays (prevent stack overflow)
const MAX_NESTING_DEPTH: usize = 64;

/// Write a U29 variable-length unsigned integer (range 0 .. 2^29 - 1):
/// 1-4 bytes, 7 bits per byte except the last, which carries 8.
pub fn write_u29(stream: &mut ByteStream, value: u32) {
    debug_assert!(value <= 0x1FFF_FFFF);

    if value < 0x80 {
        stream.write_u8(value as u8);
    } else if value < 0x4000 {
        stream.write_u8(0x80 | (value >> 7) as u8);
        stream.write_u8((value & 0x7F) as u8);
    } else if value < 0x20_0000 {
        stream.write_u8(0x80 | (value >> 14) as u8);
        stream.write_u8(0x80 | ((value >> 7) & 0x7F) as u8);
        stream.write_u8((value & 0x7F) as u8);
    } else {
        stream.write_u8(0x80 | (value >> 22) as u8);
        stream.write_u8(0x80 | ((value >> 15) & 0x7F) as u8);
        stream.write_u8(0x80 | ((value >> 8) & 0x7F) as u8);
        stream.write_u8((value & 0xFF) as u8);
    }
}

/// Read a U29 variable-length unsigned integer
pub fn read_u29(stream: &mut ByteStream) -> Result<u32> {
    let mut result: u32 = 0;

    for _ in 0..3 {
        let b = u32::from(stream.read_u8()?);
        if b & 0x80 == 0 {
            return Ok((result << 7) | b);
        }
        result = (result << 7) | (b & 0x7F);
    }

    let b = u32::from(stream.read_u8()?);
    Ok((result << 8) | b)
}

/// Interpret a U29 value as a signed 29-bit integer (two's complement)
fn u29_to_signed(value: u32) -> i32 {
    if value & 0x1000_0000 != 0 {
        value as i32 - 0x2000_0000
    } else {
        value as i32
    }
}

/// A class descriptor shared across instances within one payload
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Trait {
    /// Wire class name; empty for anonymous objects
    pub alias: String,
    /// Static member names in wire order
    pub static_members: Vec<String>,
    pub dynamic: bool,
    pub external: bool,
}

/// AMF3 codec context: the shared object table plus the string and trait
/// interning tables
#[derive(Debug, Default)]
pub struct Context {
    base: codec::Context,
    strings: codec::StringTable,
    traits: Vec<Rc<Trait>>,
    trait_indices: HashMap<Rc<Trait>, usize>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all three tables and the per-pass caches
    pub fn clear(&mut self) {
        self.base.clear();
        self.strings.clear();
        self.traits.clear();
        self.trait_indices.clear();
    }

    pub fn get_object(&self, index: usize) -> Option<Value> {
        self.base.get_object(index)
    }

    pub fn object_reference(&self, value: &Value) -> Result<Option<usize>> {
        self.base.object_reference(value)
    }

    pub fn add_object(&mut self, value: &Value) -> usize {
        self.base.add_object(value)
    }

    pub fn get_string(&self, index: usize) -> Option<&str> {
        self.strings.get(index)
    }

    pub fn string_reference(&self, s: &str) -> Option<usize> {
        self.strings.reference_to(s)
    }

    pub fn add_string(&mut self, s: &str) -> Option<usize> {
        self.strings.add(s)
    }

    pub fn get_trait(&self, index: usize) -> Option<Rc<Trait>> {
        self.traits.get(index).cloned()
    }

    pub fn trait_reference(&self, t: &Trait) -> Option<usize> {
        self.trait_indices.get(t).copied()
    }

    pub fn add_trait(&mut self, t: Rc<Trait>) -> usize {
        let index = self.traits.len();
        self.trait_indices.insert(t.clone(), index);
        self.traits.push(t);
        index
    }

    pub(crate) fn table_sizes(&self) -> (usize, usize, usize) {
        (self.base.objects.len(), self.strings.len(), self.traits.len())
    }

    pub(crate) fn truncate_tables(&mut self, sizes: (usize, usize, usize)) {
        self.base.objects.truncate(sizes.0);
        self.strings.truncate(sizes.1);
        while self.traits.len() > sizes.2 {
            if let Some(t) = self.traits.pop() {
                self.trait_indices.remove(&t);
            }
        }
    }
}

/// AMF3 decoder
///
/// Holds the codec context; the byte stream is passed per call so the
/// AMF0 decoder can drive the same context through the 0x11 upgrade
/// marker.
#[derive(Debug, Default)]
pub struct Decoder {
    context: Context,
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

    /// Create a decoder over an existing context (explicit opt-in to
    /// shared reference tables across calls)
    pub fn with_context(context: Context) -> Self {
        Self {
            context,
            strict: false,
            depth: 0,
        }
    }

    /// Reset decoder state (call between payloads)
    pub fn reset(&mut self) {
        self.context.clear();
        self.depth = 0;
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub(crate) fn table_sizes(&self) -> (usize, usize, usize) {
        self.context.table_sizes()
    }

    pub(crate) fn truncate_tables(&mut self, sizes: (usize, usize, usize)) {
        self.context.truncate_tables(sizes);
    }

    /// Decode a single top-level element, running the post-decode
    /// processor chain on the result
    pub fn decode(&mut self, stream: &mut ByteStream) -> Result<Value> {
        let value = self.read_element(stream)?;
        Ok(dispatch::finalise(value, &mut self.context.base.extra))
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

    pub(crate) fn read_element(&mut self, stream: &mut ByteStream) -> Result<Value> {
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
            MARKER_UNDEFINED => Ok(Value::Undefined),
            MARKER_NULL => Ok(Value::Null),
            MARKER_FALSE => Ok(Value::Bool(false)),
            MARKER_TRUE => Ok(Value::Bool(true)),
            MARKER_INTEGER => Ok(Value::Integer(u29_to_signed(read_u29(stream)?))),
            MARKER_DOUBLE => Ok(Value::Double(stream.read_f64()?)),
            MARKER_STRING => Ok(Value::String(self.read_string(stream)?)),
            MARKER_XML_DOC => self.read_xml(stream, XmlKind::Document),
            MARKER_DATE => self.read_date(stream),
            MARKER_ARRAY => self.read_array(stream),
            MARKER_OBJECT => self.read_object(stream),
            MARKER_XML => self.read_xml(stream, XmlKind::Xml),
            MARKER_BYTE_ARRAY => self.read_byte_array(stream),
            MARKER_VECTOR_INT => self.read_vector_int(stream),
            MARKER_VECTOR_UINT => self.read_vector_uint(stream),
            MARKER_VECTOR_DOUBLE => self.read_vector_double(stream),
            MARKER_VECTOR_OBJECT => self.read_vector_object(stream),
            MARKER_DICTIONARY => self.read_dictionary(stream),
            _ => Err(Error::Decode(DecodeError::UnknownMarker(marker))),
        }
    }

    /// Read a string through the interning table. Public because SOL body
    /// names use the bare string form without a marker.
    pub fn read_string(&mut self, stream: &mut ByteStream) -> Result<String> {
        let header = read_u29(stream)?;

        if header & 1 == 0 {
            let index = (header >> 1) as usize;
            return self
                .context
                .get_string(index)
                .map(str::to_owned)
                .ok_or(Error::Decode(DecodeError::ReferenceOutOfRange(index)));
        }

        let len = (header >> 1) as usize;
        if len == 0 {
            return Ok(String::new());
        }

        let s = stream.read_utf8(len)?;
        self.context.add_string(&s);
        Ok(s)
    }

    /// Resolve a reference header against the object table, or hand back
    /// the inline payload bits
    fn read_object_header(&mut self, stream: &mut ByteStream) -> Result<std::result::Result<Value, u32>> {
        let header = read_u29(stream)?;

        if header & 1 == 0 {
            let index = (header >> 1) as usize;
            let value = self
                .context
                .get_object(index)
                .ok_or(Error::Decode(DecodeError::ReferenceOutOfRange(index)))?;
            return Ok(Ok(value));
        }

        Ok(Err(header >> 1))
    }

    fn read_date(&mut self, stream: &mut ByteStream) -> Result<Value> {
        let _flags = match self.read_object_header(stream)? {
            Ok(value) => return Ok(value),
            Err(rest) => rest,
        };

        let millis = stream.read_f64()?;
        let value = Value::date(Date::from_millis(millis));
        self.context.add_object(&value);
        Ok(value)
    }

    fn read_array(&mut self, stream: &mut ByteStream) -> Result<Value> {
        let size = match self.read_object_header(stream)? {
            Ok(value) => return Ok(value),
            Err(rest) => rest as usize,
        };

        let node = Rc::new(RefCell::new(Array::new()));
        let value = Value::Array(node.clone());
        self.context.add_object(&value);

        loop {
            let key = self.read_string(stream)?;
            if key.is_empty() {
                break;
            }
            let element = self.read_element(stream)?;
            node.borrow_mut().insert(key, element);
        }

        for _ in 0..size {
            let element = self.read_element(stream)?;
            node.borrow_mut().dense.push(element);
        }

        Ok(value)
    }

    fn read_trait(&mut self, stream: &mut ByteStream, rest: u32) -> Result<Rc<Trait>> {
        if rest & 1 == 0 {
            let index = (rest >> 1) as usize;
            return self
                .context
                .get_trait(index)
                .ok_or(Error::Decode(DecodeError::TraitOutOfRange(index)));
        }

        let rest = rest >> 1;
        let encoding = rest & 0x03;
        if encoding == 3 {
            return Err(Error::Decode(DecodeError::InvalidTraitFlags(rest)));
        }

        let count = (rest >> 2) as usize;
        let alias = self.read_string(stream)?;

        let mut static_members = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            static_members.push(self.read_string(stream)?);
        }

        let t = Rc::new(Trait {
            alias,
            static_members,
            dynamic: encoding == 2,
            external: encoding == 1,
        });
        self.context.add_trait(t.clone());
        Ok(t)
    }

    fn read_object(&mut self, stream: &mut ByteStream) -> Result<Value> {
        let rest = match self.read_object_header(stream)? {
            Ok(value) => return Ok(value),
            Err(rest) => rest,
        };

        let t = self.read_trait(stream, rest)?;

        let mut obj = Object::new();
        if !t.alias.is_empty() {
            obj.alias = Some(t.alias.clone());
        }

        let node = Rc::new(RefCell::new(obj));
        let value = Value::Object(node.clone());
        self.context.add_object(&value);

        let alias = if t.alias.is_empty() {
            None
        } else {
            Some(self.context.base.class_alias(&t.alias, self.strict)?)
        };

        if t.external {
            let handler = alias
                .as_ref()
                .and_then(|a| a.external_handler.clone())
                .ok_or_else(|| {
                    Error::Decode(DecodeError::MissingExternalHandler(t.alias.clone()))
                })?;

            let mut guard = node.borrow_mut();
            let mut input = DataInput {
                decoder: self,
                stream,
            };
            handler.decode(&mut guard, &mut input)?;
            return Ok(value);
        }

        for member in &t.static_members {
            let element = self.read_element(stream)?;
            node.borrow_mut().insert(member.clone(), element);
        }

        if t.dynamic {
            loop {
                let key = self.read_string(stream)?;
                if key.is_empty() {
                    break;
                }
                let element = self.read_element(stream)?;
                node.borrow_mut().insert(key, element);
            }
        }

        if let Some(alias) = alias {
            alias.apply_decoded(&mut node.borrow_mut());
        }

        Ok(value)
    }

    fn read_xml(&mut self, stream: &mut ByteStream, kind: XmlKind) -> Result<Value> {
        let len = match self.read_object_header(stream)? {
            Ok(value) => return Ok(value),
            Err(rest) => rest as usize,
        };

        let xml = {
            let bytes = stream.read_bytes(len)?;
            xml::provider().from_bytes(
                bytes,
                kind,
                self.context.base.forbid_dtd,
                self.context.base.forbid_entities,
            )?
        };

        let value = Value::Xml(Rc::new(xml));
        self.context.add_object(&value);
        Ok(value)
    }

    fn read_byte_array(&mut self, stream: &mut ByteStream) -> Result<Value> {
        let len = match self.read_object_header(stream)? {
            Ok(value) => return Ok(value),
            Err(rest) => rest as usize,
        };

        let bytes = stream.read_bytes(len)?.to_vec();
        let value = Value::byte_array(bytes);
        self.context.add_object(&value);
        Ok(value)
    }

    fn read_vector_int(&mut self, stream: &mut ByteStream) -> Result<Value> {
        let count = match self.read_object_header(stream)? {
            Ok(value) => return Ok(value),
            Err(rest) => rest as usize,
        };
        let fixed = stream.read_u8()? != 0;

        let mut data = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            data.push(stream.read_i32()?);
        }

        let value = Value::VectorInt(Rc::new(RefCell::new(Vector { fixed, data })));
        self.context.add_object(&value);
        Ok(value)
    }

    fn read_vector_uint(&mut self, stream: &mut ByteStream) -> Result<Value> {
        let count = match self.read_object_header(stream)? {
            Ok(value) => return Ok(value),
            Err(rest) => rest as usize,
        };
        let fixed = stream.read_u8()? != 0;

        let mut data = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            data.push(stream.read_u32()?);
        }

        let value = Value::VectorUint(Rc::new(RefCell::new(Vector { fixed, data })));
        self.context.add_object(&value);
        Ok(value)
    }

    fn read_vector_double(&mut self, stream: &mut ByteStream) -> Result<Value> {
        let count = match self.read_object_header(stream)? {
            Ok(value) => return Ok(value),
            Err(rest) => rest as usize,
        };
        let fixed = stream.read_u8()? != 0;

        let mut data = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            data.push(stream.read_f64()?);
        }

        let value = Value::VectorDouble(Rc::new(RefCell::new(Vector { fixed, data })));
        self.context.add_object(&value);
        Ok(value)
    }

    fn read_vector_object(&mut self, stream: &mut ByteStream) -> Result<Value> {
        let count = match self.read_object_header(stream)? {
            Ok(value) => return Ok(value),
            Err(rest) => rest as usize,
        };
        let fixed = stream.read_u8()? != 0;
        let type_name = self.read_string(stream)?;

        let node = Rc::new(RefCell::new(ObjectVector {
            type_name,
            fixed,
            data: Vec::new(),
        }));
        let value = Value::VectorObject(node.clone());
        self.context.add_object(&value);

        for _ in 0..count {
            let element = self.read_element(stream)?;
            node.borrow_mut().data.push(element);
        }

        Ok(value)
    }

    fn read_dictionary(&mut self, stream: &mut ByteStream) -> Result<Value> {
        let count = match self.read_object_header(stream)? {
            Ok(value) => return Ok(value),
            Err(rest) => rest as usize,
        };
        let weak_keys = stream.read_u8()? != 0;

        let node = Rc::new(RefCell::new(Dictionary {
            weak_keys,
            entries: Vec::new(),
        }));
        let value = Value::Dictionary(node.clone());
        self.context.add_object(&value);

        for _ in 0..count {
            let key = self.read_element(stream)?;
            let val = self.read_element(stream)?;
            node.borrow_mut().entries.push((key, val));
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
        let sizes = self.decoder.context.table_sizes();

        match self.decoder.decode(self.stream) {
            Ok(value) => Some(Ok(value)),
            Err(Error::EndOfStream) => {
                // incomplete element: rewind and roll the tables back so a
                // re-fed stream decodes cleanly
                let _ = self.stream.seek(SeekFrom::Start(pos as u64));
                self.decoder.context.truncate_tables(sizes);
                None
            }
            Err(e) => Some(Err(e)),
        }
    }
}

/// AMF3 encoder
#[derive(Debug, Default)]
pub struct Encoder {
    context: Context,
    no_string_references: bool,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an encoder over an existing context (explicit opt-in to
    /// shared reference tables across calls)
    pub fn with_context(context: Context) -> Self {
        Self {
            context,
            no_string_references: false,
        }
    }

    /// Disable string interning: every string is written inline. Decoders
    /// still populate their table, which stays aligned because inline
    /// writes always append.
    pub fn without_string_references(mut self) -> Self {
        self.no_string_references = true;
        self
    }

    /// Reset encoder state (call between payloads)
    pub fn reset(&mut self) {
        self.context.clear();
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Encode a single element onto the stream
    pub fn encode(&mut self, stream: &mut ByteStream, value: &Value) -> Result<()> {
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
                stream.write_u8(if *b { MARKER_TRUE } else { MARKER_FALSE });
                Ok(())
            }
            Value::Integer(n) => {
                self.write_integer(stream, *n);
                Ok(())
            }
            Value::Double(n) => {
                write_double(stream, *n);
                Ok(())
            }
            Value::String(s) => {
                stream.write_u8(MARKER_STRING);
                self.serialize_string(stream, s);
                Ok(())
            }
            Value::Date(date) => self.write_date(stream, value, date),
            Value::Xml(x) => self.write_xml(stream, value, x),
            Value::ByteArray(bytes) => self.write_byte_array(stream, value, bytes),
            Value::Array(node) => self.write_array(stream, value, node),
            Value::Object(node) => self.write_object(stream, value, node),
            Value::VectorInt(node) => self.write_vector_int(stream, value, node),
            Value::VectorUint(node) => self.write_vector_uint(stream, value, node),
            Value::VectorDouble(node) => self.write_vector_double(stream, value, node),
            Value::VectorObject(node) => self.write_vector_object(stream, value, node),
            Value::Dictionary(node) => self.write_dictionary(stream, value, node),
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

    /// Encode one element and hand back exactly the bytes it produced,
    /// keeping the reference tables shared across calls
    pub fn encode_to_bytes(&mut self, value: &Value) -> Result<Bytes> {
        let mut stream = ByteStream::new();
        self.encode(&mut stream, value)?;
        Ok(stream.take_bytes())
    }

    /// Integers outside the signed 29-bit range fall back to Double
    fn write_integer(&mut self, stream: &mut ByteStream, n: i32) {
        if !(MIN_29B_INT..=MAX_29B_INT).contains(&n) {
            write_double(stream, f64::from(n));
            return;
        }

        stream.write_u8(MARKER_INTEGER);
        write_u29(stream, (n as u32) & 0x1FFF_FFFF);
    }

    /// Write a bare string: reference header plus inline UTF-8. The empty
    /// string is the literal 0x01 and never touches the table.
    pub(crate) fn serialize_string(&mut self, stream: &mut ByteStream, s: &str) {
        if s.is_empty() {
            stream.write_u8(0x01);
            return;
        }

        if !self.no_string_references {
            if let Some(index) = self.context.string_reference(s) {
                write_u29(stream, (index as u32) << 1);
                return;
            }
            self.context.add_string(s);
        }

        write_u29(stream, ((s.len() as u32) << 1) | 1);
        stream.write_bytes(s.as_bytes());
    }

    /// Emit a back-reference if this node was already written; otherwise
    /// register it (before the body, so cycles terminate) and report that
    /// the caller must write the inline form.
    fn write_reference(&mut self, stream: &mut ByteStream, value: &Value) -> Result<bool> {
        if let Some(index) = self.context.object_reference(value)? {
            write_u29(stream, (index as u32) << 1);
            return Ok(true);
        }
        self.context.add_object(value);
        Ok(false)
    }

    fn write_date(&mut self, stream: &mut ByteStream, value: &Value, date: &Date) -> Result<()> {
        stream.write_u8(MARKER_DATE);
        if self.write_reference(stream, value)? {
            return Ok(());
        }

        stream.write_u8(0x01);
        stream.write_f64(date.millis);
        Ok(())
    }

    fn write_xml(&mut self, stream: &mut ByteStream, value: &Value, x: &xml::Xml) -> Result<()> {
        stream.write_u8(match x.kind {
            XmlKind::Document => MARKER_XML_DOC,
            XmlKind::Xml => MARKER_XML,
        });
        if self.write_reference(stream, value)? {
            return Ok(());
        }

        let bytes = xml::provider().to_bytes(x);
        write_u29(stream, ((bytes.len() as u32) << 1) | 1);
        stream.write_bytes(&bytes);
        Ok(())
    }

    fn write_byte_array(
        &mut self,
        stream: &mut ByteStream,
        value: &Value,
        bytes: &Rc<RefCell<Vec<u8>>>,
    ) -> Result<()> {
        stream.write_u8(MARKER_BYTE_ARRAY);
        if self.write_reference(stream, value)? {
            return Ok(());
        }

        let bytes = bytes.borrow();
        write_u29(stream, ((bytes.len() as u32) << 1) | 1);
        stream.write_bytes(&bytes);
        Ok(())
    }

    fn write_array(
        &mut self,
        stream: &mut ByteStream,
        value: &Value,
        node: &Rc<RefCell<Array>>,
    ) -> Result<()> {
        stream.write_u8(MARKER_ARRAY);
        if self.write_reference(stream, value)? {
            return Ok(());
        }

        let (dense, assoc) = {
            let array = node.borrow();
            let dense: Vec<Value> = array.dense.clone();
            let assoc: Vec<(String, Value)> = array
                .assoc_iter()
                .map(|(k, v)| (k.to_owned(), v.clone()))
                .collect();
            (dense, assoc)
        };

        write_u29(stream, ((dense.len() as u32) << 1) | 1);

        for (key, element) in &assoc {
            if key.is_empty() {
                return Err(Error::Encode(EncodeError::EmptyKey));
            }
            self.serialize_string(stream, key);
            self.encode(stream, element)?;
        }
        stream.write_u8(0x01);

        for element in &dense {
            self.encode(stream, element)?;
        }

        Ok(())
    }

    fn write_object(
        &mut self,
        stream: &mut ByteStream,
        value: &Value,
        node: &Rc<RefCell<Object>>,
    ) -> Result<()> {
        stream.write_u8(MARKER_OBJECT);
        if self.write_reference(stream, value)? {
            return Ok(());
        }

        let (alias, statics, dynamics, t) = {
            let obj = node.borrow();
            match obj.alias.clone() {
                None => {
                    let dynamics: Vec<(String, Value)> = obj
                        .iter()
                        .map(|(k, v)| (k.to_owned(), v.clone()))
                        .collect();
                    let t = Trait {
                        alias: String::new(),
                        static_members: Vec::new(),
                        dynamic: true,
                        external: false,
                    };
                    (None, Vec::new(), dynamics, t)
                }
                Some(name) => {
                    let alias = self.context.base.class_alias(&name, false)?;
                    let (statics, dynamics) = alias.encodable_entries(&obj)?;
                    let t = Trait {
                        alias: name,
                        static_members: statics.iter().map(|(k, _)| k.clone()).collect(),
                        dynamic: alias.dynamic,
                        external: alias.external,
                    };
                    (Some(alias), statics, dynamics, t)
                }
            }
        };

        match self.context.trait_reference(&t) {
            Some(index) => {
                write_u29(stream, ((index as u32) << 2) | 0x01);
            }
            None => {
                self.context.add_trait(Rc::new(t.clone()));

                let encoding: u32 = if t.external {
                    1
                } else if t.dynamic {
                    2
                } else {
                    0
                };
                let count = if t.external {
                    0
                } else {
                    t.static_members.len() as u32
                };
                write_u29(stream, (count << 4) | (encoding << 2) | 0x03);

                self.serialize_string(stream, &t.alias);
                if !t.external {
                    for member in &t.static_members {
                        self.serialize_string(stream, member);
                    }
                }
            }
        }

        if t.external {
            let handler = alias
                .as_ref()
                .and_then(|a| a.external_handler.clone())
                .ok_or_else(|| {
                    Error::Encode(EncodeError::MissingExternalHandler(t.alias.clone()))
                })?;

            let obj = node.borrow();
            let mut output = DataOutput {
                encoder: self,
                stream,
            };
            return handler.encode(&obj, &mut output);
        }

        for (_, element) in &statics {
            self.encode(stream, element)?;
        }

        if t.dynamic {
            for (key, element) in &dynamics {
                if key.is_empty() {
                    return Err(Error::Encode(EncodeError::EmptyKey));
                }
                self.serialize_string(stream, key);
                self.encode(stream, element)?;
            }
            stream.write_u8(0x01);
        }

        Ok(())
    }

    fn write_vector_int(
        &mut self,
        stream: &mut ByteStream,
        value: &Value,
        node: &Rc<RefCell<Vector<i32>>>,
    ) -> Result<()> {
        stream.write_u8(MARKER_VECTOR_INT);
        if self.write_reference(stream, value)? {
            return Ok(());
        }

        let vector = node.borrow();
        write_u29(stream, ((vector.data.len() as u32) << 1) | 1);
        stream.write_u8(u8::from(vector.fixed));
        for n in &vector.data {
            stream.write_i32(*n);
        }
        Ok(())
    }

    fn write_vector_uint(
        &mut self,
        stream: &mut ByteStream,
        value: &Value,
        node: &Rc<RefCell<Vector<u32>>>,
    ) -> Result<()> {
        stream.write_u8(MARKER_VECTOR_UINT);
        if self.write_reference(stream, value)? {
            return Ok(());
        }

        let vector = node.borrow();
        write_u29(stream, ((vector.data.len() as u32) << 1) | 1);
        stream.write_u8(u8::from(vector.fixed));
        for n in &vector.data {
            stream.write_u32(*n);
        }
        Ok(())
    }

    fn write_vector_double(
        &mut self,
        stream: &mut ByteStream,
        value: &Value,
        node: &Rc<RefCell<Vector<f64>>>,
    ) -> Result<()> {
        stream.write_u8(MARKER_VECTOR_DOUBLE);
        if self.write_reference(stream, value)? {
            return Ok(());
        }

        let vector = node.borrow();
        write_u29(stream, ((vector.data.len() as u32) << 1) | 1);
        stream.write_u8(u8::from(vector.fixed));
        for n in &vector.data {
            stream.write_f64(*n);
        }
        Ok(())
    }

    fn write_vector_object(
        &mut self,
        stream: &mut ByteStream,
        value: &Value,
        node: &Rc<RefCell<ObjectVector>>,
    ) -> Result<()> {
        stream.write_u8(MARKER_VECTOR_OBJECT);
        if self.write_reference(stream, value)? {
            return Ok(());
        }

        let (type_name, fixed, data) = {
            let vector = node.borrow();
            (vector.type_name.clone(), vector.fixed, vector.data.clone())
        };

        write_u29(stream, ((data.len() as u32) << 1) | 1);
        stream.write_u8(u8::from(fixed));
        self.serialize_string(stream, &type_name);
        for element in &data {
            self.encode(stream, element)?;
        }
        Ok(())
    }

    fn write_dictionary(
        &mut self,
        stream: &mut ByteStream,
        value: &Value,
        node: &Rc<RefCell<Dictionary>>,
    ) -> Result<()> {
        stream.write_u8(MARKER_DICTIONARY);
        if self.write_reference(stream, value)? {
            return Ok(());
        }

        let (weak_keys, entries) = {
            let dict = node.borrow();
            (dict.weak_keys, dict.entries.clone())
        };

        write_u29(stream, ((entries.len() as u32) << 1) | 1);
        stream.write_u8(u8::from(weak_keys));
        for (key, val) in &entries {
            self.encode(stream, key)?;
            self.encode(stream, val)?;
        }
        Ok(())
    }
}

fn write_double(stream: &mut ByteStream, n: f64) {
    stream.write_u8(MARKER_DOUBLE);
    stream.write_f64(n);
}

/// [`ElementSink`] shim handing dispatch-table adapters encoder access
struct Sink<'a> {
    encoder: &'a mut Encoder,
    stream: &'a mut ByteStream,
}

impl ElementSink for Sink<'_> {
    fn write_element(&mut self, value: &Value) -> Result<()> {
        self.encoder.encode(self.stream, value)
    }

    fn stream(&mut self) -> &mut ByteStream {
        self.stream
    }
}

/// ActionScript `IDataOutput` surface handed to external-class serializers
pub struct DataOutput<'a> {
    encoder: &'a mut Encoder,
    stream: &'a mut ByteStream,
}

impl DataOutput<'_> {
    pub fn write_boolean(&mut self, value: bool) {
        self.stream.write_u8(u8::from(value));
    }

    pub fn write_byte(&mut self, value: i8) {
        self.stream.write_u8(value as u8);
    }

    pub fn write_unsigned_byte(&mut self, value: u8) {
        self.stream.write_u8(value);
    }

    pub fn write_short(&mut self, value: i16) {
        self.stream.write_i16(value);
    }

    pub fn write_unsigned_short(&mut self, value: u16) {
        self.stream.write_u16(value);
    }

    pub fn write_int(&mut self, value: i32) {
        self.stream.write_i32(value);
    }

    pub fn write_unsigned_int(&mut self, value: u32) {
        self.stream.write_u32(value);
    }

    pub fn write_float(&mut self, value: f32) {
        self.stream.write_f32(value);
    }

    pub fn write_double(&mut self, value: f64) {
        self.stream.write_f64(value);
    }

    /// Write a u16-length-prefixed UTF-8 string
    pub fn write_utf(&mut self, value: &str) {
        self.stream.write_u16(value.len() as u16);
        self.stream.write_bytes(value.as_bytes());
    }

    /// Write raw UTF-8 bytes with no length prefix
    pub fn write_utf_bytes(&mut self, value: &str) {
        self.stream.write_bytes(value.as_bytes());
    }

    pub fn write_bytes(&mut self, value: &[u8]) {
        self.stream.write_bytes(value);
    }

    /// Write a full AMF3 value through the running encoder
    pub fn write_object(&mut self, value: &Value) -> Result<()> {
        self.encoder.encode(self.stream, value)
    }
}

/// ActionScript `IDataInput` surface handed to external-class serializers
pub struct DataInput<'a> {
    decoder: &'a mut Decoder,
    stream: &'a mut ByteStream,
}

impl DataInput<'_> {
    pub fn read_boolean(&mut self) -> Result<bool> {
        Ok(self.stream.read_u8()? != 0)
    }

    pub fn read_byte(&mut self) -> Result<i8> {
        self.stream.read_i8()
    }

    pub fn read_unsigned_byte(&mut self) -> Result<u8> {
        self.stream.read_u8()
    }

    pub fn read_short(&mut self) -> Result<i16> {
        self.stream.read_i16()
    }

    pub fn read_unsigned_short(&mut self) -> Result<u16> {
        self.stream.read_u16()
    }

    pub fn read_int(&mut self) -> Result<i32> {
        self.stream.read_i32()
    }

    pub fn read_unsigned_int(&mut self) -> Result<u32> {
        self.stream.read_u32()
    }

    pub fn read_float(&mut self) -> Result<f32> {
        self.stream.read_f32()
    }

    pub fn read_double(&mut self) -> Result<f64> {
        self.stream.read_f64()
    }

    /// Read a u16-length-prefixed UTF-8 string
    pub fn read_utf(&mut self) -> Result<String> {
        let len = self.stream.read_u16()? as usize;
        self.stream.read_utf8(len)
    }

    /// Read `len` raw UTF-8 bytes
    pub fn read_utf_bytes(&mut self, len: usize) -> Result<String> {
        self.stream.read_utf8(len)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        Ok(self.stream.read_bytes(len)?.to_vec())
    }

    /// Read a full AMF3 value through the running decoder
    pub fn read_object(&mut self) -> Result<Value> {
        self.decoder.read_element(self.stream)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::{register_class, unregister_class, ClassAlias, ExternalHandler};
    use std::sync::Arc;

    fn encoded(value: &Value) -> Vec<u8> {
        encode(value).unwrap().to_vec()
    }

    #[test]
    fn test_u29_layout() {
        let cases: [(u32, &[u8]); 6] = [
            (0, &[0x00]),
            (0x7F, &[0x7F]),
            (0x80, &[0x81, 0x00]),
            (0x3FFF, &[0xFF, 0x7F]),
            (0x4000, &[0x81, 0x80, 0x00]),
            (0x1FFF_FFFF, &[0xFF, 0xFF, 0xFF, 0xFF]),
        ];

        for (value, bytes) in cases {
            let mut stream = ByteStream::new();
            write_u29(&mut stream, value);
            assert_eq!(stream.as_slice(), bytes, "encoding {}", value);

            let mut stream = ByteStream::from(bytes);
            assert_eq!(read_u29(&mut stream).unwrap(), value, "decoding {}", value);
        }
    }

    #[test]
    fn test_u29_roundtrip_samples() {
        for value in [1u32, 127, 128, 5000, 0x20_0000, 0x0FFF_FFFF, 0x1000_0000] {
            let mut stream = ByteStream::new();
            write_u29(&mut stream, value);
            let mut back = ByteStream::from(stream.as_slice());
            assert_eq!(read_u29(&mut back).unwrap(), value);
        }
    }

    #[test]
    fn test_integer_boundaries() {
        assert_eq!(encoded(&Value::Integer(0)), [0x04, 0x00]);
        assert_eq!(
            encoded(&Value::Integer(MAX_29B_INT)),
            [0x04, 0xBF, 0xFF, 0xFF, 0xFF]
        );
        assert_eq!(encoded(&Value::Integer(-1)), [0x04, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(
            encoded(&Value::Integer(MIN_29B_INT)),
            [0x04, 0xC0, 0x80, 0x80, 0x00]
        );

        // one past the positive boundary promotes to Double
        assert_eq!(
            encoded(&Value::Integer(MAX_29B_INT + 1)),
            [0x05, 0x41, 0xB0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
        );

        for n in [0, 1, -1, 127, -128, MAX_29B_INT, MIN_29B_INT, 1 << 29] {
            assert_eq!(decode(&encoded(&Value::Integer(n))).unwrap().as_number(), Some(f64::from(n)));
        }
    }

    #[test]
    fn test_scalars() {
        assert_eq!(encoded(&Value::Undefined), [0x00]);
        assert_eq!(encoded(&Value::Null), [0x01]);
        assert_eq!(encoded(&Value::Bool(false)), [0x02]);
        assert_eq!(encoded(&Value::Bool(true)), [0x03]);

        assert_eq!(decode(&[0x00]).unwrap(), Value::Undefined);
        assert_eq!(decode(&[0x01]).unwrap(), Value::Null);
        assert_eq!(decode(&[0x02]).unwrap(), Value::Bool(false));
        assert_eq!(decode(&[0x03]).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_string_interning() {
        let value: Value = vec!["hello", "hello"].into();
        let bytes = encoded(&value);

        // array header, terminator, inline "hello", then reference 0
        assert_eq!(
            bytes,
            [
                0x09, 0x05, 0x01, 0x06, 0x0B, b'h', b'e', b'l', b'l', b'o', 0x06, 0x00
            ]
        );

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_empty_string_never_interned() {
        let value: Value = vec!["", "", "x"].into();
        let bytes = encoded(&value);
        assert_eq!(
            bytes,
            [0x09, 0x07, 0x01, 0x06, 0x01, 0x06, 0x01, 0x06, 0x03, b'x']
        );

        let mut decoder = Decoder::new();
        let mut stream = ByteStream::from(&bytes[..]);
        decoder.decode(&mut stream).unwrap();
        // only "x" occupies a string slot
        assert!(decoder.context().get_string(0) == Some("x"));
        assert!(decoder.context().get_string(1).is_none());
    }

    #[test]
    fn test_dynamic_object() {
        let mut obj = Object::new();
        obj.insert("x", "y");
        let bytes = encoded(&Value::object(obj));

        assert_eq!(
            bytes,
            [0x0A, 0x0B, 0x01, 0x03, b'x', 0x06, 0x03, b'y', 0x01]
        );

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.get_string("x"), Some("y".into()));
    }

    #[test]
    fn test_cyclic_object() {
        let node = Rc::new(RefCell::new(Object::new()));
        let value = Value::Object(node.clone());
        node.borrow_mut().insert("self", value.clone());

        let bytes = encoded(&value);
        assert_eq!(
            bytes,
            [0x0A, 0x0B, 0x01, 0x09, b's', b'e', b'l', b'f', 0x0A, 0x00, 0x01]
        );

        let decoded = decode(&bytes).unwrap();
        let outer = decoded.as_object().unwrap();
        let inner = decoded.get("self").unwrap();
        assert!(Rc::ptr_eq(outer, inner.as_object().unwrap()));
    }

    #[test]
    fn test_shared_substructure_preserved() {
        let shared = Value::array(Array::from_dense(vec![Value::Integer(1)]));
        let outer = Value::array(Array::from_dense(vec![shared.clone(), shared]));

        let decoded = decode(&encoded(&outer)).unwrap();
        let arr = decoded.as_array().unwrap().borrow();
        let a = arr.dense[0].as_array().unwrap().clone();
        let b = arr.dense[1].as_array().unwrap().clone();
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_typed_object_static_traits() {
        register_class(
            ClassAlias::new("amf3.test.Point")
                .with_static_attrs(["x", "y"])
                .with_dynamic(false),
        );

        let mut p1 = Object::typed("amf3.test.Point");
        p1.insert("x", 1);
        p1.insert("y", 2);
        let mut p2 = Object::typed("amf3.test.Point");
        p2.insert("x", 3);
        p2.insert("y", 4);

        let bytes = encode_all(&[Value::object(p1), Value::object(p2)]).unwrap();

        // first object: inline trait, two static members, STATIC encoding
        assert_eq!(bytes[0], 0x0A);
        assert_eq!(bytes[1], 0x23); // (2 << 4) | (0 << 2) | 3

        // second object reuses the trait by reference: (0 << 2) | 1
        let second = bytes.iter().rposition(|&b| b == 0x0A).unwrap();
        assert_eq!(bytes[second + 1], 0x01);

        let values = decode_all(&bytes).unwrap();
        assert_eq!(values[1].get_number("x"), Some(3.0));
        assert_eq!(values[1].get_number("y"), Some(4.0));

        unregister_class("amf3.test.Point");
    }

    #[test]
    fn test_date_reference() {
        let date = Value::date(Date::from_millis(1_111_111_111_000.0));
        let pair = Value::array(Array::from_dense(vec![date.clone(), date]));

        let bytes = encoded(&pair);
        let decoded = decode(&bytes).unwrap();
        let arr = decoded.as_array().unwrap().borrow();

        let (Value::Date(a), Value::Date(b)) = (&arr.dense[0], &arr.dense[1]) else {
            panic!("expected dates");
        };
        assert!(Rc::ptr_eq(a, b));
        assert_eq!(a.millis, 1_111_111_111_000.0);
    }

    #[test]
    fn test_byte_array_roundtrip() {
        let value = Value::byte_array(vec![0x00, 0xFF, 0x10]);
        let bytes = encoded(&value);
        assert_eq!(bytes, [0x0C, 0x07, 0x00, 0xFF, 0x10]);

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_mixed_array() {
        let mut array = Array::from_dense(vec![Value::Integer(1), Value::Integer(2)]);
        array.insert("name", "mixed");

        let decoded = decode(&encoded(&Value::array(array.clone()))).unwrap();
        let back = decoded.as_array().unwrap().borrow();
        assert_eq!(back.dense.len(), 2);
        assert_eq!(back.get("name"), Some(&Value::String("mixed".into())));
    }

    #[test]
    fn test_empty_assoc_key_refused() {
        let mut array = Array::new();
        array.insert("", 1);

        let err = encode(&Value::array(array)).unwrap_err();
        assert!(matches!(err, Error::Encode(EncodeError::EmptyKey)));
    }

    #[test]
    fn test_vectors_roundtrip() {
        let ints = Value::VectorInt(Rc::new(RefCell::new(Vector::fixed(vec![-1, 0, i32::MAX]))));
        let bytes = encoded(&ints);
        assert_eq!(
            bytes,
            [
                0x0D, 0x07, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00, 0x7F, 0xFF,
                0xFF, 0xFF
            ]
        );
        assert_eq!(decode(&bytes).unwrap(), ints);

        let uints = Value::VectorUint(Rc::new(RefCell::new(Vector::new(vec![0, u32::MAX]))));
        assert_eq!(decode(&encoded(&uints)).unwrap(), uints);

        let doubles = Value::VectorDouble(Rc::new(RefCell::new(Vector::new(vec![0.5, -2.0]))));
        assert_eq!(decode(&encoded(&doubles)).unwrap(), doubles);
    }

    #[test]
    fn test_object_vector_roundtrip() {
        let vector = Value::VectorObject(Rc::new(RefCell::new(ObjectVector {
            type_name: String::new(),
            fixed: false,
            data: vec![Value::Integer(1), Value::String("two".into())],
        })));

        let bytes = encoded(&vector);
        // count 2, growable, anonymous element type
        assert_eq!(&bytes[..4], [0x10, 0x05, 0x00, 0x01]);
        assert_eq!(decode(&bytes).unwrap(), vector);
    }

    #[test]
    fn test_dictionary_roundtrip() {
        let mut dict = Dictionary::new();
        dict.insert(Value::Integer(1), "one");
        dict.insert("key", Value::Bool(true));

        let value = Value::dictionary(dict);
        let bytes = encoded(&value);
        assert_eq!(&bytes[..3], [0x11, 0x05, 0x00]);
        assert_eq!(decode(&bytes).unwrap(), value);
    }

    #[test]
    fn test_xml_roundtrip_and_safety() {
        let value = Value::Xml(Rc::new(crate::xml::Xml::new("<a><b>hi</b></a>")));
        let bytes = encoded(&value);
        assert_eq!(bytes[0], 0x0B);
        assert_eq!(decode(&bytes).unwrap(), value);

        let doc = Value::Xml(Rc::new(crate::xml::Xml::document("<a/>")));
        assert_eq!(encoded(&doc)[0], 0x07);

        let hostile = Value::Xml(Rc::new(crate::xml::Xml::new(
            "<!DOCTYPE foo [<!ELEMENT foo ANY>]><foo/>",
        )));
        let err = decode(&encoded(&hostile)).unwrap_err();
        assert!(matches!(err, Error::Decode(DecodeError::ForbiddenDtd)));
    }

    #[test]
    fn test_reference_out_of_range() {
        // object marker, reference header pointing at slot 1 of an empty table
        let err = decode(&[0x0A, 0x02]).unwrap_err();
        assert!(matches!(
            err,
            Error::Decode(DecodeError::ReferenceOutOfRange(1))
        ));
    }

    #[test]
    fn test_trait_reference_without_trait() {
        // inline object whose trait field is a reference to slot 0 of an
        // empty trait table: header (0 << 2) | 0b01, then LSB=1 for inline
        let err = decode(&[0x0A, 0x01]).unwrap_err();
        assert!(matches!(err, Error::Decode(DecodeError::TraitOutOfRange(0))));
    }

    #[test]
    fn test_unknown_marker() {
        let err = decode(&[0x42]).unwrap_err();
        assert!(matches!(
            err,
            Error::Decode(DecodeError::UnknownMarker(0x42))
        ));
    }

    #[test]
    fn test_strict_unknown_alias() {
        let mut decoder = Decoder::with_strict(true);
        // inline dynamic object with alias "amf3.test.NotRegistered"
        let mut obj = Object::typed("amf3.test.NotRegistered");
        obj.insert("a", 1);
        let bytes = encoded(&Value::object(obj));

        let mut stream = ByteStream::from(&bytes[..]);
        let err = decoder.decode(&mut stream).unwrap_err();
        assert!(matches!(err, Error::UnknownClassAlias(_)));

        // lenient decoding keeps the alias on the object
        let decoded = decode(&bytes).unwrap();
        assert_eq!(
            decoded.as_object().unwrap().borrow().alias.as_deref(),
            Some("amf3.test.NotRegistered")
        );
    }

    struct PayloadHandler;

    impl ExternalHandler for PayloadHandler {
        fn encode(&self, obj: &Object, output: &mut DataOutput<'_>) -> Result<()> {
            let inner = obj.get("payload").cloned().unwrap_or(Value::Null);
            output.write_object(&inner)
        }

        fn decode(&self, obj: &mut Object, input: &mut DataInput<'_>) -> Result<()> {
            let inner = input.read_object()?;
            obj.insert("payload", inner);
            Ok(())
        }
    }

    #[test]
    fn test_externalizable_roundtrip() {
        register_class(
            ClassAlias::new("amf3.test.Wrapper").with_external(Arc::new(PayloadHandler)),
        );

        let mut obj = Object::typed("amf3.test.Wrapper");
        obj.insert("payload", vec![1, 2, 3]);

        let bytes = encoded(&Value::object(obj));
        // trait header 0x07: external, inline trait, inline object
        assert_eq!(bytes[0], 0x0A);
        assert_eq!(bytes[1], 0x07);

        let decoded = decode(&bytes).unwrap();
        let payload = decoded.get("payload").unwrap();
        assert_eq!(payload, vec![1, 2, 3].into());

        unregister_class("amf3.test.Wrapper");
    }

    #[test]
    fn test_externalizable_without_handler() {
        // wire says external, registry has no handler
        let bytes = [
            0x0A, 0x07, 0x19, b'a', b'm', b'f', b'3', b'.', b'n', b'o', b'.', b'H', b'a', b'n',
            b'd',
        ];
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(
            err,
            Error::Decode(DecodeError::MissingExternalHandler(_))
        ));
    }

    #[test]
    fn test_iterator_exhaustion_and_retry() {
        let mut stream = ByteStream::new();
        let mut encoder = Encoder::new();
        encoder
            .encode(&mut stream, &Value::String("first".into()))
            .unwrap();
        let full = encoder.encode_to_bytes(&Value::String("second".into())).unwrap();

        // feed only part of the second element
        stream.append(&full[..3]);

        let mut decoder = Decoder::new();
        {
            let mut values = decoder.iter(&mut stream);
            let first = values.next().unwrap().unwrap();
            assert_eq!(first, Value::String("first".into()));
            assert!(values.next().is_none());
        }

        // table rollback means the partial "second" left no trace
        assert!(decoder.context().get_string(1).is_none());

        stream.append(&full[3..]);
        {
            let mut values = decoder.iter(&mut stream);
            let second = values.next().unwrap().unwrap();
            assert_eq!(second, Value::String("second".into()));
            assert!(values.next().is_none());
        }
    }

    #[test]
    fn test_encode_to_bytes_shares_references() {
        let mut encoder = Encoder::new();
        let first = encoder.encode_to_bytes(&Value::String("hello".into())).unwrap();
        let second = encoder.encode_to_bytes(&Value::String("hello".into())).unwrap();

        assert_eq!(first.as_ref(), [0x06, 0x0B, b'h', b'e', b'l', b'l', b'o']);
        // second element references string slot 0
        assert_eq!(second.as_ref(), [0x06, 0x00]);
    }

    #[test]
    fn test_without_string_references() {
        let mut encoder = Encoder::new().without_string_references();
        let mut stream = ByteStream::new();
        encoder
            .encode(&mut stream, &Value::String("abc".into()))
            .unwrap();
        encoder
            .encode(&mut stream, &Value::String("abc".into()))
            .unwrap();

        let expected = [0x06, 0x07, b'a', b'b', b'c', 0x06, 0x07, b'a', b'b', b'c'];
        assert_eq!(stream.as_slice(), expected);

        // a decoder interns inline strings regardless, and stays consistent
        let values = decode_all(stream.as_slice()).unwrap();
        assert_eq!(values.len(), 2);
    }
}
