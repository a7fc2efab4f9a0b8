//! amf-rs: AMF0/AMF3 codec and Local Shared Object library
//!
//! AMF (Action Message Format) is the binary serialization used by the
//! Flash Player family for remoting envelopes, RPC arguments and Local
//! Shared Objects. This library provides:
//!
//! - AMF0 and AMF3 encoders and decoders over a unified [`Value`] model
//! - Full reference-table semantics: shared nodes and cycles survive a
//!   round trip in both directions
//! - A process-wide class-alias registry with static/dynamic/externalizable
//!   object support and member-name rewriting
//! - The SOL (".sol" file) container with atomic save
//! - Extension hooks: a type-dispatch table for custom payloads,
//!   post-decode processors, and a pluggable XML collaborator
//!
//! # Example
//!
//! ```
//! use amf_rs::{amf3, Object, Value};
//!
//! let mut obj = Object::new();
//! obj.insert("level", 4);
//! obj.insert("name", "Ada");
//!
//! let bytes = amf3::encode(&Value::object(obj)).unwrap();
//! let back = amf3::decode(&bytes).unwrap();
//! assert_eq!(back.get_number("level"), Some(4.0));
//! assert_eq!(back.get_string("name"), Some("Ada".into()));
//! ```
//!
//! A codec pass is single-threaded: a context, a codec and its byte stream
//! form one private mutable work set. Distinct passes on distinct contexts
//! are independent. The alias registry and the dispatch table are
//! process-wide; register before starting a pass, never during one.

pub mod alias;
pub mod amf0;
pub mod amf3;
pub mod codec;
pub mod dispatch;
pub mod error;
pub mod sol;
pub mod stream;
pub mod value;
pub mod xml;

// Re-export main types for convenience
pub use alias::{get_class_alias, register_class, unregister_class, ClassAlias, ExternalHandler};
pub use codec::Context;
pub use dispatch::{add_post_decode_processor, add_type, CustomValue, ElementSink};
pub use error::{DecodeError, EncodeError, Error, ReferenceError, Result};
pub use sol::Sol;
pub use stream::{ByteStream, Endian};
pub use value::{Array, Date, Dictionary, Object, ObjectVector, Value, Vector};
pub use xml::{set_xml_provider, Xml, XmlKind, XmlProvider};

/// AMF version 0 wire format
pub const AMF0: u8 = 0;

/// AMF version 3 wire format
pub const AMF3: u8 = 3;
