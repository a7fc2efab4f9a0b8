//! Encoder extension table and post-decode processors
//!
//! The `Value` enum closes over every built-in wire type, so the
//! extensibility seam lives in [`Value::Custom`]: a payload the codecs know
//! nothing about, matched against the process-wide dispatch table. Each
//! entry pairs a predicate with an adapter; the first entry whose predicate
//! accepts the value runs, and its adapter either writes the wire bytes
//! itself through the [`ElementSink`] or returns a replacement value for
//! the encoder to recurse on.
//!
//! Post-decode processors run once per top-level decoded element, outermost
//! value only, in registration order.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{OnceLock, RwLock};

use crate::error::Result;
use crate::stream::ByteStream;
use crate::value::Value;

/// Extension payload carried by [`Value::Custom`]
pub trait CustomValue: Debug {
    /// Downcasting hook for predicates and adapters
    fn as_any(&self) -> &dyn Any;

    /// Name used in error messages when no adapter matches
    fn type_name(&self) -> &str {
        "custom value"
    }
}

/// Write access handed to adapters: recurse into the running encoder or
/// drop to the raw stream
pub trait ElementSink {
    /// Encode a full AMF value at the current position
    fn write_element(&mut self, value: &Value) -> Result<()>;

    /// The underlying byte stream, for adapters that own their layout
    fn stream(&mut self) -> &mut ByteStream;
}

type Predicate = Box<dyn Fn(&Value) -> bool + Send + Sync>;
type Adapter = Box<dyn Fn(&Value, &mut dyn ElementSink) -> Result<Option<Value>> + Send + Sync>;
type Processor = Box<dyn Fn(Value, &mut HashMap<String, Value>) -> Value + Send + Sync>;

static TYPE_MAP: OnceLock<RwLock<Vec<(Predicate, Adapter)>>> = OnceLock::new();
static POST_DECODE: OnceLock<RwLock<Vec<Processor>>> = OnceLock::new();

fn type_map() -> &'static RwLock<Vec<(Predicate, Adapter)>> {
    TYPE_MAP.get_or_init(|| RwLock::new(Vec::new()))
}

fn post_decode() -> &'static RwLock<Vec<Processor>> {
    POST_DECODE.get_or_init(|| RwLock::new(Vec::new()))
}

/// Append a `(predicate, adapter)` pair to the process-wide dispatch
/// table. Entries are consulted in registration order; the adapter may
/// return `Some(replacement)` for the encoder to encode in the value's
/// place, or `None` after writing directly to the sink. Must not be called
/// while a codec pass is in flight.
pub fn add_type<P, A>(predicate: P, adapter: A)
where
    P: Fn(&Value) -> bool + Send + Sync + 'static,
    A: Fn(&Value, &mut dyn ElementSink) -> Result<Option<Value>> + Send + Sync + 'static,
{
    type_map()
        .write()
        .expect("type map lock poisoned")
        .push((Box::new(predicate), Box::new(adapter)));
}

/// Drop every registered type adapter
pub fn clear_types() {
    type_map().write().expect("type map lock poisoned").clear();
}

/// Register a processor applied to each top-level decoded value
pub fn add_post_decode_processor<F>(processor: F)
where
    F: Fn(Value, &mut HashMap<String, Value>) -> Value + Send + Sync + 'static,
{
    post_decode()
        .write()
        .expect("post decode lock poisoned")
        .push(Box::new(processor));
}

/// Drop every registered post-decode processor
pub fn clear_post_decode_processors() {
    post_decode().write().expect("post decode lock poisoned").clear();
}

/// Run the dispatch table against `value`. Returns false when no predicate
/// matched (the value is unencodable as far as the table is concerned).
pub(crate) fn dispatch(value: &Value, sink: &mut dyn ElementSink) -> Result<bool> {
    let table = type_map().read().expect("type map lock poisoned");

    for (predicate, adapter) in table.iter() {
        if predicate(value) {
            if let Some(replacement) = adapter(value, sink)? {
                sink.write_element(&replacement)?;
            }
            return Ok(true);
        }
    }

    Ok(false)
}

/// Run the post-decode chain over a finished top-level value
pub(crate) fn finalise(mut value: Value, extra: &mut HashMap<String, Value>) -> Value {
    let processors = post_decode().read().expect("post decode lock poisoned");

    for processor in processors.iter() {
        value = processor(value, extra);
    }

    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[derive(Debug)]
    struct Fraction {
        num: i32,
        den: i32,
    }

    impl CustomValue for Fraction {
        fn as_any(&self) -> &dyn Any {
            self
        }

        fn type_name(&self) -> &str {
            "Fraction"
        }
    }

    struct NullSink {
        stream: ByteStream,
        written: Vec<Value>,
    }

    impl ElementSink for NullSink {
        fn write_element(&mut self, value: &Value) -> Result<()> {
            self.written.push(value.clone());
            Ok(())
        }

        fn stream(&mut self) -> &mut ByteStream {
            &mut self.stream
        }
    }

    fn is_fraction(value: &Value) -> bool {
        matches!(value, Value::Custom(c) if c.as_any().is::<Fraction>())
    }

    #[test]
    fn test_adapter_replacement() {
        add_type(is_fraction, |value, _sink| {
            let Value::Custom(c) = value else {
                return Ok(None);
            };
            let f = c.as_any().downcast_ref::<Fraction>().unwrap();
            Ok(Some(Value::Double(f64::from(f.num) / f64::from(f.den))))
        });

        let mut sink = NullSink {
            stream: ByteStream::new(),
            written: Vec::new(),
        };

        let value = Value::Custom(Rc::new(Fraction { num: 1, den: 2 }));
        assert!(dispatch(&value, &mut sink).unwrap());
        assert_eq!(sink.written, vec![Value::Double(0.5)]);

        // an unmatched value reports false and writes nothing
        #[derive(Debug)]
        struct Opaque;
        impl CustomValue for Opaque {
            fn as_any(&self) -> &dyn Any {
                self
            }
        }
        let unmatched = Value::Custom(Rc::new(Opaque));
        assert!(!dispatch(&unmatched, &mut sink).unwrap());
        assert_eq!(sink.written.len(), 1);
    }

    #[test]
    fn test_post_decode_chain() {
        // keyed to a sentinel so concurrent tests decoding other values
        // are not affected
        add_post_decode_processor(|value, extra| {
            if value.as_str() == Some("__processor_sentinel__") {
                extra.insert("seen".into(), Value::Bool(true));
                return Value::String("rewritten".into());
            }
            value
        });

        let mut extra = HashMap::new();
        let out = finalise(Value::String("__processor_sentinel__".into()), &mut extra);
        assert_eq!(out, Value::String("rewritten".into()));
        assert_eq!(extra.get("seen"), Some(&Value::Bool(true)));

        let untouched = finalise(Value::Integer(3), &mut extra);
        assert_eq!(untouched, Value::Integer(3));
    }
}
