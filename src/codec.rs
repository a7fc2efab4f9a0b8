//! Shared codec infrastructure: reference tables and the per-pass context
//!
//! AMF3 maintains three parallel interning tables (objects, strings,
//! traits) and AMF0 one (objects). Both directions share the rules: indices
//! are assigned 0,1,2,… in order of first write or read, an encoder must
//! consult the table *before* writing an inline body and append *before*
//! writing it (so self-referential graphs terminate), and a decoder must
//! register a placeholder node before filling its children.
//!
//! Object tables key on node identity (the heap address of the shared
//! node, which the table pins alive); the string table keys on content, the
//! original's "use_hash" mode, so interned literals cannot churn.

use std::collections::HashMap;
use std::sync::Arc;

use crate::alias::{self, ClassAlias};
use crate::error::{Error, ReferenceError, Result};
use crate::value::Value;

/// Identity-keyed reference table for complex values
#[derive(Debug, Default)]
pub struct ReferenceTable {
    values: Vec<Value>,
    indices: HashMap<usize, usize>,
}

impl ReferenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of referenced values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Drop all references
    pub fn clear(&mut self) {
        self.values.clear();
        self.indices.clear();
    }

    /// Fetch the value stored at `index`. The returned value shares the
    /// node identity of the stored one.
    pub fn get(&self, index: usize) -> Option<Value> {
        self.values.get(index).cloned()
    }

    /// Look up the index previously assigned to this node, if any
    pub fn reference_to(&self, value: &Value) -> Result<Option<usize>> {
        let identity = match value.identity() {
            Some(id) => id,
            None => return Ok(None),
        };

        match self.indices.get(&identity) {
            Some(&index) if index < self.values.len() => Ok(Some(index)),
            Some(&index) => Err(Error::Reference(ReferenceError::Corrupt {
                index,
                len: self.values.len(),
            })),
            None => Ok(None),
        }
    }

    /// Append a value, assigning the next index. Uniqueness is not checked;
    /// callers consult [`reference_to`](Self::reference_to) first.
    pub fn add(&mut self, value: &Value) -> usize {
        let index = self.values.len();
        if let Some(identity) = value.identity() {
            self.indices.insert(identity, index);
        }
        self.values.push(value.clone());
        index
    }

    /// Roll the table back to `len` entries (streaming retry support)
    pub fn truncate(&mut self, len: usize) {
        while self.values.len() > len {
            if let Some(v) = self.values.pop() {
                if let Some(identity) = v.identity() {
                    self.indices.remove(&identity);
                }
            }
        }
    }
}

/// Content-keyed string interning table (AMF3 only)
///
/// The empty string never occupies a slot; it is written inline each time.
#[derive(Debug, Default)]
pub struct StringTable {
    strings: Vec<String>,
    indices: HashMap<String, usize>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn clear(&mut self) {
        self.strings.clear();
        self.indices.clear();
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.strings.get(index).map(String::as_str)
    }

    pub fn reference_to(&self, s: &str) -> Option<usize> {
        self.indices.get(s).copied()
    }

    /// Intern a string, returning its new index. Empty strings are refused.
    pub fn add(&mut self, s: &str) -> Option<usize> {
        if s.is_empty() {
            return None;
        }
        let index = self.strings.len();
        self.strings.push(s.to_owned());
        self.indices.insert(s.to_owned(), index);
        Some(index)
    }

    pub fn truncate(&mut self, len: usize) {
        while self.strings.len() > len {
            if let Some(s) = self.strings.pop() {
                self.indices.remove(&s);
            }
        }
    }
}

/// Per-pass codec state shared by both AMF versions
///
/// A context is created per encode or decode call and may be reused across
/// calls to keep reference tables shared — an explicit opt-in. The
/// class-alias cache is consulted lazily and only invalidated by
/// [`clear`](Self::clear); registry mutations during a pass are the
/// caller's bug.
#[derive(Debug)]
pub struct Context {
    /// Object reference table
    pub(crate) objects: ReferenceTable,
    /// Scratch storage for adapter hooks and post-decode processors
    pub extra: HashMap<String, Value>,
    /// Refuse DOCTYPE declarations in decoded XML (default true)
    pub forbid_dtd: bool,
    /// Refuse entity declarations in decoded XML (default true)
    pub forbid_entities: bool,
    aliases: HashMap<String, Arc<ClassAlias>>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            objects: ReferenceTable::new(),
            extra: HashMap::new(),
            forbid_dtd: true,
            forbid_entities: true,
            aliases: HashMap::new(),
        }
    }

    /// Clear all per-pass state
    pub fn clear(&mut self) {
        self.objects.clear();
        self.aliases.clear();
        self.extra.clear();
    }

    /// Fetch a referenced object
    pub fn get_object(&self, index: usize) -> Option<Value> {
        self.objects.get(index)
    }

    /// Look up the reference index for a node already seen this pass
    pub fn object_reference(&self, value: &Value) -> Result<Option<usize>> {
        self.objects.reference_to(value)
    }

    /// Record a node, assigning the next reference index
    pub fn add_object(&mut self, value: &Value) -> usize {
        self.objects.add(value)
    }

    /// Number of objects referenced so far
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Resolve a class alias by wire name, caching the result for this
    /// pass. Unregistered names produce an anonymous-style dynamic alias,
    /// or [`Error::UnknownClassAlias`] when `strict` is set.
    pub fn class_alias(&mut self, name: &str, strict: bool) -> Result<Arc<ClassAlias>> {
        if let Some(alias) = self.aliases.get(name) {
            return Ok(alias.clone());
        }

        let alias = match alias::get_class_alias(name) {
            Some(alias) => alias,
            None if strict => return Err(Error::UnknownClassAlias(name.to_owned())),
            None => Arc::new(ClassAlias::new(name)),
        };

        self.aliases.insert(name.to_owned(), alias.clone());
        Ok(alias)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Array;

    #[test]
    fn test_reference_table_identity() {
        let mut table = ReferenceTable::new();

        let a = Value::array(Array::new());
        let shared = a.clone();
        let b = Value::array(Array::new());

        assert_eq!(table.reference_to(&a).unwrap(), None);
        assert_eq!(table.add(&a), 0);
        assert_eq!(table.add(&b), 1);

        // a clone of the same node resolves to the same slot
        assert_eq!(table.reference_to(&shared).unwrap(), Some(0));
        assert_eq!(table.reference_to(&b).unwrap(), Some(1));

        // scalars are never reference-eligible
        assert_eq!(table.reference_to(&Value::Integer(4)).unwrap(), None);

        let fetched = table.get(0).unwrap();
        assert_eq!(fetched.identity(), a.identity());
    }

    #[test]
    fn test_reference_table_truncate() {
        let mut table = ReferenceTable::new();
        let a = Value::array(Array::new());
        let b = Value::array(Array::new());
        table.add(&a);
        table.add(&b);

        table.truncate(1);
        assert_eq!(table.len(), 1);
        assert_eq!(table.reference_to(&a).unwrap(), Some(0));
        assert_eq!(table.reference_to(&b).unwrap(), None);
    }

    #[test]
    fn test_string_table_never_interns_empty() {
        let mut table = StringTable::new();
        assert_eq!(table.add(""), None);
        assert_eq!(table.len(), 0);

        assert_eq!(table.add("hello"), Some(0));
        assert_eq!(table.add("world"), Some(1));
        assert_eq!(table.reference_to("hello"), Some(0));
        assert_eq!(table.get(1), Some("world"));
        assert_eq!(table.reference_to(""), None);
    }

    #[test]
    fn test_context_alias_cache_and_fallback() {
        let mut ctx = Context::new();

        // unknown alias, lenient: synthesized dynamic alias with the name
        let alias = ctx.class_alias("org.example.Nope", false).unwrap();
        assert_eq!(alias.alias, "org.example.Nope");
        assert!(alias.dynamic);

        // strict mode refuses, but the cached lenient entry still answers
        let again = ctx.class_alias("org.example.Nope", true).unwrap();
        assert!(Arc::ptr_eq(&alias, &again));

        let err = ctx.class_alias("org.example.AlsoNope", true).unwrap_err();
        assert!(matches!(err, Error::UnknownClassAlias(_)));
    }
}
