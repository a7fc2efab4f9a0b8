//! Class aliases and the process-wide alias registry
//!
//! An alias binds a wire class name to the metadata the codecs need when
//! they meet an object of that class: which members are static (and in what
//! order), whether the object accepts dynamic members, whether the class
//! serializes its own body (externalizable), and how member names are
//! rewritten between the host and the wire.
//!
//! The registry is process-wide. Reads during a codec pass go through the
//! per-pass cache in [`Context`](crate::codec::Context); registrations must
//! be serialized by the caller and must not happen while a pass is in
//! flight.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use crate::amf3::{DataInput, DataOutput};
use crate::error::{EncodeError, Error, Result};
use crate::value::{Object, Value};

/// Body serializer for an externalizable class
///
/// The wire gives an externalizable object nothing but its alias name; the
/// class itself owns the body layout. Handlers read and write through the
/// ActionScript-style [`DataInput`]/[`DataOutput`] surfaces, which expose
/// both raw fixed-width primitives and nested AMF values.
pub trait ExternalHandler: Send + Sync {
    /// Write the object body
    fn encode(&self, obj: &Object, output: &mut DataOutput<'_>) -> Result<()>;

    /// Read the object body into the freshly registered placeholder
    fn decode(&self, obj: &mut Object, input: &mut DataInput<'_>) -> Result<()>;
}

/// Metadata describing how one wire class name maps onto host objects
pub struct ClassAlias {
    /// The class name as it appears on the wire
    pub alias: String,
    /// Static members, in declared (wire) order
    pub static_attrs: Vec<String>,
    /// Members never carried over the wire in either direction
    pub exclude_attrs: Vec<String>,
    /// Members accepted on encode but dropped when decoding
    pub readonly_attrs: Vec<String>,
    /// Member renames, host name → wire name (applied in reverse on decode)
    pub synonym_attrs: HashMap<String, String>,
    /// Object accepts dynamic members (default true)
    pub dynamic: bool,
    /// Body is delegated to the class's own serializer
    pub external: bool,
    /// Decoded values are wrapped in a proxy view by the object-framework
    /// adapters; carried as metadata only, the core does not act on it
    pub proxy: bool,
    /// In AMF0 output, objects of this class are written through the 0x11
    /// AVM+ upgrade marker as AMF3
    pub amf3: bool,
    /// Serializer for `external` classes
    pub external_handler: Option<Arc<dyn ExternalHandler>>,
}

impl ClassAlias {
    /// Create an alias with defaults: dynamic, no static members
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            static_attrs: Vec::new(),
            exclude_attrs: Vec::new(),
            readonly_attrs: Vec::new(),
            synonym_attrs: HashMap::new(),
            dynamic: true,
            external: false,
            proxy: false,
            amf3: false,
            external_handler: None,
        }
    }

    /// Declare the static member list, in wire order
    pub fn with_static_attrs<I, S>(mut self, attrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.static_attrs = attrs.into_iter().map(Into::into).collect();
        self
    }

    /// Declare members excluded from the wire
    pub fn with_exclude_attrs<I, S>(mut self, attrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_attrs = attrs.into_iter().map(Into::into).collect();
        self
    }

    /// Declare members dropped on decode
    pub fn with_readonly_attrs<I, S>(mut self, attrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.readonly_attrs = attrs.into_iter().map(Into::into).collect();
        self
    }

    /// Add a host→wire member rename
    pub fn with_synonym(mut self, host: impl Into<String>, wire: impl Into<String>) -> Self {
        self.synonym_attrs.insert(host.into(), wire.into());
        self
    }

    /// Set whether the object accepts dynamic members
    pub fn with_dynamic(mut self, dynamic: bool) -> Self {
        self.dynamic = dynamic;
        self
    }

    /// Mark the class externalizable and install its body serializer
    pub fn with_external(mut self, handler: Arc<dyn ExternalHandler>) -> Self {
        self.external = true;
        self.external_handler = Some(handler);
        self
    }

    /// Mark decoded values for proxy wrapping by external adapters
    pub fn with_proxy(mut self) -> Self {
        self.proxy = true;
        self
    }

    /// Route AMF0 encoding of this class through the AMF3 upgrade marker
    pub fn with_amf3(mut self) -> Self {
        self.amf3 = true;
        self
    }

    fn wire_name<'a>(&'a self, host: &'a str) -> &'a str {
        self.synonym_attrs.get(host).map(String::as_str).unwrap_or(host)
    }

    fn host_name<'a>(&'a self, wire: &'a str) -> &'a str {
        self.synonym_attrs
            .iter()
            .find(|(_, w)| w.as_str() == wire)
            .map(|(h, _)| h.as_str())
            .unwrap_or(wire)
    }

    /// Split an object's members into the static values (in declared order,
    /// under wire names) and the remaining dynamic entries (insertion
    /// order, under wire names). Excluded members are dropped; a missing
    /// static member is an encode error; dynamic entries are dropped when
    /// the alias is not dynamic.
    pub(crate) fn encodable_entries(
        &self,
        obj: &Object,
    ) -> Result<(Vec<(String, Value)>, Vec<(String, Value)>)> {
        let mut statics = Vec::with_capacity(self.static_attrs.len());

        for host in &self.static_attrs {
            let value = obj.get(host).cloned().ok_or_else(|| {
                Error::Encode(EncodeError::MissingStaticMember {
                    alias: self.alias.clone(),
                    member: host.clone(),
                })
            })?;
            statics.push((self.wire_name(host).to_owned(), value));
        }

        let mut dynamics = Vec::new();
        if self.dynamic {
            for (host, value) in obj.iter() {
                if self.static_attrs.iter().any(|a| a == host) {
                    continue;
                }
                if self.exclude_attrs.iter().any(|a| a == host) {
                    continue;
                }
                dynamics.push((self.wire_name(host).to_owned(), value.clone()));
            }
        }

        Ok((statics, dynamics))
    }

    /// Rewrite decoded wire entries into host members: reverse the synonym
    /// renames, then drop excluded and read-only members.
    pub(crate) fn apply_decoded(&self, obj: &mut Object) {
        let entries = obj.take_entries();
        let mut rewritten = Vec::with_capacity(entries.len());

        for (wire, value) in entries {
            let host = self.host_name(&wire).to_owned();
            if self.exclude_attrs.iter().any(|a| *a == host) {
                continue;
            }
            if self.readonly_attrs.iter().any(|a| *a == host) {
                continue;
            }
            rewritten.push((host, value));
        }

        obj.set_entries(rewritten);
    }
}

impl fmt::Debug for ClassAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassAlias")
            .field("alias", &self.alias)
            .field("static_attrs", &self.static_attrs)
            .field("dynamic", &self.dynamic)
            .field("external", &self.external)
            .field("proxy", &self.proxy)
            .field("amf3", &self.amf3)
            .finish_non_exhaustive()
    }
}

static REGISTRY: OnceLock<RwLock<HashMap<String, Arc<ClassAlias>>>> = OnceLock::new();

fn registry() -> &'static RwLock<HashMap<String, Arc<ClassAlias>>> {
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register an alias process-wide. A later registration under the same
/// name wins. Must not be called while a codec pass is in flight.
pub fn register_class(alias: ClassAlias) -> Arc<ClassAlias> {
    let alias = Arc::new(alias);
    let mut map = registry().write().expect("alias registry lock poisoned");

    tracing::debug!(alias = %alias.alias, external = alias.external, "Class alias registered");
    map.insert(alias.alias.clone(), alias.clone());

    alias
}

/// Remove an alias by wire name, returning it if it was registered
pub fn unregister_class(name: &str) -> Option<Arc<ClassAlias>> {
    let mut map = registry().write().expect("alias registry lock poisoned");
    let removed = map.remove(name);

    if removed.is_some() {
        tracing::debug!(alias = %name, "Class alias unregistered");
    }

    removed
}

/// Look up an alias by wire name
pub fn get_class_alias(name: &str) -> Option<Arc<ClassAlias>> {
    registry()
        .read()
        .expect("alias registry lock poisoned")
        .get(name)
        .cloned()
}
