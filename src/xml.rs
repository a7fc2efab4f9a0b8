//! XML collaborator interface
//!
//! The codec treats XML values as opaque UTF-8 plus a kind tag; turning
//! that text into a real document tree is delegated to an [`XmlProvider`].
//! The default provider performs no parsing at all — it only refuses
//! DOCTYPE and entity declarations, so that payloads decoded with the
//! defaults can never smuggle in XXE-style constructs.

use std::sync::{Arc, OnceLock, RwLock};

use crate::error::{DecodeError, Error, Result};

/// Which of the two AMF XML flavors a value carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmlKind {
    /// Legacy `flash.xml.XMLDocument` (AMF0 0x0F, AMF3 0x07)
    Document,
    /// ActionScript 3 E4X XML (AMF3 0x0B)
    Xml,
}

/// An XML value: opaque text plus its wire flavor
#[derive(Debug, Clone, PartialEq)]
pub struct Xml {
    pub kind: XmlKind,
    pub content: String,
}

impl Xml {
    /// Create a legacy XMLDocument value
    pub fn document(content: impl Into<String>) -> Self {
        Self {
            kind: XmlKind::Document,
            content: content.into(),
        }
    }

    /// Create an E4X XML value
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            kind: XmlKind::Xml,
            content: content.into(),
        }
    }
}

/// The seam between the codec and an actual XML library
pub trait XmlProvider: Send + Sync {
    /// Build an [`Xml`] value from wire bytes, enforcing the safety flags
    fn from_bytes(
        &self,
        data: &[u8],
        kind: XmlKind,
        forbid_dtd: bool,
        forbid_entities: bool,
    ) -> Result<Xml>;

    /// Flatten an [`Xml`] value back to wire bytes
    fn to_bytes(&self, xml: &Xml) -> Vec<u8> {
        xml.content.clone().into_bytes()
    }
}

/// Validating pass-through provider used when no real XML library is wired in
#[derive(Debug, Default)]
pub struct DefaultXmlProvider;

impl XmlProvider for DefaultXmlProvider {
    fn from_bytes(
        &self,
        data: &[u8],
        kind: XmlKind,
        forbid_dtd: bool,
        forbid_entities: bool,
    ) -> Result<Xml> {
        let content = std::str::from_utf8(data)
            .map_err(|_| Error::Decode(DecodeError::InvalidUtf8))?;

        if forbid_dtd && content.contains("<!DOCTYPE") {
            return Err(Error::Decode(DecodeError::ForbiddenDtd));
        }
        if forbid_entities && content.contains("<!ENTITY") {
            return Err(Error::Decode(DecodeError::ForbiddenEntity));
        }

        Ok(Xml {
            kind,
            content: content.to_owned(),
        })
    }
}

static PROVIDER: OnceLock<RwLock<Arc<dyn XmlProvider>>> = OnceLock::new();

fn provider_slot() -> &'static RwLock<Arc<dyn XmlProvider>> {
    PROVIDER.get_or_init(|| RwLock::new(Arc::new(DefaultXmlProvider)))
}

/// Install a process-wide XML provider. Must not be called while a codec
/// pass is in flight.
pub fn set_xml_provider(provider: Arc<dyn XmlProvider>) {
    *provider_slot().write().expect("xml provider lock poisoned") = provider;
}

/// The currently installed provider
pub(crate) fn provider() -> Arc<dyn XmlProvider> {
    provider_slot().read().expect("xml provider lock poisoned").clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_provider_passthrough() {
        let p = DefaultXmlProvider;
        let xml = p
            .from_bytes(b"<a><b>hello</b></a>", XmlKind::Document, true, true)
            .unwrap();
        assert_eq!(xml.kind, XmlKind::Document);
        assert_eq!(xml.content, "<a><b>hello</b></a>");
        assert_eq!(p.to_bytes(&xml), b"<a><b>hello</b></a>");
    }

    #[test]
    fn test_default_provider_rejects_dtd() {
        let p = DefaultXmlProvider;
        let doc = b"<!DOCTYPE foo [<!ELEMENT foo ANY>]><foo/>";

        let err = p.from_bytes(doc, XmlKind::Xml, true, true).unwrap_err();
        assert!(matches!(err, Error::Decode(DecodeError::ForbiddenDtd)));

        // allowed when explicitly opted out
        assert!(p.from_bytes(doc, XmlKind::Xml, false, true).is_ok());
    }

    #[test]
    fn test_default_provider_rejects_entities() {
        let p = DefaultXmlProvider;
        let doc = b"<a><!ENTITY xxe SYSTEM \"file:///etc/passwd\"></a>";

        let err = p.from_bytes(doc, XmlKind::Xml, false, true).unwrap_err();
        assert!(matches!(err, Error::Decode(DecodeError::ForbiddenEntity)));
    }

    #[test]
    fn test_invalid_utf8() {
        let p = DefaultXmlProvider;
        let err = p
            .from_bytes(&[0xFF, 0xFE], XmlKind::Document, true, true)
            .unwrap_err();
        assert!(matches!(err, Error::Decode(DecodeError::InvalidUtf8)));
    }
}
