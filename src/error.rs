//! Unified error types for the AMF codec

use std::fmt;
use std::io;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all AMF operations
#[derive(Debug)]
pub enum Error {
    /// Ran out of bytes mid-value. Recoverable at the top-level streaming
    /// boundary; fatal when raised inside a nested value.
    EndOfStream,
    /// Malformed wire data
    Decode(DecodeError),
    /// Unencodable host value or alias misconfiguration
    Encode(EncodeError),
    /// A typed object named a class alias that is not registered
    UnknownClassAlias(String),
    /// Internal reference-table invariant violation. Fatal.
    Reference(ReferenceError),
    /// I/O error during SOL file operations
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::EndOfStream => write!(f, "Unexpected end of AMF data"),
            Error::Decode(e) => write!(f, "Decode error: {}", e),
            Error::Encode(e) => write!(f, "Encode error: {}", e),
            Error::UnknownClassAlias(name) => write!(f, "Unknown class alias: {:?}", name),
            Error::Reference(e) => write!(f, "Reference table error: {}", e),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<DecodeError> for Error {
    fn from(err: DecodeError) -> Self {
        Error::Decode(err)
    }
}

impl From<EncodeError> for Error {
    fn from(err: EncodeError) -> Self {
        Error::Encode(err)
    }
}

impl From<ReferenceError> for Error {
    fn from(err: ReferenceError) -> Self {
        Error::Reference(err)
    }
}

/// Malformed wire data
#[derive(Debug)]
pub enum DecodeError {
    /// Type marker byte with no assigned meaning
    UnknownMarker(u8),
    /// A string payload was not valid UTF-8
    InvalidUtf8,
    /// Back-reference index past the end of the reference table
    ReferenceOutOfRange(usize),
    /// Trait reference with no matching trait slot
    TraitOutOfRange(usize),
    /// Trait flag bits claim an impossible member encoding
    InvalidTraitFlags(u32),
    /// AMF0 object body not terminated by the 0x00 0x00 0x09 sentinel
    InvalidObjectEnd,
    /// Object/array nesting exceeded the depth guard
    NestingTooDeep,
    /// Externalizable object with no handler registered for its alias
    MissingExternalHandler(String),
    /// XML payload contains a DOCTYPE declaration
    ForbiddenDtd,
    /// XML payload contains an entity declaration
    ForbiddenEntity,
    /// SOL container header violation
    InvalidSolHeader(&'static str),
    /// SOL body entry missing its trailing padding byte
    MissingPadding,
    /// SOL header names an AMF version other than 0 or 3
    UnknownAmfVersion(u8),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnknownMarker(m) => write!(f, "Unknown AMF marker: 0x{:02x}", m),
            DecodeError::InvalidUtf8 => write!(f, "Invalid UTF-8 in AMF string"),
            DecodeError::ReferenceOutOfRange(idx) => {
                write!(f, "Reference index out of range: {}", idx)
            }
            DecodeError::TraitOutOfRange(idx) => {
                write!(f, "Trait reference out of range: {}", idx)
            }
            DecodeError::InvalidTraitFlags(bits) => {
                write!(f, "Invalid trait flags: 0x{:x}", bits)
            }
            DecodeError::InvalidObjectEnd => write!(f, "Invalid object end marker"),
            DecodeError::NestingTooDeep => write!(f, "AMF nesting too deep"),
            DecodeError::MissingExternalHandler(alias) => {
                write!(f, "No external handler registered for alias {:?}", alias)
            }
            DecodeError::ForbiddenDtd => write!(f, "XML DOCTYPE declarations are forbidden"),
            DecodeError::ForbiddenEntity => write!(f, "XML entity declarations are forbidden"),
            DecodeError::InvalidSolHeader(what) => write!(f, "Invalid SOL header: {}", what),
            DecodeError::MissingPadding => write!(f, "Missing SOL padding byte"),
            DecodeError::UnknownAmfVersion(v) => write!(f, "Unknown AMF version: {}", v),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Unencodable host value or alias misconfiguration
#[derive(Debug)]
pub enum EncodeError {
    /// A registered alias declares a static member the object does not carry
    MissingStaticMember { alias: String, member: String },
    /// AMF3 cannot represent an empty associative key
    EmptyKey,
    /// Custom value with no matching adapter in the dispatch table
    Unencodable(String),
    /// External alias with no handler registered
    MissingExternalHandler(String),
    /// AMF0 has no rendering for a dictionary with non-string keys
    NonStringDictionaryKey,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::MissingStaticMember { alias, member } => write!(
                f,
                "Alias {:?} declares static member {:?} not present on object",
                alias, member
            ),
            EncodeError::EmptyKey => write!(f, "Empty string keys cannot be encoded"),
            EncodeError::Unencodable(what) => write!(f, "Unable to encode {}", what),
            EncodeError::MissingExternalHandler(alias) => {
                write!(f, "No external handler registered for alias {:?}", alias)
            }
            EncodeError::NonStringDictionaryKey => {
                write!(f, "AMF0 dictionaries require string keys")
            }
        }
    }
}

impl std::error::Error for EncodeError {}

/// Internal reference-table invariant violation
#[derive(Debug)]
pub enum ReferenceError {
    /// The identity map points at an index the table does not hold
    Corrupt { index: usize, len: usize },
}

impl fmt::Display for ReferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceError::Corrupt { index, len } => {
                write!(f, "Reference table corrupt: index {} with length {}", index, len)
            }
        }
    }
}

impl std::error::Error for ReferenceError {}
