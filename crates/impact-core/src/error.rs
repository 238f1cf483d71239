use std::path::PathBuf;
use thiserror::Error;

use crate::element::ElementType;

/// Failures of the element line encoder/decoder.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("no encoder for element type '{element_type}' (element '{name}')")]
    UnsupportedType {
        name: String,
        element_type: ElementType,
    },

    #[error("unknown itype {itype} in line: {line}")]
    UnknownItype { itype: i32, line: String },

    #[error("bad numeric token '{token}' in line: {line}")]
    BadToken { token: String, line: String },

    #[error("element line needs at least 4 tokens: {line}")]
    Truncated { line: String },
}

/// Failures of the `"<target>:<key>"` property surface.
#[derive(Debug, Error)]
pub enum PropertyError {
    #[error("malformed property key '{0}': expected '<name>:<key>'")]
    MalformedKey(String),

    #[error("no element named '{0}'")]
    UnknownElement(String),

    #[error("element '{element}' has no numeric field '{key}'")]
    UnknownField { element: String, key: String },
}

/// Failures while reading or writing input files.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("header block ended after {found} of {expected} lines")]
    ShortHeader { found: usize, expected: usize },

    #[error("bad header value '{token}' on line {line_no}")]
    BadHeaderValue { token: String, line_no: usize },

    #[error("bad number '{token}' in {path}")]
    BadTable { token: String, path: PathBuf },

    #[error("header requests particle input from file but none is set")]
    MissingParticleFile,

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl InputError {
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum DigestError {
    #[error("failed to serialize keyed data: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to read '{path}' for digest: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
