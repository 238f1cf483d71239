//! Impact-T input model: beamline elements, their line codec, the run
//! header, input file I/O and canonical digests.

pub mod codec;
pub mod digest;
pub mod element;
pub mod error;
pub mod fsutil;
pub mod header;
pub mod input;
pub mod lattice;
pub mod validate;

pub use codec::{decode_line, element_line, encode, lattice_lines, parse_lattice, Token};
pub use digest::{fingerprint, sha256_bytes, sha256_file};
pub use element::{Element, ElementKind, ElementType};
pub use error::{CodecError, DigestError, InputError, PropertyError};
pub use header::Header;
pub use input::{parse_impact_input, ImpactInput};
pub use lattice::ElementIndex;
pub use validate::{validate, validate_lattice, Validation};
