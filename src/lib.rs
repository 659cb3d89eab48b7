//! # bingram: grammar-driven binary format decomposition
//!
//! Describe a binary file format as data (a JSON grammar built from named, reusable
//! patterns) and one interpreter decomposes any file of that format into an
//! offset-annotated tree, and reconstructs byte-identical files from the tree.
//! Length, count and checksum fields are recomputed on reconstruction, so edits to
//! leaf content survive the round trip.
//!
//! ## Data flow
//!
//! Grammar + bytes → [`decompose`] → [`DecompositionNode`] tree → (edit) →
//! [`reconstruct`] → bytes → [`verify`].
//!
//! ## Grammar nodes
//!
//! - **Field**: typed leaf (`uint8`..`uint64`, `int8`..`int64`, `float32`, `float64`,
//!   `_le`/`_be` suffixes, `bytes`, `ascii`, `utf8`) with a fixed length, a
//!   `length_field` reference, `"until_eof"`, or `align`
//! - **Composite**: ordered `components`, optionally bounded by `length`/`length_field`
//! - **Repeated**: `element` repeated `count`/`count_field` times or to end of region
//! - **Variant**: `variants` selected by an earlier `discriminant`, with a `default`
//!
//! Patterns from the [`PatternCatalog`] name the idiom a node follows (`MAGIC_NUMBER`,
//! `CHUNK_CONTAINER`, `CHECKSUM_FIELD`, ...) and may carry a template structure that
//! grammars reuse.
//!
//! ## Example grammar
//!
//! ```text
//! {
//!   "format": "TOY",
//!   "magic_number": {"value": "54 4F 59 00", "offset": 0, "length": 4},
//!   "structure": [
//!     {"name": "len", "type": "uint32_le", "length": 4},
//!     {"name": "payload", "type": "bytes", "length_field": "len"}
//!   ]
//! }
//! ```
//!
//! ## Usage
//!
//! See `tests/integration.rs` for full examples and `bingram --help` for the CLI.

pub mod ast;
pub mod batch;
pub mod checksum;
pub mod codec;
pub mod decompose;
pub mod dump;
pub mod lint;
pub mod loader;
pub mod pattern;
pub mod reconstruct;
pub mod tree;
pub mod value;
pub mod verify;

pub use ast::{Grammar, GrammarNode};
pub use batch::{BatchReport, BatchRunner, FileError, FileOutcome};
pub use codec::Endianness;
pub use decompose::{decompose, DecomposeError, DecomposeOptions, Decomposer};
pub use loader::{load, GrammarError, GrammarLoader};
pub use pattern::{CatalogError, Pattern, PatternCatalog, PatternShape};
pub use reconstruct::{reconstruct, ReconstructError, Reconstruction, Reconstructor};
pub use tree::DecompositionNode;
pub use value::Value;
pub use verify::{round_trip, verify, verify_checksums, ChecksumResult, RoundTripError, VerificationReport};
