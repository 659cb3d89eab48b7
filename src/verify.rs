//! Verification: byte-level comparison of a reconstruction with its original, and
//! stored-versus-recomputed comparison of derived fields.
//!
//! A failed verification is a report value, never an error: mismatches are an expected
//! outcome that signals either a grammar bug or a non-conformant input.

use crate::ast::{DerivedKind, Grammar};
use crate::decompose::{decompose, DecomposeError};
use crate::reconstruct::{ReconstructError, Reconstructor};
use crate::tree::DecompositionNode;
use crate::value::Value;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub ok: bool,
    pub first_mismatch_offset: Option<usize>,
    /// Differing bytes over the common prefix plus the length difference.
    pub mismatched_byte_count: usize,
    pub original_len: usize,
    pub reconstructed_len: usize,
}

/// Compare `reconstructed` with `original` byte by byte.
pub fn verify(original: &[u8], reconstructed: &[u8]) -> VerificationReport {
    let common = original.len().min(reconstructed.len());
    let mut first = None;
    let mut mismatched = 0;
    for (i, (a, b)) in original.iter().zip(reconstructed).enumerate() {
        if a != b {
            first = first.or(Some(i));
            mismatched += 1;
        }
    }
    let tail = original.len().abs_diff(reconstructed.len());
    if tail > 0 {
        first = first.or(Some(common));
    }
    let report = VerificationReport {
        ok: first.is_none(),
        first_mismatch_offset: first,
        mismatched_byte_count: mismatched + tail,
        original_len: original.len(),
        reconstructed_len: reconstructed.len(),
    };
    if !report.ok {
        warn!(
            first = ?report.first_mismatch_offset,
            mismatched = report.mismatched_byte_count,
            "reconstruction differs from original"
        );
    }
    report
}

/// A derived field's stored value against the value recomputed from the tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChecksumResult {
    pub path: String,
    pub offset: usize,
    #[serde(serialize_with = "kind_name")]
    pub kind: DerivedKind,
    pub stored: Option<Value>,
    pub computed: Value,
    /// Unparsed bytes directly follow the region this length field sizes.
    pub unparsed_after: bool,
    pub ok: bool,
}

fn kind_name<S: serde::Serializer>(kind: &DerivedKind, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(match kind {
        DerivedKind::Length => "length",
        DerivedKind::Count => "count",
        DerivedKind::Checksum => "checksum",
    })
}

/// Recompute every derived field of `tree` and compare with what it stores.
///
/// Needs no original file: the tree itself is re-serialized and its length, count and
/// checksum fields recomputed. A length field is also reported as failing when the
/// region it sizes runs straight into unparsed trailing bytes: a length corrupted
/// downward decomposes cleanly but leaves the rest of its data unparsed.
pub fn verify_checksums(grammar: &Grammar, tree: &DecompositionNode) -> Result<Vec<ChecksumResult>, ReconstructError> {
    let reconstruction = Reconstructor::new(grammar).run(tree)?;
    let results: Vec<ChecksumResult> = reconstruction
        .derived
        .into_iter()
        .map(|r| ChecksumResult {
            ok: r.is_consistent(),
            unparsed_after: r.unparsed_after,
            path: r.path,
            offset: r.offset,
            kind: r.kind,
            stored: r.stored,
            computed: r.computed,
        })
        .collect();
    let failed = results.iter().filter(|r| !r.ok).count();
    info!(checked = results.len(), failed, "derived fields verified");
    Ok(results)
}

#[derive(Debug, thiserror::Error)]
pub enum RoundTripError {
    #[error(transparent)]
    Decompose(#[from] DecomposeError),
    #[error(transparent)]
    Reconstruct(#[from] ReconstructError),
}

/// Decompose, reconstruct and compare with the input.
pub fn round_trip(grammar: &Grammar, bytes: &[u8]) -> Result<VerificationReport, RoundTripError> {
    let tree = decompose(grammar, bytes)?;
    let out = Reconstructor::new(grammar).run(&tree)?;
    Ok(verify(bytes, &out.bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical() {
        let r = verify(b"abc", b"abc");
        assert!(r.ok);
        assert_eq!(r.first_mismatch_offset, None);
        assert_eq!(r.mismatched_byte_count, 0);
    }

    #[test]
    fn differing_bytes() {
        let r = verify(b"abcdef", b"abXdeY");
        assert!(!r.ok);
        assert_eq!(r.first_mismatch_offset, Some(2));
        assert_eq!(r.mismatched_byte_count, 2);
    }

    #[test]
    fn length_difference_counts() {
        let r = verify(b"abc", b"abcde");
        assert!(!r.ok);
        assert_eq!(r.first_mismatch_offset, Some(3));
        assert_eq!(r.mismatched_byte_count, 2);
        assert_eq!((r.original_len, r.reconstructed_len), (3, 5));

        let r = verify(b"", b"x");
        assert_eq!(r.first_mismatch_offset, Some(0));
    }
}
