//! Batch processing of many files against one grammar.
//!
//! Each file is independent: a failure is recorded in that file's [`FileOutcome`] and
//! the batch moves on. Files are spread over scoped worker threads sharing the
//! read-only grammar; results are gathered by input index so the report keeps input
//! order.

use crate::ast::Grammar;
use crate::decompose::{DecomposeError, DecomposeOptions, Decomposer};
use crate::reconstruct::{ReconstructError, Reconstructor};
use crate::tree::DecompositionNode;
use crate::verify::{verify, VerificationReport};
use std::thread;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FileError {
    #[error(transparent)]
    Decompose(#[from] DecomposeError),
    #[error(transparent)]
    Reconstruct(#[from] ReconstructError),
    #[error("reconstruction differs from input at offset {offset} ({count} byte(s))")]
    Mismatch { offset: usize, count: usize },
}

/// Result for one input.
#[derive(Debug)]
pub struct FileOutcome<T> {
    pub label: String,
    pub result: Result<T, FileError>,
}

#[derive(Debug)]
pub struct BatchReport<T> {
    pub outcomes: Vec<FileOutcome<T>>,
}

impl<T> BatchReport<T> {
    pub fn failures(&self) -> impl Iterator<Item = (&str, &FileError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.label.as_str(), e)))
    }

    pub fn is_clean(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

pub struct BatchRunner<'g> {
    grammar: &'g Grammar,
    options: DecomposeOptions,
    workers: usize,
}

impl<'g> BatchRunner<'g> {
    pub fn new(grammar: &'g Grammar) -> Self {
        BatchRunner {
            grammar,
            options: DecomposeOptions::default(),
            workers: 1,
        }
    }

    /// Number of worker threads (at least one).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_options(mut self, options: DecomposeOptions) -> Self {
        self.options = options;
        self
    }

    /// Decompose every input.
    pub fn decompose<L: AsRef<str> + Sync, B: AsRef<[u8]> + Sync>(
        &self,
        inputs: &[(L, B)],
    ) -> BatchReport<DecompositionNode> {
        self.run(inputs, |bytes| {
            Ok(Decomposer::new(self.grammar).with_options(self.options).decompose(bytes)?)
        })
    }

    /// Decompose, reconstruct and verify every input. A reconstruction that differs
    /// from its input is a [`FileError::Mismatch`].
    pub fn round_trip<L: AsRef<str> + Sync, B: AsRef<[u8]> + Sync>(
        &self,
        inputs: &[(L, B)],
    ) -> BatchReport<VerificationReport> {
        self.run(inputs, |bytes| {
            let tree = Decomposer::new(self.grammar).with_options(self.options).decompose(bytes)?;
            let out = Reconstructor::new(self.grammar).run(&tree)?;
            let report = verify(bytes, &out.bytes);
            match report.first_mismatch_offset {
                Some(offset) => Err(FileError::Mismatch { offset, count: report.mismatched_byte_count }),
                None => Ok(report),
            }
        })
    }

    fn run<T, L, B, F>(&self, inputs: &[(L, B)], job: F) -> BatchReport<T>
    where
        T: Send,
        L: AsRef<str> + Sync,
        B: AsRef<[u8]> + Sync,
        F: Fn(&[u8]) -> Result<T, FileError> + Sync,
    {
        let workers = self.workers.min(inputs.len()).max(1);
        debug!(files = inputs.len(), workers, "batch started");
        let mut results: Vec<Option<Result<T, FileError>>> = Vec::new();
        results.resize_with(inputs.len(), || None);

        if workers == 1 {
            for (slot, (_, bytes)) in results.iter_mut().zip(inputs) {
                *slot = Some(job(bytes.as_ref()));
            }
        } else {
            let chunk = inputs.len().div_ceil(workers);
            let job = &job;
            thread::scope(|s| {
                for (slots, files) in results.chunks_mut(chunk).zip(inputs.chunks(chunk)) {
                    s.spawn(move || {
                        for (slot, (_, bytes)) in slots.iter_mut().zip(files) {
                            *slot = Some(job(bytes.as_ref()));
                        }
                    });
                }
            });
        }

        let outcomes: Vec<FileOutcome<T>> = inputs
            .iter()
            .zip(results)
            .filter_map(|((label, _), result)| {
                result.map(|result| FileOutcome { label: label.as_ref().to_string(), result })
            })
            .collect();
        for o in &outcomes {
            if let Err(e) = &o.result {
                warn!(file = %o.label, error = %e, "file failed");
            }
        }
        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        info!(files = outcomes.len(), failed, "batch finished");
        BatchReport { outcomes }
    }
}
