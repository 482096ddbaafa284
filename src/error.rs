//! Fatal errors that end a recovery run.
//!
//! Guessing misses are not errors: a byte no candidate matched stays zero
//! and shows up in the run's [`BlockReport`](crate::BlockReport)s instead.

use thiserror::Error;

use crate::OracleError;

#[derive(Debug, Error)]
pub enum RecoveryError {
    /// The configured layout cannot describe a padded CBC message.
    #[error("invalid layout: {0}")]
    InvalidLayout(String),

    /// Nothing follows the IV and tag.
    #[error("ciphertext too short: {len} bytes, need more than {header_len}")]
    TooShort { len: usize, header_len: usize },

    /// The block-bearing region is not a whole number of blocks.
    #[error("ciphertext body of {body_len} bytes is not a multiple of the {block_size}-byte block size")]
    Misaligned { body_len: usize, block_size: usize },

    #[error("failed to start block workers: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// A worker's oracle channel failed.
    #[error("block {block_index}: {source}")]
    Oracle {
        block_index: usize,
        #[source]
        source: OracleError,
    },

    /// Another worker failed first; this one stopped before its next query.
    #[error("block {block_index}: aborted after another worker failed")]
    Aborted { block_index: usize },
}

impl RecoveryError {
    pub(crate) fn is_abort(&self) -> bool {
        matches!(self, RecoveryError::Aborted { .. })
    }
}
