mod alphabet;
mod ciphertext;
mod coordinator;
pub mod envelope;
mod error;
mod oracle;
mod padding;
mod worker;

pub use alphabet::{Alphabet, AlphabetEntry, AlphabetError};
pub use ciphertext::{Ciphertext, Layout};
pub use coordinator::{recover, Recovered};
pub use error::RecoveryError;
pub use oracle::{
    exchange, read_request, read_verdict, write_request, Oracle, OracleError, ProcessOracle,
    Verdict, LENGTH_PREFIX_LEN,
};
pub use padding::{pkcs7_pad, pkcs7_padding_len, pkcs7_unpad, PaddingError};
pub use worker::{BlockReport, BlockTask, BlockWorker};
