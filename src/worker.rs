// Recovery of a single ciphertext block through a padding oracle.
//
// CBC decryption computes P_i = D(C_i) ⊕ C_{i-1}, so flipping a byte of
// C_{i-1} flips the same byte of P_i and nothing else in it. If we replace
// byte k of C_{i-1} with
//
//                    C'_{i-1}[k] = C_{i-1}[k] ⊕ g ⊕ v,
//
// the oracle decrypts P'_i[k] = P_i[k] ⊕ g ⊕ v, which equals v exactly when
// our guess g is the real plaintext byte. Choosing v to be the padding value
// the oracle wants to see at k turns "is the padding valid?" into "is the
// guess right?".
//
// Positions are counted from the end of the block: `pos` 1 is the last byte.
// To test position `pos` every byte after it must already decrypt to `pos`,
// which we can arrange because we know their plaintext (the forcing step).
//
// The last block of the message is special: it ends in real padding. Its
// length P is found first by flipping the final byte of the preceding block
// with k ⊕ 1 for k = 2, 3, ...; the final plaintext byte P becomes P ⊕ k ⊕ 1,
// which is the valid one-byte padding 0x01 exactly when k = P. If nothing
// lights up, the padding is the single byte 0x01 the untouched message
// already had. The P padding bytes are then known, and guessing starts at
// position P + 1.
//
// Interior blocks are attacked by cutting the ciphertext right after them,
// so the oracle checks their padding instead of the real last block's.
//
// Guesses come from the frequency-ordered alphabet rather than all 256 byte
// values. A byte outside the alphabet is never found: it stays zero, and the
// forcing step for every position before it in the same block goes wrong,
// so those bytes are lost as well.
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{Alphabet, Ciphertext, Oracle, RecoveryError, Verdict};

/// Which block a worker owns. `block_index` counts from the end of the
/// message, so block 0 is the padded one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockTask {
    pub worker_id: usize,
    pub block_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockReport {
    pub task: BlockTask,
    /// Only known for the last block.
    pub padding_len: Option<usize>,
    /// Bytes found by guessing (padding bytes are not counted).
    pub recovered: usize,
    /// Positions, counted from the end of the block, that no candidate
    /// matched.
    pub missed: Vec<usize>,
    pub queries: usize,
}

pub struct BlockWorker<'a, O> {
    task: BlockTask,
    reference: &'a [u8],
    forged: Vec<u8>,
    block_size: usize,
    query_len: usize,
    alphabet: &'a Alphabet,
    oracle: O,
    abort: &'a AtomicBool,
    queries: usize,
}

impl<'a, O: Oracle> BlockWorker<'a, O> {
    pub fn new(
        task: BlockTask,
        ciphertext: &'a Ciphertext,
        alphabet: &'a Alphabet,
        oracle: O,
        abort: &'a AtomicBool,
    ) -> Self {
        Self {
            task,
            reference: ciphertext.bytes(),
            forged: ciphertext.bytes().to_vec(),
            block_size: ciphertext.block_size(),
            query_len: ciphertext.truncated_len(task.block_index),
            alphabet,
            oracle,
            abort,
            queries: 0,
        }
    }

    /// Recovers the block into `block`, which must be this block's slice of
    /// the plaintext and start out zeroed.
    pub fn run(mut self, block: &mut [u8]) -> Result<BlockReport, RecoveryError> {
        debug_assert_eq!(block.len(), self.block_size);
        let block_index = self.task.block_index;

        let padding_len = if block_index == 0 {
            let padding_len = self.discover_padding_len()?;
            block[self.block_size - padding_len..].fill(padding_len as u8);
            tracing::debug!(block = block_index, padding_len, "found padding length");
            Some(padding_len)
        } else {
            None
        };

        let mut recovered = 0;
        let mut missed = Vec::new();
        for pos in padding_len.map_or(1, |len| len + 1)..=self.block_size {
            self.force_padding(pos, block);
            match self.guess_byte(pos)? {
                Some(byte) => {
                    block[self.block_size - pos] = byte;
                    recovered += 1;
                }
                None => {
                    tracing::warn!(block = block_index, pos, "no candidate matched");
                    missed.push(pos);
                }
            }
        }

        tracing::info!(
            block = block_index,
            worker = self.task.worker_id,
            recovered,
            missed = missed.len(),
            queries = self.queries,
            "block done"
        );
        Ok(BlockReport {
            task: self.task,
            padding_len,
            recovered,
            missed,
            queries: self.queries,
        })
    }

    /// End of the block preceding ours, in ciphertext coordinates.
    fn preceding_end(&self) -> usize {
        self.query_len - self.block_size
    }

    fn discover_padding_len(&mut self) -> Result<usize, RecoveryError> {
        let last = self.preceding_end() - 1;
        for candidate in 2..=self.block_size {
            self.forged[last] = self.reference[last] ^ candidate as u8 ^ 1;
            if self.query()?.is_valid() {
                return Ok(candidate);
            }
        }
        Ok(1)
    }

    /// Makes positions `1..pos` decrypt to the padding value `pos`, using
    /// the plaintext recorded in `block` so far.
    fn force_padding(&mut self, pos: usize, block: &[u8]) {
        let end = self.preceding_end();
        for i in 1..pos {
            let known = block[self.block_size - i];
            self.forged[end - i] = self.reference[end - i] ^ known ^ pos as u8;
        }
    }

    fn guess_byte(&mut self, pos: usize) -> Result<Option<u8>, RecoveryError> {
        let target = self.preceding_end() - pos;
        let alphabet = self.alphabet;
        for candidate in alphabet.iter() {
            self.forged[target] = self.reference[target] ^ candidate ^ pos as u8;
            if self.query()?.is_valid() {
                tracing::trace!(block = self.task.block_index, pos, candidate, "byte found");
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    fn query(&mut self) -> Result<Verdict, RecoveryError> {
        let block_index = self.task.block_index;
        if self.abort.load(Ordering::Relaxed) {
            return Err(RecoveryError::Aborted { block_index });
        }
        self.queries += 1;
        self.oracle
            .query(&self.forged[..self.query_len])
            .map_err(|source| RecoveryError::Oracle {
                block_index,
                source,
            })
    }
}
