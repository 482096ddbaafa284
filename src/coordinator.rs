// Fans out one worker thread per ciphertext block and joins them.
//
// The plaintext is a single zeroed buffer split into per-block chunks with
// `chunks_mut`, so each worker owns exactly the bytes it writes and no
// locking is needed. Workers share the reference ciphertext and the alphabet
// read-only, and each opens its own oracle on its own thread.
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{
    pkcs7_unpad, Alphabet, BlockReport, BlockTask, BlockWorker, Ciphertext, Oracle, OracleError,
    PaddingError, RecoveryError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovered {
    pub plaintext: Vec<u8>,
    /// One report per block, ordered like the plaintext (first block first).
    pub blocks: Vec<BlockReport>,
    block_size: usize,
}

impl Recovered {
    pub fn is_complete(&self) -> bool {
        self.blocks.iter().all(|report| report.missed.is_empty())
    }

    /// Plaintext offsets still holding the zero sentinel.
    pub fn missed_offsets(&self) -> Vec<usize> {
        let plaintext_len = self.plaintext.len();
        let mut offsets: Vec<usize> = self
            .blocks
            .iter()
            .flat_map(|report| {
                let block_end = plaintext_len - report.task.block_index * self.block_size;
                report.missed.iter().map(move |pos| block_end - pos)
            })
            .collect();
        offsets.sort_unstable();
        offsets
    }

    pub fn total_queries(&self) -> usize {
        self.blocks.iter().map(|report| report.queries).sum()
    }

    /// The plaintext with its PKCS#7 padding removed.
    pub fn unpadded(&self) -> Result<Vec<u8>, PaddingError> {
        let mut plaintext = self.plaintext.clone();
        pkcs7_unpad(&mut plaintext, self.block_size as u8)?;
        Ok(plaintext)
    }
}

/// Recovers every block of `ciphertext`.
///
/// `connect` opens the oracle for one worker; it is called on that worker's
/// thread. The first fatal error stops the other workers before their next
/// query and is returned once all of them have finished.
pub fn recover<F, O>(
    ciphertext: &Ciphertext,
    alphabet: &Alphabet,
    connect: F,
) -> Result<Recovered, RecoveryError>
where
    F: Fn(&BlockTask) -> Result<O, OracleError> + Sync,
    O: Oracle,
{
    let block_size = ciphertext.block_size();
    let n_blocks = ciphertext.block_count();
    tracing::info!(
        blocks = n_blocks,
        block_size,
        alphabet = alphabet.len(),
        "starting recovery"
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(n_blocks)
        .thread_name(|i| format!("block-worker-{i}"))
        .build()?;

    let abort = AtomicBool::new(false);
    let mut plaintext = vec![0u8; ciphertext.plaintext_len()];
    let mut outcomes: Vec<Option<Result<BlockReport, RecoveryError>>> =
        (0..n_blocks).map(|_| None).collect();

    pool.scope(|scope| {
        let blocks = plaintext.chunks_mut(block_size).enumerate();
        for ((i, block), outcome) in blocks.zip(outcomes.iter_mut()) {
            let block_index = n_blocks - 1 - i;
            debug_assert_eq!(ciphertext.plaintext_range(block_index).start, i * block_size);
            let task = BlockTask {
                worker_id: i,
                block_index,
            };
            let connect = &connect;
            let abort = &abort;
            scope.spawn(move |_| {
                let result = connect(&task)
                    .map_err(|source| RecoveryError::Oracle {
                        block_index,
                        source,
                    })
                    .and_then(|oracle| {
                        BlockWorker::new(task, ciphertext, alphabet, oracle, abort).run(block)
                    });
                if let Err(e) = &result {
                    if !e.is_abort() {
                        tracing::error!(block = block_index, error = %e, "worker failed");
                        abort.store(true, Ordering::Relaxed);
                    }
                }
                *outcome = Some(result);
            });
        }
    });

    let mut blocks = Vec::with_capacity(n_blocks);
    let mut first_error: Option<RecoveryError> = None;
    // The scope has joined every worker, so every slot is filled.
    for outcome in outcomes.into_iter().flatten() {
        match outcome {
            Ok(report) => blocks.push(report),
            Err(e) => {
                if first_error.as_ref().map_or(true, RecoveryError::is_abort) {
                    first_error = Some(e);
                }
            }
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }

    let recovered = Recovered {
        plaintext,
        blocks,
        block_size,
    };
    tracing::info!(
        queries = recovered.total_queries(),
        missed = recovered.missed_offsets().len(),
        "recovery finished"
    );
    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::thread::ThreadId;

    use crate::envelope::{self, EnvelopeKey, EnvelopeOracle};
    use crate::{pkcs7_pad, Verdict};

    fn test_key() -> EnvelopeKey {
        EnvelopeKey::new(*b"YELLOW SUBMARINE")
    }

    fn sealed(message: &[u8]) -> Ciphertext {
        let ciphertext = envelope::seal_with_random_iv(&test_key(), message);
        Ciphertext::new(ciphertext, envelope::layout()).unwrap()
    }

    fn connect_envelope(_task: &BlockTask) -> Result<EnvelopeOracle, OracleError> {
        Ok(EnvelopeOracle::new(test_key()))
    }

    struct BrokenOracle;

    impl Oracle for BrokenOracle {
        fn query(&mut self, _candidate: &[u8]) -> Result<Verdict, OracleError> {
            Err(OracleError::MissingVerdict(std::io::ErrorKind::UnexpectedEof.into()))
        }
    }

    #[test]
    fn recovers_hello_world_with_three_workers() {
        let message = b"HELLO WORLD!!!!!HELLO WORLD!!!!!";
        let ciphertext = sealed(message);
        assert_eq!(ciphertext.len(), envelope::IV_LEN + envelope::TAG_LEN + 48);
        let threads: Mutex<HashSet<ThreadId>> = Mutex::new(HashSet::new());
        let tasks: Mutex<Vec<BlockTask>> = Mutex::new(Vec::new());

        let recovered = recover(&ciphertext, &Alphabet::english(), |task| {
            threads.lock().unwrap().insert(std::thread::current().id());
            tasks.lock().unwrap().push(*task);
            connect_envelope(task)
        })
        .unwrap();

        assert_eq!(recovered.plaintext, pkcs7_pad(message, 16));
        assert_eq!(recovered.unpadded().unwrap(), message);
        assert!(recovered.is_complete());
        assert_eq!(recovered.blocks.len(), 3);
        assert_eq!(recovered.blocks[2].padding_len, Some(16));
        assert!(threads.lock().unwrap().len() <= 3);
        let mut block_indices: Vec<usize> =
            tasks.lock().unwrap().iter().map(|t| t.block_index).collect();
        block_indices.sort();
        assert_eq!(block_indices, vec![0, 1, 2]);
    }

    #[test]
    fn recovers_alphabet_text_exactly() {
        let message = b"Cooking MC's like a pound of bacon, burning 'em, if you ain't quick and nimble";
        let ciphertext = sealed(message);

        let recovered = recover(&ciphertext, &Alphabet::english(), connect_envelope).unwrap();

        assert_eq!(recovered.unpadded().unwrap(), message);
        assert!(recovered.missed_offsets().is_empty());
        assert!(recovered.total_queries() > 0);
    }

    #[test]
    fn bytes_outside_alphabet_stay_zero() {
        // Each newline is the first byte of its block, so nothing else is lost.
        let message = b"\nI go crazy when\nI hear a cymbal";
        let ciphertext = sealed(message);

        let recovered = recover(&ciphertext, &Alphabet::english(), connect_envelope).unwrap();

        let mut expected = pkcs7_pad(message, 16);
        expected[0] = 0;
        expected[16] = 0;
        assert_eq!(recovered.plaintext, expected);
        assert_eq!(recovered.missed_offsets(), vec![0, 16]);
        assert!(!recovered.is_complete());
    }

    #[test]
    fn single_block_message_is_recovered() {
        let message = b"ICE ICE BABY";
        let ciphertext = sealed(message);

        let recovered = recover(&ciphertext, &Alphabet::english(), connect_envelope).unwrap();

        assert_eq!(recovered.blocks.len(), 1);
        assert_eq!(recovered.unpadded().unwrap(), message);
    }

    #[test]
    fn oracle_failure_aborts_run() {
        let ciphertext = sealed(b"With the bass kicked in and the Vega's are pumpin'");

        let result = recover(&ciphertext, &Alphabet::english(), |_| Ok(BrokenOracle));

        assert!(matches!(result, Err(RecoveryError::Oracle { .. })));
    }

    #[test]
    fn failing_to_connect_aborts_run() {
        let ciphertext = sealed(b"With the bass kicked in and the Vega's are pumpin'");

        let result = recover(&ciphertext, &Alphabet::english(), |task| {
            if task.block_index == 1 {
                Err(OracleError::MissingPipe("stdin"))
            } else {
                connect_envelope(task)
            }
        });

        assert!(matches!(
            result,
            Err(RecoveryError::Oracle {
                block_index: 1,
                source: OracleError::MissingPipe("stdin")
            })
        ));
    }
}
