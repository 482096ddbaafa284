// Talking to a padding oracle.
//
// A request is the candidate length as an 8-byte native-endian integer
// followed by the candidate bytes. The reply is a single verdict byte. The
// oracle can tell "bad MAC" ('M') apart from "all good" ('O'), but both mean
// the padding decrypted cleanly, which is all the attack needs, so they
// collapse into `Verdict::Valid`.
use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use thiserror::Error;

pub const LENGTH_PREFIX_LEN: usize = std::mem::size_of::<u64>();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid,
}

impl Verdict {
    pub const VALID_BYTES: [u8; 2] = [b'M', b'O'];

    pub fn from_byte(byte: u8) -> Self {
        if Self::VALID_BYTES.contains(&byte) {
            Verdict::Valid
        } else {
            Verdict::Invalid
        }
    }

    pub fn is_valid(self) -> bool {
        self == Verdict::Valid
    }
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("failed to launch oracle {program:?}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("oracle process has no {0} pipe")]
    MissingPipe(&'static str),

    #[error("short write of {what}: {source}")]
    ShortWrite {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("oracle sent no verdict: {0}")]
    MissingVerdict(#[source] std::io::Error),

    #[error("failed to read request: {0}")]
    ShortRead(#[source] std::io::Error),

    #[error("request of {len} bytes exceeds the {max_len}-byte limit")]
    RequestTooLarge { len: u64, max_len: usize },

    #[error("failed to reap oracle process: {0}")]
    Reap(#[source] std::io::Error),
}

/// Anything that can judge a candidate ciphertext.
pub trait Oracle {
    fn query(&mut self, candidate: &[u8]) -> Result<Verdict, OracleError>;
}

pub fn write_request<W: Write>(mut writer: W, candidate: &[u8]) -> Result<(), OracleError> {
    let len = candidate.len() as u64;
    writer
        .write_all(&len.to_ne_bytes())
        .map_err(|source| OracleError::ShortWrite {
            what: "ciphertext length",
            source,
        })?;
    writer
        .write_all(candidate)
        .and_then(|_| writer.flush())
        .map_err(|source| OracleError::ShortWrite {
            what: "ciphertext",
            source,
        })
}

pub fn read_verdict<R: Read>(mut reader: R) -> Result<u8, OracleError> {
    let mut verdict = [0u8; 1];
    reader
        .read_exact(&mut verdict)
        .map_err(OracleError::MissingVerdict)?;
    Ok(verdict[0])
}

/// Sends one request and waits for its verdict byte.
pub fn exchange<W: Write, R: Read>(
    writer: W,
    reader: R,
    candidate: &[u8],
) -> Result<u8, OracleError> {
    write_request(writer, candidate)?;
    read_verdict(reader)
}

/// Oracle side of the framing.
pub fn read_request<R: Read>(mut reader: R, max_len: usize) -> Result<Vec<u8>, OracleError> {
    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    reader
        .read_exact(&mut prefix)
        .map_err(OracleError::ShortRead)?;
    let len = u64::from_ne_bytes(prefix);
    if len > max_len as u64 {
        return Err(OracleError::RequestTooLarge { len, max_len });
    }
    let mut candidate = vec![0u8; len as usize];
    reader
        .read_exact(&mut candidate)
        .map_err(OracleError::ShortRead)?;
    Ok(candidate)
}

/// Runs a fresh oracle process for every query, so nothing carries over
/// between requests.
#[derive(Debug, Clone)]
pub struct ProcessOracle {
    program: PathBuf,
    envs: Vec<(OsString, OsString)>,
}

impl ProcessOracle {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            envs: Vec::new(),
        }
    }

    /// Sets an environment variable for every spawned oracle.
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }
}

impl Oracle for ProcessOracle {
    fn query(&mut self, candidate: &[u8]) -> Result<Verdict, OracleError> {
        let mut child = Command::new(&self.program)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| OracleError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let result = match (child.stdin.take(), child.stdout.take()) {
            // stdin is dropped (closed) once the request has been written.
            (Some(stdin), Some(stdout)) => exchange(stdin, stdout, candidate),
            (None, _) => Err(OracleError::MissingPipe("stdin")),
            (_, None) => Err(OracleError::MissingPipe("stdout")),
        };
        if result.is_err() {
            // The child may still be waiting on input we never sent.
            let _ = child.kill();
        }
        let status = child.wait().map_err(OracleError::Reap)?;
        let verdict = result?;
        if !status.success() {
            tracing::debug!(%status, verdict, "oracle exited unsuccessfully after replying");
        }

        Ok(Verdict::from_byte(verdict))
    }
}
