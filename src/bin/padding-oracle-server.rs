// Reference padding oracle: answers a single framed request on stdin with one
// verdict byte on stdout, then exits. The AES key is read as hex from
// `PADDING_ORACLE_KEY`.
use padding_oracle::envelope::{self, EnvelopeKey, Response, KEY_ENV};
use padding_oracle::read_request;

use anyhow::Context;

use std::io::Write;

const MAX_REQUEST_LEN: usize = 1 << 20;

fn main() -> anyhow::Result<()> {
    let hex_key = std::env::var(KEY_ENV).with_context(|| format!("reading {KEY_ENV}"))?;
    let key = EnvelopeKey::from_hex(&hex_key)?;

    let response = match read_request(std::io::stdin().lock(), MAX_REQUEST_LEN) {
        Ok(ciphertext) => envelope::check(&key, &ciphertext),
        Err(_) => Response::Malformed,
    };

    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(&[response.as_byte()])
        .and_then(|_| stdout.flush())
        .context("writing verdict")?;
    Ok(())
}
