use padding_oracle::envelope::{self, EnvelopeKey};
use padding_oracle::{recover, Alphabet, Ciphertext, Layout, ProcessOracle};

use anyhow::Context;
use clap::{Parser, Subcommand};

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "padding-oracle")]
#[command(about = "Recover CBC plaintext through a padding oracle.")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Recover the plaintext of a ciphertext file by querying an oracle program.
    Recover(RecoverArgs),
    /// Seal a message for the reference oracle.
    Seal(SealArgs),
    /// Print a random key for the reference oracle, as hex.
    Keygen,
}

#[derive(Debug, Parser)]
struct RecoverArgs {
    /// Ciphertext file: IV, then tag, then whole blocks.
    #[arg(long)]
    ciphertext: PathBuf,

    /// Oracle program. A fresh process is started, without arguments, for
    /// every query.
    #[arg(long)]
    oracle: PathBuf,

    #[arg(long, default_value_t = Layout::default().iv_len)]
    iv_len: usize,

    #[arg(long, default_value_t = Layout::default().tag_len)]
    tag_len: usize,

    #[arg(long, default_value_t = Layout::default().block_size)]
    block_size: usize,

    /// Where to write the recovered bytes. Defaults to stdout.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Remove PKCS#7 padding from the output.
    #[arg(long)]
    strip_padding: bool,
}

#[derive(Debug, Parser)]
struct SealArgs {
    /// AES key as hex.
    #[arg(long)]
    key: String,

    /// Message file. Reads stdin if omitted.
    #[arg(long)]
    input: Option<PathBuf>,

    #[arg(long)]
    output: PathBuf,
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout may carry the recovered plaintext.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    match Cli::parse().command {
        Command::Recover(args) => run_recover(args),
        Command::Seal(args) => run_seal(args),
        Command::Keygen => {
            println!("{}", EnvelopeKey::random().to_hex());
            Ok(())
        }
    }
}

fn run_recover(args: RecoverArgs) -> anyhow::Result<()> {
    let layout = Layout::new(args.iv_len, args.tag_len, args.block_size);
    let bytes = std::fs::read(&args.ciphertext)
        .with_context(|| format!("opening {}", args.ciphertext.display()))?;
    let ciphertext = Ciphertext::new(bytes, layout).context("validating ciphertext")?;
    tracing::info!(
        ciphertext = %args.ciphertext.display(),
        oracle = %args.oracle.display(),
        len = ciphertext.len(),
        blocks = ciphertext.block_count(),
        "loaded ciphertext"
    );

    let oracle = ProcessOracle::new(&args.oracle);
    let recovered = recover(&ciphertext, &Alphabet::english(), |_task| Ok(oracle.clone()))
        .context("recovering plaintext")?;

    let missed = recovered.missed_offsets();
    if !missed.is_empty() {
        tracing::warn!(count = missed.len(), offsets = ?missed, "some bytes were not recovered");
    }
    tracing::info!(queries = recovered.total_queries(), "done");

    let output = if args.strip_padding {
        recovered
            .unpadded()
            .context("recovered plaintext has no valid padding")?
    } else {
        recovered.plaintext
    };
    write_output(args.output.as_deref(), &output)
}

fn run_seal(args: SealArgs) -> anyhow::Result<()> {
    let key = EnvelopeKey::from_hex(&args.key)?;
    let message = match &args.input {
        Some(path) => {
            std::fs::read(path).with_context(|| format!("opening {}", path.display()))?
        }
        None => {
            let mut message = Vec::new();
            std::io::stdin()
                .read_to_end(&mut message)
                .context("reading stdin")?;
            message
        }
    };
    let ciphertext = envelope::seal_with_random_iv(&key, &message);
    tracing::info!(
        message_len = message.len(),
        ciphertext_len = ciphertext.len(),
        "sealed message"
    );
    write_output(Some(&args.output), &ciphertext)
}

fn write_output(path: Option<&Path>, bytes: &[u8]) -> anyhow::Result<()> {
    match path {
        Some(path) => {
            std::fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(bytes)
                .and_then(|_| stdout.flush())
                .context("writing stdout")
        }
    }
}
