//! `fieldcrypt` CLI for key generation, envelopes and re-encryption.

#![warn(clippy::pedantic, clippy::nursery)]

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use fieldcrypt::blind_index::normalize;
use fieldcrypt::config::EngineConfig;
use fieldcrypt::key::{generate, KeyEncoding};
use fieldcrypt::key_provider::StaticKeyProvider;
use fieldcrypt::record::{RecordCipher, Row};
use fieldcrypt::{FieldCrypt, Mode};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "fieldcrypt")]
#[command(about = "Field-level encryption CLI", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, env = "FIELDCRYPT_CONFIG")]
    config: Option<PathBuf>,

    /// Log progress to stderr (`RUST_LOG` overrides the level)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Disable all logging
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a new 256-bit key
    Keygen {
        /// Key encoding: base64 or hex
        #[arg(short, long, default_value = "base64")]
        encoding: KeyEncoding,
    },
    /// Encrypt a value under the current key
    Encrypt {
        value: String,
        /// Use deterministic encryption
        #[arg(short, long)]
        deterministic: bool,
    },
    /// Decrypt an envelope of either mode
    Decrypt { envelope: String },
    /// Compute a blind index
    BlindIndex {
        value: String,
        /// Domain-separation context, e.g. `User.email`
        #[arg(long)]
        context: String,
        /// Index width in bits (16-256)
        #[arg(long)]
        bits: Option<u32>,
        /// Hash the value without lowercasing it
        #[arg(long)]
        case_sensitive: bool,
    },
    /// List configured key ids, current first
    KeyIds,
    /// Re-encrypt JSON-lines rows with the current key and configured mapping
    Reencrypt {
        /// Input file (default: stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_tracing(verbose: bool, quiet: bool) {
    let filter = if quiet {
        tracing_subscriber::EnvFilter::new("off")
    } else if verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);
    run(cli)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Keygen { encoding } = cli.command {
        println!("{}", encoding.encode(&generate()));
        return Ok(());
    }

    let Some(path) = cli.config.as_ref() else {
        bail!("no configuration given; pass --config or set FIELDCRYPT_CONFIG");
    };
    let config = EngineConfig::load(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    let engine = FieldCrypt::from_config(&config)?;

    match cli.command {
        Commands::Keygen { .. } => {}
        Commands::Encrypt { value, deterministic } => {
            let mode = if deterministic { Mode::Deterministic } else { Mode::Randomized };
            println!("{}", engine.encrypt(value.as_bytes(), mode)?);
        }
        Commands::Decrypt { envelope } => {
            let bytes = engine.decrypt(&envelope)?;
            let text = String::from_utf8(bytes).context("decrypted value is not UTF-8")?;
            println!("{text}");
        }
        Commands::BlindIndex { value, context, bits, case_sensitive } => {
            let normalized = normalize(&value, !case_sensitive);
            println!("{}", engine.blind_index(&normalized, &context, bits)?);
        }
        Commands::KeyIds => {
            for id in engine.all_key_ids() {
                println!("{id}");
            }
        }
        Commands::Reencrypt { input, output } => {
            let reader: Box<dyn BufRead> = match &input {
                Some(path) => Box::new(BufReader::new(
                    File::open(path).with_context(|| format!("cannot open {}", path.display()))?,
                )),
                None => Box::new(io::stdin().lock()),
            };
            let writer: Box<dyn Write> = match &output {
                Some(path) => Box::new(BufWriter::new(
                    File::create(path).with_context(|| format!("cannot create {}", path.display()))?,
                )),
                None => Box::new(io::stdout().lock()),
            };

            let summary = reencrypt_lines(&engine, &config, reader, writer)?;
            eprintln!(
                "{} rows read, {} fields rewritten, {} rows failed",
                summary.rows, summary.fields, summary.failed
            );
        }
    }
    Ok(())
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Summary {
    rows: usize,
    fields: usize,
    failed: usize,
}

/// Reseals every JSON object line from `reader` into `writer`.
///
/// Lines that fail to parse or reseal are reported and written unchanged.
fn reencrypt_lines(
    engine: &FieldCrypt<StaticKeyProvider>,
    config: &EngineConfig,
    reader: impl BufRead,
    mut writer: impl Write,
) -> anyhow::Result<Summary> {
    let Some(map) = config.mapping.as_ref() else {
        bail!("reencrypt needs a [mapping] section in the configuration");
    };
    let records = RecordCipher::new(engine, map)?;
    let mut summary = Summary::default();

    for (number, line) in reader.lines().enumerate() {
        let line = line.context("failed to read input")?;
        if line.trim().is_empty() {
            continue;
        }
        summary.rows += 1;

        let resealed = serde_json::from_str::<Row>(&line)
            .map_err(anyhow::Error::from)
            .and_then(|mut row| {
                let count = records.reseal(&mut row)?;
                Ok((row, count))
            });

        match resealed {
            Ok((row, count)) => {
                summary.fields += count;
                serde_json::to_writer(&mut writer, &row)?;
                writer.write_all(b"\n")?;
            }
            Err(e) => {
                summary.failed += 1;
                warn!(line = number + 1, error = %e, "row passed through unchanged");
                writeln!(writer, "{line}")?;
            }
        }
    }

    writer.flush()?;
    info!(rows = summary.rows, fields = summary.fields, failed = summary.failed, "re-encryption finished");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OLD: &str = "abcdefghijklmnopqrstuvwxyz012345";
    const CONFIG: &str = r#"
        [key]
        value = "01234567890123456789012345678901"
        id = "v2"

        [rotated_keys]
        v1 = "abcdefghijklmnopqrstuvwxyz012345"

        [mapping]
        entity = "User"

        [[mapping.fields]]
        name = "email"
        mode = "deterministic"
    "#;

    #[test]
    fn test_parse_encrypt() {
        let cli = Cli::try_parse_from(["fieldcrypt", "--config", "c.toml", "encrypt", "x", "--deterministic"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("c.toml")));
        assert!(matches!(cli.command, Commands::Encrypt { ref value, deterministic: true } if value == "x"));
    }

    #[test]
    fn test_parse_blind_index() {
        let cli = Cli::try_parse_from([
            "fieldcrypt",
            "blind-index",
            "a@b.com",
            "--context",
            "User.email",
            "--bits",
            "32",
            "--case-sensitive",
        ])
        .unwrap();
        match cli.command {
            Commands::BlindIndex { value, context, bits, case_sensitive } => {
                assert_eq!(value, "a@b.com");
                assert_eq!(context, "User.email");
                assert_eq!(bits, Some(32));
                assert!(case_sensitive);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_keygen_encoding() {
        let cli = Cli::try_parse_from(["fieldcrypt", "keygen", "--encoding", "hex"]).unwrap();
        assert!(matches!(cli.command, Commands::Keygen { encoding: KeyEncoding::Hex }));

        assert!(Cli::try_parse_from(["fieldcrypt", "keygen", "--encoding", "b32"]).is_err());
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["fieldcrypt", "-v", "-q", "key-ids"]).is_err());
    }

    #[test]
    fn test_reencrypt_lines() {
        let config = EngineConfig::from_toml_str(CONFIG).unwrap();
        let engine = FieldCrypt::from_config(&config).unwrap();
        let old = FieldCrypt::new(
            StaticKeyProvider::new(OLD).with_key_id("v1"),
            fieldcrypt::EngineOptions::default(),
        )
        .unwrap();

        let stale = old.encrypt(b"a@b.com", Mode::Deterministic).unwrap();
        let input = format!(
            "{{\"id\":1,\"email\":\"{stale}\"}}\n\n{{\"id\":2,\"email\":\"plain@b.com\"}}\nnot json\n"
        );

        let mut output = Vec::new();
        let summary = reencrypt_lines(&engine, &config, input.as_bytes(), &mut output).unwrap();
        assert_eq!(summary, Summary { rows: 3, fields: 2, failed: 1 });

        let text = String::from_utf8(output).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2], "not json");

        let first: Row = serde_json::from_str(lines[0]).unwrap();
        let email = first["email"].as_str().unwrap();
        assert_eq!(engine.key_id_of(email).unwrap().as_deref(), Some("v2"));
        assert_eq!(engine.decrypt(email).unwrap(), b"a@b.com");
    }

    #[test]
    fn test_reencrypt_requires_mapping() {
        let config = EngineConfig::from_toml_str(
            "[key]\nvalue = \"01234567890123456789012345678901\"\n",
        )
        .unwrap();
        let engine = FieldCrypt::from_config(&config).unwrap();
        let result = reencrypt_lines(&engine, &config, "".as_bytes(), Vec::new());
        assert!(result.is_err());
    }
}
