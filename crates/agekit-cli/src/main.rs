//! agekit: encrypt and decrypt files in the age v1 format
//!
//! Commands:
//!   keygen [-o FILE]                          - generate an X25519 identity
//!   encrypt (-r RECIPIENT... | -p) [-a] [-o OUT] [IN]
//!   decrypt (-i IDENTITY_FILE... | -p) [-o OUT] [IN]
//!   config show                               - display current configuration

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use secrecy::{ExposeSecret, SecretString};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};

use agekit_core::config::{expand_tilde, AgekitConfig, LogFormat};
use agekit_crypto::{
    is_armored, read_identity_file, ArmoredReader, ArmoredWriter, Decryptor, Encryptor, Identity,
    Recipient, ScryptIdentity, X25519Identity, X25519Recipient,
};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "agekit",
    version,
    about = "Simple, modern file encryption",
    long_about = "agekit: encrypt files to X25519 public keys or a passphrase (age v1 format)"
)]
struct Cli {
    /// Path to agekit configuration file
    #[arg(
        long,
        short = 'c',
        env = "AGEKIT_CONFIG",
        default_value = "~/.config/agekit/config.toml"
    )]
    config: PathBuf,

    /// Log level filter (overrides the config file; RUST_LOG overrides both)
    #[arg(long, env = "AGEKIT_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a new X25519 identity
    Keygen {
        /// Write the identity to FILE instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Encrypt a file to one or more recipients, or to a passphrase
    Encrypt {
        /// Recipient public key (age1...). May be repeated.
        #[arg(long = "recipient", short = 'r', value_name = "RECIPIENT")]
        recipients: Vec<String>,
        /// Encrypt to a passphrase read from the terminal
        #[arg(long, short = 'p', conflicts_with = "recipients")]
        passphrase: bool,
        /// Write ASCII-armored output
        #[arg(long, short = 'a')]
        armor: bool,
        /// Output file (default: stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Input file (default: stdin)
        input: Option<PathBuf>,
    },

    /// Decrypt a file with identity files or a passphrase
    Decrypt {
        /// Identity file. May be repeated.
        #[arg(long = "identity", short = 'i', value_name = "IDENTITY_FILE")]
        identities: Vec<PathBuf>,
        /// Decrypt with a passphrase read from the terminal
        #[arg(long, short = 'p', conflicts_with = "identities")]
        passphrase: bool,
        /// Output file (default: stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Input file (default: stdin)
        input: Option<PathBuf>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = AgekitConfig::load(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log.level);
    init_logging(level, config.log.format);

    match cli.command {
        Commands::Keygen { output } => cmd_keygen(output.as_deref()),
        Commands::Encrypt {
            recipients,
            passphrase,
            armor,
            output,
            input,
        } => {
            let encryptor = if passphrase {
                let passphrase = read_passphrase(true)?;
                Encryptor::with_passphrase_config(passphrase, &config.scrypt)?
            } else {
                encryptor_for(&recipients)?
            };
            cmd_encrypt(
                &encryptor,
                armor || config.output.armor,
                input.as_deref(),
                output.as_deref(),
            )
        }
        Commands::Decrypt {
            identities,
            passphrase,
            output,
            input,
        } => cmd_decrypt(&config, &identities, passphrase, input.as_deref(), output.as_deref()),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path),
    }
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout may carry ciphertext or plaintext, so logs go to stderr.
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(io::stderr))
                .init();
        }
    }
}

// ── I/O helpers ───────────────────────────────────────────────────────────────

fn open_input(path: Option<&Path>) -> Result<Box<dyn Read>> {
    match path {
        Some(p) if p != Path::new("-") => {
            let file =
                File::open(p).with_context(|| format!("opening input: {}", p.display()))?;
            Ok(Box::new(file))
        }
        _ => Ok(Box::new(io::stdin().lock())),
    }
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    match path {
        Some(p) if p != Path::new("-") => {
            let file =
                File::create(p).with_context(|| format!("creating output: {}", p.display()))?;
            Ok(Box::new(BufWriter::new(file)))
        }
        _ => Ok(Box::new(io::stdout().lock())),
    }
}

fn read_passphrase(confirm: bool) -> Result<SecretString> {
    let passphrase =
        rpassword::prompt_password("Enter passphrase: ").context("reading passphrase")?;
    if confirm {
        let again =
            rpassword::prompt_password("Confirm passphrase: ").context("reading passphrase")?;
        if passphrase != again {
            bail!("passphrases didn't match");
        }
    }
    Ok(SecretString::from(passphrase))
}

// ── `agekit keygen` ───────────────────────────────────────────────────────────

fn cmd_keygen(output: Option<&Path>) -> Result<()> {
    let identity = X25519Identity::generate();
    let public = identity.to_public();
    let secret = identity.to_key_string()?;
    let contents = SecretString::from(format!(
        "# public key: {public}\n{}\n",
        secret.expose_secret()
    ));

    match output {
        Some(path) => {
            create_private_file(path)?
                .write_all(contents.expose_secret().as_bytes())
                .with_context(|| format!("writing identity: {}", path.display()))?;
            eprintln!("Public key: {public}");
            tracing::info!(path = %path.display(), "wrote identity file");
        }
        None => io::stdout()
            .write_all(contents.expose_secret().as_bytes())
            .context("writing identity to stdout")?,
    }
    Ok(())
}

/// Create a new file readable only by the owner. Refuses to overwrite.
fn create_private_file(path: &Path) -> Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
        .open(path)
        .with_context(|| format!("creating identity file: {}", path.display()))
}

// ── `agekit encrypt` ──────────────────────────────────────────────────────────

fn encryptor_for(recipients: &[String]) -> Result<Encryptor> {
    if recipients.is_empty() {
        bail!("missing recipients: pass -r RECIPIENT or -p");
    }
    let mut parsed: Vec<Box<dyn Recipient>> = Vec::with_capacity(recipients.len());
    for r in recipients {
        let recipient: X25519Recipient = r
            .parse()
            .with_context(|| format!("invalid recipient: {r}"))?;
        parsed.push(Box::new(recipient));
    }
    Ok(Encryptor::with_recipients(parsed)?)
}

fn cmd_encrypt(
    encryptor: &Encryptor,
    armor: bool,
    input: Option<&Path>,
    output: Option<&Path>,
) -> Result<()> {
    let to_terminal = output.map_or(true, |p| p == Path::new("-")) && io::stdout().is_terminal();
    if to_terminal && !armor {
        bail!("refusing to write binary output to a terminal; use -a or -o");
    }

    let mut input = open_input(input)?;
    let output = open_output(output)?;

    let written = if armor {
        let armored = ArmoredWriter::wrap_output(output).context("writing armor")?;
        let mut writer = encryptor.wrap_output(armored)?;
        let n = io::copy(&mut input, &mut writer).context("encrypting")?;
        writer.finish()?.finish()?.flush()?;
        n
    } else {
        let mut writer = encryptor.wrap_output(output)?;
        let n = io::copy(&mut input, &mut writer).context("encrypting")?;
        writer.finish()?.flush()?;
        n
    };

    tracing::debug!(bytes = written, armor, "encrypted");
    Ok(())
}

// ── `agekit decrypt` ──────────────────────────────────────────────────────────

fn cmd_decrypt(
    config: &AgekitConfig,
    identity_files: &[PathBuf],
    passphrase: bool,
    input: Option<&Path>,
    output: Option<&Path>,
) -> Result<()> {
    let mut input = BufReader::new(open_input(input)?);
    let input: Box<dyn BufRead> = if is_armored(&mut input).context("reading input")? {
        Box::new(BufReader::new(ArmoredReader::new(input)))
    } else {
        Box::new(input)
    };

    let decryptor = Decryptor::new(input).context("reading header")?;

    let identities: Vec<Box<dyn Identity>> = if decryptor.is_scrypt() {
        if !identity_files.is_empty() {
            bail!("file is passphrase-encrypted; identity files cannot decrypt it");
        }
        let passphrase = read_passphrase(false)?;
        vec![Box::new(ScryptIdentity::from_config(passphrase, &config.scrypt)?)]
    } else {
        if passphrase {
            bail!("file is not passphrase-encrypted");
        }
        load_identities(config, identity_files)?
    };

    let mut reader = decryptor
        .decrypt(identities.iter().map(|i| &**i as &dyn Identity))
        .context("decrypting header")?;
    let mut output = open_output(output)?;
    let n = io::copy(&mut reader, &mut output).context("decrypting payload")?;
    output.flush()?;

    tracing::debug!(bytes = n, "decrypted");
    Ok(())
}

fn load_identities(config: &AgekitConfig, files: &[PathBuf]) -> Result<Vec<Box<dyn Identity>>> {
    let files: Vec<PathBuf> = if files.is_empty() {
        config.identity.resolved_file().into_iter().collect()
    } else {
        files.to_vec()
    };
    if files.is_empty() {
        bail!("missing identities: pass -i IDENTITY_FILE or set [identity] file in the config");
    }

    let mut identities: Vec<Box<dyn Identity>> = Vec::new();
    for path in &files {
        let parsed = read_identity_file(path)
            .with_context(|| format!("reading identity file: {}", path.display()))?;
        identities.extend(parsed.into_iter().map(|i| Box::new(i) as Box<dyn Identity>));
    }
    Ok(identities)
}

// ── `agekit config show` ──────────────────────────────────────────────────────

fn cmd_config_show(config: &AgekitConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = config.to_toml().context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
