//! parsec: encrypted searchable index CLI
//!
//! Commands:
//!   search --query W1+W2 [--union|--inter|--phrase] [--show]
//!   merge [--newkey]        - compact the delta table, optionally re-keying
//!   add <path>              - index a file (or every file under a directory)
//!   remove <path>           - retract a file from the index
//!   reset                   - empty the index and the stored file copies
//!   status                  - table sizes and lifecycle state
//!   config show             - display current configuration

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use parsec_core::config::ParsecConfig;
use parsec_index::{Indexer, ProgressFn, Query, QueryMode};
use parsec_storage::OpendalTables;
use secrecy::SecretString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "parsec",
    version,
    about = "Encrypted searchable index client",
    long_about = "parsec: search, add, remove and merge files in an encrypted index \
                  kept on an untrusted key-value store"
)]
struct Cli {
    /// Path to parsec.toml configuration file
    #[arg(long, short = 'c', env = "PARSEC_CONFIG", default_value = "/etc/parsec/parsec.toml")]
    config: PathBuf,

    /// Index passphrase (prompted for when unset)
    #[arg(long, short = 'k', env = "PARSEC_KEY", hide_env_values = true, global = true)]
    key: Option<String>,

    /// Log level for diagnostics on stderr
    #[arg(long, env = "PARSEC_LOG", default_value = "warn", global = true)]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Find the files containing the query words
    #[command(group(ArgGroup::new("mode").args(["union", "inter", "phrase"])))]
    Search {
        /// Words joined by `+`, e.g. lighthouse+keeper
        #[arg(long, short = 'q')]
        query: String,
        /// Files containing any of the words
        #[arg(long)]
        union: bool,
        /// Files containing all of the words (default)
        #[arg(long)]
        inter: bool,
        /// Files containing the words consecutively (needs adjacency)
        #[arg(long)]
        phrase: bool,
        /// Print the decrypted server copy of each match
        #[arg(long)]
        show: bool,
    },

    /// Fold the delta table into the stable table
    ///
    /// With --newkey, every entry and stored file copy is re-encrypted under
    /// the key derived from the new passphrase.
    Merge {
        /// New passphrase (prompted for when given without a value)
        #[arg(long, num_args = 0..=1, default_missing_value = "")]
        newkey: Option<String>,
    },

    /// Store an encrypted copy of a file and index its words
    Add {
        /// File, or directory whose files are all added
        path: PathBuf,
    },

    /// Retract a file from the index and delete its stored copy
    Remove {
        /// Path of the file as it was added
        path: PathBuf,
    },

    /// Drop the index tables and stored copies (client files are untouched)
    Reset {
        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Show index state and table sizes
    Status,

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

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log);
    let config = load_config(&cli.config).await?;

    tracing::debug!(config = %cli.config.display(), "configuration loaded");

    match cli.command {
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
        Commands::Search {
            query,
            union,
            inter: _,
            phrase,
            show,
        } => {
            let mode = if union {
                QueryMode::Union
            } else if phrase {
                QueryMode::Phrase
            } else {
                QueryMode::Intersection
            };
            let indexer = open_index(&config, cli.key).await?;
            cmd_search(&indexer, &query, mode, show).await
        }
        Commands::Merge { newkey } => {
            let indexer = open_index(&config, cli.key).await?;
            cmd_merge(&indexer, &config, newkey).await
        }
        Commands::Add { path } => cmd_add(&open_index(&config, cli.key).await?, &path).await,
        Commands::Remove { path } => {
            cmd_remove(&open_index(&config, cli.key).await?, &path).await
        }
        Commands::Reset { yes } => cmd_reset(&open_index(&config, cli.key).await?, yes).await,
        Commands::Status => cmd_status(&open_index(&config, cli.key).await?).await,
    }
}

async fn open_index(config: &ParsecConfig, key: Option<String>) -> Result<Indexer<OpendalTables>> {
    let passphrase = passphrase(key, "parsec passphrase: ")?;
    Indexer::open(config, &passphrase)
        .await
        .context("opening index")
}

// ── Config loading ────────────────────────────────────────────────────────────

async fn load_config(path: &Path) -> Result<ParsecConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config: {}", path.display()))
    } else {
        Ok(ParsecConfig::default())
    }
}

fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// `--key` / `PARSEC_KEY` when set, otherwise an interactive prompt.
fn passphrase(flag: Option<String>, prompt: &str) -> Result<SecretString> {
    let key = match flag {
        Some(key) if !key.is_empty() => key,
        _ => rpassword::prompt_password(prompt).context("reading passphrase")?,
    };
    anyhow::ensure!(!key.is_empty(), "empty passphrase");
    Ok(SecretString::from(key))
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(bar_style());
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

// ── `parsec search` ───────────────────────────────────────────────────────────

async fn cmd_search(
    indexer: &Indexer<OpendalTables>,
    text: &str,
    mode: QueryMode,
    show: bool,
) -> Result<()> {
    let query = Query::parse(text, mode)?;
    let started = Instant::now();
    let files = indexer
        .search(&query)
        .await
        .with_context(|| format!("searching for {query}"))?;
    let elapsed = started.elapsed();

    println!("{} file(s) match {query}  ({})", files.len(), fmt_duration(elapsed));
    for file in &files {
        println!("  {file}");
        if show {
            match indexer.show(file).await? {
                Some(contents) => {
                    println!("  ────────────────────────────────────────");
                    for line in String::from_utf8_lossy(&contents).lines() {
                        println!("  │ {line}");
                    }
                    println!();
                }
                None => println!("  (no stored copy)"),
            }
        }
    }
    Ok(())
}

// ── `parsec merge` ────────────────────────────────────────────────────────────

async fn cmd_merge(
    indexer: &Indexer<OpendalTables>,
    config: &ParsecConfig,
    newkey: Option<String>,
) -> Result<()> {
    let new_key = match newkey {
        Some(flag) => {
            let pass = passphrase(Some(flag), "new passphrase: ")?;
            Some(indexer.derive_key(config, &pass).await?)
        }
        None => None,
    };
    if let Some(ref key) = new_key {
        println!("Re-keying index to {}", key.fingerprint());
    }

    let pb = make_progress_bar(0, "merge");
    let pb_clone = pb.clone();
    let progress: ProgressFn = Box::new(move |done, total, phase| {
        pb_clone.set_length(total);
        pb_clone.set_position(done);
        pb_clone.set_message(phase.to_string());
    });

    let started = Instant::now();
    let report = indexer
        .merge(new_key, Some(&progress))
        .await
        .context("merging index")?;
    pb.finish_with_message("done".to_string());

    println!();
    println!("Merge complete:");
    if report.resumed {
        println!("  resumed:        interrupted merge replayed first");
    }
    println!("  words:          {}", report.words_rewritten);
    println!("  stable entries: {}", report.stable_entries);
    println!("  rotated:        {}", report.rotated);
    println!("  elapsed:        {}", fmt_duration(started.elapsed()));
    Ok(())
}

// ── `parsec add` / `parsec remove` ────────────────────────────────────────────

async fn cmd_add(indexer: &Indexer<OpendalTables>, path: &Path) -> Result<()> {
    if path.is_file() {
        let report = indexer
            .add_file(path)
            .await
            .with_context(|| format!("adding {}", path.display()))?;
        println!("Added {}", report.file);
        println!("  words:    {}", report.words);
        if report.retracted > 0 {
            println!("  dropped:  {}", report.retracted);
        }
        println!("  encrypt:  {}", fmt_duration(report.encrypt));
        println!("  index:    {}", fmt_duration(report.index));
        return Ok(());
    }
    if !path.is_dir() {
        anyhow::bail!("path not found or not a file/directory: {}", path.display());
    }

    let files = collect_files(path)?;
    let pb = make_progress_bar(files.len() as u64, "add");
    let (mut added, mut failed, mut words) = (0usize, 0usize, 0usize);
    for file in &files {
        pb.set_message(file.display().to_string());
        match indexer.add_file(file).await {
            Ok(report) => {
                added += 1;
                words += report.words;
            }
            Err(e) => {
                failed += 1;
                pb.println(format!("  skipped {}: {e}", file.display()));
            }
        }
        pb.inc(1);
    }
    pb.finish_with_message("done".to_string());

    println!();
    println!("Add complete:");
    println!("  added:   {added} files ({words} words)");
    println!("  failed:  {failed} files");
    Ok(())
}

async fn cmd_remove(indexer: &Indexer<OpendalTables>, path: &Path) -> Result<()> {
    let report = indexer
        .remove_file(path)
        .await
        .with_context(|| format!("removing {}", path.display()))?;
    if report.found {
        println!("Removed {} ({} words, {})", report.file, report.words, fmt_duration(report.elapsed));
    } else {
        println!("{} is not in the index; nothing to do.", report.file);
    }
    Ok(())
}

/// Every regular file under `dir`, sorted.
fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(next) = pending.pop() {
        for entry in std::fs::read_dir(&next).with_context(|| format!("reading {}", next.display()))? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.is_file() {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

// ── `parsec reset` ────────────────────────────────────────────────────────────

async fn cmd_reset(indexer: &Indexer<OpendalTables>, yes: bool) -> Result<()> {
    if !yes {
        print!("Drop the whole index and every stored file copy? [y/N] ");
        std::io::stdout().flush()?;
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        if !matches!(answer.trim(), "y" | "Y" | "yes") {
            println!("Aborted.");
            return Ok(());
        }
    }
    indexer.reset().await.context("resetting index")?;
    println!("Index reset. Client files were not touched.");
    Ok(())
}

// ── `parsec status` ───────────────────────────────────────────────────────────

async fn cmd_status(indexer: &Indexer<OpendalTables>) -> Result<()> {
    let status = indexer.status().await?;
    let files = indexer.files().await?;

    println!("parsec v{}", env!("CARGO_PKG_VERSION"));
    println!("  variant:       {}", status.variant);
    println!("  adjacency:     {}", status.adjacency);
    println!("  state:         {}", status.state);
    println!("  key:           {}", status.key_fingerprint);
    println!("  stable:        {} words, {} entries", status.stable_words, status.stable_entries);
    println!("  delta:         {} words, {} entries", status.delta_words, status.delta_entries);
    println!("  stored files:  {}", files.len());
    Ok(())
}

// ── `parsec config show` ──────────────────────────────────────────────────────

fn cmd_config_show(config: &ParsecConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

fn fmt_duration(d: Duration) -> String {
    let ms = d.as_secs_f64() * 1000.0;
    if ms >= 1000.0 {
        format!("{:.2} s", ms / 1000.0)
    } else {
        format!("{ms:.1} ms")
    }
}
