//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use rangemeld_core::{BuildOptions, BuildResult, ProgressReporter, build_all, verify_output};
use rangemeld_shared::{AppConfig, init_config, load_config_from, validate_config};
use rangemeld_sources::load_sources;
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// rangemeld: merge geo/IP reference data into mmdb-ready records.
#[derive(Parser)]
#[command(
    name = "rangemeld",
    version,
    about = "Merge CSV and IPFire geo/IP data into per-database NDJSON records for an mmdb writer.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Build the configured databases.
    Build {
        /// Path to the build config.
        #[arg(short, long, env = "RANGEMELD_CONFIG", default_value = "rangemeld.toml")]
        config: PathBuf,

        /// Database to build (repeatable). Defaults to all.
        #[arg(long = "db")]
        databases: Vec<String>,

        /// Output directory for NDJSON and manifest files.
        #[arg(short, long, default_value = "build")]
        out: PathBuf,
    },

    /// Validate the config and check that every input can be opened.
    Check {
        /// Path to the build config.
        #[arg(short, long, env = "RANGEMELD_CONFIG", default_value = "rangemeld.toml")]
        config: PathBuf,
    },

    /// Verify an emitted database against its manifest.
    Verify {
        /// Path to a `<name>.manifest.json` file.
        manifest: PathBuf,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Write a starter config file.
    Init {
        /// Where to write the config.
        #[arg(default_value = "rangemeld.toml")]
        path: PathBuf,
    },
    /// Show the resolved configuration.
    Show {
        /// Path to the build config.
        #[arg(short, long, env = "RANGEMELD_CONFIG", default_value = "rangemeld.toml")]
        config: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "rangemeld=info",
        1 => "rangemeld=debug",
        _ => "rangemeld=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Build {
            config,
            databases,
            out,
        } => cmd_build(&config, &databases, &out),
        Command::Check { config } => cmd_check(&config),
        Command::Verify { manifest } => cmd_verify(&manifest),
        Command::Config { action } => match action {
            ConfigAction::Init { path } => cmd_config_init(&path),
            ConfigAction::Show { config } => cmd_config_show(&config),
        },
    }
}

/// Load and validate the config at `path`.
fn load_valid_config(path: &Path) -> Result<AppConfig> {
    let config = load_config_from(path)?;
    validate_config(&config)?;
    Ok(config)
}

/// Directory relative input paths resolve against: the config's directory.
fn config_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn cmd_build(config_path: &Path, databases: &[String], out: &Path) -> Result<()> {
    let config = load_valid_config(config_path)?;

    let options = BuildOptions {
        base_dir: config_dir(config_path),
        output_dir: out.to_path_buf(),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
    };

    info!(
        config = %config_path.display(),
        out = %out.display(),
        databases = databases.len(),
        "building databases"
    );

    let reporter = CliProgress::new();
    let results = build_all(&config, databases, &options, &reporter)?;
    reporter.finish();

    println!();
    for result in &results {
        let stats = &result.stats;
        println!("  Database {} built", result.name);
        println!("  Records:    {}", stats.synth.records_read);
        println!("  Networks:   {}", stats.synth.networks_synthesized);
        println!(
            "  Discarded:  {} (ip version {}, unrepresentable {})",
            stats.synth.discarded_ip_version + stats.synth.discarded_unrepresentable,
            stats.synth.discarded_ip_version,
            stats.synth.discarded_unrepresentable
        );
        println!("  Trimmed:    {}", stats.synth.prefix_trimmed);
        println!("  Merged:     {}", stats.merge.merged);
        println!("  Resets:     {}", stats.merge.resets_applied);
        println!("  Entries:    {}", stats.entries_emitted);
        println!("  Output:     {}", result.output_path.display());
        println!("  Manifest:   {}", result.manifest_path.display());
        println!("  Time:       {:.1}s", result.elapsed.as_secs_f64());
        println!();
    }

    Ok(())
}

fn cmd_check(config_path: &Path) -> Result<()> {
    let config = load_valid_config(config_path)?;
    let base_dir = config_dir(config_path);

    for db in &config.databases {
        let sources = load_sources(db, &base_dir)?;
        println!(
            "  {} (ip_version {}, {} fields, {} inputs)",
            db.name,
            db.mmdb.ip_version,
            db.types.len(),
            sources.len()
        );
        for (input, source) in db.inputs.iter().zip(&sources) {
            let kind = input.resolve_kind()?;
            println!("    {:?}  {}", kind, source.name());
        }
    }

    println!("Config OK: {}", config_path.display());
    Ok(())
}

fn cmd_verify(manifest_path: &Path) -> Result<()> {
    let manifest = verify_output(manifest_path)?;
    println!(
        "  {} OK: {} entries, sha256 {}",
        manifest.output_file, manifest.entry_count, manifest.sha256
    );
    Ok(())
}

fn cmd_config_init(path: &Path) -> Result<()> {
    init_config(path)?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: &Path) -> Result<()> {
    let config = load_config_from(config_path)?;
    let toml_str = toml::to_string_pretty(&config)
        .map_err(|e| eyre!("cannot render {}: {e}", config_path.display()))?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn source_started(&self, name: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Reading [{current}/{total}] {name}"));
    }

    fn records_read(&self, name: &str, count: u64) {
        self.spinner
            .set_message(format!("Reading {name}: {count} records"));
    }

    fn done(&self, result: &BuildResult) {
        self.spinner.println(format!(
            "built {} ({} entries)",
            result.name, result.stats.entries_emitted
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_build_with_databases() {
        let cli = Cli::try_parse_from([
            "rangemeld", "-vv", "build", "--config", "conf/geo.toml", "--db", "a", "--db", "b",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Build {
                config,
                databases,
                out,
            } => {
                assert_eq!(config, PathBuf::from("conf/geo.toml"));
                assert_eq!(databases, vec!["a", "b"]);
                assert_eq!(out, PathBuf::from("build"));
            }
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn parses_config_init_default_path() {
        let cli = Cli::try_parse_from(["rangemeld", "config", "init"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Config {
                action: ConfigAction::Init { ref path }
            } if path == Path::new("rangemeld.toml")
        ));
    }

    #[test]
    fn config_dir_of_bare_file_is_cwd() {
        assert_eq!(config_dir(Path::new("rangemeld.toml")), PathBuf::from("."));
        assert_eq!(config_dir(Path::new("conf/geo.toml")), PathBuf::from("conf"));
    }

    #[test]
    fn check_accepts_starter_layout() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("rangemeld.toml");
        init_config(&config).unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir_all(&data).unwrap();
        std::fs::write(data.join("geo-whois-asn-country-ipv4.csv"), "1.0.0.0,1.0.0.255,AU\n").unwrap();
        std::fs::write(data.join("location.ipfire.txt"), "net: 1.0.0.0/24\ncountry: AU\n").unwrap();

        cmd_check(&config).unwrap();
    }
}
