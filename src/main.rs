//! lumina-plugins - inspect and exercise the Lumina Note plugin runtime.
//!
//! Normalizes hotkey patterns and loads plugin stylesheets into a headless
//! style runtime to show the resulting cascade and selector conflicts.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lumina_plugins::plugin::{
    normalize_hotkey_pattern, MemoryDocument, StyleInput, StyleLayer, StyleRuntime, StyleUpdate,
};
use lumina_plugins::RuntimeConfig;

/// Inspect and exercise the Lumina Note plugin runtime
#[derive(Parser)]
#[command(name = "lumina-plugins")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize hotkey patterns
    Hotkey {
        /// Patterns such as "Shift+Ctrl+K"
        #[arg(required = true)]
        patterns: Vec<String>,
    },

    /// Load plugin stylesheets and show the cascade and conflicts
    Styles {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Stylesheets as PLUGIN[:LAYER]=FILE
        #[arg(required = true)]
        sheets: Vec<String>,
    },

    /// Show configuration
    Config {
        /// Show config file path
        #[arg(long)]
        path: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, config_error) = match RuntimeConfig::load() {
        Ok(config) => (config, None),
        Err(err) => (RuntimeConfig::default(), Some(err)),
    };

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(filter)
        .init();

    if let Some(err) = config_error {
        warn!(error = %err, "failed to load configuration, using defaults");
    }

    match cli.command {
        Commands::Hotkey { patterns } => cmd_hotkey(&patterns),
        Commands::Styles { format, sheets } => cmd_styles(&config, format, &sheets),
        Commands::Config { path } => cmd_config(&config, path),
        Commands::Completions { shell } => {
            cmd_completions(shell);
            Ok(())
        }
    }
}

/// Print the normalized form of each pattern.
fn cmd_hotkey(patterns: &[String]) -> Result<()> {
    let mut invalid = 0;
    for pattern in patterns {
        let normalized = normalize_hotkey_pattern(pattern);
        if normalized.is_empty() {
            invalid += 1;
            println!("{pattern}\t<invalid>");
        } else {
            println!("{pattern}\t{normalized}");
        }
    }

    if invalid > 0 {
        anyhow::bail!("{invalid} invalid hotkey pattern(s)");
    }
    Ok(())
}

/// A `PLUGIN[:LAYER]=FILE` argument.
#[derive(Debug, PartialEq, Eq)]
struct SheetArg {
    plugin_id: String,
    layer: Option<StyleLayer>,
    path: PathBuf,
}

fn parse_sheet_arg(arg: &str) -> Result<SheetArg> {
    let (owner, path) = arg
        .split_once('=')
        .with_context(|| format!("expected PLUGIN[:LAYER]=FILE, got '{arg}'"))?;
    let (plugin_id, layer) = match owner.split_once(':') {
        Some((plugin_id, layer)) => (plugin_id, Some(layer.parse::<StyleLayer>()?)),
        None => (owner, None),
    };
    if plugin_id.trim().is_empty() || path.trim().is_empty() {
        anyhow::bail!("expected PLUGIN[:LAYER]=FILE, got '{arg}'");
    }
    Ok(SheetArg { plugin_id: plugin_id.trim().to_string(), layer, path: PathBuf::from(path) })
}

/// Load stylesheets into a headless runtime and report the result.
fn cmd_styles(config: &RuntimeConfig, format: OutputFormat, sheets: &[String]) -> Result<()> {
    let runtime = StyleRuntime::with_config(Arc::new(MemoryDocument::new()), config.style.clone());

    for arg in sheets {
        let sheet = parse_sheet_arg(arg)?;
        let css = std::fs::read_to_string(&sheet.path)
            .with_context(|| format!("failed to read {}", sheet.path.display()))?;
        let mut input = StyleInput::new(css).global();
        if let Some(layer) = sheet.layer {
            input = input.layer(layer);
        }
        runtime
            .register_style(&sheet.plugin_id, input)
            .with_context(|| format!("failed to register {}", sheet.path.display()))?;
    }

    let update = StyleUpdate { entries: runtime.list_entries(), conflicts: runtime.list_conflicts() };

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&update)?;
            println!("{json}");
        }
        OutputFormat::Text => {
            println!("Entries ({}):", update.entries.len());
            for entry in &update.entries {
                println!("  [{}] {} {}", entry.layer, entry.plugin_id, entry.id);
            }
            println!("\nConflicts ({}):", update.conflicts.len());
            for conflict in &update.conflicts {
                println!("  {} ({})", conflict.selector, conflict.plugin_ids.join(", "));
            }
        }
    }

    Ok(())
}

/// Show configuration.
fn cmd_config(config: &RuntimeConfig, show_path: bool) -> Result<()> {
    if show_path {
        if let Some(path) = RuntimeConfig::config_dir() {
            println!("{}", path.display());
        }
        return Ok(());
    }

    let toml = toml::to_string_pretty(config)?;
    println!("{toml}");

    Ok(())
}

/// Generate shell completions.
fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "lumina-plugins", &mut io::stdout());
}
