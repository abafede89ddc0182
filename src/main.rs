// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tether main entry point - CLI and commands.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tokio::sync::broadcast::error::RecvError;

use tether::config::{self, CliOptions, ResolvedConfig};
use tether::mcp::{ConnectionStatus, RemoteServerManager, RiskLevel, ServerEvent};
use tether::telemetry::{init_telemetry, TelemetryConfig, GLOBAL_METRICS};
use tether::VERSION;

/// Tether - connect to remote MCP tool servers.
#[derive(Parser)]
#[command(name = "tether")]
#[command(author, version, about = "Connect to remote MCP tool servers", long_about = None)]
struct Cli {
    /// Config file to use instead of searching the workspace
    #[arg(short, long, env = "TETHER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Never reconnect after a server dies
    #[arg(long, global = true)]
    no_reconnect: bool,

    /// Refuse to start servers whose package scans RED
    #[arg(long, global = true)]
    block_on_high_risk: bool,

    /// Expose tools by their bare names
    #[arg(long, global = true)]
    no_namespace: bool,

    /// Tool call timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Show verbose output
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Show debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Output format for command results
    #[arg(short = 'f', long, value_enum, default_value = "text", global = true)]
    output_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Subcommands for tether.
#[derive(Subcommand)]
enum Commands {
    /// Connect to configured servers and show their status
    Servers,

    /// Connect to configured servers and list their tools
    Tools,

    /// Call one tool and print its result
    Call {
        /// Tool name as listed by `tether tools`
        tool: String,
        /// Arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },

    /// Scan configured server packages without connecting
    Scan,

    /// Stay connected and print lifecycle events until Ctrl-C
    Watch,

    /// Show configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Initialize a new configuration file
    Init,

    /// Show version information
    Version,
}

/// Config subcommand actions.
#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show which files contributed
    Sources,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let workspace_root = std::env::current_dir()?;
    let cli_options = cli_options(&cli);

    match cli.command {
        Commands::Init => {
            let path = config::init_config(&workspace_root, None)?;
            println!("Created config file: {}", path.display());
            return Ok(());
        }
        Commands::Version => {
            println!("tether {}", VERSION);
            return Ok(());
        }
        _ => {}
    }

    let config = resolve_config(&workspace_root, cli.config.as_deref(), cli_options)?;
    let _telemetry = init_tracing(&cli, &config);

    match cli.command {
        Commands::Config { action } => show_config(&config, action, cli.output_format)?,
        Commands::Scan => scan(&config, cli.output_format).await?,
        Commands::Servers => servers(&config, cli.output_format).await?,
        Commands::Tools => tools(&config, cli.output_format).await?,
        Commands::Call { ref tool, ref args } => {
            call(&config, tool, args, cli.timeout_ms, cli.output_format).await?
        }
        Commands::Watch => watch(&config).await?,
        Commands::Init | Commands::Version => {}
    }

    Ok(())
}

fn cli_options(cli: &Cli) -> CliOptions {
    CliOptions {
        auto_reconnect: cli.no_reconnect.then_some(false),
        block_on_high_risk: cli.block_on_high_risk.then_some(true),
        namespace_tools: cli.no_namespace.then_some(false),
        default_timeout_ms: cli.timeout_ms,
        log_level: if cli.debug {
            Some("tether=debug".to_string())
        } else if cli.verbose {
            Some("tether=info".to_string())
        } else {
            None
        },
    }
}

fn resolve_config(
    workspace_root: &Path,
    explicit: Option<&Path>,
    cli_options: CliOptions,
) -> anyhow::Result<ResolvedConfig> {
    let resolved = match explicit {
        Some(file) => config::load_config_with_file(workspace_root, file, cli_options),
        None => {
            let root = config::find_workspace_root(workspace_root)
                .unwrap_or_else(|| workspace_root.to_path_buf());
            config::load_config(&root, cli_options)
        }
    };
    resolved.context("failed to load configuration")
}

/// Initialize tracing. Quiet by default so command output stays readable.
fn init_tracing(cli: &Cli, config: &ResolvedConfig) -> Option<tether::telemetry::TelemetryGuard> {
    let mut telemetry = if cli.json_logs {
        TelemetryConfig::json()
    } else if cli.debug {
        TelemetryConfig::development()
    } else {
        TelemetryConfig::production()
    };
    if let Some(directive) = &config.log_level {
        telemetry = telemetry.with_filter(directive.clone());
    }
    init_telemetry(&telemetry).ok()
}

fn show_config(
    config: &ResolvedConfig,
    action: Option<ConfigAction>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match action {
        Some(ConfigAction::Show) | None => {
            let written = config.to_workspace_config();
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&written)?),
                OutputFormat::Text => print!("{}", serde_yaml::to_string(&written)?),
            }
        }
        Some(ConfigAction::Sources) => {
            if config.sources.is_empty() {
                println!("{}", "No config files found; using defaults".dimmed());
            }
            for source in &config.sources {
                println!("{}", source.display());
            }
        }
    }
    Ok(())
}

async fn connect(config: &ResolvedConfig) -> anyhow::Result<RemoteServerManager> {
    let manager = RemoteServerManager::new(config.manager_config())?;
    manager.initialize().await?;
    Ok(manager)
}

async fn scan(config: &ResolvedConfig, format: OutputFormat) -> anyhow::Result<()> {
    let manager = RemoteServerManager::new(config.manager_config())?;
    let reports = manager.scan_all().await;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    if reports.is_empty() {
        println!("{}", "No package-based servers configured".dimmed());
        return Ok(());
    }
    for report in &reports {
        let level = match report.verdict.level {
            RiskLevel::Green => report.verdict.level.to_string().green(),
            RiskLevel::Yellow => report.verdict.level.to_string().yellow(),
            RiskLevel::Red => report.verdict.level.to_string().red(),
        };
        let blocked = if report.blocked { " (blocked)".red().bold().to_string() } else { String::new() };
        println!(
            "{} {} [{}] {}{}",
            level,
            report.server.bright_white(),
            report.transport,
            report.package.dimmed(),
            blocked
        );
        for flag in report.verdict.flags() {
            println!("    - {flag}");
        }
        if let Some(adjustment) = &report.verdict.adjustment {
            println!("    {}", adjustment.dimmed());
        }
    }
    Ok(())
}

async fn servers(config: &ResolvedConfig, format: OutputFormat) -> anyhow::Result<()> {
    let manager = connect(config).await?;
    let statuses = manager.list_connected_servers();

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
    } else if statuses.is_empty() {
        println!("{}", "No servers configured".dimmed());
    } else {
        for status in &statuses {
            let label = match status.status {
                ConnectionStatus::Connected => status.status.to_string().green(),
                ConnectionStatus::Failed => status.status.to_string().red(),
                _ => status.status.to_string().yellow(),
            };
            println!(
                "{} {} [{}] {} tools",
                label,
                status.name.bright_white(),
                status.transport,
                status.tool_count
            );
            if let Some(error) = &status.last_error {
                println!("    {}", error.dimmed());
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}

async fn tools(config: &ResolvedConfig, format: OutputFormat) -> anyhow::Result<()> {
    let manager = connect(config).await?;
    let tools = manager.list_tools();

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&tools)?);
    } else {
        for tool in &tools {
            println!(
                "{} {}",
                tool.name.bright_white(),
                format!("({})", tool.owner_server_name).dimmed()
            );
            if let Some(description) = &tool.description {
                println!("    {description}");
            }
        }
        for collision in manager.collisions() {
            println!(
                "{} '{}' from {} shadowed by {}",
                "warning:".yellow(),
                collision.name,
                collision.shadowed,
                collision.winner
            );
        }
    }

    manager.shutdown().await;
    Ok(())
}

async fn call(
    config: &ResolvedConfig,
    tool: &str,
    args: &str,
    timeout_ms: Option<u64>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let arguments: serde_json::Value =
        serde_json::from_str(args).context("--args must be a JSON object")?;
    let manager = connect(config).await?;

    let result = manager
        .call_tool(tool, arguments, timeout_ms.map(Duration::from_millis))
        .await;
    manager.shutdown().await;
    let result = result?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text if result.is_error => eprintln!("{}", result.as_text().red()),
        OutputFormat::Text => println!("{}", result.as_text()),
    }
    if result.is_error {
        anyhow::bail!("tool '{tool}' reported an error");
    }
    Ok(())
}

async fn watch(config: &ResolvedConfig) -> anyhow::Result<()> {
    let manager = RemoteServerManager::new(config.manager_config())?;
    let mut events = manager.subscribe();
    manager.initialize().await?;
    println!("{}", "Watching servers, Ctrl-C to stop".dimmed());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(missed)) => {
                    println!("{}", format!("... {missed} events dropped").dimmed());
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    manager.shutdown().await;
    println!("{}", GLOBAL_METRICS.snapshot().format_report());
    Ok(())
}

fn print_event(event: &ServerEvent) {
    let line = match event {
        ServerEvent::Connected { name, tools } => {
            format!("{} {name} ({tools} tools)", "connected".green())
        }
        ServerEvent::Disconnected { name, exit_code } => match exit_code {
            Some(code) => format!("{} {name} (exit {code})", "disconnected".yellow()),
            None => format!("{} {name}", "disconnected".yellow()),
        },
        ServerEvent::Error { name, error } => format!("{} {name}: {error}", "error".red()),
        ServerEvent::Reconnecting { name, attempt, delay } => format!(
            "{} {name} (attempt {attempt} in {}ms)",
            "reconnecting".cyan(),
            delay.as_millis()
        ),
        ServerEvent::Failed { name } => format!("{} {name}", "failed".red().bold()),
        ServerEvent::ToolsChanged { name, tools } => {
            format!("{} {name} ({tools} tools)", "tools changed".blue())
        }
    };
    println!("{line}");
}
