use clap::{Parser, Subcommand};
use espanso_companion::config::{self, Config, LoggingConfig};
use espanso_companion::service::{PackageOp, Report, StepOutcome};
use espanso_companion::AppContext;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser)]
#[command(name = "espanso-companion")]
#[command(author, version, about = "Companion for the espanso text expander", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Make sure espanso is installed and its daemon is running
    Handshake,

    /// Show daemon status
    Status,

    /// Start the espanso daemon
    Start,

    /// Restart the espanso daemon
    Restart,

    /// Show or change whether espanso starts with the session
    Autostart {
        /// Register espanso as a system service
        #[arg(long, conflicts_with = "disable")]
        enable: bool,

        /// Unregister the system service
        #[arg(long)]
        disable: bool,
    },

    /// Manage espanso packages
    Package {
        #[command(subcommand)]
        action: PackageAction,
    },

    /// Check whether a trigger expands
    Match {
        /// Trigger text, e.g. ":date"
        text: String,
    },

    /// Show the espanso log
    Log {
        /// Number of trailing lines
        #[arg(short = 'n', long, default_value_t = 100)]
        lines: usize,
    },

    /// Run `espanso doctor`
    Doctor,

    /// Re-check CLI and daemon without starting anything
    Diagnose,

    /// Review pending phrase suggestions
    Suggestions {
        #[command(subcommand)]
        action: SuggestionAction,
    },

    /// Configure settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[derive(Subcommand)]
enum PackageAction {
    /// List installed packages
    List,

    /// Install a package
    Install { name: String },

    /// Uninstall a package
    Uninstall { name: String },

    /// Update one package, or all of them
    Update { name: Option<String> },
}

#[derive(Subcommand)]
enum SuggestionAction {
    /// List pending suggestions
    List,

    /// Accept, reject or block a suggestion
    Decide {
        /// Suggestion id from `suggestions list`
        id: String,

        /// accept, reject or block (alias: never)
        decision: String,
    },
}

fn init_logging(verbose: bool, logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = if verbose {
        EnvFilter::new("espanso_companion=debug")
    } else {
        EnvFilter::new(format!("espanso_companion={}", logging.level.to_lowercase()))
    };

    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let (file, guard) = match logging.file.then(Config::data_dir).and_then(Result::ok) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir.join("logs"), "espanso-companion.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file)
        .init();

    guard
}

fn emit<T: Serialize>(value: &T, json: bool, human: impl FnOnce(&T)) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human(value);
    }
    Ok(())
}

fn print_report(report: &Report) {
    println!("[{}] {}", report.status, report.detail);
}

fn print_steps(steps: &[StepOutcome]) {
    for step in steps {
        println!("[{}] {}: {}", step.status, step.label, step.detail);
    }
}

/// Run blocking CLI work off the async workers.
async fn blocking<T, F>(ctx: &Arc<AppContext>, f: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&AppContext) -> T + Send + 'static,
{
    let ctx = ctx.clone();
    Ok(tokio::task::spawn_blocking(move || f(&ctx)).await?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { show } = cli.command {
        let _guard = init_logging(cli.verbose, &LoggingConfig::default());
        if show {
            config::show()?;
        } else {
            println!("Config file: {}", Config::config_path()?.display());
        }
        return Ok(());
    }

    let (config, load_error) = match Config::load() {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };
    let _guard = init_logging(cli.verbose, &config.logging);
    let config_loaded = load_error.is_none();
    if let Some(e) = load_error {
        warn!("Using default configuration: {}", e);
    }

    let ctx = Arc::new(AppContext::new(config));
    let json = cli.json;

    match cli.command {
        Commands::Handshake => {
            info!("Running service handshake");
            let steps = blocking(&ctx, |ctx| ctx.startup()).await?;
            emit(&steps, json, |steps| print_steps(steps))?;
        }

        Commands::Status => {
            let status = blocking(&ctx, |ctx| ctx.dashboard_status()).await?;
            emit(&status, json, |s| {
                println!("{}: {}", s.status_message, s.cli_status);
            })?;
        }

        Commands::Start => {
            let report = blocking(&ctx, |ctx| ctx.control().start()).await?;
            emit(&report, json, print_report)?;
        }

        Commands::Restart => {
            let report = blocking(&ctx, |ctx| ctx.control().restart()).await?;
            emit(&report, json, print_report)?;
        }

        Commands::Autostart { enable, disable } => {
            let report = blocking(&ctx, move |ctx| {
                if enable || disable {
                    ctx.control().set_autostart(enable)
                } else {
                    ctx.control().autostart_status()
                }
            })
            .await?;
            emit(&report, json, print_report)?;
        }

        Commands::Package { action } => match action {
            PackageAction::List => {
                let listing = blocking(&ctx, |ctx| ctx.control().list_packages()).await?;
                emit(&listing, json, |l| {
                    if l.packages.is_empty() {
                        println!("[{}] {}", l.status, l.detail);
                    }
                    for package in &l.packages {
                        println!("{}", package);
                    }
                })?;
            }
            PackageAction::Install { name } => {
                let report =
                    blocking(&ctx, move |ctx| ctx.control().package(PackageOp::Install, Some(&name)))
                        .await?;
                emit(&report, json, print_report)?;
            }
            PackageAction::Uninstall { name } => {
                let report = blocking(&ctx, move |ctx| {
                    ctx.control().package(PackageOp::Uninstall, Some(&name))
                })
                .await?;
                emit(&report, json, print_report)?;
            }
            PackageAction::Update { name } => {
                let report = blocking(&ctx, move |ctx| {
                    ctx.control().package(PackageOp::Update, name.as_deref())
                })
                .await?;
                emit(&report, json, print_report)?;
            }
        },

        Commands::Match { text } => {
            let outcome = blocking(&ctx, move |ctx| ctx.control().test_match(&text)).await?;
            emit(&outcome, json, |o| {
                if o.matched() {
                    println!("{} -> {}", o.input, o.output);
                } else {
                    println!("No expansion for {}: {}", o.input, o.output);
                }
            })?;
        }

        Commands::Log { lines } => {
            let log = blocking(&ctx, move |ctx| ctx.control().logs(lines)).await?;
            emit(&log, json, |lines| {
                for line in lines {
                    println!("{}", line);
                }
            })?;
        }

        Commands::Doctor => {
            let report = blocking(&ctx, |ctx| ctx.control().doctor()).await?;
            emit(&report, json, |r| println!("{}", r.output))?;
        }

        Commands::Diagnose => {
            let steps = blocking(&ctx, |ctx| ctx.connection_steps()).await?;
            emit(&steps, json, |steps| print_steps(steps))?;
        }

        Commands::Suggestions { action } => {
            let hub = ctx
                .suggestions()
                .ok_or_else(|| anyhow::anyhow!("Suggestions are not available"))?;
            match action {
                SuggestionAction::List => {
                    let pending = hub.queue().list_pending();
                    emit(&pending, json, |pending| {
                        if pending.is_empty() {
                            println!("No pending suggestions");
                        }
                        for s in pending {
                            println!("{}  \"{}\" (seen {}x)", s.id, s.phrase, s.occurrence_count);
                        }
                    })?;
                }
                SuggestionAction::Decide { id, decision } => {
                    let outcome = hub.decide(&id, &decision)?;

                    // Blocked/handled hashes live in the [suggestions] table
                    if config_loaded {
                        let settings = hub.settings();
                        let mut config = ctx.config().clone();
                        config.suggestions.blocked = settings.blocked;
                        config.suggestions.handled = settings.handled;
                        config.save()?;
                    }
                    emit(&outcome, json, |o| println!("[{}] {}", o.decision, o.detail))?;
                }
            }
        }

        // Answered before the config was loaded
        Commands::Config { .. } => {}
    }

    ctx.shutdown();
    Ok(())
}
