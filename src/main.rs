use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use transroute::cli::commands;
use transroute::{OutputFormat, ProviderKind};

#[derive(Parser)]
#[command(name = "transroute")]
#[command(
    version,
    about = "Cost-aware translation broker with tiered provider failover"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true)]
    verbose: bool,

    #[arg(long, short, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate text (reads stdin when no text is given)
    Translate {
        #[arg(help = "Text to translate")]
        text: Option<String>,
        #[arg(long, short, help = "Target language (e.g. fr, zh-tw, pt-br)")]
        to: String,
        #[arg(long, help = "Source language (auto-detected when omitted)")]
        from: Option<String>,
        #[arg(long, default_value = "plain", help = "Content format: plain, html, markdown")]
        format: OutputFormat,
        #[arg(long, help = "Refine the draft with the refinement backend")]
        refine: bool,
        #[arg(long, help = "Refinement model override")]
        model: Option<String>,
        #[arg(long, help = "Try this provider first (deepl, openai, google)")]
        prefer: Option<ProviderKind>,
        #[arg(
            short = 'f',
            long = "output",
            default_value = "text",
            help = "Output format: text, json"
        )]
        output: String,
    },

    /// Show today's usage, budgets and cache totals
    Stats {
        #[arg(long, help = "UTC date to report (YYYY-MM-DD, default today)")]
        date: Option<NaiveDate>,
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: String,
    },

    /// Show provider configuration and routing state
    Providers {
        #[arg(long, help = "Health-check each configured backend")]
        check: bool,
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: String,
    },

    /// Remove cache entries not read recently
    Sweep {
        #[arg(long, help = "Retention window in days (default: cache.expire_after_days)")]
        days: Option<u32>,
        #[arg(long = "dry-run", help = "Only count what would be removed")]
        dry_run: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (merged from all sources)
    Show {
        #[arg(short = 'g', long, help = "Show global config file only")]
        global: bool,
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: String,
    },
    /// Show configuration and database paths
    Path,
    /// Write the default configuration file
    Init {
        #[arg(long, short, help = "Initialize global config")]
        global: bool,
        #[arg(long, help = "Overwrite existing config")]
        force: bool,
    },
}

/// Set up panic handler for graceful error reporting
fn setup_panic_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("\n\x1b[1;31m━━━ PANIC ━━━\x1b[0m");
        eprintln!("\x1b[31mtransroute encountered an unexpected error:\x1b[0m");
        eprintln!("  {}", message);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "\x1b[90mLocation: {}:{}:{}\x1b[0m",
                location.file(),
                location.line(),
                location.column()
            );
        }

        eprintln!("\n\x1b[33mPlease report this issue at:\x1b[0m");
        eprintln!("  https://github.com/junyeong-ai/transroute/issues");
        eprintln!();

        // Call default hook for backtrace (if RUST_BACKTRACE=1)
        default_hook(panic_info);
    }));
}

fn main() -> ExitCode {
    setup_panic_handler();

    match run_cli() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_cli() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Translate {
            text,
            to,
            from,
            format,
            refine,
            model,
            prefer,
            output,
        } => {
            let rt = Runtime::new()?;
            let ok = rt.block_on(commands::translate::run(commands::translate::TranslateOptions {
                text,
                from,
                to,
                format,
                refine,
                model,
                prefer,
                output,
            }))?;
            if !ok {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Stats { date, format } => {
            commands::stats::run(date, &format)?;
        }
        Commands::Providers { check, format } => {
            let rt = Runtime::new()?;
            rt.block_on(commands::providers::run(check, &format))?;
        }
        Commands::Sweep { days, dry_run } => {
            commands::sweep::run(days, dry_run)?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show { global, format } => {
                commands::config::show(global, &format)?;
            }
            ConfigAction::Path => {
                commands::config::path()?;
            }
            ConfigAction::Init { global, force } => {
                commands::config::init(global, force)?;
            }
        },
    }

    Ok(ExitCode::SUCCESS)
}
