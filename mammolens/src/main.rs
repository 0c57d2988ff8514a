use clap::Parser;
use env_logger::Builder;
use env_logger::Env;
use log::{error, info, Level};

use mammolens::color_utils::{colors, init_color_config, symbols};
use mammolens::commands::{run_analysis, run_dedup};
use mammolens::config::{AnalyzeCommand, AnalyzeConfig, DedupCommand, DedupConfig, GlobalArgs};
use std::io::Write;

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Classify mammograms and explain the result with saliency and regions
    Analyze(AnalyzeCommand),

    /// Check images pairwise for exact and near duplicates
    Dedup(DedupCommand),

    /// Show version information
    Version,
}

#[derive(Parser)]
#[command(name = "mammolens")]
#[command(about = "Explainable mammogram classification toolkit")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

fn get_log_level_from_verbosity(
    verbosity: clap_verbosity_flag::Verbosity<clap_verbosity_flag::ErrorLevel>,
) -> log::LevelFilter {
    let base_level = verbosity.log_level_filter();
    let adjusted_level = match base_level {
        log::LevelFilter::Off => log::LevelFilter::Off, // -qq -> OFF
        log::LevelFilter::Error => log::LevelFilter::Warn, // default -> WARN
        log::LevelFilter::Warn => log::LevelFilter::Info, // -v -> INFO
        log::LevelFilter::Info => log::LevelFilter::Debug, // -vv -> DEBUG
        log::LevelFilter::Debug => log::LevelFilter::Trace, // -vvv -> TRACE
        log::LevelFilter::Trace => log::LevelFilter::Trace,
    };

    // clap-verbosity-flag cannot tell default from -q, so check quiet directly
    if verbosity.is_silent() {
        log::LevelFilter::Error // -q -> ERROR
    } else {
        adjusted_level
    }
}

fn init_logging(global: &GlobalArgs) {
    // Honor RUST_LOG only when no -v/-q was given
    let use_env = !global.verbosity.is_present() && std::env::var_os("RUST_LOG").is_some();

    let mut logger = if use_env {
        Builder::from_env(Env::default())
    } else {
        let mut b = Builder::new();
        b.filter_level(get_log_level_from_verbosity(global.verbosity.clone()));
        b
    };

    logger
        .format(|buf, record| {
            let level_str = match record.level() {
                Level::Error => colors::error_level("ERROR"),
                Level::Warn => colors::warning_level("WARN"),
                Level::Info => colors::info_level("INFO"),
                Level::Debug => colors::debug_level("DEBUG"),
                Level::Trace => colors::trace_level("TRACE"),
            };
            writeln!(buf, "[{}] {}", level_str, record.args())
        })
        .init();
}

fn sources_description(sources: &[String]) -> String {
    match sources {
        [only] => only.clone(),
        _ => format!("{} inputs", sources.len()),
    }
}

fn main() {
    let cli = Cli::parse();

    init_color_config(cli.global.no_color);
    init_logging(&cli.global);

    match &cli.command {
        Some(Commands::Analyze(cmd)) => {
            info!(
                "{}Analysis: {} | model: {} | device: {}",
                symbols::analysis_start(),
                sources_description(&cmd.sources),
                cmd.model_path.display(),
                cli.global.device
            );

            let mut outputs = vec!["report"];
            if cmd.heatmap {
                outputs.push("heatmap");
            }
            if cmd.overlay {
                outputs.push("overlay");
            }
            if cmd.annotated {
                outputs.push("annotated");
            }
            info!("   Outputs: {}", outputs.join(", "));

            let result = AnalyzeConfig::from_args(cli.global.clone(), cmd.clone())
                .and_then(run_analysis);
            if let Err(e) = result {
                error!("{}Analysis failed: {e:#}", symbols::operation_failed());
                std::process::exit(1);
            }
        }
        Some(Commands::Dedup(cmd)) => {
            let result = DedupConfig::from_args(cli.global.clone(), cmd.clone())
                .map_err(anyhow::Error::msg)
                .and_then(run_dedup);
            match result {
                Ok(checks) => {
                    for check in checks {
                        println!(
                            "{} <-> {}: {}",
                            check.first.display(),
                            check.second.display(),
                            check.result.reason
                        );
                    }
                }
                Err(e) => {
                    error!("{}Duplicate check failed: {e:#}", symbols::operation_failed());
                    std::process::exit(1);
                }
            }
        }
        Some(Commands::Version) => {
            println!("mammolens v{}", env!("CARGO_PKG_VERSION"));
            println!("Repository: {}", env!("CARGO_PKG_REPOSITORY"));
        }
        None => {
            use clap::CommandFactory;
            let mut cmd = Cli::command();
            if let Err(e) = cmd.print_help() {
                error!("Failed to print help: {e}");
            }
        }
    }
}
