use clap::Parser;
use sluice::core::pipeline::Pipeline;
use sluice::core::registry;
use sluice::core::stage::StageRole;
use sluice::{config, logging, modules};

/// Sluice - a configurable dataflow engine
#[derive(Parser)]
#[command(name = "sluice")]
#[command(version = "0.1.0")]
#[command(about = "Sluice: move items from sources, through filters, to sinks")]
#[command(
    long_about = "Sluice wires declared producer, processor and consumer modules \
into concurrent pipelines described by a TOML configuration file."
)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "./config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// List available modules and exit
    #[arg(short = 'L', long)]
    list_modules: bool,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let cli = Cli::parse();

    logging::init_logging(&cli.log_level);
    modules::register_builtin_modules();

    if cli.list_modules {
        list_modules();
        return;
    }

    let config = match config::load_config(&cli.config) {
        Ok(config) => config,
        Err(error) => {
            tracing::error!("failed to load config from '{}': {error:#}", cli.config);
            std::process::exit(1);
        }
    };

    let mut pipelines = match config::build_pipelines(&config) {
        Ok(pipelines) => pipelines,
        Err(error) => {
            tracing::error!("configuration error: {error:#}");
            std::process::exit(1);
        }
    };

    if pipelines.is_empty() {
        tracing::warn!("no pipelines declared in '{}'", cli.config);
        return;
    }

    tracing::info!("starting {} pipeline(s)", pipelines.len());
    for pipeline in &mut pipelines {
        if let Err(error) = pipeline.start() {
            tracing::error!("failed to start pipeline '{}': {error}", pipeline.name());
            std::process::exit(1);
        }
    }

    let interrupted = tokio::select! {
        _ = wait_all(&mut pipelines) => false,
        _ = tokio::signal::ctrl_c() => true,
    };

    if interrupted {
        tracing::info!("interrupt received, stopping pipelines");
        for pipeline in &mut pipelines {
            pipeline.stop();
        }
        wait_all(&mut pipelines).await;
    }

    tracing::info!("all pipelines done");
}

async fn wait_all(pipelines: &mut [Pipeline]) {
    for pipeline in pipelines {
        pipeline.wait().await;
    }
}

fn list_modules() {
    println!("----- Producer  Modules -----");
    print_modules(StageRole::Producer);
    println!("\n----- Processor Modules -----");
    print_modules(StageRole::Processor);
    println!("\n----- Consumer  Modules -----");
    print_modules(StageRole::Consumer);
}

fn print_modules(role: StageRole) {
    let listed = registry::list_by_role(role);
    if listed.is_empty() {
        println!("[No Available Modules]");
        return;
    }
    for info in listed {
        println!("* {} v{} ({})", info.name, info.version, info.generic_id);
    }
}
