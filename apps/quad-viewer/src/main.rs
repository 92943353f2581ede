use anyhow::{Context, Result};
use clap::Parser;
use quad_viewer::{
    config::{Config, ConfigOverrides},
    gst_utils,
    pipeline::{OrchestratorOptions, PipelineOrchestrator, SinkChoice},
    Coordinator, ExitReason, X11Host,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML, or JSON with a .json extension)
    #[arg(short, long, env = "QUAD_VIEWER_CONFIG")]
    config: Option<PathBuf>,

    /// Window width
    #[arg(long)]
    width: Option<u32>,

    /// Window height
    #[arg(long)]
    height: Option<u32>,

    /// Window x position
    #[arg(long, allow_hyphen_values = true)]
    x: Option<i32>,

    /// Window y position
    #[arg(long, allow_hyphen_values = true)]
    y: Option<i32>,

    /// Window title
    #[arg(long)]
    title: Option<String>,

    /// Fullscreen window at screen size; the output follows it
    #[arg(long)]
    fullscreen: bool,

    /// Compositor output width
    #[arg(long)]
    output_width: Option<u32>,

    /// Compositor output height
    #[arg(long)]
    output_height: Option<u32>,

    /// Capture width for every source
    #[arg(long)]
    video_width: Option<u32>,

    /// Capture height for every source
    #[arg(long)]
    video_height: Option<u32>,

    /// Capture device, in cell order (repeat up to four times)
    #[arg(short = 'D', long = "device")]
    devices: Vec<String>,

    /// Use live test patterns instead of capture devices
    #[arg(long)]
    test_sources: bool,

    /// Video sink: auto, xvimagesink, ximagesink or fakesink
    #[arg(long)]
    sink: Option<SinkChoice>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Disable console logging
    #[arg(long)]
    no_console_log: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    show_config: bool,

    /// Write the effective configuration to PATH and exit
    #[arg(long, value_name = "PATH")]
    save_config: Option<PathBuf>,

    /// Check available GStreamer plugins and exit
    #[arg(long)]
    check_plugins: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            width: self.width,
            height: self.height,
            x: self.x,
            y: self.y,
            title: self.title.clone(),
            fullscreen: self.fullscreen,
            output_width: self.output_width,
            output_height: self.output_height,
            video_width: self.video_width,
            video_height: self.video_height,
            devices: self.devices.clone(),
            test_sources: self.test_sources,
            sink: self.sink,
            log_level: self.log_level.clone(),
            log_file: self.log_file.clone(),
            no_console_log: self.no_console_log,
        }
    }
}

async fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path).await?,
        None => Config::default(),
    };
    config.merge(args.overrides());
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
    Ok(config)
}

fn init_logging(config: &Config, debug: bool) -> Result<()> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };

    let console = config.logging.console.then(|| {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
    });

    let file = match &config.logging.file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating log directory {:?}", parent))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {:?}", path))?;
            Some(
                fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_ansi(false)
                    .with_target(true)
                    .with_thread_ids(true),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();
    Ok(())
}

fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.render(false)?);

    let available = config.available_devices();
    println!("# Available capture devices:");
    for source in &config.sources {
        let status = match &source.test_pattern {
            Some(pattern) => format!("test pattern '{}'", pattern),
            None if available.contains(&source.device) => "present".to_string(),
            None => "missing".to_string(),
        };
        println!("#   {} {}", source.device, status);
    }
    Ok(())
}

async fn run(args: Args) -> Result<ExitReason> {
    let config = load_config(&args).await?;

    if args.show_config {
        show_config(&config)?;
        return Ok(ExitReason::CloseRequested);
    }
    if let Some(path) = &args.save_config {
        config.save(path).await?;
        println!("Configuration saved to {}", path.display());
        return Ok(ExitReason::CloseRequested);
    }

    init_logging(&config, args.debug)?;

    info!("Starting Quad Viewer v{}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &args.config {
        info!("Configuration file: {:?}", path);
    }

    let capabilities = gst_utils::initialize()?;
    if args.check_plugins {
        gst_utils::print_plugin_info(&capabilities);
        return Ok(ExitReason::CloseRequested);
    }
    gst_utils::verify_plugins_for_config(&capabilities, &config)?;

    info!(
        "Window {}x{} at {},{}; output {}; sink {}",
        config.window.width,
        config.window.height,
        config.window.x,
        config.window.y,
        config.output_size(),
        config.video.sink
    );
    for (cell, source) in config.sources.iter().enumerate() {
        match &source.test_pattern {
            Some(pattern) => info!("  cell {}: test pattern {}", cell, pattern),
            None => info!("  cell {}: {} ({}x{})", cell, source.device, source.width, source.height),
        }
    }

    let pipeline = PipelineOrchestrator::new(OrchestratorOptions::from_config(&config));
    let mut coordinator = Coordinator::new(config, X11Host::new(), pipeline);
    let reason = coordinator.run().await?;

    info!("Quad Viewer exited: {:?}", reason);
    Ok(reason)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
