use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use procpool::{
    logging, Browser, Driver, NavigationId, NavigationStage, ProcessAllocationContext,
};
use procpool_config::{ConfigLoader, PoolConfig};
use procpool_launcher::{OsLauncher, RendererCommand};
use tracing::{info, warn};
use url::Url;

/// Renderer process pool daemon
#[derive(Parser)]
#[command(name = "procpoold")]
#[command(version)]
#[command(about = "Keeps spare renderer processes warm and allocates them to sites")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pool until interrupted
    Run(RunArgs),
    /// Write the default configuration to a file
    InitConfig {
        /// Output file
        #[arg(short, long, default_value = "procpool.toml")]
        output: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Renderer executable
    #[arg(long, default_value = "sleep")]
    renderer: String,
    /// Arguments for the renderer executable
    #[arg(long = "renderer-arg", default_values_t = vec!["3600".to_string()])]
    renderer_args: Vec<String>,
    /// Append per-host switches to the renderer command line
    #[arg(long)]
    host_switches: bool,
    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    run_secs: Option<u64>,
    /// Give the initial spare a timeout
    #[arg(long)]
    spare_timeout_secs: Option<u64>,
    /// Override the renderer process limit
    #[arg(long)]
    max_processes: Option<usize>,
    /// Allocate a renderer for each URL at startup
    #[arg(short, long = "url")]
    urls: Vec<Url>,
    /// Print collected metrics as JSON on exit
    #[arg(long)]
    metrics_json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => handle_run(args),
        Commands::InitConfig { output } => handle_init_config(output),
    }
}

fn handle_init_config(output: PathBuf) -> Result<()> {
    ConfigLoader::save(&output, &PoolConfig::default())
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Wrote default configuration to {}", output.display());
    Ok(())
}

fn handle_run(args: RunArgs) -> Result<()> {
    let loader = match &args.config {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let config = loader.load().context("Failed to load pool configuration")?;
    logging::init(&config.logging);

    // The browser is single-sequence, so everything runs on one thread.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, serve(args, config))
}

async fn serve(args: RunArgs, config: PoolConfig) -> Result<()> {
    let command = RendererCommand::new(&args.renderer)
        .args(args.renderer_args.iter())
        .pass_host_switches(args.host_switches);
    let launcher = Rc::new(OsLauncher::new(command));
    let mut browser = Browser::new(config, launcher);
    if let Some(max) = args.max_processes {
        browser.set_max_renderer_process_count(max);
    }

    let ctx = browser.create_browser_context("default", false);
    browser
        .spare_manager()
        .warmup_spare(ctx, args.spare_timeout_secs.map(Duration::from_secs));
    browser.run_until_idle();

    for (index, url) in args.urls.iter().enumerate() {
        let site_instance = browser
            .site_instance_for_url(ctx, url)
            .with_context(|| format!("No site instance for {}", url))?;
        let allocation = ProcessAllocationContext::for_navigation(
            NavigationStage::BeforeNetworkRequest,
            NavigationId(index as u64 + 1),
            false,
        );
        let host = browser
            .get_process_host_for_site_instance(&site_instance, allocation)
            .with_context(|| format!("Failed to allocate a renderer for {}", url))?;
        // Stands in for the frame that would keep the renderer alive.
        browser.add_listener(host)?;
        browser.add_frame_with_site(host, &site_instance.site_info)?;
        info!(host = %host, url = %url, "Allocated renderer");
    }

    let mut driver = Driver::new(browser);
    match args.run_secs {
        Some(secs) => driver.run_for(Duration::from_secs(secs)).await,
        None => {
            if let Err(e) = driver.run_until(tokio::signal::ctrl_c()).await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
            }
        }
    }

    let mut browser = driver.into_inner();
    info!(hosts = browser.host_count(), "Shutting down renderer pool");
    browser.spare_manager().cleanup_spares_for_testing();
    for host in browser.host_ids() {
        browser.disable_ref_counts(host)?;
    }
    browser.run_until_idle();
    // Let supervisors finish killing their process trees.
    tokio::time::sleep(Duration::from_millis(300)).await;

    if args.metrics_json {
        println!("{}", browser.metrics().to_json()?);
    }
    Ok(())
}
