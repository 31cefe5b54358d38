//! GeoNet CLI - Command-line interface for managing EC2 instances across regions
//!
//! This CLI provides tools for:
//! - Describing regions and their resources
//! - Tracking instances under management
//! - Starting, stopping and destroying managed instances
//! - Provisioning the alia security group and launch template

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use geonet_core::{AppConfig, GeoNetError};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{describe, lifecycle, list, manage, regions, sg, status, template, version, App};

#[derive(Parser)]
#[command(name = "geonet")]
#[command(author = "GeoNet Team")]
#[command(version)]
#[command(about = "GeoNet - manage EC2 instances across regions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Describe known regions
    Regions(regions::RegionsCommand),

    /// Describe security groups, launch templates, images or key pairs
    Descr(describe::DescribeCommand),

    /// Show the status of all instances in each region
    Status(status::StatusCommand),

    /// List instances under management
    List(list::ListCommand),

    /// Add or remove instances from management
    Manage(manage::ManageCommand),

    /// Start instances under management
    Start(lifecycle::StartCommand),

    /// Stop instances under management
    Stop(lifecycle::StopCommand),

    /// Terminate instances under management
    Destroy(lifecycle::DestroyCommand),

    /// Manage the alia security group
    Sg(sg::SgCommand),

    /// Create and manage the alia launch template
    Template(template::TemplateCommand),

    /// Show version and configuration summary
    Version(version::VersionCommand),
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{} failed to load configuration: {}", "✗".red(), e);
            std::process::exit(1);
        }
    };

    init_logging(cli.verbose || config.debug());

    if let Err(e) = config.validate() {
        geonet_core::handle_error(&e);
        std::process::exit(1);
    }

    let app = App::new(config, cli.json);

    // Execute command
    let result = match cli.command {
        Some(Commands::Regions(cmd)) => cmd.execute(&app).await,
        Some(Commands::Descr(cmd)) => cmd.execute(&app).await,
        Some(Commands::Status(cmd)) => cmd.execute(&app).await,
        Some(Commands::List(cmd)) => cmd.execute(&app).await,
        Some(Commands::Manage(cmd)) => cmd.execute(&app).await,
        Some(Commands::Start(cmd)) => cmd.execute(&app).await,
        Some(Commands::Stop(cmd)) => cmd.execute(&app).await,
        Some(Commands::Destroy(cmd)) => cmd.execute(&app).await,
        Some(Commands::Sg(cmd)) => cmd.execute(&app).await,
        Some(Commands::Template(cmd)) => cmd.execute(&app).await,
        Some(Commands::Version(cmd)) => cmd.execute(&app),
        None => {
            // Show help by default
            println!("{}", "GeoNet CLI".bold());
            println!();
            println!("use {} for help", "geonet --help".cyan());
            Ok(())
        }
    };

    if let Err(e) = result {
        match e.downcast::<GeoNetError>() {
            Ok(err) => geonet_core::handle_error(&err),
            Err(other) => geonet_core::handle_error(&other.into()),
        }
        std::process::exit(1);
    }

    Ok(())
}
