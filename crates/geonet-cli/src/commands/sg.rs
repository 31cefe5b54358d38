//! Security group commands

use anyhow::Result;
use clap::{Args, Subcommand};
use geonet_core::ec2::OPEN_CIDR;
use geonet_core::provision;

use super::{print_outcomes, App};

#[derive(Args)]
pub struct SgCommand {
    #[command(subcommand)]
    command: SgSubcommand,
}

#[derive(Subcommand)]
enum SgSubcommand {
    /// Create the alia security group
    Create(RegionsArg),

    /// Add an ingress rule to the alia security group
    Auth(PortArgs),

    /// Revoke an ingress rule from the alia security group
    Revoke(PortArgs),

    /// Delete the alia security group
    Destroy(RegionsArg),
}

#[derive(Args)]
struct RegionsArg {
    /// Regions to act on (default: configured regions)
    #[arg(short, long, num_args = 1..)]
    regions: Vec<String>,
}

#[derive(Args)]
struct PortArgs {
    #[command(flatten)]
    regions: RegionsArg,

    /// CIDR to authorize the port for (default is open)
    #[arg(long, default_value = OPEN_CIDR)]
    ipaddr: String,

    /// Port to open in the security group
    port: i32,
}

impl SgCommand {
    pub async fn execute(&self, app: &App) -> Result<()> {
        let outcomes = match &self.command {
            SgSubcommand::Create(args) => {
                let regions = app.select_regions(&args.regions)?;
                provision::create_security_group(&regions).await
            }
            SgSubcommand::Auth(args) => {
                let regions = app.select_regions(&args.regions.regions)?;
                provision::authorize_port(&regions, args.port, &args.ipaddr).await
            }
            SgSubcommand::Revoke(args) => {
                let regions = app.select_regions(&args.regions.regions)?;
                provision::revoke_port(&regions, args.port, &args.ipaddr).await
            }
            SgSubcommand::Destroy(args) => {
                let regions = app.select_regions(&args.regions)?;
                provision::destroy_security_group(&regions).await
            }
        };
        print_outcomes(&outcomes, app.json)
    }
}
