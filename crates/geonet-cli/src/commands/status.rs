//! Status command - instance states in each region

use anyhow::Result;
use clap::Args;
use colored::*;
use geonet_core::DescribeRequest;

use super::{state_light, App};

#[derive(Args)]
pub struct StatusCommand {
    /// Regions to report on (default: configured regions)
    #[arg(short, long, num_args = 1..)]
    regions: Vec<String>,

    /// Include instance status checks
    #[arg(short = 'c', long)]
    checks: bool,
}

impl StatusCommand {
    pub async fn execute(&self, app: &App) -> Result<()> {
        let regions = app.find_regions(&self.regions)?;
        let mut instances = regions.instances(&DescribeRequest::new(), self.checks).await?;
        instances.sortby("name", false);

        if app.json {
            println!("{}", serde_json::to_string_pretty(&instances)?);
            return Ok(());
        }

        for region in &regions {
            let members: Vec<_> = instances
                .iter()
                .filter(|instance| instance.region_code() == Some(region.code()))
                .collect();

            let header = format!("{} ({} instances)", region.locale(), members.len());
            println!("{}", header.bold());
            println!("{}", "-".repeat(header.chars().count()));

            for instance in members {
                let mut line = format!("  {} {}", state_light(instance.state()), instance.name());
                if let Some(uptime) = instance.uptime() {
                    line.push_str(&format!(" {}", format!("up {}", uptime).dimmed()));
                }
                if let Some(check) = instance
                    .status()
                    .and_then(|status| status.pointer("/InstanceStatus/Status"))
                    .and_then(|status| status.as_str())
                {
                    line.push_str(&format!(" [{}]", check));
                }
                println!("{}", line);
            }
            println!();
        }

        Ok(())
    }
}
