//! Manage command - add or remove instances from management

use anyhow::Result;
use clap::{Args, Subcommand};
use colored::*;
use geonet_core::DescribeRequest;

use super::App;

#[derive(Args)]
pub struct ManageCommand {
    #[command(subcommand)]
    command: ManageSubcommand,
}

#[derive(Subcommand)]
enum ManageSubcommand {
    /// Put existing instances under management
    Add(AddCommand),

    /// Stop managing instances (the instances are left running)
    Remove(RemoveCommand),
}

#[derive(Args)]
struct AddCommand {
    /// Region the instances live in
    #[arg(short, long)]
    region: String,

    /// Instance ids
    #[arg(required = true)]
    instances: Vec<String>,
}

#[derive(Args)]
struct RemoveCommand {
    /// Only remove from this region
    #[arg(short, long)]
    region: Option<String>,

    /// Instance ids
    #[arg(required = true)]
    instances: Vec<String>,
}

impl ManageCommand {
    pub async fn execute(&self, app: &App) -> Result<()> {
        match &self.command {
            ManageSubcommand::Add(cmd) => cmd.execute(app).await,
            ManageSubcommand::Remove(cmd) => cmd.execute(app),
        }
    }
}

impl AddCommand {
    async fn execute(&self, app: &App) -> Result<()> {
        let region = app.regions()?.get(&self.region)?;

        // only track instances that exist
        let found = region
            .instances(&DescribeRequest::new().ids(self.instances.iter().cloned()))
            .await?;
        let missing: Vec<&str> = self
            .instances
            .iter()
            .filter(|id| !found.contains_id(id))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            anyhow::bail!("no instances {} in {}", missing.join(", "), region.code());
        }

        let mut managed = app.managed()?;
        for id in &self.instances {
            if managed.add(id.as_str(), region.code()) {
                println!("{} managing {} in {}", "✓".green(), id, region.locale());
            } else {
                println!("{} {} is already managed", "•".dimmed(), id);
            }
        }
        managed.dump(&app.config.instances_path())?;
        Ok(())
    }
}

impl RemoveCommand {
    fn execute(&self, app: &App) -> Result<()> {
        let mut managed = app.managed()?;
        for id in &self.instances {
            if managed.discard(id, self.region.as_deref()) {
                println!("{} released {}", "✓".green(), id);
            } else {
                println!("{} {} is not managed", "⚠".yellow(), id);
            }
        }
        managed.dump(&app.config.instances_path())?;
        Ok(())
    }
}
