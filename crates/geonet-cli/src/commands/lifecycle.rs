//! Start, stop and destroy commands for managed instances

use std::io::{self, BufRead, Write};

use anyhow::Result;
use clap::Args;
use colored::*;
use comfy_table::Cell;
use geonet_core::{FilterBy, ManagedInstances, StateChanges, Transition};

use super::{new_table, print_outcomes, state_color, App};

/// Regions and instances a lifecycle command applies to
#[derive(Args)]
pub struct Selection {
    /// Regions to act on (default: configured regions)
    #[arg(short, long, num_args = 1..)]
    regions: Vec<String>,

    /// Instances to act on (default: all managed instances)
    instances: Vec<String>,
}

impl Selection {
    fn apply(&self, app: &App, managed: ManagedInstances) -> ManagedInstances {
        let regions: &[String] = if self.regions.is_empty() {
            app.config.regions()
        } else {
            &self.regions
        };
        let managed = managed.filter(regions, FilterBy::Regions);

        if self.instances.is_empty() {
            managed
        } else {
            managed.filter(&self.instances, FilterBy::Instances)
        }
    }
}

#[derive(Args)]
pub struct StartCommand {
    #[command(flatten)]
    selection: Selection,
}

#[derive(Args)]
pub struct StopCommand {
    #[command(flatten)]
    selection: Selection,
}

#[derive(Args)]
pub struct DestroyCommand {
    /// Do not prompt before destroying
    #[arg(short, long)]
    force: bool,

    /// Instances to destroy (default: all managed instances)
    instances: Vec<String>,
}

impl StartCommand {
    pub async fn execute(&self, app: &App) -> Result<()> {
        transition(app, &self.selection, Transition::Start).await
    }
}

impl StopCommand {
    pub async fn execute(&self, app: &App) -> Result<()> {
        transition(app, &self.selection, Transition::Stop).await
    }
}

async fn transition(app: &App, selection: &Selection, transition: Transition) -> Result<()> {
    let managed = selection.apply(app, app.managed()?);
    if managed.is_empty() {
        println!("{}", "no matching instances under management".yellow());
        return Ok(());
    }

    let regions = app.regions()?;
    let changes = managed.transition(&regions, transition).await?;
    print_changes(app, &changes)
}

fn print_changes(app: &App, changes: &StateChanges) -> Result<()> {
    if app.json {
        println!("{}", serde_json::to_string_pretty(changes)?);
        return Ok(());
    }

    let mut table = new_table(vec!["Region", "Instance", "Previous", "Current"]);
    for change in changes {
        table.add_row(vec![
            Cell::new(change.region_code().unwrap_or_default()),
            Cell::new(change.instance_id()),
            Cell::new(change.previous()).fg(state_color(change.previous().parse().ok())),
            Cell::new(change.current()).fg(state_color(change.current().parse().ok())),
        ]);
    }
    println!("{table}");
    Ok(())
}

impl DestroyCommand {
    pub async fn execute(&self, app: &App) -> Result<()> {
        let path = app.config.instances_path();
        let mut managed = ManagedInstances::load(&path)?;

        if !self.instances.is_empty() {
            let unmanaged = self.instances.iter().filter(|id| !managed.contains(id)).count();
            if unmanaged > 0 {
                anyhow::bail!("cannot destroy {} unmanaged instances", unmanaged);
            }
            managed = managed.filter(&self.instances, FilterBy::Instances);
        }

        if managed.is_empty() {
            println!("{}", "no instances under management".yellow());
            return Ok(());
        }

        if !self.force {
            if !confirm(&format!("destroy {}?", managed))? {
                println!("{}", "stopping instance termination".cyan());
                return Ok(());
            }
            println!("{}", format!("destroying {} instances …\n", managed.len()).red());
        }

        let regions = app.regions()?;
        let outcomes = managed.terminate_report(&regions).await;
        print_outcomes(&outcomes, app.json)?;

        // the stored tracker, not the filtered one, is updated
        let terminated = outcomes.iter().filter(|o| o.success).map(|o| o.subject.as_str());
        ManagedInstances::release(&path, terminated)?;
        Ok(())
    }
}

/// Ask a yes/no question on stdin, defaulting to no
fn confirm(prompt: &str) -> Result<bool> {
    let stdin = io::stdin();
    loop {
        print!("{} [y/N] ", prompt.yellow());
        io::stdout().flush()?;

        let mut answer = String::new();
        if stdin.lock().read_line(&mut answer)? == 0 {
            return Ok(false);
        }
        match answer.trim().to_lowercase().as_str() {
            "" | "n" | "no" => return Ok(false),
            "y" | "ye" | "yes" => return Ok(true),
            _ => print!("invalid response; "),
        }
    }
}
