//! List command - instances under management

use anyhow::Result;
use clap::Args;
use colored::*;
use comfy_table::Cell;

use super::{new_table, state_color, App};

#[derive(Args)]
pub struct ListCommand {
    /// Describe each managed instance
    #[arg(short, long)]
    status: bool,

    /// Print the managed instances data path and exit
    #[arg(short, long)]
    data: bool,
}

impl ListCommand {
    pub async fn execute(&self, app: &App) -> Result<()> {
        if self.data {
            println!("{}", app.config.instances_path().display());
            return Ok(());
        }

        let managed = app.managed()?;
        if managed.is_empty() {
            println!("{}", "no instances under management".yellow());
            return Ok(());
        }

        let regions = app.regions()?;

        if self.status {
            let instances = managed.status(&regions).await?;
            if app.json {
                println!("{}", serde_json::to_string_pretty(&instances)?);
                return Ok(());
            }

            let mut table = new_table(vec!["Region", "Instance", "Name", "State", "Type", "Address", "Uptime"]);
            for instance in &instances {
                let code = instance.region_code().unwrap_or_default();
                table.add_row(vec![
                    Cell::new(app.locale(&regions, code)),
                    Cell::new(instance.instance_id()),
                    Cell::new(instance.name()),
                    Cell::new(instance.state_name()).fg(state_color(instance.state())),
                    Cell::new(instance.vm_type().unwrap_or_default()),
                    Cell::new(instance.ipaddr().unwrap_or_default()),
                    Cell::new(instance.uptime().unwrap_or_default()),
                ]);
            }
            println!("{table}");
        } else {
            if app.json {
                println!("{}", serde_json::to_string_pretty(&managed)?);
                return Ok(());
            }

            let mut table = new_table(vec!["Region", "Instance"]);
            for (code, ids) in managed.regions() {
                for id in ids {
                    table.add_row(vec![app.locale(&regions, code), id]);
                }
            }
            println!("{table}");
        }

        println!();
        println!("{}", managed);
        Ok(())
    }
}
