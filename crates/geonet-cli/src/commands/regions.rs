//! Regions command - describe known regions

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use colored::*;
use comfy_table::{Cell, Color};
use geonet_core::{wait, DescribeRequest, InstanceState, Region, Regions};
use serde_json::{json, Map, Value};

use super::{new_table, App};

#[derive(Args)]
pub struct RegionsCommand {
    /// Fetch the region list from EC2 and save it
    #[arg(short, long)]
    update: bool,

    /// Print the region data path and exit
    #[arg(short, long)]
    data: bool,

    /// Count available availability zones
    #[arg(short = 'Z', long)]
    zones: bool,

    /// Count available key pairs
    #[arg(short = 'K', long)]
    key_pairs: bool,

    /// Count available launch templates
    #[arg(short = 'T', long)]
    launch_templates: bool,

    /// Count available AMIs
    #[arg(short = 'I', long)]
    images: bool,

    /// Count available security groups
    #[arg(short = 'G', long)]
    security_groups: bool,

    /// Count instances in these states ("all" counts every instance)
    #[arg(short = 'S', long, num_args = 1..)]
    state: Vec<String>,
}

impl RegionsCommand {
    pub async fn execute(&self, app: &App) -> Result<()> {
        let path = app.config.regions_path();
        if self.data {
            println!("{}", path.display());
            return Ok(());
        }

        for state in &self.state {
            if state != "all" {
                state.parse::<InstanceState>()?;
            }
        }

        let mut regions = if self.update || !path.exists() {
            let regions = Regions::discover(app.ctx.clone()).await?;
            regions.dump()?;
            regions
        } else {
            app.regions()?
        };
        regions.sortby("RegionName", false);

        let counts = wait(regions.iter().map(|region| self.counts(region))).await?;

        if app.json {
            let rows: Vec<Value> = regions
                .iter()
                .zip(&counts)
                .map(|(region, counts)| {
                    let mut row = Map::new();
                    row.insert("Used".into(), json!(region.is_configured()));
                    row.insert("Name".into(), json!(region.locale()));
                    row.insert("Region".into(), json!(region.code()));
                    for (column, count) in counts {
                        row.insert(column.clone(), json!(count));
                    }
                    Value::Object(row)
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
            return Ok(());
        }

        let mut header = vec!["Used".to_string(), "Name".to_string(), "Region".to_string()];
        if let Some(first) = counts.first() {
            header.extend(first.iter().map(|(column, _)| column.clone()));
        }

        let mut table = new_table(header);
        for (region, counts) in regions.iter().zip(&counts) {
            let mut row = vec![
                if region.is_configured() {
                    Cell::new("✓").fg(Color::Green)
                } else {
                    Cell::new("")
                },
                Cell::new(region.locale()),
                Cell::new(region.code()),
            ];
            row.extend(counts.iter().map(|(_, count)| Cell::new(count)));
            table.add_row(row);
        }

        println!("{table}");
        println!();
        println!(
            "{} regions, {} configured",
            regions.len().to_string().bold(),
            regions.iter().filter(|r| r.is_configured()).count().to_string().green()
        );
        Ok(())
    }

    /// Requested resource counts for one region, in column order
    async fn counts(&self, region: &Arc<Region>) -> geonet_core::Result<Vec<(String, usize)>> {
        let req = DescribeRequest::new();
        let mut counts = Vec::new();

        if self.zones {
            counts.push(("Zones".to_string(), region.zones(&req).await?.get_available().len()));
        }
        if self.key_pairs {
            counts.push(("Keys".to_string(), region.key_pairs(&req).await?.len()));
        }
        if self.launch_templates {
            counts.push(("Templates".to_string(), region.launch_templates(&req).await?.len()));
        }
        if self.images {
            counts.push(("AMIs".to_string(), region.images(&req).await?.len()));
        }
        if self.security_groups {
            counts.push(("SGs".to_string(), region.security_groups(&req).await?.len()));
        }

        if !self.state.is_empty() {
            let instances = region.instances(&req).await?;
            for state in &self.state {
                let count = match state.parse::<InstanceState>() {
                    Ok(state) => instances.with_states(&[state]).count(),
                    Err(_) => instances.len(),
                };
                counts.push((title(state), count));
            }
        }

        Ok(counts)
    }
}

fn title(state: &str) -> String {
    if state == "all" {
        return "Instances".to_string();
    }
    let mut chars = state.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
