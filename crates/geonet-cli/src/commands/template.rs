//! Template command - create and manage the alia launch template

use anyhow::Result;
use clap::Args;
use geonet_core::provision;

use super::{print_outcomes, App};

#[derive(Args)]
pub struct TemplateCommand {
    /// Create a new version of the template instead of a new template
    #[arg(short, long)]
    update: bool,

    /// Reset to the given version and delete later versions
    #[arg(long, conflicts_with = "update")]
    reset: Option<i64>,

    /// Regions to act on (default: configured regions)
    #[arg(short, long, num_args = 1..)]
    regions: Vec<String>,
}

impl TemplateCommand {
    pub async fn execute(&self, app: &App) -> Result<()> {
        let regions = app.select_regions(&self.regions)?;

        let outcomes = match self.reset {
            Some(version) if version < 1 => anyhow::bail!("template versions start at 1"),
            Some(version) => provision::reset_template(&regions, version).await,
            None => provision::put_template(&regions, self.update).await,
        };
        print_outcomes(&outcomes, app.json)
    }
}
