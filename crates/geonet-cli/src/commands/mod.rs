//! Subcommands and the helpers they share

pub mod describe;
pub mod lifecycle;
pub mod list;
pub mod manage;
pub mod regions;
pub mod sg;
pub mod status;
pub mod template;
pub mod version;

use std::sync::Arc;

use anyhow::Result;
use colored::*;
use comfy_table::{presets::UTF8_FULL, Cell, Color, Table};
use geonet_core::compute::AwsConnector;
use geonet_core::report::tally;
use geonet_core::{AppConfig, Context, InstanceState, ManagedInstances, Outcome, Regions};
use tracing::warn;

/// Process-wide state handed to every command
pub struct App {
    pub config: Arc<AppConfig>,
    pub ctx: Context,
    pub json: bool,
}

impl App {
    pub fn new(config: AppConfig, json: bool) -> Self {
        let config = Arc::new(config);
        let connector = Arc::new(AwsConnector::new(config.aws().profile.clone()));
        Self {
            ctx: Context::new(config.clone(), connector),
            config,
            json,
        }
    }

    pub fn regions(&self) -> Result<Regions> {
        Ok(Regions::load(self.ctx.clone())?)
    }

    /// The named regions, or the configured ones when no names are given
    pub fn select_regions(&self, names: &[String]) -> Result<Regions> {
        if names.is_empty() {
            return Ok(Regions::load_active(self.ctx.clone())?);
        }
        Ok(self.regions()?.select(names)?)
    }

    /// Like [`App::select_regions`] but unknown names are skipped with a warning
    pub fn find_regions(&self, names: &[String]) -> Result<Regions> {
        if names.is_empty() {
            return Ok(Regions::load_active(self.ctx.clone())?);
        }

        let all = self.regions()?;
        let found = names
            .iter()
            .filter_map(|name| {
                let region = all.find(name);
                if region.is_none() {
                    warn!(region = %name, "Unknown region, skipping");
                }
                region
            })
            .collect();
        Ok(Regions::new(self.ctx.clone(), found))
    }

    pub fn managed(&self) -> Result<ManagedInstances> {
        Ok(ManagedInstances::load(&self.config.instances_path())?)
    }

    /// Locale name for a region code, falling back to the code
    pub fn locale(&self, regions: &Regions, code: &str) -> String {
        regions
            .find(code)
            .map(|region| region.locale())
            .unwrap_or_else(|| code.to_string())
    }
}

pub fn state_color(state: Option<InstanceState>) -> Color {
    match state {
        Some(InstanceState::Pending) => Color::Yellow,
        Some(InstanceState::Running) => Color::Green,
        Some(InstanceState::ShuttingDown) => Color::Cyan,
        Some(InstanceState::Terminated) => Color::Blue,
        Some(InstanceState::Stopping) => Color::Magenta,
        Some(InstanceState::Stopped) => Color::Red,
        None => Color::Grey,
    }
}

pub fn state_light(state: Option<InstanceState>) -> ColoredString {
    match state {
        Some(InstanceState::Pending) => "●".yellow(),
        Some(InstanceState::Running) => "●".green(),
        Some(InstanceState::ShuttingDown) => "●".cyan(),
        Some(InstanceState::Terminated) => "●".blue(),
        Some(InstanceState::Stopping) => "●".bright_red(),
        Some(InstanceState::Stopped) => "●".red(),
        None => "●".dimmed(),
    }
}

pub fn new_table<I, S>(header: I) -> Table
where
    I: IntoIterator<Item = S>,
    S: Into<Cell>,
{
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(header);
    table
}

/// Print per-unit outcome rows with a summary line
pub fn print_outcomes(outcomes: &[Outcome], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcomes)?);
        return Ok(());
    }

    let mut table = new_table(vec!["", "Region", "Subject", "Notes"]);
    for outcome in outcomes {
        let color = if outcome.success { Color::Green } else { Color::Red };
        table.add_row(vec![
            Cell::new(outcome.mark()).fg(color),
            Cell::new(&outcome.region),
            Cell::new(&outcome.subject),
            Cell::new(&outcome.message),
        ]);
    }
    println!("{table}");

    let (succeeded, failed) = tally(outcomes);
    println!();
    if failed == 0 {
        println!("{} {} succeeded", "✓".green().bold(), succeeded);
    } else {
        println!("{} {}/{} failed", "⚠".yellow().bold(), failed, outcomes.len());
    }
    Ok(())
}
