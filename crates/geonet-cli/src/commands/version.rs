//! Version command - show the build and the environment it runs against

use anyhow::Result;
use clap::Args;
use colored::*;
use serde_json::{json, Value};

use super::App;

#[derive(Args)]
pub struct VersionCommand;

impl VersionCommand {
    pub fn execute(&self, app: &App) -> Result<()> {
        let info = summary(app)?;
        if app.json {
            println!("{}", serde_json::to_string_pretty(&info)?);
            return Ok(());
        }

        let config = &app.config;
        println!("{} {}", "geonet".bold(), env!("CARGO_PKG_VERSION").green());
        println!();
        println!("  {} {}", "regions:".cyan(), config.regions().join(", "));
        println!("  {} {}", "timezone:".cyan(), config.timezone());
        println!("  {} {}", "data:".cyan(), config.data_dir().display());
        if config.sources().is_empty() {
            println!("  {} {}", "config:".cyan(), "defaults".dimmed());
        } else {
            let sources: Vec<String> = config
                .sources()
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            println!("  {} {}", "config:".cyan(), sources.join(", "));
        }
        println!("  {} {}", "managed:".cyan(), app.managed()?);

        Ok(())
    }
}

/// Version and configuration facts reported by `geonet version`
fn summary(app: &App) -> Result<Value> {
    let config = &app.config;
    Ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "regions": config.regions(),
        "timezone": config.timezone().to_string(),
        "data_dir": config.data_dir(),
        "config_files": config.sources(),
        "managed": app.managed()?.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geonet_core::AppConfig;
    use std::path::Path;

    #[test]
    fn test_summary_reports_configuration() {
        let config = AppConfig::from_yaml("timezone: America/New_York")
            .unwrap()
            .with_regions(["us-east-1", "eu-west-1"])
            .with_data_dir(Path::new("/nonexistent/geonet-version-test"));
        let app = App::new(config, true);

        let info = summary(&app).unwrap();
        assert_eq!(info["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(info["regions"], json!(["us-east-1", "eu-west-1"]));
        assert_eq!(info["timezone"], "America/New_York");
        assert_eq!(info["data_dir"], "/nonexistent/geonet-version-test");
        assert_eq!(info["managed"], 0);
    }
}
