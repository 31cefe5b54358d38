//! Describe command - security groups, templates, images and key pairs per region

use std::time::Instant;

use anyhow::Result;
use clap::{Args, ValueEnum};
use colored::*;
use comfy_table::{Cell, Color};
use geonet_core::DescribeRequest;

use super::{new_table, App};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResourceType {
    #[value(name = "security-groups", aliases = ["s", "sg", "sgs", "group", "groups", "security-group"])]
    SecurityGroups,
    #[value(name = "launch-templates", aliases = ["t", "lt", "template", "templates", "launch-template"])]
    LaunchTemplates,
    #[value(name = "images", aliases = ["i", "image", "ami", "amis"])]
    Images,
    #[value(name = "key-pairs", aliases = ["k", "keys", "key-pair"])]
    KeyPairs,
}

#[derive(Args)]
pub struct DescribeCommand {
    /// Resource type to describe
    #[arg(value_enum)]
    resource: ResourceType,

    /// Regions to describe (default: configured regions)
    #[arg(short, long, num_args = 1..)]
    regions: Vec<String>,

    /// Print total request time
    #[arg(short = 'T', long)]
    timer: bool,
}

impl DescribeCommand {
    pub async fn execute(&self, app: &App) -> Result<()> {
        let started = Instant::now();
        let regions = app.select_regions(&self.regions)?;
        let req = DescribeRequest::new();

        let mut table;
        match self.resource {
            ResourceType::SecurityGroups => {
                let groups = regions.security_groups(&req).await?;
                if app.json {
                    return print_json(&groups);
                }
                table = new_table(vec!["Region", "Group", "Name", "Ports"]);
                for group in &groups {
                    let ports: Vec<String> = group.open_ports().iter().map(ToString::to_string).collect();
                    table.add_row(vec![
                        Cell::new(group.region_code().unwrap_or_default()),
                        Cell::new(group.group_id()),
                        Cell::new(group.name()),
                        Cell::new(ports.join(", ")),
                    ]);
                }
            }
            ResourceType::LaunchTemplates => {
                let templates = regions.launch_templates(&req).await?;
                if app.json {
                    return print_json(&templates);
                }
                table = new_table(vec!["Region", "Template", "Name", "Version"]);
                for template in &templates {
                    table.add_row(vec![
                        Cell::new(template.region_code().unwrap_or_default()),
                        Cell::new(template.template_id()),
                        Cell::new(template.name()),
                        Cell::new(optional(template.default_version())),
                    ]);
                }
            }
            ResourceType::Images => {
                let images = regions.images(&req).await?;
                if app.json {
                    return print_json(&images);
                }
                table = new_table(vec!["Region", "AMI", "Name", "Size", "Disk"]);
                for image in &images {
                    table.add_row(vec![
                        Cell::new(image.region_code().unwrap_or_default()),
                        Cell::new(image.image_id()),
                        Cell::new(image.name()),
                        Cell::new(optional(image.size())),
                        Cell::new(image.disk().unwrap_or_default()),
                    ]);
                }
            }
            ResourceType::KeyPairs => {
                let pairs = regions.key_pairs(&req).await?;
                if app.json {
                    return print_json(&pairs);
                }
                table = new_table(vec!["Region", "Name", "Fingerprint", "Valid Local"]);
                for key in &pairs {
                    let check = match key.has_valid_key(None) {
                        true => Cell::new("✓").fg(Color::Green),
                        false => Cell::new("✗").fg(Color::Red),
                    };
                    table.add_row(vec![
                        Cell::new(key.region_code().unwrap_or_default()),
                        Cell::new(key.name()),
                        Cell::new(key.fingerprint()),
                        check,
                    ]);
                }
            }
        }

        println!("{table}");
        if self.timer {
            println!("{}", format!("request took {:.2?}", started.elapsed()).dimmed());
        }
        Ok(())
    }
}

fn optional(value: Option<i64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        cmd: DescribeCommand,
    }

    fn parse(args: &[&str]) -> DescribeCommand {
        Harness::try_parse_from(std::iter::once("descr").chain(args.iter().copied()))
            .unwrap()
            .cmd
    }

    #[test]
    fn test_resource_aliases() {
        assert_eq!(parse(&["sg"]).resource, ResourceType::SecurityGroups);
        assert_eq!(parse(&["lt"]).resource, ResourceType::LaunchTemplates);
        assert_eq!(parse(&["amis"]).resource, ResourceType::Images);
        assert_eq!(parse(&["key-pairs"]).resource, ResourceType::KeyPairs);
    }

    #[test]
    fn test_regions_and_timer() {
        let cmd = parse(&["images", "-r", "us-east-1", "eu-west-1", "-T"]);
        assert_eq!(cmd.regions, vec!["us-east-1", "eu-west-1"]);
        assert!(cmd.timer);
        assert!(Harness::try_parse_from(["descr", "volumes"]).is_err());
    }
}
