//! geonet-core - Core library for managing EC2 resources across regions
//!
//! This crate provides:
//! - A validated resource/collection model over EC2 API records
//! - The region registry with lazily opened, retried connections
//! - Bounded concurrent fan-out across regions
//! - The persisted set of managed instances
//! - Security group and launch template provisioning flows
//!
//! Cloud calls go through the [`compute::ComputeApi`] trait. Enable the
//! "aws" feature for the AWS SDK backed client, or "mock" for the in-memory
//! backend the tests run against.

pub mod collection;
pub mod compute;
pub mod config;
pub mod ec2;
pub mod error;
pub mod managed;
pub mod provision;
pub mod region;
pub mod report;
pub mod resource;
pub mod serialize;
pub mod timez;
pub mod utils;
pub mod wait;
pub mod zone;

// Re-exports for convenience
pub use collection::Collection;
pub use compute::{ComputeApi, Connector, DescribeRequest, IngressRule};
pub use config::AppConfig;
pub use ec2::{
    Image, Images, Instance, InstanceState, Instances, KeyPair, KeyPairs, LaunchTemplate,
    LaunchTemplates, PlacementGroup, PlacementGroups, SecurityGroup, SecurityGroups, StateChange,
    StateChanges, Volume, Volumes,
};
pub use error::{handle_error, GeoNetError, Result};
pub use managed::{FilterBy, ManagedInstances, Transition};
pub use region::{Context, Region, Regions};
pub use report::Outcome;
pub use resource::{Kind, Record, Resource};
pub use utils::expand_tilde;
pub use wait::{wait, wait_settled};
pub use zone::{AvailabilityZone, AvailabilityZones};
