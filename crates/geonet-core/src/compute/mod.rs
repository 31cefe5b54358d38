//! Cloud compute API seam
//!
//! The core never talks to the provider SDK directly. Every per-region call
//! goes through [`ComputeApi`], which returns raw response documents shaped
//! like the EC2 API (PascalCase keys); callers unwrap the named list field
//! and wrap it into a typed collection. A [`Connector`] opens one
//! `ComputeApi` per region.
//!
//! The SDK backed client sits behind the `aws` feature. An in-memory
//! `mock` backend for tests is compiled under `cfg(test)` or the `mock`
//! feature.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

#[cfg(feature = "aws")]
pub mod aws;
#[cfg(any(test, feature = "mock"))]
pub mod mock;

#[cfg(feature = "aws")]
pub use aws::{AwsCompute, AwsConnector};
#[cfg(any(test, feature = "mock"))]
pub use mock::{MockCompute, MockConnector};

/// A named filter as accepted by the describe calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub name: String,
    pub values: Vec<String>,
}

/// Parameters shared by every describe call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescribeRequest {
    pub ids: Vec<String>,
    pub filters: Vec<Filter>,
}

impl DescribeRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn filter<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters.push(Filter {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn has_filter(&self, name: &str) -> bool {
        self.filters.iter().any(|f| f.name == name)
    }
}

/// One ingress permission to authorize or revoke
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressRule {
    pub protocol: String,
    pub from_port: i32,
    pub to_port: i32,
    pub ipv4_ranges: Vec<String>,
    pub ipv6_ranges: Vec<String>,
    /// Group id allowed as the traffic source
    pub source_group: Option<String>,
}

impl IngressRule {
    pub fn tcp(port: i32) -> Self {
        Self::tcp_range(port, port)
    }

    pub fn tcp_range(from_port: i32, to_port: i32) -> Self {
        Self {
            protocol: "tcp".to_string(),
            from_port,
            to_port,
            ipv4_ranges: Vec::new(),
            ipv6_ranges: Vec::new(),
            source_group: None,
        }
    }

    pub fn cidr(mut self, cidr: impl Into<String>) -> Self {
        self.ipv4_ranges.push(cidr.into());
        self
    }

    pub fn cidr_v6(mut self, cidr: impl Into<String>) -> Self {
        self.ipv6_ranges.push(cidr.into());
        self
    }

    pub fn from_group(mut self, group_id: impl Into<String>) -> Self {
        self.source_group = Some(group_id.into());
        self
    }

    /// EC2 `IpPermissions` entry for this rule
    pub fn to_permission(&self) -> Value {
        let mut perm = serde_json::Map::new();
        perm.insert("IpProtocol".into(), Value::from(self.protocol.clone()));
        perm.insert("FromPort".into(), Value::from(self.from_port));
        perm.insert("ToPort".into(), Value::from(self.to_port));
        perm.insert(
            "IpRanges".into(),
            self.ipv4_ranges
                .iter()
                .map(|cidr| serde_json::json!({ "CidrIp": cidr }))
                .collect(),
        );
        perm.insert(
            "Ipv6Ranges".into(),
            self.ipv6_ranges
                .iter()
                .map(|cidr| serde_json::json!({ "CidrIpv6": cidr }))
                .collect(),
        );
        perm.insert(
            "UserIdGroupPairs".into(),
            self.source_group
                .iter()
                .map(|group| serde_json::json!({ "GroupId": group }))
                .collect(),
        );
        Value::Object(perm)
    }
}

/// Launch template payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LaunchTemplateData {
    pub image_id: String,
    pub instance_type: String,
    pub key_name: String,
    pub security_group_ids: Vec<String>,
    pub monitoring: bool,
    pub instance_initiated_shutdown_behavior: String,
    #[serde(skip)]
    pub instance_tags: Vec<(String, String)>,
    #[serde(skip)]
    pub volume_tags: Vec<(String, String)>,
}

/// Per-region EC2 operations
#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// Region code this client talks to
    fn region(&self) -> &str;

    /// `{"Regions": [...]}`
    async fn describe_regions(&self) -> Result<Value>;
    /// `{"AvailabilityZones": [...]}`
    async fn describe_availability_zones(&self, req: &DescribeRequest) -> Result<Value>;
    /// `{"Reservations": [{"ReservationId", "Instances": [...]}]}`
    async fn describe_instances(&self, req: &DescribeRequest) -> Result<Value>;
    /// `{"InstanceStatuses": [...]}`
    async fn describe_instance_status(&self, instance_ids: &[String]) -> Result<Value>;
    /// `{"Volumes": [...]}`
    async fn describe_volumes(&self, req: &DescribeRequest) -> Result<Value>;
    /// `{"KeyPairs": [...]}`
    async fn describe_key_pairs(&self, req: &DescribeRequest) -> Result<Value>;
    /// `{"LaunchTemplates": [...]}`
    async fn describe_launch_templates(&self, req: &DescribeRequest) -> Result<Value>;
    /// `{"Images": [...]}`
    async fn describe_images(&self, req: &DescribeRequest) -> Result<Value>;
    /// `{"SecurityGroups": [...]}`
    async fn describe_security_groups(&self, req: &DescribeRequest) -> Result<Value>;
    /// `{"PlacementGroups": [...]}`
    async fn describe_placement_groups(&self, req: &DescribeRequest) -> Result<Value>;

    /// `{"StartingInstances": [state change, ...]}`
    async fn start_instances(&self, instance_ids: &[String]) -> Result<Value>;
    /// `{"StoppingInstances": [state change, ...]}`
    async fn stop_instances(&self, instance_ids: &[String]) -> Result<Value>;
    /// `{"TerminatingInstances": [state change, ...]}`
    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<Value>;

    /// Returns the new group id
    async fn create_security_group(&self, name: &str, description: &str) -> Result<String>;
    async fn delete_security_group(&self, group_id: &str) -> Result<()>;
    async fn authorize_ingress(&self, group_id: &str, rules: &[IngressRule]) -> Result<()>;
    async fn revoke_ingress(&self, group_id: &str, rules: &[IngressRule]) -> Result<()>;

    /// Returns the created `LaunchTemplate` record
    async fn create_launch_template(&self, name: &str, data: &LaunchTemplateData) -> Result<Value>;
    /// Returns the new version number
    async fn create_launch_template_version(&self, template_id: &str, data: &LaunchTemplateData) -> Result<i64>;
    async fn modify_default_version(&self, template_id: &str, version: i64) -> Result<()>;
    async fn delete_launch_template_versions(&self, template_id: &str, versions: &[i64]) -> Result<()>;
}

/// Opens a compute client for a region
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, region: &str) -> Result<Arc<dyn ComputeApi>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_describe_request_builder() {
        let req = DescribeRequest::new()
            .ids(["i-1", "i-2"])
            .filter("owner-id", ["1234"]);
        assert_eq!(req.ids, vec!["i-1", "i-2"]);
        assert!(req.has_filter("owner-id"));
        assert!(!req.has_filter("group-name"));
    }

    #[test]
    fn test_ingress_rule_permission() {
        let rule = IngressRule::tcp_range(3264, 3285).cidr("0.0.0.0/0").cidr_v6("::/0");
        let perm = rule.to_permission();
        assert_eq!(perm["FromPort"], 3264);
        assert_eq!(perm["IpRanges"], json!([{"CidrIp": "0.0.0.0/0"}]));
        assert_eq!(perm["Ipv6Ranges"], json!([{"CidrIpv6": "::/0"}]));
        assert_eq!(perm["UserIdGroupPairs"], json!([]));

        let own = IngressRule::tcp_range(0, 65535).from_group("sg-1").to_permission();
        assert_eq!(own["UserIdGroupPairs"][0]["GroupId"], "sg-1");
    }
}
