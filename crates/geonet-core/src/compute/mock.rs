//! In-memory EC2 for tests
//!
//! `MockCompute` keeps one region's records in memory and answers the
//! [`ComputeApi`] calls with EC2 shaped documents. Latency, connect failures
//! and failing operations can be injected to exercise the retry and fan-out
//! paths. Unknown filter names are ignored.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{ComputeApi, Connector, DescribeRequest, Filter, IngressRule, LaunchTemplateData};
use crate::error::{GeoNetError, Result};
use crate::serialize::encode_utc;
use crate::timez::utcnow;

/// Build an instance record in the given state
pub fn instance(id: &str, state: &str) -> Value {
    json!({
        "InstanceId": id,
        "InstanceType": "t2.micro",
        "State": state_record(state),
        "Tags": [],
    })
}

fn state_record(state: &str) -> Value {
    let code = match state {
        "pending" => 0,
        "running" => 16,
        "shutting-down" => 32,
        "terminated" => 48,
        "stopping" => 64,
        "stopped" => 80,
        _ => -1,
    };
    json!({"Code": code, "Name": state})
}

/// Records held by one mock region
#[derive(Debug, Clone, Default)]
pub struct MockData {
    pub regions: Vec<Value>,
    pub zones: Vec<Value>,
    pub instances: Vec<Value>,
    pub volumes: Vec<Value>,
    pub key_pairs: Vec<Value>,
    pub launch_templates: Vec<Value>,
    /// Template id -> version number -> template data
    pub template_versions: BTreeMap<String, BTreeMap<i64, Value>>,
    pub images: Vec<Value>,
    pub security_groups: Vec<Value>,
    pub placement_groups: Vec<Value>,
}

pub struct MockCompute {
    region: String,
    delay: Duration,
    data: Mutex<MockData>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    sequence: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockCompute {
    pub fn new(region: impl Into<String>) -> Self {
        let region = region.into();
        let zones = ["a", "b"]
            .iter()
            .enumerate()
            .map(|(i, suffix)| {
                json!({
                    "ZoneName": format!("{}{}", region, suffix),
                    "ZoneId": format!("{}-az{}", region, i + 1),
                    "State": "available",
                    "RegionName": region,
                    "Messages": [],
                })
            })
            .collect();

        Self {
            data: Mutex::new(MockData {
                zones,
                regions: vec![json!({"RegionName": region, "Endpoint": format!("ec2.{}.amazonaws.com", region)})],
                ..MockData::default()
            }),
            region,
            delay: Duration::ZERO,
            failing: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            sequence: AtomicU64::new(1),
        }
    }

    /// Simulated network latency applied to every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_regions(self, regions: Vec<Value>) -> Self {
        lock(&self.data).regions = regions;
        self
    }

    /// Add instances; records without a `ReservationId` get one each
    pub fn with_instances(self, instances: Vec<Value>) -> Self {
        {
            let mut data = lock(&self.data);
            for mut record in instances {
                if record.get("ReservationId").is_none() {
                    record["ReservationId"] = json!(self.next_id("r"));
                }
                data.instances.push(record);
            }
        }
        self
    }

    pub fn with_volumes(self, volumes: Vec<Value>) -> Self {
        lock(&self.data).volumes.extend(volumes);
        self
    }

    pub fn with_key_pairs(self, key_pairs: Vec<Value>) -> Self {
        lock(&self.data).key_pairs.extend(key_pairs);
        self
    }

    pub fn with_images(self, images: Vec<Value>) -> Self {
        lock(&self.data).images.extend(images);
        self
    }

    pub fn with_security_groups(self, groups: Vec<Value>) -> Self {
        lock(&self.data).security_groups.extend(groups);
        self
    }

    pub fn with_launch_templates(self, templates: Vec<Value>) -> Self {
        lock(&self.data).launch_templates.extend(templates);
        self
    }

    pub fn with_placement_groups(self, groups: Vec<Value>) -> Self {
        lock(&self.data).placement_groups.extend(groups);
        self
    }

    /// Make every call to `operation` (e.g. `"DescribeInstances"`) fail
    pub fn fail_on(&self, operation: &str) {
        lock(&self.failing).insert(operation.to_string());
    }

    pub fn recover(&self, operation: &str) {
        lock(&self.failing).remove(operation);
    }

    /// Operation names in call order
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        lock(&self.calls).iter().filter(|c| c.as_str() == operation).count()
    }

    /// Snapshot of the current records
    pub fn data(&self) -> MockData {
        lock(&self.data).clone()
    }

    pub fn instance_state(&self, instance_id: &str) -> Option<String> {
        lock(&self.data)
            .instances
            .iter()
            .find(|i| i["InstanceId"] == instance_id)
            .and_then(|i| i["State"]["Name"].as_str())
            .map(String::from)
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{:08x}", prefix, self.sequence.fetch_add(1, Ordering::SeqCst))
    }

    async fn call(&self, operation: &'static str) -> Result<()> {
        lock(&self.calls).push(operation.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if lock(&self.failing).contains(operation) {
            return Err(self.error(operation, "simulated service failure"));
        }
        Ok(())
    }

    fn error(&self, operation: &'static str, message: impl std::fmt::Display) -> GeoNetError {
        GeoNetError::transport(self.region.clone(), operation, message)
    }

    fn transition(&self, operation: &'static str, ids: &[String], target: &str) -> Result<Vec<Value>> {
        let mut data = lock(&self.data);

        let missing: Vec<&str> = ids
            .iter()
            .filter(|id| !data.instances.iter().any(|i| i["InstanceId"] == id.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(self.error(
                operation,
                format!("InvalidInstanceID.NotFound: {}", missing.join(", ")),
            ));
        }

        let mut changes = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = data.instances.iter_mut().find(|i| i["InstanceId"] == id.as_str()) {
                let previous = record["State"].clone();
                let current = if previous["Name"] == "terminated" {
                    previous.clone()
                } else {
                    state_record(target)
                };
                record["State"] = current.clone();
                changes.push(json!({
                    "InstanceId": id,
                    "PreviousState": previous,
                    "CurrentState": current,
                }));
            }
        }
        Ok(changes)
    }
}

fn select(records: &[Value], id_key: &str, req: &DescribeRequest) -> Vec<Value> {
    records
        .iter()
        .filter(|record| {
            req.ids.is_empty()
                || record
                    .get(id_key)
                    .and_then(Value::as_str)
                    .map(|id| req.ids.iter().any(|want| want == id))
                    .unwrap_or(false)
        })
        .filter(|record| req.filters.iter().all(|f| matches_filter(record, f)))
        .cloned()
        .collect()
}

fn matches_filter(record: &Value, filter: &Filter) -> bool {
    let value = if let Some(tag) = filter.name.strip_prefix("tag:") {
        record
            .get("Tags")
            .and_then(Value::as_array)
            .and_then(|tags| tags.iter().find(|t| t["Key"] == tag))
            .and_then(|t| t.get("Value"))
    } else {
        let path: &[&str] = match filter.name.as_str() {
            "owner-id" => &["OwnerId"],
            "group-name" => &["GroupName"],
            "group-id" => &["GroupId"],
            "instance-state-name" => &["State", "Name"],
            "launch-template-name" => &["LaunchTemplateName"],
            "key-name" => &["KeyName"],
            "name" => &["Name"],
            "state" => &["State"],
            "zone-name" => &["ZoneName"],
            _ => return true,
        };
        path.iter().try_fold(record, |v, key| v.get(key))
    };

    match value.and_then(Value::as_str) {
        Some(value) => filter.values.iter().any(|want| want == value),
        None => false,
    }
}

#[async_trait]
impl ComputeApi for MockCompute {
    fn region(&self) -> &str {
        &self.region
    }

    async fn describe_regions(&self) -> Result<Value> {
        self.call("DescribeRegions").await?;
        Ok(json!({ "Regions": lock(&self.data).regions.clone() }))
    }

    async fn describe_availability_zones(&self, req: &DescribeRequest) -> Result<Value> {
        self.call("DescribeAvailabilityZones").await?;
        Ok(json!({ "AvailabilityZones": select(&lock(&self.data).zones, "ZoneName", req) }))
    }

    async fn describe_instances(&self, req: &DescribeRequest) -> Result<Value> {
        self.call("DescribeInstances").await?;
        let instances = select(&lock(&self.data).instances, "InstanceId", req);

        let mut reservations: Vec<(String, Vec<Value>)> = Vec::new();
        for mut instance in instances {
            let reservation = instance
                .as_object_mut()
                .and_then(|record| record.shift_remove("ReservationId"))
                .and_then(|id| id.as_str().map(String::from))
                .unwrap_or_default();
            match reservations.iter_mut().find(|(id, _)| *id == reservation) {
                Some((_, group)) => group.push(instance),
                None => reservations.push((reservation, vec![instance])),
            }
        }

        let reservations: Vec<Value> = reservations
            .into_iter()
            .map(|(id, instances)| json!({"ReservationId": id, "Instances": instances}))
            .collect();
        Ok(json!({ "Reservations": reservations }))
    }

    async fn describe_instance_status(&self, instance_ids: &[String]) -> Result<Value> {
        self.call("DescribeInstanceStatus").await?;
        let data = lock(&self.data);
        let statuses: Vec<Value> = data
            .instances
            .iter()
            .filter(|i| instance_ids.iter().any(|id| i["InstanceId"] == id.as_str()))
            .filter(|i| i["State"]["Name"] == "running")
            .map(|i| {
                json!({
                    "InstanceId": i["InstanceId"],
                    "InstanceState": i["State"],
                    "InstanceStatus": {"Status": "ok"},
                    "SystemStatus": {"Status": "ok"},
                })
            })
            .collect();
        Ok(json!({ "InstanceStatuses": statuses }))
    }

    async fn describe_volumes(&self, req: &DescribeRequest) -> Result<Value> {
        self.call("DescribeVolumes").await?;
        Ok(json!({ "Volumes": select(&lock(&self.data).volumes, "VolumeId", req) }))
    }

    async fn describe_key_pairs(&self, req: &DescribeRequest) -> Result<Value> {
        self.call("DescribeKeyPairs").await?;
        Ok(json!({ "KeyPairs": select(&lock(&self.data).key_pairs, "KeyName", req) }))
    }

    async fn describe_launch_templates(&self, req: &DescribeRequest) -> Result<Value> {
        self.call("DescribeLaunchTemplates").await?;
        Ok(json!({ "LaunchTemplates": select(&lock(&self.data).launch_templates, "LaunchTemplateId", req) }))
    }

    async fn describe_images(&self, req: &DescribeRequest) -> Result<Value> {
        self.call("DescribeImages").await?;
        Ok(json!({ "Images": select(&lock(&self.data).images, "ImageId", req) }))
    }

    async fn describe_security_groups(&self, req: &DescribeRequest) -> Result<Value> {
        self.call("DescribeSecurityGroups").await?;
        Ok(json!({ "SecurityGroups": select(&lock(&self.data).security_groups, "GroupId", req) }))
    }

    async fn describe_placement_groups(&self, req: &DescribeRequest) -> Result<Value> {
        self.call("DescribePlacementGroups").await?;
        Ok(json!({ "PlacementGroups": select(&lock(&self.data).placement_groups, "GroupName", req) }))
    }

    async fn start_instances(&self, instance_ids: &[String]) -> Result<Value> {
        self.call("StartInstances").await?;
        let changes = self.transition("StartInstances", instance_ids, "running")?;
        Ok(json!({ "StartingInstances": changes }))
    }

    async fn stop_instances(&self, instance_ids: &[String]) -> Result<Value> {
        self.call("StopInstances").await?;
        let changes = self.transition("StopInstances", instance_ids, "stopped")?;
        Ok(json!({ "StoppingInstances": changes }))
    }

    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<Value> {
        self.call("TerminateInstances").await?;
        let changes = self.transition("TerminateInstances", instance_ids, "terminated")?;
        Ok(json!({ "TerminatingInstances": changes }))
    }

    async fn create_security_group(&self, name: &str, description: &str) -> Result<String> {
        self.call("CreateSecurityGroup").await?;
        let mut data = lock(&self.data);
        if data.security_groups.iter().any(|g| g["GroupName"] == name) {
            return Err(self.error(
                "CreateSecurityGroup",
                format!("InvalidGroup.Duplicate: the security group '{}' already exists", name),
            ));
        }

        let group_id = self.next_id("sg");
        data.security_groups.push(json!({
            "GroupId": group_id,
            "GroupName": name,
            "Description": description,
            "IpPermissions": [],
        }));
        Ok(group_id)
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<()> {
        self.call("DeleteSecurityGroup").await?;
        let mut data = lock(&self.data);
        let before = data.security_groups.len();
        data.security_groups.retain(|g| g["GroupId"] != group_id);
        if data.security_groups.len() == before {
            return Err(self.error(
                "DeleteSecurityGroup",
                format!("InvalidGroup.NotFound: {}", group_id),
            ));
        }
        Ok(())
    }

    async fn authorize_ingress(&self, group_id: &str, rules: &[IngressRule]) -> Result<()> {
        self.call("AuthorizeSecurityGroupIngress").await?;
        let mut data = lock(&self.data);
        let group = data
            .security_groups
            .iter_mut()
            .find(|g| g["GroupId"] == group_id)
            .ok_or_else(|| {
                self.error("AuthorizeSecurityGroupIngress", format!("InvalidGroup.NotFound: {}", group_id))
            })?;

        let permissions = group["IpPermissions"]
            .as_array_mut()
            .ok_or_else(|| self.error("AuthorizeSecurityGroupIngress", "malformed group"))?;
        for rule in rules {
            let perm = rule.to_permission();
            if permissions.contains(&perm) {
                return Err(self.error(
                    "AuthorizeSecurityGroupIngress",
                    "InvalidPermission.Duplicate: the specified rule already exists",
                ));
            }
            permissions.push(perm);
        }
        Ok(())
    }

    async fn revoke_ingress(&self, group_id: &str, rules: &[IngressRule]) -> Result<()> {
        self.call("RevokeSecurityGroupIngress").await?;
        let mut data = lock(&self.data);
        let group = data
            .security_groups
            .iter_mut()
            .find(|g| g["GroupId"] == group_id)
            .ok_or_else(|| {
                self.error("RevokeSecurityGroupIngress", format!("InvalidGroup.NotFound: {}", group_id))
            })?;

        let permissions = group["IpPermissions"]
            .as_array_mut()
            .ok_or_else(|| self.error("RevokeSecurityGroupIngress", "malformed group"))?;
        for rule in rules {
            let perm = rule.to_permission();
            let position = permissions.iter().position(|p| *p == perm).ok_or_else(|| {
                self.error(
                    "RevokeSecurityGroupIngress",
                    "InvalidPermission.NotFound: the specified rule does not exist",
                )
            })?;
            permissions.remove(position);
        }
        Ok(())
    }

    async fn create_launch_template(&self, name: &str, data: &LaunchTemplateData) -> Result<Value> {
        self.call("CreateLaunchTemplate").await?;
        let mut state = lock(&self.data);
        if state.launch_templates.iter().any(|t| t["LaunchTemplateName"] == name) {
            return Err(self.error(
                "CreateLaunchTemplate",
                format!("InvalidLaunchTemplateName.AlreadyExistsException: {}", name),
            ));
        }

        let template_id = self.next_id("lt");
        let record = json!({
            "LaunchTemplateId": template_id,
            "LaunchTemplateName": name,
            "CreateTime": encode_utc(&utcnow()),
            "DefaultVersionNumber": 1,
            "LatestVersionNumber": 1,
        });
        state.launch_templates.push(record.clone());
        state
            .template_versions
            .entry(template_id)
            .or_default()
            .insert(1, serde_json::to_value(data)?);
        Ok(record)
    }

    async fn create_launch_template_version(&self, template_id: &str, data: &LaunchTemplateData) -> Result<i64> {
        self.call("CreateLaunchTemplateVersion").await?;
        let mut state = lock(&self.data);
        let payload = serde_json::to_value(data)?;

        let template = state
            .launch_templates
            .iter_mut()
            .find(|t| t["LaunchTemplateId"] == template_id)
            .ok_or_else(|| {
                self.error("CreateLaunchTemplateVersion", format!("InvalidLaunchTemplateId.NotFound: {}", template_id))
            })?;
        let version = template["LatestVersionNumber"].as_i64().unwrap_or(0) + 1;
        template["LatestVersionNumber"] = json!(version);

        state
            .template_versions
            .entry(template_id.to_string())
            .or_default()
            .insert(version, payload);
        Ok(version)
    }

    async fn modify_default_version(&self, template_id: &str, version: i64) -> Result<()> {
        self.call("ModifyLaunchTemplate").await?;
        let mut state = lock(&self.data);
        let exists = state
            .template_versions
            .get(template_id)
            .map(|versions| versions.contains_key(&version))
            .unwrap_or(false);
        if !exists {
            return Err(self.error(
                "ModifyLaunchTemplate",
                format!("InvalidLaunchTemplateVersion: {} has no version {}", template_id, version),
            ));
        }

        if let Some(template) = state
            .launch_templates
            .iter_mut()
            .find(|t| t["LaunchTemplateId"] == template_id)
        {
            template["DefaultVersionNumber"] = json!(version);
        }
        Ok(())
    }

    async fn delete_launch_template_versions(&self, template_id: &str, versions: &[i64]) -> Result<()> {
        self.call("DeleteLaunchTemplateVersions").await?;
        let mut state = lock(&self.data);
        let default = state
            .launch_templates
            .iter()
            .find(|t| t["LaunchTemplateId"] == template_id)
            .and_then(|t| t["DefaultVersionNumber"].as_i64())
            .ok_or_else(|| {
                self.error("DeleteLaunchTemplateVersions", format!("InvalidLaunchTemplateId.NotFound: {}", template_id))
            })?;
        if versions.contains(&default) {
            return Err(self.error(
                "DeleteLaunchTemplateVersions",
                format!("cannot delete the default version {}", default),
            ));
        }

        let remaining = {
            let stored = state.template_versions.entry(template_id.to_string()).or_default();
            for version in versions {
                stored.remove(version);
            }
            stored.keys().next_back().copied().unwrap_or(default)
        };
        if let Some(template) = state
            .launch_templates
            .iter_mut()
            .find(|t| t["LaunchTemplateId"] == template_id)
        {
            template["LatestVersionNumber"] = json!(remaining);
        }
        Ok(())
    }
}

/// Hands out [`MockCompute`] clients by region code
#[derive(Default)]
pub struct MockConnector {
    regions: BTreeMap<String, Arc<MockCompute>>,
    connect_failures: Mutex<HashMap<String, u32>>,
    connect_attempts: Mutex<HashMap<String, u32>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_region(mut self, compute: MockCompute) -> Self {
        self.regions.insert(compute.region.clone(), Arc::new(compute));
        self
    }

    /// Empty mock regions for each code
    pub fn with_regions<I, S>(self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        codes
            .into_iter()
            .fold(self, |connector, code| connector.with_region(MockCompute::new(code)))
    }

    pub fn region(&self, code: &str) -> Option<Arc<MockCompute>> {
        self.regions.get(code).cloned()
    }

    /// Fail the next `count` connection attempts to `region`
    pub fn fail_connects(&self, region: &str, count: u32) {
        lock(&self.connect_failures).insert(region.to_string(), count);
    }

    pub fn connect_attempts(&self, region: &str) -> u32 {
        lock(&self.connect_attempts).get(region).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, region: &str) -> Result<Arc<dyn ComputeApi>> {
        *lock(&self.connect_attempts).entry(region.to_string()).or_default() += 1;

        {
            let mut failures = lock(&self.connect_failures);
            if let Some(remaining) = failures.get_mut(region) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(GeoNetError::transport(region, "Connect", "connection refused"));
                }
            }
        }

        match self.regions.get(region) {
            Some(compute) => Ok(compute.clone() as Arc<dyn ComputeApi>),
            None => Err(GeoNetError::transport(region, "Connect", "unknown region endpoint")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_describe_instances_groups_reservations() {
        let compute = MockCompute::new("us-east-1").with_instances(vec![
            json!({"InstanceId": "i-1", "State": {"Name": "running"}, "ReservationId": "r-1"}),
            json!({"InstanceId": "i-2", "State": {"Name": "running"}, "ReservationId": "r-1"}),
            instance("i-3", "stopped"),
        ]);

        let resp = compute.describe_instances(&DescribeRequest::new()).await.unwrap();
        let reservations = resp["Reservations"].as_array().unwrap();
        assert_eq!(reservations.len(), 2);
        assert_eq!(reservations[0]["Instances"].as_array().unwrap().len(), 2);
        assert!(reservations[0]["Instances"][0].get("ReservationId").is_none());

        let req = DescribeRequest::new().filter("instance-state-name", ["stopped"]);
        let resp = compute.describe_instances(&req).await.unwrap();
        assert_eq!(resp["Reservations"][0]["Instances"][0]["InstanceId"], "i-3");
    }

    #[tokio::test]
    async fn test_transitions_and_unknown_ids() {
        let compute = MockCompute::new("us-west-2").with_instances(vec![instance("i-1", "running")]);

        let resp = compute.stop_instances(&["i-1".to_string()]).await.unwrap();
        assert_eq!(resp["StoppingInstances"][0]["PreviousState"]["Name"], "running");
        assert_eq!(compute.instance_state("i-1").as_deref(), Some("stopped"));

        let err = compute.terminate_instances(&["i-9".to_string()]).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(compute.instance_state("i-1").as_deref(), Some("stopped"));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let compute = MockCompute::new("eu-west-1");
        compute.fail_on("DescribeVolumes");
        assert!(compute.describe_volumes(&DescribeRequest::new()).await.is_err());
        compute.recover("DescribeVolumes");
        assert!(compute.describe_volumes(&DescribeRequest::new()).await.is_ok());
        assert_eq!(compute.call_count("DescribeVolumes"), 2);
    }

    #[tokio::test]
    async fn test_connector_failures_then_success() {
        let connector = MockConnector::new().with_regions(["us-east-1"]);
        connector.fail_connects("us-east-1", 2);

        assert!(connector.connect("us-east-1").await.is_err());
        assert!(connector.connect("us-east-1").await.is_err());
        let api = connector.connect("us-east-1").await.unwrap();
        assert_eq!(api.region(), "us-east-1");
        assert_eq!(connector.connect_attempts("us-east-1"), 3);

        assert!(connector.connect("mars-1").await.is_err());
    }
}
