//! EC2 resource kinds
//!
//! Each kind wraps one record shape returned by the EC2 API. Typed accessors
//! live in `impl Resource<XKind>` blocks; derived queries over many records
//! live in `impl Collection<XKind>` blocks.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::debug;

use crate::collection::Collection;
use crate::error::{GeoNetError, Result};
use crate::resource::{Kind, Resource};
use crate::timez::{humanize_duration, parse_utc, utcnow};
use crate::utils::ssh_dir;

/// Name prefix identifying this deployment's own resources
pub const ALIA_PREFIX: &str = "alia";

/// CIDR considered "open to the world"
pub const OPEN_CIDR: &str = "0.0.0.0/0";

// ============== Instances ==============

/// Instance lifecycle state as reported under `State.Name`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Pending => "pending",
            InstanceState::Running => "running",
            InstanceState::ShuttingDown => "shutting-down",
            InstanceState::Terminated => "terminated",
            InstanceState::Stopping => "stopping",
            InstanceState::Stopped => "stopped",
        }
    }

    pub fn all() -> &'static [InstanceState] {
        &[
            InstanceState::Pending,
            InstanceState::Running,
            InstanceState::ShuttingDown,
            InstanceState::Terminated,
            InstanceState::Stopping,
            InstanceState::Stopped,
        ]
    }
}

impl FromStr for InstanceState {
    type Err = GeoNetError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(InstanceState::Pending),
            "running" => Ok(InstanceState::Running),
            "shutting-down" => Ok(InstanceState::ShuttingDown),
            "terminated" => Ok(InstanceState::Terminated),
            "stopping" => Ok(InstanceState::Stopping),
            "stopped" => Ok(InstanceState::Stopped),
            _ => Err(GeoNetError::Validation(format!("unknown instance state '{}'", s))),
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct InstanceKind;

impl Kind for InstanceKind {
    const NAME: &'static str = "Instance";
    const REQUIRED_KEYS: &'static [&'static str] = &["InstanceId", "State"];
    const EXTRA_KEYS: &'static [&'static str] = &["Tags"];

    fn extra_default() -> Value {
        json!([])
    }

    fn identify(resource: &Resource<Self>) -> String {
        resource.instance_id().to_string()
    }

    fn attribute(resource: &Resource<Self>, name: &str) -> Option<Value> {
        match name {
            "name" => Some(Value::String(resource.name())),
            "state" => Some(Value::String(resource.state_name().to_string())),
            "vm_type" => resource.vm_type().map(|t| json!(t)),
            "ipaddr" => resource.ipaddr().map(|ip| json!(ip)),
            _ => None,
        }
    }
}

pub type Instance = Resource<InstanceKind>;
pub type Instances = Collection<InstanceKind>;

impl Resource<InstanceKind> {
    pub fn instance_id(&self) -> &str {
        self.get_str("InstanceId").unwrap_or_default()
    }

    /// Raw state name from `State.Name`
    pub fn state_name(&self) -> &str {
        self.get("State")
            .and_then(|state| state.get("Name"))
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn state(&self) -> Option<InstanceState> {
        self.state_name().parse().ok()
    }

    /// Name tag, else the first of the public/private DNS names and addresses
    pub fn name(&self) -> String {
        if let Some(name) = self.tag("Name") {
            return name.to_string();
        }

        ["PublicDnsName", "PublicIpAddress", "PrivateDnsName", "PrivateIpAddress"]
            .iter()
            .filter_map(|key| self.get_str(key))
            .find(|value| !value.is_empty())
            .unwrap_or_default()
            .to_string()
    }

    pub fn vm_type(&self) -> Option<&str> {
        self.get_str("InstanceType")
    }

    pub fn ipaddr(&self) -> Option<&str> {
        self.first_present(&["PublicIpAddress", "PrivateIpAddress"])
    }

    pub fn hostname(&self) -> Option<&str> {
        self.first_present(&["PublicDnsName", "PrivateDnsName"])
    }

    pub fn launch_time(&self) -> Option<DateTime<Utc>> {
        self.get_str("LaunchTime").and_then(|ts| parse_utc(ts).ok())
    }

    /// Time since launch, for running instances only
    pub fn uptime(&self) -> Option<String> {
        self.uptime_at(utcnow())
    }

    pub fn uptime_at(&self, now: DateTime<Utc>) -> Option<String> {
        if self.state() != Some(InstanceState::Running) {
            return None;
        }
        let launched = self.launch_time()?;
        Some(humanize_duration((now - launched).num_seconds()))
    }

    /// Status record attached by [`Collection::update_statuses`]
    pub fn status(&self) -> Option<&Value> {
        self.attr("status").filter(|status| !status.is_null())
    }

    fn first_present(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|key| self.get_str(key))
            .find(|value| !value.is_empty())
    }
}

impl Collection<InstanceKind> {
    /// Group instances by their state name
    pub fn states(&self) -> BTreeMap<String, Vec<&Instance>> {
        let mut grouped: BTreeMap<String, Vec<&Instance>> = BTreeMap::new();
        for instance in self {
            grouped
                .entry(instance.state_name().to_string())
                .or_default()
                .push(instance);
        }
        grouped
    }

    /// Instances whose state is in `states`, in collection order
    pub fn with_states<'a>(
        &'a self,
        states: &'a [InstanceState],
    ) -> impl Iterator<Item = &'a Instance> + 'a {
        self.iter()
            .filter(move |instance| matches!(instance.state(), Some(s) if states.contains(&s)))
    }

    pub fn running(&self) -> impl Iterator<Item = &Instance> + '_ {
        self.with_states(&[InstanceState::Running])
    }

    /// Attach instance status records as the transient `status` attribute.
    ///
    /// Issues one status call to the collection's region; instances that
    /// report no status are left untouched.
    pub async fn update_statuses(&mut self) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }

        let region = self.region().and_then(|r| r.upgrade()).ok_or_else(|| {
            GeoNetError::Validation("cannot update status with no region connection".to_string())
        })?;

        let api = region.conn().await?;
        let resp = api.describe_instance_status(&self.ids()).await?;
        let statuses = resp
            .get("InstanceStatuses")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        debug!(region = %region.code(), count = statuses.len(), "Updating instance statuses");

        for status in statuses {
            let id = status
                .get("InstanceId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if let Ok(instance) = self.lookup_mut(&id) {
                instance.set_attr("status", status);
            }
        }
        Ok(())
    }
}

// ============== State changes ==============

/// Before/after state report produced by start, stop and terminate calls
pub struct StateChangeKind;

impl Kind for StateChangeKind {
    const NAME: &'static str = "StateChange";
    const REQUIRED_KEYS: &'static [&'static str] = &["CurrentState", "PreviousState", "InstanceId"];

    fn identify(resource: &Resource<Self>) -> String {
        resource.get_str("InstanceId").unwrap_or_default().to_string()
    }
}

pub type StateChange = Resource<StateChangeKind>;
pub type StateChanges = Collection<StateChangeKind>;

impl Resource<StateChangeKind> {
    pub fn instance_id(&self) -> &str {
        self.get_str("InstanceId").unwrap_or_default()
    }

    pub fn previous(&self) -> &str {
        state_field(self.get("PreviousState"))
    }

    pub fn current(&self) -> &str {
        state_field(self.get("CurrentState"))
    }
}

impl Collection<StateChangeKind> {
    /// Instance ids whose current state matches `state`
    pub fn with_current(&self, state: InstanceState) -> Vec<String> {
        self.iter()
            .filter(|change| change.current() == state.as_str())
            .map(|change| change.instance_id().to_string())
            .collect()
    }
}

fn state_field(state: Option<&Value>) -> &str {
    state
        .and_then(|s| s.get("Name"))
        .and_then(Value::as_str)
        .unwrap_or_default()
}

// ============== Volumes ==============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeState {
    Creating,
    Available,
    InUse,
    Deleting,
    Deleted,
    Error,
}

impl VolumeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeState::Creating => "creating",
            VolumeState::Available => "available",
            VolumeState::InUse => "in-use",
            VolumeState::Deleting => "deleting",
            VolumeState::Deleted => "deleted",
            VolumeState::Error => "error",
        }
    }
}

impl FromStr for VolumeState {
    type Err = GeoNetError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "creating" => Ok(VolumeState::Creating),
            "available" => Ok(VolumeState::Available),
            "in-use" => Ok(VolumeState::InUse),
            "deleting" => Ok(VolumeState::Deleting),
            "deleted" => Ok(VolumeState::Deleted),
            "error" => Ok(VolumeState::Error),
            _ => Err(GeoNetError::Validation(format!("unknown volume state '{}'", s))),
        }
    }
}

impl fmt::Display for VolumeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct VolumeKind;

impl Kind for VolumeKind {
    const NAME: &'static str = "Volume";

    fn identify(resource: &Resource<Self>) -> String {
        resource.get_str("VolumeId").unwrap_or_default().to_string()
    }

    fn attribute(resource: &Resource<Self>, name: &str) -> Option<Value> {
        match name {
            "state" => resource.get("State").cloned(),
            "size" => resource.size().map(Value::from),
            _ => None,
        }
    }
}

pub type Volume = Resource<VolumeKind>;
pub type Volumes = Collection<VolumeKind>;

impl Resource<VolumeKind> {
    pub fn volume_id(&self) -> &str {
        self.get_str("VolumeId").unwrap_or_default()
    }

    pub fn state(&self) -> Option<VolumeState> {
        self.get_str("State").and_then(|state| state.parse().ok())
    }

    /// Size in GiB
    pub fn size(&self) -> Option<i64> {
        self.get_i64("Size")
    }

    /// Instance ids this volume is attached (or attaching) to
    pub fn attached_to(&self) -> Vec<&str> {
        self.get("Attachments")
            .and_then(Value::as_array)
            .map(|attachments| {
                attachments
                    .iter()
                    .filter(|a| {
                        matches!(a.get("State").and_then(Value::as_str), Some("attached" | "attaching"))
                    })
                    .filter_map(|a| a.get("InstanceId").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default()
    }
}

// ============== Key pairs ==============

pub struct KeyPairKind;

impl Kind for KeyPairKind {
    const NAME: &'static str = "KeyPair";
    const REQUIRED_KEYS: &'static [&'static str] = &["KeyName", "KeyFingerprint"];

    fn identify(resource: &Resource<Self>) -> String {
        resource.name().to_string()
    }
}

pub type KeyPair = Resource<KeyPairKind>;
pub type KeyPairs = Collection<KeyPairKind>;

impl Resource<KeyPairKind> {
    pub fn name(&self) -> &str {
        self.get_str("KeyName").unwrap_or_default()
    }

    pub fn fingerprint(&self) -> &str {
        self.get_str("KeyFingerprint").unwrap_or_default()
    }

    /// Expected location of the private key, `<sshdir>/<name>.pem`
    pub fn local_path(&self, sshdir: Option<&Path>) -> PathBuf {
        let dir = sshdir.map(Path::to_path_buf).unwrap_or_else(ssh_dir);
        dir.join(format!("{}.pem", self.name()))
    }

    /// True if the private key exists locally with mode 0600
    pub fn has_valid_key(&self, sshdir: Option<&Path>) -> bool {
        let path = self.local_path(sshdir);
        match std::fs::metadata(&path) {
            Ok(meta) => is_owner_only(&meta),
            Err(_) => false,
        }
    }
}

#[cfg(unix)]
fn is_owner_only(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o777 == 0o600
}

#[cfg(not(unix))]
fn is_owner_only(meta: &std::fs::Metadata) -> bool {
    meta.is_file()
}

impl Collection<KeyPairKind> {
    pub fn get_alia_keys(&self) -> Vec<&KeyPair> {
        self.iter().filter(|key| key.name().starts_with(ALIA_PREFIX)).collect()
    }
}

// ============== Launch templates ==============

pub struct LaunchTemplateKind;

impl Kind for LaunchTemplateKind {
    const NAME: &'static str = "LaunchTemplate";

    fn identify(resource: &Resource<Self>) -> String {
        resource.template_id().to_string()
    }
}

pub type LaunchTemplate = Resource<LaunchTemplateKind>;
pub type LaunchTemplates = Collection<LaunchTemplateKind>;

impl Resource<LaunchTemplateKind> {
    pub fn template_id(&self) -> &str {
        self.get_str("LaunchTemplateId").unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.get_str("LaunchTemplateName").unwrap_or_default()
    }

    pub fn latest_version(&self) -> Option<i64> {
        self.get_i64("LatestVersionNumber")
    }

    pub fn default_version(&self) -> Option<i64> {
        self.get_i64("DefaultVersionNumber")
    }

    pub fn create_time(&self) -> Option<DateTime<Utc>> {
        self.get_str("CreateTime").and_then(|ts| parse_utc(ts).ok())
    }
}

impl Collection<LaunchTemplateKind> {
    /// The template named by convention in the given region
    pub fn get_alia_template(&self, region: &str) -> Option<&LaunchTemplate> {
        self.iter()
            .find(|t| t.name() == ALIA_PREFIX && t.region_code() == Some(region))
    }

    /// Newest first by creation time
    pub fn sort_latest(&mut self) -> &mut Self {
        self.sort_by(|a, b| b.create_time().cmp(&a.create_time()));
        self
    }
}

// ============== Images ==============

pub struct ImageKind;

impl Kind for ImageKind {
    const NAME: &'static str = "Image";
    const REQUIRED_KEYS: &'static [&'static str] = &["ImageId", "BlockDeviceMappings", "CreationDate"];

    fn identify(resource: &Resource<Self>) -> String {
        resource.image_id().to_string()
    }

    fn attribute(resource: &Resource<Self>, name: &str) -> Option<Value> {
        match name {
            "name" => Some(json!(resource.name())),
            "size" => resource.size().map(Value::from),
            "created" => resource.created().ok().map(|ts| json!(ts.timestamp())),
            _ => None,
        }
    }
}

pub type Image = Resource<ImageKind>;
pub type Images = Collection<ImageKind>;

impl Resource<ImageKind> {
    pub fn image_id(&self) -> &str {
        self.get_str("ImageId").unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.get_str("Name").unwrap_or_default()
    }

    fn root_ebs(&self) -> Option<&Value> {
        self.get("BlockDeviceMappings")?.get(0)?.get("Ebs")
    }

    /// Root volume size in GiB
    pub fn size(&self) -> Option<i64> {
        self.root_ebs()?.get("VolumeSize")?.as_i64()
    }

    /// Root volume type, e.g. `gp2`
    pub fn disk(&self) -> Option<&str> {
        self.root_ebs()?.get("VolumeType")?.as_str()
    }

    pub fn created(&self) -> Result<DateTime<Utc>> {
        parse_utc(self.get_str("CreationDate").unwrap_or_default())
    }
}

impl Collection<ImageKind> {
    /// Newest first; images with unparseable dates sort last
    pub fn sort_latest(&mut self) -> &mut Self {
        self.sort_by(|a, b| b.created().ok().cmp(&a.created().ok()));
        self
    }

    pub fn get_alia_images(&self) -> Vec<&Image> {
        self.iter().filter(|image| image.name().starts_with(ALIA_PREFIX)).collect()
    }
}

// ============== Security groups ==============

/// A port or port range open to the world
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenPort {
    Single(i64),
    Range(i64, i64),
}

impl fmt::Display for OpenPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenPort::Single(port) => write!(f, "{}", port),
            OpenPort::Range(from, to) => write!(f, "{}-{}", from, to),
        }
    }
}

pub struct SecurityGroupKind;

impl Kind for SecurityGroupKind {
    const NAME: &'static str = "SecurityGroup";
    const REQUIRED_KEYS: &'static [&'static str] = &["GroupId", "GroupName", "IpPermissions"];

    fn identify(resource: &Resource<Self>) -> String {
        resource.group_id().to_string()
    }

    fn attribute(resource: &Resource<Self>, name: &str) -> Option<Value> {
        match name {
            "name" => Some(json!(resource.name())),
            _ => None,
        }
    }
}

pub type SecurityGroup = Resource<SecurityGroupKind>;
pub type SecurityGroups = Collection<SecurityGroupKind>;

impl Resource<SecurityGroupKind> {
    pub fn group_id(&self) -> &str {
        self.get_str("GroupId").unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.get_str("GroupName").unwrap_or_default()
    }

    /// Ingress permissions with an IPv4 range of 0.0.0.0/0
    pub fn open_ip_permissions(&self) -> Vec<&Value> {
        let permissions = match self.get("IpPermissions").and_then(Value::as_array) {
            Some(permissions) => permissions,
            None => return Vec::new(),
        };

        permissions
            .iter()
            .filter(|perm| {
                perm.get("IpRanges")
                    .and_then(Value::as_array)
                    .map(|ranges| {
                        ranges
                            .iter()
                            .any(|r| r.get("CidrIp").and_then(Value::as_str) == Some(OPEN_CIDR))
                    })
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn open_ports(&self) -> Vec<OpenPort> {
        self.open_ip_permissions()
            .into_iter()
            .filter_map(|perm| {
                let from = perm.get("FromPort")?.as_i64()?;
                let to = perm.get("ToPort")?.as_i64()?;
                Some(if from == to {
                    OpenPort::Single(from)
                } else {
                    OpenPort::Range(from, to)
                })
            })
            .collect()
    }
}

impl Collection<SecurityGroupKind> {
    pub fn get_alia_groups(&self) -> Vec<&SecurityGroup> {
        self.iter().filter(|group| group.name().starts_with(ALIA_PREFIX)).collect()
    }
}

// ============== Placement groups ==============

pub struct PlacementGroupKind;

impl Kind for PlacementGroupKind {
    const NAME: &'static str = "PlacementGroup";
    const REQUIRED_KEYS: &'static [&'static str] = &["GroupName"];

    fn identify(resource: &Resource<Self>) -> String {
        resource.name().to_string()
    }
}

pub type PlacementGroup = Resource<PlacementGroupKind>;
pub type PlacementGroups = Collection<PlacementGroupKind>;

impl Resource<PlacementGroupKind> {
    pub fn name(&self) -> &str {
        self.get_str("GroupName").unwrap_or_default()
    }

    /// `cluster`, `spread` or `partition`
    pub fn strategy(&self) -> Option<&str> {
        self.get_str("Strategy")
    }

    pub fn state(&self) -> Option<&str> {
        self.get_str("State")
    }
}
