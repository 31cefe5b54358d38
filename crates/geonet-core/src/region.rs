//! Region registry
//!
//! A [`Region`] is a region record plus a lazily opened, retried connection
//! to that region's compute API. [`Regions`] is the ordered registry loaded
//! from disk (or synthesized from configuration) and the entry point for
//! every multi-region fan-out.
//!
//! Connection lifecycle per region:
//!
//! ```text
//! unconfigured --conn()--> connecting --ok--> connected (cached for the region's lifetime)
//!                               |
//!                               +--err, attempts left--> backoff --> connecting
//!                               +--err, budget spent---> failed (next conn() starts over)
//! ```
//!
//! The connection state sits behind an async mutex that doubles as the
//! per-region initialization lock, so concurrent tasks never open duplicate
//! connections.

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::collection::{compare_values, Collection};
use crate::compute::{ComputeApi, Connector, DescribeRequest};
use crate::config::AppConfig;
use crate::ec2::{
    Images, Instances, KeyPairs, LaunchTemplates, PlacementGroups, SecurityGroups, StateChanges,
    Volumes,
};
use crate::error::{GeoNetError, Result};
use crate::resource::{json_type, Kind, Record, RegionRef, Resource};
use crate::serialize::{read_json, utc_timestamp, write_json};
use crate::timez::utcnow;
use crate::wait::wait;
use crate::zone::AvailabilityZones;

/// Shared process context: configuration and the connection factory
#[derive(Clone)]
pub struct Context {
    config: Arc<AppConfig>,
    connector: Arc<dyn Connector>,
}

impl Context {
    pub fn new(config: Arc<AppConfig>, connector: Arc<dyn Connector>) -> Self {
        Self { config, connector }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("regions", &self.config.regions())
            .finish_non_exhaustive()
    }
}

pub struct RegionKind;

impl Kind for RegionKind {
    const NAME: &'static str = "Region";
    const REQUIRED_KEYS: &'static [&'static str] = &["RegionName"];
    const EXTRA_KEYS: &'static [&'static str] = &["LocaleName"];

    fn identify(resource: &Resource<Self>) -> String {
        resource.get_str("RegionName").unwrap_or_default().to_string()
    }
}

enum ConnectionState {
    Unconfigured,
    Connected(Arc<dyn ComputeApi>),
    Failed { attempts: u32, error: String },
}

/// Observable connection state of a region
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Unconfigured,
    Connected,
    Failed { attempts: u32, error: String },
}

pub struct Region {
    record: Resource<RegionKind>,
    ctx: Context,
    connection: Mutex<ConnectionState>,
}

impl Region {
    /// Build a region from a raw region record
    pub fn new(data: Value, ctx: Context) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            record: Resource::new(data, None)?,
            ctx,
            connection: Mutex::new(ConnectionState::Unconfigured),
        }))
    }

    /// Sparse region known only by its code
    pub fn from_code(code: &str, ctx: Context) -> Result<Arc<Self>> {
        Self::new(json!({ "RegionName": code }), ctx)
    }

    pub fn code(&self) -> &str {
        self.record.get_str("RegionName").unwrap_or_default()
    }

    pub fn locale_name(&self) -> Option<&str> {
        self.record.get_str("LocaleName").filter(|name| !name.is_empty())
    }

    /// Human readable locale; synthesized from the code when none is stored
    /// (`us-east-1` becomes `US East 1`)
    pub fn locale(&self) -> String {
        if let Some(name) = self.locale_name() {
            return name.to_string();
        }

        self.code()
            .split('-')
            .enumerate()
            .map(|(i, part)| match i {
                0 => part.to_uppercase(),
                1 => title_case(part),
                _ => part.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Locale name if stored, else the code
    pub fn name(&self) -> &str {
        self.locale_name().unwrap_or_else(|| self.code())
    }

    pub fn record(&self) -> &Resource<RegionKind> {
        &self.record
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// True if the region code is in the configured region list
    pub fn is_configured(&self) -> bool {
        self.ctx.config.is_configured(self.code())
    }

    pub async fn status(&self) -> ConnectionStatus {
        match &*self.connection.lock().await {
            ConnectionState::Unconfigured => ConnectionStatus::Unconfigured,
            ConnectionState::Connected(_) => ConnectionStatus::Connected,
            ConnectionState::Failed { attempts, error } => ConnectionStatus::Failed {
                attempts: *attempts,
                error: error.clone(),
            },
        }
    }

    /// The region's compute client, connecting on first use.
    ///
    /// Connection attempts are retried with exponential backoff up to the
    /// configured budget; the last error is returned once it is spent.
    pub async fn conn(&self) -> Result<Arc<dyn ComputeApi>> {
        let mut state = self.connection.lock().await;
        if let ConnectionState::Connected(api) = &*state {
            return Ok(api.clone());
        }

        let policy = self.ctx.config.connection();
        let budget = policy.attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.ctx.connector.connect(self.code()).await {
                Ok(api) => {
                    debug!(region = %self.code(), attempt, "Connected");
                    *state = ConnectionState::Connected(api.clone());
                    return Ok(api);
                }
                Err(err) if attempt < budget => {
                    let delay = policy.backoff(attempt);
                    warn!(
                        region = %self.code(),
                        attempt,
                        error = %err,
                        "Connection failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    warn!(region = %self.code(), attempts = attempt, error = %err, "Giving up on connection");
                    *state = ConnectionState::Failed {
                        attempts: attempt,
                        error: err.to_string(),
                    };
                    return Err(err);
                }
            }
        }
    }

    /// Plain copy of the region record
    pub fn serialize_map(&self) -> Record {
        self.record.serialize_map()
    }

    fn wrap<K: Kind>(
        self: &Arc<Self>,
        resp: Value,
        key: &str,
        operation: &'static str,
    ) -> Result<Collection<K>> {
        let rows = take_list(resp, key, self.code(), operation)?;
        Collection::new(Value::Array(rows), Some(RegionRef::new(self)))
    }

    pub async fn zones(self: &Arc<Self>, req: &DescribeRequest) -> Result<AvailabilityZones> {
        let resp = self.conn().await?.describe_availability_zones(req).await?;
        self.wrap(resp, "AvailabilityZones", "DescribeAvailabilityZones")
    }

    /// Instances flattened out of their reservations; each record gains the
    /// `ReservationId` it was launched under
    pub async fn instances(self: &Arc<Self>, req: &DescribeRequest) -> Result<Instances> {
        let resp = self.conn().await?.describe_instances(req).await?;

        let mut rows = Vec::new();
        for reservation in take_list(resp, "Reservations", self.code(), "DescribeInstances")? {
            let reservation_id = reservation.get("ReservationId").cloned().unwrap_or(Value::Null);
            let instances = match reservation {
                Value::Object(mut record) => record.shift_remove("Instances"),
                _ => None,
            };
            for mut instance in instances.and_then(into_array).unwrap_or_default() {
                if let Some(record) = instance.as_object_mut() {
                    record.insert("ReservationId".to_string(), reservation_id.clone());
                }
                rows.push(instance);
            }
        }

        debug!(region = %self.code(), count = rows.len(), "Described instances");
        Instances::new(Value::Array(rows), Some(RegionRef::new(self)))
    }

    pub async fn volumes(self: &Arc<Self>, req: &DescribeRequest) -> Result<Volumes> {
        let resp = self.conn().await?.describe_volumes(req).await?;
        self.wrap(resp, "Volumes", "DescribeVolumes")
    }

    pub async fn key_pairs(self: &Arc<Self>, req: &DescribeRequest) -> Result<KeyPairs> {
        let resp = self.conn().await?.describe_key_pairs(req).await?;
        self.wrap(resp, "KeyPairs", "DescribeKeyPairs")
    }

    pub async fn launch_templates(self: &Arc<Self>, req: &DescribeRequest) -> Result<LaunchTemplates> {
        let resp = self.conn().await?.describe_launch_templates(req).await?;
        self.wrap(resp, "LaunchTemplates", "DescribeLaunchTemplates")
    }

    /// Images visible to the account. Without explicit filters the listing
    /// is limited to the configured owner id, if any.
    pub async fn images(self: &Arc<Self>, req: &DescribeRequest) -> Result<Images> {
        let mut req = req.clone();
        if req.filters.is_empty() {
            if let Some(owner) = self.ctx.config.owner_id() {
                req = req.filter("owner-id", [owner]);
            }
        }

        let resp = self.conn().await?.describe_images(&req).await?;
        self.wrap(resp, "Images", "DescribeImages")
    }

    pub async fn security_groups(self: &Arc<Self>, req: &DescribeRequest) -> Result<SecurityGroups> {
        let resp = self.conn().await?.describe_security_groups(req).await?;
        self.wrap(resp, "SecurityGroups", "DescribeSecurityGroups")
    }

    pub async fn placement_groups(self: &Arc<Self>, req: &DescribeRequest) -> Result<PlacementGroups> {
        let resp = self.conn().await?.describe_placement_groups(req).await?;
        self.wrap(resp, "PlacementGroups", "DescribePlacementGroups")
    }

    pub async fn start_instances(self: &Arc<Self>, ids: &[String]) -> Result<StateChanges> {
        let resp = self.conn().await?.start_instances(ids).await?;
        self.wrap(resp, "StartingInstances", "StartInstances")
    }

    pub async fn stop_instances(self: &Arc<Self>, ids: &[String]) -> Result<StateChanges> {
        let resp = self.conn().await?.stop_instances(ids).await?;
        self.wrap(resp, "StoppingInstances", "StopInstances")
    }

    pub async fn terminate_instances(self: &Arc<Self>, ids: &[String]) -> Result<StateChanges> {
        let resp = self.conn().await?.terminate_instances(ids).await?;
        self.wrap(resp, "TerminatingInstances", "TerminateInstances")
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Region {} ({})", self.code(), self.locale())
    }
}

impl Serialize for Region {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.serialize_map().serialize(serializer)
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn into_array(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(rows) => Some(rows),
        _ => None,
    }
}

/// Remove the list under `key` from a response document
fn take_list(resp: Value, key: &str, region: &str, operation: &'static str) -> Result<Vec<Value>> {
    let mut resp = match resp {
        Value::Object(record) => record,
        other => {
            return Err(GeoNetError::transport(
                region,
                operation,
                format!("expected a response document, got {}", json_type(&other)),
            ))
        }
    };

    match resp.shift_remove(key) {
        Some(Value::Array(rows)) => Ok(rows),
        Some(Value::Null) | None => Ok(Vec::new()),
        Some(other) => Err(GeoNetError::transport(
            region,
            operation,
            format!("expected {} to be a list, got {}", key, json_type(&other)),
        )),
    }
}

/// On-disk form of the regions file
#[derive(Serialize, Deserialize)]
struct RegionsFile {
    #[serde(with = "utc_timestamp")]
    updated: DateTime<Utc>,
    regions: Vec<Value>,
}

/// Ordered registry of regions
#[derive(Clone)]
pub struct Regions {
    ctx: Context,
    items: Vec<Arc<Region>>,
    updated: Option<DateTime<Utc>>,
}

impl Regions {
    pub fn new(ctx: Context, items: Vec<Arc<Region>>) -> Self {
        Self {
            ctx,
            items,
            updated: None,
        }
    }

    /// Build from raw region records
    pub fn from_records(ctx: Context, records: Vec<Value>) -> Result<Self> {
        let items = records
            .into_iter()
            .map(|record| Region::new(record, ctx.clone()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(ctx, items))
    }

    /// One sparse region per configured region code
    pub fn configured(ctx: Context) -> Result<Self> {
        let records = ctx
            .config
            .regions()
            .iter()
            .map(|code| json!({ "RegionName": code }))
            .collect();
        Self::from_records(ctx, records)
    }

    /// Load the persisted region list, or the configured regions if none
    /// has been saved yet
    pub fn load(ctx: Context) -> Result<Self> {
        let path = ctx.config.regions_path();
        Self::load_from(ctx, &path)
    }

    pub fn load_from(ctx: Context, path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No regions file, using configured regions");
            return Self::configured(ctx);
        }

        let file: RegionsFile = read_json(path)?;
        let mut regions = Self::from_records(ctx, file.regions)?;
        regions.updated = Some(file.updated);
        Ok(regions)
    }

    /// Loaded regions restricted to the configured ones
    pub fn load_active(ctx: Context) -> Result<Self> {
        let mut regions = Self::load(ctx)?;
        regions.items.retain(|region| region.is_configured());
        Ok(regions)
    }

    /// List regions through an open compute client
    pub async fn fetch(ctx: Context, api: &dyn ComputeApi) -> Result<Self> {
        let resp = api.describe_regions().await?;
        let records = take_list(resp, "Regions", api.region(), "DescribeRegions")?;
        info!(count = records.len(), "Fetched regions");
        Self::from_records(ctx, records)
    }

    /// List regions through the configured default region
    pub async fn discover(ctx: Context) -> Result<Self> {
        let bootstrap = Region::from_code(&ctx.config.aws().region, ctx.clone())?;
        let api = bootstrap.conn().await?;
        Self::fetch(ctx, api.as_ref()).await
    }

    /// Persist the region list with a fresh `updated` timestamp
    pub fn dump(&self) -> Result<()> {
        self.dump_to(&self.ctx.config.regions_path())
    }

    pub fn dump_to(&self, path: &Path) -> Result<()> {
        let file = RegionsFile {
            updated: utcnow(),
            regions: self.items.iter().map(|r| Value::Object(r.serialize_map())).collect(),
        };
        write_json(path, &file)?;
        info!(path = %path.display(), count = self.items.len(), "Saved regions");
        Ok(())
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn updated(&self) -> Option<DateTime<Utc>> {
        self.updated
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arc<Region>> {
        self.items.iter()
    }

    pub fn codes(&self) -> Vec<String> {
        self.items.iter().map(|r| r.code().to_string()).collect()
    }

    /// Region by code or locale name (case sensitive); `None` if absent
    pub fn find(&self, name: &str) -> Option<Arc<Region>> {
        self.items
            .iter()
            .find(|region| region.code() == name || region.locale() == name)
            .cloned()
    }

    /// Like [`Regions::find`] but a missing region is an error
    pub fn get(&self, name: &str) -> Result<Arc<Region>> {
        self.find(name)
            .ok_or_else(|| GeoNetError::RegionNotFound(name.to_string()))
    }

    /// Registry restricted to `names`, in the given order
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Regions> {
        let items = names
            .iter()
            .map(|name| self.get(name.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Regions {
            ctx: self.ctx.clone(),
            items,
            updated: self.updated,
        })
    }

    /// Stable sort by a record field (`RegionName`, `LocaleName`, ...)
    pub fn sortby(&mut self, key: &str, reverse: bool) {
        self.items.sort_by(|a, b| {
            let ord = compare_values(a.record.get(key), b.record.get(key));
            if reverse {
                ord.reverse()
            } else {
                ord
            }
        });
    }

    async fn fan_out<'a, K, F, Fut>(&'a self, fetch: F) -> Result<Collection<K>>
    where
        K: Kind,
        F: Fn(&'a Arc<Region>) -> Fut,
        Fut: Future<Output = Result<Collection<K>>>,
    {
        let results = wait(self.items.iter().map(fetch)).await?;
        Ok(Collection::collect_with(results, self.fan_in_meta()))
    }

    /// Meta for a merged result: the region codes that contributed to it
    fn fan_in_meta(&self) -> Record {
        let mut meta = Record::new();
        meta.insert("regions".to_string(), json!(self.codes()));
        meta
    }

    pub async fn zones(&self, req: &DescribeRequest) -> Result<AvailabilityZones> {
        self.fan_out(|region| region.zones(req)).await
    }

    /// Instances across all regions, optionally with their status records
    pub async fn instances(&self, req: &DescribeRequest, with_status: bool) -> Result<Instances> {
        let mut per_region = wait(self.items.iter().map(|region| region.instances(req))).await?;
        if with_status {
            wait(per_region.iter_mut().map(|instances| instances.update_statuses())).await?;
        }
        Ok(Instances::collect_with(per_region, self.fan_in_meta()))
    }

    pub async fn volumes(&self, req: &DescribeRequest) -> Result<Volumes> {
        self.fan_out(|region| region.volumes(req)).await
    }

    pub async fn key_pairs(&self, req: &DescribeRequest) -> Result<KeyPairs> {
        self.fan_out(|region| region.key_pairs(req)).await
    }

    pub async fn launch_templates(&self, req: &DescribeRequest) -> Result<LaunchTemplates> {
        self.fan_out(|region| region.launch_templates(req)).await
    }

    pub async fn images(&self, req: &DescribeRequest) -> Result<Images> {
        self.fan_out(|region| region.images(req)).await
    }

    pub async fn security_groups(&self, req: &DescribeRequest) -> Result<SecurityGroups> {
        self.fan_out(|region| region.security_groups(req)).await
    }

    pub async fn placement_groups(&self, req: &DescribeRequest) -> Result<PlacementGroups> {
        self.fan_out(|region| region.placement_groups(req)).await
    }
}

impl fmt::Debug for Regions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Regions")
            .field("items", &self.codes())
            .field("updated", &self.updated)
            .finish()
    }
}

impl<'a> IntoIterator for &'a Regions {
    type Item = &'a Arc<Region>;
    type IntoIter = std::slice::Iter<'a, Arc<Region>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl Serialize for Regions {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.items.iter().map(|region| region.as_ref()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::compute::mock::{instance, MockCompute, MockConnector};
    use crate::config::ConnectionSettings;

    pub(crate) fn context_with(connector: MockConnector) -> (Context, Arc<MockConnector>) {
        let config = AppConfig::default()
            .with_regions(["us-east-1", "us-west-2"])
            .with_connection(ConnectionSettings {
                attempts: 4,
                backoff_ms: 100,
            });
        let connector = Arc::new(connector);
        let ctx = Context::new(Arc::new(config), connector.clone());
        (ctx, connector)
    }

    fn two_regions() -> (Regions, Arc<MockConnector>) {
        let connector = MockConnector::new()
            .with_region(MockCompute::new("us-east-1").with_instances(vec![
                json!({"InstanceId": "i-1", "State": {"Name": "running"}, "ReservationId": "r-1"}),
                json!({"InstanceId": "i-2", "State": {"Name": "stopped"}, "ReservationId": "r-1"}),
            ]))
            .with_region(MockCompute::new("us-west-2").with_instances(vec![instance("i-3", "running")]));
        let (ctx, connector) = context_with(connector);
        (Regions::configured(ctx).unwrap(), connector)
    }

    #[test]
    fn test_region_requires_name() {
        let (ctx, _) = context_with(MockConnector::new());
        assert!(Region::new(json!({"Endpoint": "x"}), ctx.clone()).is_err());

        let region = Region::from_code("us-east-1", ctx).unwrap();
        assert_eq!(region.record()["LocaleName"], Value::Null);
        assert_eq!(region.to_string(), "us-east-1");
    }

    #[test]
    fn test_locale_synthesized_from_code() {
        let (ctx, _) = context_with(MockConnector::new());
        let region = Region::from_code("us-east-1", ctx.clone()).unwrap();
        assert_eq!(region.locale(), "US East 1");
        assert_eq!(region.name(), "us-east-1");

        let named = Region::new(json!({"RegionName": "eu-west-1", "LocaleName": "Ireland"}), ctx).unwrap();
        assert_eq!(named.locale(), "Ireland");
        assert_eq!(named.name(), "Ireland");
    }

    #[test]
    fn test_find_and_get() {
        let (regions, _) = two_regions();
        assert_eq!(regions.find("us-west-2").unwrap().code(), "us-west-2");
        assert_eq!(regions.find("US East 1").unwrap().code(), "us-east-1");
        assert!(regions.find("us east 1").is_none());

        let err = regions.get("mars-1").unwrap_err();
        assert!(matches!(err, GeoNetError::RegionNotFound(ref name) if name == "mars-1"));
        assert!(regions.select(&["us-west-2"]).unwrap().len() == 1);
        assert!(regions.select(&["us-west-2", "nowhere"]).is_err());
    }

    #[test]
    fn test_is_configured() {
        let (ctx, _) = context_with(MockConnector::new());
        assert!(Region::from_code("us-west-2", ctx.clone()).unwrap().is_configured());
        assert!(!Region::from_code("eu-west-1", ctx).unwrap().is_configured());
    }

    #[test]
    fn test_load_falls_back_to_configured() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = context_with(MockConnector::new());
        let regions = Regions::load_from(ctx, &dir.path().join("regions.json")).unwrap();
        assert_eq!(regions.codes(), vec!["us-east-1", "us-west-2"]);
        assert!(regions.updated().is_none());
    }

    #[test]
    fn test_dump_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("regions.json");
        let (ctx, _) = context_with(MockConnector::new());

        let regions = Regions::from_records(
            ctx.clone(),
            vec![
                json!({"RegionName": "eu-west-1", "LocaleName": "Ireland", "Endpoint": "ec2.eu-west-1.amazonaws.com"}),
                json!({"RegionName": "us-west-2"}),
            ],
        )
        .unwrap();
        regions.dump_to(&path).unwrap();

        let raw: Value = read_json(&path).unwrap();
        assert!(raw["updated"].as_str().unwrap().ends_with('Z'));
        assert_eq!(raw["regions"][0]["Endpoint"], "ec2.eu-west-1.amazonaws.com");

        let loaded = Regions::load_from(ctx.clone(), &path).unwrap();
        assert_eq!(loaded.codes(), vec!["eu-west-1", "us-west-2"]);
        assert!(loaded.updated().is_some());
        assert_eq!(loaded.find("Ireland").unwrap().code(), "eu-west-1");
    }

    #[test]
    fn test_regions_serialize_as_records() {
        let (regions, _) = two_regions();
        let value = serde_json::to_value(&regions).unwrap();
        let names: Vec<&str> = value
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["RegionName"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["us-east-1", "us-west-2"]);
    }

    #[test]
    fn test_load_active_keeps_configured() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::default()
            .with_regions(["us-west-2"])
            .with_data_dir(dir.path());
        let ctx = Context::new(Arc::new(config), Arc::new(MockConnector::new()));

        Regions::from_records(
            ctx.clone(),
            vec![json!({"RegionName": "eu-west-1"}), json!({"RegionName": "us-west-2"})],
        )
        .unwrap()
        .dump()
        .unwrap();

        assert_eq!(Regions::load(ctx.clone()).unwrap().len(), 2);
        assert_eq!(Regions::load_active(ctx).unwrap().codes(), vec!["us-west-2"]);
    }

    #[test]
    fn test_sortby_record_field() {
        let (ctx, _) = context_with(MockConnector::new());
        let mut regions = Regions::from_records(
            ctx,
            vec![json!({"RegionName": "us-west-2"}), json!({"RegionName": "ap-south-1"}), json!({"RegionName": "eu-west-1"})],
        )
        .unwrap();
        regions.sortby("RegionName", false);
        assert_eq!(regions.codes(), vec!["ap-south-1", "eu-west-1", "us-west-2"]);
        regions.sortby("RegionName", true);
        assert_eq!(regions.codes(), vec!["us-west-2", "eu-west-1", "ap-south-1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conn_retries_then_caches() {
        let (regions, connector) = two_regions();
        connector.fail_connects("us-east-1", 3);

        let region = regions.get("us-east-1").unwrap();
        assert_eq!(region.status().await, ConnectionStatus::Unconfigured);
        region.conn().await.unwrap();
        assert_eq!(connector.connect_attempts("us-east-1"), 4);
        assert_eq!(region.status().await, ConnectionStatus::Connected);

        region.conn().await.unwrap();
        assert_eq!(connector.connect_attempts("us-east-1"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conn_gives_up_after_budget() {
        let (regions, connector) = two_regions();
        connector.fail_connects("us-west-2", 5);

        let region = regions.get("us-west-2").unwrap();
        assert!(matches!(region.conn().await, Err(e) if e.is_transport()));
        assert_eq!(connector.connect_attempts("us-west-2"), 4);
        assert!(matches!(region.status().await, ConnectionStatus::Failed { attempts: 4, .. }));

        // one failure left in the mock, then the next call connects
        region.conn().await.unwrap();
        assert_eq!(connector.connect_attempts("us-west-2"), 6);
    }

    #[tokio::test]
    async fn test_concurrent_conn_opens_once() {
        let (regions, connector) = two_regions();
        let region = regions.get("us-east-1").unwrap();
        let results = wait((0..10).map(|_| region.conn())).await.unwrap();
        assert_eq!(results.len(), 10);
        assert_eq!(connector.connect_attempts("us-east-1"), 1);
    }

    #[tokio::test]
    async fn test_instances_flatten_reservations() {
        let (regions, _) = two_regions();
        let region = regions.get("us-east-1").unwrap();
        let instances = region.instances(&DescribeRequest::new()).await.unwrap();

        assert_eq!(instances.ids(), vec!["i-1", "i-2"]);
        assert_eq!(instances[0]["ReservationId"], "r-1");
        assert_eq!(instances[0].region_code(), Some("us-east-1"));
        assert_eq!(instances[1].region().unwrap().code(), "us-east-1");
    }

    #[tokio::test]
    async fn test_fan_out_collects_in_region_order() {
        let (regions, _) = two_regions();
        let instances = regions.instances(&DescribeRequest::new(), true).await.unwrap();
        assert_eq!(instances.ids(), vec!["i-1", "i-2", "i-3"]);
        assert!(instances[0].status().is_some());
        assert!(instances[1].status().is_none());

        let serialized = serde_json::to_value(&instances).unwrap();
        assert_eq!(serialized[2]["Region"], "us-west-2");
        assert!(serialized[0].get("Status").is_none());
        assert!(!instances[0].contains("Status"));

        assert_eq!(instances.meta()["regions"], json!(["us-east-1", "us-west-2"]));

        let zones = regions.zones(&DescribeRequest::new()).await.unwrap();
        assert_eq!(zones.len(), 4);
        assert_eq!(zones.meta()["regions"], json!(["us-east-1", "us-west-2"]));
    }

    #[tokio::test]
    async fn test_fan_out_failure_fails_batch() {
        let (regions, connector) = two_regions();
        connector.region("us-west-2").unwrap().fail_on("DescribeVolumes");

        match regions.volumes(&DescribeRequest::new()).await {
            Err(GeoNetError::Batch { total: 2, failures }) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].index, 1);
            }
            other => panic!("expected batch error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_images_default_owner_filter() {
        let connector = MockConnector::new().with_region(MockCompute::new("us-east-1").with_images(vec![
            json!({"ImageId": "ami-1", "OwnerId": "111", "Name": "alia-1", "CreationDate": "2018-01-01T00:00:00Z", "BlockDeviceMappings": []}),
            json!({"ImageId": "ami-2", "OwnerId": "222", "Name": "other", "CreationDate": "2018-01-01T00:00:00Z", "BlockDeviceMappings": []}),
        ]));
        let config = AppConfig::default().with_regions(["us-east-1"]).with_owner_id("111");
        let ctx = Context::new(Arc::new(config), Arc::new(connector));
        let region = Region::from_code("us-east-1", ctx).unwrap();

        let images = region.images(&DescribeRequest::new()).await.unwrap();
        assert_eq!(images.ids(), vec!["ami-1"]);

        let all = region.images(&DescribeRequest::new().filter("state", ["available"])).await.unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_regions() {
        let connector = MockConnector::new().with_region(MockCompute::new("us-east-1").with_regions(vec![
            json!({"RegionName": "us-east-1", "Endpoint": "ec2.us-east-1.amazonaws.com"}),
            json!({"RegionName": "sa-east-1", "Endpoint": "ec2.sa-east-1.amazonaws.com"}),
        ]));
        let (ctx, _) = context_with(connector);
        let regions = Regions::discover(ctx).await.unwrap();
        assert_eq!(regions.codes(), vec!["us-east-1", "sa-east-1"]);
        assert!(!regions.get("sa-east-1").unwrap().is_configured());
    }
}
