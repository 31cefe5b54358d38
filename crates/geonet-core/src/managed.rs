//! Instances under management
//!
//! [`ManagedInstances`] is a persisted mapping of region code to a set of
//! instance ids. An id is tracked under at most one region. The JSON file
//! on disk is the source of truth between invocations; it is read and
//! written wholesale with no locking, so two concurrent writers can lose
//! each other's changes.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, info};

use crate::compute::DescribeRequest;
use crate::ec2::{Instances, StateChanges};
use crate::error::Result;
use crate::region::{Region, Regions};
use crate::report::Outcome;
use crate::serialize::{read_json, utc_timestamp, write_json};
use crate::timez::utcnow;
use crate::wait::{wait, wait_settled};

/// What [`ManagedInstances::filter`] matches values against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterBy {
    Regions,
    Instances,
}

/// Bulk lifecycle transition applied to managed instances
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Start,
    Stop,
    Terminate,
}

impl Transition {
    async fn apply(self, region: &Arc<Region>, ids: &[String]) -> Result<StateChanges> {
        match self {
            Transition::Start => region.start_instances(ids).await,
            Transition::Stop => region.stop_instances(ids).await,
            Transition::Terminate => region.terminate_instances(ids).await,
        }
    }
}

#[derive(Deserialize)]
struct ManagedFile {
    #[serde(with = "utc_timestamp")]
    updated: DateTime<Utc>,
    #[serde(default)]
    instances: IndexMap<String, Vec<String>>,
}

#[derive(Serialize)]
struct ManagedFileRef<'a> {
    #[serde(with = "utc_timestamp")]
    updated: DateTime<Utc>,
    instances: &'a IndexMap<String, IndexSet<String>>,
}

/// Regions and ids keep insertion order, which is file order after a load
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagedInstances {
    instances: IndexMap<String, IndexSet<String>>,
    updated: Option<DateTime<Utc>>,
}

impl ManagedInstances {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a region -> ids mapping; empty regions are dropped and an
    /// id listed under several regions is kept under the last one
    pub fn from_map<I, R, V, S>(data: I) -> Self
    where
        I: IntoIterator<Item = (R, V)>,
        R: Into<String>,
        V: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut managed = Self::new();
        for (region, ids) in data {
            let region = region.into();
            for id in ids {
                managed.add(id, region.clone());
            }
        }
        managed
    }

    /// Read the tracker from disk; a missing file is an empty tracker
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No managed instances file");
            return Ok(Self::new());
        }

        let file: ManagedFile = read_json(path)?;
        let mut managed = Self::from_map(file.instances);
        managed.updated = Some(file.updated);
        Ok(managed)
    }

    /// Write the tracker to disk stamped with the current time
    pub fn dump(&self, path: &Path) -> Result<()> {
        write_json(path, self)?;
        info!(path = %path.display(), "{}", self);
        Ok(())
    }

    /// Time of the last dump this tracker was loaded from
    pub fn updated(&self) -> Option<DateTime<Utc>> {
        self.updated
    }

    /// Track `instance_id` under `region`, moving it if it was tracked
    /// elsewhere. Returns false if it was already tracked there.
    pub fn add(&mut self, instance_id: impl Into<String>, region: impl Into<String>) -> bool {
        let instance_id = instance_id.into();
        let region = region.into();

        if let Some(current) = self.region_for_instance(&instance_id) {
            if current == region {
                return false;
            }
            let current = current.to_string();
            self.discard(&instance_id, Some(&current));
        }

        self.instances.entry(region).or_default().insert(instance_id)
    }

    /// Stop tracking `instance_id`; without a region every region is searched.
    /// Returns true if the id was removed.
    pub fn discard(&mut self, instance_id: &str, region: Option<&str>) -> bool {
        let region = match region {
            Some(region) => region.to_string(),
            None => match self.region_for_instance(instance_id) {
                Some(region) => region.to_string(),
                None => return false,
            },
        };

        let Some(ids) = self.instances.get_mut(&region) else {
            return false;
        };
        let removed = ids.shift_remove(instance_id);
        if ids.is_empty() {
            self.instances.shift_remove(&region);
        }
        removed
    }

    /// New tracker holding only the given regions, or only the given
    /// instance ids within every region
    pub fn filter<S: AsRef<str>>(&self, values: &[S], by: FilterBy) -> Self {
        let wanted: BTreeSet<&str> = values.iter().map(AsRef::as_ref).collect();

        let instances = self
            .instances
            .iter()
            .filter_map(|(region, ids)| {
                let ids: IndexSet<String> = match by {
                    FilterBy::Regions if wanted.contains(region.as_str()) => ids.clone(),
                    FilterBy::Regions => return None,
                    FilterBy::Instances => ids
                        .iter()
                        .filter(|id| wanted.contains(id.as_str()))
                        .cloned()
                        .collect(),
                };
                (!ids.is_empty()).then(|| (region.clone(), ids))
            })
            .collect();

        Self {
            instances,
            updated: self.updated,
        }
    }

    /// (region code, instance ids) pairs, one per region with managed ids
    pub fn regions(&self) -> impl Iterator<Item = (&str, Vec<String>)> + '_ {
        self.instances
            .iter()
            .map(|(region, ids)| (region.as_str(), ids.iter().cloned().collect()))
    }

    pub fn region_codes(&self) -> Vec<&str> {
        self.instances.keys().map(String::as_str).collect()
    }

    pub fn region_for_instance(&self, instance_id: &str) -> Option<&str> {
        self.instances
            .iter()
            .find(|(_, ids)| ids.contains(instance_id))
            .map(|(region, _)| region.as_str())
    }

    pub fn contains(&self, instance_id: &str) -> bool {
        self.instances.values().any(|ids| ids.contains(instance_id))
    }

    pub fn len(&self) -> usize {
        self.instances.values().map(IndexSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Every managed id across all regions
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.instances.values().flatten().map(String::as_str)
    }

    fn targets(&self, regions: &Regions) -> Result<Vec<(Arc<Region>, Vec<String>)>> {
        self.regions()
            .map(|(code, ids)| Ok((regions.get(code)?, ids)))
            .collect()
    }

    /// Describe the managed instances, one call per region
    pub async fn status(&self, regions: &Regions) -> Result<Instances> {
        let targets = self.targets(regions)?;
        let results = wait(targets.iter().map(|(region, ids)| async move {
            region.instances(&DescribeRequest::new().ids(ids.iter().cloned())).await
        }))
        .await?;
        Ok(Instances::collect(results))
    }

    /// Apply a transition to every managed instance, concurrently by region
    pub async fn transition(&self, regions: &Regions, transition: Transition) -> Result<StateChanges> {
        let targets = self.targets(regions)?;
        debug!(?transition, regions = targets.len(), instances = self.len(), "Applying transition");

        let results = wait(
            targets
                .iter()
                .map(|(region, ids)| transition.apply(region, ids)),
        )
        .await?;
        Ok(StateChanges::collect(results))
    }

    pub async fn start(&self, regions: &Regions) -> Result<StateChanges> {
        self.transition(regions, Transition::Start).await
    }

    pub async fn stop(&self, regions: &Regions) -> Result<StateChanges> {
        self.transition(regions, Transition::Stop).await
    }

    pub async fn terminate(&self, regions: &Regions) -> Result<StateChanges> {
        self.transition(regions, Transition::Terminate).await
    }

    /// Terminate every managed instance, reporting one row per instance.
    ///
    /// A region whose call fails (or that is unknown) marks each of its
    /// instances as failed; it does not abort the other regions.
    pub async fn terminate_report(&self, regions: &Regions) -> Vec<Outcome> {
        let groups: Vec<(&str, Vec<String>)> = self.regions().collect();
        let results = wait_settled(groups.iter().map(|(code, ids)| async move {
            let region = regions.get(code)?;
            Transition::Terminate.apply(&region, ids).await
        }))
        .await;

        let mut outcomes = Vec::with_capacity(self.len());
        for ((code, ids), result) in groups.iter().zip(results) {
            match result {
                Ok(changes) => outcomes.extend(ids.iter().map(|id| match changes.lookup(id) {
                    Ok(change) => Outcome::ok(
                        *code,
                        id.as_str(),
                        format!("{} -> {}", change.previous(), change.current()),
                    ),
                    Err(_) => Outcome::failed(*code, id.as_str(), "no state change reported"),
                })),
                Err(err) => outcomes.extend(ids.iter().map(|id| Outcome::failed(*code, id.as_str(), &err))),
            }
        }
        outcomes
    }

    /// Remove terminated ids from the tracker stored at `path`.
    ///
    /// The full tracker is reloaded first so that ids excluded from the
    /// terminated set by a filter stay managed.
    pub fn release<I, S>(path: &Path, terminated: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut managed = Self::load(path)?;
        for id in terminated {
            managed.discard(id.as_ref(), None);
        }
        managed.dump(path)?;
        Ok(managed)
    }
}

impl fmt::Display for ManagedInstances {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} instances in {} regions", self.len(), self.instances.len())
    }
}

impl Serialize for ManagedInstances {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        ManagedFileRef {
            updated: utcnow(),
            instances: &self.instances,
        }
        .serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::mock::{instance, MockCompute, MockConnector};
    use crate::ec2::InstanceState;
    use crate::region::tests::context_with;
    use serde_json::Value;

    fn tracker() -> ManagedInstances {
        let mut managed = ManagedInstances::new();
        managed.add("i-1", "us-east-1");
        managed.add("i-2", "us-west-2");
        managed
    }

    fn regions() -> (Regions, Arc<MockConnector>) {
        let connector = MockConnector::new()
            .with_region(MockCompute::new("us-east-1").with_instances(vec![
                instance("i-1", "running"),
                instance("i-3", "stopped"),
            ]))
            .with_region(MockCompute::new("us-west-2").with_instances(vec![instance("i-2", "running")]));
        let (ctx, connector) = context_with(connector);
        (Regions::configured(ctx).unwrap(), connector)
    }

    #[test]
    fn test_add_filter_discard() {
        let mut managed = tracker();
        assert_eq!(managed.len(), 2);
        assert!(managed.contains("i-1"));

        let east = managed.filter(&["us-east-1"], FilterBy::Regions);
        assert_eq!(east.len(), 1);
        assert!(east.contains("i-1"));
        assert!(!east.contains("i-2"));

        assert!(managed.discard("i-1", None));
        assert!(!managed.contains("i-1"));
        assert_eq!(managed.region_codes(), vec!["us-west-2"]);
        assert!(!managed.discard("i-1", None));
    }

    #[test]
    fn test_add_is_unique_across_regions() {
        let mut managed = tracker();
        assert!(!managed.add("i-1", "us-east-1"));
        assert!(managed.add("i-1", "us-west-2"));

        assert_eq!(managed.len(), 2);
        assert_eq!(managed.region_for_instance("i-1"), Some("us-west-2"));
        assert_eq!(managed.to_string(), "2 instances in 1 regions");
    }

    #[test]
    fn test_discard_in_wrong_region_is_noop() {
        let mut managed = tracker();
        assert!(!managed.discard("i-1", Some("us-west-2")));
        assert!(managed.contains("i-1"));
        assert!(!managed.discard("i-1", Some("eu-west-1")));
    }

    #[test]
    fn test_filter_by_instances() {
        let mut managed = tracker();
        managed.add("i-4", "us-east-1");

        let picked = managed.filter(&["i-4", "i-9"], FilterBy::Instances);
        assert_eq!(picked.iter().collect::<Vec<_>>(), vec!["i-4"]);
        assert_eq!(picked.region_codes(), vec!["us-east-1"]);
        assert_eq!(managed.len(), 3);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let managed = ManagedInstances::load(&dir.path().join("instances.json")).unwrap();
        assert!(managed.is_empty());
        assert!(managed.updated().is_none());
    }

    #[test]
    fn test_dump_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("instances.json");

        tracker().dump(&path).unwrap();
        let raw: Value = read_json(&path).unwrap();
        assert_eq!(raw["instances"]["us-east-1"], serde_json::json!(["i-1"]));
        assert!(raw["updated"].as_str().unwrap().ends_with('Z'));

        let loaded = ManagedInstances::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.updated().is_some());
        assert_eq!(loaded.filter(&["i-2"], FilterBy::Instances).region_codes(), vec!["us-west-2"]);
    }

    #[test]
    fn test_regions_keep_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instances.json");

        let mut managed = ManagedInstances::new();
        managed.add("i-9", "us-west-2");
        managed.add("i-1", "eu-west-1");
        managed.add("i-5", "us-west-2");
        managed.dump(&path).unwrap();

        let loaded = ManagedInstances::load(&path).unwrap();
        assert_eq!(loaded.region_codes(), vec!["us-west-2", "eu-west-1"]);
        let groups: Vec<(&str, Vec<String>)> = loaded.regions().collect();
        assert_eq!(groups[0].1, vec!["i-9", "i-5"]);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.find("us-west-2").unwrap() < raw.find("eu-west-1").unwrap());
    }

    #[test]
    fn test_from_map_skips_empty_regions() {
        let managed = ManagedInstances::from_map(vec![
            ("us-east-1", vec!["i-1"]),
            ("eu-west-1", vec![]),
        ]);
        assert_eq!(managed.region_codes(), vec!["us-east-1"]);
    }

    #[tokio::test]
    async fn test_stop_then_start() {
        let (regions, connector) = regions();
        let managed = tracker();

        let changes = managed.stop(&regions).await.unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes.with_current(InstanceState::Stopped).len(), 2);
        assert_eq!(
            connector.region("us-east-1").unwrap().instance_state("i-1").as_deref(),
            Some("stopped")
        );
        assert_eq!(connector.region("us-east-1").unwrap().call_count("StopInstances"), 1);

        let changes = managed.start(&regions).await.unwrap();
        assert_eq!(changes.lookup("i-2").unwrap().current(), "running");
        assert_eq!(changes.lookup("i-2").unwrap().previous(), "stopped");
    }

    #[tokio::test]
    async fn test_status_describes_only_managed() {
        let (regions, _) = regions();
        let instances = tracker().status(&regions).await.unwrap();
        assert_eq!(instances.ids(), vec!["i-1", "i-2"]);
    }

    #[tokio::test]
    async fn test_unknown_region_fails() {
        let (regions, _) = regions();
        let mut managed = tracker();
        managed.add("i-7", "mars-1");
        assert!(managed.stop(&regions).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_terminate_report_rows_per_instance() {
        let (regions, connector) = regions();
        connector.region("us-west-2").unwrap().fail_on("TerminateInstances");

        let mut managed = tracker();
        managed.add("i-3", "us-east-1");
        let outcomes = managed.terminate_report(&regions).await;

        assert_eq!(outcomes.len(), 3);
        let failed: Vec<&str> = outcomes.iter().filter(|o| !o.success).map(|o| o.subject.as_str()).collect();
        assert_eq!(failed, vec!["i-2"]);
        assert_eq!(outcomes[0].message, "running -> terminated");
        assert_eq!(outcomes[1].message, "stopped -> terminated");
    }

    #[test]
    fn test_release_reloads_full_tracker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instances.json");
        tracker().dump(&path).unwrap();

        let released = ManagedInstances::release(&path, ["i-1"]).unwrap();
        assert_eq!(released.iter().collect::<Vec<_>>(), vec!["i-2"]);
        assert_eq!(ManagedInstances::load(&path).unwrap().len(), 1);
    }
}
