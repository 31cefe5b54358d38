//! Availability zones

use serde_json::Value;

use crate::collection::Collection;
use crate::resource::{Kind, Resource};

pub struct AvailabilityZoneKind;

impl Kind for AvailabilityZoneKind {
    const NAME: &'static str = "AvailabilityZone";
    const REQUIRED_KEYS: &'static [&'static str] = &["ZoneName", "State", "ZoneId"];

    fn identify(resource: &Resource<Self>) -> String {
        match resource.name() {
            "" => resource.zone_id().to_string(),
            name => name.to_string(),
        }
    }
}

pub type AvailabilityZone = Resource<AvailabilityZoneKind>;
pub type AvailabilityZones = Collection<AvailabilityZoneKind>;

impl Resource<AvailabilityZoneKind> {
    pub fn name(&self) -> &str {
        self.get_str("ZoneName").unwrap_or_default()
    }

    pub fn zone_id(&self) -> &str {
        self.get_str("ZoneId").unwrap_or_default()
    }

    pub fn state(&self) -> &str {
        self.get_str("State").unwrap_or_default()
    }

    pub fn is_available(&self) -> bool {
        self.state().eq_ignore_ascii_case("available")
    }

    /// Provider messages attached to the zone, if any
    pub fn messages(&self) -> Vec<&str> {
        self.get("Messages")
            .and_then(Value::as_array)
            .map(|messages| {
                messages
                    .iter()
                    .filter_map(|m| m.get("Message").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Collection<AvailabilityZoneKind> {
    pub fn get_available(&self) -> Vec<&AvailabilityZone> {
        self.iter().filter(|zone| zone.is_available()).collect()
    }
}
