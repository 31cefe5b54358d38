//! End-to-end flows over the in-memory compute backend

use std::sync::Arc;
use std::time::Duration;

use geonet_core::compute::mock::{instance, MockCompute, MockConnector};
use geonet_core::config::ConnectionSettings;
use geonet_core::{
    provision, AppConfig, Context, DescribeRequest, FilterBy, InstanceState, ManagedInstances,
    Regions,
};
use serde_json::{json, Value};

struct Fixture {
    _dir: tempfile::TempDir,
    ctx: Context,
    connector: Arc<MockConnector>,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig::default()
        .with_regions(["us-east-1", "eu-west-1", "ap-south-1"])
        .with_data_dir(dir.path())
        .with_connection(ConnectionSettings {
            attempts: 4,
            backoff_ms: 10,
        });

    let connector = Arc::new(
        MockConnector::new()
            .with_region(
                MockCompute::new("us-east-1")
                    .with_regions(vec![
                        json!({"RegionName": "us-east-1"}),
                        json!({"RegionName": "eu-west-1", "LocaleName": "Ireland"}),
                        json!({"RegionName": "ap-south-1"}),
                        json!({"RegionName": "sa-east-1"}),
                    ])
                    .with_instances(vec![instance("i-east-1", "running"), instance("i-east-2", "stopped")]),
            )
            .with_region(
                MockCompute::new("eu-west-1")
                    .with_delay(Duration::from_millis(30))
                    .with_instances(vec![instance("i-eu-1", "running")]),
            )
            .with_region(
                MockCompute::new("ap-south-1")
                    .with_delay(Duration::from_millis(5))
                    .with_instances(vec![instance("i-ap-1", "pending")]),
            ),
    );

    Fixture {
        ctx: Context::new(Arc::new(config), connector.clone()),
        connector,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_discover_dump_and_reload_regions() {
    let fx = fixture();

    let regions = Regions::discover(fx.ctx.clone()).await.unwrap();
    assert_eq!(regions.len(), 4);
    regions.dump().unwrap();

    let loaded = Regions::load(fx.ctx.clone()).unwrap();
    assert_eq!(loaded.codes(), regions.codes());
    assert_eq!(loaded.get("Ireland").unwrap().code(), "eu-west-1");

    let active = Regions::load_active(fx.ctx.clone()).unwrap();
    assert_eq!(active.codes(), vec!["us-east-1", "eu-west-1", "ap-south-1"]);
}

#[tokio::test]
async fn test_fan_out_preserves_region_order() {
    let fx = fixture();
    let regions = Regions::load_active(fx.ctx.clone()).unwrap();

    // eu-west-1 answers last but its instances stay in second place
    let instances = regions.instances(&DescribeRequest::new(), false).await.unwrap();
    assert_eq!(instances.ids(), vec!["i-east-1", "i-east-2", "i-eu-1", "i-ap-1"]);

    let running: Vec<String> = instances.running().map(|i| i.id()).collect();
    assert_eq!(running, vec!["i-east-1", "i-eu-1"]);

    let states = instances.states();
    assert_eq!(states["pending"].len(), 1);
}

#[tokio::test]
async fn test_flaky_connection_recovers() {
    let fx = fixture();
    fx.connector.fail_connects("ap-south-1", 3);

    let regions = Regions::load_active(fx.ctx.clone()).unwrap();
    let zones = regions.zones(&DescribeRequest::new()).await.unwrap();
    assert_eq!(zones.len(), 6);
    assert_eq!(fx.connector.connect_attempts("ap-south-1"), 4);
    assert_eq!(fx.connector.connect_attempts("us-east-1"), 1);
}

#[tokio::test]
async fn test_manage_stop_destroy_release() {
    let fx = fixture();
    let regions = Regions::load_active(fx.ctx.clone()).unwrap();
    let path = fx.ctx.config().instances_path();

    let mut managed = ManagedInstances::load(&path).unwrap();
    assert!(managed.is_empty());
    managed.add("i-east-1", "us-east-1");
    managed.add("i-east-2", "us-east-1");
    managed.add("i-eu-1", "eu-west-1");
    managed.dump(&path).unwrap();

    let managed = ManagedInstances::load(&path).unwrap();
    assert_eq!(managed.to_string(), "3 instances in 2 regions");

    let changes = managed
        .filter(&["eu-west-1"], FilterBy::Regions)
        .stop(&regions)
        .await
        .unwrap();
    assert_eq!(changes.with_current(InstanceState::Stopped), vec!["i-eu-1"]);

    let statuses = managed.status(&regions).await.unwrap();
    let stopped: Vec<String> = statuses
        .with_states(&[InstanceState::Stopped])
        .map(|i| i.id())
        .collect();
    assert_eq!(stopped, vec!["i-east-2", "i-eu-1"]);

    // destroy one instance through a filtered tracker
    let target = managed.filter(&["i-east-2"], FilterBy::Instances);
    let outcomes = target.terminate_report(&regions).await;
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].success);
    assert_eq!(outcomes[0].message, "stopped -> terminated");

    let released = ManagedInstances::release(
        &path,
        outcomes.iter().filter(|o| o.success).map(|o| o.subject.as_str()),
    )
    .unwrap();
    assert_eq!(released.len(), 2);
    assert!(!released.contains("i-east-2"));
    assert!(released.contains("i-eu-1"));

    let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["instances"]["us-east-1"], json!(["i-east-1"]));
}

#[tokio::test]
async fn test_provision_with_partial_failure() {
    let fx = fixture();
    fx.connector
        .region("ap-south-1")
        .unwrap()
        .fail_on("AuthorizeSecurityGroupIngress");

    let regions = Regions::load_active(fx.ctx.clone()).unwrap();
    let outcomes = provision::create_security_group(&regions).await;

    assert_eq!(outcomes.len(), 3);
    let regions_ok: Vec<&str> = outcomes
        .iter()
        .filter(|o| o.success)
        .map(|o| o.region.as_str())
        .collect();
    assert_eq!(regions_ok, vec!["us-east-1", "eu-west-1"]);
    assert!(outcomes[2].message.contains("AuthorizeSecurityGroupIngress"));

    let groups = regions.security_groups(&DescribeRequest::new()).await.unwrap();
    assert_eq!(groups.len(), 3);
    assert_eq!(groups.get_alia_groups().len(), 3);
    let ports: Vec<String> = groups[0].open_ports().iter().map(ToString::to_string).collect();
    assert_eq!(ports, vec!["22", "3264-3285", "5356", "4157"]);
}
