//! Provisioning flows for the alia deployment
//!
//! Each flow runs once per region through the fan-out executor and reports
//! one [`Outcome`] row per region. A failing region becomes a failed row;
//! it never aborts the other regions.

use std::future::Future;
use std::sync::Arc;

use tracing::{info, warn};

use crate::compute::{DescribeRequest, IngressRule, LaunchTemplateData};
use crate::ec2::{LaunchTemplate, ALIA_PREFIX, OPEN_CIDR};
use crate::error::{GeoNetError, Result};
use crate::region::{Region, Regions};
use crate::report::Outcome;
use crate::wait::wait_settled;

pub const GROUP_NAME: &str = ALIA_PREFIX;
pub const GROUP_DESCRIPTION: &str = "Security group for Alia replicas and clients.";
pub const TEMPLATE_NAME: &str = ALIA_PREFIX;

/// Service ports opened to the world on the alia group
pub fn service_rules() -> Vec<IngressRule> {
    vec![
        // ssh
        IngressRule::tcp(22).cidr(OPEN_CIDR),
        // external alia service access
        IngressRule::tcp_range(3264, 3285).cidr(OPEN_CIDR).cidr_v6("::/0"),
        // research services
        IngressRule::tcp(5356).cidr(OPEN_CIDR),
        // master services
        IngressRule::tcp(4157).cidr(OPEN_CIDR),
    ]
}

/// All tcp traffic between members of the group
pub fn group_rule(group_id: &str) -> IngressRule {
    IngressRule::tcp_range(0, 65535).from_group(group_id)
}

/// Run `action` in every region, turning each result into an outcome row
async fn per_region<'a, F, Fut>(regions: &'a Regions, subject: &str, action: F) -> Vec<Outcome>
where
    F: Fn(&'a Arc<Region>) -> Fut,
    Fut: Future<Output = Result<String>>,
{
    let results = wait_settled(regions.iter().map(action)).await;

    regions
        .iter()
        .zip(results)
        .map(|(region, result)| match result {
            Ok(message) => {
                info!(region = %region.code(), subject, "{}", message);
                Outcome::ok(region.code(), subject, message)
            }
            Err(err) => {
                warn!(region = %region.code(), subject, error = %err, "Provisioning step failed");
                Outcome::failed(region.code(), subject, err)
            }
        })
        .collect()
}

/// Id of the single security group named `alia` in the region
async fn alia_group_id(region: &Arc<Region>) -> Result<String> {
    let req = DescribeRequest::new().filter("group-name", [GROUP_NAME]);
    let groups = region.security_groups(&req).await?;

    match groups.as_slice() {
        [group] => Ok(group.group_id().to_string()),
        [] => Err(GeoNetError::NotFound {
            kind: "SecurityGroup",
            key: GROUP_NAME.to_string(),
        }),
        many => Err(GeoNetError::Validation(format!(
            "found {} security groups named '{}' in {}",
            many.len(),
            GROUP_NAME,
            region.code()
        ))),
    }
}

async fn alia_template(region: &Arc<Region>) -> Result<LaunchTemplate> {
    let req = DescribeRequest::new().filter("launch-template-name", [TEMPLATE_NAME]);
    let templates = region.launch_templates(&req).await?;
    templates
        .get_alia_template(region.code())
        .cloned()
        .ok_or_else(|| GeoNetError::NotFound {
            kind: "LaunchTemplate",
            key: TEMPLATE_NAME.to_string(),
        })
}

// ============== Security groups ==============

async fn create_group_in(region: &Arc<Region>) -> Result<String> {
    let api = region.conn().await?;
    let group_id = api.create_security_group(GROUP_NAME, GROUP_DESCRIPTION).await?;
    api.authorize_ingress(&group_id, &[group_rule(&group_id)]).await?;
    api.authorize_ingress(&group_id, &service_rules()).await?;
    Ok(format!("created security group '{}' ({})", GROUP_NAME, group_id))
}

/// Create the alia security group with its service ports in every region
pub async fn create_security_group(regions: &Regions) -> Vec<Outcome> {
    per_region(regions, GROUP_NAME, create_group_in).await
}

pub async fn authorize_port(regions: &Regions, port: i32, cidr: &str) -> Vec<Outcome> {
    per_region(regions, GROUP_NAME, |region| async move {
        let group_id = alia_group_id(region).await?;
        region
            .conn()
            .await?
            .authorize_ingress(&group_id, &[IngressRule::tcp(port).cidr(cidr)])
            .await?;
        Ok(format!("authorized port {} for {}", port, cidr))
    })
    .await
}

pub async fn revoke_port(regions: &Regions, port: i32, cidr: &str) -> Vec<Outcome> {
    per_region(regions, GROUP_NAME, |region| async move {
        let group_id = alia_group_id(region).await?;
        region
            .conn()
            .await?
            .revoke_ingress(&group_id, &[IngressRule::tcp(port).cidr(cidr)])
            .await?;
        Ok(format!("revoked port {} for {}", port, cidr))
    })
    .await
}

pub async fn destroy_security_group(regions: &Regions) -> Vec<Outcome> {
    per_region(regions, GROUP_NAME, |region| async move {
        let group_id = alia_group_id(region).await?;
        region.conn().await?.delete_security_group(&group_id).await?;
        Ok(format!("destroyed security group '{}'", GROUP_NAME))
    })
    .await
}

// ============== Launch templates ==============

/// Launch template payload built from the region's alia group, newest alia
/// image and alia key pair. Returns the payload and the image name.
pub async fn template_data(region: &Arc<Region>) -> Result<(LaunchTemplateData, String)> {
    let req = DescribeRequest::new();
    let (groups, mut images, keys) = tokio::try_join!(
        region.security_groups(&req),
        region.images(&req),
        region.key_pairs(&req),
    )?;
    images.sort_latest();

    let groups = groups.get_alia_groups();
    if groups.len() != 1 {
        return Err(GeoNetError::Validation(format!(
            "expected one alia security group in {}, found {}",
            region.code(),
            groups.len()
        )));
    }

    let image = images.get_alia_images().into_iter().next().ok_or_else(|| {
        GeoNetError::Validation(format!("no alia image to build a launch template from in {}", region.code()))
    })?;

    let keys = keys.get_alia_keys();
    if keys.len() != 1 {
        return Err(GeoNetError::Validation(format!(
            "expected one alia key pair in {}, found {}",
            region.code(),
            keys.len()
        )));
    }

    let data = LaunchTemplateData {
        image_id: image.image_id().to_string(),
        instance_type: region.context().config().instance_type().to_string(),
        key_name: keys[0].name().to_string(),
        security_group_ids: vec![groups[0].group_id().to_string()],
        monitoring: false,
        instance_initiated_shutdown_behavior: "terminate".to_string(),
        instance_tags: vec![
            ("Service".to_string(), "Alia".to_string()),
            ("Roles".to_string(), "Replica, Workload".to_string()),
        ],
        volume_tags: vec![("Role".to_string(), "Alia Temporary Data".to_string())],
    };
    Ok((data, image.name().to_string()))
}

async fn put_template_in(region: &Arc<Region>, update: bool) -> Result<String> {
    let (data, image) = template_data(region).await?;
    let api = region.conn().await?;

    if !update {
        api.create_launch_template(TEMPLATE_NAME, &data).await?;
        return Ok(format!("created launch template '{}' from image '{}'", TEMPLATE_NAME, image));
    }

    let template = alia_template(region).await?;
    let version = api.create_launch_template_version(template.template_id(), &data).await?;
    api.modify_default_version(template.template_id(), version).await?;
    Ok(format!("default version {} from image '{}'", version, image))
}

/// Create the alia launch template in every region, or with `update` add a
/// new version and make it the default
pub async fn put_template(regions: &Regions, update: bool) -> Vec<Outcome> {
    per_region(regions, TEMPLATE_NAME, |region| put_template_in(region, update)).await
}

async fn reset_template_in(region: &Arc<Region>, version: i64) -> Result<String> {
    let template = alia_template(region).await?;
    let latest = template.latest_version().unwrap_or(version);
    let api = region.conn().await?;

    api.modify_default_version(template.template_id(), version).await?;
    let later: Vec<i64> = (version + 1..=latest).collect();
    if !later.is_empty() {
        api.delete_launch_template_versions(template.template_id(), &later).await?;
    }
    Ok(format!("reset to version {}, deleted {} later versions", version, later.len()))
}

/// Make `version` the default in every region and delete the versions after it
pub async fn reset_template(regions: &Regions, version: i64) -> Vec<Outcome> {
    per_region(regions, TEMPLATE_NAME, |region| reset_template_in(region, version)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::mock::{MockCompute, MockConnector};
    use crate::region::tests::context_with;
    use serde_json::json;

    fn alia_region(code: &str) -> MockCompute {
        MockCompute::new(code)
            .with_images(vec![
                json!({"ImageId": "ami-old", "Name": "alia-2018-01", "CreationDate": "2018-01-01T00:00:00.000Z", "BlockDeviceMappings": []}),
                json!({"ImageId": "ami-new", "Name": "alia-2018-02", "CreationDate": "2018-02-01T00:00:00.000Z", "BlockDeviceMappings": []}),
                json!({"ImageId": "ami-x", "Name": "ubuntu", "CreationDate": "2018-03-01T00:00:00.000Z", "BlockDeviceMappings": []}),
            ])
            .with_key_pairs(vec![json!({"KeyName": "alia", "KeyFingerprint": "aa:bb"})])
    }

    fn setup() -> (Regions, Arc<MockConnector>) {
        let connector = MockConnector::new()
            .with_region(alia_region("us-east-1"))
            .with_region(alia_region("us-west-2"));
        let (ctx, connector) = context_with(connector);
        (Regions::configured(ctx).unwrap(), connector)
    }

    #[tokio::test]
    async fn test_create_security_group_rules() {
        let (regions, connector) = setup();
        let outcomes = create_security_group(&regions).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.success));

        let data = connector.region("us-east-1").unwrap().data();
        let group = &data.security_groups[0];
        assert_eq!(group["GroupName"], "alia");
        let perms = group["IpPermissions"].as_array().unwrap();
        assert_eq!(perms.len(), 5);
        assert_eq!(perms[0]["UserIdGroupPairs"][0]["GroupId"], group["GroupId"]);
        assert_eq!(perms[2]["Ipv6Ranges"][0]["CidrIpv6"], "::/0");

        // second create collides
        let again = create_security_group(&regions).await;
        assert!(again.iter().all(|o| !o.success));
        assert!(again[0].message.contains("InvalidGroup.Duplicate"));
    }

    #[tokio::test]
    async fn test_authorize_revoke_destroy() {
        let (regions, connector) = setup();
        create_security_group(&regions).await;

        let outcomes = authorize_port(&regions, 8080, "10.0.0.1/32").await;
        assert!(outcomes.iter().all(|o| o.success));
        assert_eq!(outcomes[0].message, "authorized port 8080 for 10.0.0.1/32");

        let outcomes = revoke_port(&regions, 8080, "10.0.0.1/32").await;
        assert!(outcomes.iter().all(|o| o.success));
        let outcomes = revoke_port(&regions, 8080, "10.0.0.1/32").await;
        assert!(outcomes.iter().all(|o| !o.success));

        let outcomes = destroy_security_group(&regions).await;
        assert!(outcomes.iter().all(|o| o.success));
        assert!(connector.region("us-west-2").unwrap().data().security_groups.is_empty());

        let outcomes = destroy_security_group(&regions).await;
        assert!(outcomes[0].message.contains("no SecurityGroup"));
    }

    #[tokio::test]
    async fn test_failed_region_is_a_row() {
        let (regions, connector) = setup();
        connector.region("us-west-2").unwrap().fail_on("CreateSecurityGroup");

        let outcomes = create_security_group(&regions).await;
        assert!(outcomes[0].success);
        assert!(!outcomes[1].success);
        assert_eq!(outcomes[1].region, "us-west-2");
    }

    #[tokio::test]
    async fn test_template_requires_group() {
        let (regions, _) = setup();
        let outcomes = put_template(&regions, false).await;
        assert!(outcomes.iter().all(|o| !o.success));
        assert!(outcomes[0].message.contains("expected one alia security group"));
    }

    #[tokio::test]
    async fn test_template_create_update_reset() {
        let (regions, connector) = setup();
        create_security_group(&regions).await;

        let outcomes = put_template(&regions, false).await;
        assert!(outcomes.iter().all(|o| o.success), "{:?}", outcomes);
        assert_eq!(outcomes[0].message, "created launch template 'alia' from image 'alia-2018-02'");

        let mock = connector.region("us-east-1").unwrap();
        let data = mock.data();
        let template_id = data.launch_templates[0]["LaunchTemplateId"].as_str().unwrap().to_string();
        let payload = &data.template_versions[&template_id][&1];
        assert_eq!(payload["ImageId"], "ami-new");
        assert_eq!(payload["KeyName"], "alia");
        assert_eq!(payload["InstanceType"], "t2.micro");
        assert_eq!(payload["InstanceInitiatedShutdownBehavior"], "terminate");

        put_template(&regions, true).await;
        let outcomes = put_template(&regions, true).await;
        assert_eq!(outcomes[0].message, "default version 3 from image 'alia-2018-02'");
        assert_eq!(mock.data().launch_templates[0]["DefaultVersionNumber"], 3);

        let outcomes = reset_template(&regions, 1).await;
        assert!(outcomes.iter().all(|o| o.success), "{:?}", outcomes);
        assert_eq!(outcomes[0].message, "reset to version 1, deleted 2 later versions");

        let data = mock.data();
        assert_eq!(data.launch_templates[0]["DefaultVersionNumber"], 1);
        assert_eq!(data.launch_templates[0]["LatestVersionNumber"], 1);
        assert_eq!(data.template_versions[&template_id].len(), 1);
    }
}
