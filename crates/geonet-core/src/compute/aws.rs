//! `aws-sdk-ec2` backed compute client
//!
//! SDK output shapes are converted into the EC2 API's JSON field names so the
//! resource kinds see the same documents regardless of the client.

use std::sync::Arc;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_ec2::error::DisplayErrorContext;
use aws_sdk_ec2::types::{
    self as ec2, IpPermission, IpRange, Ipv6Range, LaunchTemplateTagSpecificationRequest,
    LaunchTemplatesMonitoringRequest, RequestLaunchTemplateData, ResourceType, ShutdownBehavior,
    UserIdGroupPair,
};
use aws_sdk_ec2::Client;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{ComputeApi, Connector, DescribeRequest, IngressRule, LaunchTemplateData};
use crate::error::{GeoNetError, Result};
use crate::serialize::encode_utc;

/// Opens SDK clients, optionally using a named credentials profile
#[derive(Debug, Clone, Default)]
pub struct AwsConnector {
    profile: Option<String>,
}

impl AwsConnector {
    pub fn new(profile: Option<String>) -> Self {
        Self { profile }
    }
}

#[async_trait]
impl Connector for AwsConnector {
    async fn connect(&self, region: &str) -> Result<Arc<dyn ComputeApi>> {
        debug!(region = %region, profile = ?self.profile, "Loading AWS configuration");

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()));
        if let Some(profile) = &self.profile {
            loader = loader.profile_name(profile);
        }
        let config = loader.load().await;

        Ok(Arc::new(AwsCompute {
            client: Client::new(&config),
            region: region.to_string(),
        }))
    }
}

/// EC2 client bound to one region
pub struct AwsCompute {
    client: Client,
    region: String,
}

impl AwsCompute {
    fn fail(&self, operation: &'static str, err: impl std::error::Error) -> GeoNetError {
        GeoNetError::transport(self.region.clone(), operation, DisplayErrorContext(err))
    }
}

fn filters(req: &DescribeRequest) -> Option<Vec<ec2::Filter>> {
    if req.filters.is_empty() {
        return None;
    }
    Some(
        req.filters
            .iter()
            .map(|f| {
                ec2::Filter::builder()
                    .name(&f.name)
                    .set_values(Some(f.values.clone()))
                    .build()
            })
            .collect(),
    )
}

fn ids(req: &DescribeRequest) -> Option<Vec<String>> {
    if req.ids.is_empty() {
        None
    } else {
        Some(req.ids.clone())
    }
}

fn permission(rule: &IngressRule) -> IpPermission {
    let mut builder = IpPermission::builder()
        .ip_protocol(&rule.protocol)
        .from_port(rule.from_port)
        .to_port(rule.to_port);
    for cidr in &rule.ipv4_ranges {
        builder = builder.ip_ranges(IpRange::builder().cidr_ip(cidr).build());
    }
    for cidr in &rule.ipv6_ranges {
        builder = builder.ipv6_ranges(Ipv6Range::builder().cidr_ipv6(cidr).build());
    }
    if let Some(group) = &rule.source_group {
        builder = builder.user_id_group_pairs(UserIdGroupPair::builder().group_id(group).build());
    }
    builder.build()
}

fn template_data(data: &LaunchTemplateData) -> RequestLaunchTemplateData {
    let specs = [
        (ResourceType::Instance, &data.instance_tags),
        (ResourceType::Volume, &data.volume_tags),
    ]
    .into_iter()
    .filter(|(_, tags)| !tags.is_empty())
    .map(|(resource, tags)| {
        tags.iter()
            .fold(
                LaunchTemplateTagSpecificationRequest::builder().resource_type(resource),
                |spec, (key, value)| spec.tags(ec2::Tag::builder().key(key).value(value).build()),
            )
            .build()
    })
    .collect();

    RequestLaunchTemplateData::builder()
        .image_id(&data.image_id)
        .instance_type(ec2::InstanceType::from(data.instance_type.as_str()))
        .key_name(&data.key_name)
        .set_security_group_ids(Some(data.security_group_ids.clone()))
        .monitoring(LaunchTemplatesMonitoringRequest::builder().enabled(data.monitoring).build())
        .instance_initiated_shutdown_behavior(ShutdownBehavior::from(
            data.instance_initiated_shutdown_behavior.as_str(),
        ))
        .set_tag_specifications(Some(specs))
        .build()
}

// ============== JSON conversion ==============

/// Record builder that skips absent fields
#[derive(Default)]
struct Doc(Map<String, Value>);

impl Doc {
    fn put<V: Into<Value>>(mut self, key: &str, value: Option<V>) -> Self {
        if let Some(value) = value {
            self.0.insert(key.to_string(), value.into());
        }
        self
    }

    fn list(mut self, key: &str, values: Vec<Value>) -> Self {
        self.0.insert(key.to_string(), Value::Array(values));
        self
    }

    fn build(self) -> Value {
        Value::Object(self.0)
    }
}

fn timestamp(ts: Option<&aws_sdk_ec2::primitives::DateTime>) -> Option<String> {
    let ts = ts?;
    chrono::DateTime::from_timestamp(ts.secs(), ts.subsec_nanos()).map(|dt| encode_utc(&dt))
}

fn tags_json(tags: &[ec2::Tag]) -> Vec<Value> {
    tags.iter()
        .map(|t| Doc::default().put("Key", t.key()).put("Value", t.value()).build())
        .collect()
}

fn state_json(state: Option<&ec2::InstanceState>) -> Value {
    match state {
        Some(state) => Doc::default()
            .put("Code", state.code())
            .put("Name", state.name().map(|n| n.as_str()))
            .build(),
        None => Value::Null,
    }
}

fn instance_json(instance: &ec2::Instance) -> Value {
    let groups = instance
        .security_groups()
        .iter()
        .map(|g| Doc::default().put("GroupId", g.group_id()).put("GroupName", g.group_name()).build())
        .collect();

    Doc::default()
        .put("InstanceId", instance.instance_id())
        .put("InstanceType", instance.instance_type().map(|t| t.as_str()))
        .put("ImageId", instance.image_id())
        .put("KeyName", instance.key_name())
        .put("State", Some(state_json(instance.state())))
        .put("LaunchTime", timestamp(instance.launch_time()))
        .put("PublicDnsName", instance.public_dns_name())
        .put("PublicIpAddress", instance.public_ip_address())
        .put("PrivateDnsName", instance.private_dns_name())
        .put("PrivateIpAddress", instance.private_ip_address())
        .put(
            "Placement",
            instance
                .placement()
                .map(|p| Doc::default().put("AvailabilityZone", p.availability_zone()).build()),
        )
        .list("SecurityGroups", groups)
        .list("Tags", tags_json(instance.tags()))
        .build()
}

fn state_change_json(change: &ec2::InstanceStateChange) -> Value {
    Doc::default()
        .put("InstanceId", change.instance_id())
        .put("CurrentState", Some(state_json(change.current_state())))
        .put("PreviousState", Some(state_json(change.previous_state())))
        .build()
}

fn volume_json(volume: &ec2::Volume) -> Value {
    let attachments = volume
        .attachments()
        .iter()
        .map(|a| {
            Doc::default()
                .put("InstanceId", a.instance_id())
                .put("Device", a.device())
                .put("State", a.state().map(|s| s.as_str()))
                .build()
        })
        .collect();

    Doc::default()
        .put("VolumeId", volume.volume_id())
        .put("Size", volume.size())
        .put("State", volume.state().map(|s| s.as_str()))
        .put("VolumeType", volume.volume_type().map(|t| t.as_str()))
        .put("AvailabilityZone", volume.availability_zone())
        .put("CreateTime", timestamp(volume.create_time()))
        .list("Attachments", attachments)
        .list("Tags", tags_json(volume.tags()))
        .build()
}

fn image_json(image: &ec2::Image) -> Value {
    let mappings = image
        .block_device_mappings()
        .iter()
        .map(|m| {
            let ebs = m.ebs().map(|ebs| {
                Doc::default()
                    .put("VolumeSize", ebs.volume_size())
                    .put("VolumeType", ebs.volume_type().map(|t| t.as_str()))
                    .put("SnapshotId", ebs.snapshot_id())
                    .put("DeleteOnTermination", ebs.delete_on_termination())
                    .build()
            });
            Doc::default().put("DeviceName", m.device_name()).put("Ebs", ebs).build()
        })
        .collect();

    Doc::default()
        .put("ImageId", image.image_id())
        .put("Name", image.name())
        .put("Description", image.description())
        .put("OwnerId", image.owner_id())
        .put("State", image.state().map(|s| s.as_str()))
        .put("CreationDate", image.creation_date())
        .list("BlockDeviceMappings", mappings)
        .list("Tags", tags_json(image.tags()))
        .build()
}

fn security_group_json(group: &ec2::SecurityGroup) -> Value {
    let permissions = group
        .ip_permissions()
        .iter()
        .map(|p| {
            let ranges = p.ip_ranges().iter().map(|r| Doc::default().put("CidrIp", r.cidr_ip()).build()).collect();
            let ranges_v6 = p
                .ipv6_ranges()
                .iter()
                .map(|r| Doc::default().put("CidrIpv6", r.cidr_ipv6()).build())
                .collect();
            let pairs = p
                .user_id_group_pairs()
                .iter()
                .map(|g| Doc::default().put("GroupId", g.group_id()).build())
                .collect();
            Doc::default()
                .put("IpProtocol", p.ip_protocol())
                .put("FromPort", p.from_port())
                .put("ToPort", p.to_port())
                .list("IpRanges", ranges)
                .list("Ipv6Ranges", ranges_v6)
                .list("UserIdGroupPairs", pairs)
                .build()
        })
        .collect();

    Doc::default()
        .put("GroupId", group.group_id())
        .put("GroupName", group.group_name())
        .put("Description", group.description())
        .put("VpcId", group.vpc_id())
        .put("OwnerId", group.owner_id())
        .list("IpPermissions", permissions)
        .list("Tags", tags_json(group.tags()))
        .build()
}

fn launch_template_json(template: &ec2::LaunchTemplate) -> Value {
    Doc::default()
        .put("LaunchTemplateId", template.launch_template_id())
        .put("LaunchTemplateName", template.launch_template_name())
        .put("CreateTime", timestamp(template.create_time()))
        .put("CreatedBy", template.created_by())
        .put("DefaultVersionNumber", template.default_version_number())
        .put("LatestVersionNumber", template.latest_version_number())
        .list("Tags", tags_json(template.tags()))
        .build()
}

fn doc(key: &str, items: Vec<Value>) -> Value {
    Doc::default().list(key, items).build()
}

#[async_trait]
impl ComputeApi for AwsCompute {
    fn region(&self) -> &str {
        &self.region
    }

    async fn describe_regions(&self) -> Result<Value> {
        let resp = self
            .client
            .describe_regions()
            .send()
            .await
            .map_err(|e| self.fail("DescribeRegions", e))?;

        let regions = resp
            .regions()
            .iter()
            .map(|r| {
                Doc::default()
                    .put("RegionName", r.region_name())
                    .put("Endpoint", r.endpoint())
                    .put("OptInStatus", r.opt_in_status())
                    .build()
            })
            .collect();
        Ok(doc("Regions", regions))
    }

    async fn describe_availability_zones(&self, req: &DescribeRequest) -> Result<Value> {
        let resp = self
            .client
            .describe_availability_zones()
            .set_zone_names(ids(req))
            .set_filters(filters(req))
            .send()
            .await
            .map_err(|e| self.fail("DescribeAvailabilityZones", e))?;

        let zones = resp
            .availability_zones()
            .iter()
            .map(|z| {
                let messages = z
                    .messages()
                    .iter()
                    .map(|m| Doc::default().put("Message", m.message()).build())
                    .collect();
                Doc::default()
                    .put("ZoneName", z.zone_name())
                    .put("ZoneId", z.zone_id())
                    .put("State", z.state().map(|s| s.as_str()))
                    .put("RegionName", z.region_name())
                    .list("Messages", messages)
                    .build()
            })
            .collect();
        Ok(doc("AvailabilityZones", zones))
    }

    async fn describe_instances(&self, req: &DescribeRequest) -> Result<Value> {
        let mut paginator = self
            .client
            .describe_instances()
            .set_instance_ids(ids(req))
            .set_filters(filters(req))
            .into_paginator()
            .send();

        let mut reservations = Vec::new();
        while let Some(page) = paginator
            .try_next()
            .await
            .map_err(|e| self.fail("DescribeInstances", e))?
        {
            for reservation in page.reservations() {
                let instances = reservation
                    .instances()
                    .iter()
                    .map(instance_json)
                    .collect();
                reservations.push(
                    Doc::default()
                        .put("ReservationId", reservation.reservation_id())
                        .put("OwnerId", reservation.owner_id())
                        .list("Instances", instances)
                        .build(),
                );
            }
        }
        Ok(doc("Reservations", reservations))
    }

    async fn describe_instance_status(&self, instance_ids: &[String]) -> Result<Value> {
        let mut paginator = self
            .client
            .describe_instance_status()
            .set_instance_ids(Some(instance_ids.to_vec()))
            .include_all_instances(false)
            .into_paginator()
            .send();

        let mut statuses = Vec::new();
        while let Some(page) = paginator
            .try_next()
            .await
            .map_err(|e| self.fail("DescribeInstanceStatus", e))?
        {
            for status in page.instance_statuses() {
                statuses.push(
                    Doc::default()
                        .put("InstanceId", status.instance_id())
                        .put("AvailabilityZone", status.availability_zone())
                        .put("InstanceState", Some(state_json(status.instance_state())))
                        .put(
                            "InstanceStatus",
                            status.instance_status().map(|s| {
                                Doc::default().put("Status", s.status().map(|v| v.as_str())).build()
                            }),
                        )
                        .put(
                            "SystemStatus",
                            status.system_status().map(|s| {
                                Doc::default().put("Status", s.status().map(|v| v.as_str())).build()
                            }),
                        )
                        .build(),
                );
            }
        }
        Ok(doc("InstanceStatuses", statuses))
    }

    async fn describe_volumes(&self, req: &DescribeRequest) -> Result<Value> {
        let mut paginator = self
            .client
            .describe_volumes()
            .set_volume_ids(ids(req))
            .set_filters(filters(req))
            .into_paginator()
            .send();

        let mut volumes = Vec::new();
        while let Some(page) = paginator
            .try_next()
            .await
            .map_err(|e| self.fail("DescribeVolumes", e))?
        {
            volumes.extend(page.volumes().iter().map(volume_json));
        }
        Ok(doc("Volumes", volumes))
    }

    async fn describe_key_pairs(&self, req: &DescribeRequest) -> Result<Value> {
        let resp = self
            .client
            .describe_key_pairs()
            .set_key_names(ids(req))
            .set_filters(filters(req))
            .send()
            .await
            .map_err(|e| self.fail("DescribeKeyPairs", e))?;

        let keys = resp
            .key_pairs()
            .iter()
            .map(|k| {
                Doc::default()
                    .put("KeyPairId", k.key_pair_id())
                    .put("KeyName", k.key_name())
                    .put("KeyFingerprint", k.key_fingerprint())
                    .list("Tags", tags_json(k.tags()))
                    .build()
            })
            .collect();
        Ok(doc("KeyPairs", keys))
    }

    async fn describe_launch_templates(&self, req: &DescribeRequest) -> Result<Value> {
        let mut paginator = self
            .client
            .describe_launch_templates()
            .set_launch_template_ids(ids(req))
            .set_filters(filters(req))
            .into_paginator()
            .send();

        let mut templates = Vec::new();
        while let Some(page) = paginator
            .try_next()
            .await
            .map_err(|e| self.fail("DescribeLaunchTemplates", e))?
        {
            templates.extend(page.launch_templates().iter().map(launch_template_json));
        }
        Ok(doc("LaunchTemplates", templates))
    }

    async fn describe_images(&self, req: &DescribeRequest) -> Result<Value> {
        let resp = self
            .client
            .describe_images()
            .set_image_ids(ids(req))
            .set_filters(filters(req))
            .send()
            .await
            .map_err(|e| self.fail("DescribeImages", e))?;

        Ok(doc("Images", resp.images().iter().map(image_json).collect()))
    }

    async fn describe_security_groups(&self, req: &DescribeRequest) -> Result<Value> {
        let mut paginator = self
            .client
            .describe_security_groups()
            .set_group_ids(ids(req))
            .set_filters(filters(req))
            .into_paginator()
            .send();

        let mut groups = Vec::new();
        while let Some(page) = paginator
            .try_next()
            .await
            .map_err(|e| self.fail("DescribeSecurityGroups", e))?
        {
            groups.extend(page.security_groups().iter().map(security_group_json));
        }
        Ok(doc("SecurityGroups", groups))
    }

    async fn describe_placement_groups(&self, req: &DescribeRequest) -> Result<Value> {
        let resp = self
            .client
            .describe_placement_groups()
            .set_group_names(ids(req))
            .set_filters(filters(req))
            .send()
            .await
            .map_err(|e| self.fail("DescribePlacementGroups", e))?;

        let groups = resp
            .placement_groups()
            .iter()
            .map(|g| {
                Doc::default()
                    .put("GroupName", g.group_name())
                    .put("GroupId", g.group_id())
                    .put("Strategy", g.strategy().map(|s| s.as_str()))
                    .put("State", g.state().map(|s| s.as_str()))
                    .list("Tags", tags_json(g.tags()))
                    .build()
            })
            .collect();
        Ok(doc("PlacementGroups", groups))
    }

    async fn start_instances(&self, instance_ids: &[String]) -> Result<Value> {
        info!(region = %self.region, count = instance_ids.len(), "Starting instances");
        let resp = self
            .client
            .start_instances()
            .set_instance_ids(Some(instance_ids.to_vec()))
            .send()
            .await
            .map_err(|e| self.fail("StartInstances", e))?;

        Ok(doc(
            "StartingInstances",
            resp.starting_instances().iter().map(state_change_json).collect(),
        ))
    }

    async fn stop_instances(&self, instance_ids: &[String]) -> Result<Value> {
        info!(region = %self.region, count = instance_ids.len(), "Stopping instances");
        let resp = self
            .client
            .stop_instances()
            .set_instance_ids(Some(instance_ids.to_vec()))
            .send()
            .await
            .map_err(|e| self.fail("StopInstances", e))?;

        Ok(doc(
            "StoppingInstances",
            resp.stopping_instances().iter().map(state_change_json).collect(),
        ))
    }

    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<Value> {
        info!(region = %self.region, count = instance_ids.len(), "Terminating instances");
        let resp = self
            .client
            .terminate_instances()
            .set_instance_ids(Some(instance_ids.to_vec()))
            .send()
            .await
            .map_err(|e| self.fail("TerminateInstances", e))?;

        Ok(doc(
            "TerminatingInstances",
            resp.terminating_instances().iter().map(state_change_json).collect(),
        ))
    }

    async fn create_security_group(&self, name: &str, description: &str) -> Result<String> {
        let resp = self
            .client
            .create_security_group()
            .group_name(name)
            .description(description)
            .send()
            .await
            .map_err(|e| self.fail("CreateSecurityGroup", e))?;

        resp.group_id()
            .map(String::from)
            .ok_or_else(|| GeoNetError::transport(self.region.clone(), "CreateSecurityGroup", "no group id in response"))
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<()> {
        self.client
            .delete_security_group()
            .group_id(group_id)
            .send()
            .await
            .map_err(|e| self.fail("DeleteSecurityGroup", e))?;
        Ok(())
    }

    async fn authorize_ingress(&self, group_id: &str, rules: &[IngressRule]) -> Result<()> {
        self.client
            .authorize_security_group_ingress()
            .group_id(group_id)
            .set_ip_permissions(Some(rules.iter().map(permission).collect()))
            .send()
            .await
            .map_err(|e| self.fail("AuthorizeSecurityGroupIngress", e))?;
        Ok(())
    }

    async fn revoke_ingress(&self, group_id: &str, rules: &[IngressRule]) -> Result<()> {
        self.client
            .revoke_security_group_ingress()
            .group_id(group_id)
            .set_ip_permissions(Some(rules.iter().map(permission).collect()))
            .send()
            .await
            .map_err(|e| self.fail("RevokeSecurityGroupIngress", e))?;
        Ok(())
    }

    async fn create_launch_template(&self, name: &str, data: &LaunchTemplateData) -> Result<Value> {
        let resp = self
            .client
            .create_launch_template()
            .launch_template_name(name)
            .launch_template_data(template_data(data))
            .send()
            .await
            .map_err(|e| self.fail("CreateLaunchTemplate", e))?;

        resp.launch_template()
            .map(launch_template_json)
            .ok_or_else(|| GeoNetError::transport(self.region.clone(), "CreateLaunchTemplate", "no template in response"))
    }

    async fn create_launch_template_version(&self, template_id: &str, data: &LaunchTemplateData) -> Result<i64> {
        let resp = self
            .client
            .create_launch_template_version()
            .launch_template_id(template_id)
            .launch_template_data(template_data(data))
            .send()
            .await
            .map_err(|e| self.fail("CreateLaunchTemplateVersion", e))?;

        resp.launch_template_version()
            .and_then(|v| v.version_number())
            .ok_or_else(|| {
                GeoNetError::transport(self.region.clone(), "CreateLaunchTemplateVersion", "no version in response")
            })
    }

    async fn modify_default_version(&self, template_id: &str, version: i64) -> Result<()> {
        self.client
            .modify_launch_template()
            .launch_template_id(template_id)
            .default_version(version.to_string())
            .send()
            .await
            .map_err(|e| self.fail("ModifyLaunchTemplate", e))?;
        Ok(())
    }

    async fn delete_launch_template_versions(&self, template_id: &str, versions: &[i64]) -> Result<()> {
        let resp = self
            .client
            .delete_launch_template_versions()
            .launch_template_id(template_id)
            .set_versions(Some(versions.iter().map(i64::to_string).collect()))
            .send()
            .await
            .map_err(|e| self.fail("DeleteLaunchTemplateVersions", e))?;

        let failed: Vec<String> = resp
            .unsuccessfully_deleted_launch_template_versions()
            .iter()
            .filter_map(|v| v.version_number())
            .map(|v| v.to_string())
            .collect();
        if !failed.is_empty() {
            return Err(GeoNetError::transport(
                self.region.clone(),
                "DeleteLaunchTemplateVersions",
                format!("could not delete versions {}", failed.join(", ")),
            ));
        }
        Ok(())
    }
}
