//! Instance reconciler
//!
//! Identity is the `Name` tag, or an id of the form `i-` followed by 8 or 17
//! hex digits. Image, type and subnet are fixed at launch. Tags are
//! enforced for declared keys only.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Reconciler, Teardown};
use crate::engine::ReconcileContext;
use crate::error::{Error, ProviderErrorKind, Result};
use crate::state::{InstanceState, InstanceStatus, NAME_TAG, Tags};
use crate::traits::{Identity, Operation};
use crate::wait::{Absence, WaitFor};

/// Declared instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSpec {
    /// Required for launch, immutable
    pub image_id: Option<String>,
    /// Immutable
    pub instance_type: Option<String>,
    /// Immutable
    pub subnet_id: Option<String>,
    /// Only these keys are enforced
    pub tags: Option<Tags>,
}

impl InstanceSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, image_id: impl Into<String>) -> Self {
        self.image_id = Some(image_id.into());
        self
    }

    pub fn with_instance_type(mut self, instance_type: impl Into<String>) -> Self {
        self.instance_type = Some(instance_type.into());
        self
    }

    pub fn with_subnet(mut self, subnet_id: impl Into<String>) -> Self {
        self.subnet_id = Some(subnet_id.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags
            .get_or_insert_with(Tags::new)
            .insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceChange {
    /// Tags to (over)write
    Tags(Tags),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InstanceReconciler;

fn instance_label(identity: &Identity, instance: &InstanceState) -> String {
    let name = instance
        .tags
        .get(NAME_TAG)
        .map(String::as_str)
        .unwrap_or(identity.name.as_str());
    if name == instance.id {
        instance.id.clone()
    } else {
        format!("{} ({})", name, instance.id)
    }
}

/// Tags the instance must carry: the declared ones plus `Name`
fn wanted_tags(identity: &Identity, desired: &InstanceSpec) -> Tags {
    let mut tags = desired.tags.clone().unwrap_or_default();
    if identity.provider_id.as_deref() != Some(identity.name.as_str()) {
        tags.insert(NAME_TAG.to_string(), identity.name.clone());
    }
    tags
}

#[async_trait]
impl Teardown for InstanceReconciler {
    type Current = InstanceState;

    fn is_absent(&self, current: &InstanceState) -> bool {
        current.is_terminated()
    }

    async fn apply_destroy(
        &self,
        ctx: &ReconcileContext<'_>,
        identity: &Identity,
        current: &InstanceState,
    ) -> Result<()> {
        let label = instance_label(identity, current);

        ctx.apply(
            format!("terminate instance {} in {}", label, ctx.region()),
            ctx.call(Operation::TerminateInstance {
                instance_id: current.id.clone(),
            }),
        )
        .await?;

        let by_id = Identity::for_id(&current.id);
        let by_id = &by_id;
        ctx.apply(format!("wait until instance {} is terminated", label), async move {
            ctx.wait_for(
                &WaitFor::new(format!("instance {}", by_id.name), [InstanceStatus::Terminated])
                    .when_absent(Absence::Satisfies)
                    .tolerating(ProviderErrorKind::NotFound),
                move || async move {
                    Ok(ctx
                        .find_once_as::<InstanceState>(by_id)
                        .await?
                        .map(|instance| instance.status))
                },
            )
            .await
        })
        .await?;

        Ok(())
    }
}

#[async_trait]
impl Reconciler for InstanceReconciler {
    type Desired = InstanceSpec;
    type Change = InstanceChange;

    fn validate(&self, identity: &Identity, desired: &InstanceSpec) -> Result<()> {
        if let Some(tags) = &desired.tags {
            if let Some(name) = tags.get(NAME_TAG).filter(|n| **n != identity.name) {
                if identity.provider_id.is_none() {
                    return Err(Error::invalid_input(format!(
                        "tag {} = {} contradicts instance name {}",
                        NAME_TAG, name, identity.name
                    )));
                }
            }
        }
        Ok(())
    }

    fn diff(
        &self,
        identity: &Identity,
        desired: &InstanceSpec,
        current: &InstanceState,
    ) -> Result<Vec<InstanceChange>> {
        let resource = format!("instance {}", instance_label(identity, current));

        if let Some(image) = desired.image_id.as_ref().filter(|i| **i != current.image_id) {
            return Err(Error::immutable(resource, "image_id", image, &current.image_id));
        }
        if let Some(kind) = desired.instance_type.as_ref().filter(|t| **t != current.instance_type) {
            return Err(Error::immutable(resource, "instance_type", kind, &current.instance_type));
        }
        if let Some(subnet) = &desired.subnet_id {
            if current.subnet_id.as_ref() != Some(subnet) {
                return Err(Error::immutable(
                    resource,
                    "subnet_id",
                    subnet,
                    current.subnet_id.as_deref().unwrap_or("none"),
                ));
            }
        }

        let drift: Tags = wanted_tags(identity, desired)
            .into_iter()
            .filter(|(key, value)| current.tags.get(key) != Some(value))
            .collect();

        Ok(if drift.is_empty() {
            Vec::new()
        } else {
            vec![InstanceChange::Tags(drift)]
        })
    }

    async fn apply_create(
        &self,
        ctx: &ReconcileContext<'_>,
        identity: &Identity,
        desired: &InstanceSpec,
    ) -> Result<Option<InstanceState>> {
        let image_id = desired
            .image_id
            .clone()
            .ok_or_else(|| Error::missing(format!("instance {}", identity), "image_id"))?;

        let description = format!(
            "create instance {} from {} in {}",
            identity.name,
            image_id,
            ctx.region()
        );

        let created = ctx
            .apply(description, async {
                let instance_id = ctx
                    .create(Operation::RunInstance {
                        image_id: image_id.clone(),
                        instance_type: desired.instance_type.clone(),
                        subnet_id: desired.subnet_id.clone(),
                    })
                    .await?;
                ctx.progress(&format!("instance {} launched as {}", identity.name, instance_id));

                let by_id = Identity::for_id(&instance_id);
                let by_id = &by_id;
                ctx.wait_for(
                    &WaitFor::new(format!("instance {}", instance_id), [InstanceStatus::Running])
                        .failing_on([InstanceStatus::ShuttingDown, InstanceStatus::Terminated])
                        .tolerating(ProviderErrorKind::NotFound),
                    move || async move {
                        Ok(ctx
                            .find_once_as::<InstanceState>(by_id)
                            .await?
                            .map(|instance| instance.status))
                    },
                )
                .await?;

                ctx.call_with(
                    &ctx.propagation_policy(),
                    Operation::CreateTags {
                        resource_id: instance_id.clone(),
                        tags: wanted_tags(identity, desired),
                    },
                )
                .await?;

                Ok(instance_id)
            })
            .await?;

        let Some(instance_id) = created else {
            return Ok(None);
        };

        info!("Instance {} is running as {}", identity.name, instance_id);
        Ok(Some(ctx.require::<InstanceState>(&instance_id).await?))
    }

    async fn apply_update(
        &self,
        ctx: &ReconcileContext<'_>,
        identity: &Identity,
        current: InstanceState,
        changes: Vec<InstanceChange>,
    ) -> Result<InstanceState> {
        let label = instance_label(identity, &current);

        for change in changes {
            let InstanceChange::Tags(tags) = change;
            let keys: Vec<&str> = tags.keys().map(String::as_str).collect();
            let description = format!("update tags {} on instance {}", keys.join(", "), label);
            ctx.apply(
                description,
                ctx.call(Operation::CreateTags {
                    resource_id: current.id.clone(),
                    tags: tags.clone(),
                }),
            )
            .await?;
        }

        if ctx.dry_run() {
            return Ok(current);
        }
        ctx.require::<InstanceState>(&current.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running() -> InstanceState {
        InstanceState {
            id: "i-0123abcd".to_string(),
            status: InstanceStatus::Running,
            image_id: "ami-11111111".to_string(),
            instance_type: "t3.micro".to_string(),
            vpc_id: Some("vpc-1234abcd".to_string()),
            subnet_id: Some("subnet-1234abcd".to_string()),
            tags: Tags::from([
                (NAME_TAG.to_string(), "web".to_string()),
                ("team".to_string(), "infra".to_string()),
            ]),
        }
    }

    #[test]
    fn undeclared_tags_are_left_alone() {
        let changes = InstanceReconciler
            .diff(&Identity::named("web"), &InstanceSpec::new(), &running())
            .expect("diff");
        assert!(changes.is_empty());
    }

    #[test]
    fn only_drifted_tags_are_written() {
        let desired = InstanceSpec::new().with_tag("team", "infra").with_tag("env", "prod");
        let changes = InstanceReconciler
            .diff(&Identity::named("web"), &desired, &running())
            .expect("diff");
        assert_eq!(
            changes,
            vec![InstanceChange::Tags(Tags::from([("env".to_string(), "prod".to_string())]))]
        );
    }

    #[test]
    fn image_is_immutable() {
        let desired = InstanceSpec::new().with_image("ami-22222222");
        let err = InstanceReconciler
            .diff(&Identity::named("web"), &desired, &running())
            .unwrap_err();
        match err {
            Error::ImmutableAttributeConflict { desired, current, .. } => {
                assert_eq!(desired, "ami-22222222");
                assert_eq!(current, "ami-11111111");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn terminated_counts_as_absent() {
        let mut instance = running();
        instance.status = InstanceStatus::Terminated;
        assert!(InstanceReconciler.is_absent(&instance));
    }
}
