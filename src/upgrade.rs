use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use kube::ResourceExt;
use strum::Display;
use tokio::time::sleep;

use crate::{
    backup::{ConfigMapBackup, FileBackup},
    config::OverrideSource,
    error::Error,
    kube::{
        apis::{Gateway, ANNOTATION_NODEPORT_HTTP, ANNOTATION_NODEPORT_HTTPS, INSTANCE_LABEL},
        GatewayStore,
    },
    logger,
    release::ReleaseManager,
    resolve::GatewayRef,
    template::{render_values, TemplateEngine},
    values::apply_overrides,
};

/// Per-gateway progression. Terminal states are Done, Skipped and Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "PascalCase")]
pub enum UpgradeState {
    Pending,
    Eligible,
    BackedUp,
    Rendered,
    Applying,
    WaitingReady,
    Done,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStrategy {
    UpdateInPlace,
    RecreateWithIngressCleanup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupPolicy {
    File { dir: PathBuf },
    ConfigMap,
}

#[derive(Debug)]
pub struct UpgradeOutcome {
    pub gateway: GatewayRef,
    pub state: UpgradeState,
    pub message: String,
}

impl UpgradeOutcome {
    fn done(gateway: GatewayRef) -> Self {
        Self {
            gateway,
            state: UpgradeState::Done,
            message: "upgraded".to_string(),
        }
    }

    fn skipped(gateway: GatewayRef, message: impl Into<String>) -> Self {
        Self {
            gateway,
            state: UpgradeState::Skipped,
            message: message.into(),
        }
    }

    fn failed(gateway: GatewayRef, message: impl Into<String>) -> Self {
        Self {
            gateway,
            state: UpgradeState::Failed,
            message: message.into(),
        }
    }
}

pub struct Upgrader<'a> {
    pub store: &'a dyn GatewayStore,
    pub release: &'a dyn ReleaseManager,
    pub engine: &'a dyn TemplateEngine,
    pub target_version: String,
    pub override_source: OverrideSource,
    pub backup: Option<BackupPolicy>,
    pub strategy: ApplyStrategy,
    pub settle: Duration,
    pub wait_timeout: Duration,
}

impl Upgrader<'_> {
    /// Upgrades the batch strictly in order. The first Failed outcome aborts
    /// the remainder; Skipped gateways do not.
    pub async fn run(&self, gateways: Vec<Gateway>) -> Result<Vec<UpgradeOutcome>> {
        let full_names: Vec<String> = gateways
            .iter()
            .map(|gw| GatewayRef::of(gw).to_string())
            .collect();

        if let Some(BackupPolicy::File { dir }) = &self.backup {
            logger!(info, "start to backup gateways: {full_names:?}");

            FileBackup::new(dir).write_all(&gateways)?;
        }

        logger!(info, "start to upgrade gateways: {full_names:?}");

        let mut outcomes = Vec::with_capacity(gateways.len());

        for gateway in gateways {
            let reference = GatewayRef::of(&gateway);

            logger!(info, "begin to upgrade gateway {reference}");

            match self.upgrade_one(gateway).await {
                Ok(outcome) => {
                    logger!(info, "gateway {reference}: {} ({})", outcome.state, outcome.message);
                    outcomes.push(outcome);
                }
                Err(err) => {
                    logger!(error, "failed to upgrade gateway {reference}: {err:#}");
                    outcomes.push(UpgradeOutcome::failed(reference, format!("{err:#}")));
                    break;
                }
            }
        }

        Ok(outcomes)
    }

    async fn upgrade_one(&self, mut gateway: Gateway) -> Result<UpgradeOutcome> {
        let reference = GatewayRef::of(&gateway);
        let mut state = UpgradeState::Pending;

        loop {
            state = match state {
                UpgradeState::Pending => {
                    if gateway.is_deployed() && gateway.is_deployment_ready() {
                        UpgradeState::Eligible
                    } else {
                        logger!(warn, "gateway {reference} is not deployed and ready, will skip it");

                        return Ok(UpgradeOutcome::skipped(
                            reference,
                            "gateway is not deployed and ready",
                        ));
                    }
                }
                UpgradeState::Eligible => {
                    if let Some(BackupPolicy::ConfigMap) = &self.backup {
                        ConfigMapBackup::new(self.store).backup(&gateway).await?;
                    }

                    UpgradeState::BackedUp
                }
                UpgradeState::BackedUp => {
                    self.discover_node_ports(&mut gateway).await?;

                    UpgradeState::Rendered
                }
                UpgradeState::Rendered => {
                    let rendered = render_values(self.engine, &gateway)?;
                    let values =
                        apply_overrides(self.store, &rendered, &self.override_source).await?;

                    gateway.spec.values = serde_json::from_slice(&values).map_err(|err| {
                        Error::Apply(format!("merged values are not JSON: {err}"))
                    })?;
                    gateway.spec.app_version = self.target_version.clone();

                    UpgradeState::Applying
                }
                UpgradeState::Applying => {
                    match self.strategy {
                        ApplyStrategy::UpdateInPlace => self.update_in_place(&gateway).await?,
                        ApplyStrategy::RecreateWithIngressCleanup => {
                            self.recreate(&gateway).await?
                        }
                    }

                    UpgradeState::WaitingReady
                }
                UpgradeState::WaitingReady => {
                    let ready = self
                        .release
                        .wait_ready(&reference.namespace, &reference.name, self.wait_timeout)
                        .await?;

                    if !ready {
                        return Err(Error::ReadinessTimeout {
                            namespace: reference.namespace.clone(),
                            name: reference.name.clone(),
                        }
                        .into());
                    }

                    UpgradeState::Done
                }
                UpgradeState::Done => return Ok(UpgradeOutcome::done(reference)),
                UpgradeState::Skipped | UpgradeState::Failed => {
                    unreachable!("terminal states return directly")
                }
            };
        }
    }

    /// Copies allocated node ports into the gateway's annotations so the
    /// rendered values pin them instead of letting the chart reallocate.
    async fn discover_node_ports(&self, gateway: &mut Gateway) -> Result<()> {
        let namespace = gateway.namespace().unwrap_or_default();
        let name = gateway.name_any();

        let service = self.store.get_service(&namespace, &name).await?;

        let Some(spec) = service.spec else {
            return Ok(());
        };

        if spec.type_.as_deref() != Some("NodePort") {
            return Ok(());
        }

        let annotations = gateway.metadata.annotations.get_or_insert_with(Default::default);

        for port in spec.ports.into_iter().flatten() {
            let Some(node_port) = port.node_port else {
                continue;
            };

            match port.name.as_deref() {
                Some("http") => {
                    annotations
                        .insert(ANNOTATION_NODEPORT_HTTP.to_string(), node_port.to_string());
                }
                Some("https") => {
                    annotations
                        .insert(ANNOTATION_NODEPORT_HTTPS.to_string(), node_port.to_string());
                }
                _ => {}
            }
        }

        Ok(())
    }

    async fn update_in_place(&self, gateway: &Gateway) -> Result<()> {
        let reference = GatewayRef::of(gateway);

        self.store.update_gateway(gateway).await.map_err(|err| {
            Error::Apply(format!("failed to update gateway '{reference}': {err:#}"))
        })?;

        logger!(info, "update gateway CR successfully, gateway: {reference}");

        Ok(())
    }

    /// Tears the gateway down and recreates it under the target version. The
    /// ingress class is deleted first so the new release can claim the name.
    async fn recreate(&self, gateway: &Gateway) -> Result<()> {
        let reference = GatewayRef::of(gateway);

        let selector = format!("{INSTANCE_LABEL}={}", reference.name);

        let classes = self.store.list_ingress_classes(&selector).await?;

        if classes.len() != 1 {
            return Err(Error::Association(format!(
                "expected exactly one ingress class for gateway '{}', found {}",
                reference.name,
                classes.len()
            ))
            .into());
        }

        let class_name = classes[0].name_any();

        self.store.delete_ingress_class(&class_name).await?;

        logger!(info, "delete old ingress class {class_name} successfully");

        self.store
            .delete_gateway(&reference.namespace, &reference.name)
            .await
            .map_err(|err| {
                Error::Apply(format!("failed to delete gateway '{reference}': {err:#}"))
            })?;

        sleep(self.settle).await;

        let mut replacement = Gateway::new(&reference.name, gateway.spec.clone());
        replacement.metadata.namespace = Some(reference.namespace.clone());
        replacement.metadata.labels = gateway.metadata.labels.clone();
        replacement.metadata.annotations = gateway.metadata.annotations.clone();

        self.store.create_gateway(&replacement).await.map_err(|err| {
            Error::Apply(format!("failed to recreate gateway '{reference}': {err:#}"))
        })?;

        logger!(info, "recreate gateway CR successfully, gateway: {reference}");

        Ok(())
    }
}
