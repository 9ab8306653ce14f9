use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{bail, Result};
use tokio::runtime::Runtime;

use crate::{
    cmd::Command,
    config::Config,
    kube::{GatewayStore, KubeClient},
    logger,
    release::HelmReleaseManager,
    resolve::{Resolver, Selector, VersionPolicy},
    template::ValuesTemplate,
    upgrade::{UpgradeState, Upgrader},
};

pub struct App;

impl App {
    pub fn run(cmd: Command, config: Config) -> Result<()> {
        let terminated = Arc::new(AtomicBool::new(false));

        let flag = terminated.clone();
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::Relaxed);
        })?;

        let runtime = Runtime::new()?;

        runtime.block_on(Self::run_inner(cmd, config, terminated))
    }

    async fn run_inner(
        cmd: Command,
        config: Config,
        terminated: Arc<AtomicBool>,
    ) -> Result<()> {
        let client = KubeClient::try_from_kubeconfig(cmd.kubeconfig.clone(), cmd.context.clone())
            .await?;

        let target_version = cmd
            .target_version
            .clone()
            .unwrap_or_else(|| config.upgrade.target_version.clone());

        let policy = VersionPolicy {
            target_version: target_version.clone(),
            specific_app_version: cmd.specific_app_version.clone(),
        };

        let selector = Selector::parse(&cmd.gateways, &config.upgrade.control_namespace)?;

        let resolver = Resolver::new(&client, policy);

        let gateways = resolver.resolve(&selector).await?;

        if gateways.is_empty() {
            logger!(info, "no gateways need to upgrade");
            println!("No gateways need to upgrade");
            return Ok(());
        }

        let backup = if cmd.backup_enabled || config.backup.enabled {
            let dir = cmd.backup_dir.clone().unwrap_or_else(|| config.backup.dir.clone());

            Some(cmd.backup_policy.to_policy(dir))
        } else {
            None
        };

        let release = HelmReleaseManager::new(
            client.clone(),
            config.wait.settle(),
            config.wait.interval(),
            terminated,
        );

        let engine = ValuesTemplate::default_template()?;

        let upgrader = Upgrader {
            store: &client as &dyn GatewayStore,
            release: &release,
            engine: &engine,
            target_version,
            override_source: config.override_source.clone(),
            backup,
            strategy: cmd.strategy.into(),
            settle: config.wait.settle(),
            wait_timeout: config.wait.timeout(),
        };

        let outcomes = upgrader.run(gateways).await?;

        let mut failed = false;

        for outcome in &outcomes {
            println!("{}: {} ({})", outcome.gateway, outcome.state, outcome.message);

            if outcome.state == UpgradeState::Failed {
                failed = true;
            }
        }

        if failed {
            bail!("one or more gateways failed to upgrade");
        }

        Ok(())
    }
}
