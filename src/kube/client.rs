use std::path::PathBuf;

use anyhow::{anyhow, Result};
use kube::{
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};

/// Thin wrapper over the kube client so call sites do not depend on how the
/// client was constructed (kubeconfig path, context selection).
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
}

impl KubeClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn as_client(&self) -> &Client {
        &self.client
    }

    pub fn to_client(&self) -> Client {
        self.client.clone()
    }

    /// Builds a client from the given kubeconfig path (falling back to the
    /// standard lookup) and context (falling back to the current context,
    /// then the first one defined).
    pub async fn try_from_kubeconfig(
        kubeconfig: Option<PathBuf>,
        context: Option<String>,
    ) -> Result<Self> {
        let kubeconfig = read_kubeconfig(kubeconfig)?;

        let context = select_context(&kubeconfig, context)?;

        let options = KubeConfigOptions {
            context: Some(context),
            ..Default::default()
        };

        let config = Config::from_custom_kubeconfig(kubeconfig, &options).await?;

        let client = Client::try_from(config)?;

        Ok(Self::new(client))
    }
}

fn read_kubeconfig(kubeconfig: Option<PathBuf>) -> Result<Kubeconfig> {
    let config = if let Some(path) = kubeconfig {
        Kubeconfig::read_from(path)?
    } else {
        Kubeconfig::read()?
    };

    Ok(config)
}

fn select_context(kubeconfig: &Kubeconfig, context: Option<String>) -> Result<String> {
    let context = if let Some(context) = context {
        kubeconfig
            .contexts
            .iter()
            .find_map(|ctx| (ctx.name == context).then(|| ctx.name.to_string()))
            .ok_or_else(|| anyhow!(format!("Cannot find context {}", context)))?
    } else if let Some(current_context) = &kubeconfig.current_context {
        current_context.to_string()
    } else {
        kubeconfig
            .contexts
            .first()
            .ok_or_else(|| anyhow!("Empty contexts"))?
            .name
            .to_string()
    };

    Ok(context)
}
