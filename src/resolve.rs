mod parser;

use std::fmt;

use anyhow::Result;

use crate::{
    error::Error,
    kube::{apis::Gateway, GatewayStore},
    logger,
};

use kube::ResourceExt;

use parser::{parse_selector, SelectorEntry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayRef {
    pub namespace: String,
    pub name: String,
}

impl GatewayRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of(gateway: &Gateway) -> Self {
        Self {
            namespace: gateway.namespace().unwrap_or_default(),
            name: gateway.name_any(),
        }
    }
}

impl fmt::Display for GatewayRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Parsed form of the `--gateways` argument. A wildcard anywhere in the list
/// means "all eligible gateways cluster-wide".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    All,
    Refs(Vec<GatewayRef>),
}

impl Selector {
    pub fn parse(selector: &str, default_namespace: &str) -> Result<Self> {
        let (_, entries) = parse_selector::<nom::error::Error<_>>(selector).map_err(|err| {
            Error::Resolution(format!("invalid gateway selector '{selector}': {err}"))
        })?;

        if entries.iter().any(|e| matches!(e, SelectorEntry::Wildcard)) {
            return Ok(Self::All);
        }

        let mut refs: Vec<GatewayRef> = Vec::with_capacity(entries.len());

        for entry in entries {
            let reference = match entry {
                SelectorEntry::Qualified { namespace, name } => GatewayRef::new(namespace, name),
                SelectorEntry::Bare(name) => GatewayRef::new(default_namespace, name),
                SelectorEntry::Wildcard => unreachable!(),
            };

            if !refs.contains(&reference) {
                refs.push(reference);
            }
        }

        Ok(Self::Refs(refs))
    }
}

/// Version eligibility rule: a gateway is selected when it explicitly matches
/// the requested source version, or, absent that filter, when it is not
/// already on the target version.
#[derive(Debug, Clone)]
pub struct VersionPolicy {
    pub target_version: String,
    pub specific_app_version: Option<String>,
}

impl VersionPolicy {
    pub fn eligible(&self, app_version: &str) -> bool {
        if let Some(specific) = self
            .specific_app_version
            .as_deref()
            .filter(|v| !v.is_empty())
        {
            if app_version == specific {
                return true;
            }
        }

        app_version != self.target_version
    }
}

pub struct Resolver<'a> {
    store: &'a dyn GatewayStore,
    policy: VersionPolicy,
}

impl<'a> Resolver<'a> {
    pub fn new(store: &'a dyn GatewayStore, policy: VersionPolicy) -> Self {
        Self { store, policy }
    }

    /// Expands the selector into the concrete list of gateways to upgrade.
    /// Explicit entries that cannot be fetched abort resolution; a typo'd
    /// name must surface instead of being silently dropped. Entries that
    /// exist but fail the version check are logged and excluded.
    pub async fn resolve(&self, selector: &Selector) -> Result<Vec<Gateway>> {
        match selector {
            Selector::All => self.resolve_all().await,
            Selector::Refs(refs) => self.resolve_refs(refs).await,
        }
    }

    async fn resolve_all(&self) -> Result<Vec<Gateway>> {
        let gateways = self
            .store
            .list_gateways()
            .await
            .map_err(|err| Error::Resolution(format!("failed to list gateways: {err:#}")))?;

        Ok(gateways
            .into_iter()
            .filter(|gw| self.check_eligible(gw))
            .collect())
    }

    async fn resolve_refs(&self, refs: &[GatewayRef]) -> Result<Vec<Gateway>> {
        let mut gateways = Vec::with_capacity(refs.len());

        for reference in refs {
            let gateway = self
                .store
                .get_gateway(&reference.namespace, &reference.name)
                .await
                .map_err(|err| {
                    Error::Resolution(format!("failed to get gateway '{reference}': {err:#}"))
                })?;

            if self.check_eligible(&gateway) {
                gateways.push(gateway);
            }
        }

        Ok(gateways)
    }

    fn check_eligible(&self, gateway: &Gateway) -> bool {
        let eligible = self.policy.eligible(&gateway.spec.app_version);

        if !eligible {
            logger!(
                warn,
                "invalid gateway {}: app version does not match, will skip it",
                GatewayRef::of(gateway)
            );
        }

        eligible
    }
}
