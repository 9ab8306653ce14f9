use std::{
    future::Future,
    io::Read,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use flate2::read::GzDecoder;
use k8s_openapi::api::{
    apps::v1::{DaemonSet, Deployment, StatefulSet},
    core::v1::{Endpoints, Secret, Service},
};
use kube::{api::ListParams, Api};
use serde::Deserialize;
use tokio::time::{sleep, Instant};

use crate::{error::Error, kube::KubeClient, logger};

/// Read side of the Helm release backing a gateway. The chart release shares
/// the gateway's name and namespace.
#[async_trait]
pub trait ReleaseManager: Send + Sync {
    async fn render_manifest(&self, namespace: &str, name: &str) -> Result<String>;

    /// Polls the release's workloads until all are ready or the timeout
    /// elapses. `Ok(false)` is a timeout, `Err` is an interrupted or failed
    /// poll.
    async fn wait_ready(&self, namespace: &str, name: &str, timeout: Duration) -> Result<bool>;
}

pub struct HelmReleaseManager {
    client: KubeClient,
    settle: Duration,
    interval: Duration,
    terminated: Arc<AtomicBool>,
}

impl HelmReleaseManager {
    pub fn new(
        client: KubeClient,
        settle: Duration,
        interval: Duration,
        terminated: Arc<AtomicBool>,
    ) -> Self {
        Self {
            client,
            settle,
            interval,
            terminated,
        }
    }
}

#[async_trait]
impl ReleaseManager for HelmReleaseManager {
    async fn render_manifest(&self, namespace: &str, name: &str) -> Result<String> {
        let api: Api<Secret> = Api::namespaced(self.client.to_client(), namespace);

        let params = ListParams::default().labels(&format!("name={name},owner=helm"));

        let secrets = api.list(&params).await.map_err(Error::Kube)?;

        let secret = latest_release_secret(secrets.items).ok_or_else(|| {
            Error::Apply(format!("no helm release found for '{namespace}/{name}'"))
        })?;

        let release = decode_release(&secret)?;

        release
            .get("manifest")
            .and_then(|manifest| manifest.as_str())
            .map(ToString::to_string)
            .ok_or_else(|| {
                Error::Apply(format!("helm release '{namespace}/{name}' has no manifest")).into()
            })
    }

    async fn wait_ready(&self, namespace: &str, name: &str, timeout: Duration) -> Result<bool> {
        // Give the operator a moment to reconcile before the first poll, a
        // just-updated CR still points at the old workloads.
        sleep(self.settle).await;

        check_cancelled(&self.terminated)?;

        let manifest = self.render_manifest(namespace, name).await?;
        let resources = manifest_resources(&manifest, namespace);

        logger!(
            info,
            "waiting for {} resource(s) of release {namespace}/{name}",
            resources.len()
        );

        let deadline = Instant::now() + timeout;

        poll_until_ready(&self.terminated, deadline, self.interval, || {
            self.all_ready(&resources)
        })
        .await
    }
}

fn check_cancelled(terminated: &AtomicBool) -> Result<()> {
    if terminated.load(Ordering::Relaxed) {
        return Err(Error::Apply("wait for release cancelled".into()).into());
    }

    Ok(())
}

/// Drives `poll` until it reports ready, the deadline passes, or the
/// termination flag is raised. The flag is re-checked before every poll so
/// cancellation never waits out a full interval chain.
async fn poll_until_ready<F, Fut>(
    terminated: &AtomicBool,
    deadline: Instant,
    interval: Duration,
    mut poll: F,
) -> Result<bool>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    loop {
        check_cancelled(terminated)?;

        if poll().await? {
            return Ok(true);
        }

        if Instant::now() >= deadline {
            return Ok(false);
        }

        sleep(interval).await;
    }
}

impl HelmReleaseManager {
    async fn all_ready(&self, resources: &[ManifestResource]) -> Result<bool> {
        for resource in resources {
            if !self.resource_ready(resource).await? {
                logger!(
                    info,
                    "{} {}/{} is not ready yet",
                    resource.kind,
                    resource.namespace,
                    resource.name
                );

                return Ok(false);
            }
        }

        Ok(true)
    }

    async fn resource_ready(&self, resource: &ManifestResource) -> Result<bool> {
        let client = self.client.to_client();
        let namespace = resource.namespace.as_str();
        let name = resource.name.as_str();

        let ready = match resource.kind.as_str() {
            "Deployment" => {
                let api: Api<Deployment> = Api::namespaced(client, namespace);

                api.get_opt(name)
                    .await
                    .map_err(Error::Kube)?
                    .is_some_and(deployment_ready)
            }
            "StatefulSet" => {
                let api: Api<StatefulSet> = Api::namespaced(client, namespace);

                api.get_opt(name)
                    .await
                    .map_err(Error::Kube)?
                    .is_some_and(stateful_set_ready)
            }
            "DaemonSet" => {
                let api: Api<DaemonSet> = Api::namespaced(client, namespace);

                api.get_opt(name)
                    .await
                    .map_err(Error::Kube)?
                    .is_some_and(daemon_set_ready)
            }
            "Service" => {
                let api: Api<Service> = Api::namespaced(client.clone(), namespace);

                match api.get_opt(name).await.map_err(Error::Kube)? {
                    Some(service) if service_needs_endpoints(&service) => {
                        let endpoints: Api<Endpoints> = Api::namespaced(client, namespace);

                        endpoints
                            .get_opt(name)
                            .await
                            .map_err(Error::Kube)?
                            .is_some_and(endpoints_ready)
                    }
                    Some(_) => true,
                    None => false,
                }
            }
            // ConfigMaps, ServiceAccounts and the like have no rollout.
            _ => true,
        };

        Ok(ready)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ManifestResource {
    kind: String,
    namespace: String,
    name: String,
}

/// Helm stores a release as a versioned Secret; the newest version reflects
/// what is deployed.
fn latest_release_secret(secrets: Vec<Secret>) -> Option<Secret> {
    secrets.into_iter().max_by_key(release_version)
}

fn release_version(secret: &Secret) -> u64 {
    secret
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get("version"))
        .and_then(|version| version.parse().ok())
        .or_else(|| {
            // sh.helm.release.v1.<name>.v<N>
            secret
                .metadata
                .name
                .as_ref()
                .and_then(|name| name.rsplit(".v").next())
                .and_then(|version| version.parse().ok())
        })
        .unwrap_or_default()
}

/// Release payloads are base64 inside the Secret data, then gzip, then JSON.
fn decode_release(secret: &Secret) -> Result<serde_json::Value> {
    let data = secret
        .data
        .as_ref()
        .and_then(|data| data.get("release"))
        .ok_or_else(|| Error::Apply("helm release secret has no payload".into()))?;

    let compressed = STANDARD
        .decode(&data.0)
        .map_err(|err| Error::Apply(format!("helm release payload is not base64: {err}")))?;

    let mut decoder = GzDecoder::new(&compressed[..]);
    let mut json = String::new();

    decoder
        .read_to_string(&mut json)
        .map_err(|err| Error::Apply(format!("helm release payload is not gzip: {err}")))?;

    serde_json::from_str(&json)
        .map_err(|err| Error::Apply(format!("helm release payload is not JSON: {err}")).into())
}

/// Extracts kind/namespace/name from every document in the release manifest.
/// Namespaceless documents belong to the release namespace.
fn manifest_resources(manifest: &str, release_namespace: &str) -> Vec<ManifestResource> {
    let mut resources = Vec::new();

    for document in serde_yaml::Deserializer::from_str(manifest) {
        let Ok(value) = serde_yaml::Value::deserialize(document) else {
            continue;
        };

        let Some(kind) = value.get("kind").and_then(|kind| kind.as_str()) else {
            continue;
        };

        let Some(name) = value
            .get("metadata")
            .and_then(|meta| meta.get("name"))
            .and_then(|name| name.as_str())
        else {
            continue;
        };

        let namespace = value
            .get("metadata")
            .and_then(|meta| meta.get("namespace"))
            .and_then(|namespace| namespace.as_str())
            .unwrap_or(release_namespace);

        resources.push(ManifestResource {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
    }

    resources
}

fn deployment_ready(deployment: Deployment) -> bool {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(1);

    deployment
        .status
        .as_ref()
        .and_then(|status| status.available_replicas)
        .unwrap_or_default()
        >= desired
}

fn stateful_set_ready(stateful_set: StatefulSet) -> bool {
    let desired = stateful_set
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(1);

    stateful_set
        .status
        .as_ref()
        .and_then(|status| status.ready_replicas)
        .unwrap_or_default()
        >= desired
}

fn daemon_set_ready(daemon_set: DaemonSet) -> bool {
    daemon_set
        .status
        .as_ref()
        .map(|status| status.number_ready >= status.desired_number_scheduled)
        .unwrap_or_default()
}

fn service_needs_endpoints(service: &Service) -> bool {
    let Some(spec) = service.spec.as_ref() else {
        return false;
    };

    if spec.type_.as_deref() == Some("ExternalName") {
        return false;
    }

    spec.selector
        .as_ref()
        .map(|selector| !selector.is_empty())
        .unwrap_or_default()
}

fn endpoints_ready(endpoints: Endpoints) -> bool {
    endpoints
        .subsets
        .iter()
        .flatten()
        .any(|subset| subset.addresses.iter().flatten().next().is_some())
}


#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{write::GzEncoder, Compression};
    use indoc::indoc;
    use k8s_openapi::{
        api::apps::v1::{DeploymentSpec, DeploymentStatus},
        apimachinery::pkg::apis::meta::v1::ObjectMeta,
        ByteString,
    };
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::io::Write;

    fn release_secret(name: &str, version_label: Option<&str>) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: version_label.map(|version| {
                    [
                        ("owner".to_string(), "helm".to_string()),
                        ("version".to_string(), version.to_string()),
                    ]
                    .into()
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn newest_release_version_wins() {
        let secrets = vec![
            release_secret("sh.helm.release.v1.gw.v1", Some("1")),
            release_secret("sh.helm.release.v1.gw.v10", Some("10")),
            release_secret("sh.helm.release.v1.gw.v2", Some("2")),
        ];

        let latest = latest_release_secret(secrets).unwrap();

        assert_eq!(
            latest.metadata.name.as_deref(),
            Some("sh.helm.release.v1.gw.v10")
        );
    }

    #[test]
    fn release_version_falls_back_to_the_secret_name() {
        let secret = release_secret("sh.helm.release.v1.gw.v7", None);

        assert_eq!(release_version(&secret), 7);
    }

    #[test]
    fn decodes_gzipped_release_payload() {
        let release = serde_json::json!({
            "name": "kubesphere-router-demo",
            "manifest": "apiVersion: v1\nkind: Service\n"
        });

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(release.to_string().as_bytes())
            .unwrap();
        let compressed = encoder.finish().unwrap();

        let secret = Secret {
            data: Some(
                [(
                    "release".to_string(),
                    ByteString(STANDARD.encode(compressed).into_bytes()),
                )]
                .into(),
            ),
            ..Default::default()
        };

        let decoded = decode_release(&secret).unwrap();

        assert_eq!(decoded["name"], release["name"]);
        assert_eq!(decoded["manifest"], release["manifest"]);
    }

    #[test]
    fn manifest_documents_resolve_namespaces() {
        let manifest = indoc! {"
            ---
            apiVersion: v1
            kind: ServiceAccount
            metadata:
              name: kubesphere-router-demo
            ---
            apiVersion: apps/v1
            kind: Deployment
            metadata:
              name: kubesphere-router-demo
              namespace: other-namespace
        "};

        let resources = manifest_resources(manifest, "kubesphere-controls-system");

        assert_eq!(
            resources,
            vec![
                ManifestResource {
                    kind: "ServiceAccount".to_string(),
                    namespace: "kubesphere-controls-system".to_string(),
                    name: "kubesphere-router-demo".to_string(),
                },
                ManifestResource {
                    kind: "Deployment".to_string(),
                    namespace: "other-namespace".to_string(),
                    name: "kubesphere-router-demo".to_string(),
                },
            ]
        );
    }

    #[rstest]
    #[case(Some(2), Some(2), true)]
    #[case(Some(2), Some(1), false)]
    #[case(None, Some(1), true)]
    #[case(Some(2), None, false)]
    fn deployment_readiness(
        #[case] desired: Option<i32>,
        #[case] available: Option<i32>,
        #[case] expected: bool,
    ) {
        let deployment = Deployment {
            spec: Some(DeploymentSpec {
                replicas: desired,
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                available_replicas: available,
                ..Default::default()
            }),
            ..Default::default()
        };

        assert_eq!(deployment_ready(deployment), expected);
    }

    #[tokio::test]
    async fn poll_returns_promptly_when_cancelled() {
        let terminated = AtomicBool::new(true);
        let deadline = Instant::now() + Duration::from_secs(300);

        let actual = tokio::time::timeout(
            Duration::from_millis(50),
            poll_until_ready(&terminated, deadline, Duration::from_secs(5), || async {
                Ok(true)
            }),
        )
        .await
        .unwrap();

        assert!(actual.is_err());
        assert!(actual.unwrap_err().to_string().contains("cancelled"));
    }

    #[tokio::test]
    async fn cancellation_during_polling_stops_the_wait() {
        let terminated = AtomicBool::new(false);
        let deadline = Instant::now() + Duration::from_secs(300);

        let actual = tokio::time::timeout(
            Duration::from_secs(1),
            poll_until_ready(&terminated, deadline, Duration::from_millis(1), || {
                terminated.store(true, Ordering::Relaxed);
                async { Ok(false) }
            }),
        )
        .await
        .unwrap();

        assert!(actual.is_err());
    }

    #[tokio::test]
    async fn past_deadline_reports_timeout() {
        let terminated = AtomicBool::new(false);

        let actual = poll_until_ready(
            &terminated,
            Instant::now(),
            Duration::from_millis(1),
            || async { Ok(false) },
        )
        .await
        .unwrap();

        assert!(!actual);
    }

    #[test]
    fn external_name_services_are_ready_without_endpoints() {
        let service = Service {
            spec: Some(k8s_openapi::api::core::v1::ServiceSpec {
                type_: Some("ExternalName".to_string()),
                selector: Some([("app".to_string(), "demo".to_string())].into()),
                ..Default::default()
            }),
            ..Default::default()
        };

        assert!(!service_needs_endpoints(&service));
    }
}
