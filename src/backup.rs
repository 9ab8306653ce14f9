use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;

use crate::{
    error::Error,
    kube::{apis::Gateway, GatewayStore},
    logger,
};

// Two most recent snapshots are kept per gateway.
const RING_CAPACITY: usize = 2;
const CONFLICT_RETRIES: usize = 5;

/// Writes all selected gateways into one timestamped multi-document YAML file
/// before anything in the cluster is touched.
pub struct FileBackup {
    dir: PathBuf,
}

impl FileBackup {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn write_all(&self, gateways: &[Gateway]) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .map_err(|err| Error::Backup(format!("failed to create backup dir: {err}")))?;

        let path = self.dir.join(format!(
            "gateway-backup-{}.yaml",
            Utc::now().format("%Y%m%d%H%M%S")
        ));

        append_gateways(&path, gateways)?;

        logger!(info, "backed up {} gateway(s) to {}", gateways.len(), path.display());

        Ok(path)
    }
}

fn append_gateways(path: &Path, gateways: &[Gateway]) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| Error::Backup(format!("failed to open {}: {err}", path.display())))?;

    for gateway in gateways {
        let doc = serde_yaml::to_string(gateway)
            .map_err(|err| Error::Backup(format!("failed to serialize gateway: {err}")))?;

        file.write_all(doc.as_bytes())
            .and_then(|_| file.write_all(b"\n---\n"))
            .map_err(|err| Error::Backup(format!("failed to write {}: {err}", path.display())))?;
    }

    Ok(())
}

/// Per-gateway snapshot ring stored in a `<name>-backup` ConfigMap next to the
/// gateway. Entries are base64 YAML keyed by timestamp so the newest sorts
/// last.
pub struct ConfigMapBackup<'a> {
    store: &'a dyn GatewayStore,
}

impl<'a> ConfigMapBackup<'a> {
    pub fn new(store: &'a dyn GatewayStore) -> Self {
        Self { store }
    }

    pub async fn backup(&self, gateway: &Gateway) -> Result<()> {
        let namespace = gateway.namespace().unwrap_or_default();
        let name = gateway.name_any();
        let config_map_name = format!("{name}-backup");

        let doc = serde_yaml::to_string(gateway)
            .map_err(|err| Error::Backup(format!("failed to serialize gateway: {err}")))?;
        let encoded = STANDARD.encode(doc);

        for _ in 0..CONFLICT_RETRIES {
            let key = format!("backup-{}", Utc::now().timestamp());

            let existing = self
                .store
                .get_config_map(&namespace, &config_map_name)
                .await
                .map_err(|err| {
                    Error::Backup(format!(
                        "failed to get backup config map '{namespace}/{config_map_name}': {err:#}"
                    ))
                })?;

            let result = match existing {
                Some(mut config_map) => {
                    let mut data = config_map.data.take().unwrap_or_default();
                    insert_bounded(&mut data, key, encoded.clone());
                    config_map.data = Some(data);

                    self.store.replace_config_map(&config_map).await
                }
                None => {
                    let config_map = ConfigMap {
                        metadata: kube::api::ObjectMeta {
                            name: Some(config_map_name.clone()),
                            namespace: Some(namespace.clone()),
                            ..Default::default()
                        },
                        data: Some([(key, encoded.clone())].into()),
                        ..Default::default()
                    };

                    self.store.create_config_map(&config_map).await
                }
            };

            match result {
                Ok(_) => {
                    logger!(info, "backed up gateway {namespace}/{name} to config map {config_map_name}");
                    return Ok(());
                }
                Err(err) if is_conflict(&err) => {
                    logger!(warn, "backup config map {namespace}/{config_map_name} conflicted, retrying");
                    continue;
                }
                Err(err) => {
                    return Err(Error::Backup(format!(
                        "failed to store backup for '{namespace}/{name}': {err:#}"
                    ))
                    .into());
                }
            }
        }

        Err(Error::Backup(format!(
            "gave up storing backup for '{namespace}/{name}' after {CONFLICT_RETRIES} conflicts"
        ))
        .into())
    }
}

/// Inserts a snapshot, evicting the oldest entries until the ring fits. Keys
/// are timestamps, so the smallest key is the oldest snapshot.
fn insert_bounded(data: &mut BTreeMap<String, String>, key: String, value: String) {
    while data.len() >= RING_CAPACITY {
        let Some(oldest) = data.keys().next().cloned() else {
            break;
        };

        data.remove(&oldest);
    }

    data.insert(key, value);
}

fn is_conflict(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<kube::Error>(),
        Some(kube::Error::Api(response)) if response.code == 409
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kube::{apis::GatewaySpec, store::mock::MockTestStore};
    use pretty_assertions::assert_eq;

    fn gateway(namespace: &str, name: &str) -> Gateway {
        let mut gateway = Gateway::new(
            name,
            GatewaySpec {
                app_version: "kubesphere-nginx-ingress-3.2.1".to_string(),
                values: serde_json::Value::Null,
            },
        );

        gateway.metadata.namespace = Some(namespace.to_string());

        gateway
    }

    #[test]
    fn ring_keeps_only_the_newest_snapshots() {
        let mut data = BTreeMap::new();

        insert_bounded(&mut data, "backup-20260101000000".into(), "a".into());
        insert_bounded(&mut data, "backup-20260102000000".into(), "b".into());
        insert_bounded(&mut data, "backup-20260103000000".into(), "c".into());

        let keys: Vec<&String> = data.keys().collect();

        assert_eq!(keys, vec!["backup-20260102000000", "backup-20260103000000"]);
    }

    #[test]
    fn file_backup_writes_multi_document_yaml() {
        let dir = std::env::temp_dir().join(format!("gateway-backup-test-{}", std::process::id()));

        let backup = FileBackup::new(&dir);
        let path = backup
            .write_all(&[gateway("ns1", "gw1"), gateway("ns2", "gw2")])
            .unwrap();

        let content = fs::read_to_string(&path).unwrap();

        assert_eq!(content.matches("\n---\n").count(), 2);
        assert!(content.contains("name: gw1"));
        assert!(content.contains("name: gw2"));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn existing_backup_file_is_appended_not_truncated() {
        let dir =
            std::env::temp_dir().join(format!("gateway-backup-append-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let path = dir.join("gateway-backup-20260101000000.yaml");

        append_gateways(&path, &[gateway("ns1", "gw1")]).unwrap();
        append_gateways(&path, &[gateway("ns2", "gw2")]).unwrap();

        let content = fs::read_to_string(&path).unwrap();

        assert!(content.contains("name: gw1"));
        assert!(content.contains("name: gw2"));
        assert_eq!(content.matches("\n---\n").count(), 2);

        fs::remove_dir_all(&dir).unwrap();
    }

    fn conflict_error() -> anyhow::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "the object has been modified".to_string(),
            reason: "Conflict".to_string(),
            code: 409,
        })
        .into()
    }

    fn existing_backup_config_map() -> ConfigMap {
        ConfigMap {
            metadata: kube::api::ObjectMeta {
                name: Some("gw1-backup".to_string()),
                namespace: Some("ns1".to_string()),
                ..Default::default()
            },
            data: Some(
                [
                    ("backup-1000".to_string(), "a".to_string()),
                    ("backup-2000".to_string(), "b".to_string()),
                ]
                .into(),
            ),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn config_map_backup_retries_on_conflict_then_succeeds() {
        let mut store = MockTestStore::new();

        store
            .expect_get_config_map()
            .withf(|namespace, name| namespace == "ns1" && name == "gw1-backup")
            .times(3)
            .returning(|_, _| Ok(Some(existing_backup_config_map())));

        store
            .expect_replace_config_map()
            .times(2)
            .returning(|_| Err(conflict_error()));
        store
            .expect_replace_config_map()
            .withf(|config_map: &ConfigMap| {
                config_map.data.as_ref().is_some_and(|data| {
                    data.len() == RING_CAPACITY
                        && !data.contains_key("backup-1000")
                        && data.contains_key("backup-2000")
                })
            })
            .times(1)
            .returning(|config_map| Ok(config_map.clone()));

        ConfigMapBackup::new(&store)
            .backup(&gateway("ns1", "gw1"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn config_map_backup_gives_up_after_bounded_conflicts() {
        let mut store = MockTestStore::new();

        store
            .expect_get_config_map()
            .times(CONFLICT_RETRIES)
            .returning(|_, _| Ok(None));
        store
            .expect_create_config_map()
            .withf(|config_map: &ConfigMap| {
                config_map.metadata.name.as_deref() == Some("gw1-backup")
            })
            .times(CONFLICT_RETRIES)
            .returning(|_| Err(conflict_error()));

        let actual = ConfigMapBackup::new(&store)
            .backup(&gateway("ns1", "gw1"))
            .await;

        assert!(actual.is_err());
        assert!(actual
            .unwrap_err()
            .to_string()
            .contains("after 5 conflicts"));
    }

    #[test]
    fn snapshot_is_valid_base64_yaml() {
        let gateway = gateway("ns1", "gw1");

        let doc = serde_yaml::to_string(&gateway).unwrap();
        let encoded = STANDARD.encode(&doc);
        let decoded = STANDARD.decode(encoded).unwrap();

        let restored: Gateway = serde_yaml::from_slice(&decoded).unwrap();

        assert_eq!(restored.name_any(), "gw1");
        assert_eq!(restored.spec.app_version, gateway.spec.app_version);
    }
}
