use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;

use crate::{config::OverrideSource, error::Error, kube::GatewayStore, logger};

/// Shape of the agent backend ConfigMap payload. Only the override block is
/// consumed here, the rest of the document is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OverrideConfig {
    #[serde(default)]
    pub gateway: OverrideOptions,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideOptions {
    #[serde(default)]
    pub namespace: String,

    #[serde(default)]
    pub values_override: Value,
}

/// Deep merge of `overlay` into `base`. Mappings merge key by key with the
/// overlay winning on conflict; any other overlay value replaces the base
/// outright, arrays included.
pub fn merge_values(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (_, Value::Null) => {}
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Applies the cluster-wide values override from the agent backend ConfigMap
/// on top of the rendered values. A missing ConfigMap or key is an error, the
/// override source is part of the platform installation.
pub async fn apply_overrides(
    store: &dyn GatewayStore,
    rendered: &[u8],
    source: &OverrideSource,
) -> Result<Vec<u8>> {
    let mut values: Value = serde_json::from_slice(rendered)
        .map_err(|err| Error::OverrideFetch(format!("rendered values are not JSON: {err}")))?;

    let config_map = store
        .get_config_map(&source.namespace, &source.name)
        .await
        .map_err(|err| {
            Error::OverrideFetch(format!(
                "failed to get config map '{}/{}': {err:#}",
                source.namespace, source.name
            ))
        })?
        .ok_or_else(|| {
            Error::OverrideFetch(format!(
                "config map '{}/{}' not found",
                source.namespace, source.name
            ))
        })?;

    let document = config_map
        .data
        .as_ref()
        .and_then(|data| data.get(&source.key))
        .ok_or_else(|| {
            Error::OverrideFetch(format!(
                "config map '{}/{}' has no '{}' key",
                source.namespace, source.name, source.key
            ))
        })?;

    let config: OverrideConfig = serde_yaml::from_str(document).map_err(|err| {
        Error::OverrideFetch(format!(
            "invalid override document in '{}/{}': {err}",
            source.namespace, source.name
        ))
    })?;

    if config.gateway.values_override.is_null() {
        logger!(info, "no values override configured, using rendered values");
    } else {
        merge_values(&mut values, &config.gateway.values_override);
    }

    serde_json::to_vec_pretty(&values)
        .map_err(|err| Error::OverrideFetch(format!("failed to encode values: {err}")).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kube::store::mock::MockTestStore;
    use indoc::indoc;
    use k8s_openapi::api::core::v1::ConfigMap;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(
        json!({"controller": {"replicaCount": 1, "config": {"a": "1"}}}),
        json!({"controller": {"config": {"b": "2"}}}),
        json!({"controller": {"replicaCount": 1, "config": {"a": "1", "b": "2"}}})
    )]
    #[case(
        json!({"controller": {"replicaCount": 1}}),
        json!({"controller": {"replicaCount": 3}}),
        json!({"controller": {"replicaCount": 3}})
    )]
    #[case(
        json!({"tolerations": [{"key": "a"}]}),
        json!({"tolerations": [{"key": "b"}]}),
        json!({"tolerations": [{"key": "b"}]})
    )]
    #[case(
        json!({"controller": {"replicaCount": 1}}),
        json!(null),
        json!({"controller": {"replicaCount": 1}})
    )]
    fn merge(#[case] mut base: Value, #[case] overlay: Value, #[case] expected: Value) {
        merge_values(&mut base, &overlay);

        assert_eq!(base, expected);
    }

    fn override_config_map(document: &str) -> ConfigMap {
        ConfigMap {
            data: Some([("config.yaml".to_string(), document.to_string())].into()),
            ..Default::default()
        }
    }

    fn source() -> OverrideSource {
        OverrideSource {
            namespace: "extension-gateway".to_string(),
            name: "gateway-agent-backend-config".to_string(),
            key: "config.yaml".to_string(),
        }
    }

    #[tokio::test]
    async fn override_wins_over_rendered_values() {
        let document = indoc! {"
            gateway:
              namespace: kubesphere-controls-system
              valuesOverride:
                controller:
                  image:
                    repository: registry.internal/nginx-ingress-controller
        "};

        let mut store = MockTestStore::new();
        store
            .expect_get_config_map()
            .returning(move |_, _| Ok(Some(override_config_map(document))));

        let rendered = serde_json::to_vec(&json!({
            "controller": {
                "image": { "repository": "kubesphere/nginx-ingress-controller" },
                "replicaCount": 2
            }
        }))
        .unwrap();

        let merged = apply_overrides(&store, &rendered, &source()).await.unwrap();
        let merged: Value = serde_json::from_slice(&merged).unwrap();

        assert_eq!(
            merged["controller"]["image"]["repository"],
            json!("registry.internal/nginx-ingress-controller")
        );
        assert_eq!(merged["controller"]["replicaCount"], json!(2));
    }

    #[tokio::test]
    async fn missing_config_map_is_an_error() {
        let mut store = MockTestStore::new();
        store.expect_get_config_map().returning(|_, _| Ok(None));

        let rendered = serde_json::to_vec(&json!({})).unwrap();

        let actual = apply_overrides(&store, &rendered, &source()).await;

        assert!(actual.is_err());
    }

    #[tokio::test]
    async fn empty_override_block_keeps_rendered_values() {
        let document = indoc! {"
            gateway:
              namespace: kubesphere-controls-system
        "};

        let mut store = MockTestStore::new();
        store
            .expect_get_config_map()
            .returning(move |_, _| Ok(Some(override_config_map(document))));

        let rendered = serde_json::to_vec_pretty(&json!({
            "controller": { "replicaCount": 2 }
        }))
        .unwrap();

        let merged = apply_overrides(&store, &rendered, &source()).await.unwrap();

        assert_eq!(merged, rendered);
    }
}
