use anyhow::{anyhow, Result};
use async_trait::async_trait;
use k8s_openapi::api::{
    core::v1::{ConfigMap, Service},
    networking::v1::IngressClass,
};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    ResourceExt,
};

use super::{apis::Gateway, client::KubeClient};

/// Resource-store seam of the orchestrator. Everything the upgrade path
/// reads or mutates in the cluster goes through this trait so the state
/// machine can be exercised against a mock.
#[async_trait]
pub trait GatewayStore: Send + Sync {
    async fn get_gateway(&self, namespace: &str, name: &str) -> Result<Gateway>;

    async fn list_gateways(&self) -> Result<Vec<Gateway>>;

    async fn create_gateway(&self, gateway: &Gateway) -> Result<Gateway>;

    async fn update_gateway(&self, gateway: &Gateway) -> Result<Gateway>;

    async fn delete_gateway(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service>;

    async fn list_ingress_classes(&self, label_selector: &str) -> Result<Vec<IngressClass>>;

    async fn delete_ingress_class(&self, name: &str) -> Result<()>;

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap>;

    async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap>;
}

fn namespace_of(gateway: &Gateway) -> Result<String> {
    gateway
        .namespace()
        .ok_or_else(|| anyhow!("gateway '{}' has no namespace", gateway.name_any()))
}

#[async_trait]
impl GatewayStore for KubeClient {
    async fn get_gateway(&self, namespace: &str, name: &str) -> Result<Gateway> {
        let api: Api<Gateway> = Api::namespaced(self.to_client(), namespace);

        api.get(name).await.map_err(Into::into)
    }

    async fn list_gateways(&self) -> Result<Vec<Gateway>> {
        let api: Api<Gateway> = Api::all(self.to_client());

        let list = api.list(&ListParams::default()).await?;

        Ok(list.items)
    }

    async fn create_gateway(&self, gateway: &Gateway) -> Result<Gateway> {
        let namespace = namespace_of(gateway)?;

        let api: Api<Gateway> = Api::namespaced(self.to_client(), &namespace);

        api.create(&PostParams::default(), gateway)
            .await
            .map_err(Into::into)
    }

    async fn update_gateway(&self, gateway: &Gateway) -> Result<Gateway> {
        let namespace = namespace_of(gateway)?;

        let api: Api<Gateway> = Api::namespaced(self.to_client(), &namespace);

        api.replace(&gateway.name_any(), &PostParams::default(), gateway)
            .await
            .map_err(Into::into)
    }

    async fn delete_gateway(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Gateway> = Api::namespaced(self.to_client(), namespace);

        api.delete(name, &DeleteParams::default()).await?;

        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service> {
        let api: Api<Service> = Api::namespaced(self.to_client(), namespace);

        api.get(name).await.map_err(Into::into)
    }

    async fn list_ingress_classes(&self, label_selector: &str) -> Result<Vec<IngressClass>> {
        let api: Api<IngressClass> = Api::all(self.to_client());

        let list = api
            .list(&ListParams::default().labels(label_selector))
            .await?;

        Ok(list.items)
    }

    async fn delete_ingress_class(&self, name: &str) -> Result<()> {
        let api: Api<IngressClass> = Api::all(self.to_client());

        api.delete(name, &DeleteParams::default()).await?;

        Ok(())
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        let api: Api<ConfigMap> = Api::namespaced(self.to_client(), namespace);

        api.get_opt(name).await.map_err(Into::into)
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap> {
        let namespace = config_map
            .namespace()
            .ok_or_else(|| anyhow!("config map '{}' has no namespace", config_map.name_any()))?;

        let api: Api<ConfigMap> = Api::namespaced(self.to_client(), &namespace);

        api.create(&PostParams::default(), config_map)
            .await
            .map_err(Into::into)
    }

    async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap> {
        let namespace = config_map
            .namespace()
            .ok_or_else(|| anyhow!("config map '{}' has no namespace", config_map.name_any()))?;

        let api: Api<ConfigMap> = Api::namespaced(self.to_client(), &namespace);

        api.replace(&config_map.name_any(), &PostParams::default(), config_map)
            .await
            .map_err(Into::into)
    }
}

#[cfg(test)]
pub mod mock {
    use super::{ConfigMap, Gateway, GatewayStore, IngressClass, Result, Service};
    use mockall::mock;

    mock! {
        pub TestStore {}

        #[async_trait::async_trait]
        impl GatewayStore for TestStore {
            async fn get_gateway(&self, namespace: &str, name: &str) -> Result<Gateway>;
            async fn list_gateways(&self) -> Result<Vec<Gateway>>;
            async fn create_gateway(&self, gateway: &Gateway) -> Result<Gateway>;
            async fn update_gateway(&self, gateway: &Gateway) -> Result<Gateway>;
            async fn delete_gateway(&self, namespace: &str, name: &str) -> Result<()>;
            async fn get_service(&self, namespace: &str, name: &str) -> Result<Service>;
            async fn list_ingress_classes(&self, label_selector: &str) -> Result<Vec<IngressClass>>;
            async fn delete_ingress_class(&self, name: &str) -> Result<()>;
            async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;
            async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap>;
            async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap>;
        }
    }
}
