use kube::CustomResource;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const CONDITION_DEPLOYED: &str = "Deployed";
pub const CONDITION_DEPLOYMENT_READY: &str = "DeploymentReady";
pub const CONDITION_STATUS_TRUE: &str = "True";

/// Label the gateway chart puts on its ingress class.
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";

pub const ANNOTATION_NODEPORT_HTTP: &str = "gateway.kubesphere.io/nodeport-http";
pub const ANNOTATION_NODEPORT_HTTPS: &str = "gateway.kubesphere.io/nodeport-https";

/// Gateway custom resource. `values` is an opaque document owned by the
/// rendering stage; the orchestrator never validates its schema.
#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize)]
#[kube(
    group = "gateway.kubesphere.io",
    version = "v2alpha2",
    kind = "Gateway",
    plural = "gateways",
    namespaced,
    status = "GatewayStatus",
    schema = "disabled"
)]
pub struct GatewaySpec {
    #[serde(rename = "appVersion")]
    pub app_version: String,

    #[serde(default)]
    pub values: Value,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GatewayStatus {
    #[serde(default)]
    pub conditions: Vec<GatewayCondition>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GatewayCondition {
    #[serde(rename = "type")]
    pub type_: String,

    pub status: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Gateway {
    pub fn is_deployed(&self) -> bool {
        self.has_condition(CONDITION_DEPLOYED)
    }

    pub fn is_deployment_ready(&self) -> bool {
        self.has_condition(CONDITION_DEPLOYMENT_READY)
    }

    fn has_condition(&self, type_: &str) -> bool {
        self.status.as_ref().is_some_and(|status| {
            status
                .conditions
                .iter()
                .any(|c| c.type_ == type_ && c.status == CONDITION_STATUS_TRUE)
        })
    }
}
