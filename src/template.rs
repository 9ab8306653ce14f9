mod funcs;
mod parser;

use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::Error,
    kube::apis::{Gateway, ANNOTATION_NODEPORT_HTTP, ANNOTATION_NODEPORT_HTTPS},
};

use funcs::{FuncRegistry, Piped};
use parser::{parse_template, Segment};

const DEFAULT_TEMPLATE: &str = include_str!("template/values.yaml");

/// The subset of a gateway's `spec.values` that feeds the values template.
/// Fields the CR carries but the chart does not consume are dropped here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayValues {
    pub fullname_override: String,
    pub controller: Controller,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Controller {
    pub image: Image,

    pub ingress_class_resource: IngressClassResource,

    pub replica_count: i64,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,

    pub service: ServiceValues,

    pub resources: Resources,

    pub integrate_kube_sphere: Integrate,
}

impl Default for Controller {
    fn default() -> Self {
        Self {
            image: Image::default(),
            ingress_class_resource: IngressClassResource::default(),
            replica_count: 1,
            annotations: BTreeMap::default(),
            config: BTreeMap::default(),
            service: ServiceValues::default(),
            resources: Resources::default(),
            integrate_kube_sphere: Integrate::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Image {
    pub repository: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngressClassResource {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceValues {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub type_: String,

    #[serde(skip_serializing_if = "NodePorts::is_empty")]
    pub node_ports: NodePorts,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodePorts {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub http: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub https: String,
}

impl NodePorts {
    fn is_empty(&self) -> bool {
        self.http.is_empty() && self.https.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Resources {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Integrate {
    #[serde(skip_serializing_if = "is_false")]
    pub tracing: bool,

    pub scope: Scope,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Scope {
    #[serde(skip_serializing_if = "is_false")]
    pub enabled: bool,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace_selector: String,
}

fn is_false(v: &bool) -> bool {
    !v
}

/// Renders a structured input into the chart's values document. The engine is
/// a seam so tests can substitute a canned rendering.
pub trait TemplateEngine {
    fn render(&self, input: &Value) -> Result<String>;
}

pub struct ValuesTemplate {
    segments: Vec<OwnedSegment>,
    funcs: FuncRegistry,
}

enum OwnedSegment {
    Text(String),
    Expr {
        path: Vec<String>,
        calls: Vec<(String, Option<i64>)>,
    },
}

impl ValuesTemplate {
    pub fn parse(source: &str, funcs: FuncRegistry) -> Result<Self> {
        let (_, segments) = parse_template::<nom::error::Error<_>>(source)
            .map_err(|err| Error::Template(format!("invalid values template: {err}")))?;

        let segments = segments
            .into_iter()
            .map(|segment| match segment {
                Segment::Text(text) => OwnedSegment::Text(text.to_string()),
                Segment::Expr { path, calls } => OwnedSegment::Expr {
                    path: path.into_iter().map(ToString::to_string).collect(),
                    calls: calls
                        .into_iter()
                        .map(|call| (call.name.to_string(), call.arg))
                        .collect(),
                },
            })
            .collect();

        Ok(Self { segments, funcs })
    }

    pub fn default_template() -> Result<Self> {
        Self::parse(DEFAULT_TEMPLATE, FuncRegistry::standard())
    }

    fn render_expr(&self, input: &Value, path: &[String], calls: &[(String, Option<i64>)]) -> Result<String> {
        let mut piped = Piped::Value(lookup(input, path).cloned().unwrap_or(Value::Null));

        for (name, arg) in calls {
            piped = self.funcs.apply(name, piped, *arg)?;
        }

        match piped {
            Piped::Text(text) => Ok(text),
            Piped::Value(Value::Null) => Ok("\"\"".to_string()),
            Piped::Value(Value::String(s)) => Ok(s),
            Piped::Value(Value::Number(n)) => Ok(n.to_string()),
            Piped::Value(Value::Bool(b)) => Ok(b.to_string()),
            Piped::Value(_) => Err(Error::Template(format!(
                "placeholder '{}' is not a scalar, pipe it through toYaml",
                path.join(".")
            ))
            .into()),
        }
    }
}

fn lookup<'a>(input: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut current = input;

    for key in path {
        current = current.get(key)?;
    }

    Some(current)
}

impl TemplateEngine for ValuesTemplate {
    fn render(&self, input: &Value) -> Result<String> {
        let mut out = String::new();

        for segment in &self.segments {
            match segment {
                OwnedSegment::Text(text) => out.push_str(text),
                OwnedSegment::Expr { path, calls } => {
                    out.push_str(&self.render_expr(input, path, calls)?);
                }
            }
        }

        Ok(out)
    }
}

/// Builds the chart values for a gateway: parse the CR's values through the
/// known schema, fold in node port annotations, render through the template,
/// then normalize the YAML back into canonical JSON bytes.
pub fn render_values(engine: &dyn TemplateEngine, gateway: &Gateway) -> Result<Vec<u8>> {
    let mut values: GatewayValues = match &gateway.spec.values {
        Value::Null => GatewayValues::default(),
        other => serde_json::from_value(other.clone())
            .map_err(|err| Error::Template(format!("unparsable gateway values: {err}")))?,
    };

    if let Some(annotations) = &gateway.metadata.annotations {
        if let Some(http) = annotations.get(ANNOTATION_NODEPORT_HTTP) {
            values.controller.service.node_ports.http = http.clone();
        }

        if let Some(https) = annotations.get(ANNOTATION_NODEPORT_HTTPS) {
            values.controller.service.node_ports.https = https.clone();
        }
    }

    let input = serde_json::to_value(&values)
        .map_err(|err| Error::Template(format!("unserializable gateway values: {err}")))?;

    let rendered = engine.render(&input)?;

    let parsed: serde_yaml::Value = serde_yaml::from_str(&rendered)
        .map_err(|err| Error::Template(format!("template produced invalid YAML: {err}")))?;

    let normalized = normalize(parsed);

    serde_json::to_vec_pretty(&normalized)
        .map_err(|err| Error::Template(format!("failed to encode values: {err}")).into())
}

// YAML allows non-string mapping keys and tagged values, JSON does not.
fn normalize(value: serde_yaml::Value) -> Value {
    match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                Value::from(n.as_f64().unwrap_or_default())
            }
        }
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(seq) => {
            Value::Array(seq.into_iter().map(normalize).collect())
        }
        serde_yaml::Value::Mapping(mapping) => {
            let mut map = serde_json::Map::with_capacity(mapping.len());

            for (key, value) in mapping {
                let key = match key {
                    serde_yaml::Value::String(s) => s,
                    other => serde_yaml::to_string(&other)
                        .map(|s| s.trim_end().to_string())
                        .unwrap_or_default(),
                };

                map.insert(key, normalize(value));
            }

            Value::Object(map)
        }
        serde_yaml::Value::Tagged(tagged) => normalize(tagged.value),
    }
}
