use std::collections::BTreeMap;

use anyhow::Result;
use serde_json::Value;

use crate::error::Error;

/// Intermediate value flowing through a pipe chain. Functions consume either
/// the structured value or the text produced by an earlier function.
#[derive(Debug, Clone, PartialEq)]
pub enum Piped {
    Value(Value),
    Text(String),
}

type Func = fn(Piped, Option<i64>) -> Result<Piped>;

/// Fixed set of functions usable in value templates. Unknown names are a
/// template error rather than silently rendering nothing.
pub struct FuncRegistry {
    funcs: BTreeMap<&'static str, Func>,
}

impl FuncRegistry {
    pub fn standard() -> Self {
        let mut funcs: BTreeMap<&'static str, Func> = BTreeMap::new();

        funcs.insert("toYaml", to_yaml);
        funcs.insert("nindent", nindent);

        Self { funcs }
    }

    pub fn apply(&self, name: &str, input: Piped, arg: Option<i64>) -> Result<Piped> {
        let func = self
            .funcs
            .get(name)
            .ok_or_else(|| Error::Template(format!("unknown template function '{name}'")))?;

        func(input, arg)
    }
}

fn to_yaml(input: Piped, _arg: Option<i64>) -> Result<Piped> {
    let value = match input {
        Piped::Value(value) => value,
        Piped::Text(_) => {
            return Err(Error::Template("toYaml expects a structured value".into()).into());
        }
    };

    let yaml = serde_yaml::to_string(&value)
        .map_err(|err| Error::Template(format!("toYaml failed: {err}")))?;

    // Helm renders empty maps as `{}`, never the YAML null literal. Downstream
    // merging relies on placeholders being maps.
    let yaml = yaml.trim_end().replace("null", "{}");

    Ok(Piped::Text(yaml))
}

fn nindent(input: Piped, arg: Option<i64>) -> Result<Piped> {
    let width = arg
        .ok_or_else(|| Error::Template("nindent requires an indent width".into()))?;

    if width < 0 {
        return Err(Error::Template(format!("nindent width must not be negative: {width}")).into());
    }

    let text = match input {
        Piped::Text(text) => text,
        Piped::Value(_) => {
            return Err(Error::Template("nindent expects rendered text".into()).into());
        }
    };

    let pad = " ".repeat(width as usize);
    let indented = format!("\n{}{}", pad, text.replace('\n', &format!("\n{pad}")));

    Ok(Piped::Text(indented))
}
