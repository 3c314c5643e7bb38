//! YAML parsing and rendering for manifests and patch files
//!
//! Parsing goes through yaml-rust2 into `serde_json::Value`, so a single parser
//! handles both YAML and JSON input (YAML 1.2 is a superset of JSON). Mapping
//! key order from the document is kept. Rendering uses serde_yaml.

use std::path::Path;

use serde_json::{Map, Number, Value};
use yaml_rust2::{Yaml, YamlLoader};

use crate::Error;

const YAML_KIND: &str = "yaml";

fn yaml_error(msg: impl Into<String>) -> Error {
    Error::serialization_for_kind(YAML_KIND, msg)
}

/// Parse a YAML (or JSON) string into a serde_json::Value.
///
/// For multi-document YAML, returns only the first document.
/// Returns `Value::Null` for empty input.
pub fn parse_yaml(input: &str) -> Result<Value, Error> {
    let docs = YamlLoader::load_from_str(input).map_err(|e| yaml_error(e.to_string()))?;
    match docs.into_iter().next() {
        Some(doc) => yaml_to_json(doc),
        None => Ok(Value::Null),
    }
}

/// Read and parse a YAML or JSON file.
pub fn load_yaml_file(path: &Path) -> Result<Value, Error> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::internal_with_context(
            "load_yaml_file",
            format!("failed to read {}: {}", path.display(), e),
        )
    })?;
    parse_yaml(&content)
}

/// Render a value as a YAML document.
pub fn to_yaml_string(value: &Value) -> Result<String, Error> {
    serde_yaml::to_string(value).map_err(|e| yaml_error(e.to_string()))
}

fn yaml_to_json(yaml: Yaml) -> Result<Value, Error> {
    match yaml {
        Yaml::Null => Ok(Value::Null),
        Yaml::Boolean(b) => Ok(Value::Bool(b)),
        Yaml::Integer(i) => Ok(Value::Number(i.into())),
        Yaml::Real(s) => {
            let f: f64 = s
                .parse()
                .map_err(|e: std::num::ParseFloatError| yaml_error(e.to_string()))?;
            Ok(Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null))
        }
        Yaml::String(s) => Ok(Value::String(s)),
        Yaml::Array(arr) => arr
            .into_iter()
            .map(yaml_to_json)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Yaml::Hash(map) => map
            .into_iter()
            .map(|(k, v)| {
                let key = match k {
                    Yaml::String(s) => s,
                    Yaml::Integer(i) => i.to_string(),
                    Yaml::Real(r) => r,
                    Yaml::Boolean(b) => b.to_string(),
                    Yaml::Null => "null".to_string(),
                    _ => return Err(yaml_error("unsupported YAML key type")),
                };
                yaml_to_json(v).map(|v| (key, v))
            })
            .collect::<Result<Map<String, Value>, _>>()
            .map(Value::Object),
        Yaml::Alias(_) => Err(yaml_error("YAML aliases not supported")),
        Yaml::BadValue => Err(yaml_error("bad YAML value")),
    }
}
