//! Declarative OpenAPI spec file loading.
//!
//! Reads `paths → {get, put, patch, delete} → responses` and groups the resulting
//! [`RouteDescriptor`]s by resource type. YAML and JSON documents are both accepted.

use super::schema_registry::{Method, RouteDescriptor};
use crate::core::error::{GatewayError, GatewayResult};
use crate::routing::pattern::{Segment, UriTemplate};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct OpenApiDocument {
    #[serde(default)]
    paths: BTreeMap<String, PathItem>,
}

#[derive(Debug, Default, Deserialize)]
struct PathItem {
    get: Option<Operation>,
    put: Option<Operation>,
    patch: Option<Operation>,
    delete: Option<Operation>,
}

#[derive(Debug, Deserialize)]
struct Operation {
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    responses: serde_yaml::Mapping,
    #[serde(rename = "x-resource-kind")]
    resource_kind: Option<String>,
    #[serde(rename = "x-resource-group")]
    resource_group: Option<String>,
}

impl Operation {
    fn response_codes(&self) -> BTreeMap<u16, String> {
        self.responses
            .iter()
            .filter_map(|(code, response)| {
                let code = match code {
                    serde_yaml::Value::Number(n) => u16::try_from(n.as_u64()?).ok()?,
                    serde_yaml::Value::String(s) => s.parse().ok()?,
                    _ => return None,
                };
                let description = response
                    .get("description")
                    .and_then(|d| d.as_str())
                    .unwrap_or_default()
                    .to_string();
                Some((code, description))
            })
            .collect()
    }
}

/// Load and parse the spec file at `path`
pub async fn load_spec_file<P: AsRef<Path>>(
    path: P,
) -> GatewayResult<BTreeMap<String, Vec<RouteDescriptor>>> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path).await?;
    let types = parse_spec(&content)?;
    info!(path = %path.display(), types = types.len(), "Declarative spec loaded");
    Ok(types)
}

/// Parse an OpenAPI document into descriptors grouped by resource type
pub fn parse_spec(content: &str) -> GatewayResult<BTreeMap<String, Vec<RouteDescriptor>>> {
    let document: OpenApiDocument = serde_yaml::from_str(content)
        .map_err(|e| GatewayError::config(format!("Invalid OpenAPI document: {}", e)))?;

    let mut types: BTreeMap<String, Vec<RouteDescriptor>> = BTreeMap::new();

    for (raw_path, item) in document.paths {
        let template = UriTemplate::parse(&raw_path);
        let operations = [
            ("get", &item.get),
            ("put", &item.put),
            ("patch", &item.patch),
            ("delete", &item.delete),
        ];

        let declared: Vec<(Method, &Operation)> = operations
            .iter()
            .filter_map(|(verb, op)| Some((Method::from_verb(verb, &template)?, op.as_ref()?)))
            .collect();
        if declared.is_empty() {
            debug!(path = %raw_path, "Skipping path without supported operations");
            continue;
        }

        let kind = declared
            .iter()
            .find_map(|(_, op)| op.resource_kind.clone())
            .or_else(|| declared.iter().find_map(|(_, op)| op.tags.first().cloned()))
            .or_else(|| last_literal(&template))
            .unwrap_or_default();
        let group = declared
            .iter()
            .find_map(|(_, op)| op.resource_group.clone())
            .unwrap_or_default();

        let mut descriptor = RouteDescriptor::new(&raw_path, &kind, &group);
        for (method, op) in &declared {
            descriptor.method_responses.insert(*method, op.response_codes());
        }

        types.entry(resource_type(&kind, &group)).or_default().push(descriptor);
    }

    Ok(types)
}

fn resource_type(kind: &str, group: &str) -> String {
    if group.is_empty() {
        kind.to_string()
    } else {
        format!("{}.{}", kind, group)
    }
}

fn last_literal(template: &UriTemplate) -> Option<String> {
    template.segments().iter().rev().find_map(|s| match s {
        Segment::Literal(literal) if !literal.is_empty() => Some(literal.clone()),
        _ => None,
    })
}
