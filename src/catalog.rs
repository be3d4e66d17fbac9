//! Template catalog stored in the graph.
//!
//! Registry templates can be published as `Template` nodes with their
//! parameters, return fields and examples attached, searched by text, and
//! composed into new templates that reference existing ones in order.

use crate::constants::SEARCH_TEMPLATES_TEMPLATE;
use crate::database::{GraphBackend, QueryResult};
use crate::error::ServerError;
use crate::templates::{
    is_identifier, RenderedQuery, Template, TemplateRegistry, TemplateRenderer,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

const PUBLISH_QUERY: &str = r#"
MERGE (t:Template {name: $name})
SET t.description = $description,
    t.purpose = $purpose,
    t.version = $version,
    t.updated = $updated,
    t.cypher_query = $query
WITH t
OPTIONAL MATCH (t)-[:HAS_PARAMETER|RETURNS|HAS_EXAMPLE]->(old)
DETACH DELETE old
WITH DISTINCT t
FOREACH (p IN $parameters |
    CREATE (t)-[:HAS_PARAMETER]->(:Parameter {
        name: p.name, type: p.type, description: p.description, required: p.required
    }))
FOREACH (r IN $returns |
    CREATE (t)-[:RETURNS]->(:Return {name: r.name, type: r.type, description: r.description}))
FOREACH (e IN $examples |
    CREATE (t)-[:HAS_EXAMPLE]->(:Example {input: e.input, output: e.output}))
RETURN t.name AS name
"#;

const COUNT_TEMPLATES_QUERY: &str = r#"
OPTIONAL MATCH (t:Template)
WHERE t.name IN $names
WITH count(DISTINCT t.name) AS found
OPTIONAL MATCH (existing:Template {name: $name})
WHERE existing.cypher_query IS NOT NULL
RETURN found, count(existing) AS conflicts
"#;

const COMPOSE_QUERY: &str = r#"
MERGE (composed:Template {name: $name})
SET composed.description = $description,
    composed.purpose = 'Composed template',
    composed.version = '1.0',
    composed.composition_type = $composition_type,
    composed.updated = $updated
WITH composed
OPTIONAL MATCH (composed)-[old:COMPOSES]->()
DELETE old
WITH DISTINCT composed
UNWIND range(0, size($templates) - 1) AS i
MATCH (t:Template {name: $templates[i]})
CREATE (composed)-[:COMPOSES {order: i}]->(t)
WITH composed, i, t
ORDER BY i
RETURN composed, collect(t.name) AS templates
"#;

/// How the parts of a composed template relate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CompositionType {
    /// Parts run one after another, in order.
    Sequence,
    /// Parts are independent.
    Parallel,
}

impl CompositionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompositionType::Sequence => "SEQUENCE",
            CompositionType::Parallel => "PARALLEL",
        }
    }
}

/// Request body for composing templates.
#[derive(Debug, Clone, Deserialize)]
pub struct ComposeRequest {
    /// Names of catalog templates, in composition order.
    pub templates: Vec<String>,
    pub composition_type: CompositionType,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Outcome of publishing the registry.
#[derive(Debug, Clone, Serialize)]
pub struct PublishSummary {
    pub status: &'static str,
    pub published: Vec<String>,
}

/// Catalog operations over a graph backend.
#[derive(Clone)]
pub struct TemplateCatalog {
    backend: Arc<dyn GraphBackend>,
}

impl TemplateCatalog {
    pub fn new(backend: Arc<dyn GraphBackend>) -> Self {
        Self { backend }
    }

    /// Write every registry template into the graph.
    ///
    /// Re-publishing replaces a template's attached nodes, so the operation is idempotent.
    pub async fn publish(&self, registry: &TemplateRegistry) -> Result<PublishSummary, ServerError> {
        let mut published = Vec::with_capacity(registry.len());
        for template in registry.list() {
            self.backend.execute(&publish_query(template)?).await?;
            debug!("Published template '{}'", template.name);
            published.push(template.name.clone());
        }
        info!("Published {} template(s) to the catalog", published.len());
        Ok(PublishSummary {
            status: "success",
            published,
        })
    }

    /// Search published templates by description or purpose, newest first.
    ///
    /// Each hit is the template's properties with `parameters`, `returns` and
    /// `examples` lists merged in.
    pub async fn search(
        &self,
        registry: &TemplateRegistry,
        renderer: &TemplateRenderer,
        search_term: &str,
    ) -> Result<Vec<Value>, ServerError> {
        let template = registry.lookup(SEARCH_TEMPLATES_TEMPLATE)?;
        let mut params = Map::new();
        params.insert("search_term".to_string(), json!(search_term));

        let result = self.backend.execute(&renderer.bind(template, &params)?).await?;
        Ok(flatten_search_rows(result))
    }

    /// Create a template node that references existing catalog templates in order.
    ///
    /// The composed name may not shadow a registry template or a published
    /// template that carries its own query.
    pub async fn compose(
        &self,
        registry: &TemplateRegistry,
        request: &ComposeRequest,
    ) -> Result<Value, ServerError> {
        validate_compose(registry, request)?;

        let distinct: BTreeSet<&str> = request.templates.iter().map(String::as_str).collect();
        let check = RenderedQuery::raw("count_templates", COUNT_TEMPLATES_QUERY)
            .with_param("names", json!(request.templates))
            .with_param("name", json!(request.name));
        let existing = self.backend.execute(&check).await?;
        let count_of = |column: &str| {
            existing
                .rows
                .first()
                .and_then(|row| row.get(column))
                .and_then(Value::as_u64)
                .unwrap_or(0)
        };
        if count_of("conflicts") > 0 {
            return Err(name_taken(&request.name));
        }
        if count_of("found") != distinct.len() as u64 {
            return Err(ServerError::validation("One or more templates not found"));
        }

        let create = RenderedQuery::raw("compose_templates", COMPOSE_QUERY)
            .with_param("name", json!(request.name))
            .with_param("description", json!(request.description))
            .with_param("composition_type", json!(request.composition_type.as_str()))
            .with_param("updated", json!(chrono::Utc::now().to_rfc3339()))
            .with_param("templates", json!(request.templates));
        let result = self.backend.execute(&create).await?;

        let row = result
            .rows
            .into_iter()
            .next()
            .ok_or_else(|| ServerError::query_error("Failed to compose templates"))?;
        info!(
            "Composed template '{}' from {} part(s)",
            request.name,
            request.templates.len()
        );
        Ok(json!({
            "status": "success",
            "template": row.get("composed").cloned().unwrap_or(Value::Null),
            "templates": row.get("templates").cloned().unwrap_or(Value::Null),
        }))
    }
}

fn name_taken(name: &str) -> ServerError {
    ServerError::validation(format!(
        "Template '{}' already exists and cannot be replaced by a composition",
        name
    ))
}

fn validate_compose(
    registry: &TemplateRegistry,
    request: &ComposeRequest,
) -> Result<(), ServerError> {
    if !is_identifier(&request.name) {
        return Err(ServerError::validation(format!(
            "Composed template name '{}' must be an identifier",
            request.name
        )));
    }
    if registry.lookup(&request.name).is_ok() {
        return Err(name_taken(&request.name));
    }
    if request.templates.is_empty() {
        return Err(ServerError::validation(
            "A composition needs at least one template",
        ));
    }
    if request.templates.iter().any(|t| t == &request.name) {
        return Err(ServerError::validation(
            "A composed template cannot include itself",
        ));
    }
    Ok(())
}

/// Build the publish statement for one template.
fn publish_query(template: &Template) -> Result<RenderedQuery, ServerError> {
    let examples: Vec<Value> = template
        .examples
        .iter()
        .map(|ex| {
            Ok(json!({
                "input": serde_json::to_string(&ex.input)?,
                "output": serde_json::to_string(&ex.output)?,
            }))
        })
        .collect::<Result<_, serde_json::Error>>()
        .map_err(|e| ServerError::internal(format!("Cannot encode examples: {}", e)))?;

    let parameters = serde_json::to_value(&template.parameters)
        .map_err(|e| ServerError::internal(format!("Cannot encode parameters: {}", e)))?;
    let returns = serde_json::to_value(&template.returns)
        .map_err(|e| ServerError::internal(format!("Cannot encode returns: {}", e)))?;

    Ok(RenderedQuery::raw("publish_template", PUBLISH_QUERY)
        .with_param("name", json!(template.name))
        .with_param("description", json!(template.description))
        .with_param("purpose", json!(template.purpose))
        .with_param("version", json!(template.version))
        .with_param("updated", json!(template.updated.to_string()))
        .with_param("query", json!(template.query))
        .with_param("parameters", parameters)
        .with_param("returns", returns)
        .with_param("examples", Value::Array(examples)))
}

fn flatten_search_rows(result: QueryResult) -> Vec<Value> {
    result
        .rows
        .into_iter()
        .map(|mut row| {
            let mut hit = match row.columns.remove("template") {
                Some(Value::Object(props)) => props,
                _ => Map::new(),
            };
            for key in ["parameters", "returns", "examples"] {
                let value = row.columns.remove(key).unwrap_or_else(|| json!([]));
                hit.insert(key.to_string(), value);
            }
            Value::Object(hit)
        })
        .collect()
}
