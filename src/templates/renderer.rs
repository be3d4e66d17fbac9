//! Parameter validation and query rendering.
//!
//! Two output forms share one validation pass:
//! - [`TemplateRenderer::render`] substitutes JSON-encoded literals into the
//!   query text, for previews and logs;
//! - [`TemplateRenderer::bind`] keeps the text intact and binds the values as
//!   native driver parameters, which is what execution uses.

use super::definition::{json_type_name, Template, IDENTIFIER_RE, PLACEHOLDER_RE};
use crate::error::ServerError;
use regex::Captures;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

/// How to treat parameters a template does not declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownParameterPolicy {
    /// Pass them through unvalidated (logged at `warn`).
    #[default]
    PassThrough,
    /// Reject the request with a validation error.
    Reject,
}

/// A validated query ready for execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedQuery {
    /// Name of the template this query came from.
    pub template: String,
    /// Cypher text with `$placeholders` intact.
    pub text: String,
    /// Values bound to the placeholders, ordered by name.
    pub parameters: BTreeMap<String, Value>,
}

impl RenderedQuery {
    /// Build a query that did not come from a registered template.
    pub fn raw(label: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            template: label.into(),
            text: text.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// Add a bound parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }
}

/// Validates parameters against a template's schema and renders queries.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateRenderer {
    unknown: UnknownParameterPolicy,
}

impl TemplateRenderer {
    /// Create a renderer with the given unknown-parameter policy.
    pub fn new(unknown: UnknownParameterPolicy) -> Self {
        Self { unknown }
    }

    /// Create a renderer from the strict-parameters flag.
    pub fn from_strict(strict: bool) -> Self {
        Self::new(if strict {
            UnknownParameterPolicy::Reject
        } else {
            UnknownParameterPolicy::PassThrough
        })
    }

    /// The configured unknown-parameter policy.
    pub fn policy(&self) -> UnknownParameterPolicy {
        self.unknown
    }

    /// Validate parameters and return the names of undeclared ones.
    ///
    /// Fails when a required parameter is absent or null, when a supplied value
    /// does not match the declared type, or (under [`UnknownParameterPolicy::Reject`])
    /// when an undeclared parameter is present.
    pub fn validate(
        &self,
        template: &Template,
        params: &Map<String, Value>,
    ) -> Result<Vec<String>, ServerError> {
        let missing: Vec<String> = template
            .required_parameters()
            .filter(|p| params.get(&p.name).is_none_or(Value::is_null))
            .map(|p| p.name.clone())
            .collect();
        if !missing.is_empty() {
            return Err(ServerError::missing_parameters(missing));
        }

        for param in &template.parameters {
            let Some(value) = params.get(&param.name) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            if !param.param_type.accepts(value) {
                return Err(ServerError::validation(format!(
                    "Parameter '{}' expects {}, got {}",
                    param.name,
                    param.param_type,
                    json_type_name(value)
                )));
            }
        }

        let unknown: Vec<String> = params
            .keys()
            .filter(|k| template.parameter(k).is_none())
            .cloned()
            .collect();
        if !unknown.is_empty() {
            match self.unknown {
                UnknownParameterPolicy::Reject => {
                    return Err(ServerError::validation(format!(
                        "Unknown parameters for template '{}': {}",
                        template.name,
                        unknown.join(", ")
                    )));
                }
                UnknownParameterPolicy::PassThrough => {
                    warn!(
                        "Template '{}' received undeclared parameters: {}",
                        template.name,
                        unknown.join(", ")
                    );
                }
            }
        }

        Ok(unknown)
    }

    /// Render the query text with every placeholder replaced by a literal.
    ///
    /// Absent optional parameters render as `null`.
    pub fn render(
        &self,
        template: &Template,
        params: &Map<String, Value>,
    ) -> Result<String, ServerError> {
        self.validate(template, params)?;

        let text = PLACEHOLDER_RE.replace_all(&template.query, |caps: &Captures| {
            match caps.get(1) {
                Some(name) => params
                    .get(name.as_str())
                    .map(encode_literal)
                    .unwrap_or_else(|| "null".to_string()),
                None => caps[0].to_string(),
            }
        });
        Ok(text.into_owned())
    }

    /// Bind parameters for execution.
    ///
    /// Every declared parameter is bound (absent optional ones as `null`);
    /// undeclared parameters that passed validation are bound as supplied.
    pub fn bind(
        &self,
        template: &Template,
        params: &Map<String, Value>,
    ) -> Result<RenderedQuery, ServerError> {
        let unknown = self.validate(template, params)?;

        let mut bound: BTreeMap<String, Value> = template
            .parameters
            .iter()
            .map(|p| {
                let value = params.get(&p.name).cloned().unwrap_or(Value::Null);
                (p.name.clone(), value)
            })
            .collect();
        for name in unknown {
            if let Some(value) = params.get(&name) {
                bound.insert(name, value.clone());
            }
        }

        Ok(RenderedQuery {
            template: template.name.clone(),
            text: template.query.clone(),
            parameters: bound,
        })
    }
}

/// Encode a JSON value as a Cypher literal.
///
/// Scalars and lists use their JSON encoding, which Cypher accepts verbatim.
/// Maps become Cypher map literals whose keys are backtick-quoted unless they
/// are plain identifiers.
pub fn encode_literal(value: &Value) -> String {
    match value {
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(encode_literal).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Object(map) => {
            let inner: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", encode_key(k), encode_literal(v)))
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
        scalar => scalar.to_string(),
    }
}

fn encode_key(key: &str) -> String {
    if IDENTIFIER_RE.is_match(key) {
        key.to_string()
    } else {
        format!("`{}`", key.replace('`', "``"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::TemplateRegistry;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn create_item() -> Template {
        TemplateRegistry::builtin()
            .unwrap()
            .lookup("create_item")
            .unwrap()
            .clone()
    }

    fn iphone() -> Map<String, Value> {
        params(json!({
            "name": "iPhone 13",
            "description": "Black iPhone 13 with case",
            "category": "Electronics",
            "location_name": "Main Office"
        }))
    }

    #[test]
    fn test_render_substitutes_json_literals() {
        let text = TemplateRenderer::default()
            .render(&create_item(), &iphone())
            .unwrap();

        assert!(text.contains(r#"name: "iPhone 13""#));
        assert!(text.contains(r#"description: "Black iPhone 13 with case""#));
        assert!(text.contains(r#"category: "Electronics""#));
        assert!(text.contains(r#"{name: "Main Office"}"#));
        assert!(!text.contains('$'));
    }

    #[test]
    fn test_render_leaves_quoted_dollars_alone() {
        let source = r#"
name: labelled
version: "1.0"
updated: 2024-05-01
parameters:
  category:
    type: string
    required: true
query: "MATCH (i:Item {category: $category}) RETURN 'price in $USD' AS note // per $unit"
"#;
        let template = Template::from_yaml(source, None).unwrap();
        let text = TemplateRenderer::default()
            .render(&template, &params(json!({"category": "books"})))
            .unwrap();
        assert_eq!(
            text,
            r#"MATCH (i:Item {category: "books"}) RETURN 'price in $USD' AS note // per $unit"#
        );
    }

    #[test]
    fn test_missing_required_parameter_named() {
        let mut input = iphone();
        input.remove("location_name");

        let err = TemplateRenderer::default()
            .render(&create_item(), &input)
            .unwrap_err();
        assert!(matches!(err, ServerError::Validation { .. }));
        assert_eq!(err.missing(), &["location_name".to_string()]);
        assert!(err.to_string().contains("location_name"));
    }

    #[test]
    fn test_all_missing_parameters_in_declaration_order() {
        let err = TemplateRenderer::default()
            .render(&create_item(), &Map::new())
            .unwrap_err();
        assert_eq!(
            err.missing(),
            &["name", "description", "category", "location_name"].map(String::from)
        );
    }

    #[test]
    fn test_null_counts_as_missing_for_required() {
        let mut input = iphone();
        input.insert("category".to_string(), Value::Null);
        let err = TemplateRenderer::default()
            .bind(&create_item(), &input)
            .unwrap_err();
        assert_eq!(err.missing(), &["category".to_string()]);
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let mut input = iphone();
        input.insert("name".to_string(), json!(13));
        let err = TemplateRenderer::default()
            .render(&create_item(), &input)
            .unwrap_err();
        assert!(err.to_string().contains("'name' expects string, got integer"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let renderer = TemplateRenderer::default();
        let template = create_item();
        let first = renderer.render(&template, &iphone()).unwrap();
        let second = renderer.render(&template, &iphone()).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            renderer.bind(&template, &iphone()).unwrap(),
            renderer.bind(&template, &iphone()).unwrap()
        );
    }

    #[test]
    fn test_escaping_of_control_characters() {
        let mut input = iphone();
        input.insert(
            "description".to_string(),
            json!("line one\n\"quoted\" \\ end"),
        );
        let text = TemplateRenderer::default()
            .render(&create_item(), &input)
            .unwrap();
        assert!(text.contains(r#""line one\n\"quoted\" \\ end""#));
    }

    #[test]
    fn test_unknown_parameters_pass_through_by_default() {
        let mut input = iphone();
        input.insert("colour".to_string(), json!("black"));

        let query = TemplateRenderer::default()
            .bind(&create_item(), &input)
            .unwrap();
        assert_eq!(query.parameters.get("colour"), Some(&json!("black")));
        assert_eq!(query.parameters.len(), 5);
    }

    #[test]
    fn test_unknown_parameters_rejected_when_strict() {
        let mut input = iphone();
        input.insert("colour".to_string(), json!("black"));

        let err = TemplateRenderer::from_strict(true)
            .bind(&create_item(), &input)
            .unwrap_err();
        assert!(err.to_string().contains("colour"));
        assert!(err.missing().is_empty());
    }

    #[test]
    fn test_bind_keeps_placeholders() {
        let query = TemplateRenderer::default()
            .bind(&create_item(), &iphone())
            .unwrap();
        assert_eq!(query.template, "create_item");
        assert!(query.text.contains("$location_name"));
        assert_eq!(query.parameters["location_name"], json!("Main Office"));
    }

    #[test]
    fn test_optional_parameter_binds_null() {
        let source = r#"
version: "1"
updated: 2024-01-01
parameters:
  category:
    type: string
    required: true
  limit:
    type: integer
query: 'MATCH (i:Item {category: $category}) RETURN i LIMIT coalesce($limit, 25)'
"#;
        let template = Template::from_yaml(source, Some("items")).unwrap();
        let input = params(json!({"category": "books"}));

        let query = TemplateRenderer::default().bind(&template, &input).unwrap();
        assert_eq!(query.parameters["limit"], Value::Null);

        let text = TemplateRenderer::default().render(&template, &input).unwrap();
        assert!(text.ends_with("coalesce(null, 25)"));
    }

    #[test]
    fn test_encode_literal_maps_and_lists() {
        assert_eq!(encode_literal(&json!([1, "a", true])), r#"[1, "a", true]"#);
        assert_eq!(
            encode_literal(&json!({"plain": 1, "with space": null})),
            r#"{plain: 1, `with space`: null}"#
        );
        assert_eq!(encode_literal(&json!({"we`ird": 2})), "{`we``ird`: 2}");
    }
}
