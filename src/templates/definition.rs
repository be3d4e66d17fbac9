//! Template definitions and the on-disk template file format.

use crate::error::ServerError;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Matches `$name` parameter placeholders in Cypher text.
///
/// String literals, backtick-quoted names and comments are matched as a whole
/// so a `$` inside them is never taken for a placeholder. Only placeholder
/// matches populate capture group 1.
pub(crate) static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"'(?:[^'\\]|\\.)*'",
        r#"|"(?:[^"\\]|\\.)*""#,
        r"|`[^`]*`",
        r"|//[^\n]*",
        r"|/\*(?s:.*?)\*/",
        r"|\$([A-Za-z_][A-Za-z0-9_]*)",
    ))
    .unwrap_or_else(|e| panic!("Internal error: invalid placeholder pattern: {}", e))
});

/// Matches names usable as bare Cypher identifiers.
pub(crate) static IDENTIFIER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$")
        .unwrap_or_else(|e| panic!("Internal error: invalid identifier pattern: {}", e))
});

/// Whether a name can be used as a bare Cypher identifier.
pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER_RE.is_match(name)
}

/// Declared type of a template parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ParamType {
    String,
    Integer,
    Float,
    /// Integer or float.
    Number,
    Boolean,
    List,
    Map,
    /// No type check.
    Any,
}

impl ParamType {
    /// Get the type name as written in template files.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Float => "float",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::List => "list",
            ParamType::Map => "map",
            ParamType::Any => "any",
        }
    }

    /// Check whether a JSON value is acceptable for this type.
    ///
    /// Floats accept integral JSON numbers since JSON does not distinguish `1` from `1.0`.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Float | ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::List => value.is_array(),
            ParamType::Map => value.is_object(),
            ParamType::Any => true,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown parameter type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseParamTypeError(String);

impl fmt::Display for ParseParamTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown parameter type '{}'. Valid types: string, integer, float, number, boolean, list, map, any",
            self.0
        )
    }
}

impl std::error::Error for ParseParamTypeError {}

impl FromStr for ParamType {
    type Err = ParseParamTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "string" | "str" | "text" => Ok(ParamType::String),
            "integer" | "int" => Ok(ParamType::Integer),
            "float" | "double" => Ok(ParamType::Float),
            "number" | "numeric" => Ok(ParamType::Number),
            "boolean" | "bool" => Ok(ParamType::Boolean),
            "list" | "array" => Ok(ParamType::List),
            "map" | "object" | "dict" => Ok(ParamType::Map),
            "any" => Ok(ParamType::Any),
            _ => Err(ParseParamTypeError(s.to_string())),
        }
    }
}

impl TryFrom<String> for ParamType {
    type Error = ParseParamTypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ParamType> for String {
    fn from(value: ParamType) -> Self {
        value.as_str().to_string()
    }
}

/// Name of a JSON value's type, for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

/// A declared template parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
}

/// A documented result column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReturnField {
    pub name: String,
    /// Free-form type label, e.g. `node` or `list`; not enforced.
    #[serde(rename = "type")]
    pub return_type: String,
    pub description: String,
}

/// A documented input/output pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub input: Map<String, Value>,
    #[serde(default)]
    pub output: Value,
}

/// A named, versioned Cypher query with its parameter schema.
#[derive(Debug, Clone, Serialize)]
pub struct Template {
    pub name: String,
    pub description: String,
    pub purpose: String,
    pub version: String,
    pub updated: NaiveDate,
    pub parameters: Vec<Parameter>,
    pub returns: Vec<ReturnField>,
    pub examples: Vec<Example>,
    pub query: String,
}

/// Short form of a template for listings.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateSummary {
    pub name: String,
    pub description: String,
    pub purpose: String,
    pub version: String,
    pub updated: NaiveDate,
    pub parameters: Vec<String>,
    pub required: Vec<String>,
}

// =========================================================================
// File format
// =========================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TemplateFile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    purpose: String,
    version: String,
    updated: NaiveDate,
    #[serde(default)]
    parameters: serde_yaml::Mapping,
    #[serde(default)]
    returns: serde_yaml::Mapping,
    #[serde(default, alias = "example")]
    examples: OneOrMany<Example>,
    #[serde(alias = "cypher_query")]
    query: String,
}

#[derive(Debug, Deserialize)]
struct ParameterSpec {
    #[serde(rename = "type")]
    param_type: ParamType,
    #[serde(default)]
    description: String,
    #[serde(default)]
    required: bool,
}

#[derive(Debug, Deserialize)]
struct ReturnSpec {
    #[serde(rename = "type", default = "unspecified_type")]
    return_type: String,
    #[serde(default)]
    description: String,
}

fn unspecified_type() -> String {
    "any".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl<T> From<OneOrMany<T>> for Vec<T> {
    fn from(value: OneOrMany<T>) -> Self {
        match value {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

/// Decode an ordered `name -> spec` mapping, keeping declaration order.
fn decode_entries<T: serde::de::DeserializeOwned>(
    template: &str,
    section: &str,
    mapping: serde_yaml::Mapping,
) -> Result<Vec<(String, T)>, ServerError> {
    mapping
        .into_iter()
        .map(|(key, value)| {
            let name = key.as_str().map(str::to_string).ok_or_else(|| {
                ServerError::invalid_template(template, format!("{} keys must be strings", section))
            })?;
            let spec = serde_yaml::from_value(value).map_err(|e| {
                ServerError::invalid_template(template, format!("{} '{}': {}", section, name, e))
            })?;
            Ok((name, spec))
        })
        .collect()
}

impl Template {
    /// Parse a template from YAML source.
    ///
    /// `default_name` is used when the file has no `name` field (normally the file stem).
    pub fn from_yaml(source: &str, default_name: Option<&str>) -> Result<Self, ServerError> {
        let label = default_name.unwrap_or("<unnamed>");
        let file: TemplateFile = serde_yaml::from_str(source)
            .map_err(|e| ServerError::invalid_template(label, e.to_string()))?;

        let name = file
            .name
            .or_else(|| default_name.map(str::to_string))
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| ServerError::invalid_template(label, "template has no name"))?;

        let parameters = decode_entries::<ParameterSpec>(&name, "parameter", file.parameters)?
            .into_iter()
            .map(|(param_name, spec)| Parameter {
                name: param_name,
                param_type: spec.param_type,
                description: spec.description,
                required: spec.required,
            })
            .collect();

        let returns = decode_entries::<ReturnSpec>(&name, "return", file.returns)?
            .into_iter()
            .map(|(return_name, spec)| ReturnField {
                name: return_name,
                return_type: spec.return_type,
                description: spec.description,
            })
            .collect();

        let template = Template {
            name,
            description: file.description,
            purpose: file.purpose,
            version: file.version,
            updated: file.updated,
            parameters,
            returns,
            examples: file.examples.into(),
            query: file.query,
        };

        template.check()?;
        Ok(template)
    }

    /// Verify the template's structural invariants.
    ///
    /// The query body must be non-empty, parameter names must be identifiers,
    /// and every placeholder must be a declared parameter.
    pub fn check(&self) -> Result<(), ServerError> {
        if !IDENTIFIER_RE.is_match(&self.name) {
            return Err(ServerError::invalid_template(
                &self.name,
                "template names must be identifiers",
            ));
        }

        if self.query.trim().is_empty() {
            return Err(ServerError::invalid_template(&self.name, "query body is empty"));
        }

        let mut seen = BTreeSet::new();
        for param in &self.parameters {
            if !IDENTIFIER_RE.is_match(&param.name) {
                return Err(ServerError::invalid_template(
                    &self.name,
                    format!("parameter '{}' is not a valid identifier", param.name),
                ));
            }
            if !seen.insert(param.name.as_str()) {
                return Err(ServerError::invalid_template(
                    &self.name,
                    format!("parameter '{}' is declared twice", param.name),
                ));
            }
        }

        let undeclared: Vec<String> = self
            .placeholders()
            .into_iter()
            .filter(|p| !seen.contains(p.as_str()))
            .collect();
        if !undeclared.is_empty() {
            return Err(ServerError::invalid_template(
                &self.name,
                format!("undeclared placeholders: {}", undeclared.join(", ")),
            ));
        }

        Ok(())
    }

    /// Distinct placeholder names referenced by the query body, sorted.
    pub fn placeholders(&self) -> Vec<String> {
        PLACEHOLDER_RE
            .captures_iter(&self.query)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Look up a declared parameter.
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Names of required parameters in declaration order.
    pub fn required_parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter().filter(|p| p.required)
    }

    /// Build the listing form of this template.
    pub fn summary(&self) -> TemplateSummary {
        TemplateSummary {
            name: self.name.clone(),
            description: self.description.clone(),
            purpose: self.purpose.clone(),
            version: self.version.clone(),
            updated: self.updated,
            parameters: self.parameters.iter().map(|p| p.name.clone()).collect(),
            required: self.required_parameters().map(|p| p.name.clone()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = r#"
description: Find items by category
purpose: Browsing
version: "2.1"
updated: 2024-05-01
parameters:
  category:
    type: string
    description: Category to match
    required: true
  limit:
    type: integer
    description: Maximum rows
returns:
  item:
    type: node
    description: Matching item
query: |
  MATCH (i:Item {category: $category}) RETURN i AS item LIMIT $limit
"#;

    #[test]
    fn test_parse_keeps_parameter_order() {
        let template = Template::from_yaml(SAMPLE, Some("items_by_category")).unwrap();
        assert_eq!(template.name, "items_by_category");
        assert_eq!(template.version, "2.1");
        assert_eq!(template.updated, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());

        let names: Vec<&str> = template.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["category", "limit"]);
        assert!(template.parameter("category").unwrap().required);
        assert!(!template.parameter("limit").unwrap().required);
        assert_eq!(template.parameter("limit").unwrap().param_type, ParamType::Integer);
        assert_eq!(template.returns.len(), 1);
        assert!(template.examples.is_empty());
    }

    #[test]
    fn test_dollar_in_literals_and_comments_is_not_a_placeholder() {
        let source = r#"
name: priced_items
version: "1.0"
updated: 2024-05-01
parameters:
  category:
    type: string
query: |
  // filter by $category only
  MATCH (i:Item {category: $category})
  /* $block comment */
  RETURN i.name + ' price in $USD' AS label, "cost: \"$EUR\"" AS other, i.`$raw` AS raw
"#;
        let template = Template::from_yaml(source, None).unwrap();
        assert_eq!(template.placeholders(), vec!["category"]);
    }

    #[test]
    fn test_name_field_wins_over_file_stem() {
        let source = format!("name: explicit\n{}", SAMPLE.trim_start());
        let template = Template::from_yaml(&source, Some("stem")).unwrap();
        assert_eq!(template.name, "explicit");
    }

    #[test]
    fn test_missing_name_rejected() {
        let err = Template::from_yaml(SAMPLE, None).unwrap_err();
        assert!(matches!(err, ServerError::InvalidTemplate { .. }));
    }

    #[test]
    fn test_undeclared_placeholder_rejected() {
        let source = SAMPLE.replace("LIMIT $limit", "LIMIT $max_rows");
        let err = Template::from_yaml(&source, Some("broken")).unwrap_err();
        assert!(err.to_string().contains("max_rows"));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let source = SAMPLE.replace("type: integer", "type: decimal128");
        let err = Template::from_yaml(&source, Some("broken")).unwrap_err();
        assert!(err.to_string().contains("decimal128"));
    }

    #[test]
    fn test_single_example_alias() {
        let source = format!(
            "{}example:\n  input:\n    category: books\n  output: []\n",
            SAMPLE
        );
        let template = Template::from_yaml(&source, Some("with_example")).unwrap();
        assert_eq!(template.examples.len(), 1);
        assert_eq!(template.examples[0].input["category"], json!("books"));
    }

    #[test]
    fn test_placeholders_are_distinct_and_sorted() {
        let template = Template::from_yaml(SAMPLE, Some("t")).unwrap();
        assert_eq!(template.placeholders(), vec!["category", "limit"]);
    }

    #[test]
    fn test_param_type_accepts() {
        assert!(ParamType::String.accepts(&json!("x")));
        assert!(!ParamType::String.accepts(&json!(1)));
        assert!(ParamType::Integer.accepts(&json!(3)));
        assert!(!ParamType::Integer.accepts(&json!(3.5)));
        assert!(ParamType::Float.accepts(&json!(3)));
        assert!(ParamType::Number.accepts(&json!(3.5)));
        assert!(ParamType::Boolean.accepts(&json!(false)));
        assert!(ParamType::List.accepts(&json!([1, 2])));
        assert!(ParamType::Map.accepts(&json!({"a": 1})));
        assert!(ParamType::Any.accepts(&Value::Null));
    }

    #[test]
    fn test_param_type_parse_aliases() {
        assert_eq!("str".parse::<ParamType>().unwrap(), ParamType::String);
        assert_eq!("BOOL".parse::<ParamType>().unwrap(), ParamType::Boolean);
        assert_eq!("object".parse::<ParamType>().unwrap(), ParamType::Map);
        assert!("uuid".parse::<ParamType>().is_err());
    }

    #[test]
    fn test_summary_lists_required() {
        let summary = Template::from_yaml(SAMPLE, Some("t")).unwrap().summary();
        assert_eq!(summary.parameters, vec!["category", "limit"]);
        assert_eq!(summary.required, vec!["category"]);
    }
}
