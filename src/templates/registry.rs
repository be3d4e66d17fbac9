//! Process-wide template registry.
//!
//! Built once at startup from the built-in definitions plus an optional
//! directory of template files, then shared read-only behind an `Arc`.

use super::definition::Template;
use crate::config::TemplateConfig;
use crate::constants::TEMPLATE_FILE_EXTENSIONS;
use crate::error::ServerError;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Built-in template sources, embedded at compile time.
const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    (
        "create_item",
        include_str!("../../templates/create_item.yaml"),
    ),
    (
        "search_templates",
        include_str!("../../templates/search_templates.yaml"),
    ),
];

/// Immutable name -> template mapping.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, Template>,
}

impl TemplateRegistry {
    /// Build a registry from templates, rejecting duplicate names.
    pub fn from_templates(
        templates: impl IntoIterator<Item = Template>,
    ) -> Result<Self, ServerError> {
        let mut map = HashMap::new();
        for template in templates {
            if map.contains_key(&template.name) {
                return Err(ServerError::invalid_template(
                    &template.name,
                    "duplicate template name",
                ));
            }
            map.insert(template.name.clone(), template);
        }
        Ok(Self { templates: map })
    }

    /// Registry holding only the built-in templates.
    pub fn builtin() -> Result<Self, ServerError> {
        let templates = BUILTIN_TEMPLATES
            .iter()
            .map(|(name, source)| Template::from_yaml(source, Some(name)))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_templates(templates)
    }

    /// Load built-ins plus the configured template directory.
    ///
    /// Directory templates replace built-ins of the same name.
    pub fn load(config: &TemplateConfig) -> Result<Self, ServerError> {
        let mut registry = Self::builtin()?;

        if let Some(dir) = &config.directory {
            for template in load_directory(dir)? {
                if registry.templates.contains_key(&template.name) {
                    warn!(
                        "Template '{}' from {} overrides the built-in definition",
                        template.name,
                        dir.display()
                    );
                }
                registry.templates.insert(template.name.clone(), template);
            }
        }

        info!("Template registry loaded: {} template(s)", registry.len());
        Ok(registry)
    }

    /// Look up a template by name.
    pub fn lookup(&self, name: &str) -> Result<&Template, ServerError> {
        self.templates
            .get(name)
            .ok_or_else(|| ServerError::template_not_found(name))
    }

    /// All templates sorted by name.
    pub fn list(&self) -> Vec<&Template> {
        let mut templates: Vec<&Template> = self.templates.values().collect();
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        templates
    }

    /// Templates whose description or purpose contains `term`, case-insensitively.
    pub fn search(&self, term: &str) -> Vec<&Template> {
        let needle = term.to_lowercase();
        self.list()
            .into_iter()
            .filter(|t| {
                t.description.to_lowercase().contains(&needle)
                    || t.purpose.to_lowercase().contains(&needle)
            })
            .collect()
    }

    /// Number of registered templates.
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// Read every template file in a directory, in file name order.
fn load_directory(dir: &Path) -> Result<Vec<Template>, ServerError> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        ServerError::config(format!(
            "Cannot read template directory {}: {}",
            dir.display(),
            e
        ))
    })?;

    let mut paths: Vec<_> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| TEMPLATE_FILE_EXTENSIONS.contains(&ext))
        })
        .collect();
    paths.sort();

    let mut templates = Vec::with_capacity(paths.len());
    let mut seen: HashMap<String, std::path::PathBuf> = HashMap::new();
    for path in paths {
        let source = std::fs::read_to_string(&path).map_err(|e| {
            ServerError::config(format!("Cannot read template {}: {}", path.display(), e))
        })?;
        let stem = path.file_stem().and_then(|s| s.to_str());
        let template = Template::from_yaml(&source, stem)?;

        if let Some(previous) = seen.insert(template.name.clone(), path.clone()) {
            return Err(ServerError::invalid_template(
                &template.name,
                format!(
                    "defined in both {} and {}",
                    previous.display(),
                    path.display()
                ),
            ));
        }
        debug!("Loaded template '{}' from {}", template.name, path.display());
        templates.push(template);
    }

    Ok(templates)
}
