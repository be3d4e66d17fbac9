//! Cypher query templates: definitions, the registry, and rendering.

mod definition;
mod registry;
mod renderer;

pub use definition::{
    is_identifier, json_type_name, Example, ParamType, Parameter, ParseParamTypeError,
    ReturnField, Template, TemplateSummary,
};
pub use registry::TemplateRegistry;
pub use renderer::{encode_literal, RenderedQuery, TemplateRenderer, UnknownParameterPolicy};
