// src/template/mod.rs

//! Transfer templates: definitions, validation and event matching.

pub mod model;
pub mod path_template;
pub mod paths;
pub mod pattern;
pub mod registry;

pub use model::{HopSpec, SourceSpec, Template, TemplateCounters};
pub use path_template::{PathContext, PathTemplate};
pub use pattern::{MatchedFile, SourcePattern};
pub use registry::{validate, TemplateRegistry};
