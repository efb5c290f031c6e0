//! Persona catalog: named rewrite chains selectable per request.
//!
//! Each persona is an ordered list of prompt templates; the catalog is bundled
//! with the binary and can be replaced through `[personas] catalog`.

mod registry;
mod types;

pub use registry::TemplateRegistry;
pub use types::{PersonaSpec, PromptTemplate, Selection};
