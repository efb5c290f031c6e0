//! Persona template registry: the fixed catalog a request selects from.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};

use super::types::{PersonaCatalog, PersonaSpec, Selection};

/// Catalog compiled into the binary.
const BUNDLED_CATALOG: &str = include_str!("../../config/personas.toml");

/// Registry of persona specs, immutable once loaded.
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    personas: Vec<PersonaSpec>,
}

impl TemplateRegistry {
    /// Registry backed by the bundled catalog.
    pub fn bundled() -> Result<Self> {
        Self::from_toml(BUNDLED_CATALOG)
    }

    /// Load a catalog file, or the bundled catalog when no path is given.
    pub fn load(path: Option<&str>) -> Result<Self> {
        match path {
            Some(p) => {
                let path = Path::new(p);
                let content = fs::read_to_string(path).map_err(|e| Error::IoRead {
                    path: path.to_path_buf(),
                    source: e,
                })?;
                debug!(path = %path.display(), "Loading persona catalog");
                Self::from_toml(&content)
            }
            None => Self::bundled(),
        }
    }

    /// Parse and check a catalog document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let catalog: PersonaCatalog = toml::from_str(content).map_err(|e| Error::ConfigParse {
            message: format!("persona catalog: {}", e.message()),
            source: Some(e),
        })?;
        Self::from_specs(catalog.personas)
    }

    pub fn from_specs(personas: Vec<PersonaSpec>) -> Result<Self> {
        if personas.is_empty() {
            return Err(Error::config_validation("persona catalog is empty"));
        }

        let mut seen = HashSet::new();
        for spec in &personas {
            if spec.name.trim().is_empty() {
                return Err(Error::config_validation("persona name cannot be empty"));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(Error::config_validation(format!(
                    "duplicate persona name '{}'",
                    spec.name
                )));
            }
        }

        Ok(Self { personas })
    }

    /// All catalog entries in order.
    pub fn personas(&self) -> &[PersonaSpec] {
        &self.personas
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    /// Resolve a selection to specs, in the order requested.
    pub fn get_persona_specs(&self, selection: &Selection) -> Result<Vec<PersonaSpec>> {
        match selection {
            Selection::All => Ok(self.personas.clone()),
            Selection::Indices(indices) => {
                if indices.is_empty() {
                    return Err(Error::invalid_selection("no persona selected"));
                }
                indices
                    .iter()
                    .map(|&i| {
                        self.personas.get(i).cloned().ok_or_else(|| {
                            Error::invalid_selection(format!(
                                "persona {} does not exist (catalog has {})",
                                i + 1,
                                self.personas.len()
                            ))
                        })
                    })
                    .collect()
            }
        }
    }

    /// Prompt hint listing the choices, e.g. `(1:小A) (2:小B)`.
    pub fn menu(&self) -> String {
        self.personas
            .iter()
            .enumerate()
            .map(|(i, p)| format!("({}:{})", i + 1, p.name))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
