//! Core types for the persona catalog.
//!
//! A persona is a named, ordered chain of prompt templates. Catalog files are
//! TOML with one `[[persona]]` table per entry.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

// ─────────────────────────────────────────────────────────────────
// Prompt Template
// ─────────────────────────────────────────────────────────────────

/// Instruction text for one rewrite step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptTemplate(String);

impl PromptTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PromptTemplate {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ─────────────────────────────────────────────────────────────────
// Persona Spec
// ─────────────────────────────────────────────────────────────────

/// One catalog entry: a persona name and its template chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaSpec {
    /// Display name, also the key in the result map.
    pub name: String,

    /// Templates in execution order.
    #[serde(default)]
    pub templates: Vec<PromptTemplate>,

    /// Whether a headline polish pass runs after the last template.
    #[serde(default)]
    pub polish: bool,
}

impl PersonaSpec {
    pub fn new(name: impl Into<String>, templates: Vec<PromptTemplate>) -> Self {
        Self {
            name: name.into(),
            templates,
            polish: false,
        }
    }

    pub fn with_polish(mut self) -> Self {
        self.polish = true;
        self
    }

    /// Total number of model calls one run of this persona makes.
    pub fn step_count(&self) -> usize {
        self.templates.len() + usize::from(self.polish)
    }
}

/// Catalog file layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonaCatalog {
    #[serde(default, rename = "persona")]
    pub personas: Vec<PersonaSpec>,
}

// ─────────────────────────────────────────────────────────────────
// Selection
// ─────────────────────────────────────────────────────────────────

/// Which catalog entries a request runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selection {
    /// Every persona, in catalog order.
    #[default]
    All,
    /// Zero-based catalog indices, in request order.
    Indices(Vec<usize>),
}

impl FromStr for Selection {
    type Err = Error;

    /// Parse the prompt syntax: empty for all, `13` or `1,3` / `1 3` for a
    /// subset. Numbers are 1-based; repeats are dropped.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            return Ok(Selection::All);
        }

        let tokens: Vec<&str> = if s.contains(|c: char| c == ',' || c == '，' || c.is_whitespace())
        {
            s.split(|c: char| c == ',' || c == '，' || c.is_whitespace())
                .filter(|t| !t.is_empty())
                .collect()
        } else {
            // compact form: every digit is one persona
            s.char_indices()
                .map(|(i, c)| &s[i..i + c.len_utf8()])
                .collect()
        };

        let mut indices = Vec::with_capacity(tokens.len());
        for token in tokens {
            let number: usize = token.parse().map_err(|_| {
                Error::invalid_selection(format!("'{}' is not a persona number", token))
            })?;
            if number == 0 {
                return Err(Error::invalid_selection("persona numbers start at 1"));
            }
            if !indices.contains(&(number - 1)) {
                indices.push(number - 1);
            }
        }

        Ok(Selection::Indices(indices))
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::All => write!(f, "all"),
            Selection::Indices(indices) => {
                let numbers: Vec<String> = indices.iter().map(|i| (i + 1).to_string()).collect();
                write!(f, "{}", numbers.join(","))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_empty_is_all() {
        assert_eq!("".parse::<Selection>().unwrap(), Selection::All);
        assert_eq!("  ".parse::<Selection>().unwrap(), Selection::All);
        assert_eq!("ALL".parse::<Selection>().unwrap(), Selection::All);
    }

    #[test]
    fn test_selection_compact_digits() {
        assert_eq!(
            "13".parse::<Selection>().unwrap(),
            Selection::Indices(vec![0, 2])
        );
    }

    #[test]
    fn test_selection_separated() {
        assert_eq!(
            "2, 1，3".parse::<Selection>().unwrap(),
            Selection::Indices(vec![1, 0, 2])
        );
        assert_eq!(
            "10 2".parse::<Selection>().unwrap(),
            Selection::Indices(vec![9, 1])
        );
    }

    #[test]
    fn test_selection_drops_repeats() {
        assert_eq!(
            "1121".parse::<Selection>().unwrap(),
            Selection::Indices(vec![0, 1])
        );
    }

    #[test]
    fn test_selection_rejects_garbage() {
        assert!("1a".parse::<Selection>().is_err());
        assert!("0".parse::<Selection>().is_err());
        assert!("1,-2".parse::<Selection>().is_err());
    }

    #[test]
    fn test_selection_display_round_trip() {
        let sel = Selection::Indices(vec![2, 0]);
        assert_eq!(sel.to_string(), "3,1");
        assert_eq!(sel.to_string().parse::<Selection>().unwrap(), sel);
    }

    #[test]
    fn test_step_count() {
        let spec = PersonaSpec::new("p", vec!["a".into(), "b".into()]);
        assert_eq!(spec.step_count(), 2);
        assert_eq!(spec.with_polish().step_count(), 3);
    }

    #[test]
    fn test_catalog_parse() {
        let catalog: PersonaCatalog = toml::from_str(
            r#"
[[persona]]
name = "P1"
templates = ["T1"]

[[persona]]
name = "P2"
polish = true
templates = ["T1", "T2"]
"#,
        )
        .unwrap();

        assert_eq!(catalog.personas.len(), 2);
        assert!(!catalog.personas[0].polish);
        assert_eq!(catalog.personas[1].templates[1].as_str(), "T2");
    }
}
