//! Noise classification over raw extraction candidates.
//!
//! The rule table is loaded once at startup, either from the embedded
//! default (`default_rules.toml`) or from an operator-supplied TOML file, so
//! it can track a changing extraction surface without a rebuild. After load
//! the classifier is a pure function.

use regex::Regex;
use serde::Deserialize;
use std::path::Path;

use crate::error::{BridgeError, Result};

const DEFAULT_RULES: &str = include_str!("default_rules.toml");

/// On-disk shape of a rule table.
#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default = "default_min_length")]
    min_length: usize,
    #[serde(default = "default_keyword_limit")]
    model_keyword_limit: usize,
    #[serde(default)]
    model_keywords: Vec<String>,
    #[serde(default)]
    patterns: Vec<String>,
}

fn default_version() -> u32 {
    1
}

fn default_min_length() -> usize {
    20
}

fn default_keyword_limit() -> usize {
    3
}

/// Compiled noise rule table.
#[derive(Debug)]
pub struct NoiseRules {
    pub version: u32,
    pub min_length: usize,
    model_keyword_limit: usize,
    model_keywords: Vec<String>,
    patterns: Vec<Regex>,
}

impl NoiseRules {
    /// Compile the embedded default table.
    pub fn embedded() -> Self {
        // The embedded table is validated by tests; a parse failure here is a
        // build defect, not a runtime condition.
        Self::from_toml(DEFAULT_RULES).expect("embedded noise rule table is invalid")
    }

    /// Load and compile a rule table from a TOML file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let rules = Self::from_toml(&contents)
            .map_err(|e| BridgeError::Config(format!("{}: {}", path.display(), e)))?;
        tracing::info!(
            version = rules.version,
            patterns = rules.patterns.len(),
            "loaded noise rules from {:?}",
            path
        );
        Ok(rules)
    }

    fn from_toml(contents: &str) -> Result<Self> {
        let file: RuleFile =
            toml::from_str(contents).map_err(|e| BridgeError::Config(e.to_string()))?;

        let mut patterns = Vec::with_capacity(file.patterns.len());
        for raw in &file.patterns {
            let re = Regex::new(raw)
                .map_err(|e| BridgeError::Config(format!("bad pattern '{}': {}", raw, e)))?;
            patterns.push(re);
        }

        Ok(Self {
            version: file.version,
            min_length: file.min_length,
            model_keyword_limit: file.model_keyword_limit,
            model_keywords: file.model_keywords,
            patterns,
        })
    }
}

/// Pure predicate over the rule table: is this raw text UI noise rather than
/// conversation content?
#[derive(Debug)]
pub struct NoiseClassifier {
    rules: NoiseRules,
}

impl NoiseClassifier {
    pub fn new(rules: NoiseRules) -> Self {
        Self { rules }
    }

    pub fn is_noise(&self, text: &str) -> bool {
        let trimmed = text.trim();
        if trimmed.chars().count() < self.rules.min_length {
            return true;
        }

        for pattern in &self.rules.patterns {
            if pattern.is_match(trimmed) {
                return true;
            }
        }

        // Several distinct model names in one blob is a dropdown dump, not a
        // real message.
        let keyword_hits = self
            .rules
            .model_keywords
            .iter()
            .filter(|kw| trimmed.contains(kw.as_str()))
            .count();
        keyword_hits >= self.rules.model_keyword_limit
    }
}

impl Default for NoiseClassifier {
    fn default() -> Self {
        Self::new(NoiseRules::embedded())
    }
}
