use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use auditscope_types::{NoiseCategory, PLAINTEXT_TYPE};

/// Catalog shipped with the binary
const BUILTIN_CATALOG: &str = include_str!("../noise_categories.toml");

/// Errors raised while loading a noise catalog
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read noise catalog {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid noise catalog: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("duplicate noise category id: {0}")]
    DuplicateId(String),
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default, rename = "category")]
    categories: Vec<NoiseCategory>,
}

/// Immutable set of noise categories, loaded once and shared by reference
#[derive(Clone, Debug, Default)]
pub struct NoiseCatalog {
    categories: Vec<NoiseCategory>,
}

impl NoiseCatalog {
    /// Build a catalog from categories, rejecting duplicate ids
    pub fn new(categories: Vec<NoiseCategory>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        for category in &categories {
            if !seen.insert(category.id.as_str()) {
                return Err(CatalogError::DuplicateId(category.id.clone()));
            }
        }
        Ok(Self { categories })
    }

    /// Parse a catalog from its TOML form (`[[category]]` tables)
    pub fn from_toml(content: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(content)?;
        Self::new(file.categories)
    }

    /// Load a catalog from a TOML file on disk
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// The catalog embedded in the binary
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_toml(BUILTIN_CATALOG)
    }

    pub fn get(&self, id: &str) -> Option<&NoiseCategory> {
        self.categories.iter().find(|c| c.id == id)
    }

    pub fn categories(&self) -> &[NoiseCategory] {
        &self.categories
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

/// Compiled membership test over the enabled noise categories
#[derive(Clone, Default)]
pub struct NoiseClassifier {
    /// Union of exact logger names
    loggers: HashSet<String>,

    /// Concatenated prefixes, checked in order
    prefixes: Vec<String>,

    /// Enabled ids that exist in the catalog
    enabled: Vec<String>,
}

impl NoiseClassifier {
    /// Compile the categories named by `enabled_ids`; unknown ids are skipped
    pub fn new<I, S>(catalog: &NoiseCatalog, enabled_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut classifier = Self::default();

        for id in enabled_ids {
            let id = id.as_ref();
            if classifier.enabled.iter().any(|e| e == id) {
                continue;
            }
            let Some(category) = catalog.get(id) else {
                tracing::debug!(category = %id, "ignoring unknown noise category");
                continue;
            };
            classifier.loggers.extend(category.loggers.iter().cloned());
            classifier.prefixes.extend(category.prefixes.iter().cloned());
            classifier.enabled.push(id.to_string());
        }

        classifier
    }

    /// Check whether a logger name belongs to an enabled category
    pub fn is_noise(&self, logger: &str) -> bool {
        self.loggers.contains(logger) || self.prefixes.iter().any(|p| logger.starts_with(p.as_str()))
    }

    /// Check a record by its logger and top-level type.
    ///
    /// Plain text records are suppressed when the plaintext type itself is
    /// listed as a pseudo logger name.
    pub fn is_noise_record(&self, logger: &str, kind: &str) -> bool {
        if kind == PLAINTEXT_TYPE && self.loggers.contains(PLAINTEXT_TYPE) {
            return true;
        }
        self.is_noise(logger)
    }

    /// Check if nothing is enabled (matches nothing)
    pub fn is_empty(&self) -> bool {
        self.loggers.is_empty() && self.prefixes.is_empty()
    }

    /// Ids of the categories that were actually compiled
    pub fn enabled_ids(&self) -> &[String] {
        &self.enabled
    }
}

impl std::fmt::Debug for NoiseClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoiseClassifier")
            .field("enabled", &self.enabled)
            .field("loggers", &self.loggers.len())
            .field("prefixes", &self.prefixes.len())
            .finish()
    }
}
