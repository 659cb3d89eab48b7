//! Pattern catalog: versioned registry of named, reusable binary idioms.
//!
//! A catalog is an ordinary value. Grammars are loaded against a catalog passed in by
//! the caller, and persisting it is an explicit [`PatternCatalog::save`]. Registration
//! is additive and idempotent by name; a different shape under an existing name is a
//! conflict.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Layout idiom a pattern describes. Determines which grammar node kinds may use it and
/// how a field referencing it is decomposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternShape {
    Magic,
    LengthPrefixed,
    Chunk,
    Composite,
    Conditional,
    Repeated,
    Checksum,
    Padding,
}

impl fmt::Display for PatternShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PatternShape::Magic => "magic",
            PatternShape::LengthPrefixed => "length_prefixed",
            PatternShape::Chunk => "chunk",
            PatternShape::Composite => "composite",
            PatternShape::Conditional => "conditional",
            PatternShape::Repeated => "repeated",
            PatternShape::Checksum => "checksum",
            PatternShape::Padding => "padding",
        };
        f.write_str(s)
    }
}

/// A named binary idiom. Immutable once registered; shared as `Arc<Pattern>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub name: String,
    pub shape: PatternShape,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Optional node template (array of grammar node JSON) expanded into a composite
    /// by grammars that reference the pattern without a body of their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure: Option<serde_json::Value>,
    #[serde(default = "default_reusable")]
    pub reusable: bool,
    #[serde(default, rename = "formats", skip_serializing_if = "Vec::is_empty")]
    pub applicable_formats: Vec<String>,
    /// Any further keys of the catalog entry (e.g. a default `type`).
    #[serde(flatten)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

fn default_reusable() -> bool {
    true
}

impl Pattern {
    pub fn new(name: impl Into<String>, shape: PatternShape) -> Self {
        Pattern {
            name: name.into(),
            shape,
            description: String::new(),
            structure: None,
            reusable: true,
            applicable_formats: Vec::new(),
            parameters: serde_json::Map::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_formats(mut self, formats: &[&str]) -> Self {
        self.applicable_formats = formats.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_structure(mut self, structure: serde_json::Value) -> Self {
        self.structure = Some(structure);
        self
    }

    pub fn with_parameter(mut self, key: &str, value: serde_json::Value) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }

    /// Default field type declared by the pattern, if any.
    pub fn default_type(&self) -> Option<&str> {
        self.parameters.get("type").and_then(|v| v.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("pattern {name} already registered as {existing}, cannot re-register as {proposed}")]
    Conflict {
        name: String,
        existing: PatternShape,
        proposed: PatternShape,
    },
    #[error("catalog entry key {key} does not match pattern name {name}")]
    KeyMismatch { key: String, name: String },
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    version: u64,
    patterns: BTreeMap<String, Pattern>,
}

/// Registry of patterns by name.
#[derive(Debug, Clone, Default)]
pub struct PatternCatalog {
    version: u64,
    patterns: BTreeMap<String, Arc<Pattern>>,
}

impl PatternCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog seeded with the idioms every container format shares.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        for p in builtin_patterns() {
            catalog.insert(p);
        }
        catalog
    }

    /// Register `pattern`. Same name and shape is a no-op; a different shape is a conflict.
    pub fn register(&mut self, pattern: Pattern) -> Result<(), CatalogError> {
        if let Some(existing) = self.patterns.get(&pattern.name) {
            if existing.shape != pattern.shape {
                return Err(CatalogError::Conflict {
                    name: pattern.name,
                    existing: existing.shape,
                    proposed: pattern.shape,
                });
            }
            debug!(pattern = %pattern.name, "pattern already registered");
            return Ok(());
        }
        debug!(pattern = %pattern.name, shape = %pattern.shape, "registering pattern");
        self.insert(pattern);
        Ok(())
    }

    fn insert(&mut self, pattern: Pattern) {
        self.patterns.insert(pattern.name.clone(), Arc::new(pattern));
        self.version += 1;
    }

    /// Register every pattern of `other`, stopping at the first conflict.
    pub fn merge(&mut self, other: &PatternCatalog) -> Result<(), CatalogError> {
        for p in other.patterns.values() {
            self.register(Pattern::clone(p))?;
        }
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<Pattern>> {
        self.patterns.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.patterns.keys().map(String::as_str)
    }

    pub fn patterns(&self) -> impl Iterator<Item = &Arc<Pattern>> {
        self.patterns.values()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Incremented on every new registration.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn from_json(source: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(source)?;
        let mut catalog = Self::new();
        for (key, p) in file.patterns {
            if key != p.name {
                return Err(CatalogError::KeyMismatch { key, name: p.name });
            }
            catalog.register(p)?;
        }
        catalog.version = catalog.version.max(file.version);
        Ok(catalog)
    }

    pub fn to_json(&self) -> Result<String, CatalogError> {
        let file = CatalogFile {
            version: self.version,
            patterns: self
                .patterns
                .iter()
                .map(|(k, v)| (k.clone(), Pattern::clone(v)))
                .collect(),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_json(&source)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), CatalogError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

fn builtin_patterns() -> Vec<Pattern> {
    vec![
        Pattern::new("MAGIC_NUMBER", PatternShape::Magic)
            .with_description("Fixed signature bytes identifying the format"),
        Pattern::new("LENGTH_PREFIXED_DATA", PatternShape::LengthPrefixed)
            .with_description("Data whose size is given by an earlier length field"),
        Pattern::new("CHUNK_CONTAINER", PatternShape::Chunk)
            .with_description("Sequence of tagged, length-prefixed chunks"),
        Pattern::new("PADDING_ALIGNMENT", PatternShape::Padding)
            .with_description("Filler bytes up to an alignment boundary"),
        Pattern::new("CHECKSUM_FIELD", PatternShape::Checksum)
            .with_description("Checksum over other fields, recomputed on reconstruction"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_resolve() {
        let catalog = PatternCatalog::with_builtins();
        assert_eq!(catalog.len(), 5);
        assert_eq!(catalog.resolve("CHECKSUM_FIELD").unwrap().shape, PatternShape::Checksum);
        assert!(catalog.resolve("NOPE").is_none());
    }

    #[test]
    fn register_is_idempotent_by_name_and_shape() {
        let mut catalog = PatternCatalog::with_builtins();
        let v = catalog.version();
        catalog.register(Pattern::new("MAGIC_NUMBER", PatternShape::Magic).with_description("other text")).unwrap();
        assert_eq!(catalog.version(), v);
        assert_eq!(catalog.len(), 5);

        let err = catalog.register(Pattern::new("MAGIC_NUMBER", PatternShape::Padding)).unwrap_err();
        assert!(matches!(err, CatalogError::Conflict { existing: PatternShape::Magic, proposed: PatternShape::Padding, .. }));

        catalog.register(Pattern::new("RIFF_HEADER", PatternShape::Composite)).unwrap();
        assert_eq!(catalog.version(), v + 1);
    }

    #[test]
    fn save_and_load() {
        let mut catalog = PatternCatalog::with_builtins();
        catalog
            .register(
                Pattern::new("PNG_CRC", PatternShape::Checksum)
                    .with_formats(&["PNG"])
                    .with_parameter("type", serde_json::json!("uint32_be")),
            )
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        catalog.save(&path).unwrap();

        let loaded = PatternCatalog::load(&path).unwrap();
        assert_eq!(loaded.len(), catalog.len());
        assert_eq!(loaded.version(), catalog.version());
        let p = loaded.resolve("PNG_CRC").unwrap();
        assert_eq!(p.applicable_formats, vec!["PNG".to_string()]);
        assert_eq!(p.default_type(), Some("uint32_be"));
    }

    #[test]
    fn catalog_file_key_must_match_name() {
        let src = r#"{"patterns": {"A": {"name": "B", "shape": "magic"}}}"#;
        assert!(matches!(PatternCatalog::from_json(src), Err(CatalogError::KeyMismatch { .. })));
    }

    #[test]
    fn merge_stops_on_conflict() {
        let mut a = PatternCatalog::with_builtins();
        let mut b = PatternCatalog::new();
        b.register(Pattern::new("CHUNK_CONTAINER", PatternShape::Repeated)).unwrap();
        assert!(matches!(a.merge(&b), Err(CatalogError::Conflict { .. })));
    }
}
