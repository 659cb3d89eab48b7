//! Load a JSON format grammar into a validated [`Grammar`].
//!
//! Loading runs in three steps:
//!
//! 1. **Parse**: serde into raw node records (unknown keys rejected).
//! 2. **Resolve**: every node becomes a typed [`GrammarNode`]; pattern references are
//!    resolved against the caller's [`PatternCatalog`], pattern shapes are checked against
//!    node kinds, and body-less nodes naming a pattern with a `structure` template are
//!    expanded.
//! 3. **Order check**: a walk in document order with a scoped symbol table verifies that
//!    every length, count, discriminant, condition and checksum reference names a node
//!    defined earlier. Fields that other nodes derive (lengths, counts, checksums) are
//!    marked here.
//!
//! Every error names the node path (`FORMAT/header/size`).

use crate::ast::*;
use crate::checksum::{ChecksumAlgorithm, ChecksumInput};
use crate::codec::{Endianness, ScalarKind};
use crate::pattern::{Pattern, PatternCatalog, PatternShape};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum GrammarError {
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid byte_order {0:?} (expected \"little-endian\" or \"big-endian\")")]
    InvalidByteOrder(String),
    #[error("magic_number: {0}")]
    InvalidMagic(String),
    #[error("{path}: unknown pattern {pattern}")]
    UnknownPattern { path: String, pattern: String },
    #[error("{path}: pattern {pattern} has shape {shape}, which cannot be used by a {kind}")]
    ShapeMismatch {
        path: String,
        pattern: String,
        shape: PatternShape,
        kind: &'static str,
    },
    #[error("{path}: structure template of pattern {pattern} is invalid: {message}")]
    InvalidTemplate {
        path: String,
        pattern: String,
        message: String,
    },
    #[error("{path}: pattern {pattern} expands into itself")]
    RecursivePattern { path: String, pattern: String },
    #[error("{path}: unknown type {ty:?}")]
    InvalidType { path: String, ty: String },
    #[error("{path}: {message}")]
    InvalidLength { path: String, message: String },
    #[error("{path}: {message}")]
    InvalidNode { path: String, message: String },
    #[error("{path}: reference to {reference} which is not defined before this node")]
    ForwardReference { path: String, reference: String },
    #[error("{path}: reference to unknown node {reference}")]
    UnresolvedReference { path: String, reference: String },
    #[error("{path}: {reference} is not an integer field")]
    NotAnInteger { path: String, reference: String },
    #[error("{path}: {reference} is not a field")]
    NotAField { path: String, reference: String },
    #[error("{path}: duplicate name {name} in the same scope")]
    DuplicateName { path: String, name: String },
    #[error("{path}: field {reference} is already derived by another node")]
    ConflictingDerivation { path: String, reference: String },
    #[error("{path}: variant cases are not exhaustive and no default is declared")]
    NonExhaustiveVariant { path: String },
    #[error("{path}: case key {key:?} does not match the discriminant type")]
    InvalidCaseKey { path: String, key: String },
}

// ---------------------------------------------------------------------------
// Raw JSON records
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGrammar {
    format: String,
    #[serde(default)]
    byte_order: Option<String>,
    #[serde(default)]
    magic_number: Option<RawMagic>,
    structure: Vec<RawNode>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMagic {
    value: String,
    #[serde(default)]
    offset: usize,
    #[serde(default)]
    length: Option<usize>,
}

#[derive(Deserialize, Clone)]
#[serde(deny_unknown_fields)]
struct RawNode {
    name: String,
    #[serde(default, rename = "type")]
    ty: Option<String>,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    length: Option<RawAmount>,
    #[serde(default)]
    length_field: Option<String>,
    #[serde(default)]
    length_adjust: Option<i64>,
    #[serde(default)]
    reserve: Option<usize>,
    #[serde(default)]
    align: Option<usize>,
    #[serde(default)]
    count: Option<RawAmount>,
    #[serde(default)]
    count_field: Option<String>,
    #[serde(default)]
    components: Option<Vec<RawNode>>,
    #[serde(default)]
    element: Option<Box<RawNode>>,
    #[serde(default)]
    variants: Option<BTreeMap<String, RawNode>>,
    #[serde(default)]
    discriminant: Option<String>,
    #[serde(default)]
    default: Option<RawDefault>,
    #[serde(default)]
    condition: Option<RawCondition>,
    #[serde(default)]
    optional: bool,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    checksum: Option<RawChecksum>,
    #[serde(default, rename = "description")]
    _description: Option<serde::de::IgnoredAny>,
}

#[derive(Deserialize, Clone)]
#[serde(untagged)]
enum RawAmount {
    Bytes(usize),
    Keyword(String),
}

#[derive(Deserialize, Clone)]
#[serde(untagged)]
enum RawDefault {
    Keyword(String),
    Node(Box<RawNode>),
}

#[derive(Deserialize, Clone)]
#[serde(deny_unknown_fields)]
struct RawCondition {
    field: String,
    #[serde(default)]
    equals: Option<serde_json::Value>,
    #[serde(default)]
    not_equals: Option<serde_json::Value>,
    #[serde(default)]
    odd: bool,
    #[serde(default)]
    even: bool,
}

#[derive(Deserialize, Clone)]
#[serde(deny_unknown_fields)]
struct RawChecksum {
    algorithm: ChecksumAlgorithm,
    over: Vec<String>,
    #[serde(default)]
    input: ChecksumInput,
}

const UNTIL_EOF: &str = "until_eof";

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Loads grammars against one catalog.
pub struct GrammarLoader<'c> {
    catalog: &'c PatternCatalog,
}

/// Load a grammar from JSON source against `catalog`.
pub fn load(json: &str, catalog: &PatternCatalog) -> Result<Grammar, GrammarError> {
    GrammarLoader::new(catalog).load(json)
}

impl<'c> GrammarLoader<'c> {
    pub fn new(catalog: &'c PatternCatalog) -> Self {
        GrammarLoader { catalog }
    }

    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Grammar, GrammarError> {
        let source = std::fs::read_to_string(path)?;
        self.load(&source)
    }

    pub fn load(&self, json: &str) -> Result<Grammar, GrammarError> {
        let raw: RawGrammar = serde_json::from_str(json)?;
        let byte_order = match raw.byte_order.as_deref() {
            None => Endianness::Little,
            Some(s) => Endianness::parse(s).ok_or_else(|| GrammarError::InvalidByteOrder(s.to_string()))?,
        };
        let magic = raw.magic_number.map(|m| self.resolve_magic(m)).transpose()?;

        let mut resolver = Resolver { catalog: self.catalog, expanding: Vec::new() };
        let root = raw
            .structure
            .into_iter()
            .map(|n| resolver.node(n, &raw.format))
            .collect::<Result<Vec<_>, _>>()?;
        let mut grammar = Grammar {
            format: raw.format,
            description: raw.description,
            byte_order,
            magic,
            root,
            catalog_version: self.catalog.version(),
        };

        let derived = OrderCheck::run(&grammar)?;
        let mut ordinal = 0;
        for node in grammar.root.iter_mut() {
            mark_derived(node, &derived, &mut ordinal);
        }
        debug!(
            format = %grammar.format,
            nodes = grammar.root.len(),
            derived = derived.len(),
            "grammar loaded"
        );
        Ok(grammar)
    }

    fn resolve_magic(&self, m: RawMagic) -> Result<MagicNumber, GrammarError> {
        let value = parse_hex(&m.value).map_err(GrammarError::InvalidMagic)?;
        if value.is_empty() {
            return Err(GrammarError::InvalidMagic("empty value".to_string()));
        }
        if let Some(len) = m.length {
            if len != value.len() {
                return Err(GrammarError::InvalidMagic(format!(
                    "length {} does not match value of {} byte(s)",
                    len,
                    value.len()
                )));
            }
        }
        if m.offset.checked_add(value.len()).is_none() {
            return Err(GrammarError::InvalidMagic(format!("offset {} is out of range", m.offset)));
        }
        Ok(MagicNumber {
            value,
            offset: m.offset,
            pattern: self.catalog.resolve("MAGIC_NUMBER"),
        })
    }
}

/// Parse hex text such as `"54 4F 59 00"` or `"0x544f5900"`.
pub fn parse_hex(s: &str) -> Result<Vec<u8>, String> {
    let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    let compact = compact
        .strip_prefix("0x")
        .or_else(|| compact.strip_prefix("0X"))
        .unwrap_or(&compact);
    hex::decode(compact).map_err(|e| format!("invalid hex {:?}: {}", s, e))
}

// ---------------------------------------------------------------------------
// Step 2: raw records to typed nodes
// ---------------------------------------------------------------------------

struct Resolver<'c> {
    catalog: &'c PatternCatalog,
    /// Patterns whose templates are being expanded (guards against self-expansion).
    expanding: Vec<String>,
}

fn shape_allows(shape: PatternShape, kind: &'static str) -> bool {
    use PatternShape::*;
    match kind {
        "field" => matches!(shape, Magic | LengthPrefixed | Checksum | Padding | Conditional),
        "composite" => matches!(shape, Composite | Chunk | LengthPrefixed),
        "repeated" => matches!(shape, Repeated | Chunk),
        "variant" => matches!(shape, Conditional | Chunk),
        _ => false,
    }
}

impl<'c> Resolver<'c> {
    fn node(&mut self, raw: RawNode, parent: &str) -> Result<GrammarNode, GrammarError> {
        let path = format!("{}/{}", parent, raw.name);
        if raw.name.is_empty() || raw.name.contains('/') {
            return Err(GrammarError::InvalidNode {
                path,
                message: "node names must be non-empty and must not contain '/'".to_string(),
            });
        }
        let pattern = match &raw.pattern {
            Some(name) => Some(self.catalog.resolve(name).ok_or_else(|| GrammarError::UnknownPattern {
                path: path.clone(),
                pattern: name.clone(),
            })?),
            None => None,
        };

        let bodies = [raw.components.is_some(), raw.element.is_some(), raw.variants.is_some()]
            .iter()
            .filter(|b| **b)
            .count();
        if bodies > 1 {
            return Err(GrammarError::InvalidNode {
                path,
                message: "only one of components, element and variants may be given".to_string(),
            });
        }

        let template = match (&raw.ty, &pattern) {
            (None, Some(p)) if bodies == 0 => p.structure.clone().map(|t| (p.clone(), t)),
            _ => None,
        };
        let node = if raw.components.is_some() {
            self.composite(raw, pattern.clone(), &path)?
        } else if raw.element.is_some() {
            self.repeated(raw, pattern.clone(), &path)?
        } else if raw.variants.is_some() {
            self.variant(raw, pattern.clone(), &path)?
        } else if let Some((p, t)) = template {
            self.expand(raw, &p, t, &path)?
        } else {
            self.field(raw, pattern.clone(), &path)?
        };

        if let Some(p) = &pattern {
            let kind = node.kind_name();
            if !shape_allows(p.shape, kind) {
                return Err(GrammarError::ShapeMismatch {
                    path,
                    pattern: p.name.clone(),
                    shape: p.shape,
                    kind,
                });
            }
        }
        Ok(node)
    }

    fn expand(
        &mut self,
        mut raw: RawNode,
        pattern: &Arc<Pattern>,
        template: serde_json::Value,
        path: &str,
    ) -> Result<GrammarNode, GrammarError> {
        if self.expanding.contains(&pattern.name) {
            return Err(GrammarError::RecursivePattern {
                path: path.to_string(),
                pattern: pattern.name.clone(),
            });
        }
        let children: Vec<RawNode> =
            serde_json::from_value(template).map_err(|e| GrammarError::InvalidTemplate {
                path: path.to_string(),
                pattern: pattern.name.clone(),
                message: e.to_string(),
            })?;
        debug!(path, pattern = %pattern.name, "expanding pattern template");
        raw.components = Some(children);
        self.expanding.push(pattern.name.clone());
        let node = self.composite(raw, Some(pattern.clone()), path);
        self.expanding.pop();
        node
    }

    fn reject_keys(path: &str, kind: &str, keys: &[(&str, bool)]) -> Result<(), GrammarError> {
        if let Some((key, _)) = keys.iter().find(|(_, present)| *present) {
            return Err(GrammarError::InvalidNode {
                path: path.to_string(),
                message: format!("key {:?} is not valid on a {}", key, kind),
            });
        }
        Ok(())
    }

    fn field(&mut self, raw: RawNode, pattern: Option<Arc<Pattern>>, path: &str) -> Result<GrammarNode, GrammarError> {
        Self::reject_keys(
            path,
            "field",
            &[
                ("count", raw.count.is_some()),
                ("count_field", raw.count_field.is_some()),
                ("discriminant", raw.discriminant.is_some()),
                ("default", raw.default.is_some()),
            ],
        )?;
        let ty_name = raw
            .ty
            .clone()
            .or_else(|| pattern.as_ref().and_then(|p| p.default_type().map(str::to_string)))
            .ok_or_else(|| GrammarError::InvalidNode {
                path: path.to_string(),
                message: "field has no type".to_string(),
            })?;
        let ty = FieldType::parse(&ty_name).ok_or_else(|| GrammarError::InvalidType {
            path: path.to_string(),
            ty: ty_name.clone(),
        })?;
        let length = field_length(&raw, &ty, path)?;
        let shape = pattern.as_ref().map(|p| p.shape);

        let expected = raw
            .value
            .as_deref()
            .map(parse_hex)
            .transpose()
            .map_err(|message| GrammarError::InvalidNode { path: path.to_string(), message })?;
        if let (Some(bytes), LengthSpec::Fixed(n)) = (&expected, &length) {
            if bytes.len() != *n {
                return Err(GrammarError::InvalidLength {
                    path: path.to_string(),
                    message: format!("value has {} byte(s) but field length is {}", bytes.len(), n),
                });
            }
        }
        if shape == Some(PatternShape::Magic) && expected.is_none() {
            return Err(GrammarError::InvalidNode {
                path: path.to_string(),
                message: "a magic number field needs a hex \"value\"".to_string(),
            });
        }
        if shape == Some(PatternShape::LengthPrefixed) && !matches!(length, LengthSpec::LengthOf { .. }) {
            return Err(GrammarError::InvalidLength {
                path: path.to_string(),
                message: "a length-prefixed field needs \"length_field\"".to_string(),
            });
        }

        let checksum = match raw.checksum {
            Some(c) => {
                if !ty.is_integer() {
                    return Err(GrammarError::InvalidNode {
                        path: path.to_string(),
                        message: "checksum fields must have an integer type".to_string(),
                    });
                }
                if c.over.is_empty() {
                    return Err(GrammarError::InvalidNode {
                        path: path.to_string(),
                        message: "checksum must cover at least one node".to_string(),
                    });
                }
                if let Some(s) = shape.filter(|s| *s != PatternShape::Checksum) {
                    return Err(GrammarError::ShapeMismatch {
                        path: path.to_string(),
                        pattern: raw.pattern.clone().unwrap_or_default(),
                        shape: s,
                        kind: "checksum field",
                    });
                }
                Some(ChecksumSpec { algorithm: c.algorithm, over: c.over, input: c.input })
            }
            None if shape == Some(PatternShape::Checksum) => {
                return Err(GrammarError::InvalidNode {
                    path: path.to_string(),
                    message: "a checksum field needs a \"checksum\" declaration".to_string(),
                })
            }
            None => None,
        };

        Ok(GrammarNode::Field(Field {
            name: raw.name,
            ty,
            length,
            pattern,
            condition: raw.condition.map(|c| condition(c, path)).transpose()?,
            optional: raw.optional,
            expected,
            checksum,
            derived: None,
        }))
    }

    fn composite(&mut self, raw: RawNode, pattern: Option<Arc<Pattern>>, path: &str) -> Result<GrammarNode, GrammarError> {
        Self::reject_field_keys(&raw, path, "composite")?;
        Self::reject_keys(
            path,
            "composite",
            &[
                ("count", raw.count.is_some()),
                ("count_field", raw.count_field.is_some()),
                ("discriminant", raw.discriminant.is_some()),
                ("default", raw.default.is_some()),
            ],
        )?;
        let bound = region_bound(&raw, path)?;
        if pattern.as_ref().map(|p| p.shape) == Some(PatternShape::LengthPrefixed)
            && !matches!(bound, Some(LengthSpec::LengthOf { .. }))
        {
            return Err(GrammarError::InvalidLength {
                path: path.to_string(),
                message: "a length-prefixed composite needs \"length_field\"".to_string(),
            });
        }
        let children = raw
            .components
            .unwrap_or_default()
            .into_iter()
            .map(|c| self.node(c, path))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(GrammarNode::Composite(Composite {
            name: raw.name,
            pattern,
            bound,
            condition: raw.condition.map(|c| condition(c, path)).transpose()?,
            children,
        }))
    }

    fn repeated(&mut self, raw: RawNode, pattern: Option<Arc<Pattern>>, path: &str) -> Result<GrammarNode, GrammarError> {
        Self::reject_field_keys(&raw, path, "repeated node")?;
        Self::reject_keys(
            path,
            "repeated node",
            &[("discriminant", raw.discriminant.is_some()), ("default", raw.default.is_some())],
        )?;
        let bound = region_bound(&raw, path)?;
        let count = match (&raw.count, &raw.count_field) {
            (Some(_), Some(_)) => {
                return Err(GrammarError::InvalidNode {
                    path: path.to_string(),
                    message: "count and count_field are mutually exclusive".to_string(),
                })
            }
            (Some(RawAmount::Bytes(n)), None) => CountSpec::Fixed(*n),
            (Some(RawAmount::Keyword(k)), None) if k == UNTIL_EOF => CountSpec::UntilEof,
            (Some(RawAmount::Keyword(k)), None) => {
                return Err(GrammarError::InvalidNode {
                    path: path.to_string(),
                    message: format!("unknown count {:?}", k),
                })
            }
            (None, Some(f)) => CountSpec::CountOf(f.clone()),
            (None, None) => CountSpec::UntilEof,
        };
        let element = raw.element.ok_or_else(|| GrammarError::InvalidNode {
            path: path.to_string(),
            message: "repeated node without element".to_string(),
        })?;
        let element = self.node(*element, path)?;
        Ok(GrammarNode::Repeated(Repeated {
            name: raw.name,
            pattern,
            element: Box::new(element),
            count,
            bound,
            condition: raw.condition.map(|c| condition(c, path)).transpose()?,
        }))
    }

    fn variant(&mut self, raw: RawNode, pattern: Option<Arc<Pattern>>, path: &str) -> Result<GrammarNode, GrammarError> {
        Self::reject_field_keys(&raw, path, "variant")?;
        Self::reject_keys(
            path,
            "variant",
            &[("count", raw.count.is_some()), ("count_field", raw.count_field.is_some())],
        )?;
        let bound = region_bound(&raw, path)?;
        let discriminant = raw.discriminant.clone().ok_or_else(|| GrammarError::InvalidNode {
            path: path.to_string(),
            message: "variant without discriminant".to_string(),
        })?;
        let mut cases = Vec::new();
        for (key, node) in raw.variants.unwrap_or_default() {
            cases.push((key, self.node(node, path)?));
        }
        let default = match raw.default {
            None => VariantDefault::None,
            Some(RawDefault::Keyword(k)) if k == "opaque" => VariantDefault::Opaque,
            Some(RawDefault::Keyword(k)) => {
                return Err(GrammarError::InvalidNode {
                    path: path.to_string(),
                    message: format!("unknown default {:?} (expected a node or \"opaque\")", k),
                })
            }
            Some(RawDefault::Node(n)) => VariantDefault::Node(Box::new(self.node(*n, path)?)),
        };
        Ok(GrammarNode::Variant(Variant {
            name: raw.name,
            pattern,
            discriminant,
            cases,
            default,
            bound,
            condition: raw.condition.map(|c| condition(c, path)).transpose()?,
        }))
    }

    fn reject_field_keys(raw: &RawNode, path: &str, kind: &str) -> Result<(), GrammarError> {
        Self::reject_keys(
            path,
            kind,
            &[
                ("type", raw.ty.is_some()),
                ("value", raw.value.is_some()),
                ("checksum", raw.checksum.is_some()),
                ("align", raw.align.is_some()),
                ("reserve", raw.reserve.is_some()),
                ("optional", raw.optional),
            ],
        )
    }
}

fn field_length(raw: &RawNode, ty: &FieldType, path: &str) -> Result<LengthSpec, GrammarError> {
    let invalid = |message: String| GrammarError::InvalidLength { path: path.to_string(), message };
    if raw.length_adjust.is_some() && raw.length_field.is_none() {
        return Err(invalid("length_adjust requires length_field".to_string()));
    }
    if raw.reserve.is_some() && !matches!(&raw.length, Some(RawAmount::Keyword(k)) if k == UNTIL_EOF) {
        return Err(invalid("reserve requires length \"until_eof\"".to_string()));
    }
    let given = [raw.length.is_some(), raw.length_field.is_some(), raw.align.is_some()]
        .iter()
        .filter(|b| **b)
        .count();
    if given > 1 {
        return Err(invalid("only one of length, length_field and align may be given".to_string()));
    }
    if let Some(s) = ty.scalar() {
        return match &raw.length {
            None if given == 0 => Ok(LengthSpec::Fixed(s.width)),
            Some(RawAmount::Bytes(n)) if *n == s.width => Ok(LengthSpec::Fixed(s.width)),
            _ => Err(invalid(format!("numeric fields are exactly {} byte(s) long", s.width))),
        };
    }
    match (&raw.length, &raw.length_field, raw.align) {
        (Some(RawAmount::Bytes(n)), None, None) => Ok(LengthSpec::Fixed(*n)),
        (Some(RawAmount::Keyword(k)), None, None) if k == UNTIL_EOF => Ok(LengthSpec::UntilEof {
            reserve: raw.reserve.unwrap_or(0),
        }),
        (Some(RawAmount::Keyword(k)), None, None) => Err(invalid(format!("unknown length {:?}", k))),
        (None, Some(f), None) => Ok(LengthSpec::LengthOf {
            field: f.clone(),
            adjust: raw.length_adjust.unwrap_or(0),
        }),
        (None, None, Some(0)) => Err(invalid("align must be at least 1".to_string())),
        (None, None, Some(n)) => Ok(LengthSpec::Align(n)),
        _ => Err(invalid("field has no length".to_string())),
    }
}

fn region_bound(raw: &RawNode, path: &str) -> Result<Option<LengthSpec>, GrammarError> {
    let invalid = |message: &str| GrammarError::InvalidLength { path: path.to_string(), message: message.to_string() };
    if raw.length_adjust.is_some() && raw.length_field.is_none() {
        return Err(invalid("length_adjust requires length_field"));
    }
    match (&raw.length, &raw.length_field) {
        (None, None) => Ok(None),
        (Some(RawAmount::Bytes(n)), None) => Ok(Some(LengthSpec::Fixed(*n))),
        (Some(RawAmount::Keyword(k)), None) if k == UNTIL_EOF => Ok(None),
        (Some(RawAmount::Keyword(_)), None) => Err(invalid("unknown length keyword")),
        (None, Some(f)) => Ok(Some(LengthSpec::LengthOf {
            field: f.clone(),
            adjust: raw.length_adjust.unwrap_or(0),
        })),
        (Some(_), Some(_)) => Err(invalid("length and length_field are mutually exclusive")),
    }
}

fn literal(v: serde_json::Value, path: &str) -> Result<Literal, GrammarError> {
    match v {
        serde_json::Value::Number(n) => n.as_i64().map(Literal::Int).ok_or_else(|| GrammarError::InvalidNode {
            path: path.to_string(),
            message: format!("condition value {} is not an integer", n),
        }),
        serde_json::Value::String(s) => Ok(Literal::Text(s)),
        other => Err(GrammarError::InvalidNode {
            path: path.to_string(),
            message: format!("condition value {} must be an integer or a string", other),
        }),
    }
}

fn condition(c: RawCondition, path: &str) -> Result<Condition, GrammarError> {
    let field = c.field;
    match (c.equals, c.not_equals, c.odd, c.even) {
        (Some(v), None, false, false) => Ok(Condition::Equals { field, value: literal(v, path)? }),
        (None, Some(v), false, false) => Ok(Condition::NotEquals { field, value: literal(v, path)? }),
        (None, None, true, false) => Ok(Condition::Odd { field }),
        (None, None, false, true) => Ok(Condition::Even { field }),
        _ => Err(GrammarError::InvalidNode {
            path: path.to_string(),
            message: "condition needs exactly one of equals, not_equals, odd, even".to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Step 3: document-order reference check
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Binding {
    /// Ordinal of the field in document order; `None` for non-field nodes.
    ordinal: Option<usize>,
    ty: Option<FieldType>,
}

struct OrderCheck {
    all_names: HashSet<String>,
    scopes: Vec<HashMap<String, Binding>>,
    next_ordinal: usize,
    derived: HashMap<usize, DerivedKind>,
}

fn collect_names(node: &GrammarNode, out: &mut HashSet<String>) {
    out.insert(node.name().to_string());
    for c in node.children() {
        collect_names(c, out);
    }
}

impl OrderCheck {
    fn run(grammar: &Grammar) -> Result<HashMap<usize, DerivedKind>, GrammarError> {
        let mut all_names = HashSet::new();
        for n in &grammar.root {
            collect_names(n, &mut all_names);
        }
        let mut check = OrderCheck {
            all_names,
            scopes: vec![HashMap::new()],
            next_ordinal: 0,
            derived: HashMap::new(),
        };
        if grammar.magic.as_ref().is_some_and(MagicNumber::is_consumed) {
            check.bind(&grammar.format, MagicNumber::NODE_NAME, Binding { ordinal: None, ty: Some(FieldType::Bytes) })?;
        }
        for n in &grammar.root {
            check.visit(n, &grammar.format)?;
        }
        Ok(check.derived)
    }

    fn lookup(&self, path: &str, reference: &str) -> Result<Binding, GrammarError> {
        for scope in self.scopes.iter().rev() {
            if let Some(b) = scope.get(reference) {
                return Ok(b.clone());
            }
        }
        if self.all_names.contains(reference) {
            Err(GrammarError::ForwardReference { path: path.to_string(), reference: reference.to_string() })
        } else {
            Err(GrammarError::UnresolvedReference { path: path.to_string(), reference: reference.to_string() })
        }
    }

    fn lookup_field(&self, path: &str, reference: &str) -> Result<(usize, FieldType), GrammarError> {
        match self.lookup(path, reference)? {
            Binding { ordinal: Some(o), ty: Some(t) } => Ok((o, t)),
            _ => Err(GrammarError::NotAField { path: path.to_string(), reference: reference.to_string() }),
        }
    }

    fn mark(&mut self, path: &str, reference: &str, kind: DerivedKind) -> Result<(), GrammarError> {
        let (ordinal, ty) = self.lookup_field(path, reference)?;
        if !ty.is_integer() {
            return Err(GrammarError::NotAnInteger { path: path.to_string(), reference: reference.to_string() });
        }
        match self.derived.insert(ordinal, kind) {
            Some(prev) if prev != kind => Err(GrammarError::ConflictingDerivation {
                path: path.to_string(),
                reference: reference.to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn bind(&mut self, path: &str, name: &str, binding: Binding) -> Result<(), GrammarError> {
        let Some(scope) = self.scopes.last_mut() else {
            return Ok(());
        };
        if scope.insert(name.to_string(), binding).is_some() {
            return Err(GrammarError::DuplicateName { path: path.to_string(), name: name.to_string() });
        }
        Ok(())
    }

    fn bound(&mut self, path: &str, bound: &Option<LengthSpec>) -> Result<(), GrammarError> {
        if let Some(LengthSpec::LengthOf { field, .. }) = bound {
            self.mark(path, field, DerivedKind::Length)?;
        }
        Ok(())
    }

    fn visit(&mut self, node: &GrammarNode, parent: &str) -> Result<(), GrammarError> {
        let path = format!("{}/{}", parent, node.name());
        if let Some(c) = node.condition() {
            self.lookup_field(&path, c.field())?;
        }
        match node {
            GrammarNode::Field(f) => {
                let ordinal = self.next_ordinal;
                self.next_ordinal += 1;
                if let LengthSpec::LengthOf { field, .. } = &f.length {
                    self.mark(&path, field, DerivedKind::Length)?;
                }
                if let Some(spec) = &f.checksum {
                    for covered in &spec.over {
                        self.lookup(&path, covered)?;
                    }
                    self.derived.insert(ordinal, DerivedKind::Checksum);
                }
                self.bind(parent, &f.name, Binding { ordinal: Some(ordinal), ty: Some(f.ty) })
            }
            GrammarNode::Composite(c) => {
                self.bound(&path, &c.bound)?;
                for child in &c.children {
                    self.visit(child, &path)?;
                }
                self.bind(parent, &c.name, Binding { ordinal: None, ty: None })
            }
            GrammarNode::Repeated(r) => {
                self.bound(&path, &r.bound)?;
                if let CountSpec::CountOf(field) = &r.count {
                    self.mark(&path, field, DerivedKind::Count)?;
                }
                self.scopes.push(HashMap::new());
                let result = self.visit(&r.element, &path);
                self.scopes.pop();
                result?;
                self.bind(parent, &r.name, Binding { ordinal: None, ty: None })
            }
            GrammarNode::Variant(v) => {
                let (_, ty) = self.lookup_field(&path, &v.discriminant)?;
                self.check_cases(&path, v, &ty)?;
                self.bound(&path, &v.bound)?;
                let before = self.scopes.last().cloned().unwrap_or_default();
                let mut merged = before.clone();
                let alternatives = v.cases.iter().map(|(_, n)| n).chain(match &v.default {
                    VariantDefault::Node(n) => Some(n.as_ref()),
                    _ => None,
                });
                for case in alternatives {
                    if let Some(top) = self.scopes.last_mut() {
                        *top = before.clone();
                    }
                    self.visit(case, &path)?;
                    if let Some(top) = self.scopes.last() {
                        for (k, b) in top {
                            merged.entry(k.clone()).or_insert_with(|| b.clone());
                        }
                    }
                }
                if let Some(top) = self.scopes.last_mut() {
                    *top = merged;
                }
                self.bind(parent, &v.name, Binding { ordinal: None, ty: None })
            }
        }
    }

    fn check_cases(&self, path: &str, v: &Variant, ty: &FieldType) -> Result<(), GrammarError> {
        let integer = ty.is_integer();
        let mut keys = HashSet::new();
        for (key, _) in &v.cases {
            if integer {
                let k = parse_int_key(key).ok_or_else(|| GrammarError::InvalidCaseKey {
                    path: path.to_string(),
                    key: key.clone(),
                })?;
                keys.insert(k);
            }
        }
        if matches!(v.default, VariantDefault::None) {
            let exhaustive = matches!(ty, FieldType::Scalar(s) if s.kind == ScalarKind::Unsigned && s.width == 1)
                && (0..=255).all(|k| keys.contains(&k));
            if !exhaustive {
                return Err(GrammarError::NonExhaustiveVariant { path: path.to_string() });
            }
        }
        Ok(())
    }
}

/// Apply derived marks by field ordinal, in the same order [`OrderCheck::visit`] numbers them.
fn mark_derived(node: &mut GrammarNode, derived: &HashMap<usize, DerivedKind>, ordinal: &mut usize) {
    match node {
        GrammarNode::Field(f) => {
            f.derived = derived.get(ordinal).copied();
            *ordinal += 1;
        }
        GrammarNode::Composite(c) => {
            for child in c.children.iter_mut() {
                mark_derived(child, derived, ordinal);
            }
        }
        GrammarNode::Repeated(r) => mark_derived(&mut r.element, derived, ordinal),
        GrammarNode::Variant(v) => {
            for (_, case) in v.cases.iter_mut() {
                mark_derived(case, derived, ordinal);
            }
            if let VariantDefault::Node(n) = &mut v.default {
                mark_derived(n, derived, ordinal);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_forms() {
        assert_eq!(parse_hex("54 4F 59 00").unwrap(), b"TOY\0");
        assert_eq!(parse_hex("0x89504e47").unwrap(), vec![0x89, 0x50, 0x4e, 0x47]);
        assert!(parse_hex("5").is_err());
    }

    #[test]
    fn derived_marks_follow_references() {
        let src = r#"{
            "format": "T",
            "structure": [
                {"name": "n", "type": "uint8"},
                {"name": "len", "type": "uint16"},
                {"name": "items", "count_field": "n", "element": {"name": "item", "type": "uint8"}},
                {"name": "data", "type": "bytes", "length_field": "len"}
            ]
        }"#;
        let g = load(src, &PatternCatalog::new()).unwrap();
        let derived = |name: &str| match g.find(name) {
            Some(GrammarNode::Field(f)) => f.derived,
            _ => panic!("{} not a field", name),
        };
        assert_eq!(derived("n"), Some(DerivedKind::Count));
        assert_eq!(derived("len"), Some(DerivedKind::Length));
        assert_eq!(derived("data"), None);
        assert_eq!(derived("items/item"), None);
    }

    #[test]
    fn variant_case_scopes_are_alternatives() {
        let src = r#"{
            "format": "T",
            "structure": [
                {"name": "tag", "type": "uint8"},
                {"name": "body", "discriminant": "tag", "default": "opaque", "variants": {
                    "1": {"name": "x", "type": "uint8"},
                    "2": {"name": "x", "type": "uint16"}
                }}
            ]
        }"#;
        assert!(load(src, &PatternCatalog::new()).is_ok());
    }
}
