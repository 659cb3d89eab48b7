//! Grammar tree: the typed, validated form of a JSON format grammar.
//!
//! Built only by the [loader](crate::loader), which resolves pattern references and
//! checks that every reference points backwards in document order. Decomposer and
//! reconstructor match exhaustively on [`GrammarNode`].

use crate::checksum::{ChecksumAlgorithm, ChecksumInput};
use crate::codec::{Endianness, ScalarType};
use crate::pattern::{Pattern, PatternShape};
use std::sync::Arc;

/// A loaded format grammar. Immutable and shareable across threads.
#[derive(Debug, Clone)]
pub struct Grammar {
    pub format: String,
    pub description: Option<String>,
    pub byte_order: Endianness,
    pub magic: Option<MagicNumber>,
    pub root: Vec<GrammarNode>,
    /// Version of the catalog the grammar was resolved against.
    pub catalog_version: u64,
}

/// Format signature. At offset 0 it is consumed as an implicit leading `magic` node;
/// anywhere else it is only checked.
#[derive(Debug, Clone)]
pub struct MagicNumber {
    pub value: Vec<u8>,
    pub offset: usize,
    pub pattern: Option<Arc<Pattern>>,
}

impl MagicNumber {
    pub const NODE_NAME: &'static str = "magic";

    pub fn is_consumed(&self) -> bool {
        self.offset == 0
    }
}

#[derive(Debug, Clone)]
pub enum GrammarNode {
    Field(Field),
    Composite(Composite),
    Repeated(Repeated),
    Variant(Variant),
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub ty: FieldType,
    pub length: LengthSpec,
    pub pattern: Option<Arc<Pattern>>,
    pub condition: Option<Condition>,
    /// Skipped when the enclosing region has no bytes left.
    pub optional: bool,
    /// Bytes the field must contain (magic numbers, fixed tags).
    pub expected: Option<Vec<u8>>,
    pub checksum: Option<ChecksumSpec>,
    /// Set by the loader when another node derives this field's value.
    pub derived: Option<DerivedKind>,
}

#[derive(Debug, Clone)]
pub struct Composite {
    pub name: String,
    pub pattern: Option<Arc<Pattern>>,
    pub bound: Option<LengthSpec>,
    pub condition: Option<Condition>,
    pub children: Vec<GrammarNode>,
}

#[derive(Debug, Clone)]
pub struct Repeated {
    pub name: String,
    pub pattern: Option<Arc<Pattern>>,
    pub element: Box<GrammarNode>,
    pub count: CountSpec,
    pub bound: Option<LengthSpec>,
    pub condition: Option<Condition>,
}

#[derive(Debug, Clone)]
pub struct Variant {
    pub name: String,
    pub pattern: Option<Arc<Pattern>>,
    pub discriminant: String,
    pub cases: Vec<(String, GrammarNode)>,
    pub default: VariantDefault,
    pub bound: Option<LengthSpec>,
    pub condition: Option<Condition>,
}

#[derive(Debug, Clone)]
pub enum VariantDefault {
    Node(Box<GrammarNode>),
    /// Unmatched discriminants produce an opaque `unparsed` leaf.
    Opaque,
    /// Cases are exhaustive.
    None,
}

/// Field content type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldType {
    Scalar(ScalarType),
    Bytes,
    Ascii,
    Utf8,
}

impl FieldType {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "bytes" | "raw" => Some(FieldType::Bytes),
            "ascii" | "string" => Some(FieldType::Ascii),
            "utf8" => Some(FieldType::Utf8),
            _ => ScalarType::parse(name).map(FieldType::Scalar),
        }
    }

    pub fn scalar(&self) -> Option<&ScalarType> {
        match self {
            FieldType::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        self.scalar().is_some_and(ScalarType::is_integer)
    }
}

/// Byte length of a field, or the bound of a region node.
#[derive(Debug, Clone, PartialEq)]
pub enum LengthSpec {
    Fixed(usize),
    /// Length is the value of an earlier integer field plus `adjust`.
    LengthOf { field: String, adjust: i64 },
    /// Up to the end of the enclosing region, leaving `reserve` bytes.
    UntilEof { reserve: usize },
    /// Padding up to the next multiple of `n`, relative to the enclosing node's start.
    Align(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CountSpec {
    Fixed(usize),
    CountOf(String),
    UntilEof,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Equals { field: String, value: Literal },
    NotEquals { field: String, value: Literal },
    Odd { field: String },
    Even { field: String },
}

impl Condition {
    pub fn field(&self) -> &str {
        match self {
            Condition::Equals { field, .. }
            | Condition::NotEquals { field, .. }
            | Condition::Odd { field }
            | Condition::Even { field } => field,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChecksumSpec {
    pub algorithm: ChecksumAlgorithm,
    /// Names of earlier nodes whose bytes are covered, in order.
    pub over: Vec<String>,
    pub input: ChecksumInput,
}

/// How a derived field's value is recomputed at reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedKind {
    Length,
    Count,
    Checksum,
}

impl GrammarNode {
    pub fn name(&self) -> &str {
        match self {
            GrammarNode::Field(f) => &f.name,
            GrammarNode::Composite(c) => &c.name,
            GrammarNode::Repeated(r) => &r.name,
            GrammarNode::Variant(v) => &v.name,
        }
    }

    pub fn pattern(&self) -> Option<&Arc<Pattern>> {
        match self {
            GrammarNode::Field(f) => f.pattern.as_ref(),
            GrammarNode::Composite(c) => c.pattern.as_ref(),
            GrammarNode::Repeated(r) => r.pattern.as_ref(),
            GrammarNode::Variant(v) => v.pattern.as_ref(),
        }
    }

    pub fn pattern_name(&self) -> Option<&str> {
        self.pattern().map(|p| p.name.as_str())
    }

    pub fn shape(&self) -> Option<PatternShape> {
        self.pattern().map(|p| p.shape)
    }

    pub fn condition(&self) -> Option<&Condition> {
        match self {
            GrammarNode::Field(f) => f.condition.as_ref(),
            GrammarNode::Composite(c) => c.condition.as_ref(),
            GrammarNode::Repeated(r) => r.condition.as_ref(),
            GrammarNode::Variant(v) => v.condition.as_ref(),
        }
    }

    /// True when the node may be absent from a decomposition tree.
    pub fn may_be_absent(&self) -> bool {
        self.condition().is_some() || matches!(self, GrammarNode::Field(f) if f.optional)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            GrammarNode::Field(_) => "field",
            GrammarNode::Composite(_) => "composite",
            GrammarNode::Repeated(_) => "repeated",
            GrammarNode::Variant(_) => "variant",
        }
    }

    /// Byte size when it is the same for every input, `None` otherwise (or when it
    /// does not fit in `usize`).
    pub fn static_size(&self) -> Option<usize> {
        if self.may_be_absent() {
            return None;
        }
        match self {
            GrammarNode::Field(f) => match (&f.length, f.ty.scalar()) {
                (_, Some(s)) => Some(s.width),
                (LengthSpec::Fixed(n), None) => Some(*n),
                _ => None,
            },
            GrammarNode::Composite(c) => match &c.bound {
                Some(LengthSpec::Fixed(n)) => Some(*n),
                Some(_) => None,
                None => c
                    .children
                    .iter()
                    .try_fold(0usize, |acc, n| acc.checked_add(n.static_size()?)),
            },
            GrammarNode::Repeated(r) => match (&r.bound, &r.count) {
                (Some(LengthSpec::Fixed(n)), _) => Some(*n),
                (None, CountSpec::Fixed(n)) => r.element.static_size().and_then(|s| s.checked_mul(*n)),
                _ => None,
            },
            GrammarNode::Variant(v) => match &v.bound {
                Some(LengthSpec::Fixed(n)) => Some(*n),
                _ => None,
            },
        }
    }
}

impl Grammar {
    /// Find a node by slash-separated path of names below the root (e.g. `header/riff_size`).
    /// Repeated elements and variant cases are addressed by their own names.
    pub fn find(&self, path: &str) -> Option<&GrammarNode> {
        let mut nodes: Vec<&GrammarNode> = self.root.iter().collect();
        let mut found = None;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let node = *nodes.iter().find(|n| n.name() == segment)?;
            nodes = node.children();
            found = Some(node);
        }
        found
    }
}

impl GrammarNode {
    /// Direct structural children: composite children, the repeated element, variant cases
    /// and default.
    pub fn children(&self) -> Vec<&GrammarNode> {
        match self {
            GrammarNode::Field(_) => Vec::new(),
            GrammarNode::Composite(c) => c.children.iter().collect(),
            GrammarNode::Repeated(r) => vec![r.element.as_ref()],
            GrammarNode::Variant(v) => {
                let mut out: Vec<&GrammarNode> = v.cases.iter().map(|(_, n)| n).collect();
                if let VariantDefault::Node(n) = &v.default {
                    out.push(n);
                }
                out
            }
        }
    }
}

/// Parse an integer case key or literal: decimal (optionally negative) or `0x` hex.
pub fn parse_int_key(s: &str) -> Option<i128> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return i128::from_str_radix(hex, 16).ok();
    }
    s.parse().ok()
}
