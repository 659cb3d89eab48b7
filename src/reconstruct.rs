//! Reconstruct bytes from a (possibly edited) decomposition tree.
//!
//! Serialization is children-first into one scratch buffer. Fields the grammar marks
//! as derived are written as placeholders (their stored value, or zeros) and turned into
//! pending patches; the nodes that reference them add requirements once their own bytes
//! are final. After the whole tree is written:
//!
//! 1. length and count patches are applied (all requirements on one field must agree);
//! 2. checksum patches are applied in document order, so a checksum covering a length
//!    field, or an earlier checksum, sees the final bytes.
//!
//! Grammar and tree are paired by node name in document order. Conditional and optional
//! grammar nodes missing from the tree are skipped; `unparsed` leaves are written back
//! verbatim.

use crate::ast::*;
use crate::checksum;
use crate::codec::{ScalarError, ScalarType};
use crate::decompose::TRAILING_NODE;
use crate::tree::DecompositionNode;
use crate::value::Value;
use std::collections::HashMap;
use std::ops::Range;
use tracing::{debug, debug_span, trace, warn};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReconstructError {
    #[error("{path} @ {offset}: depends on {reference}, which is not present in the tree")]
    MissingDependency {
        path: String,
        offset: usize,
        reference: String,
    },
    #[error("{path} @ {offset}: required node missing from the tree")]
    MissingNode { path: String, offset: usize },
    #[error("{path} @ {offset}: tree node {name} does not match the grammar")]
    UnexpectedNode {
        path: String,
        offset: usize,
        name: String,
    },
    #[error("{path} @ {offset}: leaf has neither value nor raw bytes")]
    MissingContent { path: String, offset: usize },
    #[error("{path} @ {offset}: expected {expected} byte(s), got {actual}")]
    LengthMismatch {
        path: String,
        offset: usize,
        expected: usize,
        actual: usize,
    },
    #[error("{path} @ {offset}: expected {expected} element(s), got {actual}")]
    CountMismatch {
        path: String,
        offset: usize,
        expected: usize,
        actual: usize,
    },
    #[error("{path} @ {offset}: value {value} does not fit in {width} byte(s)")]
    ValueOverflow {
        path: String,
        offset: usize,
        value: String,
        width: usize,
    },
    #[error("{path} @ {offset}: {message}")]
    InvalidValue {
        path: String,
        offset: usize,
        message: String,
    },
    #[error("{path} @ {offset}: derived value is both {first} and {second}")]
    ConflictingDerivedValue {
        path: String,
        offset: usize,
        first: i128,
        second: i128,
    },
    #[error("{path} @ {offset}: cannot inflate checksum input: {message}")]
    Inflate {
        path: String,
        offset: usize,
        message: String,
    },
}

impl ReconstructError {
    pub fn offset(&self) -> usize {
        match self {
            ReconstructError::MissingDependency { offset, .. }
            | ReconstructError::MissingNode { offset, .. }
            | ReconstructError::UnexpectedNode { offset, .. }
            | ReconstructError::MissingContent { offset, .. }
            | ReconstructError::LengthMismatch { offset, .. }
            | ReconstructError::CountMismatch { offset, .. }
            | ReconstructError::ValueOverflow { offset, .. }
            | ReconstructError::InvalidValue { offset, .. }
            | ReconstructError::ConflictingDerivedValue { offset, .. }
            | ReconstructError::Inflate { offset, .. } => *offset,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            ReconstructError::MissingDependency { path, .. }
            | ReconstructError::MissingNode { path, .. }
            | ReconstructError::UnexpectedNode { path, .. }
            | ReconstructError::MissingContent { path, .. }
            | ReconstructError::LengthMismatch { path, .. }
            | ReconstructError::CountMismatch { path, .. }
            | ReconstructError::ValueOverflow { path, .. }
            | ReconstructError::InvalidValue { path, .. }
            | ReconstructError::ConflictingDerivedValue { path, .. }
            | ReconstructError::Inflate { path, .. } => path,
        }
    }
}

/// A derived field after patching: what the tree held and what was written.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedRecord {
    pub path: String,
    /// Offset of the field in the reconstructed bytes.
    pub offset: usize,
    pub kind: DerivedKind,
    pub stored: Option<Value>,
    pub computed: Value,
    /// A region sized by this length field is directly followed by unparsed trailing
    /// bytes, so the stored length cut the region short.
    pub unparsed_after: bool,
}

impl DerivedRecord {
    pub fn matches(&self) -> bool {
        self.stored.as_ref() == Some(&self.computed)
    }

    /// Stored value agrees with the recomputed one and covers all of its region.
    pub fn is_consistent(&self) -> bool {
        self.matches() && !self.unparsed_after
    }
}

#[derive(Debug, Clone)]
pub struct Reconstruction {
    pub bytes: Vec<u8>,
    /// One record per derived field that was recomputed, in document order.
    pub derived: Vec<DerivedRecord>,
}

/// Reconstruct the bytes described by `tree`.
pub fn reconstruct(grammar: &Grammar, tree: &DecompositionNode) -> Result<Vec<u8>, ReconstructError> {
    Ok(Reconstructor::new(grammar).run(tree)?.bytes)
}

pub struct Reconstructor<'g> {
    grammar: &'g Grammar,
}

impl<'g> Reconstructor<'g> {
    pub fn new(grammar: &'g Grammar) -> Self {
        Reconstructor { grammar }
    }

    pub fn run(&self, tree: &DecompositionNode) -> Result<Reconstruction, ReconstructError> {
        let span = debug_span!("reconstruct", format = %self.grammar.format);
        let _guard = span.enter();

        let mut ctx = Context {
            grammar: self.grammar,
            out: Vec::new(),
            scopes: vec![HashMap::new()],
            starts: vec![0],
            patches: Vec::new(),
            trailing: Vec::new(),
            path: vec![self.grammar.format.clone()],
        };
        let mut children = tree.children.as_slice();
        if self.grammar.magic.as_ref().is_some_and(MagicNumber::is_consumed) {
            match children.split_first() {
                Some((magic, rest)) if magic.name == MagicNumber::NODE_NAME => {
                    ctx.path.push(MagicNumber::NODE_NAME.to_string());
                    let range = ctx.verbatim(magic)?;
                    ctx.path.pop();
                    ctx.bind(MagicNumber::NODE_NAME, Slot { range, patch: None });
                    children = rest;
                }
                _ => {
                    return Err(ReconstructError::MissingNode {
                        path: format!("{}/{}", self.grammar.format, MagicNumber::NODE_NAME),
                        offset: 0,
                    })
                }
            }
        }
        ctx.sequence(&self.grammar.root, children, tree)?;
        let derived = ctx.apply_patches()?;
        debug!(len = ctx.out.len(), derived = derived.len(), "reconstruction complete");
        Ok(Reconstruction { bytes: ctx.out, derived })
    }
}

/// Output range of a named node, and the patch index when it is a derived field.
#[derive(Debug, Clone)]
struct Slot {
    range: Range<usize>,
    patch: Option<usize>,
}

#[derive(Debug)]
struct Patch {
    path: String,
    offset: usize,
    kind: DerivedKind,
    ty: ScalarType,
    range: Range<usize>,
    stored: Option<Value>,
    /// Values required by referencing length/count nodes.
    required: Vec<i128>,
    /// Output end of every region this field sizes.
    sized_ends: Vec<usize>,
    checksum: Option<(ChecksumSpec, Vec<Range<usize>>)>,
}

struct Context<'a> {
    grammar: &'a Grammar,
    out: Vec<u8>,
    scopes: Vec<HashMap<String, Slot>>,
    starts: Vec<usize>,
    patches: Vec<Patch>,
    /// Output start of every unparsed trailing leaf written back.
    trailing: Vec<usize>,
    path: Vec<String>,
}

impl<'a> Context<'a> {
    fn path(&self) -> String {
        self.path.join("/")
    }

    fn bind(&mut self, name: &str, slot: Slot) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), slot);
        }
    }

    fn lookup(&self, name: &str, tree: &DecompositionNode) -> Result<&Slot, ReconstructError> {
        self.scopes
            .iter()
            .rev()
            .find_map(|s| s.get(name))
            .ok_or_else(|| ReconstructError::MissingDependency {
                path: self.path(),
                offset: tree.byte_offset,
                reference: name.to_string(),
            })
    }

    /// Patch index of the derived field `name`.
    fn dependency(&self, name: &str, tree: &DecompositionNode) -> Result<usize, ReconstructError> {
        self.lookup(name, tree)?.patch.ok_or_else(|| ReconstructError::MissingDependency {
            path: self.path(),
            offset: tree.byte_offset,
            reference: name.to_string(),
        })
    }

    fn verbatim(&mut self, tree: &DecompositionNode) -> Result<Range<usize>, ReconstructError> {
        let raw = tree.raw.as_ref().ok_or_else(|| ReconstructError::MissingContent {
            path: self.path(),
            offset: tree.byte_offset,
        })?;
        let start = self.out.len();
        self.out.extend_from_slice(raw);
        Ok(start..self.out.len())
    }

    /// Pair grammar `nodes` with tree `children` by name, then write back trailing leaves.
    fn sequence(
        &mut self,
        nodes: &[GrammarNode],
        children: &[DecompositionNode],
        parent: &DecompositionNode,
    ) -> Result<(), ReconstructError> {
        let mut rest = children.iter().peekable();
        for node in nodes {
            match rest.peek() {
                Some(child) if child.name == node.name() => {
                    self.labeled(node, child, node.name().to_string())?;
                    rest.next();
                }
                _ if node.may_be_absent() => trace!(path = %self.path(), node = node.name(), "absent"),
                next => {
                    return Err(ReconstructError::MissingNode {
                        path: format!("{}/{}", self.path(), node.name()),
                        offset: next.map_or(parent.end(), |c| c.byte_offset),
                    })
                }
            }
        }
        for child in rest {
            if child.unparsed && child.name == TRAILING_NODE {
                let range = self.verbatim(child)?;
                self.trailing.push(range.start);
            } else {
                return Err(ReconstructError::UnexpectedNode {
                    path: self.path(),
                    offset: child.byte_offset,
                    name: child.name.clone(),
                });
            }
        }
        Ok(())
    }

    fn labeled(&mut self, node: &GrammarNode, tree: &DecompositionNode, label: String) -> Result<(), ReconstructError> {
        self.path.push(label);
        let result = match node {
            GrammarNode::Field(f) => self.field(f, tree),
            GrammarNode::Composite(c) => self.composite(c, tree),
            GrammarNode::Repeated(r) => self.repeated(r, tree),
            GrammarNode::Variant(v) => self.variant(v, tree),
        };
        self.path.pop();
        let slot = result?;
        self.bind(node.name(), slot);
        Ok(())
    }

    /// Write a region node's body, then check or derive its byte length.
    fn region(
        &mut self,
        bound: &Option<LengthSpec>,
        tree: &DecompositionNode,
        body: impl FnOnce(&mut Self) -> Result<(), ReconstructError>,
    ) -> Result<Slot, ReconstructError> {
        let dependency = match bound {
            Some(LengthSpec::LengthOf { field, adjust }) => Some((self.dependency(field, tree)?, *adjust)),
            _ => None,
        };
        let start = self.out.len();
        body(self)?;
        let range = start..self.out.len();
        if let Some(LengthSpec::Fixed(n)) = bound {
            if range.len() != *n {
                return Err(ReconstructError::LengthMismatch {
                    path: self.path(),
                    offset: tree.byte_offset,
                    expected: *n,
                    actual: range.len(),
                });
            }
        }
        if let Some((patch, adjust)) = dependency {
            self.require(patch, range.len() as i128 - i128::from(adjust), Some(range.end));
        }
        Ok(Slot { range, patch: None })
    }

    fn require(&mut self, patch: usize, value: i128, sized_end: Option<usize>) {
        if let Some(p) = self.patches.get_mut(patch) {
            p.required.push(value);
            p.sized_ends.extend(sized_end);
        }
    }

    fn composite(&mut self, c: &Composite, tree: &DecompositionNode) -> Result<Slot, ReconstructError> {
        self.region(&c.bound, tree, |ctx| {
            ctx.starts.push(ctx.out.len());
            let result = ctx.sequence(&c.children, &tree.children, tree);
            ctx.starts.pop();
            result
        })
    }

    fn repeated(&mut self, r: &Repeated, tree: &DecompositionNode) -> Result<Slot, ReconstructError> {
        let counter = match &r.count {
            CountSpec::CountOf(field) => Some(self.dependency(field, tree)?),
            _ => None,
        };
        let element = r.element.name();
        let mut count = 0;
        let slot = self.region(&r.bound, tree, |ctx| {
            for child in &tree.children {
                if child.unparsed && child.name == TRAILING_NODE {
                    let range = ctx.verbatim(child)?;
                    ctx.trailing.push(range.start);
                    continue;
                }
                if child.name != element {
                    return Err(ReconstructError::UnexpectedNode {
                        path: ctx.path(),
                        offset: child.byte_offset,
                        name: child.name.clone(),
                    });
                }
                ctx.scopes.push(HashMap::new());
                ctx.starts.push(ctx.out.len());
                let result = ctx.labeled(&r.element, child, format!("{}[{}]", element, count));
                ctx.starts.pop();
                ctx.scopes.pop();
                result?;
                count += 1;
            }
            Ok(())
        })?;
        if let CountSpec::Fixed(n) = r.count {
            if count != n {
                return Err(ReconstructError::CountMismatch {
                    path: self.path(),
                    offset: tree.byte_offset,
                    expected: n,
                    actual: count,
                });
            }
        }
        if let Some(patch) = counter {
            self.require(patch, count as i128, None);
        }
        Ok(slot)
    }

    fn variant(&mut self, v: &Variant, tree: &DecompositionNode) -> Result<Slot, ReconstructError> {
        if tree.unparsed {
            return self.region(&v.bound, tree, |ctx| ctx.verbatim(tree).map(|_| ()));
        }
        let selected = match &tree.case {
            Some(key) => v.cases.iter().find(|(k, _)| k == key).map(|(_, n)| n),
            None => match &v.default {
                VariantDefault::Node(n) => Some(n.as_ref()),
                _ => None,
            },
        };
        let Some(case) = selected else {
            return Err(ReconstructError::UnexpectedNode {
                path: self.path(),
                offset: tree.byte_offset,
                name: tree.case.clone().unwrap_or_else(|| "default".to_string()),
            });
        };
        self.region(&v.bound, tree, |ctx| {
            ctx.starts.push(ctx.out.len());
            let result = ctx.sequence(std::slice::from_ref(case), &tree.children, tree);
            ctx.starts.pop();
            result
        })
    }

    fn field(&mut self, f: &Field, tree: &DecompositionNode) -> Result<Slot, ReconstructError> {
        let dependency = match &f.length {
            LengthSpec::LengthOf { field, adjust } => Some((self.dependency(field, tree)?, *adjust)),
            _ => None,
        };
        let start = self.out.len();
        let mut bytes = self.content(f, tree)?;
        match &f.length {
            LengthSpec::Fixed(n) if bytes.len() != *n => {
                return Err(ReconstructError::LengthMismatch {
                    path: self.path(),
                    offset: tree.byte_offset,
                    expected: *n,
                    actual: bytes.len(),
                })
            }
            LengthSpec::Align(n) => {
                let rel = start - self.starts.last().copied().unwrap_or(0);
                let pad = (n - rel % n) % n;
                if bytes.len() != pad {
                    trace!(path = %self.path(), pad, "padding recomputed");
                    bytes = vec![0; pad];
                }
            }
            _ => {}
        }
        self.out.extend_from_slice(&bytes);
        let range = start..self.out.len();
        if let Some((patch, adjust)) = dependency {
            self.require(patch, range.len() as i128 - i128::from(adjust), Some(range.end));
        }

        let patch = match (f.derived, f.ty.scalar()) {
            (Some(kind), Some(ty)) => {
                let checksum = match &f.checksum {
                    Some(spec) => {
                        let regions = spec
                            .over
                            .iter()
                            .map(|name| self.lookup(name, tree).map(|s| s.range.clone()))
                            .collect::<Result<Vec<_>, _>>()?;
                        Some((spec.clone(), regions))
                    }
                    None => None,
                };
                let stored = tree
                    .value
                    .clone()
                    .or_else(|| tree.raw.as_deref().filter(|r| r.len() == ty.width).and_then(|r| ty.decode(r, self.grammar.byte_order)));
                self.patches.push(Patch {
                    path: self.path(),
                    offset: start,
                    kind,
                    ty: *ty,
                    range: range.clone(),
                    stored,
                    required: Vec::new(),
                    sized_ends: Vec::new(),
                    checksum,
                });
                Some(self.patches.len() - 1)
            }
            _ => None,
        };
        Ok(Slot { range, patch })
    }

    /// Bytes for a leaf: its value encoded per the field type, else its raw bytes.
    ///
    /// Derived fields only need a placeholder of the right width; a stored value that
    /// no longer encodes is replaced by zeros and recomputed later.
    fn content(&self, f: &Field, tree: &DecompositionNode) -> Result<Vec<u8>, ReconstructError> {
        if let (Some(_), Some(s), Some(value)) = (f.derived, f.ty.scalar(), &tree.value) {
            return Ok(s.encode(value, self.grammar.byte_order).unwrap_or_else(|_| vec![0; s.width]));
        }
        if let Some(value) = &tree.value {
            return match (&f.ty, value) {
                (FieldType::Scalar(s), v) => s
                    .encode(v, self.grammar.byte_order)
                    .map_err(|e| self.scalar_error(e, tree)),
                (_, Value::Text(t)) => Ok(t.as_bytes().to_vec()),
                (_, other) => Err(ReconstructError::InvalidValue {
                    path: self.path(),
                    offset: tree.byte_offset,
                    message: format!("non-numeric field cannot hold {}", other),
                }),
            };
        }
        if let Some(raw) = &tree.raw {
            return Ok(raw.clone());
        }
        match (f.derived, f.ty.scalar()) {
            (Some(_), Some(s)) => Ok(vec![0; s.width]),
            _ => Err(ReconstructError::MissingContent {
                path: self.path(),
                offset: tree.byte_offset,
            }),
        }
    }

    fn scalar_error(&self, e: ScalarError, tree: &DecompositionNode) -> ReconstructError {
        match e {
            ScalarError::Overflow { value, width } => ReconstructError::ValueOverflow {
                path: self.path(),
                offset: tree.byte_offset,
                value,
                width,
            },
            ScalarError::NotNumeric(v) => ReconstructError::InvalidValue {
                path: self.path(),
                offset: tree.byte_offset,
                message: format!("{} is not a valid value for this field", v),
            },
        }
    }

    /// Lengths and counts first, then checksums in document order.
    fn apply_patches(&mut self) -> Result<Vec<DerivedRecord>, ReconstructError> {
        let patches = std::mem::take(&mut self.patches);
        let mut records = Vec::new();
        for p in patches.iter().filter(|p| p.checksum.is_none()) {
            let Some((&first, others)) = p.required.split_first() else {
                continue;
            };
            if let Some(&second) = others.iter().find(|v| **v != first) {
                return Err(ReconstructError::ConflictingDerivedValue {
                    path: p.path.clone(),
                    offset: p.offset,
                    first,
                    second,
                });
            }
            records.push(self.write(p, first)?);
        }
        for p in &patches {
            let Some((spec, regions)) = &p.checksum else {
                continue;
            };
            let slices: Vec<&[u8]> = regions.iter().map(|r| &self.out[r.clone()]).collect();
            let sum = checksum::compute(spec.algorithm, spec.input, &slices).map_err(|e| ReconstructError::Inflate {
                path: p.path.clone(),
                offset: p.offset,
                message: e.to_string(),
            })?;
            records.push(self.write(p, i128::from(sum))?);
        }
        records.sort_by_key(|r| r.offset);
        Ok(records)
    }

    fn write(&mut self, p: &Patch, value: i128) -> Result<DerivedRecord, ReconstructError> {
        let overflow = || ReconstructError::ValueOverflow {
            path: p.path.clone(),
            offset: p.offset,
            value: value.to_string(),
            width: p.ty.width,
        };
        let n = u64::try_from(value).map_err(|_| overflow())?;
        let computed = Value::from_u64(n);
        let bytes = p.ty.encode(&computed, self.grammar.byte_order).map_err(|_| overflow())?;
        self.out[p.range.clone()].copy_from_slice(&bytes);
        let record = DerivedRecord {
            path: p.path.clone(),
            offset: p.offset,
            kind: p.kind,
            stored: p.stored.clone(),
            computed,
            unparsed_after: p.sized_ends.iter().any(|end| self.trailing.contains(end)),
        };
        if !record.matches() {
            warn!(path = %record.path, offset = record.offset, computed = %record.computed, "derived field recomputed to a new value");
        } else if record.unparsed_after {
            warn!(path = %record.path, offset = record.offset, "length field leaves unparsed bytes after its region");
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompose::decompose;
    use crate::loader::load;
    use crate::pattern::PatternCatalog;

    fn grammar(json: &str) -> Grammar {
        load(json, &PatternCatalog::with_builtins()).unwrap()
    }

    const TOY: &str = r#"{
        "format": "TOY",
        "magic_number": {"value": "54 4F 59 00", "offset": 0, "length": 4},
        "structure": [
            {"name": "len", "type": "uint32_le", "length": 4},
            {"name": "payload", "type": "bytes", "length_field": "len"}
        ]
    }"#;

    const TOY_BYTES: &[u8] = b"TOY\0\x03\0\0\0ABC";

    #[test]
    fn toy_round_trip() {
        let g = grammar(TOY);
        let tree = decompose(&g, TOY_BYTES).unwrap();
        assert_eq!(reconstruct(&g, &tree).unwrap(), TOY_BYTES);
    }

    #[test]
    fn edited_payload_recomputes_length() {
        let g = grammar(TOY);
        let mut tree = decompose(&g, TOY_BYTES).unwrap();
        tree.child_mut("payload").unwrap().set_raw(b"ABCD".to_vec());
        let out = Reconstructor::new(&g).run(&tree).unwrap();
        assert_eq!(out.bytes, b"TOY\0\x04\0\0\0ABCD");
        assert_eq!(out.derived.len(), 1);
        assert_eq!(out.derived[0].computed, Value::Int(4));
        assert_eq!(out.derived[0].stored, Some(Value::Int(3)));
        assert!(!out.derived[0].matches());
    }

    #[test]
    fn out_of_range_length_edit_is_recomputed() {
        let g = grammar(TOY);
        let mut tree = decompose(&g, TOY_BYTES).unwrap();
        tree.child_mut("len").unwrap().set_value(Value::Int(1 << 40));
        let out = Reconstructor::new(&g).run(&tree).unwrap();
        assert_eq!(out.bytes, TOY_BYTES);
        assert_eq!(out.derived[0].computed, Value::Int(3));
        assert!(!out.derived[0].matches());
    }

    #[test]
    fn short_length_leaves_unparsed_bytes_after_region() {
        let g = grammar(TOY);
        let tree = decompose(&g, b"TOY\0\x02\0\0\0ABC").unwrap();
        let out = Reconstructor::new(&g).run(&tree).unwrap();
        assert_eq!(out.bytes, b"TOY\0\x02\0\0\0ABC");
        assert!(out.derived[0].matches());
        assert!(out.derived[0].unparsed_after);
        assert!(!out.derived[0].is_consistent());

        let tree = decompose(&g, TOY_BYTES).unwrap();
        let out = Reconstructor::new(&g).run(&tree).unwrap();
        assert!(out.derived[0].is_consistent());
    }

    #[test]
    fn huge_stored_length_does_not_preallocate() {
        let g = grammar(TOY);
        let mut tree = decompose(&g, TOY_BYTES).unwrap();
        tree.byte_length = usize::MAX;
        assert_eq!(tree.end(), usize::MAX);
        assert_eq!(reconstruct(&g, &tree).unwrap(), TOY_BYTES);
    }

    #[test]
    fn fixed_length_edit_is_rejected() {
        let g = grammar(
            r#"{"format": "F", "structure": [{"name": "tag", "type": "ascii", "length": 4}]}"#,
        );
        let mut tree = decompose(&g, b"abcd").unwrap();
        tree.child_mut("tag").unwrap().set_raw(b"abcde".to_vec());
        let err = reconstruct(&g, &tree).unwrap_err();
        assert!(matches!(err, ReconstructError::LengthMismatch { expected: 4, actual: 5, .. }), "{:?}", err);
    }

    #[test]
    fn length_that_no_longer_fits_overflows() {
        let g = grammar(
            r#"{"format": "O", "structure": [
                {"name": "n", "type": "uint8"},
                {"name": "data", "type": "bytes", "length_field": "n"}
            ]}"#,
        );
        let mut tree = decompose(&g, &[1, 0xFF]).unwrap();
        tree.child_mut("data").unwrap().set_raw(vec![0; 300]);
        assert!(matches!(reconstruct(&g, &tree), Err(ReconstructError::ValueOverflow { width: 1, .. })));
    }

    #[test]
    fn missing_required_node() {
        let g = grammar(TOY);
        let mut tree = decompose(&g, TOY_BYTES).unwrap();
        tree.children.retain(|c| c.name != "payload");
        let err = reconstruct(&g, &tree).unwrap_err();
        assert_eq!(err.path(), "TOY/payload");
        assert!(matches!(err, ReconstructError::MissingNode { .. }));
    }

    #[test]
    fn missing_length_dependency() {
        let g = grammar(
            r#"{"format": "D", "structure": [
                {"name": "flag", "type": "uint8"},
                {"name": "n", "type": "uint8", "condition": {"field": "flag", "equals": 1}},
                {"name": "data", "type": "bytes", "length_field": "n"}
            ]}"#,
        );
        let mut tree = decompose(&g, &[1, 2, 7, 7]).unwrap();
        tree.children.retain(|c| c.name != "n");
        let err = reconstruct(&g, &tree).unwrap_err();
        assert!(matches!(err, ReconstructError::MissingDependency { ref reference, .. } if reference == "n"), "{:?}", err);
    }

    #[test]
    fn counted_elements_and_padding() {
        let g = grammar(
            r#"{"format": "P", "structure": [
                {"name": "n", "type": "uint8"},
                {"name": "items", "count_field": "n", "element": {"name": "item", "type": "uint8"}},
                {"name": "pad", "type": "bytes", "align": 4}
            ]}"#,
        );
        let mut tree = decompose(&g, &[2, 9, 9, 0]).unwrap();
        assert_eq!(tree.child("pad").unwrap().byte_length, 1);
        let items = tree.child_mut("items").unwrap();
        let extra = items.children[0].clone();
        items.children.push(extra);
        assert_eq!(reconstruct(&g, &tree).unwrap(), vec![3, 9, 9, 9]);
    }

    #[test]
    fn conflicting_requirements() {
        let g = grammar(
            r#"{"format": "X", "structure": [
                {"name": "n", "type": "uint8"},
                {"name": "a", "type": "bytes", "length_field": "n"},
                {"name": "b", "type": "bytes", "length_field": "n"}
            ]}"#,
        );
        let mut tree = decompose(&g, &[1, 0xA, 0xB]).unwrap();
        tree.child_mut("b").unwrap().set_raw(vec![1, 2]);
        assert!(matches!(
            reconstruct(&g, &tree),
            Err(ReconstructError::ConflictingDerivedValue { first: 1, second: 2, .. })
        ));
    }
}
