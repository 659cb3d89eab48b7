//! Decompose a byte buffer into a [`DecompositionNode`] tree by walking a [`Grammar`].
//!
//! Recursive descent in document order over a single cursor. The walker keeps:
//!
//! - a **region limit**: nodes with a `length`/`length_field` bound, and `until_eof`
//!   fields, stop at the end of the innermost region rather than the end of the buffer;
//! - a **scoped symbol table** of field values already read, used for lengths, counts,
//!   discriminants and conditions (each repeated element iteration gets its own scope);
//! - a **node start stack** for alignment padding.
//!
//! Bytes a region declares but its children do not consume, and bytes after the
//! top-level structure, are kept as `unparsed` leaves so that every decomposition
//! reconstructs to the exact input.

use crate::ast::*;
use crate::loader::parse_hex;
use crate::tree::DecompositionNode;
use crate::value::Value;
use std::collections::HashMap;
use std::ops::Range;
use tracing::{debug, debug_span, trace, warn};

/// Name of the opaque leaf holding bytes left over in a region.
pub const TRAILING_NODE: &str = "trailing";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecomposeError {
    #[error("{path} @ {offset}: truncated data, need {expected} byte(s) but only {available} available")]
    Truncated {
        path: String,
        offset: usize,
        expected: usize,
        available: usize,
    },
    #[error("{path} @ {offset}: no case for discriminant {discriminant}")]
    UnknownVariant {
        path: String,
        offset: usize,
        discriminant: String,
    },
    #[error("{path} @ {offset}: repeated element does not advance (iteration {iteration})")]
    NonProgressingLoop {
        path: String,
        offset: usize,
        iteration: usize,
    },
    #[error("{path} @ {offset}: expected bytes {expected}, found {found}")]
    MagicMismatch {
        path: String,
        offset: usize,
        expected: String,
        found: String,
    },
    #[error("{path} @ {offset}: referenced field {reference} has no usable value")]
    MissingField {
        path: String,
        offset: usize,
        reference: String,
    },
    #[error("{path} @ {offset}: invalid length {value}")]
    InvalidLength { path: String, offset: usize, value: i128 },
    #[error("{path} @ {offset}: more than {limit} repetitions")]
    IterationLimit { path: String, offset: usize, limit: usize },
}

impl DecomposeError {
    /// Byte offset at which decomposition failed.
    pub fn offset(&self) -> usize {
        match self {
            DecomposeError::Truncated { offset, .. }
            | DecomposeError::UnknownVariant { offset, .. }
            | DecomposeError::NonProgressingLoop { offset, .. }
            | DecomposeError::MagicMismatch { offset, .. }
            | DecomposeError::MissingField { offset, .. }
            | DecomposeError::InvalidLength { offset, .. }
            | DecomposeError::IterationLimit { offset, .. } => *offset,
        }
    }

    /// Grammar node path at which decomposition failed.
    pub fn path(&self) -> &str {
        match self {
            DecomposeError::Truncated { path, .. }
            | DecomposeError::UnknownVariant { path, .. }
            | DecomposeError::NonProgressingLoop { path, .. }
            | DecomposeError::MagicMismatch { path, .. }
            | DecomposeError::MissingField { path, .. }
            | DecomposeError::InvalidLength { path, .. }
            | DecomposeError::IterationLimit { path, .. } => path,
        }
    }
}

/// Engine knobs for one decomposition.
#[derive(Debug, Clone, Copy)]
pub struct DecomposeOptions {
    /// Fail with [`DecomposeError::UnknownVariant`] instead of emitting an opaque leaf.
    pub strict_variants: bool,
    /// Upper bound on iterations of any single repeated node.
    pub max_iterations: usize,
}

impl Default for DecomposeOptions {
    fn default() -> Self {
        DecomposeOptions {
            strict_variants: false,
            max_iterations: 1 << 20,
        }
    }
}

/// Decompose `bytes` with default options.
pub fn decompose(grammar: &Grammar, bytes: &[u8]) -> Result<DecompositionNode, DecomposeError> {
    Decomposer::new(grammar).decompose(bytes)
}

pub struct Decomposer<'g> {
    grammar: &'g Grammar,
    options: DecomposeOptions,
}

impl<'g> Decomposer<'g> {
    pub fn new(grammar: &'g Grammar) -> Self {
        Decomposer { grammar, options: DecomposeOptions::default() }
    }

    pub fn with_options(mut self, options: DecomposeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn decompose(&self, bytes: &[u8]) -> Result<DecompositionNode, DecomposeError> {
        let span = debug_span!("decompose", format = %self.grammar.format, len = bytes.len());
        let _guard = span.enter();

        let mut walk = Walk {
            grammar: self.grammar,
            options: self.options,
            data: bytes,
            pos: 0,
            limit: bytes.len(),
            scopes: vec![HashMap::new()],
            starts: vec![0],
            path: vec![self.grammar.format.clone()],
        };
        let mut root = DecompositionNode::branch(&self.grammar.format, 0);
        if let Some(magic) = &self.grammar.magic {
            if let Some(leaf) = walk.magic(magic)? {
                root.children.push(leaf);
            }
        }
        for node in &self.grammar.root {
            if let Some(n) = walk.node(node)? {
                root.children.push(n);
            }
        }
        walk.trailing(&mut root);
        root.byte_length = walk.pos;
        debug!(nodes = root.children.len(), "decomposition complete");
        Ok(root)
    }
}

/// A bound name: a parsed value, or raw bytes of the input.
#[derive(Debug, Clone)]
enum Symbol {
    Value(Value),
    Raw(Range<usize>),
}

struct Walk<'a> {
    grammar: &'a Grammar,
    options: DecomposeOptions,
    data: &'a [u8],
    pos: usize,
    limit: usize,
    scopes: Vec<HashMap<String, Symbol>>,
    starts: Vec<usize>,
    path: Vec<String>,
}

impl<'a> Walk<'a> {
    fn path(&self) -> String {
        self.path.join("/")
    }

    fn remaining(&self) -> usize {
        self.limit - self.pos
    }

    fn truncated(&self, expected: usize) -> DecomposeError {
        DecomposeError::Truncated {
            path: self.path(),
            offset: self.pos,
            expected,
            available: self.remaining(),
        }
    }

    /// Consume `len` bytes of the current region.
    fn take(&mut self, len: usize) -> Result<Range<usize>, DecomposeError> {
        if len > self.remaining() {
            return Err(self.truncated(len));
        }
        let range = self.pos..self.pos + len;
        self.pos += len;
        Ok(range)
    }

    fn bind(&mut self, name: &str, symbol: Symbol) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), symbol);
        }
    }

    fn lookup(&self, name: &str) -> Result<&Symbol, DecomposeError> {
        self.scopes
            .iter()
            .rev()
            .find_map(|s| s.get(name))
            .ok_or_else(|| self.missing(name))
    }

    fn missing(&self, name: &str) -> DecomposeError {
        DecomposeError::MissingField {
            path: self.path(),
            offset: self.pos,
            reference: name.to_string(),
        }
    }

    fn integer(&self, name: &str) -> Result<i128, DecomposeError> {
        match self.lookup(name)? {
            Symbol::Value(v) => v
                .as_i64()
                .map(i128::from)
                .or_else(|| v.as_u64().map(i128::from))
                .ok_or_else(|| self.missing(name)),
            Symbol::Raw(_) => Err(self.missing(name)),
        }
    }

    fn to_usize(&self, value: i128) -> Result<usize, DecomposeError> {
        usize::try_from(value).map_err(|_| DecomposeError::InvalidLength {
            path: self.path(),
            offset: self.pos,
            value,
        })
    }

    fn resolve_length(&self, spec: &LengthSpec) -> Result<usize, DecomposeError> {
        match spec {
            LengthSpec::Fixed(n) => Ok(*n),
            LengthSpec::LengthOf { field, adjust } => {
                let v = self.integer(field)? + i128::from(*adjust);
                self.to_usize(v)
            }
            LengthSpec::UntilEof { reserve } => self
                .remaining()
                .checked_sub(*reserve)
                .ok_or_else(|| self.truncated(*reserve)),
            LengthSpec::Align(n) => {
                let start = self.starts.last().copied().unwrap_or(0);
                let rel = self.pos - start;
                Ok((n - rel % n) % n)
            }
        }
    }

    fn magic(&mut self, magic: &MagicNumber) -> Result<Option<DecompositionNode>, DecomposeError> {
        self.path.push(MagicNumber::NODE_NAME.to_string());
        let end = match magic.offset.checked_add(magic.value.len()) {
            Some(end) if end <= self.data.len() => end,
            _ => {
                return Err(DecomposeError::Truncated {
                    path: self.path(),
                    offset: magic.offset.min(self.data.len()),
                    expected: magic.value.len(),
                    available: self.data.len().saturating_sub(magic.offset),
                })
            }
        };
        let found = &self.data[magic.offset..end];
        if found != magic.value.as_slice() {
            return Err(DecomposeError::MagicMismatch {
                path: self.path(),
                offset: magic.offset,
                expected: hex::encode(&magic.value),
                found: hex::encode(found),
            });
        }
        self.path.pop();
        if !magic.is_consumed() {
            return Ok(None);
        }
        let range = self.take(magic.value.len())?;
        self.bind(MagicNumber::NODE_NAME, Symbol::Raw(range.clone()));
        let mut leaf = DecompositionNode::leaf(MagicNumber::NODE_NAME, range.start, self.data[range].to_vec());
        leaf.pattern_name = magic.pattern.as_ref().map(|p| p.name.clone());
        Ok(Some(leaf))
    }

    fn node(&mut self, node: &GrammarNode) -> Result<Option<DecompositionNode>, DecomposeError> {
        self.node_labeled(node, node.name().to_string())
    }

    fn node_labeled(&mut self, node: &GrammarNode, label: String) -> Result<Option<DecompositionNode>, DecomposeError> {
        self.path.push(label);
        if let Some(c) = node.condition() {
            if !self.condition_holds(c)? {
                trace!(path = %self.path(), "condition false, skipping");
                self.path.pop();
                return Ok(None);
            }
        }
        let out = match node {
            GrammarNode::Field(f) => self.field(f)?,
            GrammarNode::Composite(c) => Some(self.composite(c)?),
            GrammarNode::Repeated(r) => Some(self.repeated(r)?),
            GrammarNode::Variant(v) => Some(self.variant(v)?),
        };
        self.path.pop();
        Ok(out.map(|mut n| {
            n.pattern_name = node.pattern_name().map(str::to_string);
            n
        }))
    }

    fn condition_holds(&self, c: &Condition) -> Result<bool, DecomposeError> {
        let symbol = self.lookup(c.field())?;
        Ok(match c {
            Condition::Equals { value, .. } => self.literal_matches(symbol, value),
            Condition::NotEquals { value, .. } => !self.literal_matches(symbol, value),
            Condition::Odd { .. } => self.integer(c.field())? % 2 != 0,
            Condition::Even { .. } => self.integer(c.field())? % 2 == 0,
        })
    }

    fn literal_matches(&self, symbol: &Symbol, literal: &Literal) -> bool {
        match (symbol, literal) {
            (Symbol::Value(v), Literal::Int(i)) => v.as_i64() == Some(*i),
            (Symbol::Value(Value::Text(t)), Literal::Text(s)) => t == s,
            (Symbol::Raw(r), Literal::Text(s)) => &self.data[r.clone()] == s.as_bytes(),
            _ => false,
        }
    }

    fn case_matches(&self, key: &str, symbol: &Symbol) -> bool {
        match symbol {
            Symbol::Value(Value::Text(t)) => key == t,
            Symbol::Value(v) => {
                let n = v.as_i64().map(i128::from).or_else(|| v.as_u64().map(i128::from));
                n.is_some() && parse_int_key(key) == n
            }
            Symbol::Raw(r) => {
                let bytes = &self.data[r.clone()];
                key.as_bytes() == bytes || parse_hex(key).is_ok_and(|b| b == bytes)
            }
        }
    }

    fn describe(&self, symbol: &Symbol) -> String {
        match symbol {
            Symbol::Value(v) => v.to_string(),
            Symbol::Raw(r) => format!("hex({})", hex::encode(&self.data[r.clone()])),
        }
    }

    fn field(&mut self, f: &Field) -> Result<Option<DecompositionNode>, DecomposeError> {
        if f.optional && self.remaining() == 0 {
            trace!(path = %self.path(), "optional field absent");
            return Ok(None);
        }
        let len = self.resolve_length(&f.length)?;
        let range = self.take(len)?;
        let data = self.data;
        let bytes = &data[range.clone()];
        if let Some(expected) = &f.expected {
            if bytes != expected.as_slice() {
                return Err(DecomposeError::MagicMismatch {
                    path: self.path(),
                    offset: range.start,
                    expected: hex::encode(expected),
                    found: hex::encode(bytes),
                });
            }
        }
        let value = match &f.ty {
            FieldType::Scalar(s) => s.decode(bytes, self.grammar.byte_order),
            FieldType::Ascii if bytes.is_ascii() => std::str::from_utf8(bytes).ok().map(Value::from),
            FieldType::Utf8 => std::str::from_utf8(bytes).ok().map(Value::from),
            FieldType::Ascii | FieldType::Bytes => None,
        };
        let mut leaf = DecompositionNode::leaf(&f.name, range.start, Vec::new());
        leaf.byte_length = len;
        leaf.derived = f.derived.is_some();
        match value {
            Some(v) => {
                self.bind(&f.name, Symbol::Value(v.clone()));
                leaf.raw = None;
                leaf.value = Some(v);
            }
            None => {
                leaf.raw = Some(bytes.to_vec());
                self.bind(&f.name, Symbol::Raw(range));
            }
        }
        trace!(path = %self.path(), offset = leaf.byte_offset, len, "field");
        Ok(Some(leaf))
    }

    /// Enter a bounded region; returns the limit to restore.
    fn enter_region(&mut self, bound: &Option<LengthSpec>) -> Result<Option<usize>, DecomposeError> {
        let Some(spec) = bound else {
            return Ok(None);
        };
        let len = self.resolve_length(spec)?;
        if len > self.remaining() {
            return Err(self.truncated(len));
        }
        let saved = self.limit;
        self.limit = self.pos + len;
        Ok(Some(saved))
    }

    fn leave_region(&mut self, saved: Option<usize>, node: &mut DecompositionNode) {
        if let Some(saved) = saved {
            self.trailing(node);
            self.limit = saved;
        }
    }

    /// Keep unconsumed region bytes as an opaque leaf.
    fn trailing(&mut self, node: &mut DecompositionNode) {
        if self.pos < self.limit {
            let mut leaf = DecompositionNode::leaf(TRAILING_NODE, self.pos, self.data[self.pos..self.limit].to_vec());
            leaf.unparsed = true;
            debug!(path = %self.path(), offset = self.pos, len = leaf.byte_length, "unparsed trailing bytes");
            node.children.push(leaf);
            self.pos = self.limit;
        }
    }

    fn composite(&mut self, c: &Composite) -> Result<DecompositionNode, DecomposeError> {
        let mut out = DecompositionNode::branch(&c.name, self.pos);
        let saved = self.enter_region(&c.bound)?;
        self.starts.push(self.pos);
        for child in &c.children {
            if let Some(n) = self.node(child)? {
                out.children.push(n);
            }
        }
        self.starts.pop();
        self.leave_region(saved, &mut out);
        out.byte_length = self.pos - out.byte_offset;
        Ok(out)
    }

    fn repeated(&mut self, r: &Repeated) -> Result<DecompositionNode, DecomposeError> {
        let mut out = DecompositionNode::branch(&r.name, self.pos);
        let saved = self.enter_region(&r.bound)?;
        let target = match &r.count {
            CountSpec::Fixed(n) => Some(*n),
            CountSpec::CountOf(field) => {
                let n = self.integer(field)?;
                Some(self.to_usize(n)?)
            }
            CountSpec::UntilEof => None,
        };
        if r.element.static_size() == Some(0) && target != Some(0) {
            return Err(DecomposeError::NonProgressingLoop {
                path: self.path(),
                offset: self.pos,
                iteration: 0,
            });
        }
        let mut iteration = 0;
        loop {
            match target {
                Some(n) if iteration >= n => break,
                None if self.pos >= self.limit => break,
                _ => {}
            }
            if iteration >= self.options.max_iterations {
                return Err(DecomposeError::IterationLimit {
                    path: self.path(),
                    offset: self.pos,
                    limit: self.options.max_iterations,
                });
            }
            let start = self.pos;
            self.scopes.push(HashMap::new());
            self.starts.push(start);
            let element = self.node_labeled(&r.element, format!("{}[{}]", r.element.name(), iteration));
            self.starts.pop();
            self.scopes.pop();
            let element = element?;
            if self.pos == start {
                return Err(DecomposeError::NonProgressingLoop {
                    path: self.path(),
                    offset: start,
                    iteration,
                });
            }
            out.children.extend(element);
            iteration += 1;
        }
        self.leave_region(saved, &mut out);
        out.byte_length = self.pos - out.byte_offset;
        trace!(path = %self.path(), count = iteration, "repeated");
        Ok(out)
    }

    fn variant(&mut self, v: &Variant) -> Result<DecompositionNode, DecomposeError> {
        let discriminant = self.lookup(&v.discriminant)?.clone();
        let saved = self.enter_region(&v.bound)?;
        let start = self.pos;
        let selected = v
            .cases
            .iter()
            .find(|(key, _)| self.case_matches(key, &discriminant))
            .map(|(key, node)| (Some(key.clone()), node))
            .or(match &v.default {
                VariantDefault::Node(n) => Some((None, n.as_ref())),
                _ => None,
            });

        let mut out = match selected {
            Some((case, node)) => {
                let mut out = DecompositionNode::branch(&v.name, start);
                out.case = case;
                self.starts.push(start);
                let child = self.node(node);
                self.starts.pop();
                out.children.extend(child?);
                out
            }
            None => {
                let shown = self.describe(&discriminant);
                if self.options.strict_variants {
                    return Err(DecomposeError::UnknownVariant {
                        path: self.path(),
                        offset: start,
                        discriminant: shown,
                    });
                }
                warn!(path = %self.path(), offset = start, discriminant = %shown, "unknown variant kept as opaque bytes");
                let range = self.take(self.remaining())?;
                let mut leaf = DecompositionNode::leaf(&v.name, start, self.data[range].to_vec());
                leaf.unparsed = true;
                leaf
            }
        };
        self.leave_region(saved, &mut out);
        out.byte_length = self.pos - out.byte_offset;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[test]
    fn toy_layout() {
        let g = grammar(TOY);
        let tree = decompose(&g, b"TOY\0\x03\0\0\0ABC").unwrap();
        assert_eq!(tree.name, "TOY");
        assert_eq!(tree.byte_length, 11);
        let names: Vec<_> = tree.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["magic", "len", "payload"]);
        assert_eq!(tree.children[0].pattern_name.as_deref(), Some("MAGIC_NUMBER"));
        assert_eq!(tree.children[1].value, Some(Value::Int(3)));
        assert!(tree.children[1].derived);
        assert_eq!(tree.children[2].byte_offset, 8);
        assert_eq!(tree.children[2].raw.as_deref(), Some(&b"ABC"[..]));
        tree.check_layout().unwrap();
    }

    #[test]
    fn truncated_payload_reports_offset() {
        let g = grammar(TOY);
        let err = decompose(&g, b"TOY\0\x08\0\0\0ABC").unwrap_err();
        assert!(matches!(err, DecomposeError::Truncated { offset: 8, expected: 8, available: 3, .. }), "{:?}", err);
        assert_eq!(err.path(), "TOY/payload");
    }

    #[test]
    fn magic_mismatch() {
        let g = grammar(TOY);
        let err = decompose(&g, b"TOX\0\0\0\0\0").unwrap_err();
        assert!(matches!(err, DecomposeError::MagicMismatch { offset: 0, .. }));
    }

    #[test]
    fn trailing_bytes_are_kept() {
        let g = grammar(TOY);
        let tree = decompose(&g, b"TOY\0\x01\0\0\0AZZ").unwrap();
        let last = tree.children.last().unwrap();
        assert_eq!(last.name, TRAILING_NODE);
        assert!(last.unparsed);
        assert_eq!(last.raw.as_deref(), Some(&b"ZZ"[..]));
        tree.check_layout().unwrap();
    }

    #[test]
    fn zero_size_element_never_loops() {
        let g = grammar(
            r#"{"format": "Z", "structure": [
                {"name": "items", "element": {"name": "e", "type": "bytes", "length": 0}}
            ]}"#,
        );
        for input in [&b""[..], &b"abc"[..]] {
            let err = decompose(&g, input).unwrap_err();
            assert!(matches!(err, DecomposeError::NonProgressingLoop { .. }), "{:?}", err);
        }
    }

    #[test]
    fn variant_selects_case_and_falls_back_to_opaque() {
        let g = grammar(
            r#"{"format": "V", "structure": [
                {"name": "tag", "type": "uint8"},
                {"name": "body", "discriminant": "tag", "length": 2, "default": "opaque", "variants": {
                    "1": {"name": "word", "type": "uint16_be"}
                }}
            ]}"#,
        );
        let tree = decompose(&g, &[1, 0x01, 0x02]).unwrap();
        let body = tree.child("body").unwrap();
        assert_eq!(body.case.as_deref(), Some("1"));
        assert_eq!(body.children[0].value, Some(Value::Int(0x0102)));

        let tree = decompose(&g, &[9, 0xAA, 0xBB]).unwrap();
        let body = tree.child("body").unwrap();
        assert!(body.unparsed);
        assert_eq!(body.raw, Some(vec![0xAA, 0xBB]));

        let strict = Decomposer::new(&g).with_options(DecomposeOptions { strict_variants: true, ..Default::default() });
        let err = strict.decompose(&[9, 0xAA, 0xBB]).unwrap_err();
        assert!(matches!(err, DecomposeError::UnknownVariant { offset: 1, .. }));
    }

    #[test]
    fn conditional_and_counted() {
        let g = grammar(
            r#"{"format": "C", "structure": [
                {"name": "flags", "type": "uint8"},
                {"name": "extra", "type": "uint16_le", "condition": {"field": "flags", "odd": true}},
                {"name": "n", "type": "uint8"},
                {"name": "items", "count_field": "n", "element": {"name": "item", "type": "uint8"}}
            ]}"#,
        );
        let tree = decompose(&g, &[0, 2, 7, 8]).unwrap();
        assert!(tree.child("extra").is_none());
        assert_eq!(tree.child("items").unwrap().children.len(), 2);
        assert_eq!(tree.find("items/item[1]").unwrap().value, Some(Value::Int(8)));

        let tree = decompose(&g, &[1, 5, 0, 0]).unwrap();
        assert_eq!(tree.child("extra").unwrap().value, Some(Value::Int(5)));
        assert_eq!(tree.child("items").unwrap().children.len(), 0);
    }

    #[test]
    fn iteration_limit() {
        let g = grammar(
            r#"{"format": "L", "structure": [
                {"name": "items", "element": {"name": "b", "type": "uint8"}}
            ]}"#,
        );
        let d = Decomposer::new(&g).with_options(DecomposeOptions { max_iterations: 3, ..Default::default() });
        assert!(matches!(d.decompose(&[1, 2, 3, 4]), Err(DecomposeError::IterationLimit { limit: 3, .. })));
        assert!(d.decompose(&[1, 2, 3]).is_ok());
    }

    #[test]
    fn oversized_static_element_is_not_zero_sized() {
        let g = grammar(
            r#"{"format": "B", "structure": [
                {"name": "outer", "element": {"name": "inner", "count": 2305843009213693952,
                    "element": {"name": "v", "type": "uint64"}}}
            ]}"#,
        );
        assert_eq!(g.root[0].static_size(), None);
        let err = decompose(&g, &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, DecomposeError::Truncated { offset: 0, expected: 8, available: 3, .. }), "{:?}", err);
    }

    #[test]
    fn magic_offset_past_the_end() {
        let g = grammar(r#"{"format": "M", "magic_number": {"value": "AA", "offset": 16}, "structure": []}"#);
        let err = decompose(&g, &[0xAA]).unwrap_err();
        assert!(matches!(err, DecomposeError::Truncated { offset: 1, available: 0, .. }), "{:?}", err);
    }
}
