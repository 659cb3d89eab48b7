//! Linter for loaded grammars: flags layouts that load fine but are likely mistakes.
//!
//! ## Rules
//!
//! - **Zero-size repeated element** (error): the element of a repeated node always
//!   occupies zero bytes, so decomposition can only fail with a non-progressing loop.
//! - **Until-EOF not last** (warning): a node that reads to the end of its region is
//!   followed by siblings, which will always see an empty region.
//! - **Opaque variant unbounded** (warning): a variant with an `"opaque"` default and no
//!   length swallows the rest of its region when the discriminant is unknown.
//! - **Narrow derived field** (warning): a length or count field is one byte wide, so
//!   edits past 255 bytes/elements cannot be reconstructed.
//!
//! Run the linter via `bingram check GRAMMAR.json`. Exit code 1 if any error-level findings.

use crate::ast::*;

/// Severity of a lint finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// Identifies which rule produced the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LintRule {
    ZeroSizeRepeatedElement,
    UntilEofNotLast,
    OpaqueVariantUnbounded,
    NarrowDerivedField,
}

impl LintRule {
    pub fn id(self) -> &'static str {
        match self {
            LintRule::ZeroSizeRepeatedElement => "zero-size-repeated-element",
            LintRule::UntilEofNotLast => "until-eof-not-last",
            LintRule::OpaqueVariantUnbounded => "opaque-variant-unbounded",
            LintRule::NarrowDerivedField => "narrow-derived-field",
        }
    }
}

/// A single lint message, located by grammar node path.
#[derive(Debug, Clone)]
pub struct LintMessage {
    pub path: String,
    pub rule: LintRule,
    pub severity: Severity,
    pub message: String,
}

/// Run all lint rules on a grammar. Returns messages in document order.
pub fn lint(grammar: &Grammar) -> Vec<LintMessage> {
    let mut out = Vec::new();
    sequence(&grammar.root, &grammar.format, &mut out);
    out
}

fn sequence(nodes: &[GrammarNode], parent: &str, out: &mut Vec<LintMessage>) {
    for (i, node) in nodes.iter().enumerate() {
        let path = format!("{}/{}", parent, node.name());
        let followers = nodes[i + 1..].iter().any(|n| n.static_size() != Some(0));
        if followers && reads_to_end(node) {
            out.push(LintMessage {
                path: path.clone(),
                rule: LintRule::UntilEofNotLast,
                severity: Severity::Warning,
                message: "reads to the end of its region but is followed by other nodes".to_string(),
            });
        }
        check(node, &path, out);
    }
}

/// True when the node always consumes every remaining byte of its region.
fn reads_to_end(node: &GrammarNode) -> bool {
    match node {
        GrammarNode::Field(f) => matches!(f.length, LengthSpec::UntilEof { reserve: 0 }),
        GrammarNode::Repeated(r) => r.bound.is_none() && r.count == CountSpec::UntilEof,
        GrammarNode::Variant(v) => v.bound.is_none() && matches!(v.default, VariantDefault::Opaque) && v.cases.is_empty(),
        GrammarNode::Composite(_) => false,
    }
}

fn check(node: &GrammarNode, path: &str, out: &mut Vec<LintMessage>) {
    match node {
        GrammarNode::Field(f) => {
            let narrow = f.ty.scalar().is_some_and(|s| s.width == 1);
            if narrow && matches!(f.derived, Some(DerivedKind::Length | DerivedKind::Count)) {
                out.push(LintMessage {
                    path: path.to_string(),
                    rule: LintRule::NarrowDerivedField,
                    severity: Severity::Warning,
                    message: "one-byte length/count field limits edits to 255".to_string(),
                });
            }
        }
        GrammarNode::Composite(c) => sequence(&c.children, path, out),
        GrammarNode::Repeated(r) => {
            if r.element.static_size() == Some(0) {
                out.push(LintMessage {
                    path: path.to_string(),
                    rule: LintRule::ZeroSizeRepeatedElement,
                    severity: Severity::Error,
                    message: format!("element {} is always zero bytes long", r.element.name()),
                });
            }
            check(&r.element, &format!("{}/{}", path, r.element.name()), out);
        }
        GrammarNode::Variant(v) => {
            if v.bound.is_none() && matches!(v.default, VariantDefault::Opaque) {
                out.push(LintMessage {
                    path: path.to_string(),
                    rule: LintRule::OpaqueVariantUnbounded,
                    severity: Severity::Warning,
                    message: "unknown cases consume the rest of the region; add length or length_field".to_string(),
                });
            }
            for case in node.children() {
                check(case, &format!("{}/{}", path, case.name()), out);
            }
        }
    }
}
