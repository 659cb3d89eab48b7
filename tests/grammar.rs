//! Grammar loader tests: every malformed grammar is rejected at load, naming the node path.

use bingram::ast::{DerivedKind, GrammarNode, LengthSpec};
use bingram::{load, GrammarError, GrammarLoader, Pattern, PatternCatalog, PatternShape};
use serde_json::json;

fn try_load(src: &str) -> Result<bingram::Grammar, GrammarError> {
    load(src, &PatternCatalog::with_builtins())
}

fn structure(nodes: serde_json::Value) -> String {
    json!({"format": "T", "structure": nodes}).to_string()
}

// ==================== Valid grammars ====================

#[test]
fn load_minimal() {
    let g = try_load(&structure(json!([{"name": "x", "type": "uint8"}]))).unwrap();
    assert_eq!(g.format, "T");
    assert_eq!(g.root.len(), 1);
    assert_eq!(g.byte_order, bingram::Endianness::Little);
}

#[test]
fn load_all_field_types() {
    let types = [
        "uint8", "uint16", "uint24", "uint32", "uint64", "int8", "int16", "int32", "int64", "float32", "float64",
        "uint16_be", "int32_le", "float64_be",
    ];
    let nodes: Vec<_> = types.iter().enumerate().map(|(i, t)| json!({"name": format!("f{}", i), "type": t})).collect();
    let g = try_load(&structure(json!(nodes))).unwrap();
    assert_eq!(g.root.len(), types.len());
    let GrammarNode::Field(f) = &g.root[2] else { panic!("field expected") };
    assert_eq!(f.length, LengthSpec::Fixed(3));
}

#[test]
fn load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("toy.json");
    std::fs::write(&path, structure(json!([{"name": "x", "type": "ascii", "length": 2}]))).unwrap();
    let catalog = PatternCatalog::new();
    let g = GrammarLoader::new(&catalog).load_file(&path).unwrap();
    assert_eq!(g.find("x").unwrap().name(), "x");
    assert!(matches!(GrammarLoader::new(&catalog).load_file(dir.path().join("nope.json")), Err(GrammarError::Io(_))));
}

#[test]
fn grammar_records_catalog_version() {
    let mut catalog = PatternCatalog::with_builtins();
    catalog.register(Pattern::new("EXTRA", PatternShape::Padding)).unwrap();
    let g = load(&structure(json!([{"name": "x", "type": "uint8"}])), &catalog).unwrap();
    assert_eq!(g.catalog_version, catalog.version());
}

// ==================== Rejected grammars ====================

#[test]
fn reject_unknown_key() {
    let err = try_load(&structure(json!([{"name": "x", "type": "uint8", "lenght": 1}]))).unwrap_err();
    assert!(matches!(err, GrammarError::Json(_)), "{}", err);
}

#[test]
fn reject_bad_byte_order_and_magic() {
    let err = try_load(r#"{"format": "T", "byte_order": "middle", "structure": []}"#).unwrap_err();
    assert!(matches!(err, GrammarError::InvalidByteOrder(_)));
    let err = try_load(r#"{"format": "T", "magic_number": {"value": "zz"}, "structure": []}"#).unwrap_err();
    assert!(matches!(err, GrammarError::InvalidMagic(_)));
    let err = try_load(r#"{"format": "T", "magic_number": {"value": "01 02", "length": 3}, "structure": []}"#).unwrap_err();
    assert!(matches!(err, GrammarError::InvalidMagic(_)));
}

#[test]
fn reject_magic_offset_out_of_range() {
    let src = json!({
        "format": "T",
        "magic_number": {"value": "01 02", "offset": u64::MAX},
        "structure": []
    })
    .to_string();
    let err = try_load(&src).unwrap_err();
    assert!(matches!(err, GrammarError::InvalidMagic(_)), "{}", err);
}

#[test]
fn reject_unknown_pattern() {
    let err = try_load(&structure(json!([{"name": "x", "type": "uint8", "pattern": "NOPE"}]))).unwrap_err();
    match err {
        GrammarError::UnknownPattern { path, pattern } => {
            assert_eq!(path, "T/x");
            assert_eq!(pattern, "NOPE");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn reject_shape_mismatch() {
    let err = try_load(&structure(json!([
        {"name": "c", "pattern": "CHECKSUM_FIELD", "components": [{"name": "x", "type": "uint8"}]}
    ])))
    .unwrap_err();
    assert!(matches!(err, GrammarError::ShapeMismatch { kind: "composite", .. }), "{}", err);
}

#[test]
fn reject_magic_pattern_without_value() {
    let err = try_load(&structure(json!([
        {"name": "sig", "pattern": "MAGIC_NUMBER", "type": "bytes", "length": 4}
    ])))
    .unwrap_err();
    assert!(matches!(err, GrammarError::InvalidNode { .. }), "{}", err);
}

#[test]
fn reject_unknown_type_and_bad_width() {
    let err = try_load(&structure(json!([{"name": "x", "type": "uint12"}]))).unwrap_err();
    assert!(matches!(err, GrammarError::InvalidType { .. }));
    let err = try_load(&structure(json!([{"name": "x", "type": "uint16", "length": 4}]))).unwrap_err();
    assert!(matches!(err, GrammarError::InvalidLength { .. }));
    let err = try_load(&structure(json!([{"name": "x", "type": "bytes"}]))).unwrap_err();
    assert!(matches!(err, GrammarError::InvalidLength { .. }));
}

#[test]
fn reject_forward_reference() {
    let err = try_load(&structure(json!([
        {"name": "data", "type": "bytes", "length_field": "len"},
        {"name": "len", "type": "uint8"}
    ])))
    .unwrap_err();
    match err {
        GrammarError::ForwardReference { path, reference } => {
            assert_eq!(path, "T/data");
            assert_eq!(reference, "len");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn reject_self_reference() {
    let err = try_load(&structure(json!([{"name": "len", "type": "bytes", "length_field": "len"}]))).unwrap_err();
    assert!(matches!(err, GrammarError::ForwardReference { .. }), "{}", err);
}

#[test]
fn reject_unresolved_reference() {
    let err = try_load(&structure(json!([{"name": "data", "type": "bytes", "length_field": "missing"}]))).unwrap_err();
    assert!(matches!(err, GrammarError::UnresolvedReference { .. }));
}

#[test]
fn reject_non_integer_length_field() {
    let err = try_load(&structure(json!([
        {"name": "tag", "type": "ascii", "length": 2},
        {"name": "data", "type": "bytes", "length_field": "tag"}
    ])))
    .unwrap_err();
    assert!(matches!(err, GrammarError::NotAnInteger { .. }));
}

#[test]
fn reject_reference_into_repeated_element() {
    let err = try_load(&structure(json!([
        {"name": "items", "count": 2, "element": {"name": "n", "type": "uint8"}},
        {"name": "data", "type": "bytes", "length_field": "n"}
    ])))
    .unwrap_err();
    assert!(matches!(err, GrammarError::UnresolvedReference { .. } | GrammarError::ForwardReference { .. }), "{}", err);
}

#[test]
fn reject_duplicate_names() {
    let err = try_load(&structure(json!([
        {"name": "x", "type": "uint8"},
        {"name": "x", "type": "uint16"}
    ])))
    .unwrap_err();
    assert!(matches!(err, GrammarError::DuplicateName { .. }));
}

#[test]
fn reject_conflicting_derivation() {
    let err = try_load(&structure(json!([
        {"name": "n", "type": "uint8"},
        {"name": "data", "type": "bytes", "length_field": "n"},
        {"name": "items", "count_field": "n", "element": {"name": "i", "type": "uint8"}}
    ])))
    .unwrap_err();
    assert!(matches!(err, GrammarError::ConflictingDerivation { .. }), "{}", err);
}

#[test]
fn reject_non_exhaustive_variant() {
    let err = try_load(&structure(json!([
        {"name": "tag", "type": "uint8"},
        {"name": "body", "discriminant": "tag", "variants": {"1": {"name": "a", "type": "uint8"}}}
    ])))
    .unwrap_err();
    assert!(matches!(err, GrammarError::NonExhaustiveVariant { .. }));
}

#[test]
fn accept_exhaustive_uint8_variant() {
    let cases: serde_json::Map<String, serde_json::Value> =
        (0..256).map(|k| (k.to_string(), json!({"name": "v", "type": "uint8"}))).collect();
    let g = try_load(&structure(json!([
        {"name": "tag", "type": "uint8"},
        {"name": "body", "discriminant": "tag", "variants": cases}
    ])));
    assert!(g.is_ok(), "{:?}", g.err());
}

#[test]
fn reject_bad_case_key() {
    let err = try_load(&structure(json!([
        {"name": "tag", "type": "uint8"},
        {"name": "body", "discriminant": "tag", "default": "opaque", "variants": {"one": {"name": "a", "type": "uint8"}}}
    ])))
    .unwrap_err();
    assert!(matches!(err, GrammarError::InvalidCaseKey { .. }));
}

#[test]
fn reject_keys_for_wrong_node_kind() {
    let err = try_load(&structure(json!([
        {"name": "c", "type": "uint8", "components": [{"name": "x", "type": "uint8"}]}
    ])))
    .unwrap_err();
    assert!(matches!(err, GrammarError::InvalidNode { .. }), "{}", err);
    let err = try_load(&structure(json!([{"name": "x", "type": "uint8", "count": 3}]))).unwrap_err();
    assert!(matches!(err, GrammarError::InvalidNode { .. }), "{}", err);
}

#[test]
fn checksum_marks_field_derived() {
    let g = try_load(&structure(json!([
        {"name": "data", "type": "bytes", "length": 4},
        {"name": "sum", "type": "uint32", "checksum": {"algorithm": "crc32", "over": ["data"]}}
    ])))
    .unwrap();
    let GrammarNode::Field(f) = g.find("sum").unwrap() else { panic!("field expected") };
    assert_eq!(f.derived, Some(DerivedKind::Checksum));

    let err = try_load(&structure(json!([
        {"name": "sum", "type": "uint32", "checksum": {"algorithm": "crc32", "over": ["data"]}},
        {"name": "data", "type": "bytes", "length": 4}
    ])))
    .unwrap_err();
    assert!(matches!(err, GrammarError::ForwardReference { .. }));
}

#[test]
fn template_expansion_and_recursion() {
    let mut catalog = PatternCatalog::with_builtins();
    catalog
        .register(
            Pattern::new("PAIR", PatternShape::Composite)
                .with_structure(json!([{"name": "a", "type": "uint8"}, {"name": "b", "type": "uint8"}])),
        )
        .unwrap();
    catalog
        .register(Pattern::new("LOOP", PatternShape::Composite).with_structure(json!([{"name": "inner", "pattern": "LOOP"}])))
        .unwrap();

    let g = load(&structure(json!([{"name": "p", "pattern": "PAIR"}])), &catalog).unwrap();
    let GrammarNode::Composite(c) = &g.root[0] else { panic!("composite expected") };
    assert_eq!(c.children.len(), 2);
    assert_eq!(c.pattern.as_ref().unwrap().name, "PAIR");

    let err = load(&structure(json!([{"name": "p", "pattern": "LOOP"}])), &catalog).unwrap_err();
    assert!(matches!(err, GrammarError::RecursivePattern { .. }), "{}", err);
}
