//! Decomposer fuzz target: feed arbitrary bytes to a chunked, checksummed grammar.
//! Decomposition must not panic, and every tree it returns must reconstruct to the input.
//! Build with: cargo fuzz run decompose_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
const GRAMMAR: &str = r#"{
    "format": "FUZZ",
    "byte_order": "big-endian",
    "magic_number": {"value": "46 5A", "offset": 0},
    "structure": [
        {"name": "count", "type": "uint8"},
        {"name": "chunks", "count_field": "count", "element": {"name": "chunk", "components": [
            {"name": "tag", "type": "uint8"},
            {"name": "length", "type": "uint16"},
            {"name": "body", "discriminant": "tag", "length_field": "length", "default": "opaque", "variants": {
                "1": {"name": "text", "type": "utf8", "length": "until_eof"},
                "2": {"name": "pair", "components": [
                    {"name": "a", "type": "int16"},
                    {"name": "b", "type": "float32"}
                ]}
            }},
            {"name": "crc", "type": "uint32", "checksum": {"algorithm": "crc32", "over": ["tag", "length", "body"]}}
        ]}},
        {"name": "pad", "type": "bytes", "align": 4},
        {"name": "rest", "type": "bytes", "length": "until_eof"}
    ]
}"#;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let catalog = bingram::PatternCatalog::with_builtins();
    let Ok(grammar) = bingram::load(GRAMMAR, &catalog) else {
        return;
    };
    if let Ok(tree) = bingram::decompose(&grammar, data) {
        let bytes = bingram::reconstruct(&grammar, &tree).expect("decomposed tree reconstructs");
        assert_eq!(bytes, data);
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run decompose_fuzz");
}
