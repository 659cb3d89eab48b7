//! Grammar loader fuzz target: feed arbitrary text to the JSON grammar loader.
//! The loader must not panic; it should return Ok(Grammar) or Err(GrammarError).
//! Build with: cargo fuzz run grammar_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let s = match std::str::from_utf8(data) {
        Ok(x) => x,
        Err(_) => return,
    };
    let _ = bingram::load(s, &bingram::PatternCatalog::with_builtins());
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run grammar_fuzz");
}
