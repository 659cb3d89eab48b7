//! Grammar author and inspection tool.
//!
//! Usage:
//!   bingram check GRAMMAR.json                 validate and lint a grammar
//!   bingram decompose GRAMMAR.json FILE [-o TREE.json]
//!   bingram reconstruct GRAMMAR.json TREE.json -o FILE
//!   bingram verify GRAMMAR.json FILE...        round-trip every file
//!   bingram checksums GRAMMAR.json FILE [--tree]
//!   bingram dump GRAMMAR.json FILE
//!   bingram catalog list | register PATTERN.json
//!
//! `--catalog PATH` adds a pattern catalog file to the built-in patterns. Logs go to
//! stderr; `-v`/`-vv` or `RUST_LOG` raise the level.

use anyhow::{bail, Context};
use bingram::lint::{lint, LintMessage, Severity};
use bingram::{
    BatchRunner, DecomposeOptions, Decomposer, DecompositionNode, Grammar, GrammarLoader, Pattern, PatternCatalog,
    Reconstructor,
};
use clap::{ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{debug, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bingram", version, about = "Decompose and reconstruct binary files from JSON grammars")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Pattern catalog file merged into the built-in patterns.
    #[arg(long, value_name = "PATH", global = true)]
    catalog: Option<PathBuf>,

    /// Raise log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Load a grammar and report lint findings.
    Check {
        grammar: PathBuf,
        /// Human-readable output.
        #[arg(long, short = 'H')]
        human: bool,
    },
    /// Decompose a file and write its tree as JSON.
    Decompose {
        grammar: PathBuf,
        file: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Fail on unknown variant discriminants instead of keeping opaque bytes.
        #[arg(long)]
        strict: bool,
    },
    /// Reconstruct a file from a JSON tree.
    Reconstruct {
        grammar: PathBuf,
        tree: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Round-trip files and compare the result with the input.
    Verify {
        grammar: PathBuf,
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long, default_value_t = 1)]
        workers: usize,
        #[arg(long)]
        strict: bool,
    },
    /// Compare stored length, count and checksum fields with recomputed values.
    Checksums {
        grammar: PathBuf,
        input: PathBuf,
        /// INPUT is a JSON tree rather than a binary file.
        #[arg(long)]
        tree: bool,
    },
    /// Print a decomposition as indented text.
    Dump { grammar: PathBuf, file: PathBuf },
    /// Inspect or extend the pattern catalog.
    Catalog {
        #[command(subcommand)]
        action: CatalogAction,
    },
}

#[derive(Subcommand)]
enum CatalogAction {
    /// List known patterns.
    List,
    /// Register a pattern (JSON object) and save the catalog to `--catalog`.
    Register { pattern: PathBuf },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},bingram={level}", level = level.as_str().to_lowercase())));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn load_catalog(path: Option<&Path>) -> anyhow::Result<PatternCatalog> {
    let mut catalog = PatternCatalog::with_builtins();
    if let Some(path) = path {
        if path.exists() {
            let extra = PatternCatalog::load(path).with_context(|| format!("loading catalog {}", path.display()))?;
            catalog.merge(&extra)?;
        }
    }
    Ok(catalog)
}

fn load_grammar(path: &Path, catalog: &PatternCatalog) -> anyhow::Result<Grammar> {
    GrammarLoader::new(catalog)
        .load_file(path)
        .with_context(|| format!("loading grammar {}", path.display()))
}

fn read(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn options(strict: bool) -> DecomposeOptions {
    DecomposeOptions { strict_variants: strict, ..Default::default() }
}

fn format_message(path: &str, m: &LintMessage, human: bool) -> String {
    let severity_str = match m.severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
    };
    if human {
        format!("  {} {}: {}: {}\n    rule: {}", path, m.path, severity_str, m.message, m.rule.id())
    } else {
        format!("{}:{}: {}: {} [{}]", path, m.path, severity_str, m.message, m.rule.id())
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let catalog = load_catalog(cli.catalog.as_deref())?;
    debug!(patterns = catalog.len(), version = catalog.version(), "catalog ready");

    match cli.command {
        Command::Check { grammar, human } => {
            let g = load_grammar(&grammar, &catalog)?;
            let messages = lint(&g);
            let display = grammar.display().to_string();
            for m in &messages {
                println!("{}", format_message(&display, m, human));
            }
            let errors = messages.iter().filter(|m| m.severity == Severity::Error).count();
            if !messages.is_empty() {
                eprintln!("lint: {} error(s), {} warning(s)", errors, messages.len() - errors);
            }
            if errors > 0 {
                std::process::exit(1);
            }
        }
        Command::Decompose { grammar, file, output, strict } => {
            let g = load_grammar(&grammar, &catalog)?;
            let tree = Decomposer::new(&g)
                .with_options(options(strict))
                .decompose(&read(&file)?)
                .with_context(|| format!("decomposing {}", file.display()))?;
            match output {
                Some(path) => tree.save(&path)?,
                None => println!("{}", tree.to_json()?),
            }
        }
        Command::Reconstruct { grammar, tree, output } => {
            let g = load_grammar(&grammar, &catalog)?;
            let t = DecompositionNode::load(&tree).with_context(|| format!("loading tree {}", tree.display()))?;
            let out = Reconstructor::new(&g).run(&t)?;
            for r in out.derived.iter().filter(|r| !r.matches()) {
                eprintln!("{} @ {}: recomputed {}", r.path, r.offset, r.computed);
            }
            std::fs::write(&output, &out.bytes).with_context(|| format!("writing {}", output.display()))?;
        }
        Command::Verify { grammar, files, workers, strict } => {
            let g = load_grammar(&grammar, &catalog)?;
            let inputs = files
                .iter()
                .map(|f| Ok((f.display().to_string(), read(f)?)))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let report = BatchRunner::new(&g).with_workers(workers).with_options(options(strict)).round_trip(&inputs);
            for o in &report.outcomes {
                match &o.result {
                    Ok(r) => println!("{}: ok ({} bytes)", o.label, r.original_len),
                    Err(e) => println!("{}: FAILED: {}", o.label, e),
                }
            }
            let failed = report.failures().count();
            if failed > 0 {
                bail!("{} of {} file(s) failed", failed, report.len());
            }
        }
        Command::Checksums { grammar, input, tree } => {
            let g = load_grammar(&grammar, &catalog)?;
            let t = if tree {
                DecompositionNode::load(&input)?
            } else {
                bingram::decompose(&g, &read(&input)?)?
            };
            let results = bingram::verify_checksums(&g, &t)?;
            for r in &results {
                let stored = r.stored.as_ref().map_or_else(|| "-".to_string(), |v| v.to_string());
                let status = match (r.ok, r.unparsed_after) {
                    (true, _) => "ok",
                    (false, true) => "MISMATCH (unparsed bytes follow its region)",
                    (false, false) => "MISMATCH",
                };
                println!("{} @ {}: stored {} computed {} {}", r.path, r.offset, stored, r.computed, status);
            }
            if results.iter().any(|r| !r.ok) {
                std::process::exit(1);
            }
        }
        Command::Dump { grammar, file } => {
            let g = load_grammar(&grammar, &catalog)?;
            let tree = bingram::decompose(&g, &read(&file)?)?;
            print!("{}", bingram::dump::tree_to_dump(&tree));
        }
        Command::Catalog { action } => match action {
            CatalogAction::List => {
                for p in catalog.patterns() {
                    println!("{:<24} {:<16} {}", p.name, p.shape.to_string(), p.description);
                }
            }
            CatalogAction::Register { pattern } => {
                let Some(path) = cli.catalog else {
                    bail!("catalog register needs --catalog PATH");
                };
                let source = std::fs::read_to_string(&pattern)?;
                let p: Pattern = serde_json::from_str(&source).with_context(|| format!("parsing {}", pattern.display()))?;
                let mut stored = if path.exists() { PatternCatalog::load(&path)? } else { PatternCatalog::new() };
                stored.register(p)?;
                stored.save(&path)?;
                eprintln!("{}: {} pattern(s), version {}", path.display(), stored.len(), stored.version());
            }
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bingram::lint::LintRule;

    fn message(severity: Severity) -> LintMessage {
        LintMessage {
            path: "T/items".to_string(),
            rule: LintRule::ZeroSizeRepeatedElement,
            severity,
            message: "element has zero size".to_string(),
        }
    }

    #[test]
    fn human_output_keeps_severity() {
        let error = format_message("g.json", &message(Severity::Error), true);
        let warning = format_message("g.json", &message(Severity::Warning), true);
        assert!(error.starts_with("  g.json T/items: error: element has zero size"), "{}", error);
        assert!(warning.starts_with("  g.json T/items: warning: "), "{}", warning);
        assert!(error.ends_with("rule: zero-size-repeated-element"));
    }

    #[test]
    fn compact_output() {
        let line = format_message("g.json", &message(Severity::Warning), false);
        assert_eq!(line, "g.json:T/items: warning: element has zero size [zero-size-repeated-element]");
    }
}
