//! Benchmark: decompose, reconstruct and full round trip of a generated PNG-like file
//! with a few hundred CRC-protected chunks.

use bingram::checksum::crc32;
use bingram::{decompose, load, reconstruct, round_trip, Grammar, PatternCatalog};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

const PNG_LIKE: &str = r#"{
    "format": "PNG",
    "byte_order": "big-endian",
    "magic_number": {"value": "89 50 4E 47 0D 0A 1A 0A", "offset": 0},
    "structure": [
        {"name": "chunks", "pattern": "CHUNK_CONTAINER", "element": {"name": "chunk", "components": [
            {"name": "length", "type": "uint32"},
            {"name": "type", "type": "ascii", "length": 4},
            {"name": "data", "type": "bytes", "length_field": "length"},
            {"name": "crc", "type": "uint32", "pattern": "CHECKSUM_FIELD",
             "checksum": {"algorithm": "crc32", "over": ["type", "data"]}}
        ]}}
    ]
}"#;

const CHUNKS: usize = 256;

fn png_like(chunks: usize) -> Vec<u8> {
    let mut out = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
    for i in 0..chunks {
        let data: Vec<u8> = (0..(i % 64) * 16).map(|b| (b ^ i) as u8).collect();
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        let mut covered = b"IDAT".to_vec();
        covered.extend_from_slice(&data);
        out.extend_from_slice(&covered);
        out.extend_from_slice(&crc32(&covered).to_be_bytes());
    }
    out
}

fn grammar() -> Grammar {
    load(PNG_LIKE, &PatternCatalog::with_builtins()).expect("load grammar")
}

fn bench_round_trip(c: &mut Criterion) {
    let g = grammar();
    let file = png_like(CHUNKS);
    let tree = decompose(&g, &file).expect("decompose");
    let mut nodes = 0usize;
    tree.walk(&mut |_, _| nodes += 1);
    eprintln!("round_trip: {} chunks, {} bytes, {} nodes", CHUNKS, file.len(), nodes);

    c.bench_function("decompose_png_like", |b| {
        b.iter(|| black_box(decompose(&g, black_box(&file)).map(|t| t.byte_length)))
    });

    c.bench_function("reconstruct_png_like", |b| {
        b.iter(|| black_box(reconstruct(&g, black_box(&tree)).map(|bytes| bytes.len())))
    });

    c.bench_function("round_trip_png_like", |b| {
        b.iter(|| black_box(round_trip(&g, black_box(&file)).map(|r| r.ok)))
    });
}

criterion_group!(benches, bench_round_trip);
criterion_main!(benches);
