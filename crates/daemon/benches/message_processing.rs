//! Performance benchmarks for message processing.
//!
//! These benchmarks measure the hot paths in the server:
//! - Terminal output serialization
//! - Client event parsing
//! - UTF-8 decoding of pty reads

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use daemon::session::Utf8Decoder;
use protocol::{ClientEvent, ServerEvent};

fn terminal_text(len: usize) -> String {
    "ls -la\r\ndrwxr-xr-x  2 user user 4096 ünïcödé\r\n"
        .chars()
        .cycle()
        .take(len)
        .collect()
}

/// Benchmark output event serialization.
fn bench_output_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("output_serialization");

    for (name, len) in [("small_1B", 1), ("medium_4KB", 4096), ("large_64KB", 65536)] {
        let event = ServerEvent::output("t1", terminal_text(len));
        group.throughput(Throughput::Bytes(len as u64));
        group.bench_function(name, |b| {
            b.iter(|| black_box(&event).to_json().unwrap());
        });
    }

    group.finish();
}

/// Benchmark client event parsing.
fn bench_client_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("client_parsing");

    let keystroke = r#"{"event":"terminal_input","data":{"terminalId":"t1","data":"a"}}"#;
    group.throughput(Throughput::Bytes(keystroke.len() as u64));
    group.bench_function("keystroke", |b| {
        b.iter(|| ClientEvent::from_json(black_box(keystroke)).unwrap());
    });

    let start = r#"{"event":"terminal_start","data":{"terminalId":"t1","cwd":"/project","cols":120,"rows":40}}"#;
    group.throughput(Throughput::Bytes(start.len() as u64));
    group.bench_function("start", |b| {
        b.iter(|| ClientEvent::from_json(black_box(start)).unwrap());
    });

    let paste = format!(
        r#"{{"event":"terminal_input","data":{{"terminalId":"t1","data":{}}}}}"#,
        serde_json::to_string(&terminal_text(4096)).unwrap()
    );
    group.throughput(Throughput::Bytes(paste.len() as u64));
    group.bench_function("paste_4KB", |b| {
        b.iter(|| ClientEvent::from_json(black_box(&paste)).unwrap());
    });

    group.finish();
}

/// Benchmark decoding pty reads into text.
fn bench_utf8_decoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("utf8_decoding");

    let bytes = terminal_text(4096).into_bytes();
    group.throughput(Throughput::Bytes(bytes.len() as u64));

    group.bench_function("whole_read_4KB", |b| {
        let mut decoder = Utf8Decoder::new();
        b.iter(|| decoder.decode(black_box(&bytes)));
    });

    // Reads that split multi-byte characters
    group.bench_function("split_reads_4KB", |b| {
        let mut decoder = Utf8Decoder::new();
        b.iter(|| {
            let mut out = String::with_capacity(bytes.len());
            for chunk in bytes.chunks(7) {
                out.push_str(&decoder.decode(black_box(chunk)));
            }
            out
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_output_serialization,
    bench_client_parsing,
    bench_utf8_decoding,
);
criterion_main!(benches);
