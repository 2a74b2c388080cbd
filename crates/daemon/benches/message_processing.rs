//! Performance benchmarks for message processing.
//!
//! These benchmarks measure the hot paths between a client and a PTY:
//! - Inbound frame decoding
//! - Outbound stdout frame encoding
//! - UTF-8 reassembly of output chunks

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use protocol::{Frame, FrameCodec, Utf8Reassembler};

/// Benchmark decoding of inbound frames.
fn bench_frame_decode(c: &mut Criterion) {
    let codec = FrameCodec::new();
    let mut group = c.benchmark_group("frame_decode");

    // Typical keystroke
    let keystroke = codec.encode(&Frame::stdin("a"));
    group.throughput(Throughput::Bytes(keystroke.len() as u64));
    group.bench_function("stdin_keystroke", |b| {
        b.iter(|| codec.decode(black_box(keystroke.as_bytes())))
    });

    // Pasted block of text
    let paste = codec.encode(&Frame::stdin("x".repeat(4096)));
    group.throughput(Throughput::Bytes(paste.len() as u64));
    group.bench_function("stdin_paste_4KB", |b| {
        b.iter(|| codec.decode(black_box(paste.as_bytes())))
    });

    let resize = codec.encode(&Frame::Resize { rows: 50, cols: 200 });
    group.throughput(Throughput::Bytes(resize.len() as u64));
    group.bench_function("resize", |b| {
        b.iter(|| codec.decode(black_box(resize.as_bytes())))
    });

    group.bench_function("malformed", |b| {
        b.iter(|| codec.decode(black_box(b"{\"op\":\"stdin\"")))
    });

    group.finish();
}

/// Benchmark encoding of outbound stdout frames.
fn bench_frame_encode(c: &mut Criterion) {
    let codec = FrameCodec::new();
    let mut group = c.benchmark_group("frame_encode");

    // Plain text output chunk
    let plain = Frame::stdout("total 42\r\ndrwxr-xr-x  2 root root 4096 .\r\n".repeat(64));
    group.throughput(Throughput::Bytes(plain.data().map_or(0, |d| d.len()) as u64));
    group.bench_function("stdout_plain", |b| b.iter(|| codec.encode(black_box(&plain))));

    // Colourised output full of escape sequences
    let colour = Frame::stdout("\u{1b}[1;34mdir\u{1b}[0m \u{1b}[32mfile\u{1b}[0m\r\n".repeat(128));
    group.throughput(Throughput::Bytes(colour.data().map_or(0, |d| d.len()) as u64));
    group.bench_function("stdout_escapes", |b| {
        b.iter(|| codec.encode(black_box(&colour)))
    });

    group.finish();
}

/// Benchmark UTF-8 reassembly across chunk boundaries.
fn bench_utf8_reassembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("utf8_reassembly");

    let text = "héllo wörld ☃ 😀 ".repeat(256);
    let bytes = text.as_bytes();
    group.throughput(Throughput::Bytes(bytes.len() as u64));

    // Chunk sizes chosen so multibyte characters straddle the boundaries.
    for chunk in [7usize, 4096] {
        group.bench_function(format!("chunks_{chunk}B"), |b| {
            b.iter(|| {
                let mut reassembler = Utf8Reassembler::new();
                let mut total = 0;
                for piece in bytes.chunks(chunk) {
                    total += reassembler.push(black_box(piece)).len();
                }
                total + reassembler.finish().len()
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_frame_decode,
    bench_frame_encode,
    bench_utf8_reassembly,
);

criterion_main!(benches);
