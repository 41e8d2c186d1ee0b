//! Throughput Benchmark for kvpipe
//!
//! This benchmark measures the hot paths of the wire layer: framing
//! outgoing commands and decoding the inbound reply stream, including the
//! pipelined case where one read carries a long run of replies.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use kvpipe::protocol::{encode_command, RespParser, RespValue};

/// Benchmark command framing
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(1));

    group.bench_function("encode_get", |b| {
        b.iter(|| {
            black_box(encode_command(&[b"GET", b"user:101"]));
        });
    });

    group.bench_function("encode_set_small", |b| {
        b.iter(|| {
            black_box(encode_command(&[b"SET", b"user:101", b"small_value"]));
        });
    });

    group.bench_function("encode_set_large", |b| {
        let value = vec![b'x'; 64 * 1024]; // 64KB value
        b.iter(|| {
            black_box(encode_command(&[b"SET", b"user:101", &value]));
        });
    });

    group.finish();
}

/// Benchmark decoding single replies
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Elements(1));

    group.bench_function("decode_simple_string", |b| {
        let input = RespValue::ok().serialize();
        let mut parser = RespParser::new();
        b.iter(|| {
            black_box(parser.parse(&input).unwrap().unwrap());
        });
    });

    group.bench_function("decode_integer", |b| {
        let input = RespValue::integer(1_000_000).serialize();
        let mut parser = RespParser::new();
        b.iter(|| {
            black_box(parser.parse(&input).unwrap().unwrap());
        });
    });

    group.bench_function("decode_bulk_small", |b| {
        let input = RespValue::bulk_string(Bytes::from("small_value")).serialize();
        let mut parser = RespParser::new();
        b.iter(|| {
            black_box(parser.parse(&input).unwrap().unwrap());
        });
    });

    group.bench_function("decode_bulk_large", |b| {
        let input = RespValue::bulk_string(Bytes::from(vec![b'x'; 64 * 1024])).serialize();
        let mut parser = RespParser::new();
        b.iter(|| {
            black_box(parser.parse(&input).unwrap().unwrap());
        });
    });

    group.bench_function("decode_array", |b| {
        let input = RespValue::array(vec![
            RespValue::bulk_string(Bytes::from("one")),
            RespValue::bulk_string(Bytes::from("two")),
            RespValue::bulk_string(Bytes::from("three")),
        ])
        .serialize();
        let mut parser = RespParser::new();
        b.iter(|| {
            black_box(parser.parse(&input).unwrap().unwrap());
        });
    });

    group.finish();
}

/// Benchmark draining a pipelined batch, the shape of a busy connection's
/// read path: many replies land in one buffer and decode back-to-back.
fn bench_pipelined_drain(c: &mut Criterion) {
    const BATCH: usize = 100;

    let mut input = Vec::new();
    for i in 0..BATCH {
        RespValue::bulk_string(Bytes::from(format!("value:{}", i)))
            .serialize_into(&mut input);
    }

    let mut group = c.benchmark_group("pipelined_drain");
    group.throughput(Throughput::Elements(BATCH as u64));

    group.bench_function("drain_100_bulk_replies", |b| {
        let mut parser = RespParser::new();
        b.iter(|| {
            let mut offset = 0;
            let mut decoded = 0;
            while let Some((reply, consumed)) = parser.parse(&input[offset..]).unwrap() {
                black_box(reply);
                offset += consumed;
                decoded += 1;
            }
            assert_eq!(decoded, BATCH);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_pipelined_drain);

criterion_main!(benches);
