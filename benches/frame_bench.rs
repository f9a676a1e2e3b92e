//! Benchmarks for relay bus framing.
//!
//! Run benchmarks with:
//! ```sh
//! cargo bench --bench frame_bench
//! ```

use bytes::BytesMut;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use lockhub_protocol::{RequestFrame, ResponseFrame, RtuCodec, crc16};
use std::hint::black_box;
use tokio_util::codec::{Decoder, Encoder};

fn bench_crc(c: &mut Criterion) {
    let mut group = c.benchmark_group("crc16");

    for size in [6usize, 64, 256] {
        let data: Vec<u8> = (0..size).map(|i| i as u8).collect();
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| crc16(black_box(data)));
        });
    }

    group.finish();
}

fn bench_encode_request(c: &mut Criterion) {
    let request = RequestFrame::write_register(12, 7, 1);

    c.bench_function("encode_request", |b| {
        b.iter(|| {
            let mut codec = RtuCodec::new();
            let mut buffer = BytesMut::with_capacity(8);
            codec.encode(black_box(request), &mut buffer).unwrap();
            black_box(buffer);
        });
    });
}

fn bench_decode_response(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_response");
    group.throughput(Throughput::Elements(1));

    let echo = ResponseFrame::echo(&RequestFrame::write_register(12, 7, 1)).encode();
    group.bench_function("write_echo", |b| {
        b.iter(|| {
            let mut codec = RtuCodec::new();
            let mut buffer = BytesMut::from(&echo[..]);
            black_box(codec.decode(&mut buffer).unwrap());
        });
    });

    let read = ResponseFrame::Registers {
        slave_id: 12,
        values: vec![0x0001; 16],
    }
    .encode();
    group.bench_function("read_16_registers", |b| {
        b.iter(|| {
            let mut codec = RtuCodec::new();
            let mut buffer = BytesMut::from(&read[..]);
            black_box(codec.decode(&mut buffer).unwrap());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_crc, bench_encode_request, bench_decode_response);
criterion_main!(benches);
