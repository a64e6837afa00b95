//! Microbenchmark for the wire codec: header + chunk encode/decode.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cluster_net::identity::{ClusterIdentity, Uuid};
use cluster_net::wire::{Frame, FrameHeader};

fn sample_chunk_frame(payload_len: usize) -> Frame {
    let cid = ClusterIdentity { time: 1, rand: 2 };
    let header = FrameHeader {
        uuid: Uuid { cluster_id: cid, time: 3, rand: 4 },
        destination: Some(ClusterIdentity { time: 5, rand: 6 }),
        total_size: payload_len as u32,
        chunk_size: 1024,
    };
    Frame::Chunk { header, index: 0, payload: vec![0xAB; payload_len] }
}

fn bench_encode(c: &mut Criterion) {
    let frame = sample_chunk_frame(1024);
    c.bench_function("chunk_frame_encode_1024b", |b| {
        b.iter(|| black_box(frame.encode()));
    });
}

fn bench_decode(c: &mut Criterion) {
    let frame = sample_chunk_frame(1024);
    let bytes = frame.encode();
    c.bench_function("chunk_frame_decode_1024b", |b| {
        b.iter(|| black_box(Frame::decode(&bytes).unwrap()));
    });
}

fn bench_roundtrip_small(c: &mut Criterion) {
    let frame = sample_chunk_frame(64);
    c.bench_function("chunk_frame_roundtrip_64b", |b| {
        b.iter(|| {
            let bytes = frame.encode();
            black_box(Frame::decode(&bytes).unwrap())
        });
    });
}

criterion_group!(wire, bench_encode, bench_decode, bench_roundtrip_small);
criterion_main!(wire);
