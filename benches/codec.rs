//! Frame codec and decoder benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use voltage_serial_modbus::frame::{from_ascii, to_ascii, to_rtu};
use voltage_serial_modbus::{AsciiDecoder, Decoder, Message, RtuDecoder};

/// One message of every RTU frame shape
fn shape_messages() -> Vec<Message> {
    vec![
        Message::new(1, 0x01, vec![1, 2, 3, 4]),
        Message::new(2, 0x03, vec![8, 1, 2, 3, 4, 5, 6, 7, 8]),
        Message::new(3, 0x11, vec![]),
        Message::new(4, 0x10, [&[1, 2, 3, 4, 16][..], &[0u8; 16]].concat()),
        Message::new(5, 0x07, vec![0xDD]),
        Message::new(7, 0x08, vec![0, 0, 0]),
        Message::new(8, 0x16, vec![10, 11, 12, 13, 14, 15]),
        Message::new(4, 0x17, [&[1, 2, 3, 4, 5, 6, 7, 8, 8][..], &[0xA1; 8]].concat()),
    ]
}

fn bench_encode(c: &mut Criterion) {
    let msg = Message::new(1, 0x03, (0..250).map(|i| i as u8).collect());
    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(msg.data.len() as u64));

    group.bench_function("rtu", |b| b.iter(|| to_rtu(black_box(&msg))));
    group.bench_function("ascii", |b| b.iter(|| to_ascii(black_box(&msg))));
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let messages = shape_messages();
    let mut group = c.benchmark_group("decode");

    for (i, msg) in messages.iter().enumerate() {
        let frame = to_rtu(msg);
        group.bench_with_input(BenchmarkId::new("rtu_shape", i), &frame, |b, frame| {
            b.iter(|| RtuDecoder::new().decode(black_box(frame)))
        });
    }

    let burst: Vec<u8> = messages.iter().flat_map(to_rtu).collect();
    group.throughput(Throughput::Bytes(burst.len() as u64));
    group.bench_function("rtu_burst", |b| {
        b.iter(|| RtuDecoder::new().decode(black_box(&burst)))
    });

    let ascii: Vec<u8> = messages.iter().flat_map(to_ascii).collect();
    group.throughput(Throughput::Bytes(ascii.len() as u64));
    group.bench_function("ascii_burst", |b| {
        b.iter(|| AsciiDecoder::new().decode(black_box(&ascii)))
    });

    let single = to_ascii(&messages[1]);
    group.bench_function("ascii_frame", |b| {
        b.iter(|| from_ascii(black_box(&single[..single.len() - 2])))
    });
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
