use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::Array2;
use segany::codec::{decode_binary, decode_text, encode_binary, encode_text};
use segany::Mask;

/// Mask with a filled disc, typical of a single segment
fn disc_mask(side: usize) -> Mask {
    let center = side as f32 / 2.0;
    let radius = side as f32 / 3.0;
    let data = Array2::from_shape_fn((side, side), |(row, col)| {
        let dy = row as f32 - center;
        let dx = col as f32 - center;
        dx * dx + dy * dy <= radius * radius
    });
    Mask::new(data).unwrap()
}

fn benchmark_binary_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("binary_codec");
    for side in [256usize, 1024, 2048] {
        let mask = disc_mask(side);
        let encoded = encode_binary(&mask).unwrap();
        group.throughput(Throughput::Elements((side * side) as u64));

        group.bench_with_input(BenchmarkId::new("encode", side), &mask, |b, mask| {
            b.iter(|| encode_binary(black_box(mask)).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("decode", side), &encoded, |b, bytes| {
            b.iter(|| decode_binary(black_box(bytes)).unwrap());
        });
    }
    group.finish();
}

fn benchmark_text_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("text_codec");
    group.sample_size(20);
    for side in [256usize, 1024] {
        let mask = disc_mask(side);
        let encoded = encode_text(&mask);
        group.throughput(Throughput::Elements((side * side) as u64));

        group.bench_with_input(BenchmarkId::new("encode", side), &mask, |b, mask| {
            b.iter(|| encode_text(black_box(mask)));
        });
        group.bench_with_input(BenchmarkId::new("decode", side), &encoded, |b, text| {
            b.iter(|| decode_text(black_box(text)).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_binary_codec, benchmark_text_codec);
criterion_main!(benches);
