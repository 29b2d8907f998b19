use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use quic_testbench::fec::simd::{scalar_xor, xor_dispatch};

fn bench_xor(c: &mut Criterion) {
    let mut group = c.benchmark_group("fec_xor");
    for size in [64usize, 1200, 9000] {
        let inputs: Vec<Vec<u8>> = (0..10).map(|i| vec![i as u8; size]).collect();
        let refs: Vec<&[u8]> = inputs.iter().map(|v| v.as_slice()).collect();

        group.bench_with_input(BenchmarkId::new("scalar", size), &size, |b, _| {
            let mut out = vec![0u8; size];
            b.iter(|| {
                scalar_xor(black_box(&refs), &mut out);
            });
        });

        group.bench_with_input(BenchmarkId::new("dispatch", size), &size, |b, _| {
            let mut out = vec![0u8; size];
            b.iter(|| {
                xor_dispatch(black_box(&refs), &mut out);
            });
        });
    }
    group.finish();
}

criterion_group!(fec_simd_benches, bench_xor);
criterion_main!(fec_simd_benches);
