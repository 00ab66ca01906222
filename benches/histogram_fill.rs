use criterion::Throughput;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;
use virtobs::constants::AltData;
use virtobs::dataset::{DataType, RawData, Source};
use virtobs::histogram::Histogram;
use virtobs::observatory::demo::{simulate_lightcurve, SimArgs};
use virtobs::reduction::{reduce_to_lightcurves, InitKwargs, ReducerParams};

fn bench_add_lightcurve(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(42);
    let mut source = Source::new("bench_star", "bench");
    source.mag = Some(18.0);

    let mut group = c.benchmark_group("lightcurve_points");

    for num_points in [10, 100, 1_000, 10_000].iter() {
        let args = SimArgs {
            num_points: *num_points,
            ..SimArgs::default()
        };
        let batch = simulate_lightcurve(&args, &mut rng).unwrap();
        let raw = RawData::new("bench_star", "demo", DataType::Photometry, Some(batch), AltData::new())
            .unwrap();
        let init = InitKwargs::from_raw_data(&[&raw]);
        let lcs = reduce_to_lightcurves(&[&raw], None, &init, &ReducerParams::default()).unwrap();

        group.throughput(Throughput::Elements(*num_points as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(num_points),
            &lcs[0],
            |b, lc| {
                let mut hist = Histogram::new();
                hist.initialize().unwrap();
                b.iter(|| {
                    let _ = hist.add_lightcurve(lc, &source);
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_add_lightcurve);
criterion_main!(benches);
