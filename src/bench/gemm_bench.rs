use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use lowp_gemm::harness::make_random;
use lowp_gemm::kernels::Kernel;
use lowp_gemm::{
    GemmConfig, GemmContext, MapOrder, Matrix, QuantizationParams, default_kernel_for,
    multi_thread_gemm, single_thread_gemm,
};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro128PlusPlus;

const INPUT_SIZES: &[(&str, usize, usize, usize)] = &[
    ("n64", 64, 64, 64),
    ("n256", 256, 256, 256),
    ("n512", 512, 512, 512),
    ("gemv_1024", 1024, 1024, 1),
];

const PARAMS: QuantizationParams = QuantizationParams {
    lhs_offset: -75,
    rhs_offset: -91,
    result_offset: 74980,
    result_mult_int: 123,
    result_shift: 20,
};

fn bench_variant(c: &mut Criterion, name: &str, threads: usize) {
    let mut group = c.benchmark_group(name);
    let config = GemmConfig::default().with_max_threads(threads);
    let mut context = GemmContext::with_config(config).expect("valid config");
    let mut rng = Xoshiro128PlusPlus::seed_from_u64(0xC0FF_EE42);

    for &(label, rows, depth, cols) in INPUT_SIZES {
        group.throughput(Throughput::Elements((rows * depth * cols) as u64));

        let lhs = make_random(&mut rng, rows, depth, MapOrder::RowMajor);
        let rhs = make_random(&mut rng, depth, cols, MapOrder::ColMajor);
        let mut out = Matrix::new(rows, cols, MapOrder::ColMajor);
        let kernel: &dyn Kernel = default_kernel_for(cols);

        group.bench_function(BenchmarkId::new(kernel.name(), label), |bench| {
            bench.iter(|| {
                let result = if threads == 1 {
                    single_thread_gemm(
                        &mut context,
                        kernel,
                        black_box(&lhs.view()),
                        black_box(&rhs.view()),
                        &mut out.view_mut(),
                        &PARAMS,
                    )
                } else {
                    multi_thread_gemm(
                        &mut context,
                        kernel,
                        black_box(&lhs.view()),
                        black_box(&rhs.view()),
                        &mut out.view_mut(),
                        &PARAMS,
                    )
                };
                result.expect("valid arguments");
                black_box(out.get(rows / 2, cols / 2));
            });
        });
    }
    group.finish();
}

fn bench_gemm(c: &mut Criterion) {
    bench_variant(c, "gemm_single_thread", 1);
    bench_variant(c, "gemm_multi_thread", lowp_gemm::config::hardware_threads());
}

criterion_group!(benches, bench_gemm);
criterion_main!(benches);
