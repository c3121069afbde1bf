//! Precision Benchmarks - distribution routines across digit counts
//!
//! Measures how the special functions scale with the requested number of
//! significant digits:
//! 1. Normal CDF and quantile
//! 2. Student t survival and quantile
//! 3. Regularized incomplete beta (F and chi-square tails)
//! 4. Exact binomial CDF
//!
//! Run with: cargo bench --bench precision_benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use statcore::precision::distributions::{Binomial, ChiSquare, ContinuousDistribution, FisherF, Normal, StudentT};
use statcore::precision::{Decimal, PrecisionContext, RoundingMode};

const DIGIT_COUNTS: [u32; 4] = [6, 15, 30, 50];

fn ctx(digits: u32) -> PrecisionContext {
    PrecisionContext::new(digits, RoundingMode::HalfEven).expect("valid precision")
}

fn dec(ctx: &PrecisionContext, text: &str) -> Decimal {
    Decimal::parse(text, ctx.working_digits()).expect("valid literal")
}

// ==============================================================================
// NORMAL
// ==============================================================================

fn bench_normal(c: &mut Criterion) {
    let mut group = c.benchmark_group("normal");

    for digits in DIGIT_COUNTS {
        let ctx = ctx(digits);
        let normal = Normal::standard(&ctx).expect("normal");
        let x = dec(&ctx, "1.96");
        let p = dec(&ctx, "0.975");

        group.bench_with_input(BenchmarkId::new("cdf", digits), &x, |b, x| {
            b.iter(|| normal.cdf(black_box(x)).expect("cdf"));
        });
        group.bench_with_input(BenchmarkId::new("quantile", digits), &p, |b, p| {
            b.iter(|| normal.quantile(black_box(p)).expect("quantile"));
        });
    }

    group.finish();
}

// ==============================================================================
// STUDENT T
// ==============================================================================

fn bench_student_t(c: &mut Criterion) {
    let mut group = c.benchmark_group("student_t");

    for digits in DIGIT_COUNTS {
        let ctx = ctx(digits);
        let t = StudentT::new(&ctx, ctx.int(8)).expect("student t");
        let x = dec(&ctx, "2.306");
        let p = dec(&ctx, "0.975");

        group.bench_with_input(BenchmarkId::new("two_sided", digits), &x, |b, x| {
            b.iter(|| t.two_sided(black_box(x)).expect("two-sided"));
        });
        group.bench_with_input(BenchmarkId::new("quantile", digits), &p, |b, p| {
            b.iter(|| t.quantile(black_box(p)).expect("quantile"));
        });
    }

    group.finish();
}

// ==============================================================================
// INCOMPLETE BETA / GAMMA TAILS
// ==============================================================================

fn bench_tails(c: &mut Criterion) {
    let mut group = c.benchmark_group("tails");

    for digits in DIGIT_COUNTS {
        let ctx = ctx(digits);
        let f = FisherF::new(&ctx, ctx.int(3), ctx.int(20)).expect("fisher f");
        let chi = ChiSquare::new(&ctx, ctx.int(3)).expect("chi-square");
        let fx = dec(&ctx, "3.1");
        let cx = dec(&ctx, "7.815");

        group.bench_with_input(BenchmarkId::new("f_sf", digits), &fx, |b, x| {
            b.iter(|| f.sf(black_box(x)).expect("f sf"));
        });
        group.bench_with_input(BenchmarkId::new("chi_square_sf", digits), &cx, |b, x| {
            b.iter(|| chi.sf(black_box(x)).expect("chi-square sf"));
        });
    }

    group.finish();
}

// ==============================================================================
// EXACT BINOMIAL
// ==============================================================================

fn bench_binomial(c: &mut Criterion) {
    let mut group = c.benchmark_group("binomial_cdf");

    for n in [20u64, 200, 2000] {
        let ctx = ctx(15);
        let binomial = Binomial::new(&ctx, n, dec(&ctx, "0.3")).expect("binomial");
        group.bench_with_input(BenchmarkId::from_parameter(n), &(n / 4), |b, &k| {
            b.iter(|| binomial.cdf(black_box(k)).expect("cdf"));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_normal, bench_student_t, bench_tails, bench_binomial);
criterion_main!(benches);
