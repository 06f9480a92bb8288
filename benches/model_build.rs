//! 模型建構效能
//!
//! 以固定種子產生隨機實例，只量測登錄表解析與模型建構（不求解）。

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lineplan::model::ModelBuilder;
use lineplan::{ConstraintRegistry, Line, LineRuleSet, OptimizerConfig, ProblemInstance, Product, TimeSlot};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

fn random_instance(lines: usize, products_per_line: usize, slots: usize, sequenced: bool) -> ProblemInstance {
    let mut rng = StdRng::seed_from_u64(42);
    let mut instance = ProblemInstance::new().with_slots(TimeSlot::uniform(slots, 10.5));

    for l in 0..lines {
        let mut line = Line::new(format!("L{}", l + 1));
        if sequenced {
            line = line.with_rules(LineRuleSet::default().with_sequencing());
        }
        for p in 0..products_per_line {
            let id = format!("P{}-{}", l + 1, p + 1);
            let rate: f64 = rng.gen_range(20.0..60.0);
            let target: i64 = rng.gen_range(100..800);
            instance = instance.with_product(Product::new(id.clone(), Decimal::from(target)));
            line = line.with_rate(id, rate);
        }
        instance = instance.with_line(line);
    }
    instance
}

fn bench_model_build(c: &mut Criterion) {
    let config = OptimizerConfig::default();
    let mut group = c.benchmark_group("model_build");

    for (lines, products, slots) in [(2, 3, 10), (4, 4, 10), (6, 5, 20)] {
        for sequenced in [false, true] {
            let instance = random_instance(lines, products, slots, sequenced);
            let label = format!("{}x{}x{}{}", lines, products, slots, if sequenced { "-seq" } else { "" });

            group.bench_with_input(BenchmarkId::from_parameter(label), &instance, |b, instance| {
                b.iter(|| {
                    let registry = ConstraintRegistry::build(black_box(instance), &config).unwrap();
                    let built = ModelBuilder::new(&registry, config.weights.clone()).build().unwrap();
                    black_box(built.constraint_count())
                })
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_model_build);
criterion_main!(benches);
