//! 時段內排序示例：同一時段生產多個少量產品，並禁止特定產品相鄰

use lineplan::{
    Line, LineDirective, LineRuleSet, ObjectiveWeights, OptimizerConfig, Optimizer, ProblemInstance,
    Product, TimeSlot,
};
use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== 時段內排序示例 ===\n");

    let rules = LineRuleSet::default()
        .with_sequencing()
        .with_directive(LineDirective::ForbiddenAdjacency {
            from: "DARK".to_string(),
            to: "CLEAR".to_string(),
            symmetric: false,
        })
        .with_directive(LineDirective::LastProduct {
            product: "DARK".to_string(),
        });

    let instance = ProblemInstance::new()
        .with_product(Product::new("CLEAR", Decimal::from(120)))
        .with_product(Product::new("AMBER", Decimal::from(20)))
        .with_product(Product::new("DARK", Decimal::from(90)))
        .with_line(
            Line::new("FILL-1")
                .with_rate("CLEAR", 20.0)
                .with_rate("AMBER", 20.0)
                .with_rate("DARK", 20.0)
                .with_rules(rules),
        )
        .with_slots(TimeSlot::uniform(6, 3.0));

    let config = OptimizerConfig::default()
        .with_weight(ObjectiveWeights::CHANGEOVER_TIME, 0.0)
        .with_global_changeover_cap(3);

    let report = Optimizer::new(config).solve(&instance)?;
    println!("狀態: {}", report.status);
    println!(
        "模型：變數 {} 個，約束 {:?}",
        report.diagnostics.variable_count, report.diagnostics.constraint_counts
    );

    if let Some(schedule) = &report.schedule {
        for line in &schedule.lines {
            println!("\n產線 {}: {}", line.line, line.product_sequence().join(" → "));
            for assignment in &line.assignments {
                println!(
                    "  {} #{} {} {} 箱",
                    assignment.slot_label, assignment.position, assignment.product, assignment.quantity
                );
            }
        }
        println!("\n換線 {} 次，違反項 {} 筆", schedule.total_changeovers(), schedule.violations().count());
    }

    Ok(())
}
