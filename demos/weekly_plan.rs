//! 一週雙班排程示例
//!
//! 週一至週五日/夜班，週三縮短為 8 小時。三條產線、六個產品。
//! 以 `RUST_LOG=lineplan_optimizer=debug` 檢視求解步驟。

use chrono::NaiveDate;
use lineplan::{
    solve, Line, LineDirective, LineOverrides, LineParameters, LineRuleSet, OptimizerConfig,
    ProblemInstance, Product, TimeSlot,
};
use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== 一週雙班排程示例 ===\n");

    let week_of = NaiveDate::from_ymd_opt(2025, 11, 3).ok_or_else(|| anyhow::anyhow!("無效日期"))?;
    let slots = TimeSlot::weekly(week_of, [10.5, 10.5, 8.0, 10.5, 10.5]);

    let instance = ProblemInstance::new()
        .with_product(Product::new("COLA-330", Decimal::from(3200)).with_category("can"))
        .with_product(Product::new("COLA-500", Decimal::from(1800)).with_category("pet"))
        .with_product(Product::new("TEA-500", Decimal::from(900)).with_category("pet"))
        .with_product(Product::new("SODA-330", Decimal::from(1200)).with_category("can"))
        .with_product(Product::new("WATER-600", Decimal::from(2400)).with_category("pet"))
        .with_product(Product::new("JUICE-250", Decimal::from(300)).with_category("tetra"))
        .with_line(
            Line::new("CAN-1")
                .with_rate("COLA-330", 60.0)
                .with_rate("SODA-330", 55.0)
                .with_rules(LineRuleSet::default().with_directive(LineDirective::StartProduct {
                    product: "COLA-330".to_string(),
                })),
        )
        .with_line(
            Line::new("PET-1")
                .with_rate("COLA-500", 45.0)
                .with_rate("TEA-500", 40.0)
                .with_rate("WATER-600", 50.0),
        )
        .with_line(
            Line::new("TETRA-1")
                .with_rate("JUICE-250", 30.0)
                .with_rules(LineRuleSet::default().with_overrides(LineOverrides {
                    min_active_hours: Some(2.0),
                    ..Default::default()
                })),
        )
        .with_slots(slots);

    let config = OptimizerConfig::default()
        .with_defaults(LineParameters::plant_defaults())
        .with_volume_tolerance(0.02)
        .with_category_threshold("tetra", 0.5);

    let report = solve(&instance, &config)?;
    println!("狀態: {}", report.status);
    if let Some(objective) = report.objective() {
        println!("目標值: {:.4}", objective);
    }
    for (term, value) in &report.diagnostics.objective_breakdown {
        println!("  - {}: {:.4}", term, value);
    }

    let Some(schedule) = &report.schedule else {
        println!("\n沒有可行排程：{:?}", report.diagnostics.messages);
        return Ok(());
    };

    for line in &schedule.lines {
        println!("\n產線 {}（稼動率 {:.1}%）", line.line, line.utilization * 100.0);
        for assignment in &line.assignments {
            println!(
                "  {:<10} #{} {:<10} {:>8} 箱  {:>5.2} 小時",
                assignment.slot_label, assignment.position, assignment.product, assignment.quantity, assignment.hours
            );
        }
    }

    println!("\n換線 {} 次:", schedule.total_changeovers());
    for changeover in &schedule.changeovers {
        println!(
            "  {} 時段 {}: {} → {}（{:.1} 小時）",
            changeover.line, changeover.slot, changeover.from, changeover.to, changeover.hours
        );
    }

    println!("\n產量達成:");
    for fulfillment in &schedule.fulfillment {
        println!(
            "  {:<10} 目標 {:>6} 實際 {:>10} 偏差 {:>10}",
            fulfillment.product, fulfillment.target, fulfillment.actual, fulfillment.deviation
        );
    }

    if !schedule.warnings.is_empty() {
        println!("\n警告:");
        for warning in &schedule.warnings {
            println!("  [{:?}] {:?}: {}", warning.severity, warning.kind, warning.message);
        }
    }

    Ok(())
}
