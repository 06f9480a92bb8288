//! 產量達標

use lineplan_core::{Result, ScheduleError};

use crate::context::ModelContext;
use crate::linear::{LinearExpr, Sense};

const FAMILY: &str = "production_volume";

/// Σ q + under − over = 目標；容許帶為 0 時即為等式
///
/// 下限為正的產品至少要開一個區塊（有效切平面，讓鬆弛解的換線數不致過低）。
pub(crate) fn production_volume(ctx: &mut ModelContext) -> Result<()> {
    let registry = ctx.registry;

    for product in &registry.products {
        let p = product.index;
        let mut produced = LinearExpr::new();
        let mut starts = LinearExpr::new();

        for l in product.lines() {
            for t in 0..registry.slot_count() {
                if let Some(q) = ctx.vars.q(p, l, t) {
                    produced.add_term(q, 1.0);
                }
                if let Some(s) = ctx.vars.s(p, l, t) {
                    starts.add_term(s, 1.0);
                }
            }
        }

        if produced.is_empty() {
            if product.target > 0.0 {
                return Err(ScheduleError::NoValidLine {
                    product: product.id.clone(),
                });
            }
            continue;
        }

        if let (Some(under), Some(over)) = (ctx.vars.under.get(&p), ctx.vars.over.get(&p)) {
            produced.add_term(*under, 1.0);
            produced.add_term(*over, -1.0);
        }
        ctx.add(FAMILY, format!("balance[{}]", product.id), produced, Sense::Eq, product.target);

        if product.lower() > 0.0 {
            ctx.add(FAMILY, format!("opens_block[{}]", product.id), starts, Sense::Ge, 1.0);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::two_product_registry;
    use super::*;
    use lineplan_core::{
        ConstraintRegistry, Line, LineRuleSet, OptimizerConfig, ProblemInstance, Product, TimeSlot,
    };
    use rust_decimal::Decimal;

    #[test]
    fn test_balance_and_block_cut() {
        let registry = two_product_registry(LineRuleSet::default());
        let mut ctx = ModelContext::with_variables(&registry);
        production_volume(&mut ctx).unwrap();

        assert_eq!(ctx.constraint_counts().get(FAMILY), Some(&4));
        let balance = &ctx.model.constraints()[0];
        assert_eq!(balance.name, "balance[A]");
        assert_eq!(balance.sense, Sense::Eq);
        assert_eq!(balance.rhs, 60.0);
        // 容許帶為 0 時沒有偏差變數
        assert_eq!(balance.expr.len(), 10);
    }

    #[test]
    fn test_tolerance_adds_deviation_terms() {
        let instance = ProblemInstance::new()
            .with_product(Product::new("A", Decimal::from(50)))
            .with_line(Line::new("L1").with_rate("A", 10.0))
            .with_slots(TimeSlot::uniform(10, 1.0));
        let config = OptimizerConfig::default().with_volume_tolerance(0.1);
        let registry = ConstraintRegistry::build(&instance, &config).unwrap();
        let mut ctx = ModelContext::with_variables(&registry);
        production_volume(&mut ctx).unwrap();

        let balance = &ctx.model.constraints()[0];
        assert_eq!(balance.expr.len(), 12);
        let under = ctx.vars.under[&0];
        assert_eq!(balance.expr.coefficient(under), 1.0);
        assert_eq!(ctx.model.var(under).upper, 5.0);
    }

    #[test]
    fn test_product_without_line() {
        let instance = ProblemInstance::new()
            .with_product(Product::new("A", Decimal::from(10)))
            .with_product(Product::new("ORPHAN", Decimal::from(5)))
            .with_line(Line::new("L1").with_rate("A", 10.0))
            .with_slots(TimeSlot::uniform(4, 1.0));
        let registry = ConstraintRegistry::build(&instance, &OptimizerConfig::default()).unwrap();
        let mut ctx = ModelContext::with_variables(&registry);

        let err = production_volume(&mut ctx).unwrap_err();
        assert!(matches!(err, ScheduleError::NoValidLine { ref product } if product == "ORPHAN"));
    }

    #[test]
    fn test_zero_target_without_line_is_skipped() {
        let instance = ProblemInstance::new()
            .with_product(Product::new("A", Decimal::from(10)))
            .with_product(Product::new("IDLE", Decimal::ZERO))
            .with_line(Line::new("L1").with_rate("A", 10.0))
            .with_slots(TimeSlot::uniform(4, 1.0));
        let registry = ConstraintRegistry::build(&instance, &OptimizerConfig::default()).unwrap();
        let mut ctx = ModelContext::with_variables(&registry);

        production_volume(&mut ctx).unwrap();
        assert_eq!(ctx.constraint_counts().get(FAMILY), Some(&2));
    }
}
