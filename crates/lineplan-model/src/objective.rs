//! 目標函數組裝
//!
//! 目標是多個具名項的加權和。每個項由 (名稱, 建構函式) 登錄，權重依名稱查詢；
//! 新增目標項只需登錄權重與建構函式，不必修改約束管理器或求解流程。

use std::collections::BTreeMap;

use lineplan_core::{ObjectiveWeights, Result};

use crate::constraints::used_hours;
use crate::context::ModelContext;
use crate::linear::{LinearExpr, Sense};

/// 目標項建構函式，可宣告輔助變數與約束
pub type TermBuilder = fn(&mut ModelContext<'_>) -> Result<LinearExpr>;

/// 登錄的目標項
#[derive(Clone, Copy)]
pub struct ObjectiveTerm {
    pub name: &'static str,
    pub build: TermBuilder,
}

impl std::fmt::Debug for ObjectiveTerm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectiveTerm").field("name", &self.name).finish()
    }
}

/// 已建立並加權的目標項
#[derive(Debug, Clone)]
pub struct WeightedTerm {
    pub name: String,
    pub weight: f64,
    pub expr: LinearExpr,
}

impl WeightedTerm {
    /// 以變數值計算加權後的貢獻
    pub fn value(&self, values: &[f64]) -> f64 {
        self.weight * self.expr.evaluate(values)
    }
}

/// 目標項登錄表
#[derive(Debug, Clone)]
pub struct ObjectiveRegistry {
    terms: Vec<ObjectiveTerm>,
}

impl Default for ObjectiveRegistry {
    fn default() -> Self {
        Self::empty()
            .with_term(ObjectiveWeights::TARGET_DEVIATION, target_deviation)
            .with_term(ObjectiveWeights::CHANGEOVER_COUNT, changeover_count)
            .with_term(ObjectiveWeights::CHANGEOVER_TIME, changeover_time)
            .with_term(ObjectiveWeights::UTILIZATION_IMBALANCE, utilization_imbalance)
    }
}

impl ObjectiveRegistry {
    pub fn empty() -> Self {
        Self { terms: Vec::new() }
    }

    /// 登錄目標項，同名者會被取代
    pub fn register(&mut self, name: &'static str, build: TermBuilder) {
        self.terms.retain(|t| t.name != name);
        self.terms.push(ObjectiveTerm { name, build });
    }

    /// 建構器模式：登錄目標項
    pub fn with_term(mut self, name: &'static str, build: TermBuilder) -> Self {
        self.register(name, build);
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.terms.iter().map(|t| t.name)
    }

    /// 依權重建立各目標項，權重為 0 的項不建立
    pub fn compose(&self, ctx: &mut ModelContext, weights: &ObjectiveWeights) -> Result<Vec<WeightedTerm>> {
        for (name, _) in weights.iter() {
            if !self.terms.iter().any(|t| t.name == name.as_str()) {
                tracing::warn!("權重 {} 沒有對應的目標項，已忽略", name);
            }
        }

        let mut composed = Vec::new();
        for term in &self.terms {
            let weight = weights.get(term.name);
            if weight == 0.0 {
                tracing::debug!("目標項 {} 權重為 0，略過", term.name);
                continue;
            }
            let expr = (term.build)(ctx)?;
            tracing::debug!("目標項 {}: 權重 {}，{} 項", term.name, weight, expr.len());
            composed.push(WeightedTerm {
                name: term.name.to_string(),
                weight,
                expr,
            });
        }
        Ok(composed)
    }
}

/// Σ 加權項
pub fn combine(terms: &[WeightedTerm]) -> LinearExpr {
    let mut objective = LinearExpr::new();
    for term in terms {
        objective.add_expr(&term.expr, term.weight);
    }
    objective
}

/// 各項貢獻
pub fn breakdown(terms: &[WeightedTerm], values: &[f64]) -> BTreeMap<String, f64> {
    terms.iter().map(|t| (t.name.clone(), t.value(values))).collect()
}

/// 以目標正規化的產量偏差：Σ (under + over) / target
fn target_deviation(ctx: &mut ModelContext) -> Result<LinearExpr> {
    let mut expr = LinearExpr::new();
    for product in &ctx.registry.products {
        if product.target <= 0.0 {
            continue;
        }
        let scale = 1.0 / product.target;
        for side in [&ctx.vars.under, &ctx.vars.over] {
            if let Some(var) = side.get(&product.index) {
                expr.add_term(*var, scale);
            }
        }
    }
    Ok(expr)
}

fn changeover_count(ctx: &mut ModelContext) -> Result<LinearExpr> {
    Ok(LinearExpr::sum(ctx.vars.changeover_count.values().copied(), 1.0))
}

fn changeover_time(ctx: &mut ModelContext) -> Result<LinearExpr> {
    Ok(LinearExpr::sum(ctx.vars.changeover_time.values().copied(), 1.0))
}

/// 產線稼動率最大值與最小值之差，只比較有可生產產品的產線
fn utilization_imbalance(ctx: &mut ModelContext) -> Result<LinearExpr> {
    const FAMILY: &str = "objective";
    let registry = ctx.registry;
    let capacity = ctx.capacity(FAMILY)?.clone();

    let lines: Vec<usize> = registry
        .lines
        .iter()
        .filter(|line| !line.rates.is_empty() && capacity.line_total(line.index) > 0.0)
        .map(|line| line.index)
        .collect();
    if lines.len() < 2 {
        return Ok(LinearExpr::new());
    }

    let umax = ctx.model.continuous("util_max", 0.0, 1.0);
    let umin = ctx.model.continuous("util_min", 0.0, 1.0);

    for l in lines {
        let mut utilization = LinearExpr::new();
        for t in 0..registry.slot_count() {
            utilization.add_expr(&used_hours(ctx, l, t), 1.0);
        }
        let total = capacity.line_total(l);
        let id = &registry.lines[l].id;

        let mut upper = LinearExpr::var(umax);
        upper.add_expr(&utilization, -1.0 / total);
        ctx.add(FAMILY, format!("util_max[{}]", id), upper, Sense::Ge, 0.0);

        let mut lower = LinearExpr::var(umin);
        lower.add_expr(&utilization, -1.0 / total);
        ctx.add(FAMILY, format!("util_min[{}]", id), lower, Sense::Le, 0.0);
    }

    Ok(LinearExpr::var(umax).with(umin, -1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::{ConstraintManager, Stage};
    use lineplan_core::{ConstraintRegistry, Line, OptimizerConfig, ProblemInstance, Product, TimeSlot};
    use rust_decimal::Decimal;

    fn registry(config: &OptimizerConfig) -> ConstraintRegistry {
        let instance = ProblemInstance::new()
            .with_product(Product::new("A", Decimal::from(50)))
            .with_product(Product::new("B", Decimal::from(20)))
            .with_line(Line::new("L1").with_rate("A", 10.0))
            .with_line(Line::new("L2").with_rate("B", 5.0))
            .with_slots(TimeSlot::uniform(8, 2.0));
        ConstraintRegistry::build(&instance, config).unwrap()
    }

    #[test]
    fn test_zero_weight_drops_term() {
        let config = OptimizerConfig::default();
        let registry = registry(&config);
        let mut ctx = ModelContext::with_variables(&registry);
        ConstraintManager::apply_stage(Stage::SetupCleanup, &mut ctx).unwrap();

        let weights = ObjectiveWeights::default().with(ObjectiveWeights::CHANGEOVER_TIME, 0.0);
        let terms = ObjectiveRegistry::default().compose(&mut ctx, &weights).unwrap();
        let names: Vec<&str> = terms.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["target_deviation", "changeover_count", "utilization_imbalance"]);
    }

    #[test]
    fn test_missing_weight_means_zero() {
        let config = OptimizerConfig::default();
        let registry = registry(&config);
        let mut ctx = ModelContext::with_variables(&registry);

        let weights = ObjectiveWeights::empty().with(ObjectiveWeights::CHANGEOVER_COUNT, 1.0);
        let terms = ObjectiveRegistry::default().compose(&mut ctx, &weights).unwrap();
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].expr.len(), 16);
    }

    #[test]
    fn test_deviation_normalised_by_target() {
        let config = OptimizerConfig::default().with_volume_tolerance(0.1);
        let registry = registry(&config);
        let mut ctx = ModelContext::with_variables(&registry);

        let weights = ObjectiveWeights::empty().with(ObjectiveWeights::TARGET_DEVIATION, 100.0);
        let terms = ObjectiveRegistry::default().compose(&mut ctx, &weights).unwrap();
        let objective = combine(&terms);

        assert!((objective.coefficient(ctx.vars.under[&0]) - 2.0).abs() < 1e-9);
        assert!((objective.coefficient(ctx.vars.over[&1]) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_imbalance_adds_auxiliary_rows() {
        let config = OptimizerConfig::default();
        let registry = registry(&config);
        let mut ctx = ModelContext::with_variables(&registry);
        let before = ctx.model.var_count();
        ConstraintManager::apply_stage(Stage::SetupCleanup, &mut ctx).unwrap();

        let weights = ObjectiveWeights::empty().with(ObjectiveWeights::UTILIZATION_IMBALANCE, 1.0);
        let terms = ObjectiveRegistry::default().compose(&mut ctx, &weights).unwrap();

        assert_eq!(ctx.model.var_count(), before + 2);
        assert_eq!(ctx.constraint_counts().get("objective"), Some(&4));
        assert_eq!(terms[0].expr.len(), 2);
    }

    #[test]
    fn test_imbalance_requires_capacity() {
        let config = OptimizerConfig::default();
        let registry = registry(&config);
        let mut ctx = ModelContext::with_variables(&registry);

        let weights = ObjectiveWeights::empty().with(ObjectiveWeights::UTILIZATION_IMBALANCE, 1.0);
        assert!(ObjectiveRegistry::default().compose(&mut ctx, &weights).is_err());
    }

    #[test]
    fn test_custom_term_registration() {
        fn idle_slots(ctx: &mut ModelContext) -> Result<LinearExpr> {
            let mut expr = LinearExpr::sum(ctx.vars.busy.values().copied(), -1.0);
            expr.add_constant(ctx.vars.busy.len() as f64);
            Ok(expr)
        }

        let config = OptimizerConfig::default();
        let registry = registry(&config);
        let mut ctx = ModelContext::with_variables(&registry);
        let objectives = ObjectiveRegistry::empty().with_term("idle_slots", idle_slots);
        let weights = ObjectiveWeights::empty().with("idle_slots", 0.5);

        let terms = objectives.compose(&mut ctx, &weights).unwrap();
        assert_eq!(terms.len(), 1);
        let values = vec![0.0; ctx.model.var_count()];
        assert_eq!(terms[0].value(&values), 8.0);
    }
}
