//! 排程最佳化主流程

use std::time::Instant;

use lineplan_core::{
    ConstraintRegistry, Diagnostics, OptimizerConfig, ProblemInstance, Result, SolveReport,
};
use lineplan_model::ModelBuilder;
use rayon::prelude::*;

use crate::backend::{MicroLpBackend, SolveBudget, SolverBackend};
use crate::decoder::ResultDecoder;
use crate::decompose::{self, LinePart};

/// 排程最佳化器
///
/// 每次求解都重新建立登錄表與模型，同一實例重複求解結果相同。
#[derive(Debug, Clone)]
pub struct Optimizer<B = MicroLpBackend> {
    config: OptimizerConfig,
    backend: B,
}

impl Optimizer<MicroLpBackend> {
    /// 創建使用預設求解器的最佳化器
    pub fn new(config: OptimizerConfig) -> Self {
        Self::with_backend(config, MicroLpBackend::new())
    }
}

impl<B: SolverBackend> Optimizer<B> {
    /// 創建使用指定求解器的最佳化器
    pub fn with_backend(config: OptimizerConfig, backend: B) -> Self {
        Self { config, backend }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// 求解入口
    ///
    /// 建模錯誤（產品無產線、參數不合法等）以 `Err` 回傳；
    /// 求解器層級的失敗（不可行、逾時、內部錯誤）則反映在報告狀態中。
    pub fn solve(&self, instance: &ProblemInstance) -> Result<SolveReport> {
        tracing::info!(
            "開始排程求解：產品 {} 個，產線 {} 條，時段 {} 個",
            instance.products.len(),
            instance.lines.len(),
            instance.slots.len()
        );
        let start_time = Instant::now();

        let registry = ConstraintRegistry::build(instance, &self.config)?;

        let report = match self.try_decomposed(instance, &registry)? {
            Some(report) => report,
            None => self.solve_monolithic(instance, &registry, &self.config)?,
        };

        tracing::info!(
            "排程求解完成 [{}]：狀態 {}，目標值 {:?}，耗時 {:?}",
            report.run_id,
            report.status,
            report.objective(),
            start_time.elapsed()
        );
        if let Some(schedule) = &report.schedule {
            tracing::info!(
                "換線 {} 次，違反項 {} 筆",
                schedule.total_changeovers(),
                schedule.violations().count()
            );
        }
        Ok(report)
    }

    /// 可拆分時逐線平行求解
    fn try_decomposed(
        &self,
        instance: &ProblemInstance,
        registry: &ConstraintRegistry,
    ) -> Result<Option<SolveReport>> {
        if !decompose::is_decomposable(registry, &self.config) {
            return Ok(None);
        }

        let parts = decompose::split_by_line(instance, registry);
        tracing::info!("依產線拆分求解：子問題 {} 個", parts.len());

        let sub_config = self.config.clone().with_decomposition(false);
        let reports = parts
            .par_iter()
            .map(|part: &LinePart| -> Result<(usize, SolveReport)> {
                let sub_registry = ConstraintRegistry::build(&part.instance, &sub_config)?;
                let report = self.solve_monolithic(&part.instance, &sub_registry, &sub_config)?;
                Ok((part.line, report))
            })
            .collect::<Result<Vec<_>>>()?;

        let merged = decompose::merge(instance, registry, reports);
        if merged.is_none() {
            tracing::info!("改為整體求解");
        }
        Ok(merged)
    }

    /// 建模 → 求解 → 解碼
    fn solve_monolithic(
        &self,
        instance: &ProblemInstance,
        registry: &ConstraintRegistry,
        config: &OptimizerConfig,
    ) -> Result<SolveReport> {
        tracing::debug!("Step 1: 建立模型");
        let build_start = Instant::now();
        let built = ModelBuilder::new(registry, config.weights.clone()).build()?;

        let mut diagnostics = Diagnostics {
            constraint_counts: built.constraint_counts.clone(),
            variable_count: built.variable_count(),
            build_time_ms: build_start.elapsed().as_millis(),
            backend: self.backend.name().to_string(),
            ..Default::default()
        };

        tracing::debug!("Step 2: 求解（{}）", self.backend.name());
        let solve_start = Instant::now();
        let solution = self.backend.solve(&built.model, &SolveBudget::from_config(config));
        diagnostics.solve_time_ms = solve_start.elapsed().as_millis();
        diagnostics.messages.extend(solution.message.clone());

        if !solution.status.has_solution() {
            tracing::warn!(
                "求解失敗：{}（{}）",
                solution.status,
                solution.message.as_deref().unwrap_or("-")
            );
            return Ok(SolveReport::unsolved(solution.status, diagnostics));
        }

        tracing::debug!("Step 3: 解碼排程");
        let schedule = ResultDecoder::new(instance, registry, config.snap_tolerance).decode(&built, &solution.values);
        diagnostics.objective_value = Some(built.model.objective().evaluate(&solution.values));
        diagnostics.objective_breakdown = built.objective_breakdown(&solution.values);

        Ok(SolveReport::solved(solution.status, schedule, diagnostics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendSolution;
    use lineplan_core::{Line, ObjectiveWeights, Product, ScheduleError, SolveStatus, TimeSlot};
    use lineplan_model::LinearModel;
    use rust_decimal::Decimal;

    /// 不論模型內容都回傳固定結果的後端
    struct FixedBackend(BackendSolution);

    impl SolverBackend for FixedBackend {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn solve(&self, _model: &LinearModel, _budget: &SolveBudget) -> BackendSolution {
            self.0.clone()
        }
    }

    fn instance() -> ProblemInstance {
        ProblemInstance::new()
            .with_product(Product::new("A", Decimal::from(20)))
            .with_product(Product::new("B", Decimal::from(10)))
            .with_line(Line::new("L1").with_rate("A", 10.0).with_rate("B", 10.0))
            .with_slots(TimeSlot::uniform(4, 1.0))
    }

    #[test]
    fn test_backend_error_yields_unsolved_report() {
        let optimizer = Optimizer::with_backend(
            OptimizerConfig::default(),
            FixedBackend(BackendSolution::error("license expired")),
        );
        let report = optimizer.solve(&instance()).unwrap();

        assert_eq!(report.status, SolveStatus::Error);
        assert!(report.schedule.is_none());
        assert_eq!(report.diagnostics.backend, "fixed");
        assert_eq!(report.diagnostics.messages, vec!["license expired".to_string()]);
        assert!(report.diagnostics.variable_count > 0);
    }

    #[test]
    fn test_construction_error_is_returned() {
        let instance = instance().with_product(Product::new("C", Decimal::from(5)));
        let result = Optimizer::new(OptimizerConfig::default()).solve(&instance);
        assert!(matches!(result, Err(ScheduleError::NoValidLine { .. })));
    }

    #[test]
    fn test_solve_small_instance() {
        let optimizer = Optimizer::new(OptimizerConfig::default());
        let report = optimizer.solve(&instance()).unwrap();

        assert_eq!(report.status, SolveStatus::Optimal);
        let schedule = report.schedule.unwrap();
        assert!(!schedule.has_violations());
        assert_eq!(schedule.total_changeovers(), 1);
        for fulfillment in &schedule.fulfillment {
            assert!(fulfillment.within_tolerance);
        }
        assert!(!report.diagnostics.decomposed);
        assert!(report
            .diagnostics
            .objective_breakdown
            .contains_key(ObjectiveWeights::CHANGEOVER_COUNT));
    }
}
