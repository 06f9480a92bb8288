//! 模型建構器
//!
//! 宣告變數 → 依序建立約束族 → 組裝加權目標。每次呼叫都建立全新的模型。

use std::collections::BTreeMap;

use lineplan_core::{ConstraintRegistry, ObjectiveWeights, Result};

use crate::constraints::ConstraintManager;
use crate::context::{CapacityTable, ModelContext};
use crate::linear::LinearModel;
use crate::objective::{self, ObjectiveRegistry, WeightedTerm};
use crate::variables::ModelVariables;

/// 建構完成、可交給求解器的模型
#[derive(Debug, Clone)]
pub struct BuiltModel {
    pub model: LinearModel,
    pub vars: ModelVariables,
    pub capacity: CapacityTable,
    pub terms: Vec<WeightedTerm>,
    /// 約束族 → 條數
    pub constraint_counts: BTreeMap<String, usize>,
}

impl BuiltModel {
    /// 各目標項的貢獻
    pub fn objective_breakdown(&self, values: &[f64]) -> BTreeMap<String, f64> {
        objective::breakdown(&self.terms, values)
    }

    pub fn variable_count(&self) -> usize {
        self.model.var_count()
    }

    pub fn constraint_count(&self) -> usize {
        self.model.constraint_count()
    }
}

/// 模型建構器
#[derive(Debug, Clone)]
pub struct ModelBuilder<'r> {
    registry: &'r ConstraintRegistry,
    weights: ObjectiveWeights,
    manager: ConstraintManager,
    objectives: ObjectiveRegistry,
}

impl<'r> ModelBuilder<'r> {
    /// 創建新的建構器（完整約束管線、預設目標項）
    pub fn new(registry: &'r ConstraintRegistry, weights: ObjectiveWeights) -> Self {
        Self {
            registry,
            weights,
            manager: ConstraintManager::new(),
            objectives: ObjectiveRegistry::default(),
        }
    }

    /// 建構器模式：設置目標項登錄表
    pub fn with_objectives(mut self, objectives: ObjectiveRegistry) -> Self {
        self.objectives = objectives;
        self
    }

    /// 建立模型
    pub fn build(&self) -> Result<BuiltModel> {
        tracing::debug!("Step 1: 宣告決策變數");
        let mut ctx = ModelContext::with_variables(self.registry);

        tracing::debug!("Step 2: 建立約束族");
        self.manager.apply(&mut ctx)?;

        tracing::debug!("Step 3: 組裝目標函數");
        let terms = self.objectives.compose(&mut ctx, &self.weights)?;
        ctx.model.set_objective(objective::combine(&terms));

        let (model, vars, capacity, counts) = ctx.into_parts();
        tracing::debug!(
            "模型建立完成：變數 {} 個，約束 {} 條，目標項 {} 個",
            model.var_count(),
            model.constraint_count(),
            terms.len()
        );

        Ok(BuiltModel {
            model,
            vars,
            capacity,
            terms,
            constraint_counts: counts.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        })
    }
}
