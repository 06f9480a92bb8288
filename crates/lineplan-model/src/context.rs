//! 建模上下文：變數 + 累積的約束 + 中繼資料
//!
//! 所有約束族都透過同一個上下文寫入模型，建模過程單執行緒且順序固定。

use std::collections::BTreeMap;

use lineplan_core::{ConstraintRegistry, Result, ScheduleError};

use crate::linear::{LinearExpr, LinearModel, Sense};
use crate::variables::{ModelVariables, VariableGroup};

/// 扣除準備/清潔後各產線各時段的可用工時
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapacityTable {
    available: Vec<Vec<f64>>,
}

impl CapacityTable {
    pub fn new(available: Vec<Vec<f64>>) -> Self {
        Self { available }
    }

    pub fn hours(&self, line: usize, slot: usize) -> f64 {
        self.available
            .get(line)
            .and_then(|slots| slots.get(slot))
            .copied()
            .unwrap_or(0.0)
    }

    /// 產線總可用工時
    pub fn line_total(&self, line: usize) -> f64 {
        self.available.get(line).map(|s| s.iter().sum()).unwrap_or(0.0)
    }
}

/// 建模上下文
#[derive(Debug)]
pub struct ModelContext<'r> {
    pub registry: &'r ConstraintRegistry,
    pub model: LinearModel,
    pub vars: ModelVariables,
    capacity: Option<CapacityTable>,
    constraint_counts: BTreeMap<&'static str, usize>,
}

impl<'r> ModelContext<'r> {
    /// 空上下文（尚未宣告變數）
    pub fn new(registry: &'r ConstraintRegistry) -> Self {
        Self {
            registry,
            model: LinearModel::new(),
            vars: ModelVariables::default(),
            capacity: None,
            constraint_counts: BTreeMap::new(),
        }
    }

    /// 宣告全部變數後的上下文
    pub fn with_variables(registry: &'r ConstraintRegistry) -> Self {
        Self::with_groups(registry, &VariableGroup::ALL)
    }

    /// 只宣告部分變數群組
    pub fn with_groups(registry: &'r ConstraintRegistry, groups: &[VariableGroup]) -> Self {
        let mut ctx = Self::new(registry);
        ctx.vars = ModelVariables::declare_groups(registry, &mut ctx.model, groups);
        ctx
    }

    /// 加入約束
    pub fn add(&mut self, family: &'static str, name: impl Into<String>, expr: LinearExpr, sense: Sense, rhs: f64) {
        self.model.add_constraint(family, name, expr, sense, rhs);
        *self.constraint_counts.entry(family).or_insert(0) += 1;
    }

    /// 可用工時表（由準備/清潔階段產生）
    pub fn capacity(&self, family: &str) -> Result<&CapacityTable> {
        self.capacity
            .as_ref()
            .ok_or_else(|| ScheduleError::MissingArtifact {
                family: family.to_string(),
                artifact: "capacity_table".to_string(),
            })
    }

    pub fn has_capacity(&self) -> bool {
        self.capacity.is_some()
    }

    pub fn set_capacity(&mut self, table: CapacityTable) {
        self.capacity = Some(table);
    }

    /// 某時段產品的產量上限：產能 × 該時段最高稼動率 × 可用工時
    pub fn quantity_cap(&self, product: usize, line: usize, slot: usize) -> f64 {
        let resolved = &self.registry.lines[line];
        let rate = resolved.rate(product).unwrap_or(0.0);
        let hours = self.capacity.as_ref().map_or(0.0, |c| c.hours(line, slot));
        let (_, max_util) = resolved.utilization_bounds(slot);
        rate * max_util * hours
    }

    pub fn constraint_counts(&self) -> &BTreeMap<&'static str, usize> {
        &self.constraint_counts
    }

    pub fn into_parts(self) -> (LinearModel, ModelVariables, CapacityTable, BTreeMap<&'static str, usize>) {
        (
            self.model,
            self.vars,
            self.capacity.unwrap_or_default(),
            self.constraint_counts,
        )
    }
}
