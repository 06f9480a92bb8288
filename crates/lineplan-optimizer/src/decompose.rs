//! 依產線拆分
//!
//! 每個產品只有一條有效產線、且目標不含跨產線項時，各產線只透過全廠換線上限互相牽連。
//! 此時可逐線獨立求解再合併；合併後若超過全廠上限，交回整體求解。

use std::collections::{BTreeMap, BTreeSet};

use lineplan_core::{
    ConstraintKind, ConstraintRegistry, Diagnostics, Fulfillment, LineSchedule, ObjectiveWeights,
    OptimizerConfig, ProblemInstance, Schedule, SolveReport, SolveStatus,
};
use rust_decimal::Decimal;

/// 單一產線的子問題
#[derive(Debug, Clone)]
pub struct LinePart {
    /// 原實例中的產線序號
    pub line: usize,
    pub instance: ProblemInstance,
}

/// 是否可依產線拆分
pub fn is_decomposable(registry: &ConstraintRegistry, config: &OptimizerConfig) -> bool {
    if !config.decompose_lines || registry.lines.len() < 2 {
        return false;
    }
    if config.weights.get(ObjectiveWeights::UTILIZATION_IMBALANCE) != 0.0 {
        return false;
    }
    if !registry.is_line_separable() {
        return false;
    }
    // 沒有產品卻要求最低稼動率的產線必定不可行，交給整體模型回報
    !registry.lines.iter().any(|line| {
        line.rates.is_empty()
            && line.is_enabled(ConstraintKind::TimeCapacity)
            && line.requires_utilization()
    })
}

/// 切出各產線的子實例；沒有可生產產品的產線不建子問題
pub fn split_by_line(instance: &ProblemInstance, registry: &ConstraintRegistry) -> Vec<LinePart> {
    let mut parts = Vec::new();

    for line in &registry.lines {
        let products: Vec<_> = registry
            .products
            .iter()
            .filter(|p| p.required_slots.contains_key(&line.index))
            .map(|p| instance.products[p.index].clone())
            .collect();
        if products.is_empty() {
            continue;
        }

        let ids: BTreeSet<&str> = products.iter().map(|p| p.id.as_str()).collect();
        let mut sub_line = instance.lines[line.index].clone();
        sub_line.rates.retain(|product, _| ids.contains(product.as_str()));

        tracing::debug!("產線 {} 子問題：產品 {} 個", line.id, products.len());
        parts.push(LinePart {
            line: line.index,
            instance: ProblemInstance {
                products,
                lines: vec![sub_line],
                slots: instance.slots.clone(),
            },
        });
    }
    parts
}

/// 合併子問題結果
///
/// 任一子問題失敗則整體失敗；合併後換線總數超過全廠上限時回傳 `None`。
pub fn merge(
    instance: &ProblemInstance,
    registry: &ConstraintRegistry,
    reports: Vec<(usize, SolveReport)>,
) -> Option<SolveReport> {
    let status = reports
        .iter()
        .map(|(_, report)| report.status)
        .fold(SolveStatus::Optimal, SolveStatus::combine);
    let diagnostics = merge_diagnostics(reports.iter().map(|(_, report)| &report.diagnostics));

    if !status.has_solution() {
        return Some(SolveReport::unsolved(status, diagnostics));
    }

    let mut by_line: BTreeMap<usize, Schedule> = reports
        .into_iter()
        .filter_map(|(line, report)| report.schedule.map(|schedule| (line, schedule)))
        .collect();

    let mut schedule = Schedule::empty();
    for line in &registry.lines {
        match by_line.remove(&line.index) {
            Some(part) => schedule.merge(part),
            None => schedule.lines.push(LineSchedule::new(line.id.clone())),
        }
    }

    let total = schedule.total_changeovers();
    if total > registry.global_changeover_cap as usize {
        tracing::warn!(
            "拆分求解的換線總數 {} 超過全廠上限 {}",
            total,
            registry.global_changeover_cap
        );
        return None;
    }

    // 沒有任何產線的零目標產品也要列入達成摘要，並依原實例順序排列
    let mut fulfillment: BTreeMap<String, Fulfillment> = schedule
        .fulfillment
        .drain(..)
        .map(|f| (f.product.clone(), f))
        .collect();
    schedule.fulfillment = instance
        .products
        .iter()
        .map(|product| {
            fulfillment.remove(&product.id).unwrap_or_else(|| Fulfillment {
                product: product.id.clone(),
                target: product.target,
                actual: Decimal::ZERO,
                deviation: -product.target,
                within_tolerance: product.target.is_zero(),
            })
        })
        .collect();

    Some(SolveReport::solved(status, schedule, diagnostics))
}

/// 目標、建模時間與規模相加，求解時間取最長者（子問題平行求解）
fn merge_diagnostics<'a>(parts: impl Iterator<Item = &'a Diagnostics>) -> Diagnostics {
    let mut merged = Diagnostics {
        decomposed: true,
        objective_value: Some(0.0),
        ..Default::default()
    };

    for part in parts {
        merged.objective_value = match (merged.objective_value, part.objective_value) {
            (Some(total), Some(value)) => Some(total + value),
            _ => None,
        };
        for (term, value) in &part.objective_breakdown {
            *merged.objective_breakdown.entry(term.clone()).or_insert(0.0) += value;
        }
        for (family, count) in &part.constraint_counts {
            *merged.constraint_counts.entry(family.clone()).or_insert(0) += count;
        }
        merged.variable_count += part.variable_count;
        merged.build_time_ms += part.build_time_ms;
        merged.solve_time_ms = merged.solve_time_ms.max(part.solve_time_ms);
        if merged.backend.is_empty() {
            merged.backend = part.backend.clone();
        }
        merged.messages.extend(part.messages.iter().cloned());
    }
    merged
}
