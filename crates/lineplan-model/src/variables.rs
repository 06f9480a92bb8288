//! 決策變數宣告
//!
//! 只為有效的（產品, 產線）組合建立變數，無效組合從不實例化。

use std::collections::{BTreeMap, BTreeSet};

use lineplan_core::{ConstraintKind, ConstraintRegistry, Result, ScheduleError};

use crate::linear::{LinearModel, VarId};

/// (產品, 產線, 時段)
pub type Pls = (usize, usize, usize);

/// (產線, 時段)
pub type Ls = (usize, usize);

/// 變數群組（約束族的相依單位）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VariableGroup {
    /// x[p,l,t] 是否生產
    Activity,
    /// q[p,l,t] 產量
    Quantity,
    /// s[p,l,t] 區塊起點
    BlockStart,
    /// busy[l,t] 產線是否有生產
    Busy,
    /// first[l,t] 產線第一個生產時段，附帶前綴旗標
    FirstBusy,
    /// last[l,t] 產線最後一個生產時段，附帶後綴旗標
    LastBusy,
    /// cnt[l,t] 換線次數
    ChangeoverCount,
    /// ev[l,t] 是否換線
    ChangeoverEvent,
    /// ct[l,t] 換線工時
    ChangeoverTime,
    /// m[l,t] 是否為共用時段
    MultiSlot,
    /// pos[p,l,t,k] 時段內順序
    Position,
    /// tail[p,l,t] 時段內最後一個產品
    SlotLast,
    /// keep[p,l,t] 跨時段延續同一產品
    Carryover,
    /// adj[p,q,l,t,k] 與 hand[p,q,l,t]：產品配對相鄰（換線工時依配對而不同時）
    Transition,
    /// 產量偏差
    Deviation,
}

impl VariableGroup {
    pub const ALL: [VariableGroup; 15] = [
        VariableGroup::Activity,
        VariableGroup::Quantity,
        VariableGroup::BlockStart,
        VariableGroup::Busy,
        VariableGroup::FirstBusy,
        VariableGroup::LastBusy,
        VariableGroup::ChangeoverCount,
        VariableGroup::ChangeoverEvent,
        VariableGroup::ChangeoverTime,
        VariableGroup::MultiSlot,
        VariableGroup::Position,
        VariableGroup::SlotLast,
        VariableGroup::Carryover,
        VariableGroup::Transition,
        VariableGroup::Deviation,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            VariableGroup::Activity => "activity",
            VariableGroup::Quantity => "quantity",
            VariableGroup::BlockStart => "block_start",
            VariableGroup::Busy => "busy",
            VariableGroup::FirstBusy => "first_busy",
            VariableGroup::LastBusy => "last_busy",
            VariableGroup::ChangeoverCount => "changeover_count",
            VariableGroup::ChangeoverEvent => "changeover_event",
            VariableGroup::ChangeoverTime => "changeover_time",
            VariableGroup::MultiSlot => "multi_slot",
            VariableGroup::Position => "position",
            VariableGroup::SlotLast => "slot_last",
            VariableGroup::Carryover => "carryover",
            VariableGroup::Transition => "transition",
            VariableGroup::Deviation => "deviation",
        }
    }
}

impl std::fmt::Display for VariableGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// 模型變數
#[derive(Debug, Clone, Default)]
pub struct ModelVariables {
    pub activity: BTreeMap<Pls, VarId>,
    pub quantity: BTreeMap<Pls, VarId>,
    pub block_start: BTreeMap<Pls, VarId>,
    pub busy: BTreeMap<Ls, VarId>,
    pub first_busy: BTreeMap<Ls, VarId>,
    /// 到該時段（含）為止是否曾生產
    pub busy_before: BTreeMap<Ls, VarId>,
    pub last_busy: BTreeMap<Ls, VarId>,
    /// 從該時段（含）起是否仍會生產
    pub busy_after: BTreeMap<Ls, VarId>,
    pub changeover_count: BTreeMap<Ls, VarId>,
    pub changeover_event: BTreeMap<Ls, VarId>,
    pub changeover_time: BTreeMap<Ls, VarId>,
    pub multi_slot: BTreeMap<Ls, VarId>,
    pub position: BTreeMap<(usize, usize, usize, usize), VarId>,
    pub slot_last: BTreeMap<Pls, VarId>,
    pub carryover: BTreeMap<Pls, VarId>,
    /// (前, 後, 產線, 時段, 前者位置) 時段內相鄰
    pub adjacent: BTreeMap<(usize, usize, usize, usize, usize), VarId>,
    /// (前, 後, 產線, 時段) 上一時段末產品接本時段首產品
    pub handover: BTreeMap<(usize, usize, usize, usize), VarId>,
    pub under: BTreeMap<usize, VarId>,
    pub over: BTreeMap<usize, VarId>,
    declared: BTreeSet<VariableGroup>,
}

impl ModelVariables {
    /// 宣告全部變數群組
    pub fn declare(registry: &ConstraintRegistry, model: &mut LinearModel) -> Self {
        Self::declare_groups(registry, model, &VariableGroup::ALL)
    }

    /// 只宣告指定的變數群組
    pub fn declare_groups(
        registry: &ConstraintRegistry,
        model: &mut LinearModel,
        groups: &[VariableGroup],
    ) -> Self {
        let mut vars = Self::default();
        for group in groups {
            vars.declare_group(*group, registry, model);
        }
        tracing::debug!(
            "變數宣告完成：群組 {} 個，變數 {} 個",
            vars.declared.len(),
            model.var_count()
        );
        vars
    }

    fn declare_group(&mut self, group: VariableGroup, registry: &ConstraintRegistry, model: &mut LinearModel) {
        let slots = registry.slot_count();

        for line in &registry.lines {
            let l = line.index;
            let products: Vec<usize> = line.products().collect();

            for t in 0..slots {
                let ls = format!("{},{}", line.id, t);
                match group {
                    VariableGroup::Busy => {
                        self.busy.insert((l, t), model.continuous(format!("busy[{}]", ls), 0.0, 1.0));
                    }
                    VariableGroup::FirstBusy => {
                        self.first_busy
                            .insert((l, t), model.continuous(format!("first[{}]", ls), 0.0, 1.0));
                        self.busy_before
                            .insert((l, t), model.continuous(format!("before[{}]", ls), 0.0, 1.0));
                    }
                    VariableGroup::LastBusy if line.needs_last_busy() => {
                        self.last_busy
                            .insert((l, t), model.continuous(format!("last[{}]", ls), 0.0, 1.0));
                        self.busy_after
                            .insert((l, t), model.continuous(format!("after[{}]", ls), 0.0, 1.0));
                    }
                    VariableGroup::ChangeoverCount => {
                        let max = products.len().max(1) as f64;
                        self.changeover_count
                            .insert((l, t), model.integer(format!("cnt[{}]", ls), 0.0, max));
                    }
                    VariableGroup::ChangeoverEvent => {
                        self.changeover_event.insert((l, t), model.binary(format!("ev[{}]", ls)));
                    }
                    VariableGroup::ChangeoverTime if line.max_changeover_hours() > 0.0 => {
                        let upper = registry.slot_hours[t];
                        self.changeover_time
                            .insert((l, t), model.continuous(format!("ct[{}]", ls), 0.0, upper));
                    }
                    VariableGroup::MultiSlot
                        if products.len() > 1
                            && line.positions() > 1
                            && line.is_enabled(ConstraintKind::MultiProductSlot) =>
                    {
                        self.multi_slot.insert((l, t), model.binary(format!("multi[{}]", ls)));
                    }
                    _ => {}
                }

                for &p in &products {
                    let key = (p, l, t);
                    let pls = format!("{},{},{}", registry.products[p].id, line.id, t);
                    match group {
                        VariableGroup::Activity => {
                            self.activity.insert(key, model.binary(format!("x[{}]", pls)));
                        }
                        VariableGroup::Quantity => {
                            let rate = line.rate(p).unwrap_or(0.0);
                            let upper = rate * registry.slot_hours[t];
                            self.quantity
                                .insert(key, model.continuous(format!("q[{}]", pls), 0.0, upper));
                        }
                        VariableGroup::BlockStart => {
                            self.block_start
                                .insert(key, model.continuous(format!("s[{}]", pls), 0.0, 1.0));
                        }
                        VariableGroup::Position if line.is_enabled(ConstraintKind::Sequencing) => {
                            for k in 0..line.positions() {
                                self.position
                                    .insert((p, l, t, k), model.binary(format!("pos[{},{}]", pls, k)));
                            }
                        }
                        VariableGroup::SlotLast if line.is_enabled(ConstraintKind::Sequencing) => {
                            self.slot_last
                                .insert(key, model.continuous(format!("tail[{}]", pls), 0.0, 1.0));
                        }
                        VariableGroup::Carryover if line.sequence_aware() && t > 0 => {
                            self.carryover
                                .insert(key, model.continuous(format!("keep[{}]", pls), 0.0, 1.0));
                        }
                        VariableGroup::Transition if line.sequence_aware() && line.has_pair_hours() => {
                            for &q in products.iter().filter(|&&q| q != p) {
                                let pair = format!("{}>{},{},{}", registry.products[p].id, registry.products[q].id, line.id, t);
                                for k in 0..line.positions().saturating_sub(1) {
                                    self.adjacent.insert(
                                        (p, q, l, t, k),
                                        model.continuous(format!("adj[{},{}]", pair, k), 0.0, 1.0),
                                    );
                                }
                                if t > 0 {
                                    self.handover
                                        .insert((p, q, l, t), model.continuous(format!("hand[{}]", pair), 0.0, 1.0));
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        if group == VariableGroup::Deviation {
            for product in &registry.products {
                if product.tolerance > 0.0 {
                    let p = product.index;
                    self.under.insert(
                        p,
                        model.continuous(format!("under[{}]", product.id), 0.0, product.tolerance),
                    );
                    self.over.insert(
                        p,
                        model.continuous(format!("over[{}]", product.id), 0.0, product.tolerance),
                    );
                }
            }
        }

        self.declared.insert(group);
    }

    pub fn is_declared(&self, group: VariableGroup) -> bool {
        self.declared.contains(&group)
    }

    /// 確認約束族需要的變數群組已宣告
    pub fn require(&self, family: &str, group: VariableGroup) -> Result<()> {
        if self.is_declared(group) {
            Ok(())
        } else {
            Err(ScheduleError::MissingVariableGroup {
                family: family.to_string(),
                group: group.to_string(),
            })
        }
    }

    /// 某產線某時段的所有活動變數
    pub fn activity_at(&self, line: usize, slot: usize) -> impl Iterator<Item = (usize, VarId)> + '_ {
        self.activity
            .iter()
            .filter(move |((_, l, t), _)| *l == line && *t == slot)
            .map(|((p, _, _), v)| (*p, *v))
    }

    pub fn x(&self, product: usize, line: usize, slot: usize) -> Option<VarId> {
        self.activity.get(&(product, line, slot)).copied()
    }

    pub fn q(&self, product: usize, line: usize, slot: usize) -> Option<VarId> {
        self.quantity.get(&(product, line, slot)).copied()
    }

    pub fn s(&self, product: usize, line: usize, slot: usize) -> Option<VarId> {
        self.block_start.get(&(product, line, slot)).copied()
    }

    pub fn pos(&self, product: usize, line: usize, slot: usize, k: usize) -> Option<VarId> {
        self.position.get(&(product, line, slot, k)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lineplan_core::{
        ChangeoverRule, Line, LineOverrides, LineRuleSet, OptimizerConfig, ProblemInstance, Product,
        TimeSlot,
    };
    use rust_decimal::Decimal;

    fn registry(rules: LineRuleSet) -> ConstraintRegistry {
        let instance = ProblemInstance::new()
            .with_product(Product::new("A", Decimal::from(30)))
            .with_product(Product::new("B", Decimal::from(20)))
            .with_product(Product::new("C", Decimal::from(10)))
            .with_line(
                Line::new("L1")
                    .with_rate("A", 10.0)
                    .with_rate("B", 10.0)
                    .with_rules(rules),
            )
            .with_line(Line::new("L2").with_rate("C", 5.0))
            .with_slots(TimeSlot::uniform(4, 2.0));
        ConstraintRegistry::build(&instance, &OptimizerConfig::default()).unwrap()
    }

    #[test]
    fn test_only_valid_pairs_instantiated() {
        let registry = registry(LineRuleSet::default());
        let mut model = LinearModel::new();
        let vars = ModelVariables::declare(&registry, &mut model);

        // (A,L1) (B,L1) (C,L2) 各 4 個時段
        assert_eq!(vars.activity.len(), 12);
        assert!(vars.x(2, 0, 0).is_none());
        assert!(vars.x(2, 1, 3).is_some());
        // 未開啟排序時不建立位置變數
        assert!(vars.position.is_empty());
        // L2 只有一個產品，不需要共用時段旗標
        assert_eq!(vars.multi_slot.len(), 4);
        // 換線工時為 0 時不建立
        assert!(vars.changeover_time.is_empty());
    }

    #[test]
    fn test_sequencing_variables() {
        let registry = registry(LineRuleSet::default().with_sequencing());
        let mut model = LinearModel::new();
        let vars = ModelVariables::declare(&registry, &mut model);

        // L1: 2 個產品 × 4 時段 × 2 個位置
        assert_eq!(vars.position.len(), 16);
        assert_eq!(vars.slot_last.len(), 8);
        // 延續變數從第二個時段開始
        assert_eq!(vars.carryover.len(), 6);
    }

    #[test]
    fn test_transition_variables_only_with_pair_hours() {
        let registry_seq = registry(LineRuleSet::default().with_sequencing());
        let mut model = LinearModel::new();
        let vars = ModelVariables::declare(&registry_seq, &mut model);
        assert!(vars.adjacent.is_empty());
        assert!(vars.handover.is_empty());

        let rules = LineRuleSet::default().with_sequencing().with_overrides(LineOverrides {
            changeover_hours: Some(0.5),
            changeover_rules: Some(vec![ChangeoverRule::new("cup", "", 2.0)]),
            ..Default::default()
        });
        let instance = ProblemInstance::new()
            .with_product(Product::new("A", Decimal::from(30)).with_category("cup"))
            .with_product(Product::new("B", Decimal::from(20)))
            .with_line(Line::new("L1").with_rate("A", 10.0).with_rate("B", 10.0).with_rules(rules))
            .with_slots(TimeSlot::uniform(4, 2.0));
        let registry = ConstraintRegistry::build(&instance, &OptimizerConfig::default()).unwrap();
        let mut model = LinearModel::new();
        let vars = ModelVariables::declare(&registry, &mut model);

        // 2 個有序配對 × 4 時段 × 1 個相鄰位置；交接從第二個時段開始
        assert_eq!(vars.adjacent.len(), 8);
        assert_eq!(vars.handover.len(), 6);
        assert_eq!(vars.changeover_time.len(), 4);
    }

    #[test]
    fn test_require_missing_group() {
        let registry = registry(LineRuleSet::default());
        let mut model = LinearModel::new();
        let vars = ModelVariables::declare_groups(&registry, &mut model, &[VariableGroup::Activity]);

        assert!(vars.require("block_continuity", VariableGroup::Activity).is_ok());
        let err = vars.require("block_continuity", VariableGroup::BlockStart).unwrap_err();
        assert!(matches!(
            err,
            ScheduleError::MissingVariableGroup { ref family, ref group }
                if family == "block_continuity" && group == "block_start"
        ));
    }
}
