//! 結果解碼器
//!
//! 將求解器的變數值轉回排程：
//! 1. 數值截斷（整數變數四捨五入、微小產量歸零）
//! 2. 決定每個時段內的生產順序
//! 3. 依模型使用的計數方式產生換線紀錄
//! 4. 產量達成與產線稼動率摘要
//! 5. 以排程本身重新檢查所有啟用的約束族，違反者附加為警告

use std::collections::{BTreeMap, BTreeSet};

use lineplan_core::{
    ChangeoverRecord, ConstraintKind, ConstraintRegistry, Fulfillment, LineDirective,
    LineSchedule, ProblemInstance, ResolvedLine, Schedule, ScheduleWarning, SlotAssignment,
    WarningKind,
};
use lineplan_model::{BuiltModel, CapacityTable, VarId};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

/// 檢查時的數值容差
const CHECK_TOLERANCE: f64 = 1e-5;

/// 截斷後的解
#[derive(Debug, Default)]
struct Snapped {
    /// (產品, 產線, 時段) → 產量，只含啟用的組合
    active: BTreeMap<(usize, usize, usize), f64>,
    /// (產品, 產線, 時段) → 時段內位置
    position: BTreeMap<(usize, usize, usize), usize>,
}

impl Snapped {
    fn is_active(&self, p: usize, l: usize, t: usize) -> bool {
        self.active.contains_key(&(p, l, t))
    }
}

/// 某產線各時段依序排列的 (產品, 產量)
type LinePlan = Vec<Vec<(usize, f64)>>;

/// 結果解碼器
pub struct ResultDecoder<'a> {
    instance: &'a ProblemInstance,
    registry: &'a ConstraintRegistry,
    snap_tolerance: f64,
}

impl<'a> ResultDecoder<'a> {
    pub fn new(instance: &'a ProblemInstance, registry: &'a ConstraintRegistry, snap_tolerance: f64) -> Self {
        Self {
            instance,
            registry,
            snap_tolerance,
        }
    }

    /// 解碼並重新檢查
    pub fn decode(&self, built: &BuiltModel, values: &[f64]) -> Schedule {
        let mut schedule = Schedule::empty();

        tracing::debug!("Step 1: 數值截斷");
        let snapped = self.snap(built, values, &mut schedule);

        tracing::debug!("Step 2: 時段內排序與換線紀錄");
        let mut plans = Vec::with_capacity(self.registry.lines.len());
        for line in &self.registry.lines {
            let plan = self.order_line(line, &snapped);
            schedule.changeovers.extend(self.changeovers(line, &plan));
            plans.push(plan);
        }

        tracing::debug!("Step 3: 產線排程與稼動率");
        for line in &self.registry.lines {
            let line_schedule = self.line_schedule(line, &plans[line.index], &schedule, &built.capacity);
            schedule.lines.push(line_schedule);
        }

        tracing::debug!("Step 4: 產量達成");
        self.fulfillment(&mut schedule);

        tracing::debug!("Step 5: 重新檢查約束");
        self.validate(&mut schedule, &plans, &built.capacity);

        for warning in schedule.violations() {
            tracing::warn!("{:?}: {}", warning.kind, warning.message);
        }
        schedule
    }

    fn snap(&self, built: &BuiltModel, values: &[f64], schedule: &mut Schedule) -> Snapped {
        let tolerance = self.snap_tolerance;
        let value = |var: VarId| values.get(var.index()).copied().unwrap_or(0.0);
        let mut snapped = Snapped::default();

        for (&(p, l, t), &x) in &built.vars.activity {
            let raw = value(x);
            let on = raw >= 0.5;
            let line_id = &self.registry.lines[l].id;
            let product_id = &self.registry.products[p].id;

            if (raw - if on { 1.0 } else { 0.0 }).abs() > tolerance {
                schedule.add_warning(
                    ScheduleWarning::error(WarningKind::ActivityMismatch, format!("啟用旗標不是整數: {}", raw))
                        .with_line(line_id)
                        .with_slot(t)
                        .with_product(product_id),
                );
            }

            let mut quantity = built.vars.q(p, l, t).map_or(0.0, value);
            if quantity < tolerance {
                if quantity.abs() > f64::EPSILON {
                    schedule.add_warning(
                        ScheduleWarning::info(WarningKind::NumericalNoise, format!("產量 {:e} 視為 0", quantity))
                            .with_line(line_id)
                            .with_slot(t)
                            .with_product(product_id),
                    );
                }
                quantity = 0.0;
            }

            if on {
                snapped.active.insert((p, l, t), quantity);
            } else if quantity > 0.0 {
                schedule.add_warning(
                    ScheduleWarning::error(WarningKind::ActivityMismatch, format!("未啟用卻有產量 {}", quantity))
                        .with_line(line_id)
                        .with_slot(t)
                        .with_product(product_id),
                );
            }
        }

        for (&(p, l, t, k), &var) in &built.vars.position {
            if value(var) >= 0.5 {
                snapped.position.insert((p, l, t), k);
            }
        }
        snapped
    }

    /// 時段內順序：有位置變數時依位置，否則延續上一時段的產品優先、指令順序次之、延續到下一時段的產品最後
    fn order_line(&self, line: &ResolvedLine, snapped: &Snapped) -> LinePlan {
        let l = line.index;
        let slots = self.registry.slot_count();
        let sequenced = line.is_enabled(ConstraintKind::Sequencing);
        let ranks = DirectiveRanks::new(self.registry, line);
        let mut plan: LinePlan = Vec::with_capacity(slots);

        for t in 0..slots {
            let mut products: Vec<(usize, f64)> = line
                .products()
                .filter_map(|p| snapped.active.get(&(p, l, t)).map(|q| (p, *q)))
                .collect();

            if sequenced {
                products.sort_by_key(|(p, _)| (snapped.position.get(&(*p, l, t)).copied().unwrap_or(usize::MAX), *p));
            } else {
                let previous_tail = t
                    .checked_sub(1)
                    .and_then(|prev| plan.get(prev))
                    .and_then(|slot| slot.last())
                    .map(|(p, _)| *p);
                products.sort_by_key(|(p, _)| {
                    let carry = if Some(*p) == previous_tail {
                        0
                    } else if t > 0 && snapped.is_active(*p, l, t - 1) {
                        1
                    } else {
                        2
                    };
                    let continues = snapped.is_active(*p, l, t + 1);
                    (carry, ranks.rank(*p), continues, *p)
                });
            }
            plan.push(products);
        }
        plan
    }

    /// 換線紀錄，計數方式與模型一致
    fn changeovers(&self, line: &ResolvedLine, plan: &LinePlan) -> Vec<ChangeoverRecord> {
        let sequence_aware = line.sequence_aware();
        let mut records = Vec::new();
        let mut previous: Option<usize> = None;
        let mut seen_busy = false;

        for (t, slot) in plan.iter().enumerate() {
            if slot.is_empty() {
                continue;
            }
            for (i, &(p, _)) in slot.iter().enumerate() {
                let counted = if sequence_aware {
                    // 第一位產品延續上一時段的最後一個產品時不算換線
                    let kept = i == 0
                        && t > 0
                        && plan[t - 1].last().map(|(last, _)| *last) == Some(p);
                    (i > 0 || seen_busy) && !kept
                } else {
                    let entering = t == 0 || !plan[t - 1].iter().any(|(q, _)| *q == p);
                    entering && (i > 0 || seen_busy)
                };

                if counted {
                    if let Some(from) = previous {
                        records.push(ChangeoverRecord {
                            line: line.id.clone(),
                            slot: t,
                            from: self.registry.products[from].id.clone(),
                            to: self.registry.products[p].id.clone(),
                            hours: line.changeover_hours(from, p),
                        });
                    }
                }
                previous = Some(p);
            }
            seen_busy = true;
        }
        records
    }

    fn line_schedule(
        &self,
        line: &ResolvedLine,
        plan: &LinePlan,
        schedule: &Schedule,
        capacity: &CapacityTable,
    ) -> LineSchedule {
        let mut line_schedule = LineSchedule::new(line.id.clone());
        let mut used = 0.0;

        for (t, slot) in plan.iter().enumerate() {
            for (position, &(p, quantity)) in slot.iter().enumerate() {
                let hours = line.rate(p).map_or(0.0, |rate| quantity / rate);
                used += hours;
                line_schedule.assignments.push(SlotAssignment {
                    slot: t,
                    slot_label: self.instance.slots[t].label.clone(),
                    position,
                    product: self.registry.products[p].id.clone(),
                    quantity: to_decimal(quantity),
                    hours,
                });
            }
        }

        used += schedule
            .changeovers
            .iter()
            .filter(|c| c.line == line.id)
            .map(|c| c.hours)
            .sum::<f64>();
        let available = capacity.line_total(line.index);
        line_schedule.utilization = if available > 0.0 { used / available } else { 0.0 };
        line_schedule
    }

    fn fulfillment(&self, schedule: &mut Schedule) {
        let epsilon = Decimal::new(1, 3);
        let mut produced: BTreeMap<&str, Decimal> = BTreeMap::new();
        for line in &schedule.lines {
            for assignment in &line.assignments {
                *produced.entry(assignment.product.as_str()).or_default() += assignment.quantity;
            }
        }

        let mut fulfillment = Vec::with_capacity(self.registry.products.len());
        let mut warnings = Vec::new();
        for (resolved, product) in self.registry.products.iter().zip(&self.instance.products) {
            let actual = produced.get(product.id.as_str()).copied().unwrap_or_default();
            let deviation = actual - product.target;
            let within_tolerance = deviation.abs() <= to_decimal(resolved.tolerance) + epsilon;

            if !within_tolerance {
                warnings.push(
                    ScheduleWarning::error(
                        WarningKind::VolumeOutOfBand,
                        format!("產量 {} 超出目標 {} 的容許範圍", actual, product.target),
                    )
                    .with_product(&product.id),
                );
            } else if deviation.abs() > epsilon {
                warnings.push(
                    ScheduleWarning::warning(
                        WarningKind::UnmetTarget,
                        format!("產量 {} 與目標 {} 相差 {}", actual, product.target, deviation),
                    )
                    .with_product(&product.id),
                );
            }

            fulfillment.push(Fulfillment {
                product: product.id.clone(),
                target: product.target,
                actual,
                deviation,
                within_tolerance,
            });
        }

        schedule.fulfillment = fulfillment;
        schedule.warnings.extend(warnings);
    }

    fn validate(&self, schedule: &mut Schedule, plans: &[LinePlan], capacity: &CapacityTable) {
        let mut changes: BTreeMap<(&str, usize), (usize, f64)> = BTreeMap::new();
        for record in &schedule.changeovers {
            let entry = changes.entry((record.line.as_str(), record.slot)).or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += record.hours;
        }

        let mut warnings = Vec::new();
        for line in &self.registry.lines {
            let plan = &plans[line.index];
            let per_slot: Vec<(usize, f64)> = (0..plan.len())
                .map(|t| changes.get(&(line.id.as_str(), t)).copied().unwrap_or((0, 0.0)))
                .collect();

            self.check_slots(line, plan, &per_slot, capacity, &mut warnings);
            self.check_blocks(line, plan, &mut warnings);
            if line.is_enabled(ConstraintKind::LineDirectives) {
                self.check_directives(line, plan, &mut warnings);
            }
        }

        let total = schedule.total_changeovers();
        if total > self.registry.global_changeover_cap as usize {
            warnings.push(ScheduleWarning::error(
                WarningKind::GlobalChangeoverCapExceeded,
                format!("換線 {} 次，超過全廠上限 {}", total, self.registry.global_changeover_cap),
            ));
        }

        schedule.warnings.extend(warnings);
    }

    /// 時段工時、共用時段與每時段換線上限
    fn check_slots(
        &self,
        line: &ResolvedLine,
        plan: &LinePlan,
        per_slot: &[(usize, f64)],
        capacity: &CapacityTable,
        warnings: &mut Vec<ScheduleWarning>,
    ) {
        let l = line.index;
        let params = &line.params;

        for (t, slot) in plan.iter().enumerate() {
            let available = capacity.hours(l, t);
            let (min_util, max_util) = line.utilization_bounds(t);
            let (changeovers, changeover_hours) = per_slot[t];
            let warn = |kind: WarningKind, message: String| {
                ScheduleWarning::error(kind, message).with_line(&line.id).with_slot(t)
            };

            if line.is_enabled(ConstraintKind::TimeCapacity) {
                let used: f64 = slot
                    .iter()
                    .map(|(p, q)| line.rate(*p).map_or(0.0, |rate| q / rate))
                    .sum::<f64>()
                    + changeover_hours;

                if used > max_util * available + CHECK_TOLERANCE {
                    warnings.push(warn(
                        WarningKind::CapacityExceeded,
                        format!("使用 {:.3} 小時，上限 {:.3}", used, max_util * available),
                    ));
                }
                if min_util > 0.0 && used < min_util * available - CHECK_TOLERANCE {
                    warnings.push(warn(
                        WarningKind::UtilizationBelowMinimum,
                        format!("使用 {:.3} 小時，下限 {:.3}", used, min_util * available),
                    ));
                }
            }

            if params.min_active_hours > 0.0 {
                for &(p, quantity) in slot {
                    let rate = line.rate(p).unwrap_or(0.0);
                    let floor = (rate * params.min_active_hours).min(rate * max_util * available);
                    if quantity < floor - CHECK_TOLERANCE {
                        warnings.push(
                            warn(
                                WarningKind::ActivityMismatch,
                                format!("產量 {:.3} 低於最短生產時數的下限 {:.3}", quantity, floor),
                            )
                            .with_product(&self.registry.products[p].id),
                        );
                    }
                }
            }

            if slot.len() > 1 {
                let allowed = line.is_enabled(ConstraintKind::MultiProductSlot) && slot.len() <= line.positions();
                if !allowed {
                    warnings.push(warn(
                        WarningKind::MultiProductViolation,
                        format!("時段內有 {} 個產品", slot.len()),
                    ));
                } else {
                    for &(p, quantity) in slot {
                        let product = &self.registry.products[p];
                        let threshold = product.minor_threshold(l);
                        let cap = line.rate(p).unwrap_or(0.0) * max_util * available;
                        if threshold < cap && quantity > threshold + CHECK_TOLERANCE {
                            warnings.push(
                                warn(
                                    WarningKind::MultiProductViolation,
                                    format!("共用時段產量 {:.3} 超過少量門檻 {:.3}", quantity, threshold),
                                )
                                .with_product(&product.id),
                            );
                        }
                    }
                }
            }

            if line.is_enabled(ConstraintKind::SlotChangeoverLimit)
                && changeovers > params.changeover_cap_per_slot as usize
            {
                warnings.push(warn(
                    WarningKind::SlotChangeoverCapExceeded,
                    format!("換線 {} 次，時段上限 {}", changeovers, params.changeover_cap_per_slot),
                ));
            }
        }
    }

    /// 單一連續區塊且長度不少於 N（到期末為止的區塊除外）
    fn check_blocks(&self, line: &ResolvedLine, plan: &LinePlan, warnings: &mut Vec<ScheduleWarning>) {
        if !line.is_enabled(ConstraintKind::BlockContinuity) {
            return;
        }
        let slots = plan.len();

        for p in line.products() {
            let product = &self.registry.products[p];
            let required = product.required_slots.get(&line.index).copied().unwrap_or(1);
            let runs = runs_of(plan, p);
            let warn = |kind: WarningKind, message: String| {
                ScheduleWarning::error(kind, message).with_line(&line.id).with_product(&product.id)
            };

            if runs.len() > 1 {
                warnings.push(warn(
                    WarningKind::BlockFragmented,
                    format!("生產分成 {} 個區塊", runs.len()),
                ));
            }
            for (start, end) in runs {
                let length = end - start + 1;
                if length < required && (end + 1 < slots || required > slots) {
                    warnings.push(
                        warn(
                            WarningKind::BlockTooShort,
                            format!("區塊長度 {}，至少需要 {}", length, required),
                        )
                        .with_slot(start),
                    );
                }
            }
        }
    }

    fn check_directives(&self, line: &ResolvedLine, plan: &LinePlan, warnings: &mut Vec<ScheduleWarning>) {
        let sequenced = line.is_enabled(ConstraintKind::Sequencing);
        let busy: Vec<usize> = (0..plan.len()).filter(|t| !plan[*t].is_empty()).collect();
        let contains = |t: usize, p: usize| plan[t].iter().any(|(q, _)| *q == p);
        let id = |p: usize| self.registry.products[p].id.as_str();
        let mut violated = |message: String| {
            warnings.push(ScheduleWarning::error(WarningKind::DirectiveViolated, message).with_line(&line.id));
        };

        for directive in &line.directives {
            if let (Some(product), Some(&first)) = (directive.start_product(), busy.first()) {
                if let Some(p) = self.registry.product_index(product) {
                    let ok = if sequenced {
                        plan[first].first().map(|(q, _)| *q) == Some(p)
                    } else {
                        contains(first, p)
                    };
                    if !ok {
                        violated(format!("第一個生產時段 {} 沒有以 {} 開始", first, product));
                    }
                }
            }
            if let (Some(product), Some(&last)) = (directive.last_product(), busy.last()) {
                if let Some(p) = self.registry.product_index(product) {
                    let ok = if sequenced {
                        plan[last].last().map(|(q, _)| *q) == Some(p)
                    } else {
                        contains(last, p)
                    };
                    if !ok {
                        violated(format!("最後一個生產時段 {} 沒有以 {} 結束", last, product));
                    }
                }
            }

            match directive {
                LineDirective::ProductOrder { products } => {
                    let indices: Vec<usize> = products.iter().filter_map(|id| self.registry.product_index(id)).collect();
                    for pair in indices.windows(2) {
                        let (a, b) = (pair[0], pair[1]);
                        let (Some(start_a), Some(start_b)) = (first_slot(plan, a), first_slot(plan, b)) else {
                            continue;
                        };
                        let out_of_order = start_b < start_a
                            || (sequenced
                                && (0..plan.len())
                                    .any(|t| contains(t, a) && contains(t, b) && position_in(plan, t, a) > position_in(plan, t, b)));
                        if out_of_order {
                            violated(format!("{} 應在 {} 之前開始", id(a), id(b)));
                        }
                    }
                }
                LineDirective::ForbiddenAdjacency { from, to, symmetric } => {
                    let (Some(a), Some(b)) = (self.registry.product_index(from), self.registry.product_index(to)) else {
                        continue;
                    };
                    let mut pairs = vec![(a, b)];
                    if *symmetric {
                        pairs.push((b, a));
                    }
                    for (a, b) in pairs {
                        if let Some(t) = adjacency_slot(plan, a, b, sequenced) {
                            violated(format!("時段 {} 出現 {} 緊接 {}", t, id(a), id(b)));
                        }
                    }
                }
                LineDirective::BlockSequence { blocks } => {
                    let mut cursor = 0;
                    for (product, length) in blocks {
                        let p = self.registry.product_index(product);
                        for t in cursor..(cursor + length).min(plan.len()) {
                            let only = plan[t].len() == 1 && Some(plan[t][0].0) == p;
                            if !only {
                                violated(format!("時段 {} 應只生產 {}", t, product));
                            }
                        }
                        cursor += length;
                    }
                }
                _ => {}
            }
        }
    }
}

/// 產品在產線上的連續生產區間 (起, 迄)
fn runs_of(plan: &LinePlan, p: usize) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut open: Option<usize> = None;
    for (t, slot) in plan.iter().enumerate() {
        let active = slot.iter().any(|(q, _)| *q == p);
        match (active, open) {
            (true, None) => open = Some(t),
            (false, Some(start)) => {
                runs.push((start, t - 1));
                open = None;
            }
            _ => {}
        }
    }
    if let Some(start) = open {
        runs.push((start, plan.len() - 1));
    }
    runs
}

fn first_slot(plan: &LinePlan, p: usize) -> Option<usize> {
    plan.iter().position(|slot| slot.iter().any(|(q, _)| *q == p))
}

fn position_in(plan: &LinePlan, t: usize, p: usize) -> usize {
    plan[t].iter().position(|(q, _)| *q == p).unwrap_or(usize::MAX)
}

/// 第一個出現 a 緊接 b 的時段
///
/// 依序模式比較實際生產順序；粗略模式下 b 在 a 生產中或 a 剛結束的時段開始即視為相鄰。
fn adjacency_slot(plan: &LinePlan, a: usize, b: usize, sequenced: bool) -> Option<usize> {
    let has = |t: usize, p: usize| plan[t].iter().any(|(q, _)| *q == p);

    for t in 0..plan.len() {
        if sequenced {
            let within = plan[t].windows(2).any(|w| w[0].0 == a && w[1].0 == b);
            let across = t > 0
                && plan[t - 1].last().map(|(q, _)| *q) == Some(a)
                && plan[t].first().map(|(q, _)| *q) == Some(b);
            if within || across {
                return Some(t);
            }
        } else {
            let b_starts = has(t, b) && (t == 0 || !has(t - 1, b));
            if b_starts && (has(t, a) || (t > 0 && has(t - 1, a))) {
                return Some(t);
            }
        }
    }
    None
}

/// 由產線指令推得的排序權重：首產品最前、末產品最後，其餘依產品順序指令
struct DirectiveRanks {
    start: BTreeSet<usize>,
    last: BTreeSet<usize>,
    order: BTreeMap<usize, usize>,
}

impl DirectiveRanks {
    fn new(registry: &ConstraintRegistry, line: &ResolvedLine) -> Self {
        let mut ranks = Self {
            start: BTreeSet::new(),
            last: BTreeSet::new(),
            order: BTreeMap::new(),
        };
        if !line.is_enabled(ConstraintKind::LineDirectives) {
            return ranks;
        }

        let index = |id: &String| registry.product_index(id);
        for directive in &line.directives {
            if let Some(p) = directive.start_product().and_then(index) {
                ranks.start.insert(p);
            }
            if let Some(p) = directive.last_product().and_then(index) {
                ranks.last.insert(p);
            }
            if let LineDirective::ProductOrder { products } = directive {
                for (rank, p) in products.iter().filter_map(index).enumerate() {
                    ranks.order.entry(p).or_insert(rank);
                }
            }
        }
        ranks
    }

    fn rank(&self, p: usize) -> (u8, usize) {
        let group = if self.start.contains(&p) {
            0
        } else if self.last.contains(&p) {
            2
        } else {
            1
        };
        (group, self.order.get(&p).copied().unwrap_or(0))
    }
}

fn to_decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).map(|d| d.round_dp(4)).unwrap_or_default()
}
