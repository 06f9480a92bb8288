//! 約束類型登錄表
//!
//! 將問題實例與配置解析成每條產線、每個產品的完整參數，
//! 供約束管理器一致地讀取。純資料，不建立任何模型變數。

use std::collections::{BTreeMap, BTreeSet};

use crate::config::OptimizerConfig;
use crate::instance::ProblemInstance;
use crate::rules::{ConstraintKind, LineDirective, LineParameters};
use crate::{Result, ScheduleError};

/// 解析後的產線
#[derive(Debug, Clone)]
pub struct ResolvedLine {
    pub index: usize,
    pub id: String,

    /// 合併覆寫後的參數
    pub params: LineParameters,

    /// 啟用的約束族
    pub enabled: BTreeSet<ConstraintKind>,

    pub directives: Vec<LineDirective>,

    /// 產品索引 → 產能（箱/小時），只含有效組合
    pub rates: BTreeMap<usize, f64>,

    /// (前產品, 後產品) → 換線工時，依產品類別套用換線規則
    pub changeover_table: BTreeMap<(usize, usize), f64>,

    /// 時段序號 → (最低, 最高) 稼動率，只含有覆寫的時段
    pub slot_utilization: BTreeMap<usize, (f64, f64)>,

    /// 準備時段（首時段）
    pub setup_slot: usize,

    /// 清潔時段（末時段）
    pub cleanup_slot: usize,
}

impl ResolvedLine {
    pub fn is_enabled(&self, kind: ConstraintKind) -> bool {
        !kind.is_line_local() || self.enabled.contains(&kind)
    }

    /// 有效產品索引（遞增）
    pub fn products(&self) -> impl Iterator<Item = usize> + '_ {
        self.rates.keys().copied()
    }

    pub fn rate(&self, product: usize) -> Option<f64> {
        self.rates.get(&product).copied()
    }

    pub fn is_valid(&self, product: usize) -> bool {
        self.rates.contains_key(&product)
    }

    /// 時段內順序位置數
    pub fn positions(&self) -> usize {
        self.params.max_products_per_slot.min(self.rates.len()).max(1)
    }

    /// 是否以時段內順序計算換線
    pub fn sequence_aware(&self) -> bool {
        self.is_enabled(ConstraintKind::Sequencing)
            && self.is_enabled(ConstraintKind::SequenceAwareChangeover)
    }

    /// 某時段的稼動率上下限
    pub fn utilization_bounds(&self, slot: usize) -> (f64, f64) {
        self.slot_utilization
            .get(&slot)
            .copied()
            .unwrap_or((self.params.min_utilization, self.params.max_utilization))
    }

    /// 是否有任一時段要求最低稼動率
    pub fn requires_utilization(&self) -> bool {
        (0..=self.cleanup_slot).any(|t| self.utilization_bounds(t).0 > 0.0)
    }

    /// 兩個產品之間的換線工時
    pub fn changeover_hours(&self, from: usize, to: usize) -> f64 {
        self.changeover_table
            .get(&(from, to))
            .copied()
            .unwrap_or(self.params.changeover_hours)
    }

    /// 此產線任一次換線可能花費的最長工時
    pub fn max_changeover_hours(&self) -> f64 {
        self.changeover_table
            .values()
            .copied()
            .fold(self.params.changeover_hours, f64::max)
    }

    /// 換線工時是否因產品配對而不同
    pub fn has_pair_hours(&self) -> bool {
        let max = self.max_changeover_hours();
        self.changeover_table.values().any(|h| (max - h).abs() > 1e-12)
    }

    /// 是否需要末生產時段旗標
    pub fn needs_last_busy(&self) -> bool {
        self.is_enabled(ConstraintKind::LineDirectives)
            && self.directives.iter().any(|d| d.last_product().is_some())
    }
}

/// 解析後的產品
#[derive(Debug, Clone)]
pub struct ResolvedProduct {
    pub index: usize,
    pub id: String,
    pub category: String,

    /// 目標產量（箱）
    pub target: f64,

    /// 容許偏差（箱）
    pub tolerance: f64,

    /// 少量生產門檻（箱）
    pub minor_threshold_boxes: BTreeMap<usize, f64>,

    /// 產線索引 → 最少連續時段數
    pub required_slots: BTreeMap<usize, usize>,
}

impl ResolvedProduct {
    /// 產量下限
    pub fn lower(&self) -> f64 {
        (self.target - self.tolerance).max(0.0)
    }

    /// 產量上限
    pub fn upper(&self) -> f64 {
        self.target + self.tolerance
    }

    pub fn lines(&self) -> impl Iterator<Item = usize> + '_ {
        self.required_slots.keys().copied()
    }

    pub fn minor_threshold(&self, line: usize) -> f64 {
        self.minor_threshold_boxes.get(&line).copied().unwrap_or(0.0)
    }
}

/// 約束類型登錄表
#[derive(Debug, Clone)]
pub struct ConstraintRegistry {
    pub products: Vec<ResolvedProduct>,
    pub lines: Vec<ResolvedLine>,

    /// 各時段原始工時
    pub slot_hours: Vec<f64>,

    /// 全廠換線上限
    pub global_changeover_cap: u32,
}

impl ConstraintRegistry {
    /// 驗證實例並解析所有參數
    pub fn build(instance: &ProblemInstance, config: &OptimizerConfig) -> Result<Self> {
        config.validate()?;
        validate_instance(instance)?;

        let slot_count = instance.slots.len();
        let max_hours = instance.max_slot_hours();
        let product_index: BTreeMap<&str, usize> = instance
            .products
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.as_str(), i))
            .collect();

        let mut lines = Vec::with_capacity(instance.lines.len());
        for (index, line) in instance.lines.iter().enumerate() {
            let params = config.defaults.merged(&line.rules.overrides);
            params.validate(&line.id)?;

            let mut rates = BTreeMap::new();
            for (product, rate) in &line.rates {
                let Some(&p) = product_index.get(product.as_str()) else {
                    return Err(ScheduleError::UnknownProduct {
                        line: line.id.clone(),
                        product: product.clone(),
                    });
                };
                if !rate.is_finite() || *rate < 0.0 {
                    return Err(ScheduleError::invalid(
                        format!("{}/{}", line.id, product),
                        format!("產能不可為負: {}", rate),
                    ));
                }
                let allowed = line
                    .rules
                    .overrides
                    .allowed_products
                    .as_ref()
                    .map_or(true, |set| set.contains(product));
                if *rate > 0.0 && allowed {
                    rates.insert(p, *rate);
                }
            }

            let mut changeover_table = BTreeMap::new();
            if !params.changeover_rules.is_empty() {
                for &from in rates.keys() {
                    for &to in rates.keys() {
                        let hours = params.changeover_hours_between(
                            &instance.products[from].category,
                            &instance.products[to].category,
                        );
                        changeover_table.insert((from, to), hours);
                    }
                }
            }

            let mut slot_utilization = BTreeMap::new();
            for (&slot, bounds) in &line.rules.overrides.slot_utilization {
                let entity = format!("{}/slot {}", line.id, slot);
                if slot >= slot_count {
                    return Err(ScheduleError::invalid(entity, format!("時段序號超出範圍（共 {} 個時段）", slot_count)));
                }
                let min = bounds.min.unwrap_or(params.min_utilization);
                let max = bounds.max.unwrap_or(params.max_utilization);
                if !(0.0..=1.0).contains(&min) || !(0.0..=1.0).contains(&max) || min > max {
                    return Err(ScheduleError::invalid(entity, format!("稼動率範圍無效: [{}, {}]", min, max)));
                }
                slot_utilization.insert(slot, (min, max));
            }

            let resolved = ResolvedLine {
                index,
                id: line.id.clone(),
                params,
                enabled: line.rules.enabled.clone(),
                directives: line.rules.directives.clone(),
                rates,
                changeover_table,
                slot_utilization,
                setup_slot: 0,
                cleanup_slot: slot_count - 1,
            };
            validate_directives(&resolved, &product_index, slot_count)?;
            lines.push(resolved);
        }

        let mut products = Vec::with_capacity(instance.products.len());
        for (index, product) in instance.products.iter().enumerate() {
            let target = product.target_boxes();
            let fraction = config
                .category_minor_thresholds
                .get(&product.category)
                .copied();

            let mut required_slots = BTreeMap::new();
            let mut minor_threshold_boxes = BTreeMap::new();
            for line in &lines {
                if let Some(rate) = line.rate(index) {
                    required_slots.insert(line.index, required_slot_count(target, rate, max_hours));
                    let share = fraction.unwrap_or(line.params.minor_threshold);
                    minor_threshold_boxes.insert(line.index, share * target);
                }
            }

            products.push(ResolvedProduct {
                index,
                id: product.id.clone(),
                category: product.category.clone(),
                target,
                tolerance: config.volume_tolerance * target,
                minor_threshold_boxes,
                required_slots,
            });
        }

        tracing::debug!(
            "登錄表建立完成：產品 {} 個，產線 {} 條，時段 {} 個",
            products.len(),
            lines.len(),
            slot_count
        );

        Ok(Self {
            products,
            lines,
            slot_hours: instance.slots.iter().map(|s| s.hours).collect(),
            global_changeover_cap: config.global_changeover_cap,
        })
    }

    pub fn slot_count(&self) -> usize {
        self.slot_hours.len()
    }

    pub fn product_index(&self, id: &str) -> Option<usize> {
        self.products.iter().position(|p| p.id == id)
    }

    pub fn line_index(&self, id: &str) -> Option<usize> {
        self.lines.iter().position(|l| l.id == id)
    }

    /// 所有有效的（產品, 產線）組合
    pub fn valid_pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.lines
            .iter()
            .flat_map(|line| line.products().map(move |p| (p, line.index)))
    }

    /// 每個產品恰有一條有效產線時，各產線之間除全廠上限外互不相關
    pub fn is_line_separable(&self) -> bool {
        self.products
            .iter()
            .all(|p| p.required_slots.len() == 1 || (p.required_slots.is_empty() && p.target <= 0.0))
    }
}

/// 最少連續時段數 N = max(1, ceil(目標 / (產能 × 最長時段工時)))
pub fn required_slot_count(target: f64, rate: f64, max_slot_hours: f64) -> usize {
    let per_slot = rate * max_slot_hours;
    if per_slot <= 0.0 || target <= 0.0 {
        return 1;
    }
    ((target / per_slot) - 1e-9).ceil().max(1.0) as usize
}

fn validate_instance(instance: &ProblemInstance) -> Result<()> {
    if instance.slots.is_empty() {
        return Err(ScheduleError::EmptyHorizon);
    }
    for (position, slot) in instance.slots.iter().enumerate() {
        if slot.index != position {
            return Err(ScheduleError::invalid(
                format!("slot {}", slot.label),
                format!("時段序號 {} 與位置 {} 不符", slot.index, position),
            ));
        }
        if !slot.hours.is_finite() || slot.hours <= 0.0 {
            return Err(ScheduleError::invalid(
                format!("slot {}", slot.label),
                format!("時段工時需為正數: {}", slot.hours),
            ));
        }
    }

    let mut seen = BTreeSet::new();
    for product in &instance.products {
        if !seen.insert(product.id.as_str()) {
            return Err(ScheduleError::DuplicateId(product.id.clone()));
        }
        if product.target < rust_decimal::Decimal::ZERO {
            return Err(ScheduleError::invalid(
                &product.id,
                format!("目標產量不可為負: {}", product.target),
            ));
        }
    }

    let mut seen = BTreeSet::new();
    for line in &instance.lines {
        if !seen.insert(line.id.as_str()) {
            return Err(ScheduleError::DuplicateId(line.id.clone()));
        }
    }
    Ok(())
}

fn validate_directives(
    line: &ResolvedLine,
    product_index: &BTreeMap<&str, usize>,
    slot_count: usize,
) -> Result<()> {
    if line.is_enabled(ConstraintKind::SequenceAwareChangeover)
        && !line.is_enabled(ConstraintKind::Sequencing)
    {
        return Err(ScheduleError::invalid(
            &line.id,
            "sequence_aware_changeover 需要同時啟用 sequencing",
        ));
    }

    for directive in &line.directives {
        for product in directive.products() {
            let Some(&p) = product_index.get(product.as_str()) else {
                return Err(ScheduleError::UnknownProduct {
                    line: line.id.clone(),
                    product: product.clone(),
                });
            };
            if !line.is_valid(p) {
                return Err(ScheduleError::invalid(
                    format!("{}/{}", line.id, product),
                    "指令引用的產品無法在此產線生產",
                ));
            }
        }

        match directive {
            LineDirective::BlockSequence { blocks } => {
                let required: usize = blocks.iter().map(|(_, n)| *n).sum();
                if required > slot_count {
                    return Err(ScheduleError::BlockSequenceOverflow {
                        line: line.id.clone(),
                        required,
                        available: slot_count,
                    });
                }
            }
            LineDirective::ProductOrder { .. } | LineDirective::ForbiddenAdjacency { .. }
                if !line.is_enabled(ConstraintKind::BlockContinuity) =>
            {
                return Err(ScheduleError::invalid(
                    &line.id,
                    "產品順序與禁止相鄰指令需要啟用 block_continuity",
                ));
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{Line, Product, TimeSlot};
    use crate::rules::{ChangeoverRule, LineOverrides, LineRuleSet, SlotUtilization};
    use proptest::prelude::*;
    use rstest::rstest;
    use rust_decimal::Decimal;

    fn instance() -> ProblemInstance {
        ProblemInstance::new()
            .with_product(Product::new("A", Decimal::from(60)).with_category("cup"))
            .with_product(Product::new("B", Decimal::from(40)))
            .with_line(Line::new("L1").with_rate("A", 10.0).with_rate("B", 10.0))
            .with_line(Line::new("L2").with_rate("B", 0.0))
            .with_slots(TimeSlot::uniform(10, 1.0))
    }

    #[test]
    fn test_build_registry() {
        let registry = ConstraintRegistry::build(&instance(), &OptimizerConfig::default()).unwrap();

        assert_eq!(registry.slot_count(), 10);
        assert_eq!(registry.global_changeover_cap, 5);
        // 產能為 0 的組合不建立
        assert_eq!(registry.valid_pairs().count(), 2);
        assert_eq!(registry.products[0].required_slots.get(&0), Some(&6));
        assert_eq!(registry.products[1].required_slots.get(&0), Some(&4));
        assert!(registry.is_line_separable());
    }

    #[test]
    fn test_category_threshold_overrides_line_default() {
        let config = OptimizerConfig::default().with_category_threshold("cup", 0.5);
        let registry = ConstraintRegistry::build(&instance(), &config).unwrap();

        assert_eq!(registry.products[0].minor_threshold(0), 30.0);
        assert_eq!(registry.products[1].minor_threshold(0), 8.0);
    }

    #[test]
    fn test_allowed_products_subset() {
        let rules = LineRuleSet::default().with_overrides(LineOverrides {
            allowed_products: Some(["A".to_string()].into_iter().collect()),
            ..Default::default()
        });
        let mut instance = instance();
        instance.lines[0].rules = rules;

        let registry = ConstraintRegistry::build(&instance, &OptimizerConfig::default()).unwrap();
        assert!(registry.lines[0].is_valid(0));
        assert!(!registry.lines[0].is_valid(1));
    }

    #[test]
    fn test_tolerance_band() {
        let config = OptimizerConfig::default().with_volume_tolerance(0.1);
        let registry = ConstraintRegistry::build(&instance(), &config).unwrap();
        let a = &registry.products[0];
        assert!((a.lower() - 54.0).abs() < 1e-9);
        assert!((a.upper() - 66.0).abs() < 1e-9);
    }

    #[rstest]
    #[case(100.0, 10.0, 1.0, 10)]
    #[case(60.0, 10.0, 1.0, 6)]
    #[case(61.0, 10.0, 1.0, 7)]
    #[case(5.0, 10.0, 1.0, 1)]
    #[case(0.0, 10.0, 1.0, 1)]
    fn test_required_slot_count(
        #[case] target: f64,
        #[case] rate: f64,
        #[case] hours: f64,
        #[case] expected: usize,
    ) {
        assert_eq!(required_slot_count(target, rate, hours), expected);
    }

    #[test]
    fn test_changeover_table_by_category() {
        let rules = LineRuleSet::default().with_overrides(LineOverrides {
            changeover_hours: Some(0.4),
            changeover_rules: Some(vec![ChangeoverRule::new("cup", "", 1.2)]),
            ..Default::default()
        });
        let mut instance = instance();
        instance.lines[0].rules = rules;

        let registry = ConstraintRegistry::build(&instance, &OptimizerConfig::default()).unwrap();
        let line = &registry.lines[0];
        // A 為 cup，B 沒有類別
        assert_eq!(line.changeover_hours(0, 1), 1.2);
        assert_eq!(line.changeover_hours(1, 0), 0.4);
        assert_eq!(line.max_changeover_hours(), 1.2);
        assert!(line.has_pair_hours());

        // 沒有規則時不建表，一律使用單一工時
        let plain = &ConstraintRegistry::build(&self::instance(), &OptimizerConfig::default()).unwrap().lines[0];
        assert!(plain.changeover_table.is_empty());
        assert!(!plain.has_pair_hours());
    }

    #[test]
    fn test_slot_utilization_override() {
        let mut slot_utilization = BTreeMap::new();
        slot_utilization.insert(2, SlotUtilization::at_most(0.5));
        slot_utilization.insert(4, SlotUtilization { min: Some(0.3), max: None });
        let mut instance = instance();
        instance.lines[0].rules = LineRuleSet::default().with_overrides(LineOverrides {
            max_utilization: Some(0.9),
            slot_utilization,
            ..Default::default()
        });

        let registry = ConstraintRegistry::build(&instance, &OptimizerConfig::default()).unwrap();
        let line = &registry.lines[0];
        assert_eq!(line.utilization_bounds(0), (0.0, 0.9));
        assert_eq!(line.utilization_bounds(2), (0.0, 0.5));
        assert_eq!(line.utilization_bounds(4), (0.3, 0.9));
        assert!(line.requires_utilization());
        assert!(!registry.lines[1].requires_utilization());
    }

    #[rstest]
    #[case(12, SlotUtilization::at_most(0.5))]
    #[case(1, SlotUtilization::new(0.8, 0.4))]
    #[case(1, SlotUtilization::at_most(1.5))]
    fn test_invalid_slot_utilization(#[case] slot: usize, #[case] bounds: SlotUtilization) {
        let mut instance = instance();
        instance.lines[0].rules = LineRuleSet::default().with_overrides(LineOverrides {
            slot_utilization: [(slot, bounds)].into_iter().collect(),
            ..Default::default()
        });
        let result = ConstraintRegistry::build(&instance, &OptimizerConfig::default());
        assert!(matches!(result, Err(ScheduleError::InvalidParameter { .. })));
    }

    #[test]
    fn test_empty_horizon() {
        let instance = instance().with_slots(Vec::new());
        let result = ConstraintRegistry::build(&instance, &OptimizerConfig::default());
        assert!(matches!(result, Err(ScheduleError::EmptyHorizon)));
    }

    #[test]
    fn test_unknown_product_in_rates() {
        let instance = instance().with_line(Line::new("L3").with_rate("Z", 5.0));
        let result = ConstraintRegistry::build(&instance, &OptimizerConfig::default());
        assert!(matches!(result, Err(ScheduleError::UnknownProduct { .. })));
    }

    #[test]
    fn test_block_sequence_overflow() {
        let mut instance = instance();
        instance.lines[0].rules = LineRuleSet::default().with_directive(LineDirective::BlockSequence {
            blocks: vec![("A".to_string(), 6), ("B".to_string(), 5)],
        });
        let result = ConstraintRegistry::build(&instance, &OptimizerConfig::default());
        assert!(matches!(
            result,
            Err(ScheduleError::BlockSequenceOverflow { required: 11, available: 10, .. })
        ));
    }

    #[test]
    fn test_duplicate_product() {
        let instance = instance().with_product(Product::new("A", Decimal::from(1)));
        let result = ConstraintRegistry::build(&instance, &OptimizerConfig::default());
        assert!(matches!(result, Err(ScheduleError::DuplicateId(id)) if id == "A"));
    }

    proptest! {
        #[test]
        fn prop_required_slot_count_is_monotonic(
            target in 0.0f64..5000.0,
            extra in 0.0f64..500.0,
            rate in 0.1f64..100.0,
            hours in 0.5f64..12.0,
        ) {
            let n = required_slot_count(target, rate, hours);
            prop_assert!(n >= 1);
            prop_assert!(required_slot_count(target + extra, rate, hours) >= n);
            // N 個最長時段足以生產目標量
            prop_assert!(n as f64 * rate * hours >= target - 1e-5);
        }

        #[test]
        fn prop_tolerance_scales_with_target(target in 1i64..10_000, tolerance in 0.0f64..0.5) {
            let instance = ProblemInstance::new()
                .with_product(Product::new("A", Decimal::from(target)))
                .with_line(Line::new("L1").with_rate("A", 10.0))
                .with_slots(TimeSlot::uniform(4, 8.0));
            let config = OptimizerConfig::default().with_volume_tolerance(tolerance);
            let registry = ConstraintRegistry::build(&instance, &config).unwrap();

            let product = &registry.products[0];
            prop_assert!((product.tolerance - tolerance * target as f64).abs() < 1e-6);
            prop_assert!(product.lower() <= product.upper());
        }
    }
}
