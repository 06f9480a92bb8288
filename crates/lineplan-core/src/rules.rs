//! 約束類型與產線規則設定

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::instance::ProductId;

/// 約束族類型
///
/// 宣告順序即為建模順序：準備/清潔必須先於時間產能，
/// 區塊起點變數必須先於區塊連續性。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    /// 首時段準備、末時段清潔（扣減可用工時）
    SetupCleanup,
    /// 產量達標（等式或容許帶）
    ProductionVolume,
    /// 時段工時上下限
    TimeCapacity,
    /// 單一連續區塊與最短長度
    BlockContinuity,
    /// 少量產品共用時段
    MultiProductSlot,
    /// 時段內生產順序
    Sequencing,
    /// 每時段換線次數上限
    SlotChangeoverLimit,
    /// 以時段內順序計算換線
    SequenceAwareChangeover,
    /// 全廠換線總數上限
    GlobalChangeoverCap,
    /// 產線指令（首/末產品、順序、禁止相鄰、固定區塊）
    LineDirectives,
}

impl ConstraintKind {
    pub const ALL: [ConstraintKind; 10] = [
        ConstraintKind::SetupCleanup,
        ConstraintKind::ProductionVolume,
        ConstraintKind::TimeCapacity,
        ConstraintKind::BlockContinuity,
        ConstraintKind::MultiProductSlot,
        ConstraintKind::Sequencing,
        ConstraintKind::SlotChangeoverLimit,
        ConstraintKind::SequenceAwareChangeover,
        ConstraintKind::GlobalChangeoverCap,
        ConstraintKind::LineDirectives,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ConstraintKind::SetupCleanup => "setup_cleanup",
            ConstraintKind::ProductionVolume => "production_volume",
            ConstraintKind::TimeCapacity => "time_capacity",
            ConstraintKind::BlockContinuity => "block_continuity",
            ConstraintKind::MultiProductSlot => "multi_product_slot",
            ConstraintKind::Sequencing => "sequencing",
            ConstraintKind::SlotChangeoverLimit => "slot_changeover_limit",
            ConstraintKind::SequenceAwareChangeover => "sequence_aware_changeover",
            ConstraintKind::GlobalChangeoverCap => "global_changeover_cap",
            ConstraintKind::LineDirectives => "line_directives",
        }
    }

    /// 是否可依產線個別開關
    ///
    /// 產量與全廠上限跨產線，不受產線規則影響。
    pub fn is_line_local(&self) -> bool {
        !matches!(
            self,
            ConstraintKind::ProductionVolume | ConstraintKind::GlobalChangeoverCap
        )
    }

    /// 產線預設啟用的約束族（順序相關的兩族需明確開啟）
    pub fn default_line_set() -> BTreeSet<ConstraintKind> {
        Self::ALL
            .iter()
            .copied()
            .filter(|k| {
                !matches!(
                    k,
                    ConstraintKind::Sequencing | ConstraintKind::SequenceAwareChangeover
                )
            })
            .collect()
    }
}

impl std::fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// 產線參數（全廠預設值，可被產線覆寫）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineParameters {
    /// 最低稼動率（0 表示允許閒置）
    pub min_utilization: f64,

    /// 最高稼動率
    pub max_utilization: f64,

    /// 每時段換線上限
    pub changeover_cap_per_slot: u32,

    /// 每時段最多產品數
    pub max_products_per_slot: usize,

    /// 少量生產門檻（佔目標產量比例）
    pub minor_threshold: f64,

    /// 首時段準備工時
    pub setup_hours: f64,

    /// 末時段清潔工時
    pub cleanup_hours: f64,

    /// 每次換線工時（沒有符合的類別規則時使用）
    pub changeover_hours: f64,

    /// 類別配對換線工時，依序比對，第一條符合者生效
    pub changeover_rules: Vec<ChangeoverRule>,

    /// 啟動生產的最短工時
    pub min_active_hours: f64,
}

impl Default for LineParameters {
    fn default() -> Self {
        Self {
            min_utilization: 0.0,
            max_utilization: 1.0,
            changeover_cap_per_slot: 1,
            max_products_per_slot: 3,
            minor_threshold: 0.2,
            setup_hours: 0.0,
            cleanup_hours: 0.0,
            changeover_hours: 0.0,
            changeover_rules: Vec::new(),
            min_active_hours: 0.0,
        }
    }
}

impl LineParameters {
    /// 工廠預設：清潔 2.5 小時、換線 0.6 小時
    pub fn plant_defaults() -> Self {
        Self {
            cleanup_hours: 2.5,
            changeover_hours: 0.6,
            ..Self::default()
        }
    }

    /// 套用產線覆寫
    pub fn merged(&self, overrides: &LineOverrides) -> Self {
        Self {
            min_utilization: overrides.min_utilization.unwrap_or(self.min_utilization),
            max_utilization: overrides.max_utilization.unwrap_or(self.max_utilization),
            changeover_cap_per_slot: overrides
                .changeover_cap_per_slot
                .unwrap_or(self.changeover_cap_per_slot),
            max_products_per_slot: overrides
                .max_products_per_slot
                .unwrap_or(self.max_products_per_slot),
            minor_threshold: overrides.minor_threshold.unwrap_or(self.minor_threshold),
            setup_hours: overrides.setup_hours.unwrap_or(self.setup_hours),
            cleanup_hours: overrides.cleanup_hours.unwrap_or(self.cleanup_hours),
            changeover_hours: overrides.changeover_hours.unwrap_or(self.changeover_hours),
            changeover_rules: overrides
                .changeover_rules
                .clone()
                .unwrap_or_else(|| self.changeover_rules.clone()),
            min_active_hours: overrides.min_active_hours.unwrap_or(self.min_active_hours),
        }
    }

    /// 檢查參數範圍
    pub fn validate(&self, entity: &str) -> crate::Result<()> {
        let err = |message: String| Err(crate::ScheduleError::invalid(entity, message));

        if !(0.0..=1.0).contains(&self.min_utilization)
            || !(0.0..=1.0).contains(&self.max_utilization)
        {
            return err(format!(
                "稼動率需介於 0 與 1: [{}, {}]",
                self.min_utilization, self.max_utilization
            ));
        }
        if self.min_utilization > self.max_utilization {
            return err(format!(
                "最低稼動率 {} 大於最高稼動率 {}",
                self.min_utilization, self.max_utilization
            ));
        }
        if self.max_products_per_slot == 0 {
            return err("每時段最多產品數需至少為 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.minor_threshold) {
            return err(format!("少量生產門檻需介於 0 與 1: {}", self.minor_threshold));
        }
        for (name, hours) in [
            ("setup_hours", self.setup_hours),
            ("cleanup_hours", self.cleanup_hours),
            ("changeover_hours", self.changeover_hours),
            ("min_active_hours", self.min_active_hours),
        ] {
            if !hours.is_finite() || hours < 0.0 {
                return err(format!("{} 不可為負: {}", name, hours));
            }
        }
        if let Some(rule) = self
            .changeover_rules
            .iter()
            .find(|r| !r.hours.is_finite() || r.hours < 0.0)
        {
            return err(format!("換線規則 {} 的工時無效: {}", rule, rule.hours));
        }
        Ok(())
    }

    /// 兩個類別之間的換線工時
    pub fn changeover_hours_between(&self, from: &str, to: &str) -> f64 {
        self.changeover_rules
            .iter()
            .find(|rule| rule.matches(from, to))
            .map_or(self.changeover_hours, |rule| rule.hours)
    }
}

/// 類別配對換線規則（未指定的一端符合任何類別）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeoverRule {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    pub hours: f64,
}

impl ChangeoverRule {
    pub fn new(from: impl Into<String>, to: impl Into<String>, hours: f64) -> Self {
        Self {
            from: Some(from.into()),
            to: Some(to.into()),
            hours,
        }
    }

    /// 從任何類別換到 `to`
    pub fn into_category(to: impl Into<String>, hours: f64) -> Self {
        Self {
            from: None,
            to: Some(to.into()),
            hours,
        }
    }

    pub fn matches(&self, from: &str, to: &str) -> bool {
        self.from.as_deref().map_or(true, |c| c == from) && self.to.as_deref().map_or(true, |c| c == to)
    }
}

impl std::fmt::Display for ChangeoverRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} → {}",
            self.from.as_deref().unwrap_or("*"),
            self.to.as_deref().unwrap_or("*")
        )
    }
}

/// 產線參數覆寫
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineOverrides {
    pub min_utilization: Option<f64>,
    pub max_utilization: Option<f64>,
    pub changeover_cap_per_slot: Option<u32>,
    pub max_products_per_slot: Option<usize>,
    pub minor_threshold: Option<f64>,
    pub setup_hours: Option<f64>,
    pub cleanup_hours: Option<f64>,
    pub changeover_hours: Option<f64>,
    pub changeover_rules: Option<Vec<ChangeoverRule>>,
    pub min_active_hours: Option<f64>,

    /// 允許生產的產品子集（None 表示不限）
    pub allowed_products: Option<BTreeSet<ProductId>>,

    /// 時段序號 → 該時段的稼動率上下限
    pub slot_utilization: BTreeMap<usize, SlotUtilization>,
}

/// 單一時段的稼動率覆寫，未指定的一端沿用產線設定
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotUtilization {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl SlotUtilization {
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    /// 只限制上限（例如保養時段）
    pub fn at_most(max: f64) -> Self {
        Self {
            min: None,
            max: Some(max),
        }
    }
}

/// 產線指令
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LineDirective {
    /// 指定產線第一個生產的產品
    StartProduct { product: ProductId },

    /// 指定產線最後一個生產的產品
    LastProduct { product: ProductId },

    /// 同時指定首尾產品
    StartEndProduct { start: ProductId, end: ProductId },

    /// 列出的產品依序開始生產
    ProductOrder { products: Vec<ProductId> },

    /// `from` 之後不可緊接 `to`
    ForbiddenAdjacency {
        from: ProductId,
        to: ProductId,
        #[serde(default)]
        symmetric: bool,
    },

    /// 從第一個時段起固定的區塊配置（產品, 時段數）
    BlockSequence { blocks: Vec<(ProductId, usize)> },
}

impl LineDirective {
    /// 指令引用的所有產品
    pub fn products(&self) -> Vec<&ProductId> {
        match self {
            LineDirective::StartProduct { product } | LineDirective::LastProduct { product } => {
                vec![product]
            }
            LineDirective::StartEndProduct { start, end } => vec![start, end],
            LineDirective::ProductOrder { products } => products.iter().collect(),
            LineDirective::ForbiddenAdjacency { from, to, .. } => vec![from, to],
            LineDirective::BlockSequence { blocks } => blocks.iter().map(|(p, _)| p).collect(),
        }
    }

    /// 指定的首產品
    pub fn start_product(&self) -> Option<&ProductId> {
        match self {
            LineDirective::StartProduct { product } => Some(product),
            LineDirective::StartEndProduct { start, .. } => Some(start),
            _ => None,
        }
    }

    /// 指定的末產品
    pub fn last_product(&self) -> Option<&ProductId> {
        match self {
            LineDirective::LastProduct { product } => Some(product),
            LineDirective::StartEndProduct { end, .. } => Some(end),
            _ => None,
        }
    }
}

/// 產線規則集：啟用的約束族 + 參數覆寫 + 指令
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineRuleSet {
    pub enabled: BTreeSet<ConstraintKind>,
    pub overrides: LineOverrides,
    pub directives: Vec<LineDirective>,
}

impl Default for LineRuleSet {
    fn default() -> Self {
        Self {
            enabled: ConstraintKind::default_line_set(),
            overrides: LineOverrides::default(),
            directives: Vec::new(),
        }
    }
}

impl LineRuleSet {
    /// 建構器模式：啟用約束族
    pub fn enable(mut self, kind: ConstraintKind) -> Self {
        self.enabled.insert(kind);
        self
    }

    /// 建構器模式：停用約束族
    pub fn disable(mut self, kind: ConstraintKind) -> Self {
        self.enabled.remove(&kind);
        self
    }

    /// 建構器模式：開啟時段內排序與依序換線計算
    pub fn with_sequencing(self) -> Self {
        self.enable(ConstraintKind::Sequencing)
            .enable(ConstraintKind::SequenceAwareChangeover)
    }

    /// 建構器模式：設置參數覆寫
    pub fn with_overrides(mut self, overrides: LineOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// 建構器模式：加入指令
    pub fn with_directive(mut self, directive: LineDirective) -> Self {
        self.directives.push(directive);
        self
    }

    pub fn is_enabled(&self, kind: ConstraintKind) -> bool {
        !kind.is_line_local() || self.enabled.contains(&kind)
    }
}
