//! 最佳化配置

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::rules::LineParameters;

/// 全廠換線總數預設上限
pub const DEFAULT_GLOBAL_CHANGEOVER_CAP: u32 = 5;

/// 目標項權重：名稱 → 權重
///
/// 新增目標項時只需在此登錄權重並註冊對應的建構函式。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectiveWeights(BTreeMap<String, f64>);

impl ObjectiveWeights {
    pub const TARGET_DEVIATION: &'static str = "target_deviation";
    pub const CHANGEOVER_COUNT: &'static str = "changeover_count";
    pub const CHANGEOVER_TIME: &'static str = "changeover_time";
    pub const UTILIZATION_IMBALANCE: &'static str = "utilization_imbalance";

    /// 空權重表
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    /// 查詢權重，未登錄者為 0
    pub fn get(&self, term: &str) -> f64 {
        self.0.get(term).copied().unwrap_or(0.0)
    }

    pub fn contains(&self, term: &str) -> bool {
        self.0.contains_key(term)
    }

    pub fn set(&mut self, term: impl Into<String>, weight: f64) {
        self.0.insert(term.into(), weight);
    }

    /// 建構器模式：設置權重
    pub fn with(mut self, term: impl Into<String>, weight: f64) -> Self {
        self.set(term, weight);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.0.iter()
    }
}

/// 預設權重含 `utilization_imbalance = 1`，因此預設一律整體求解；
/// 要依產線拆分須將該權重設為 0。
impl Default for ObjectiveWeights {
    fn default() -> Self {
        Self::empty()
            .with(Self::TARGET_DEVIATION, 100.0)
            .with(Self::CHANGEOVER_COUNT, 5.0)
            .with(Self::CHANGEOVER_TIME, 5.0)
            .with(Self::UTILIZATION_IMBALANCE, 1.0)
    }
}

/// 最佳化配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// 全廠換線總數上限
    pub global_changeover_cap: u32,

    /// 目標項權重
    pub weights: ObjectiveWeights,

    /// 產量容許偏差（佔目標比例，0 表示必須精確達標）
    pub volume_tolerance: f64,

    /// 求解時間上限（秒）
    pub time_limit_secs: f64,

    /// 相對最佳性差距
    pub relative_gap: f64,

    /// 分支定界節點上限（None 表示只受時間限制）
    pub node_limit: Option<u64>,

    /// 是否允許依產線拆分平行求解
    ///
    /// 僅在目標可分離時生效：`utilization_imbalance` 權重非 0（預設為 1）
    /// 會跨產線耦合，此時一律整體求解。
    pub decompose_lines: bool,

    /// 解碼時的數值容差
    pub snap_tolerance: f64,

    /// 產線參數預設值
    pub defaults: LineParameters,

    /// 類別 → 少量生產門檻
    pub category_minor_thresholds: BTreeMap<String, f64>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            global_changeover_cap: DEFAULT_GLOBAL_CHANGEOVER_CAP,
            weights: ObjectiveWeights::default(),
            volume_tolerance: 0.0,
            time_limit_secs: 60.0,
            relative_gap: 0.0,
            node_limit: None,
            decompose_lines: true,
            snap_tolerance: 1e-6,
            defaults: LineParameters::default(),
            category_minor_thresholds: BTreeMap::new(),
        }
    }
}

impl OptimizerConfig {
    /// 創建預設配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 從 JSON 載入，缺少的欄位使用預設值
    pub fn from_json_str(json: &str) -> crate::Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// 建構器模式：設置全廠換線上限
    pub fn with_global_changeover_cap(mut self, cap: u32) -> Self {
        self.global_changeover_cap = cap;
        self
    }

    /// 建構器模式：設置權重
    pub fn with_weight(mut self, term: impl Into<String>, weight: f64) -> Self {
        self.weights.set(term, weight);
        self
    }

    /// 建構器模式：設置產量容許偏差
    pub fn with_volume_tolerance(mut self, tolerance: f64) -> Self {
        self.volume_tolerance = tolerance;
        self
    }

    /// 建構器模式：設置求解時間上限
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit_secs = limit.as_secs_f64();
        self
    }

    /// 建構器模式：設置相對最佳性差距
    pub fn with_relative_gap(mut self, gap: f64) -> Self {
        self.relative_gap = gap;
        self
    }

    /// 建構器模式：設置分支定界節點上限
    pub fn with_node_limit(mut self, limit: u64) -> Self {
        self.node_limit = Some(limit);
        self
    }

    /// 建構器模式：是否拆分產線
    pub fn with_decomposition(mut self, enabled: bool) -> Self {
        self.decompose_lines = enabled;
        self
    }

    /// 建構器模式：設置產線預設參數
    pub fn with_defaults(mut self, defaults: LineParameters) -> Self {
        self.defaults = defaults;
        self
    }

    /// 建構器模式：設置類別少量生產門檻
    pub fn with_category_threshold(mut self, category: impl Into<String>, fraction: f64) -> Self {
        self.category_minor_thresholds.insert(category.into(), fraction);
        self
    }

    pub fn time_limit(&self) -> Duration {
        Duration::from_secs_f64(self.time_limit_secs.max(0.0))
    }

    /// 檢查配置
    pub fn validate(&self) -> crate::Result<()> {
        let err = |message: String| Err(crate::ScheduleError::invalid("config", message));

        if !(0.0..=1.0).contains(&self.volume_tolerance) {
            return err(format!("產量容許偏差需介於 0 與 1: {}", self.volume_tolerance));
        }
        if !self.time_limit_secs.is_finite() || self.time_limit_secs <= 0.0 {
            return err(format!("求解時間上限需為正數: {}", self.time_limit_secs));
        }
        if self.relative_gap < 0.0 {
            return err(format!("最佳性差距不可為負: {}", self.relative_gap));
        }
        if let Some((term, weight)) = self.weights.iter().find(|(_, w)| !w.is_finite() || **w < 0.0) {
            return err(format!("目標權重 {} 無效: {}", term, weight));
        }
        if let Some((category, fraction)) = self
            .category_minor_thresholds
            .iter()
            .find(|(_, f)| !(0.0..=1.0).contains(*f))
        {
            return err(format!("類別 {} 的少量生產門檻無效: {}", category, fraction));
        }
        self.defaults.validate("config.defaults")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OptimizerConfig::default();
        assert_eq!(config.global_changeover_cap, DEFAULT_GLOBAL_CHANGEOVER_CAP);
        assert_eq!(config.weights.get(ObjectiveWeights::TARGET_DEVIATION), 100.0);
        assert_eq!(config.weights.get("unknown_term"), 0.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        // 只覆寫部分欄位
        let config = OptimizerConfig::from_json_str(
            r#"{
                "global_changeover_cap": 3,
                "weights": {"changeover_count": 10.0},
                "defaults": {"changeover_hours": 0.6}
            }"#,
        )
        .unwrap();

        assert_eq!(config.global_changeover_cap, 3);
        assert_eq!(config.weights.get(ObjectiveWeights::CHANGEOVER_COUNT), 10.0);
        // 權重表整體被取代
        assert_eq!(config.weights.get(ObjectiveWeights::TARGET_DEVIATION), 0.0);
        assert_eq!(config.defaults.changeover_hours, 0.6);
        assert_eq!(config.defaults.max_products_per_slot, 3);
        assert!(config.decompose_lines);
    }

    #[test]
    fn test_invalid_tolerance_rejected() {
        let result = OptimizerConfig::from_json_str(r#"{"volume_tolerance": 2.0}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_builder() {
        let config = OptimizerConfig::new()
            .with_global_changeover_cap(2)
            .with_volume_tolerance(0.1)
            .with_time_limit(Duration::from_secs(5))
            .with_category_threshold("cup", 0.3);

        assert_eq!(config.global_changeover_cap, 2);
        assert_eq!(config.time_limit(), Duration::from_secs(5));
        assert_eq!(config.category_minor_thresholds.get("cup"), Some(&0.3));
    }
}
