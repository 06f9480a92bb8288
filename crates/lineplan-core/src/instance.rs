//! 問題實例：產品、產線、時段

use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::rules::LineRuleSet;

/// 產品識別碼
pub type ProductId = String;

/// 產線識別碼
pub type LineId = String;

/// 產品
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// 產品ID
    pub id: ProductId,

    /// 目標產量（箱）
    pub target: Decimal,

    /// 產品類別（用於少量生產門檻）
    #[serde(default)]
    pub category: String,
}

impl Product {
    /// 創建新的產品
    pub fn new(id: impl Into<String>, target: Decimal) -> Self {
        Self {
            id: id.into(),
            target,
            category: String::new(),
        }
    }

    /// 建構器模式：設置產品類別
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// 目標產量（模型計算用浮點數）
    pub fn target_boxes(&self) -> f64 {
        self.target.to_f64().unwrap_or(0.0)
    }
}

/// 產線
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Line {
    /// 產線ID
    pub id: LineId,

    /// 產能：產品 → 每小時箱數
    #[serde(default)]
    pub rates: BTreeMap<ProductId, f64>,

    /// 產線專屬規則
    #[serde(default)]
    pub rules: LineRuleSet,
}

impl Line {
    /// 創建新的產線
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rates: BTreeMap::new(),
            rules: LineRuleSet::default(),
        }
    }

    /// 建構器模式：設置產品產能（箱/小時）
    pub fn with_rate(mut self, product: impl Into<String>, boxes_per_hour: f64) -> Self {
        self.rates.insert(product.into(), boxes_per_hour);
        self
    }

    /// 建構器模式：設置產線規則
    pub fn with_rules(mut self, rules: LineRuleSet) -> Self {
        self.rules = rules;
        self
    }

    /// 產品產能，未設定時為 0
    pub fn rate(&self, product: &str) -> f64 {
        self.rates.get(product).copied().unwrap_or(0.0)
    }
}

/// 時段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSlot {
    /// 時段序號（決定相鄰關係）
    pub index: usize,

    /// 顯示名稱，例如 "Mon-day"
    pub label: String,

    /// 可用工時
    pub hours: f64,

    /// 所屬日期
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

impl TimeSlot {
    pub fn new(index: usize, label: impl Into<String>, hours: f64) -> Self {
        Self {
            index,
            label: label.into(),
            hours,
            date: None,
        }
    }

    /// 建構器模式：設置日期
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// 建立 `count` 個等長時段
    pub fn uniform(count: usize, hours: f64) -> Vec<TimeSlot> {
        (0..count)
            .map(|index| TimeSlot::new(index, format!("T{}", index + 1), hours))
            .collect()
    }

    /// 建立一週（週一至週五）日班/夜班時段
    ///
    /// `day_hours` 依序為週一到週五每班可用工時，例如週三縮短為 8 小時：
    /// `[10.5, 10.5, 8.0, 10.5, 10.5]`。`week_of` 會回推到該週的週一。
    pub fn weekly(week_of: NaiveDate, day_hours: [f64; 5]) -> Vec<TimeSlot> {
        let monday =
            week_of - Duration::days(week_of.weekday().num_days_from_monday() as i64);

        let mut slots = Vec::with_capacity(10);
        for (offset, hours) in day_hours.iter().enumerate() {
            let date = monday + Duration::days(offset as i64);
            let day = weekday_label(date.weekday());
            for shift in ["day", "night"] {
                let index = slots.len();
                slots.push(TimeSlot::new(index, format!("{}-{}", day, shift), *hours).with_date(date));
            }
        }
        slots
    }
}

fn weekday_label(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Mon",
        Weekday::Tue => "Tue",
        Weekday::Wed => "Wed",
        Weekday::Thu => "Thu",
        Weekday::Fri => "Fri",
        Weekday::Sat => "Sat",
        Weekday::Sun => "Sun",
    }
}

/// 完整問題實例（由外部資料層提供，執行期間不可變）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProblemInstance {
    pub products: Vec<Product>,
    pub lines: Vec<Line>,
    pub slots: Vec<TimeSlot>,
}

impl ProblemInstance {
    /// 創建空的問題實例
    pub fn new() -> Self {
        Self::default()
    }

    /// 建構器模式：加入產品
    pub fn with_product(mut self, product: Product) -> Self {
        self.products.push(product);
        self
    }

    /// 建構器模式：加入產線
    pub fn with_line(mut self, line: Line) -> Self {
        self.lines.push(line);
        self
    }

    /// 建構器模式：設置時段
    pub fn with_slots(mut self, slots: Vec<TimeSlot>) -> Self {
        self.slots = slots;
        self
    }

    /// 從 JSON 載入
    pub fn from_json_str(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn product(&self, id: &str) -> Option<&Product> {
        self.products.iter().find(|p| p.id == id)
    }

    pub fn line(&self, id: &str) -> Option<&Line> {
        self.lines.iter().find(|l| l.id == id)
    }

    /// 最長時段工時
    pub fn max_slot_hours(&self) -> f64 {
        self.slots.iter().map(|s| s.hours).fold(0.0, f64::max)
    }
}
