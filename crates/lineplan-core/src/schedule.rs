//! 解碼後的排程

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::instance::{LineId, ProductId};

/// 單一時段的生產指派
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotAssignment {
    /// 時段序號
    pub slot: usize,

    /// 時段名稱
    pub slot_label: String,

    /// 時段內順序（0 起算）
    pub position: usize,

    pub product: ProductId,

    /// 產量（箱）
    pub quantity: Decimal,

    /// 生產工時
    pub hours: f64,
}

/// 單一產線的排程
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineSchedule {
    pub line: LineId,

    /// 依時段、時段內順序排列的指派
    pub assignments: Vec<SlotAssignment>,

    /// 稼動率（生產 + 換線工時 / 可用工時）
    pub utilization: f64,
}

impl LineSchedule {
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            assignments: Vec::new(),
            utilization: 0.0,
        }
    }

    /// 某時段的指派
    pub fn slot(&self, slot: usize) -> impl Iterator<Item = &SlotAssignment> {
        self.assignments.iter().filter(move |a| a.slot == slot)
    }

    /// 某產品的生產時段（遞增）
    pub fn slots_of(&self, product: &str) -> Vec<usize> {
        let mut slots: Vec<usize> = self
            .assignments
            .iter()
            .filter(|a| a.product == product)
            .map(|a| a.slot)
            .collect();
        slots.dedup();
        slots
    }

    /// 產線上依序生產的產品（相同產品連續出現只計一次）
    pub fn product_sequence(&self) -> Vec<&str> {
        let mut sequence: Vec<&str> = Vec::new();
        for assignment in &self.assignments {
            if sequence.last() != Some(&assignment.product.as_str()) {
                sequence.push(&assignment.product);
            }
        }
        sequence
    }
}

/// 換線紀錄
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeoverRecord {
    pub line: LineId,

    /// 換入產品所在時段
    pub slot: usize,

    pub from: ProductId,
    pub to: ProductId,

    /// 換線工時
    pub hours: f64,
}

/// 產品達成摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fulfillment {
    pub product: ProductId,
    pub target: Decimal,
    pub actual: Decimal,

    /// 實際 − 目標
    pub deviation: Decimal,

    /// 是否在容許帶內
    pub within_tolerance: bool,
}

/// 警告嚴重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WarningSeverity {
    Info,
    Warning,
    Error,
}

/// 警告類型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// 求解器數值雜訊，已截斷
    NumericalNoise,
    /// 目標未完全達成（仍在容許帶內）
    UnmetTarget,
    /// 產量與啟用旗標不一致
    ActivityMismatch,
    /// 產量超出容許帶
    VolumeOutOfBand,
    /// 時段工時超出上限
    CapacityExceeded,
    /// 時段工時低於下限
    UtilizationBelowMinimum,
    /// 生產區塊不連續
    BlockFragmented,
    /// 生產區塊短於最少時段數
    BlockTooShort,
    /// 共用時段違反少量生產規則
    MultiProductViolation,
    /// 時段換線超過上限
    SlotChangeoverCapExceeded,
    /// 換線總數超過全廠上限
    GlobalChangeoverCapExceeded,
    /// 產線指令未被遵守
    DirectiveViolated,
}

impl WarningKind {
    /// 是否為約束違反（而非資訊性提示）
    pub fn is_violation(&self) -> bool {
        !matches!(self, WarningKind::NumericalNoise | WarningKind::UnmetTarget)
    }
}

/// 排程警告（附加於排程，不中止流程）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleWarning {
    pub kind: WarningKind,
    pub severity: WarningSeverity,
    pub line: Option<LineId>,
    pub slot: Option<usize>,
    pub product: Option<ProductId>,
    pub message: String,
}

impl ScheduleWarning {
    pub fn new(kind: WarningKind, severity: WarningSeverity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            line: None,
            slot: None,
            product: None,
            message: message.into(),
        }
    }

    pub fn info(kind: WarningKind, message: impl Into<String>) -> Self {
        Self::new(kind, WarningSeverity::Info, message)
    }

    pub fn warning(kind: WarningKind, message: impl Into<String>) -> Self {
        Self::new(kind, WarningSeverity::Warning, message)
    }

    pub fn error(kind: WarningKind, message: impl Into<String>) -> Self {
        Self::new(kind, WarningSeverity::Error, message)
    }

    /// 建構器模式：設置產線
    pub fn with_line(mut self, line: impl Into<String>) -> Self {
        self.line = Some(line.into());
        self
    }

    /// 建構器模式：設置時段
    pub fn with_slot(mut self, slot: usize) -> Self {
        self.slot = Some(slot);
        self
    }

    /// 建構器模式：設置產品
    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product = Some(product.into());
        self
    }
}

/// 完整排程
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub lines: Vec<LineSchedule>,
    pub changeovers: Vec<ChangeoverRecord>,
    pub fulfillment: Vec<Fulfillment>,
    pub warnings: Vec<ScheduleWarning>,
}

impl Schedule {
    /// 創建空排程
    pub fn empty() -> Self {
        Self::default()
    }

    /// 添加警告
    pub fn add_warning(&mut self, warning: ScheduleWarning) {
        self.warnings.push(warning);
    }

    pub fn line(&self, id: &str) -> Option<&LineSchedule> {
        self.lines.iter().find(|l| l.line == id)
    }

    pub fn fulfillment_of(&self, product: &str) -> Option<&Fulfillment> {
        self.fulfillment.iter().find(|f| f.product == product)
    }

    pub fn total_changeovers(&self) -> usize {
        self.changeovers.len()
    }

    pub fn changeovers_on(&self, line: &str) -> usize {
        self.changeovers.iter().filter(|c| c.line == line).count()
    }

    /// 約束違反類警告
    pub fn violations(&self) -> impl Iterator<Item = &ScheduleWarning> {
        self.warnings.iter().filter(|w| w.kind.is_violation())
    }

    pub fn has_violations(&self) -> bool {
        self.violations().next().is_some()
    }

    /// 合併另一份（不同產線的）排程
    pub fn merge(&mut self, other: Schedule) {
        self.lines.extend(other.lines);
        self.changeovers.extend(other.changeovers);
        self.fulfillment.extend(other.fulfillment);
        self.warnings.extend(other.warnings);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment(slot: usize, position: usize, product: &str) -> SlotAssignment {
        SlotAssignment {
            slot,
            slot_label: format!("T{}", slot + 1),
            position,
            product: product.to_string(),
            quantity: Decimal::from(10),
            hours: 1.0,
        }
    }

    #[test]
    fn test_product_sequence() {
        let mut line = LineSchedule::new("L1");
        line.assignments = vec![
            assignment(0, 0, "A"),
            assignment(1, 0, "A"),
            assignment(1, 1, "B"),
            assignment(2, 0, "B"),
        ];

        assert_eq!(line.product_sequence(), vec!["A", "B"]);
        assert_eq!(line.slots_of("B"), vec![1, 2]);
        assert_eq!(line.slot(1).count(), 2);
    }

    #[test]
    fn test_violation_filter() {
        let mut schedule = Schedule::empty();
        schedule.add_warning(ScheduleWarning::info(WarningKind::NumericalNoise, "clamped"));
        assert!(!schedule.has_violations());

        schedule.add_warning(
            ScheduleWarning::warning(WarningKind::BlockFragmented, "split")
                .with_line("L1")
                .with_product("A"),
        );
        assert!(schedule.has_violations());
        assert_eq!(schedule.violations().count(), 1);
    }
}
