//! # Lineplan Core
//!
//! 產線排程核心資料模型、約束類型登錄表與輸出結構

pub mod config;
pub mod instance;
pub mod registry;
pub mod report;
pub mod rules;
pub mod schedule;

// Re-export 主要類型
pub use config::{ObjectiveWeights, OptimizerConfig, DEFAULT_GLOBAL_CHANGEOVER_CAP};
pub use instance::{Line, LineId, ProblemInstance, Product, ProductId, TimeSlot};
pub use registry::{ConstraintRegistry, ResolvedLine, ResolvedProduct};
pub use report::{Diagnostics, SolveReport, SolveStatus};
pub use rules::{
    ChangeoverRule, ConstraintKind, LineDirective, LineOverrides, LineParameters, LineRuleSet,
    SlotUtilization,
};
pub use schedule::{
    ChangeoverRecord, Fulfillment, LineSchedule, Schedule, ScheduleWarning, SlotAssignment,
    WarningKind, WarningSeverity,
};

/// 排程錯誤類型（建模階段，求解前即中止）
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("產品 {product} 沒有任何可生產的產線")]
    NoValidLine { product: String },

    #[error("產線 {line} 引用了未知產品: {product}")]
    UnknownProduct { line: String, product: String },

    #[error("未知產線: {0}")]
    UnknownLine(String),

    #[error("重複的識別碼: {0}")]
    DuplicateId(String),

    #[error("排程時段為空")]
    EmptyHorizon,

    #[error("參數錯誤 ({entity}): {message}")]
    InvalidParameter { entity: String, message: String },

    #[error("產線 {line} 時段 {slot} 扣除準備/清潔後可用工時為負: {available:.2}h")]
    NegativeCapacity {
        line: String,
        slot: usize,
        available: f64,
    },

    #[error("產線 {line} 的固定區塊序列需要 {required} 個時段，但只有 {available} 個")]
    BlockSequenceOverflow {
        line: String,
        required: usize,
        available: usize,
    },

    #[error("約束族 {family} 缺少必要變數群組: {group}")]
    MissingVariableGroup { family: String, group: String },

    #[error("約束族 {family} 缺少前置產物: {artifact}")]
    MissingArtifact { family: String, artifact: String },

    #[error("配置解析錯誤: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

impl ScheduleError {
    /// 建構器：參數錯誤
    pub fn invalid(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            entity: entity.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScheduleError>;
