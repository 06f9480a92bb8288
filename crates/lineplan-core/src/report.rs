//! 求解報告

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schedule::Schedule;

/// 求解狀態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SolveStatus {
    /// 已證明最佳
    Optimal,
    /// 時間內找到的最佳可行解
    Feasible,
    /// 約束互相矛盾，無解
    Infeasible,
    /// 求解器失敗
    Error,
}

impl SolveStatus {
    /// 是否帶有可解碼的解
    pub fn has_solution(&self) -> bool {
        matches!(self, SolveStatus::Optimal | SolveStatus::Feasible)
    }

    /// 合併子問題狀態，取最差者
    pub fn combine(self, other: SolveStatus) -> SolveStatus {
        use SolveStatus::*;
        match (self, other) {
            (Error, _) | (_, Error) => Error,
            (Infeasible, _) | (_, Infeasible) => Infeasible,
            (Feasible, _) | (_, Feasible) => Feasible,
            _ => Optimal,
        }
    }
}

impl std::fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SolveStatus::Optimal => "OPTIMAL",
            SolveStatus::Feasible => "FEASIBLE",
            SolveStatus::Infeasible => "INFEASIBLE",
            SolveStatus::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// 診斷資訊
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// 目標值
    pub objective_value: Option<f64>,

    /// 各目標項加權後的貢獻
    pub objective_breakdown: BTreeMap<String, f64>,

    /// 各約束族的約束數
    pub constraint_counts: BTreeMap<String, usize>,

    pub variable_count: usize,

    /// 建模耗時（毫秒）
    pub build_time_ms: u128,

    /// 求解耗時（毫秒）
    pub solve_time_ms: u128,

    /// 是否依產線拆分求解
    pub decomposed: bool,

    /// 求解器名稱
    pub backend: String,

    /// 求解器訊息
    pub messages: Vec<String>,
}

/// 求解報告：狀態、排程（僅最佳/可行時）、診斷
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveReport {
    pub run_id: Uuid,
    pub status: SolveStatus,
    pub schedule: Option<Schedule>,
    pub diagnostics: Diagnostics,
}

impl SolveReport {
    /// 創建帶排程的報告
    pub fn solved(status: SolveStatus, schedule: Schedule, diagnostics: Diagnostics) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            status,
            schedule: Some(schedule),
            diagnostics,
        }
    }

    /// 創建無排程的報告（不可行或錯誤）
    pub fn unsolved(status: SolveStatus, diagnostics: Diagnostics) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            status,
            schedule: None,
            diagnostics,
        }
    }

    pub fn objective(&self) -> Option<f64> {
        self.diagnostics.objective_value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(SolveStatus::Optimal, SolveStatus::Optimal, SolveStatus::Optimal)]
    #[case(SolveStatus::Optimal, SolveStatus::Feasible, SolveStatus::Feasible)]
    #[case(SolveStatus::Feasible, SolveStatus::Infeasible, SolveStatus::Infeasible)]
    #[case(SolveStatus::Infeasible, SolveStatus::Error, SolveStatus::Error)]
    fn test_combine_status(
        #[case] a: SolveStatus,
        #[case] b: SolveStatus,
        #[case] expected: SolveStatus,
    ) {
        assert_eq!(a.combine(b), expected);
        assert_eq!(b.combine(a), expected);
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&SolveStatus::Optimal).unwrap(), "\"OPTIMAL\"");
        assert!(SolveStatus::Feasible.has_solution());
        assert!(!SolveStatus::Infeasible.has_solution());
    }
}
