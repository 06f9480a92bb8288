//! # Lineplan Optimizer
//!
//! 求解器後端、結果解碼、產線拆分與最佳化主流程

pub mod backend;
pub mod decoder;
pub mod decompose;
pub mod optimizer;

// Re-export 主要類型
pub use backend::{BackendSolution, MicroLpBackend, SolveBudget, SolverBackend};
pub use decoder::ResultDecoder;
pub use optimizer::Optimizer;

use lineplan_core::{OptimizerConfig, ProblemInstance, Result, SolveReport};

/// 以預設求解器排程
pub fn solve(instance: &ProblemInstance, config: &OptimizerConfig) -> Result<SolveReport> {
    Optimizer::new(config.clone()).solve(instance)
}
