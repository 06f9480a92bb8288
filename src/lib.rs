//! # Lineplan
//!
//! 多產線、多時段生產排程的混合整數規劃核心。
//!
//! - [`lineplan_core`]：問題實例、產線規則、約束類型登錄表與輸出結構
//! - [`lineplan_model`]：決策變數、約束管理器與目標函數
//! - [`lineplan_optimizer`]：求解器後端、結果解碼與最佳化主流程
//!
//! ```no_run
//! use lineplan::{solve, Line, OptimizerConfig, ProblemInstance, Product, TimeSlot};
//! use rust_decimal::Decimal;
//!
//! let instance = ProblemInstance::new()
//!     .with_product(Product::new("A", Decimal::from(40)))
//!     .with_line(Line::new("L1").with_rate("A", 10.0))
//!     .with_slots(TimeSlot::uniform(5, 8.0));
//!
//! let report = solve(&instance, &OptimizerConfig::default())?;
//! println!("{}", report.status);
//! # Ok::<(), lineplan::ScheduleError>(())
//! ```

pub use lineplan_core::*;
pub use lineplan_model as model;
pub use lineplan_optimizer::{
    solve, BackendSolution, MicroLpBackend, Optimizer, ResultDecoder, SolveBudget, SolverBackend,
};
