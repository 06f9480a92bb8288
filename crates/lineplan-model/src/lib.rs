//! # Lineplan Model
//!
//! 決策變數宣告、約束管理器與目標函數組裝

pub mod builder;
pub mod constraints;
pub mod context;
pub mod linear;
pub mod objective;
pub mod variables;

// Re-export 主要類型
pub use builder::{BuiltModel, ModelBuilder};
pub use constraints::{ConstraintManager, Requirement, Stage};
pub use context::{CapacityTable, ModelContext};
pub use linear::{LinearConstraint, LinearExpr, LinearModel, Sense, VarDef, VarId, VarKind};
pub use objective::{ObjectiveRegistry, ObjectiveTerm, TermBuilder, WeightedTerm};
pub use variables::{ModelVariables, VariableGroup};
