//! 求解器後端
//!
//! 求解器被視為黑箱：接收線性模型與時間預算，回傳狀態與變數值。
//! 預設後端以 microlp 求解線性鬆弛，分支定界在本模組內進行，
//! 每個節點之間檢查時間與節點預算，超出預算時回傳目前最佳整數解。

use std::time::{Duration, Instant};

use lineplan_core::{OptimizerConfig, SolveStatus};
use lineplan_model::{LinearModel, Sense, VarKind};
use microlp::{ComparisonOp, OptimizationDirection, Problem, Solution};

/// 整數判定容差
const INTEGRALITY_TOLERANCE: f64 = 1e-6;

/// 求解預算
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveBudget {
    /// 牆鐘時間上限
    pub time_limit: Duration,
    /// 相對最佳性差距
    pub relative_gap: f64,
    /// 分支定界節點上限（None 表示不限）
    pub node_limit: Option<u64>,
}

impl SolveBudget {
    pub fn new(time_limit: Duration) -> Self {
        Self {
            time_limit,
            relative_gap: 0.0,
            node_limit: None,
        }
    }

    pub fn from_config(config: &OptimizerConfig) -> Self {
        Self {
            time_limit: config.time_limit(),
            relative_gap: config.relative_gap,
            node_limit: config.node_limit,
        }
    }

    /// 建構器模式：設置節點上限
    pub fn with_node_limit(mut self, limit: u64) -> Self {
        self.node_limit = Some(limit);
        self
    }
}

/// 後端回傳的原始解
#[derive(Debug, Clone, PartialEq)]
pub struct BackendSolution {
    pub status: SolveStatus,
    /// 依變數代號排列的值；僅最佳/可行時有內容
    pub values: Vec<f64>,
    pub objective: Option<f64>,
    pub message: Option<String>,
}

impl BackendSolution {
    /// 已證明最佳
    pub fn optimal(objective: f64, values: Vec<f64>) -> Self {
        Self {
            status: SolveStatus::Optimal,
            values,
            objective: Some(objective),
            message: None,
        }
    }

    /// 時間內最佳可行解
    pub fn feasible(objective: f64, values: Vec<f64>, message: impl Into<String>) -> Self {
        Self {
            status: SolveStatus::Feasible,
            values,
            objective: Some(objective),
            message: Some(message.into()),
        }
    }

    pub fn infeasible(message: impl Into<String>) -> Self {
        Self {
            status: SolveStatus::Infeasible,
            values: Vec::new(),
            objective: None,
            message: Some(message.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: SolveStatus::Error,
            values: Vec::new(),
            objective: None,
            message: Some(message.into()),
        }
    }
}

/// 求解器後端
pub trait SolverBackend: Send + Sync {
    /// 後端名稱（寫入診斷資訊）
    fn name(&self) -> &'static str;

    /// 求解模型（最小化目標）
    fn solve(&self, model: &LinearModel, budget: &SolveBudget) -> BackendSolution;
}

/// microlp 後端
#[derive(Debug, Clone, Copy, Default)]
pub struct MicroLpBackend;

impl MicroLpBackend {
    pub fn new() -> Self {
        Self
    }
}

impl SolverBackend for MicroLpBackend {
    fn name(&self) -> &'static str {
        "microlp"
    }

    fn solve(&self, model: &LinearModel, budget: &SolveBudget) -> BackendSolution {
        // 根節點鬆弛也計入時間預算
        let deadline = Instant::now() + budget.time_limit;
        if let Some(constraint) = model.trivially_infeasible() {
            return BackendSolution::infeasible(format!(
                "約束 {} 不含變數且恆不成立",
                constraint.name
            ));
        }

        let (problem, vars) = relaxation(model);
        let root = match problem.solve() {
            Ok(root) => root,
            Err(err) => return map_error(err),
        };

        let search = BranchAndBound {
            model,
            vars: &vars,
            deadline,
            budget,
        };
        search.run(root)
    }
}

fn map_error(err: microlp::Error) -> BackendSolution {
    match err {
        microlp::Error::Infeasible => BackendSolution::infeasible("problem is infeasible"),
        microlp::Error::Unbounded => BackendSolution::error("problem is unbounded"),
        microlp::Error::InternalError(message) => BackendSolution::error(message),
    }
}

/// 轉譯為 microlp 線性鬆弛（整數與二元變數以連續變數加上界限表示）
fn relaxation(model: &LinearModel) -> (Problem, Vec<microlp::Variable>) {
    let mut coefficients = vec![0.0; model.var_count()];
    for (var, coeff) in model.objective().terms() {
        coefficients[var.index()] = coeff;
    }

    let mut problem = Problem::new(OptimizationDirection::Minimize);
    let vars: Vec<microlp::Variable> = model
        .vars()
        .iter()
        .zip(&coefficients)
        .map(|(def, &coeff)| match def.kind {
            VarKind::Binary => problem.add_var(coeff, (0.0, 1.0)),
            VarKind::Integer => problem.add_var(coeff, (def.lower.ceil(), def.upper.floor())),
            VarKind::Continuous => problem.add_var(coeff, (def.lower, def.upper)),
        })
        .collect();

    for constraint in model.constraints() {
        // 空約束已在前面檢查過，這裡必定成立
        if constraint.expr.is_empty() {
            continue;
        }
        let terms: Vec<(microlp::Variable, f64)> = constraint
            .expr
            .terms()
            .map(|(var, coeff)| (vars[var.index()], coeff))
            .collect();
        let op = match constraint.sense {
            Sense::Le => ComparisonOp::Le,
            Sense::Ge => ComparisonOp::Ge,
            Sense::Eq => ComparisonOp::Eq,
        };
        problem.add_constraint(terms, op, constraint.rhs);
    }

    (problem, vars)
}

/// 待展開的分支
struct Branch {
    parent: Solution,
    var: usize,
    op: ComparisonOp,
    bound: f64,
}

/// 目前最佳整數解
struct Incumbent {
    objective: f64,
    values: Vec<f64>,
}

/// 深度優先分支定界
///
/// 分支順序同 microlp：挑選離整數最遠的整數變數，先探索下取整分支。
struct BranchAndBound<'a> {
    model: &'a LinearModel,
    vars: &'a [microlp::Variable],
    budget: &'a SolveBudget,
    deadline: Instant,
}

impl BranchAndBound<'_> {
    fn run(&self, root: Solution) -> BackendSolution {
        let mut incumbent: Option<Incumbent> = None;
        let mut stack = Vec::new();
        self.expand(root, &mut incumbent, &mut stack);

        let mut nodes: u64 = 0;
        while let Some(branch) = stack.pop() {
            if let Some(reason) = self.exhausted(nodes) {
                return self.stopped(reason, incumbent);
            }
            nodes += 1;

            let child = match branch.op {
                ComparisonOp::Eq => branch.parent.fix_var(self.vars[branch.var], branch.bound),
                op => branch.parent.add_constraint([(self.vars[branch.var], 1.0)], op, branch.bound),
            };
            match child {
                Ok(child) => self.expand(child, &mut incumbent, &mut stack),
                // 分支不可行：剪枝
                Err(microlp::Error::Infeasible) => continue,
                Err(err) => return map_error(err),
            }
        }

        tracing::debug!("分支定界完成：節點 {} 個", nodes);
        match incumbent {
            Some(best) => BackendSolution::optimal(self.with_constant(best.objective), best.values),
            None => BackendSolution::infeasible("problem is infeasible"),
        }
    }

    /// 節點或時間預算是否用盡
    fn exhausted(&self, nodes: u64) -> Option<&'static str> {
        if Instant::now() >= self.deadline {
            return Some("time limit");
        }
        match self.budget.node_limit {
            Some(limit) if nodes >= limit => Some("node limit"),
            _ => None,
        }
    }

    fn stopped(&self, reason: &str, incumbent: Option<Incumbent>) -> BackendSolution {
        match incumbent {
            Some(best) => {
                tracing::warn!("達到{}，採用目前最佳可行解 {:.4}", reason, best.objective);
                BackendSolution::feasible(
                    self.with_constant(best.objective),
                    best.values,
                    format!("{} reached, best incumbent accepted", reason),
                )
            }
            None => {
                tracing::warn!("達到{}，且沒有可用的可行解", reason);
                BackendSolution::error(format!("{} without incumbent", reason))
            }
        }
    }

    /// 以界限剪枝，整數解更新現任解，否則推入兩個子分支
    fn expand(&self, solution: Solution, incumbent: &mut Option<Incumbent>, stack: &mut Vec<Branch>) {
        let bound = solution.objective();
        if let Some(best) = incumbent {
            let gap = self.budget.relative_gap * best.objective.abs();
            if bound >= best.objective - gap.max(INTEGRALITY_TOLERANCE) {
                return;
            }
        }

        match self.branching_var(&solution) {
            Some((var, value)) => {
                let binary = self.model.vars()[var].kind == VarKind::Binary;
                let (down, up) = if binary {
                    (ComparisonOp::Eq, ComparisonOp::Eq)
                } else {
                    (ComparisonOp::Le, ComparisonOp::Ge)
                };
                stack.push(Branch {
                    parent: solution.clone(),
                    var,
                    op: up,
                    bound: value.ceil(),
                });
                stack.push(Branch {
                    parent: solution,
                    var,
                    op: down,
                    bound: value.floor(),
                });
            }
            None => {
                let values = self.vars.iter().map(|var| solution[*var]).collect();
                *incumbent = Some(Incumbent {
                    objective: bound,
                    values,
                });
            }
        }
    }

    /// 離整數最遠的整數變數
    fn branching_var(&self, solution: &Solution) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64, f64)> = None;
        for (index, def) in self.model.vars().iter().enumerate() {
            if def.kind == VarKind::Continuous {
                continue;
            }
            let value = solution[self.vars[index]];
            let divergence = (value - value.round()).abs();
            if divergence > INTEGRALITY_TOLERANCE && best.map_or(true, |(_, _, d)| divergence > d) {
                best = Some((index, value, divergence));
            }
        }
        best.map(|(index, value, _)| (index, value))
    }

    fn with_constant(&self, objective: f64) -> f64 {
        objective + self.model.objective().constant()
    }
}
