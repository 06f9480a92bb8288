//! 線性模型中間表示
//!
//! 與求解器無關：變數、線性式、約束與目標。求解後端再轉譯為各自的 API。

use std::collections::BTreeMap;

/// 變數代號
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(usize);

impl VarId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// 變數類型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Continuous,
    Integer,
    Binary,
}

/// 變數定義
#[derive(Debug, Clone, PartialEq)]
pub struct VarDef {
    pub name: String,
    pub kind: VarKind,
    pub lower: f64,
    pub upper: f64,
}

impl VarDef {
    pub fn is_integral(&self) -> bool {
        !matches!(self.kind, VarKind::Continuous)
    }
}

/// 線性式：Σ 係數 × 變數 + 常數
///
/// 同一變數重複加入時係數會合併，係數為 0 的項會被移除。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearExpr {
    terms: BTreeMap<VarId, f64>,
    constant: f64,
}

impl LinearExpr {
    pub fn new() -> Self {
        Self::default()
    }

    /// 單一變數
    pub fn var(var: VarId) -> Self {
        Self::new().with(var, 1.0)
    }

    /// 加入一項
    pub fn add_term(&mut self, var: VarId, coeff: f64) {
        if coeff == 0.0 {
            return;
        }
        let entry = self.terms.entry(var).or_insert(0.0);
        *entry += coeff;
        if entry.abs() < 1e-12 {
            self.terms.remove(&var);
        }
    }

    /// 建構器模式：加入一項
    pub fn with(mut self, var: VarId, coeff: f64) -> Self {
        self.add_term(var, coeff);
        self
    }

    /// 加入常數
    pub fn add_constant(&mut self, value: f64) {
        self.constant += value;
    }

    /// 加入另一線性式乘上比例
    pub fn add_expr(&mut self, other: &LinearExpr, scale: f64) {
        for (var, coeff) in &other.terms {
            self.add_term(*var, coeff * scale);
        }
        self.constant += other.constant * scale;
    }

    /// 加總多個變數（係數相同）
    pub fn sum<I: IntoIterator<Item = VarId>>(vars: I, coeff: f64) -> Self {
        let mut expr = Self::new();
        for var in vars {
            expr.add_term(var, coeff);
        }
        expr
    }

    pub fn terms(&self) -> impl Iterator<Item = (VarId, f64)> + '_ {
        self.terms.iter().map(|(v, c)| (*v, *c))
    }

    pub fn coefficient(&self, var: VarId) -> f64 {
        self.terms.get(&var).copied().unwrap_or(0.0)
    }

    pub fn constant(&self) -> f64 {
        self.constant
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// 以變數值計算線性式
    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.constant
            + self
                .terms
                .iter()
                .map(|(v, c)| c * values.get(v.0).copied().unwrap_or(0.0))
                .sum::<f64>()
    }
}

impl FromIterator<(VarId, f64)> for LinearExpr {
    fn from_iter<I: IntoIterator<Item = (VarId, f64)>>(iter: I) -> Self {
        let mut expr = Self::new();
        for (var, coeff) in iter {
            expr.add_term(var, coeff);
        }
        expr
    }
}

/// 約束方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    Le,
    Ge,
    Eq,
}

/// 線性約束：expr (sense) rhs，常數已移至右側
#[derive(Debug, Clone, PartialEq)]
pub struct LinearConstraint {
    /// 所屬約束族
    pub family: &'static str,
    pub name: String,
    pub expr: LinearExpr,
    pub sense: Sense,
    pub rhs: f64,
}

impl LinearConstraint {
    /// 以變數值檢查是否滿足
    pub fn is_satisfied(&self, values: &[f64], tolerance: f64) -> bool {
        let lhs = self.expr.evaluate(values);
        match self.sense {
            Sense::Le => lhs <= self.rhs + tolerance,
            Sense::Ge => lhs >= self.rhs - tolerance,
            Sense::Eq => (lhs - self.rhs).abs() <= tolerance,
        }
    }
}

/// 線性模型
#[derive(Debug, Clone, Default)]
pub struct LinearModel {
    vars: Vec<VarDef>,
    constraints: Vec<LinearConstraint>,
    objective: LinearExpr,
}

impl LinearModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// 宣告變數
    pub fn add_var(&mut self, name: impl Into<String>, kind: VarKind, lower: f64, upper: f64) -> VarId {
        let id = VarId(self.vars.len());
        let (lower, upper) = match kind {
            VarKind::Binary => (0.0, 1.0),
            _ => (lower, upper),
        };
        self.vars.push(VarDef {
            name: name.into(),
            kind,
            lower,
            upper,
        });
        id
    }

    pub fn binary(&mut self, name: impl Into<String>) -> VarId {
        self.add_var(name, VarKind::Binary, 0.0, 1.0)
    }

    pub fn continuous(&mut self, name: impl Into<String>, lower: f64, upper: f64) -> VarId {
        self.add_var(name, VarKind::Continuous, lower, upper)
    }

    pub fn integer(&mut self, name: impl Into<String>, lower: f64, upper: f64) -> VarId {
        self.add_var(name, VarKind::Integer, lower, upper)
    }

    /// 加入約束，線性式中的常數移到右側
    pub fn add_constraint(
        &mut self,
        family: &'static str,
        name: impl Into<String>,
        mut expr: LinearExpr,
        sense: Sense,
        rhs: f64,
    ) {
        let rhs = rhs - expr.constant;
        expr.constant = 0.0;
        self.constraints.push(LinearConstraint {
            family,
            name: name.into(),
            expr,
            sense,
            rhs,
        });
    }

    pub fn set_objective(&mut self, objective: LinearExpr) {
        self.objective = objective;
    }

    pub fn var(&self, id: VarId) -> &VarDef {
        &self.vars[id.0]
    }

    pub fn vars(&self) -> &[VarDef] {
        &self.vars
    }

    pub fn constraints(&self) -> &[LinearConstraint] {
        &self.constraints
    }

    pub fn objective(&self) -> &LinearExpr {
        &self.objective
    }

    pub fn var_count(&self) -> usize {
        self.vars.len()
    }

    pub fn constraint_count(&self) -> usize {
        self.constraints.len()
    }

    /// 不含任何變數卻無法成立的約束（例如 0 ≥ 1）
    pub fn trivially_infeasible(&self) -> Option<&LinearConstraint> {
        self.constraints
            .iter()
            .find(|c| c.expr.is_empty() && !c.is_satisfied(&[], 1e-9))
    }

    /// 以變數值找出違反的約束
    pub fn violated<'a>(&'a self, values: &'a [f64], tolerance: f64) -> impl Iterator<Item = &'a LinearConstraint> + 'a {
        self.constraints
            .iter()
            .filter(move |c| !c.is_satisfied(values, tolerance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_merge_duplicate_terms() {
        let mut model = LinearModel::new();
        let x = model.binary("x");
        let y = model.continuous("y", 0.0, 10.0);

        let mut expr = LinearExpr::var(x);
        expr.add_term(y, 2.0);
        expr.add_term(x, 3.0);
        assert_eq!(expr.len(), 2);
        assert_eq!(expr.coefficient(x), 4.0);

        // 互相抵銷的項會被移除
        expr.add_term(y, -2.0);
        assert_eq!(expr.len(), 1);
    }

    #[test]
    fn test_constant_moves_to_rhs() {
        let mut model = LinearModel::new();
        let x = model.continuous("x", 0.0, 5.0);
        let mut expr = LinearExpr::var(x);
        expr.add_constant(2.0);
        model.add_constraint("test", "c", expr, Sense::Le, 5.0);

        let c = &model.constraints()[0];
        assert_eq!(c.rhs, 3.0);
        assert!(c.is_satisfied(&[3.0], 1e-9));
        assert!(!c.is_satisfied(&[3.5], 1e-9));
    }

    #[test]
    fn test_trivially_infeasible() {
        let mut model = LinearModel::new();
        model.add_constraint("test", "ok", LinearExpr::new(), Sense::Le, 1.0);
        assert!(model.trivially_infeasible().is_none());

        model.add_constraint("test", "bad", LinearExpr::new(), Sense::Ge, 1.0);
        assert_eq!(model.trivially_infeasible().map(|c| c.name.as_str()), Some("bad"));
    }

    #[test]
    fn test_binary_bounds_forced() {
        let mut model = LinearModel::new();
        let b = model.add_var("b", VarKind::Binary, -3.0, 7.0);
        assert_eq!(model.var(b).lower, 0.0);
        assert_eq!(model.var(b).upper, 1.0);
        assert!(model.var(b).is_integral());
    }

    fn terms_strategy() -> impl Strategy<Value = Vec<(usize, f64)>> {
        proptest::collection::vec((0usize..4, -5.0f64..5.0), 0..12)
    }

    proptest! {
        #[test]
        fn prop_merged_terms_evaluate_like_raw_sum(
            terms in terms_strategy(),
            values in proptest::collection::vec(-3.0f64..3.0, 4),
        ) {
            let mut model = LinearModel::new();
            let vars: Vec<VarId> = (0..4).map(|i| model.continuous(format!("x{}", i), -3.0, 3.0)).collect();

            let mut expr = LinearExpr::new();
            for (i, coeff) in &terms {
                expr.add_term(vars[*i], *coeff);
            }
            let raw: f64 = terms.iter().map(|(i, coeff)| coeff * values[*i]).sum();

            prop_assert!(expr.len() <= 4);
            prop_assert!((expr.evaluate(&values) - raw).abs() < 1e-9);
        }

        #[test]
        fn prop_add_expr_scales_linearly(
            left in terms_strategy(),
            right in terms_strategy(),
            scale in -2.0f64..2.0,
            values in proptest::collection::vec(-3.0f64..3.0, 4),
        ) {
            let mut model = LinearModel::new();
            let vars: Vec<VarId> = (0..4).map(|i| model.continuous(format!("x{}", i), -3.0, 3.0)).collect();
            let build = |terms: &[(usize, f64)]| -> LinearExpr {
                terms.iter().map(|(i, coeff)| (vars[*i], *coeff)).collect()
            };

            let a = build(&left);
            let b = build(&right);
            let mut combined = a.clone();
            combined.add_expr(&b, scale);

            let expected = a.evaluate(&values) + scale * b.evaluate(&values);
            prop_assert!((combined.evaluate(&values) - expected).abs() < 1e-9);
        }
    }
}
