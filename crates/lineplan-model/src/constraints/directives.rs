//! 產線指令：首/末產品、開始順序、禁止相鄰、固定區塊

use lineplan_core::{ConstraintKind, LineDirective, ResolvedLine, Result, ScheduleError};

use crate::context::ModelContext;
use crate::linear::{LinearExpr, Sense};

const FAMILY: &str = "line_directives";

pub(crate) fn line_directives(ctx: &mut ModelContext) -> Result<()> {
    let registry = ctx.registry;

    for line in &registry.lines {
        if !line.is_enabled(ConstraintKind::LineDirectives) || line.directives.is_empty() {
            continue;
        }
        tracing::debug!("{}: 套用 {} 條產線指令", line.id, line.directives.len());

        for directive in &line.directives {
            if let Some(product) = directive.start_product() {
                start_product(ctx, line, index_of(ctx, line, product)?);
            }
            if let Some(product) = directive.last_product() {
                last_product(ctx, line, index_of(ctx, line, product)?);
            }

            match directive {
                LineDirective::ProductOrder { products } => {
                    for pair in products.windows(2) {
                        let a = index_of(ctx, line, &pair[0])?;
                        let b = index_of(ctx, line, &pair[1])?;
                        product_order(ctx, line, a, b);
                    }
                }
                LineDirective::ForbiddenAdjacency { from, to, symmetric } => {
                    let a = index_of(ctx, line, from)?;
                    let b = index_of(ctx, line, to)?;
                    forbid_adjacency(ctx, line, a, b);
                    if *symmetric {
                        forbid_adjacency(ctx, line, b, a);
                    }
                }
                LineDirective::BlockSequence { blocks } => {
                    let mut cursor = 0;
                    for (product, length) in blocks {
                        let p = index_of(ctx, line, product)?;
                        fixed_block(ctx, line, p, cursor..cursor + length);
                        cursor += length;
                    }
                }
                _ => {}
            }
        }
    }
    Ok(())
}

fn index_of(ctx: &ModelContext, line: &ResolvedLine, product: &str) -> Result<usize> {
    ctx.registry
        .product_index(product)
        .filter(|p| line.is_valid(*p))
        .ok_or_else(|| ScheduleError::UnknownProduct {
            line: line.id.clone(),
            product: product.to_string(),
        })
}

/// 第一個生產時段必須包含該產品（依序模式下須排在第一位）
fn start_product(ctx: &mut ModelContext, line: &ResolvedLine, p: usize) {
    let l = line.index;
    let sequenced = line.is_enabled(ConstraintKind::Sequencing);
    let registry = ctx.registry;
    let id = &registry.products[p].id;

    for t in 0..registry.slot_count() {
        let first = ctx.vars.first_busy[&(l, t)];
        let name = format!("{}:{}:{}", id, line.id, t);
        let anchor = if sequenced { ctx.vars.pos(p, l, t, 0) } else { ctx.vars.x(p, l, t) };
        if let Some(anchor) = anchor {
            ctx.add(FAMILY, format!("start[{}]", name), LinearExpr::var(first).with(anchor, -1.0), Sense::Le, 0.0);
        }
    }
}

/// 最後一個生產時段必須包含該產品（依序模式下須排在最後）
fn last_product(ctx: &mut ModelContext, line: &ResolvedLine, p: usize) {
    let l = line.index;
    let sequenced = line.is_enabled(ConstraintKind::Sequencing);
    let registry = ctx.registry;
    let id = &registry.products[p].id;

    for t in 0..registry.slot_count() {
        let Some(last) = ctx.vars.last_busy.get(&(l, t)).copied() else {
            continue;
        };
        let name = format!("{}:{}:{}", id, line.id, t);
        let anchor = if sequenced {
            ctx.vars.slot_last.get(&(p, l, t)).copied()
        } else {
            ctx.vars.x(p, l, t)
        };
        if let Some(anchor) = anchor {
            ctx.add(FAMILY, format!("last[{}]", name), LinearExpr::var(last).with(anchor, -1.0), Sense::Le, 0.0);
        }
    }
}

/// b 的區塊不得早於 a 開始：Σ (t−T)·s_b − Σ t·s_a ≥ −T
///
/// 任一產品未生產時約束自動鬆弛。同一時段內的先後由位置變數決定。
fn product_order(ctx: &mut ModelContext, line: &ResolvedLine, a: usize, b: usize) {
    let l = line.index;
    let slots = ctx.registry.slot_count();
    let horizon = slots as f64;
    let name = format!("{}<{}:{}", ctx.registry.products[a].id, ctx.registry.products[b].id, line.id);

    let mut expr = LinearExpr::new();
    for t in 0..slots {
        if let Some(sb) = ctx.vars.s(b, l, t) {
            expr.add_term(sb, t as f64 - horizon);
        }
        if let Some(sa) = ctx.vars.s(a, l, t) {
            expr.add_term(sa, -(t as f64));
        }
    }
    ctx.add(FAMILY, format!("order[{}]", name), expr, Sense::Ge, -horizon);

    if !line.is_enabled(ConstraintKind::Sequencing) {
        return;
    }
    let positions = line.positions();
    let big = positions as f64;
    for t in 0..slots {
        let (Some(xa), Some(xb)) = (ctx.vars.x(a, l, t), ctx.vars.x(b, l, t)) else {
            continue;
        };
        // 兩者同時生產時 k_a < k_b
        let mut expr = LinearExpr::new().with(xa, big).with(xb, big);
        for k in 0..positions {
            if let Some(pa) = ctx.vars.pos(a, l, t, k) {
                expr.add_term(pa, k as f64);
            }
            if let Some(pb) = ctx.vars.pos(b, l, t, k) {
                expr.add_term(pb, -(k as f64));
            }
        }
        ctx.add(FAMILY, format!("order_in_slot[{}:{}]", name, t), expr, Sense::Le, 2.0 * big - 1.0);
    }
}

/// a 之後不得緊接 b；中間有閒置時段即不算相鄰
fn forbid_adjacency(ctx: &mut ModelContext, line: &ResolvedLine, a: usize, b: usize) {
    let l = line.index;
    let name = format!("{}>{}:{}", ctx.registry.products[a].id, ctx.registry.products[b].id, line.id);

    for t in 0..ctx.registry.slot_count() {
        if line.is_enabled(ConstraintKind::Sequencing) {
            for k in 0..line.positions().saturating_sub(1) {
                if let (Some(pa), Some(pb)) = (ctx.vars.pos(a, l, t, k), ctx.vars.pos(b, l, t, k + 1)) {
                    ctx.add(
                        FAMILY,
                        format!("adjacent[{}:{}:{}]", name, t, k),
                        LinearExpr::var(pa).with(pb, 1.0),
                        Sense::Le,
                        1.0,
                    );
                }
            }
            if t > 0 {
                let tail = ctx.vars.slot_last.get(&(a, l, t - 1)).copied();
                if let (Some(tail), Some(head)) = (tail, ctx.vars.pos(b, l, t, 0)) {
                    ctx.add(
                        FAMILY,
                        format!("adjacent_across[{}:{}]", name, t),
                        LinearExpr::var(tail).with(head, 1.0),
                        Sense::Le,
                        1.0,
                    );
                }
            }
            continue;
        }

        // 粗略模式：b 不得在 a 生產中或 a 剛結束的時段開始
        let Some(sb) = ctx.vars.s(b, l, t) else {
            continue;
        };
        if let Some(xa) = ctx.vars.x(a, l, t) {
            ctx.add(FAMILY, format!("adjacent[{}:{}]", name, t), LinearExpr::var(sb).with(xa, 1.0), Sense::Le, 1.0);
        }
        if t > 0 {
            if let Some(prev) = ctx.vars.x(a, l, t - 1) {
                ctx.add(
                    FAMILY,
                    format!("adjacent_across[{}:{}]", name, t),
                    LinearExpr::var(sb).with(prev, 1.0),
                    Sense::Le,
                    1.0,
                );
            }
        }
    }
}

/// 固定區塊：指定時段只生產該產品
fn fixed_block(ctx: &mut ModelContext, line: &ResolvedLine, p: usize, slots: std::ops::Range<usize>) {
    let l = line.index;
    let registry = ctx.registry;
    let id = &registry.products[p].id;

    for t in slots {
        let name = format!("{}:{}:{}", id, line.id, t);
        if let Some(x) = ctx.vars.x(p, l, t) {
            ctx.add(FAMILY, format!("fixed[{}]", name), LinearExpr::var(x), Sense::Eq, 1.0);
        }
        for other in line.products().filter(|o| *o != p) {
            if let Some(x) = ctx.vars.x(other, l, t) {
                ctx.add(FAMILY, format!("excluded[{}:{}]", registry.products[other].id, name), LinearExpr::var(x), Sense::Le, 0.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::two_product_registry;
    use super::*;
    use lineplan_core::LineRuleSet;

    fn apply(rules: LineRuleSet) -> (usize, Vec<crate::linear::LinearConstraint>) {
        let registry = two_product_registry(rules);
        let mut ctx = ModelContext::with_variables(&registry);
        line_directives(&mut ctx).unwrap();
        let count = ctx.constraint_counts().get(FAMILY).copied().unwrap_or(0);
        (count, ctx.model.constraints().to_vec())
    }

    fn start(product: &str) -> LineDirective {
        LineDirective::StartProduct {
            product: product.to_string(),
        }
    }

    #[test]
    fn test_no_directives_no_rows() {
        let (count, _) = apply(LineRuleSet::default());
        assert_eq!(count, 0);
    }

    #[test]
    fn test_disabled_directives_ignored() {
        let rules = LineRuleSet::default()
            .with_directive(start("A"))
            .disable(ConstraintKind::LineDirectives);
        let (count, _) = apply(rules);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_start_product() {
        let (count, rows) = apply(LineRuleSet::default().with_directive(start("B")));
        assert_eq!(count, 10);
        assert!(rows.iter().all(|c| c.name.starts_with("start[B:L1:")));
    }

    #[test]
    fn test_start_end_product() {
        let rules = LineRuleSet::default().with_directive(LineDirective::StartEndProduct {
            start: "A".to_string(),
            end: "B".to_string(),
        });
        let (count, rows) = apply(rules);
        assert_eq!(count, 20);
        assert!(rows.iter().any(|c| c.name == "last[B:L1:9]"));
    }

    #[test]
    fn test_product_order_coefficients() {
        let rules = LineRuleSet::default().with_directive(LineDirective::ProductOrder {
            products: vec!["B".to_string(), "A".to_string()],
        });
        let registry = two_product_registry(rules);
        let mut ctx = ModelContext::with_variables(&registry);
        line_directives(&mut ctx).unwrap();

        let row = &ctx.model.constraints()[0];
        assert_eq!(row.name, "order[B<A:L1]");
        assert_eq!(row.rhs, -10.0);
        assert_eq!(row.expr.coefficient(ctx.vars.s(0, 0, 0).unwrap()), -10.0);
        assert_eq!(row.expr.coefficient(ctx.vars.s(0, 0, 4).unwrap()), -6.0);
        assert_eq!(row.expr.coefficient(ctx.vars.s(1, 0, 3).unwrap()), -3.0);
        // s_B[0] 係數為 0
        assert_eq!(row.expr.coefficient(ctx.vars.s(1, 0, 0).unwrap()), 0.0);
    }

    #[test]
    fn test_product_order_with_sequencing() {
        let rules = LineRuleSet::default()
            .with_sequencing()
            .with_directive(LineDirective::ProductOrder {
                products: vec!["A".to_string(), "B".to_string()],
            });
        let (count, _) = apply(rules);
        // 1 條跨時段 + 每時段 1 條
        assert_eq!(count, 11);
    }

    #[test]
    fn test_forbidden_adjacency_symmetric() {
        let rules = LineRuleSet::default().with_directive(LineDirective::ForbiddenAdjacency {
            from: "A".to_string(),
            to: "B".to_string(),
            symmetric: true,
        });
        let (count, _) = apply(rules);
        // 每個方向：同時段 10 條 + 跨時段 9 條
        assert_eq!(count, 38);
    }

    #[test]
    fn test_forbidden_adjacency_sequenced() {
        let rules = LineRuleSet::default()
            .with_sequencing()
            .with_directive(LineDirective::ForbiddenAdjacency {
                from: "A".to_string(),
                to: "B".to_string(),
                symmetric: false,
            });
        let (count, rows) = apply(rules);
        // 每時段位置 0→1 一條，跨時段 9 條
        assert_eq!(count, 19);
        assert!(rows.iter().any(|c| c.name == "adjacent_across[A>B:L1:1]"));
    }

    #[test]
    fn test_block_sequence() {
        let rules = LineRuleSet::default().with_directive(LineDirective::BlockSequence {
            blocks: vec![("A".to_string(), 3), ("B".to_string(), 2)],
        });
        let (count, rows) = apply(rules);
        assert_eq!(count, 10);

        let fixed: Vec<&str> = rows
            .iter()
            .filter(|c| c.sense == Sense::Eq)
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(
            fixed,
            vec!["fixed[A:L1:0]", "fixed[A:L1:1]", "fixed[A:L1:2]", "fixed[B:L1:3]", "fixed[B:L1:4]"]
        );
    }
}
