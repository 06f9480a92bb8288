//! 時段內排序與換線

use lineplan_core::{ConstraintKind, Result};

use crate::context::ModelContext;
use crate::linear::{LinearExpr, Sense, VarId};

const SEQUENCING: &str = "sequencing";
const COUNT: &str = "changeover_count";
const GLOBAL: &str = "global_changeover_cap";

/// 時段內位置指派：每個生產中的產品恰佔一個位置，位置由前往後連續填滿
pub(crate) fn sequencing(ctx: &mut ModelContext) -> Result<()> {
    let registry = ctx.registry;

    for line in &registry.lines {
        if !line.is_enabled(ConstraintKind::Sequencing) {
            continue;
        }
        let l = line.index;
        let products: Vec<usize> = line.products().collect();
        let positions = line.positions();

        for t in 0..registry.slot_count() {
            let name = format!("{}:{}", line.id, t);

            // Σ_k pos = x
            for &p in &products {
                let Some(x) = ctx.vars.x(p, l, t) else {
                    continue;
                };
                let mut expr = LinearExpr::sum((0..positions).filter_map(|k| ctx.vars.pos(p, l, t, k)), 1.0);
                expr.add_term(x, -1.0);
                ctx.add(SEQUENCING, format!("assign[{}:{}]", registry.products[p].id, name), expr, Sense::Eq, 0.0);
            }

            for k in 0..positions {
                let row = occupied(ctx, &products, l, t, k);
                ctx.add(SEQUENCING, format!("one_per_pos[{}:{}]", name, k), row, Sense::Le, 1.0);
            }
            for k in 0..positions.saturating_sub(1) {
                let mut expr = occupied(ctx, &products, l, t, k + 1);
                expr.add_expr(&occupied(ctx, &products, l, t, k), -1.0);
                ctx.add(SEQUENCING, format!("packed[{}:{}]", name, k), expr, Sense::Le, 0.0);
            }

            // tail 標記時段內最後一個位置的產品
            let mut tails = LinearExpr::new();
            for &p in &products {
                let (Some(x), Some(tail)) = (ctx.vars.x(p, l, t), ctx.vars.slot_last.get(&(p, l, t)).copied()) else {
                    continue;
                };
                let pname = format!("{}:{}", registry.products[p].id, name);
                tails.add_term(tail, 1.0);

                for k in 0..positions {
                    let Some(pos) = ctx.vars.pos(p, l, t, k) else {
                        continue;
                    };
                    let mut expr = LinearExpr::var(tail).with(pos, -1.0);
                    if k + 1 < positions {
                        expr.add_expr(&occupied(ctx, &products, l, t, k + 1), 1.0);
                    }
                    ctx.add(SEQUENCING, format!("tail_ge[{}:{}]", pname, k), expr, Sense::Ge, 0.0);
                }
                ctx.add(SEQUENCING, format!("tail_le[{}]", pname), LinearExpr::var(tail).with(x, -1.0), Sense::Le, 0.0);
            }
            ctx.add(SEQUENCING, format!("one_tail[{}]", name), tails, Sense::Le, 1.0);
        }
    }
    Ok(())
}

/// 某位置上的產品數（0 或 1）
fn occupied(ctx: &ModelContext, products: &[usize], l: usize, t: usize, k: usize) -> LinearExpr {
    LinearExpr::sum(products.iter().filter_map(|&p| ctx.vars.pos(p, l, t, k)), 1.0)
}

/// 每時段換線次數、換線事件與換線工時
///
/// 粗略模式：進入時段的產品數，產線第一個生產時段扣 1。
/// 依序模式：時段內產品數減去延續上一時段末產品的次數，同樣扣除第一個生產時段。
pub(crate) fn changeover_count(ctx: &mut ModelContext) -> Result<()> {
    let registry = ctx.registry;

    for line in &registry.lines {
        let l = line.index;
        let products: Vec<usize> = line.products().collect();
        let sequence_aware = line.sequence_aware();

        for t in 0..registry.slot_count() {
            let name = format!("{}:{}", line.id, t);
            let cnt = ctx.vars.changeover_count[&(l, t)];
            let ev = ctx.vars.changeover_event[&(l, t)];
            let first = ctx.vars.first_busy[&(l, t)];
            let starts = LinearExpr::sum(products.iter().filter_map(|&p| ctx.vars.s(p, l, t)), 1.0);

            let mut def = LinearExpr::var(cnt).with(first, 1.0);
            if sequence_aware {
                let active = LinearExpr::sum(products.iter().filter_map(|&p| ctx.vars.x(p, l, t)), 1.0);
                let mut kept = LinearExpr::new();

                for &p in &products {
                    let Some(keep) = ctx.vars.carryover.get(&(p, l, t)).copied() else {
                        continue;
                    };
                    let pname = format!("{}:{}", registry.products[p].id, name);
                    kept.add_term(keep, 1.0);
                    if let Some(prev_tail) = ctx.vars.slot_last.get(&(p, l, t - 1)).copied() {
                        ctx.add(COUNT, format!("keep_tail[{}]", pname), LinearExpr::var(keep).with(prev_tail, -1.0), Sense::Le, 0.0);
                    }
                    if let Some(head) = ctx.vars.pos(p, l, t, 0) {
                        ctx.add(COUNT, format!("keep_head[{}]", pname), LinearExpr::var(keep).with(head, -1.0), Sense::Le, 0.0);
                    }
                }

                def.add_expr(&active, -1.0);
                def.add_expr(&kept, 1.0);

                // 延續次數不超過非新進產品數
                let mut cut = active;
                cut.add_expr(&kept, -1.0);
                cut.add_expr(&starts, -1.0);
                ctx.add(COUNT, format!("keep_cut[{}]", name), cut, Sense::Ge, 0.0);
            } else {
                def.add_expr(&starts, -1.0);
            }
            ctx.add(COUNT, format!("count[{}]", name), def, Sense::Eq, 0.0);

            // ev = 1 ⇔ cnt > 0，啟用每時段上限時 cnt ≤ 上限
            let bound = if line.is_enabled(ConstraintKind::SlotChangeoverLimit) {
                line.params.changeover_cap_per_slot as f64
            } else {
                ctx.model.var(cnt).upper
            };
            ctx.add(COUNT, format!("event_ub[{}]", name), LinearExpr::var(cnt).with(ev, -bound), Sense::Le, 0.0);
            ctx.add(COUNT, format!("event_lb[{}]", name), LinearExpr::var(ev).with(cnt, -1.0), Sense::Le, 0.0);

            if let Some(ct) = ctx.vars.changeover_time.get(&(l, t)).copied() {
                let mut row = LinearExpr::var(ct).with(cnt, -line.max_changeover_hours());
                if sequence_aware && line.has_pair_hours() {
                    row.add_expr(&transitions(ctx, &products, l, t), 1.0);
                }
                ctx.add(COUNT, format!("time[{}]", name), row, Sense::Eq, 0.0);
            }
        }
    }
    Ok(())
}

/// 相鄰配對的工時折讓：Σ (最長工時 − 配對工時) · 相鄰
///
/// 換線工時 = 最長工時 × 換線次數 − 折讓。相鄰旗標在排序變數為整數時恰為 0/1；
/// 跨閒置時段的換線沒有相鄰旗標，按最長工時計。
fn transitions(ctx: &mut ModelContext, products: &[usize], l: usize, t: usize) -> LinearExpr {
    let registry = ctx.registry;
    let line = &registry.lines[l];
    let max = line.max_changeover_hours();
    let mut discount = LinearExpr::new();

    for &p in products {
        for &q in products.iter().filter(|&&q| q != p) {
            let pair = format!("{}>{}:{}:{}", registry.products[p].id, registry.products[q].id, line.id, t);
            let saving = max - line.changeover_hours(p, q);

            for k in 0..line.positions().saturating_sub(1) {
                let (Some(adj), Some(before), Some(after)) = (
                    ctx.vars.adjacent.get(&(p, q, l, t, k)).copied(),
                    ctx.vars.pos(p, l, t, k),
                    ctx.vars.pos(q, l, t, k + 1),
                ) else {
                    continue;
                };
                link_pair(ctx, format!("{}:{}", pair, k), adj, before, after);
                discount.add_term(adj, saving);
            }

            let (Some(hand), Some(tail), Some(head)) = (
                ctx.vars.handover.get(&(p, q, l, t)).copied(),
                t.checked_sub(1).and_then(|prev| ctx.vars.slot_last.get(&(p, l, prev)).copied()),
                ctx.vars.pos(q, l, t, 0),
            ) else {
                continue;
            };
            link_pair(ctx, pair, hand, tail, head);
            discount.add_term(hand, saving);
        }
    }
    discount
}

/// z = a ∧ b
fn link_pair(ctx: &mut ModelContext, name: String, z: VarId, a: VarId, b: VarId) {
    ctx.add(COUNT, format!("pair_a[{}]", name), LinearExpr::var(z).with(a, -1.0), Sense::Le, 0.0);
    ctx.add(COUNT, format!("pair_b[{}]", name), LinearExpr::var(z).with(b, -1.0), Sense::Le, 0.0);
    ctx.add(
        COUNT,
        format!("pair_ab[{}]", name),
        LinearExpr::var(z).with(a, -1.0).with(b, -1.0),
        Sense::Ge,
        -1.0,
    );
}

/// 全廠換線總數 ≤ 上限
pub(crate) fn global_cap(ctx: &mut ModelContext) -> Result<()> {
    let cap = ctx.registry.global_changeover_cap as f64;
    let total = LinearExpr::sum(ctx.vars.changeover_count.values().copied(), 1.0);
    ctx.add(GLOBAL, "total", total, Sense::Le, cap);
    Ok(())
}
