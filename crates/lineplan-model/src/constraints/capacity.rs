//! 工時相關約束：準備/清潔、活動連結、時段工時上下限

use lineplan_core::{ConstraintKind, Result, ScheduleError};

use crate::context::{CapacityTable, ModelContext};
use crate::linear::{LinearExpr, Sense};

const SETUP_CLEANUP: &str = "setup_cleanup";
const LINKING: &str = "activity_linking";
const TIME_CAPACITY: &str = "time_capacity";

/// 首時段扣準備工時、末時段扣清潔工時
pub(crate) fn setup_cleanup(ctx: &mut ModelContext) -> Result<()> {
    let registry = ctx.registry;
    let mut available = Vec::with_capacity(registry.lines.len());

    for line in &registry.lines {
        let mut hours = registry.slot_hours.clone();
        if line.is_enabled(ConstraintKind::SetupCleanup) {
            hours[line.setup_slot] -= line.params.setup_hours;
            hours[line.cleanup_slot] -= line.params.cleanup_hours;
        }

        for (slot, h) in hours.iter_mut().enumerate() {
            if *h < -1e-9 {
                return Err(ScheduleError::NegativeCapacity {
                    line: line.id.clone(),
                    slot,
                    available: *h,
                });
            }
            *h = h.max(0.0);
        }
        available.push(hours);
    }

    ctx.set_capacity(CapacityTable::new(available));
    tracing::debug!("{}: 可用工時表已建立", SETUP_CLEANUP);
    Ok(())
}

/// 產量與活動旗標、區塊起點、產線忙碌旗標的結構性連結
pub(crate) fn activity_linking(ctx: &mut ModelContext) -> Result<()> {
    let registry = ctx.registry;
    let slots = registry.slot_count();

    for line in &registry.lines {
        let l = line.index;
        let products: Vec<usize> = line.products().collect();
        let min_hours = line.params.min_active_hours;

        for t in 0..slots {
            let busy = ctx.vars.busy[&(l, t)];
            let mut any_active = LinearExpr::new();

            for &p in &products {
                let (Some(x), Some(q), Some(s)) = (ctx.vars.x(p, l, t), ctx.vars.q(p, l, t), ctx.vars.s(p, l, t))
                else {
                    continue;
                };
                let name = format!("{}:{}:{}", registry.products[p].id, line.id, t);

                // q ≤ cap·x
                let cap = ctx.quantity_cap(p, l, t);
                ctx.add(LINKING, format!("q_cap[{}]", name), LinearExpr::var(q).with(x, -cap), Sense::Le, 0.0);

                // q ≥ rate·min_hours·x
                if min_hours > 0.0 {
                    let floor = (line.rate(p).unwrap_or(0.0) * min_hours).min(cap);
                    ctx.add(LINKING, format!("q_min[{}]", name), LinearExpr::var(q).with(x, -floor), Sense::Ge, 0.0);
                }

                // busy ≥ x
                ctx.add(LINKING, format!("busy_ge[{}]", name), LinearExpr::var(busy).with(x, -1.0), Sense::Ge, 0.0);
                any_active.add_term(x, 1.0);

                // s 只在產品開始生產的時段為 1
                if t == 0 {
                    ctx.add(LINKING, format!("start0[{}]", name), LinearExpr::var(s).with(x, -1.0), Sense::Eq, 0.0);
                } else if let Some(prev) = ctx.vars.x(p, l, t - 1) {
                    ctx.add(
                        LINKING,
                        format!("start_ge[{}]", name),
                        LinearExpr::var(s).with(x, -1.0).with(prev, 1.0),
                        Sense::Ge,
                        0.0,
                    );
                    ctx.add(LINKING, format!("start_le[{}]", name), LinearExpr::var(s).with(x, -1.0), Sense::Le, 0.0);
                    ctx.add(LINKING, format!("start_new[{}]", name), LinearExpr::var(s).with(prev, 1.0), Sense::Le, 1.0);
                }
            }

            // busy ≤ Σx
            let mut busy_le = LinearExpr::var(busy);
            busy_le.add_expr(&any_active, -1.0);
            ctx.add(LINKING, format!("busy_le[{}:{}]", line.id, t), busy_le, Sense::Le, 0.0);
        }

        link_first_busy(ctx, l)?;
        if line.needs_last_busy() {
            link_last_busy(ctx, l)?;
        }
    }
    Ok(())
}

/// first[t] 恰好標記產線第一個生產時段
fn link_first_busy(ctx: &mut ModelContext, l: usize) -> Result<()> {
    let registry = ctx.registry;
    let line = &registry.lines[l];
    let slots = registry.slot_count();
    let mut total = LinearExpr::new();

    for t in 0..slots {
        let busy = ctx.vars.busy[&(l, t)];
        let first = ctx.vars.first_busy[&(l, t)];
        let before = ctx.vars.busy_before[&(l, t)];
        total.add_term(first, 1.0);

        ctx.add(LINKING, format!("first_busy[{}:{}]", line.id, t), LinearExpr::var(first).with(busy, -1.0), Sense::Le, 0.0);
        ctx.add(LINKING, format!("before_busy[{}:{}]", line.id, t), LinearExpr::var(before).with(busy, -1.0), Sense::Ge, 0.0);
        if t > 0 {
            let prev = ctx.vars.busy_before[&(l, t - 1)];
            ctx.add(LINKING, format!("before_mono[{}:{}]", line.id, t), LinearExpr::var(before).with(prev, -1.0), Sense::Ge, 0.0);
            ctx.add(LINKING, format!("first_once[{}:{}]", line.id, t), LinearExpr::var(first).with(prev, 1.0), Sense::Le, 1.0);
        }
    }

    ctx.add(LINKING, format!("first_sum[{}]", line.id), total.clone(), Sense::Le, 1.0);
    for t in 0..slots {
        let busy = ctx.vars.busy[&(l, t)];
        let mut expr = total.clone();
        expr.add_term(busy, -1.0);
        ctx.add(LINKING, format!("first_any[{}:{}]", line.id, t), expr, Sense::Ge, 0.0);
    }
    Ok(())
}

/// last[t] 恰好標記產線最後一個生產時段
fn link_last_busy(ctx: &mut ModelContext, l: usize) -> Result<()> {
    let registry = ctx.registry;
    let line = &registry.lines[l];
    let slots = registry.slot_count();
    let mut total = LinearExpr::new();

    for t in (0..slots).rev() {
        let busy = ctx.vars.busy[&(l, t)];
        let last = ctx.vars.last_busy[&(l, t)];
        let after = ctx.vars.busy_after[&(l, t)];
        total.add_term(last, 1.0);

        ctx.add(LINKING, format!("last_busy[{}:{}]", line.id, t), LinearExpr::var(last).with(busy, -1.0), Sense::Le, 0.0);
        ctx.add(LINKING, format!("after_busy[{}:{}]", line.id, t), LinearExpr::var(after).with(busy, -1.0), Sense::Ge, 0.0);
        if t + 1 < slots {
            let next = ctx.vars.busy_after[&(l, t + 1)];
            ctx.add(LINKING, format!("after_mono[{}:{}]", line.id, t), LinearExpr::var(after).with(next, -1.0), Sense::Ge, 0.0);
            ctx.add(LINKING, format!("last_once[{}:{}]", line.id, t), LinearExpr::var(last).with(next, 1.0), Sense::Le, 1.0);
        }
    }

    ctx.add(LINKING, format!("last_sum[{}]", line.id), total.clone(), Sense::Le, 1.0);
    for t in 0..slots {
        let busy = ctx.vars.busy[&(l, t)];
        let mut expr = total.clone();
        expr.add_term(busy, -1.0);
        ctx.add(LINKING, format!("last_any[{}:{}]", line.id, t), expr, Sense::Ge, 0.0);
    }
    Ok(())
}

/// 時段工時：min_util·可用 ≤ Σ q/rate + 換線工時 ≤ max_util·可用
pub(crate) fn time_capacity(ctx: &mut ModelContext) -> Result<()> {
    let registry = ctx.registry;
    let capacity = ctx.capacity(TIME_CAPACITY)?.clone();

    for line in &registry.lines {
        if !line.is_enabled(ConstraintKind::TimeCapacity) {
            continue;
        }
        let l = line.index;

        for t in 0..registry.slot_count() {
            let used = used_hours(ctx, l, t);
            let available = capacity.hours(l, t);
            let (min_util, max_util) = line.utilization_bounds(t);
            let name = format!("{}:{}", line.id, t);

            ctx.add(
                TIME_CAPACITY,
                format!("max_util[{}]", name),
                used.clone(),
                Sense::Le,
                max_util * available,
            );
            if min_util > 0.0 {
                ctx.add(
                    TIME_CAPACITY,
                    format!("min_util[{}]", name),
                    used,
                    Sense::Ge,
                    min_util * available,
                );
            }
        }
    }
    Ok(())
}

/// 某產線某時段使用的工時（生產 + 換線）
pub(crate) fn used_hours(ctx: &ModelContext, l: usize, t: usize) -> LinearExpr {
    let registry = ctx.registry;
    let line = &registry.lines[l];
    let mut used = LinearExpr::new();
    for (p, rate) in &line.rates {
        if let Some(q) = ctx.vars.q(*p, l, t) {
            used.add_term(q, 1.0 / rate);
        }
    }
    if let Some(ct) = ctx.vars.changeover_time.get(&(l, t)) {
        used.add_term(*ct, 1.0);
    }
    used
}
