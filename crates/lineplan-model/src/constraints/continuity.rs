//! 區塊連續性與共用時段

use lineplan_core::{ConstraintKind, Result};

use crate::context::ModelContext;
use crate::linear::{LinearExpr, Sense};

const BLOCK: &str = "block_continuity";
const MULTI: &str = "multi_product_slot";

/// 每個產品在每條產線上只有一個區塊，且區塊至少 N 個時段（到期末為止可截短）
///
/// N 超過整個期間時該組合不可生產。
pub(crate) fn block_continuity(ctx: &mut ModelContext) -> Result<()> {
    let registry = ctx.registry;
    let slots = registry.slot_count();

    for line in &registry.lines {
        if !line.is_enabled(ConstraintKind::BlockContinuity) {
            continue;
        }
        let l = line.index;

        for p in line.products() {
            let product = &registry.products[p];
            let required = product.required_slots.get(&l).copied().unwrap_or(1);
            let name = format!("{}:{}", product.id, line.id);

            if required > slots {
                tracing::debug!(
                    "{} 需要 {} 個時段，超過期間 {}，禁止生產",
                    name,
                    required,
                    slots
                );
                for t in 0..slots {
                    if let Some(x) = ctx.vars.x(p, l, t) {
                        ctx.add(BLOCK, format!("too_long[{}:{}]", name, t), LinearExpr::var(x), Sense::Le, 0.0);
                    }
                }
                continue;
            }

            let starts = LinearExpr::sum((0..slots).filter_map(|t| ctx.vars.s(p, l, t)), 1.0);
            ctx.add(BLOCK, format!("single_block[{}]", name), starts, Sense::Le, 1.0);

            for t in 0..slots {
                let Some(s) = ctx.vars.s(p, l, t) else {
                    continue;
                };
                let end = (t + required - 1).min(slots - 1);
                for k in t + 1..=end {
                    if let Some(x) = ctx.vars.x(p, l, k) {
                        ctx.add(
                            BLOCK,
                            format!("min_run[{}:{}:{}]", name, t, k),
                            LinearExpr::var(x).with(s, -1.0),
                            Sense::Ge,
                            0.0,
                        );
                    }
                }
            }
        }
    }
    Ok(())
}

/// 一個時段最多一個產品，除非共用旗標開啟且每個產品都在少量門檻以下
///
/// 未啟用時每時段只能有一個產品；單一產品的產線不需要任何約束。
pub(crate) fn multi_product_slot(ctx: &mut ModelContext) -> Result<()> {
    let registry = ctx.registry;

    for line in &registry.lines {
        let l = line.index;
        let products: Vec<usize> = line.products().collect();
        if products.len() < 2 {
            continue;
        }

        for t in 0..registry.slot_count() {
            let name = format!("{}:{}", line.id, t);
            let active = LinearExpr::sum(products.iter().filter_map(|&p| ctx.vars.x(p, l, t)), 1.0);

            let Some(multi) = ctx.vars.multi_slot.get(&(l, t)).copied() else {
                ctx.add(MULTI, format!("single[{}]", name), active, Sense::Le, 1.0);
                continue;
            };

            // Σx ≤ 1 + (K−1)·m
            let extra = (line.positions() - 1) as f64;
            let mut limit = active;
            limit.add_term(multi, -extra);
            ctx.add(MULTI, format!("limit[{}]", name), limit, Sense::Le, 1.0);

            // 共用時段內每個產品的產量 ≤ 少量門檻
            for &p in &products {
                let Some(q) = ctx.vars.q(p, l, t) else {
                    continue;
                };
                let cap = ctx.quantity_cap(p, l, t);
                let threshold = registry.products[p].minor_threshold(l);
                if threshold < cap {
                    ctx.add(
                        MULTI,
                        format!("minor[{}:{}]", registry.products[p].id, name),
                        LinearExpr::var(q).with(multi, cap - threshold),
                        Sense::Le,
                        cap,
                    );
                }
            }
        }
    }
    Ok(())
}
