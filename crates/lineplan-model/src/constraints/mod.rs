//! 約束管理器
//!
//! 以固定順序的管線建立所有約束族。每個階段宣告其相依（變數群組或前置產物），
//! 執行前逐一檢查，缺少時回傳建模錯誤，不會把不完整的模型交給求解器。

mod capacity;
mod changeover;
mod continuity;
mod directives;
mod volume;

pub(crate) use capacity::used_hours;

use lineplan_core::{ConstraintKind, Result};

use crate::context::ModelContext;
use crate::variables::VariableGroup;

/// 階段相依
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// 需要已宣告的變數群組
    Group(VariableGroup),
    /// 需要可用工時表
    CapacityTable,
}

/// 建模階段
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// 首/末時段扣減準備與清潔工時，產生可用工時表
    SetupCleanup,
    /// 產量、區塊起點、產線忙碌旗標與活動旗標的連結
    ActivityLinking,
    ProductionVolume,
    TimeCapacity,
    BlockContinuity,
    MultiProductSlot,
    Sequencing,
    /// 每時段換線計數（粗略或依順序）與每時段上限
    ChangeoverCount,
    GlobalChangeoverCap,
    LineDirectives,
}

impl Stage {
    /// 建模順序
    pub const PIPELINE: [Stage; 10] = [
        Stage::SetupCleanup,
        Stage::ActivityLinking,
        Stage::ProductionVolume,
        Stage::TimeCapacity,
        Stage::BlockContinuity,
        Stage::MultiProductSlot,
        Stage::Sequencing,
        Stage::ChangeoverCount,
        Stage::GlobalChangeoverCap,
        Stage::LineDirectives,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::SetupCleanup => "setup_cleanup",
            Stage::ActivityLinking => "activity_linking",
            Stage::ProductionVolume => "production_volume",
            Stage::TimeCapacity => "time_capacity",
            Stage::BlockContinuity => "block_continuity",
            Stage::MultiProductSlot => "multi_product_slot",
            Stage::Sequencing => "sequencing",
            Stage::ChangeoverCount => "changeover_count",
            Stage::GlobalChangeoverCap => "global_changeover_cap",
            Stage::LineDirectives => "line_directives",
        }
    }

    /// 對應的可開關約束族（結構性階段沒有）
    pub fn kind(&self) -> Option<ConstraintKind> {
        match self {
            Stage::SetupCleanup => Some(ConstraintKind::SetupCleanup),
            Stage::ActivityLinking | Stage::ChangeoverCount => None,
            Stage::ProductionVolume => Some(ConstraintKind::ProductionVolume),
            Stage::TimeCapacity => Some(ConstraintKind::TimeCapacity),
            Stage::BlockContinuity => Some(ConstraintKind::BlockContinuity),
            Stage::MultiProductSlot => Some(ConstraintKind::MultiProductSlot),
            Stage::Sequencing => Some(ConstraintKind::Sequencing),
            Stage::GlobalChangeoverCap => Some(ConstraintKind::GlobalChangeoverCap),
            Stage::LineDirectives => Some(ConstraintKind::LineDirectives),
        }
    }

    pub fn requirements(&self) -> &'static [Requirement] {
        use Requirement::*;
        use crate::variables::VariableGroup as G;
        match self {
            Stage::SetupCleanup => &[],
            Stage::ActivityLinking => &[
                CapacityTable,
                Group(G::Activity),
                Group(G::Quantity),
                Group(G::BlockStart),
                Group(G::Busy),
                Group(G::FirstBusy),
                Group(G::LastBusy),
            ],
            Stage::ProductionVolume => &[Group(G::Quantity), Group(G::BlockStart), Group(G::Deviation)],
            Stage::TimeCapacity => &[CapacityTable, Group(G::Quantity), Group(G::ChangeoverTime)],
            Stage::BlockContinuity => &[Group(G::Activity), Group(G::BlockStart)],
            Stage::MultiProductSlot => &[
                CapacityTable,
                Group(G::Activity),
                Group(G::Quantity),
                Group(G::MultiSlot),
            ],
            Stage::Sequencing => &[Group(G::Activity), Group(G::Position), Group(G::SlotLast)],
            Stage::ChangeoverCount => &[
                Group(G::Activity),
                Group(G::BlockStart),
                Group(G::FirstBusy),
                Group(G::ChangeoverCount),
                Group(G::ChangeoverEvent),
                Group(G::ChangeoverTime),
                Group(G::Position),
                Group(G::SlotLast),
                Group(G::Carryover),
                Group(G::Transition),
            ],
            Stage::GlobalChangeoverCap => &[Group(G::ChangeoverCount)],
            Stage::LineDirectives => &[
                Group(G::Activity),
                Group(G::BlockStart),
                Group(G::FirstBusy),
                Group(G::LastBusy),
                Group(G::Position),
                Group(G::SlotLast),
            ],
        }
    }

    /// 檢查相依
    pub fn check(&self, ctx: &ModelContext) -> Result<()> {
        for requirement in self.requirements() {
            match requirement {
                Requirement::Group(group) => ctx.vars.require(self.name(), *group)?,
                Requirement::CapacityTable => {
                    ctx.capacity(self.name())?;
                }
            }
        }
        Ok(())
    }

    fn build(&self, ctx: &mut ModelContext) -> Result<()> {
        match self {
            Stage::SetupCleanup => capacity::setup_cleanup(ctx),
            Stage::ActivityLinking => capacity::activity_linking(ctx),
            Stage::ProductionVolume => volume::production_volume(ctx),
            Stage::TimeCapacity => capacity::time_capacity(ctx),
            Stage::BlockContinuity => continuity::block_continuity(ctx),
            Stage::MultiProductSlot => continuity::multi_product_slot(ctx),
            Stage::Sequencing => changeover::sequencing(ctx),
            Stage::ChangeoverCount => changeover::changeover_count(ctx),
            Stage::GlobalChangeoverCap => changeover::global_cap(ctx),
            Stage::LineDirectives => directives::line_directives(ctx),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// 約束管理器
#[derive(Debug, Clone)]
pub struct ConstraintManager {
    stages: Vec<Stage>,
}

impl Default for ConstraintManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstraintManager {
    /// 完整管線
    pub fn new() -> Self {
        Self {
            stages: Stage::PIPELINE.to_vec(),
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// 依序建立所有約束族
    pub fn apply(&self, ctx: &mut ModelContext) -> Result<()> {
        tracing::debug!("開始建立約束：{} 個階段", self.stages.len());

        for (step, stage) in self.stages.iter().enumerate() {
            tracing::debug!("Step {}: {}", step + 1, stage);
            Self::apply_stage(*stage, ctx)?;
        }

        tracing::debug!("約束建立完成：共 {} 條", ctx.model.constraint_count());
        Ok(())
    }

    /// 單一階段：先檢查相依再建立
    pub fn apply_stage(stage: Stage, ctx: &mut ModelContext) -> Result<()> {
        stage.check(ctx)?;
        let before = ctx.model.constraint_count();
        stage.build(ctx)?;
        tracing::debug!(
            "{} 新增約束 {} 條",
            stage,
            ctx.model.constraint_count() - before
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use lineplan_core::{
        ChangeoverRule, ConstraintRegistry, Line, LineOverrides, LineRuleSet, OptimizerConfig,
        ProblemInstance, Product, TimeSlot,
    };
    use rust_decimal::Decimal;

    /// 單產線、兩產品、十個一小時時段
    pub fn two_product_registry(rules: LineRuleSet) -> ConstraintRegistry {
        let instance = ProblemInstance::new()
            .with_product(Product::new("A", Decimal::from(60)))
            .with_product(Product::new("B", Decimal::from(40)))
            .with_line(
                Line::new("L1")
                    .with_rate("A", 10.0)
                    .with_rate("B", 10.0)
                    .with_rules(rules),
            )
            .with_slots(TimeSlot::uniform(10, 1.0));
        ConstraintRegistry::build(&instance, &OptimizerConfig::default()).unwrap()
    }

    /// 同上，但 A 為 cup、B 為 bowl，開啟排序，預設換線 0.5 小時
    pub fn categorized_registry(rules: Vec<ChangeoverRule>) -> ConstraintRegistry {
        let line_rules = LineRuleSet::default().with_sequencing().with_overrides(LineOverrides {
            changeover_hours: Some(0.5),
            changeover_rules: Some(rules),
            ..Default::default()
        });
        let instance = ProblemInstance::new()
            .with_product(Product::new("A", Decimal::from(60)).with_category("cup"))
            .with_product(Product::new("B", Decimal::from(40)).with_category("bowl"))
            .with_line(
                Line::new("L1")
                    .with_rate("A", 10.0)
                    .with_rate("B", 10.0)
                    .with_rules(line_rules),
            )
            .with_slots(TimeSlot::uniform(10, 1.0));
        ConstraintRegistry::build(&instance, &OptimizerConfig::default()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::two_product_registry;
    use super::*;
    use lineplan_core::{LineRuleSet, ScheduleError};

    #[test]
    fn test_full_pipeline() {
        let registry = two_product_registry(LineRuleSet::default());
        let mut ctx = ModelContext::with_variables(&registry);
        ConstraintManager::new().apply(&mut ctx).unwrap();

        let counts = ctx.constraint_counts();
        assert!(counts.contains_key("production_volume"));
        assert!(counts.contains_key("block_continuity"));
        assert!(counts.contains_key("global_changeover_cap"));
        // 無指令時不建立指令約束
        assert!(!counts.contains_key("line_directives"));
    }

    #[test]
    fn test_block_continuity_without_block_start() {
        let registry = two_product_registry(LineRuleSet::default());
        let groups: Vec<VariableGroup> = VariableGroup::ALL
            .iter()
            .copied()
            .filter(|g| *g != VariableGroup::BlockStart)
            .collect();
        let mut ctx = ModelContext::with_groups(&registry, &groups);

        let err = ConstraintManager::apply_stage(Stage::BlockContinuity, &mut ctx).unwrap_err();
        assert!(matches!(
            err,
            ScheduleError::MissingVariableGroup { ref family, ref group }
                if family == "block_continuity" && group == "block_start"
        ));
        // 建模錯誤發生時不會留下任何約束
        assert_eq!(ctx.model.constraint_count(), 0);
    }

    #[test]
    fn test_time_capacity_requires_setup_cleanup() {
        let registry = two_product_registry(LineRuleSet::default());
        let mut ctx = ModelContext::with_variables(&registry);

        let err = ConstraintManager::apply_stage(Stage::TimeCapacity, &mut ctx).unwrap_err();
        assert!(matches!(err, ScheduleError::MissingArtifact { .. }));

        ConstraintManager::apply_stage(Stage::SetupCleanup, &mut ctx).unwrap();
        assert!(ConstraintManager::apply_stage(Stage::TimeCapacity, &mut ctx).is_ok());
    }

    #[test]
    fn test_pipeline_order() {
        let stages = ConstraintManager::new().stages().to_vec();
        let position = |s: Stage| stages.iter().position(|x| *x == s).unwrap();
        assert!(position(Stage::SetupCleanup) < position(Stage::TimeCapacity));
        assert!(position(Stage::ActivityLinking) < position(Stage::BlockContinuity));
        assert!(position(Stage::Sequencing) < position(Stage::ChangeoverCount));
        assert!(position(Stage::ChangeoverCount) < position(Stage::GlobalChangeoverCap));
    }
}
