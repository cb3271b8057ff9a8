use serde::{Deserialize, Serialize};

use super::content::{AbilityDef, AbilityEffect, Affinity, CardId};
use super::state::{MatchState, PlayerId};

/// 单位、增益与环境技能的触发器。陷阱使用独立的 [`TrapTrigger`]。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AbilityTrigger {
    /// 该单位入场时。
    Summon,
    /// 己方其他单位入场时。
    AllySummoned,
    /// 该单位宣告攻击时。
    Attack,
    /// 该单位受到伤害后。
    Damaged,
    /// 该单位被消灭后。
    Destroyed,
    /// 控制者回合开始。
    TurnStart,
    /// 对手回合开始。
    EnemyTurnStart,
    /// 控制者回合结束。
    TurnEnd,
    /// 对手回合结束。
    EnemyTurnEnd,
    /// 任意玩家回合开始（环境卡用）。
    EveryTurnStart,
    /// 任意玩家回合结束（环境卡用）。
    EveryTurnEnd,
    /// 环境/增益卡放置时。
    Install,
    /// 法术卡结算。
    Cast,
    /// 持续效果，从不派发，仅被扫描。
    Passive,
}

/// 陷阱卡自动激活的时机。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TrapTrigger {
    CreaturePlay,
    EnvironmentPlay,
    Attack,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StatKind {
    Attack,
    Health,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ModifierDuration {
    EndOfTurn,
    WhileOnField,
    Permanent,
}

/// 单位身上的状态计数类型。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CounterKind {
    /// 每回合开始造成等同数量的伤害。
    Burn,
    /// 无法攻击，剩余回合数每回合递减。
    Immobilize,
    /// 技能不再派发。
    Silence,
    /// 免疫一切伤害。
    Immunity,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum AttackModifier {
    AttackFirst,
    CannotBeCountered,
    DamageMultiplier { percent: u16 },
    AttackTwice,
    InstantDestroy,
}

/// 效果的目标选择器，封闭集合。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum EffectTarget {
    SelfUnit,
    Chosen,
    AllAllies,
    AllEnemies,
    AllUnits,
    OwnPlayer,
    EnemyPlayer,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum EffectCondition {
    AffinityIs { affinity: Affinity },
    AlliesAtLeast { count: usize },
    EnemiesAtLeast { count: usize },
    PlayerHealthBelow { target: EffectTarget, threshold: i16 },
    Any { conditions: Vec<EffectCondition> },
    All { conditions: Vec<EffectCondition> },
}

impl EffectCondition {
    pub fn is_met(&self, ctx: &AbilityContext, state: &MatchState) -> bool {
        match self {
            EffectCondition::AffinityIs { affinity } => ctx
                .source_unit(state)
                .map(|unit| unit.affinity == *affinity)
                .unwrap_or(false),
            EffectCondition::AlliesAtLeast { count } => {
                state.players[ctx.source_player as usize].unit_count() >= *count
            }
            EffectCondition::EnemiesAtLeast { count } => {
                state.players[state.opponent_of(ctx.source_player) as usize].unit_count() >= *count
            }
            EffectCondition::PlayerHealthBelow { target, threshold } => {
                resolve_player(target, ctx, state)
                    .map(|id| state.players[id as usize].health < *threshold)
                    .unwrap_or(false)
            }
            EffectCondition::Any { conditions } => {
                conditions.iter().any(|condition| condition.is_met(ctx, state))
            }
            EffectCondition::All { conditions } => {
                conditions.iter().all(|condition| condition.is_met(ctx, state))
            }
        }
    }
}

/// 效果种类。未识别的内容反序列化为 `Unknown`，结算时跳过。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum EffectKind {
    ModifyStat {
        target: EffectTarget,
        stat: StatKind,
        delta: i16,
        duration: ModifierDuration,
    },
    DealDamage {
        target: EffectTarget,
        amount: i16,
    },
    Heal {
        target: EffectTarget,
        amount: i16,
    },
    DrawCards {
        target: EffectTarget,
        count: u8,
    },
    GainResource {
        target: EffectTarget,
        amount: u8,
    },
    RemoveCounter {
        target: EffectTarget,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        counter: Option<CounterKind>,
    },
    GrantImmunity {
        target: EffectTarget,
        turns: u8,
    },
    PreventAttack {
        target: EffectTarget,
        turns: u8,
    },
    PreventAbilities {
        target: EffectTarget,
        turns: u8,
    },
    InflictCounter {
        target: EffectTarget,
        counter: CounterKind,
        amount: i16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        turns: Option<u8>,
    },
    AttackModifier {
        modifier: AttackModifier,
    },
    SwapPositions {
        target: EffectTarget,
    },
    SearchDeck {
        card_id: CardId,
    },
    NullifyEffect,
    #[serde(other)]
    Unknown,
}

/// 被选中的具体目标。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetRef {
    pub player: PlayerId,
    /// `None` 表示玩家本体。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<usize>,
}

impl TargetRef {
    pub fn player(player: PlayerId) -> Self {
        Self { player, slot: None }
    }

    pub fn unit(player: PlayerId, slot: usize) -> Self {
        Self {
            player,
            slot: Some(slot),
        }
    }
}

/// 一次技能结算的调用上下文。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AbilityContext {
    pub trigger: AbilityTrigger,
    pub source_player: PlayerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_slot: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetRef>,
    pub current_player: PlayerId,
}

impl AbilityContext {
    pub fn new(trigger: AbilityTrigger, source_player: PlayerId, current_player: PlayerId) -> Self {
        Self {
            trigger,
            source_player,
            source_slot: None,
            target: None,
            current_player,
        }
    }

    pub fn with_source_slot(mut self, slot: usize) -> Self {
        self.source_slot = Some(slot);
        self
    }

    pub fn with_target(mut self, target: TargetRef) -> Self {
        self.target = Some(target);
        self
    }

    fn source_unit<'a>(&self, state: &'a MatchState) -> Option<&'a super::state::Unit> {
        let slot = self.source_slot?;
        state.players[self.source_player as usize].battlefield[slot].as_ref()
    }
}

/// 引擎负责应用的状态增量。处理器只描述，从不修改。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum StateDelta {
    UnitStat {
        player: PlayerId,
        slot: usize,
        stat: StatKind,
        delta: i16,
        duration: ModifierDuration,
    },
    UnitDamage {
        player: PlayerId,
        slot: usize,
        amount: i16,
    },
    UnitHeal {
        player: PlayerId,
        slot: usize,
        amount: i16,
    },
    PlayerDamage {
        player: PlayerId,
        amount: i16,
    },
    PlayerHeal {
        player: PlayerId,
        amount: i16,
    },
    DrawCards {
        player: PlayerId,
        count: u8,
    },
    GainResource {
        player: PlayerId,
        amount: u8,
    },
    CounterApplied {
        player: PlayerId,
        slot: usize,
        counter: CounterKind,
        amount: i16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        turns: Option<u8>,
    },
    CounterRemoved {
        player: PlayerId,
        slot: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        counter: Option<CounterKind>,
    },
    SwapSlots {
        player: PlayerId,
        slot_a: usize,
        slot_b: usize,
    },
    SearchDeck {
        player: PlayerId,
        card_id: CardId,
    },
    Nullify,
}

/// 每个效果产出一条结果记录。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EffectOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deltas: Vec<StateDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl EffectOutcome {
    fn applied(deltas: Vec<StateDelta>) -> Self {
        Self {
            success: !deltas.is_empty(),
            deltas,
            message: None,
        }
    }

    fn skipped(message: impl Into<String>) -> Self {
        Self {
            success: false,
            deltas: Vec::new(),
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolved {
    Unit { player: PlayerId, slot: usize },
    Player { player: PlayerId },
}

fn resolve_player(
    target: &EffectTarget,
    ctx: &AbilityContext,
    state: &MatchState,
) -> Option<PlayerId> {
    match target {
        EffectTarget::OwnPlayer | EffectTarget::SelfUnit | EffectTarget::AllAllies => {
            Some(ctx.source_player)
        }
        EffectTarget::EnemyPlayer | EffectTarget::AllEnemies => {
            Some(state.opponent_of(ctx.source_player))
        }
        EffectTarget::Chosen => ctx.target.map(|t| t.player),
        EffectTarget::AllUnits => None,
    }
}

fn resolve_targets(
    target: &EffectTarget,
    ctx: &AbilityContext,
    state: &MatchState,
) -> Vec<Resolved> {
    let own = ctx.source_player;
    let enemy = state.opponent_of(own);
    match target {
        EffectTarget::SelfUnit => ctx
            .source_slot
            .filter(|slot| state.players[own as usize].battlefield[*slot].is_some())
            .map(|slot| vec![Resolved::Unit { player: own, slot }])
            .unwrap_or_default(),
        EffectTarget::Chosen => match ctx.target {
            Some(TargetRef {
                player,
                slot: Some(slot),
            }) if state.unit(player, slot).is_some() => {
                vec![Resolved::Unit { player, slot }]
            }
            Some(TargetRef { player, slot: None }) => vec![Resolved::Player { player }],
            _ => Vec::new(),
        },
        EffectTarget::AllAllies => occupied_slots(state, own),
        EffectTarget::AllEnemies => occupied_slots(state, enemy),
        EffectTarget::AllUnits => {
            let mut all = occupied_slots(state, own);
            all.extend(occupied_slots(state, enemy));
            all
        }
        EffectTarget::OwnPlayer => vec![Resolved::Player { player: own }],
        EffectTarget::EnemyPlayer => vec![Resolved::Player { player: enemy }],
    }
}

fn occupied_slots(state: &MatchState, player: PlayerId) -> Vec<Resolved> {
    state.players[player as usize]
        .battlefield
        .iter()
        .enumerate()
        .filter(|(_, slot)| slot.is_some())
        .map(|(slot, _)| Resolved::Unit { player, slot })
        .collect()
}

/// 纯求值：对一条技能按声明顺序评估每个效果，产出状态增量记录。
/// 调用方负责按触发器预筛技能，也负责应用返回的增量。
pub fn process_ability(
    ability: &AbilityDef,
    ctx: &AbilityContext,
    state: &MatchState,
) -> Vec<EffectOutcome> {
    process_effects(&ability.effects, ctx, state)
}

pub fn process_effects(
    effects: &[AbilityEffect],
    ctx: &AbilityContext,
    state: &MatchState,
) -> Vec<EffectOutcome> {
    effects
        .iter()
        .map(|effect| process_effect(effect, ctx, state))
        .collect()
}

fn process_effect(
    effect: &AbilityEffect,
    ctx: &AbilityContext,
    state: &MatchState,
) -> EffectOutcome {
    if let Some(condition) = &effect.condition {
        if !condition.is_met(ctx, state) {
            return EffectOutcome::skipped("condition not met");
        }
    }

    match &effect.kind {
        EffectKind::ModifyStat {
            target,
            stat,
            delta,
            duration,
        } => EffectOutcome::applied(unit_deltas(target, ctx, state, |player, slot| {
            StateDelta::UnitStat {
                player,
                slot,
                stat: *stat,
                delta: *delta,
                duration: *duration,
            }
        })),
        EffectKind::DealDamage { target, amount } => EffectOutcome::applied(
            resolve_targets(target, ctx, state)
                .into_iter()
                .map(|resolved| match resolved {
                    Resolved::Unit { player, slot } => StateDelta::UnitDamage {
                        player,
                        slot,
                        amount: *amount,
                    },
                    Resolved::Player { player } => StateDelta::PlayerDamage {
                        player,
                        amount: *amount,
                    },
                })
                .collect(),
        ),
        EffectKind::Heal { target, amount } => EffectOutcome::applied(
            resolve_targets(target, ctx, state)
                .into_iter()
                .map(|resolved| match resolved {
                    Resolved::Unit { player, slot } => StateDelta::UnitHeal {
                        player,
                        slot,
                        amount: *amount,
                    },
                    Resolved::Player { player } => StateDelta::PlayerHeal {
                        player,
                        amount: *amount,
                    },
                })
                .collect(),
        ),
        EffectKind::DrawCards { target, count } => EffectOutcome::applied(
            resolve_player(target, ctx, state)
                .map(|player| {
                    vec![StateDelta::DrawCards {
                        player,
                        count: *count,
                    }]
                })
                .unwrap_or_default(),
        ),
        EffectKind::GainResource { target, amount } => EffectOutcome::applied(
            resolve_player(target, ctx, state)
                .map(|player| {
                    vec![StateDelta::GainResource {
                        player,
                        amount: *amount,
                    }]
                })
                .unwrap_or_default(),
        ),
        EffectKind::RemoveCounter { target, counter } => {
            EffectOutcome::applied(unit_deltas(target, ctx, state, |player, slot| {
                StateDelta::CounterRemoved {
                    player,
                    slot,
                    counter: *counter,
                }
            }))
        }
        EffectKind::GrantImmunity { target, turns } => {
            EffectOutcome::applied(unit_deltas(target, ctx, state, |player, slot| {
                StateDelta::CounterApplied {
                    player,
                    slot,
                    counter: CounterKind::Immunity,
                    amount: 0,
                    turns: Some(*turns),
                }
            }))
        }
        EffectKind::PreventAttack { target, turns } => {
            EffectOutcome::applied(unit_deltas(target, ctx, state, |player, slot| {
                StateDelta::CounterApplied {
                    player,
                    slot,
                    counter: CounterKind::Immobilize,
                    amount: 0,
                    turns: Some(*turns),
                }
            }))
        }
        EffectKind::PreventAbilities { target, turns } => {
            EffectOutcome::applied(unit_deltas(target, ctx, state, |player, slot| {
                StateDelta::CounterApplied {
                    player,
                    slot,
                    counter: CounterKind::Silence,
                    amount: 0,
                    turns: Some(*turns),
                }
            }))
        }
        EffectKind::InflictCounter {
            target,
            counter,
            amount,
            turns,
        } => EffectOutcome::applied(unit_deltas(target, ctx, state, |player, slot| {
            StateDelta::CounterApplied {
                player,
                slot,
                counter: *counter,
                amount: *amount,
                turns: *turns,
            }
        })),
        // 攻击修正不产生增量，战斗结算直接扫描它们。
        EffectKind::AttackModifier { .. } => EffectOutcome::skipped("passive attack modifier"),
        EffectKind::SwapPositions { target } => {
            let source = ctx.source_slot;
            let other = resolve_targets(target, ctx, state)
                .into_iter()
                .find_map(|resolved| match resolved {
                    Resolved::Unit { player, slot }
                        if player == ctx.source_player && Some(slot) != source =>
                    {
                        Some(slot)
                    }
                    _ => None,
                });
            match (source, other) {
                (Some(slot_a), Some(slot_b)) => EffectOutcome::applied(vec![StateDelta::SwapSlots {
                    player: ctx.source_player,
                    slot_a,
                    slot_b,
                }]),
                _ => EffectOutcome::skipped("no valid swap target"),
            }
        }
        EffectKind::SearchDeck { card_id } => {
            EffectOutcome::applied(vec![StateDelta::SearchDeck {
                player: ctx.source_player,
                card_id: *card_id,
            }])
        }
        EffectKind::NullifyEffect => EffectOutcome::applied(vec![StateDelta::Nullify]),
        EffectKind::Unknown => EffectOutcome::skipped("unrecognized effect kind"),
    }
}

fn unit_deltas<F>(
    target: &EffectTarget,
    ctx: &AbilityContext,
    state: &MatchState,
    make: F,
) -> Vec<StateDelta>
where
    F: Fn(PlayerId, usize) -> StateDelta,
{
    resolve_targets(target, ctx, state)
        .into_iter()
        .filter_map(|resolved| match resolved {
            Resolved::Unit { player, slot } => Some(make(player, slot)),
            Resolved::Player { .. } => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::content::AbilityEffect;
    use crate::game::state::MatchState;

    fn two_unit_state() -> MatchState {
        let mut state = MatchState::bare(["A", "B"]);
        state.spawn_for_test(0, 0, 3, 2);
        state.spawn_for_test(1, 1, 2, 3);
        state
    }

    #[test]
    fn chosen_selector_resolves_unit_then_player() {
        let state = two_unit_state();
        let ctx =
            AbilityContext::new(AbilityTrigger::Cast, 0, 0).with_target(TargetRef::unit(1, 1));
        let effect = AbilityEffect::new(EffectKind::DealDamage {
            target: EffectTarget::Chosen,
            amount: 3,
        });

        let outcome = process_effects(std::slice::from_ref(&effect), &ctx, &state);
        assert_eq!(
            outcome[0].deltas,
            vec![StateDelta::UnitDamage {
                player: 1,
                slot: 1,
                amount: 3
            }]
        );

        let ctx = AbilityContext::new(AbilityTrigger::Cast, 0, 0).with_target(TargetRef::player(1));
        let outcome = process_effects(std::slice::from_ref(&effect), &ctx, &state);
        assert_eq!(
            outcome[0].deltas,
            vec![StateDelta::PlayerDamage {
                player: 1,
                amount: 3
            }]
        );
    }

    #[test]
    fn failed_condition_is_a_no_op_not_an_error() {
        let state = two_unit_state();
        let ctx = AbilityContext::new(AbilityTrigger::Cast, 0, 0);
        let effect = AbilityEffect::new(EffectKind::DealDamage {
            target: EffectTarget::EnemyPlayer,
            amount: 5,
        })
        .when(EffectCondition::EnemiesAtLeast { count: 3 });

        let outcome = process_effects(std::slice::from_ref(&effect), &ctx, &state);
        assert!(!outcome[0].success);
        assert!(outcome[0].deltas.is_empty());
        assert!(outcome[0].message.is_some());
    }

    #[test]
    fn all_units_hits_both_sides() {
        let state = two_unit_state();
        let ctx = AbilityContext::new(AbilityTrigger::EveryTurnStart, 0, 0);
        let effect = AbilityEffect::new(EffectKind::DealDamage {
            target: EffectTarget::AllUnits,
            amount: 1,
        });

        let outcome = process_effects(std::slice::from_ref(&effect), &ctx, &state);
        assert_eq!(outcome[0].deltas.len(), 2);
    }

    #[test]
    fn effects_resolve_in_declared_order() {
        let state = two_unit_state();
        let ctx = AbilityContext::new(AbilityTrigger::Cast, 0, 0);
        let effects = vec![
            AbilityEffect::new(EffectKind::Heal {
                target: EffectTarget::OwnPlayer,
                amount: 2,
            }),
            AbilityEffect::new(EffectKind::DrawCards {
                target: EffectTarget::OwnPlayer,
                count: 1,
            }),
        ];

        let outcomes = process_effects(&effects, &ctx, &state);
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(
            outcomes[0].deltas[0],
            StateDelta::PlayerHeal { .. }
        ));
        assert!(matches!(
            outcomes[1].deltas[0],
            StateDelta::DrawCards { .. }
        ));
    }

    #[test]
    fn unknown_effect_kind_is_skipped_with_message() {
        let json = r#"{"kind":{"type":"SummonToken","template":"wisp"}}"#;
        let effect: AbilityEffect = serde_json::from_str(json).expect("forward-compatible parse");
        assert_eq!(effect.kind, EffectKind::Unknown);

        let state = two_unit_state();
        let ctx = AbilityContext::new(AbilityTrigger::Cast, 0, 0);
        let outcome = process_effects(std::slice::from_ref(&effect), &ctx, &state);
        assert!(!outcome[0].success);
        assert!(outcome[0]
            .message
            .as_deref()
            .unwrap_or("")
            .contains("unrecognized"));
    }
}
