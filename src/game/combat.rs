use serde::{Deserialize, Serialize};

use super::content::ContentSource;
use super::effects::{
    AbilityContext, AbilityTrigger, AttackModifier, CounterKind, EffectKind,
};
use super::leveling;
use super::state::{MatchState, PlayerId};

/// 终局判定。双方生命同时归零记为平局。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum MatchOutcome {
    Winner { player: PlayerId },
    Draw,
}

/// 任意一方生命值归零即满足结束条件。
pub fn is_over(state: &MatchState) -> bool {
    state.players.iter().any(|player| player.health <= 0)
}

pub fn classify(state: &MatchState) -> Option<MatchOutcome> {
    let p0_down = state.players[0].health <= 0;
    let p1_down = state.players[1].health <= 0;
    match (p0_down, p1_down) {
        (true, true) => Some(MatchOutcome::Draw),
        (true, false) => Some(MatchOutcome::Winner { player: 1 }),
        (false, true) => Some(MatchOutcome::Winner { player: 0 }),
        (false, false) => None,
    }
}

/// 指定槽位单位当前生效的攻击修正，附带条件逐条求值。
/// 被沉默的单位不提供任何修正。
pub fn active_modifiers(
    content: &dyn ContentSource,
    state: &MatchState,
    player: PlayerId,
    slot: usize,
) -> Vec<AttackModifier> {
    let Some(unit) = state.players[player as usize].battlefield[slot].as_ref() else {
        return Vec::new();
    };
    if unit.has_counter(CounterKind::Silence) {
        return Vec::new();
    }
    let Some(def) = content.definition(unit.card_id) else {
        return Vec::new();
    };

    let ctx = AbilityContext::new(AbilityTrigger::Passive, player, state.active_player)
        .with_source_slot(slot);

    let mut modifiers = Vec::new();
    for ability in leveling::active_abilities(def, unit.level) {
        for effect in &ability.effects {
            let EffectKind::AttackModifier { modifier } = &effect.kind else {
                continue;
            };
            if let Some(condition) = &effect.condition {
                if !condition.is_met(&ctx, state) {
                    continue;
                }
            }
            modifiers.push(*modifier);
        }
    }
    modifiers
}

pub fn attack_first(
    content: &dyn ContentSource,
    state: &MatchState,
    player: PlayerId,
    slot: usize,
) -> bool {
    active_modifiers(content, state, player, slot)
        .iter()
        .any(|m| matches!(m, AttackModifier::AttackFirst))
}

pub fn cannot_be_countered(
    content: &dyn ContentSource,
    state: &MatchState,
    player: PlayerId,
    slot: usize,
) -> bool {
    active_modifiers(content, state, player, slot)
        .iter()
        .any(|m| matches!(m, AttackModifier::CannotBeCountered))
}

pub fn attack_twice(
    content: &dyn ContentSource,
    state: &MatchState,
    player: PlayerId,
    slot: usize,
) -> bool {
    active_modifiers(content, state, player, slot)
        .iter()
        .any(|m| matches!(m, AttackModifier::AttackTwice))
}

pub fn instant_destroy(
    content: &dyn ContentSource,
    state: &MatchState,
    player: PlayerId,
    slot: usize,
) -> bool {
    active_modifiers(content, state, player, slot)
        .iter()
        .any(|m| matches!(m, AttackModifier::InstantDestroy))
}

/// 伤害倍率（百分比），多个倍率相乘。没有修正时为 100。
pub fn damage_multiplier(
    content: &dyn ContentSource,
    state: &MatchState,
    player: PlayerId,
    slot: usize,
) -> u32 {
    active_modifiers(content, state, player, slot)
        .iter()
        .fold(100u32, |acc, m| match m {
            AttackModifier::DamageMultiplier { percent } => acc * (*percent as u32) / 100,
            _ => acc,
        })
}

pub fn scaled_damage(base: i16, percent: u32) -> i16 {
    ((base.max(0) as u32) * percent / 100) as i16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::content::{builtin_content, GALE_STRIKER, VOID_REAPER};

    #[test]
    fn outcome_classification_covers_win_loss_draw() {
        let mut state = MatchState::bare(["A", "B"]);
        assert_eq!(classify(&state), None);

        state.players[1].health = 0;
        assert_eq!(classify(&state), Some(MatchOutcome::Winner { player: 0 }));

        state.players[0].health = 0;
        assert_eq!(classify(&state), Some(MatchOutcome::Draw));
    }

    #[test]
    fn modifier_scan_finds_attack_first() {
        let content = builtin_content();
        let mut state = MatchState::bare(["A", "B"]);
        state.spawn_for_test(0, 0, 2, 2);
        state.players[0].battlefield[0].as_mut().unwrap().card_id = GALE_STRIKER;

        assert!(attack_first(content.as_ref(), &state, 0, 0));
        assert!(!cannot_be_countered(content.as_ref(), &state, 0, 0));
    }

    #[test]
    fn condition_gated_modifier_respects_board_count() {
        let content = builtin_content();
        let mut state = MatchState::bare(["A", "B"]);
        state.spawn_for_test(0, 0, 4, 3);
        state.players[0].battlefield[0].as_mut().unwrap().card_id = VOID_REAPER;

        // 对面不足 3 个单位时 Devour 不生效。
        assert!(!instant_destroy(content.as_ref(), &state, 0, 0));
        assert!(cannot_be_countered(content.as_ref(), &state, 0, 0));

        for slot in 0..3 {
            state.spawn_for_test(1, slot, 1, 1);
        }
        assert!(instant_destroy(content.as_ref(), &state, 0, 0));
    }

    #[test]
    fn silenced_unit_loses_modifiers() {
        let content = builtin_content();
        let mut state = MatchState::bare(["A", "B"]);
        state.spawn_for_test(0, 0, 2, 2);
        {
            let unit = state.players[0].battlefield[0].as_mut().unwrap();
            unit.card_id = GALE_STRIKER;
            unit.add_counter(CounterKind::Silence, 0, Some(1));
        }
        assert!(!attack_first(content.as_ref(), &state, 0, 0));
    }

    #[test]
    fn multipliers_compound_and_default_to_full_damage() {
        assert_eq!(scaled_damage(4, 100), 4);
        assert_eq!(scaled_damage(4, 200), 8);
        assert_eq!(scaled_damage(3, 150), 4);
        assert_eq!(scaled_damage(-2, 200), 0);
    }
}
