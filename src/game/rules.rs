use std::rc::Rc;

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::utils;

use super::combat::{self, MatchOutcome};
use super::content::{
    builtin_content, AbilityDef, CardCategory, CardDefinition, CardId, ContentSource, DeckEntry,
};
use super::effects::{
    self, AbilityContext, AbilityTrigger, CounterKind, EffectKind, StateDelta, TargetRef,
    TrapTrigger,
};
use super::leveling;
use super::state::{
    BattlePosition, MatchEvent, MatchOptions, MatchState, PlayerId, PlayerState, Unit,
    BATTLEFIELD_SLOTS, BUFF_SLOTS, INITIAL_HAND_SIZE, TRAP_SLOTS,
};

/// 集成故障：调用方误用，向上传播而不是就地恢复。
/// 规则层面的拒绝（资源不足、无效槽位等）以布尔值报告，不走这里。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum MatchFault {
    NotStarted,
    UnknownCard { card_id: CardId },
}

/// 攻击目标：对方单位槽位或对方玩家本体。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum AttackTarget {
    Unit { slot: usize },
    Player,
}

/// 一次入口调用的结算记录：展示层据此逐步播放。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnResolution {
    pub accepted: bool,
    pub state: MatchState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<MatchEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<MatchOutcome>,
}

/// 对局开始前查询得到空状态标记。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum EngineSnapshot {
    Idle,
    Active { state: MatchState },
}

enum TurnBoundary {
    Start,
    End,
}

/// 对局引擎：权威状态的唯一持有者与修改者。
/// 内容源注入，替换内容数据不需要改动引擎。
pub struct MatchEngine {
    content: Rc<dyn ContentSource>,
    state: Option<MatchState>,
}

impl MatchEngine {
    pub fn new(content: Rc<dyn ContentSource>) -> Self {
        Self {
            content,
            state: None,
        }
    }

    pub fn with_builtin() -> Self {
        Self::new(builtin_content())
    }

    /// 从既有状态恢复（AI 模拟、外部快照回放用）。
    pub fn from_state(content: Rc<dyn ContentSource>, state: MatchState) -> Self {
        Self {
            content,
            state: Some(state),
        }
    }

    pub fn content(&self) -> Rc<dyn ContentSource> {
        Rc::clone(&self.content)
    }

    pub fn state(&self) -> Option<&MatchState> {
        self.state.as_ref()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        match &self.state {
            Some(state) => EngineSnapshot::Active {
                state: state.clone(),
            },
            None => EngineSnapshot::Idle,
        }
    }

    /// 丢弃当前对局。新对局需要显式重新开始。
    pub fn reset(&mut self) {
        self.state = None;
    }

    pub fn history_len(&self) -> usize {
        self.state.as_ref().map(|s| s.history.len()).unwrap_or(0)
    }

    pub fn resolution_since(&self, accepted: bool, mark: usize) -> Result<TurnResolution, MatchFault> {
        let state = self.state.as_ref().ok_or(MatchFault::NotStarted)?;
        Ok(TurnResolution {
            accepted,
            state: state.clone(),
            events: state.history[mark.min(state.history.len())..].to_vec(),
            outcome: state.outcome,
        })
    }

    pub fn start_match(
        &mut self,
        deck_a: Vec<DeckEntry>,
        deck_b: Vec<DeckEntry>,
        options: MatchOptions,
    ) -> Result<TurnResolution, MatchFault> {
        let mut rng = SmallRng::from_entropy();
        self.start_match_with_rng(deck_a, deck_b, options, &mut rng)
    }

    /// 固定种子的洗牌，测试与回放共用。
    pub fn start_match_seeded(
        &mut self,
        deck_a: Vec<DeckEntry>,
        deck_b: Vec<DeckEntry>,
        options: MatchOptions,
        seed: u64,
    ) -> Result<TurnResolution, MatchFault> {
        let mut rng = SmallRng::seed_from_u64(seed);
        self.start_match_with_rng(deck_a, deck_b, options, &mut rng)
    }

    fn start_match_with_rng(
        &mut self,
        deck_a: Vec<DeckEntry>,
        deck_b: Vec<DeckEntry>,
        options: MatchOptions,
        rng: &mut SmallRng,
    ) -> Result<TurnResolution, MatchFault> {
        for entry in deck_a.iter().chain(deck_b.iter()) {
            if self.content.definition(entry.card_id).is_none() {
                return Err(MatchFault::UnknownCard {
                    card_id: entry.card_id,
                });
            }
        }

        let mut player_a = PlayerState::new(options.name_a.clone().unwrap_or_else(|| "Player 1".into()));
        let mut player_b = PlayerState::new(options.name_b.clone().unwrap_or_else(|| "Player 2".into()));
        player_a.deck = deck_a;
        player_b.deck = deck_b;
        // Fisher–Yates 洗牌。
        player_a.deck.shuffle(rng);
        player_b.deck.shuffle(rng);

        let mut state = MatchState::new([player_a, player_b], options);
        state.record(MatchEvent::MatchStarted { first_player: 0 });

        for id in 0..2u8 {
            for _ in 0..INITIAL_HAND_SIZE {
                if let Some(card) = state.players[id as usize].draw() {
                    state.record(MatchEvent::CardDrawn {
                        player: id,
                        card_id: card.card_id,
                    });
                }
            }
        }

        // 先手玩家首回合不抽牌。
        self.begin_turn(&mut state, true);

        self.state = Some(state);
        self.resolution_since(true, 0)
    }

    pub fn play_card(
        &mut self,
        player: PlayerId,
        hand_index: usize,
        target: Option<TargetRef>,
    ) -> Result<bool, MatchFault> {
        let mut state = match self.state.take() {
            Some(state) => state,
            None => return Ok(false),
        };
        let result = self.play_card_inner(&mut state, player, hand_index, target);
        self.state = Some(state);
        result
    }

    pub fn execute_attack(
        &mut self,
        player: PlayerId,
        attacker_slot: usize,
        target: AttackTarget,
    ) -> Result<bool, MatchFault> {
        let mut state = match self.state.take() {
            Some(state) => state,
            None => return Ok(false),
        };
        let result = self.execute_attack_inner(&mut state, player, attacker_slot, target);
        self.state = Some(state);
        result
    }

    pub fn end_turn(&mut self) -> Result<TurnResolution, MatchFault> {
        let mut state = self.state.take().ok_or(MatchFault::NotStarted)?;
        let mark = state.history.len();
        let accepted = self.end_turn_inner(&mut state);
        self.state = Some(state);
        self.resolution_since(accepted, mark)
    }

    // ------------------------------------------------------------------
    // 回合驱动
    // ------------------------------------------------------------------

    fn begin_turn(&self, state: &mut MatchState, skip_draw: bool) {
        let player = state.active_player;
        state.position = BattlePosition::StartOfTurn;
        state.record(MatchEvent::TurnStarted {
            player,
            turn: state.turn,
        });

        state.players[player as usize].summons_this_turn = 0;

        if !skip_draw {
            if let Some(card) = state.players[player as usize].draw() {
                state.record(MatchEvent::CardDrawn {
                    player,
                    card_id: card.card_id,
                });
            }
        }

        // 资源池回涨到 min(上限, 回合数)，效果抬高的部分不回落。
        let turn = state.turn;
        let side = &mut state.players[player as usize];
        let grown = (turn.min(side.resource_cap as u32)) as u8;
        if grown > side.resource {
            let amount = grown - side.resource;
            side.resource = grown;
            let total = side.resource;
            state.record(MatchEvent::ResourceGained {
                player,
                amount,
                total,
            });
        }

        for slot in 0..BATTLEFIELD_SLOTS {
            if let Some(unit) = state.unit_mut(player, slot) {
                unit.summoning_sick = false;
                unit.reset_uses();
            }
        }

        self.resolve_counters(state, player);
        if state.is_finished() {
            return;
        }

        self.dispatch_turn_triggers(state, TurnBoundary::Start);
        if state.is_finished() {
            return;
        }

        state.position = BattlePosition::Playing;
    }

    fn end_turn_inner(&self, state: &mut MatchState) -> bool {
        if state.is_finished() || state.position != BattlePosition::Playing {
            return false;
        }
        let player = state.active_player;
        state.position = BattlePosition::EndOfTurn;

        self.dispatch_turn_triggers(state, TurnBoundary::End);

        // 双方单位的到期临时修正全部回退。
        for id in 0..2u8 {
            for slot in 0..BATTLEFIELD_SLOTS {
                let expired = match state.unit_mut(id, slot) {
                    Some(unit) => unit.expire_modifiers(),
                    None => continue,
                };
                for modifier in expired {
                    state.record(MatchEvent::ModifierExpired {
                        player: id,
                        slot,
                        stat: modifier.stat,
                        delta: modifier.delta,
                    });
                }
            }
        }
        self.sweep_dead(state);

        self.check_match_end(state);
        state.record(MatchEvent::TurnEnded { player });
        if state.is_finished() {
            return true;
        }

        // 回合计数只在后手玩家结束后递增。
        if player == 1 {
            state.turn += 1;
        }
        state.active_player = state.opponent_of(player);
        self.begin_turn(state, false);
        true
    }

    fn dispatch_turn_triggers(&self, state: &mut MatchState, boundary: TurnBoundary) {
        let player = state.active_player;
        let enemy = state.opponent_of(player);
        let (own, other, any) = match boundary {
            TurnBoundary::Start => (
                AbilityTrigger::TurnStart,
                AbilityTrigger::EnemyTurnStart,
                AbilityTrigger::EveryTurnStart,
            ),
            TurnBoundary::End => (
                AbilityTrigger::TurnEnd,
                AbilityTrigger::EnemyTurnEnd,
                AbilityTrigger::EveryTurnEnd,
            ),
        };

        // 固定派发顺序：环境（当前玩家专属 → 任意回合）→ 单位 → 增益卡。
        if let Some(env) = state.environment {
            if let Some(def) = self.content.definition(env.card_id) {
                let abilities = def.abilities.clone();
                if env.owner == player {
                    self.run_card_abilities(state, &abilities, own, env.owner);
                } else {
                    self.run_card_abilities(state, &abilities, other, env.owner);
                }
                self.run_card_abilities(state, &abilities, any, player);
            }
        }
        if state.is_finished() {
            return;
        }

        for slot in 0..BATTLEFIELD_SLOTS {
            self.dispatch_unit_trigger(state, player, slot, own, None);
        }
        for slot in 0..BATTLEFIELD_SLOTS {
            self.dispatch_unit_trigger(state, enemy, slot, other, None);
        }
        if state.is_finished() {
            return;
        }

        for owner in [player, enemy] {
            let trigger = if owner == player { own } else { other };
            for slot in 0..BUFF_SLOTS {
                let Some(card_id) = state.players[owner as usize].buffs[slot] else {
                    continue;
                };
                let Some(def) = self.content.definition(card_id) else {
                    continue;
                };
                let abilities = def.abilities.clone();
                self.run_card_abilities(state, &abilities, trigger, owner);
            }
        }
    }

    /// 回合开始时结算持续状态：灼烧伤害、限时计数递减与到期。
    fn resolve_counters(&self, state: &mut MatchState, player: PlayerId) {
        for slot in 0..BATTLEFIELD_SLOTS {
            let burn = state
                .unit(player, slot)
                .and_then(|unit| {
                    unit.counters
                        .iter()
                        .find(|counter| counter.kind == CounterKind::Burn)
                        .map(|counter| counter.amount)
                })
                .unwrap_or(0);
            if burn > 0 && self.reduce_unit_health(state, player, slot, burn) {
                self.dispatch_damaged(state, player, slot, None);
            }

            let mut expired = Vec::new();
            if let Some(unit) = state.unit_mut(player, slot) {
                for counter in unit.counters.iter_mut() {
                    if let Some(turns) = counter.remaining_turns.as_mut() {
                        *turns = turns.saturating_sub(1);
                        if *turns == 0 {
                            expired.push(counter.kind);
                        }
                    }
                }
                unit.counters
                    .retain(|counter| counter.remaining_turns != Some(0));
            }
            for kind in expired {
                state.record(MatchEvent::CounterExpired {
                    player,
                    slot,
                    counter: kind,
                });
            }

            if state
                .unit(player, slot)
                .map_or(false, |unit| unit.health <= 0)
            {
                self.destroy_units(state, vec![(player, slot)]);
            }
        }
    }

    // ------------------------------------------------------------------
    // 出牌
    // ------------------------------------------------------------------

    fn play_card_inner(
        &self,
        state: &mut MatchState,
        player: PlayerId,
        hand_index: usize,
        target: Option<TargetRef>,
    ) -> Result<bool, MatchFault> {
        if state.is_finished()
            || state.position != BattlePosition::Playing
            || player != state.active_player
        {
            return Ok(false);
        }
        if let Some(target) = target {
            if target.player > 1 || target.slot.map_or(false, |slot| slot >= BATTLEFIELD_SLOTS) {
                return Ok(false);
            }
        }

        let Some(entry) = state.players[player as usize].hand.get(hand_index).copied() else {
            return Ok(false);
        };
        let def = self
            .content
            .definition(entry.card_id)
            .ok_or(MatchFault::UnknownCard {
                card_id: entry.card_id,
            })?
            .clone();

        if state.players[player as usize].resource < def.cost {
            return Ok(false);
        }
        // 每回合只允许召唤一个生物。
        if def.category == CardCategory::Creature
            && state.players[player as usize].summons_this_turn >= 1
        {
            return Ok(false);
        }

        state.players[player as usize].resource -= def.cost;
        state.players[player as usize].hand.remove(hand_index);
        state.record(MatchEvent::CardPlayed {
            player,
            card_id: entry.card_id,
        });

        match def.category {
            CardCategory::Creature => self.resolve_creature_play(state, player, entry, &def, target),
            CardCategory::Environment => self.resolve_environment_play(state, player, entry, &def),
            CardCategory::Instant => {
                let mut ctx = AbilityContext::new(AbilityTrigger::Cast, player, state.active_player);
                if let Some(target) = target {
                    ctx = ctx.with_target(target);
                }
                for ability in &def.abilities {
                    if ability.trigger == AbilityTrigger::Cast {
                        self.run_ability(state, ability, &ctx);
                    }
                    if state.is_finished() {
                        break;
                    }
                }
                state.players[player as usize].discard.push(entry);
            }
            CardCategory::Trap => match state.players[player as usize].first_empty_trap_slot() {
                Some(slot) => {
                    state.players[player as usize].traps[slot] = Some(entry.card_id);
                    state.record(MatchEvent::TrapSet { player, slot });
                }
                None => {
                    state.players[player as usize].discard.push(entry);
                    state.record(MatchEvent::CardDiscarded {
                        player,
                        card_id: entry.card_id,
                    });
                }
            },
            CardCategory::Buff => match state.players[player as usize].first_empty_buff_slot() {
                Some(slot) => {
                    state.players[player as usize].buffs[slot] = Some(entry.card_id);
                    state.record(MatchEvent::BuffInstalled {
                        player,
                        slot,
                        card_id: entry.card_id,
                    });
                    let ctx = AbilityContext::new(AbilityTrigger::Install, player, state.active_player);
                    for ability in &def.abilities {
                        if ability.trigger == AbilityTrigger::Install {
                            self.run_ability(state, ability, &ctx);
                        }
                    }
                    // 既有单位追溯获得被动属性加成。
                    for unit_slot in 0..BATTLEFIELD_SLOTS {
                        if state.unit(player, unit_slot).is_some() {
                            self.apply_passive_effects(state, player, unit_slot, &def);
                        }
                    }
                }
                None => {
                    state.players[player as usize].discard.push(entry);
                    state.record(MatchEvent::CardDiscarded {
                        player,
                        card_id: entry.card_id,
                    });
                }
            },
        }

        Ok(true)
    }

    fn resolve_creature_play(
        &self,
        state: &mut MatchState,
        player: PlayerId,
        entry: DeckEntry,
        def: &CardDefinition,
        target: Option<TargetRef>,
    ) {
        let enemy = state.opponent_of(player);
        self.spring_trap(state, enemy, TrapTrigger::CreaturePlay, None);
        if state.is_finished() {
            return;
        }

        let Some(slot) = state.players[player as usize].first_empty_unit_slot() else {
            // 战场已满：卡牌直接进弃牌堆，战场不变。
            state.players[player as usize].discard.push(entry);
            state.record(MatchEvent::CardDiscarded {
                player,
                card_id: entry.card_id,
            });
            return;
        };

        let gains = leveling::stat_gains(def, entry.level);
        let attack = def.attack + gains.attack;
        let health = def.health + gains.health;
        let instance_id = state.allocate_instance();
        state.players[player as usize].battlefield[slot] = Some(Unit {
            instance_id,
            card_id: entry.card_id,
            affinity: def.affinity,
            level: entry.level,
            xp: 0,
            base_attack: attack,
            attack,
            health,
            max_health: health,
            counters: Vec::new(),
            modifiers: Vec::new(),
            ability_uses: Vec::new(),
            summoning_sick: true,
            slot,
        });
        state.players[player as usize].summons_this_turn += 1;
        state.record(MatchEvent::UnitSummoned {
            player,
            slot,
            instance_id,
            card_id: entry.card_id,
        });

        // 在场增益卡的被动在单位入场时立即生效。
        for buff_slot in 0..BUFF_SLOTS {
            let Some(buff_id) = state.players[player as usize].buffs[buff_slot] else {
                continue;
            };
            let Some(buff_def) = self.content.definition(buff_id) else {
                continue;
            };
            let buff_def = buff_def.clone();
            self.apply_passive_effects(state, player, slot, &buff_def);
        }

        self.dispatch_unit_trigger(state, player, slot, AbilityTrigger::Summon, target);
        if state.is_finished() {
            return;
        }

        for other_slot in 0..BATTLEFIELD_SLOTS {
            if other_slot != slot {
                self.dispatch_unit_trigger(
                    state,
                    player,
                    other_slot,
                    AbilityTrigger::AllySummoned,
                    Some(TargetRef::unit(player, slot)),
                );
            }
        }
    }

    fn resolve_environment_play(
        &self,
        state: &mut MatchState,
        player: PlayerId,
        entry: DeckEntry,
        def: &CardDefinition,
    ) {
        let enemy = state.opponent_of(player);
        let countered = self.spring_trap(state, enemy, TrapTrigger::EnvironmentPlay, None);
        if countered {
            state.players[player as usize].discard.push(entry);
            state.record(MatchEvent::EnvironmentCountered {
                card_id: entry.card_id,
            });
            state.record(MatchEvent::CardDiscarded {
                player,
                card_id: entry.card_id,
            });
            return;
        }

        if let Some(previous) = state.environment.take() {
            state.players[previous.owner as usize]
                .discard
                .push(DeckEntry::new(previous.card_id));
            state.record(MatchEvent::EnvironmentReplaced {
                card_id: previous.card_id,
            });
        }
        state.environment = Some(super::state::EnvironmentSlot {
            card_id: entry.card_id,
            owner: player,
        });
        state.record(MatchEvent::EnvironmentInstalled {
            player,
            card_id: entry.card_id,
        });

        let ctx = AbilityContext::new(AbilityTrigger::Install, player, state.active_player);
        for ability in &def.abilities {
            if ability.trigger == AbilityTrigger::Install {
                self.run_ability(state, ability, &ctx);
            }
        }
    }

    /// 把一张卡的被动友方属性效果套到指定单位上。
    fn apply_passive_effects(
        &self,
        state: &mut MatchState,
        player: PlayerId,
        slot: usize,
        source: &CardDefinition,
    ) {
        let ctx = AbilityContext::new(AbilityTrigger::Passive, player, state.active_player);
        for ability in &source.abilities {
            if ability.trigger != AbilityTrigger::Passive {
                continue;
            }
            for effect in &ability.effects {
                let EffectKind::ModifyStat {
                    target: effects::EffectTarget::AllAllies,
                    stat,
                    delta,
                    duration,
                } = &effect.kind
                else {
                    continue;
                };
                if let Some(condition) = &effect.condition {
                    if !condition.is_met(&ctx, state) {
                        continue;
                    }
                }
                if let Some(unit) = state.unit_mut(player, slot) {
                    unit.apply_stat_change(*stat, *delta, *duration);
                    state.record(MatchEvent::StatChanged {
                        player,
                        slot,
                        stat: *stat,
                        delta: *delta,
                    });
                }
            }
        }
    }

    /// 扫描对手陷阱，只有第一个匹配的会激活，随后移入其主人的弃牌堆。
    /// 返回是否出现抵消效果。
    fn spring_trap(
        &self,
        state: &mut MatchState,
        trap_owner: PlayerId,
        trigger: TrapTrigger,
        target: Option<TargetRef>,
    ) -> bool {
        let mut found = None;
        for slot in 0..TRAP_SLOTS {
            let Some(card_id) = state.players[trap_owner as usize].traps[slot] else {
                continue;
            };
            let Some(def) = self.content.definition(card_id) else {
                continue;
            };
            if let Some(trap) = def.trap.as_ref().filter(|trap| trap.trigger == trigger) {
                found = Some((slot, card_id, trap.clone()));
                break;
            }
        }
        let Some((slot, card_id, trap)) = found else {
            return false;
        };

        state.players[trap_owner as usize].traps[slot] = None;
        state.record(MatchEvent::TrapTriggered {
            player: trap_owner,
            slot,
            card_id,
        });

        let mut ctx = AbilityContext::new(AbilityTrigger::Cast, trap_owner, state.active_player);
        if let Some(target) = target {
            ctx = ctx.with_target(target);
        }
        let outcomes = effects::process_effects(&trap.effects, &ctx, state);
        let nullified = self.apply_outcomes(state, outcomes, &ctx);

        state.players[trap_owner as usize]
            .discard
            .push(DeckEntry::new(card_id));
        state.record(MatchEvent::CardDiscarded {
            player: trap_owner,
            card_id,
        });

        nullified
    }

    // ------------------------------------------------------------------
    // 攻击结算
    // ------------------------------------------------------------------

    fn execute_attack_inner(
        &self,
        state: &mut MatchState,
        player: PlayerId,
        attacker_slot: usize,
        target: AttackTarget,
    ) -> Result<bool, MatchFault> {
        if state.is_finished()
            || state.position != BattlePosition::Playing
            || player != state.active_player
            || attacker_slot >= BATTLEFIELD_SLOTS
        {
            return Ok(false);
        }
        let enemy = state.opponent_of(player);

        let Some(attacker) = state.unit(player, attacker_slot) else {
            return Ok(false);
        };
        if attacker.summoning_sick || attacker.has_counter(CounterKind::Immobilize) {
            return Ok(false);
        }

        let target_ref = match target {
            AttackTarget::Unit { slot } => {
                if slot >= BATTLEFIELD_SLOTS || state.unit(enemy, slot).is_none() {
                    return Ok(false);
                }
                TargetRef::unit(enemy, slot)
            }
            AttackTarget::Player => TargetRef::player(enemy),
        };

        state.record(MatchEvent::AttackDeclared {
            player,
            slot: attacker_slot,
            target: target_ref,
        });

        let negated = self.spring_trap(
            state,
            enemy,
            TrapTrigger::Attack,
            Some(TargetRef::unit(player, attacker_slot)),
        );
        if negated {
            state.record(MatchEvent::AttackNegated {
                player,
                slot: attacker_slot,
            });
            return Ok(true);
        }
        if state.is_finished() || state.unit(player, attacker_slot).is_none() {
            return Ok(true);
        }

        self.dispatch_unit_trigger(
            state,
            player,
            attacker_slot,
            AbilityTrigger::Attack,
            Some(target_ref),
        );
        if state.is_finished() || state.unit(player, attacker_slot).is_none() {
            return Ok(true);
        }

        match target {
            AttackTarget::Player => {
                self.resolve_player_strike(state, player, attacker_slot, enemy);
                if !state.is_finished()
                    && state.unit(player, attacker_slot).is_some()
                    && combat::attack_twice(self.content.as_ref(), state, player, attacker_slot)
                {
                    self.resolve_player_strike(state, player, attacker_slot, enemy);
                }
            }
            AttackTarget::Unit { slot } => {
                self.resolve_unit_combat(state, player, attacker_slot, slot);
                if !state.is_finished()
                    && state.unit(player, attacker_slot).is_some()
                    && state.unit(enemy, slot).is_some()
                    && combat::attack_twice(self.content.as_ref(), state, player, attacker_slot)
                {
                    self.resolve_unit_combat(state, player, attacker_slot, slot);
                }
            }
        }

        Ok(true)
    }

    fn resolve_player_strike(
        &self,
        state: &mut MatchState,
        player: PlayerId,
        attacker_slot: usize,
        enemy: PlayerId,
    ) {
        let Some(attacker) = state.unit(player, attacker_slot) else {
            return;
        };
        let multiplier =
            combat::damage_multiplier(self.content.as_ref(), state, player, attacker_slot);
        let damage = combat::scaled_damage(attacker.attack, multiplier);
        self.damage_player(state, enemy, damage);
    }

    fn resolve_unit_combat(
        &self,
        state: &mut MatchState,
        player: PlayerId,
        attacker_slot: usize,
        defender_slot: usize,
    ) {
        let enemy = state.opponent_of(player);
        let content = self.content.as_ref();

        let Some(attacker) = state.unit(player, attacker_slot) else {
            return;
        };
        let Some(defender) = state.unit(enemy, defender_slot) else {
            return;
        };

        let first_strike = combat::attack_first(content, state, player, attacker_slot);
        let uncounterable = combat::cannot_be_countered(content, state, player, attacker_slot);
        let destroy_on_hit = combat::instant_destroy(content, state, player, attacker_slot);
        let multiplier = combat::damage_multiplier(content, state, player, attacker_slot);
        let strike_damage = combat::scaled_damage(attacker.attack, multiplier);
        let counter_damage = defender.attack;

        let attacker_ref = TargetRef::unit(player, attacker_slot);
        let defender_ref = TargetRef::unit(enemy, defender_slot);

        if first_strike {
            if self.reduce_unit_health(state, enemy, defender_slot, strike_damage) {
                self.dispatch_damaged(state, enemy, defender_slot, Some(attacker_ref));
            }
            self.check_match_end(state);
            if state.is_finished() {
                return;
            }

            let defender_down = state
                .unit(enemy, defender_slot)
                .map_or(true, |unit| unit.health <= 0);
            if defender_down || destroy_on_hit {
                // 先攻击杀：不吃任何反击伤害。
                self.destroy_units(state, vec![(enemy, defender_slot)]);
                self.award_kill_xp(state, player, attacker_slot);
                return;
            }
            if uncounterable {
                return;
            }
            if self.reduce_unit_health(state, player, attacker_slot, counter_damage) {
                self.dispatch_damaged(state, player, attacker_slot, Some(defender_ref));
            }
            self.check_match_end(state);
            if state.is_finished() {
                return;
            }
            if state
                .unit(player, attacker_slot)
                .map_or(false, |unit| unit.health <= 0)
            {
                self.destroy_units(state, vec![(player, attacker_slot)]);
                self.award_kill_xp(state, enemy, defender_slot);
            }
        } else {
            let counter = if uncounterable { 0 } else { counter_damage };
            // 同步结算：两侧生命都先扣，再做任何消灭判定。
            let defender_hit = self.reduce_unit_health(state, enemy, defender_slot, strike_damage);
            let attacker_hit = self.reduce_unit_health(state, player, attacker_slot, counter);
            if defender_hit {
                self.dispatch_damaged(state, enemy, defender_slot, Some(attacker_ref));
            }
            if attacker_hit {
                self.dispatch_damaged(state, player, attacker_slot, Some(defender_ref));
            }
            self.check_match_end(state);
            if state.is_finished() {
                return;
            }

            let defender_down = state
                .unit(enemy, defender_slot)
                .map_or(false, |unit| unit.health <= 0)
                || (destroy_on_hit && state.unit(enemy, defender_slot).is_some());
            let attacker_down = state
                .unit(player, attacker_slot)
                .map_or(false, |unit| unit.health <= 0);

            let mut doomed = Vec::new();
            if defender_down {
                doomed.push((enemy, defender_slot));
            }
            if attacker_down {
                doomed.push((player, attacker_slot));
            }
            self.destroy_units(state, doomed);

            if defender_down && !attacker_down {
                self.award_kill_xp(state, player, attacker_slot);
            }
            if attacker_down && !defender_down {
                self.award_kill_xp(state, enemy, defender_slot);
            }
        }
    }

    // ------------------------------------------------------------------
    // 技能派发与增量应用
    // ------------------------------------------------------------------

    fn dispatch_unit_trigger(
        &self,
        state: &mut MatchState,
        player: PlayerId,
        slot: usize,
        trigger: AbilityTrigger,
        target: Option<TargetRef>,
    ) {
        let Some(unit) = state.unit(player, slot) else {
            return;
        };
        if unit.has_counter(CounterKind::Silence) {
            return;
        }
        let Some(def) = self.content.definition(unit.card_id) else {
            return;
        };
        let abilities: Vec<AbilityDef> = leveling::active_abilities(def, unit.level)
            .into_iter()
            .filter(|ability| ability.trigger == trigger)
            .collect();
        if abilities.is_empty() {
            return;
        }

        let mut ctx =
            AbilityContext::new(trigger, player, state.active_player).with_source_slot(slot);
        if let Some(target) = target {
            ctx = ctx.with_target(target);
        }
        for ability in &abilities {
            if state.is_finished() || state.unit(player, slot).is_none() {
                break;
            }
            self.run_ability(state, ability, &ctx);
        }
    }

    fn run_card_abilities(
        &self,
        state: &mut MatchState,
        abilities: &[AbilityDef],
        trigger: AbilityTrigger,
        source_player: PlayerId,
    ) {
        let ctx = AbilityContext::new(trigger, source_player, state.active_player);
        for ability in abilities {
            if ability.trigger != trigger {
                continue;
            }
            if state.is_finished() {
                break;
            }
            self.run_ability(state, ability, &ctx);
        }
    }

    fn run_ability(
        &self,
        state: &mut MatchState,
        ability: &AbilityDef,
        ctx: &AbilityContext,
    ) -> bool {
        if let Some(cost) = ability.activation_cost {
            if state.players[ctx.source_player as usize].resource < cost {
                state.record(MatchEvent::EffectSkipped {
                    reason: format!("{}: activation cost unpaid", ability.name),
                });
                return false;
            }
            state.players[ctx.source_player as usize].resource -= cost;
        }

        if let (Some(cap), Some(slot)) = (ability.uses_per_turn, ctx.source_slot) {
            let spent = state
                .unit(ctx.source_player, slot)
                .map_or(0, |unit| unit.use_count(&ability.name));
            if spent >= cap {
                return false;
            }
            if let Some(unit) = state.unit_mut(ctx.source_player, slot) {
                unit.record_use(&ability.name);
            }
        }

        let outcomes = effects::process_ability(ability, ctx, state);
        self.apply_outcomes(state, outcomes, ctx)
    }

    /// 按顺序应用处理器产出的增量。返回是否出现抵消。
    fn apply_outcomes(
        &self,
        state: &mut MatchState,
        outcomes: Vec<effects::EffectOutcome>,
        ctx: &AbilityContext,
    ) -> bool {
        let mut nullified = false;
        for outcome in outcomes {
            if let Some(message) = &outcome.message {
                if !outcome.success && message.contains("unrecognized") {
                    utils::log(&format!("skipping effect: {message}"));
                    state.record(MatchEvent::EffectSkipped {
                        reason: message.clone(),
                    });
                }
            }
            for delta in outcome.deltas {
                if self.apply_delta(state, delta, ctx) {
                    nullified = true;
                }
                if state.is_finished() {
                    return nullified;
                }
            }
        }
        nullified
    }

    fn apply_delta(&self, state: &mut MatchState, delta: StateDelta, ctx: &AbilityContext) -> bool {
        let source_ref = ctx
            .source_slot
            .map(|slot| TargetRef::unit(ctx.source_player, slot));
        match delta {
            StateDelta::UnitStat {
                player,
                slot,
                stat,
                delta,
                duration,
            } => {
                if let Some(unit) = state.unit_mut(player, slot) {
                    unit.apply_stat_change(stat, delta, duration);
                    state.record(MatchEvent::StatChanged {
                        player,
                        slot,
                        stat,
                        delta,
                    });
                    if state.unit(player, slot).map_or(false, |u| u.health <= 0) {
                        self.destroy_units(state, vec![(player, slot)]);
                    }
                }
            }
            StateDelta::UnitDamage {
                player,
                slot,
                amount,
            } => {
                if self.reduce_unit_health(state, player, slot, amount) {
                    self.dispatch_damaged(state, player, slot, source_ref);
                }
                if state.unit(player, slot).map_or(false, |u| u.health <= 0) {
                    self.destroy_units(state, vec![(player, slot)]);
                }
            }
            StateDelta::UnitHeal {
                player,
                slot,
                amount,
            } => {
                if let Some(unit) = state.unit_mut(player, slot) {
                    if amount > 0 {
                        unit.health = (unit.health + amount).min(unit.max_health);
                        state.record(MatchEvent::UnitHealed {
                            player,
                            slot,
                            amount,
                        });
                    }
                }
            }
            StateDelta::PlayerDamage { player, amount } => {
                self.damage_player(state, player, amount);
            }
            StateDelta::PlayerHeal { player, amount } => {
                if amount > 0 {
                    state.players[player as usize].health += amount;
                    state.record(MatchEvent::PlayerHealed { player, amount });
                }
            }
            StateDelta::DrawCards { player, count } => {
                for _ in 0..count {
                    if let Some(card) = state.players[player as usize].draw() {
                        state.record(MatchEvent::CardDrawn {
                            player,
                            card_id: card.card_id,
                        });
                    }
                }
            }
            StateDelta::GainResource { player, amount } => {
                let side = &mut state.players[player as usize];
                let total = (side.resource + amount).min(side.resource_cap);
                let gained = total - side.resource;
                side.resource = total;
                if gained > 0 {
                    state.record(MatchEvent::ResourceGained {
                        player,
                        amount: gained,
                        total,
                    });
                }
            }
            StateDelta::CounterApplied {
                player,
                slot,
                counter,
                amount,
                turns,
            } => {
                if let Some(unit) = state.unit_mut(player, slot) {
                    unit.add_counter(counter, amount, turns);
                    state.record(MatchEvent::CounterApplied {
                        player,
                        slot,
                        counter,
                        amount,
                    });
                }
            }
            StateDelta::CounterRemoved {
                player,
                slot,
                counter,
            } => {
                if let Some(unit) = state.unit_mut(player, slot) {
                    for removed in unit.remove_counters(counter) {
                        state.record(MatchEvent::CounterExpired {
                            player,
                            slot,
                            counter: removed.kind,
                        });
                    }
                }
            }
            StateDelta::SwapSlots {
                player,
                slot_a,
                slot_b,
            } => {
                state.players[player as usize].battlefield.swap(slot_a, slot_b);
                if let Some(unit) = state.unit_mut(player, slot_a) {
                    unit.slot = slot_a;
                }
                if let Some(unit) = state.unit_mut(player, slot_b) {
                    unit.slot = slot_b;
                }
                state.record(MatchEvent::PositionsSwapped {
                    player,
                    slot_a,
                    slot_b,
                });
            }
            StateDelta::SearchDeck { player, card_id } => {
                let side = &mut state.players[player as usize];
                if let Some(position) = side.deck.iter().position(|card| card.card_id == card_id) {
                    let card = side.deck.remove(position);
                    side.hand.push(card);
                    state.record(MatchEvent::CardDrawn { player, card_id });
                }
            }
            StateDelta::Nullify => return true,
        }
        false
    }

    /// 扣减单位生命。免疫或无效数值时返回 false，不派发任何事件。
    fn reduce_unit_health(
        &self,
        state: &mut MatchState,
        player: PlayerId,
        slot: usize,
        amount: i16,
    ) -> bool {
        let Some(unit) = state.unit_mut(player, slot) else {
            return false;
        };
        if amount <= 0 || unit.has_counter(CounterKind::Immunity) {
            return false;
        }
        unit.health = (unit.health - amount).max(0);
        let remaining = unit.health;
        state.record(MatchEvent::UnitDamaged {
            player,
            slot,
            amount,
            remaining,
        });
        true
    }

    fn dispatch_damaged(
        &self,
        state: &mut MatchState,
        player: PlayerId,
        slot: usize,
        source: Option<TargetRef>,
    ) {
        self.dispatch_unit_trigger(state, player, slot, AbilityTrigger::Damaged, source);
    }

    fn damage_player(&self, state: &mut MatchState, player: PlayerId, amount: i16) {
        if amount <= 0 {
            return;
        }
        let side = &mut state.players[player as usize];
        side.health = (side.health - amount).max(0);
        let remaining = side.health;
        state.record(MatchEvent::PlayerDamaged {
            player,
            amount,
            remaining,
        });
        self.check_match_end(state);
    }

    /// 消灭：先整体移出战场并进入弃牌堆，再统一派发消灭触发，
    /// 使触发器观察到的是已更新的战场。
    fn destroy_units(&self, state: &mut MatchState, targets: Vec<(PlayerId, usize)>) {
        let mut removed = Vec::new();
        for (player, slot) in targets {
            let Some(unit) = state.remove_unit(player, slot) else {
                continue;
            };
            state.players[player as usize].discard.push(DeckEntry {
                card_id: unit.card_id,
                level: unit.level,
            });
            state.record(MatchEvent::UnitDestroyed {
                player,
                slot,
                instance_id: unit.instance_id,
                card_id: unit.card_id,
            });
            removed.push((player, unit));
        }
        for (player, unit) in removed {
            self.dispatch_destroyed(state, player, &unit);
        }
    }

    fn dispatch_destroyed(&self, state: &mut MatchState, player: PlayerId, unit: &Unit) {
        if unit.has_counter(CounterKind::Silence) {
            return;
        }
        let Some(def) = self.content.definition(unit.card_id) else {
            return;
        };
        let abilities: Vec<AbilityDef> = leveling::active_abilities(def, unit.level)
            .into_iter()
            .filter(|ability| ability.trigger == AbilityTrigger::Destroyed)
            .collect();
        let ctx = AbilityContext::new(AbilityTrigger::Destroyed, player, state.active_player);
        for ability in &abilities {
            if state.is_finished() {
                break;
            }
            self.run_ability(state, ability, &ctx);
        }
    }

    fn sweep_dead(&self, state: &mut MatchState) {
        let mut doomed = Vec::new();
        for id in 0..2u8 {
            for slot in 0..BATTLEFIELD_SLOTS {
                if state.unit(id, slot).map_or(false, |unit| unit.health <= 0) {
                    doomed.push((id, slot));
                }
            }
        }
        if !doomed.is_empty() {
            self.destroy_units(state, doomed);
        }
    }

    fn award_kill_xp(&self, state: &mut MatchState, player: PlayerId, slot: usize) {
        let Some(unit) = state.unit_mut(player, slot) else {
            return;
        };
        let previous_level = unit.level;
        if !unit.award_xp(100) {
            return;
        }
        let new_level = unit.level;
        let card_id = unit.card_id;
        if let Some(def) = self.content.definition(card_id) {
            let before = leveling::stat_gains(def, previous_level);
            let after = leveling::stat_gains(def, new_level);
            let attack_diff = after.attack - before.attack;
            let health_diff = after.health - before.health;
            if let Some(unit) = state.unit_mut(player, slot) {
                unit.base_attack += attack_diff;
                unit.attack += attack_diff;
                unit.max_health += health_diff;
                unit.health += health_diff;
            }
        }
        state.record(MatchEvent::UnitLeveled {
            player,
            slot,
            level: new_level,
        });
    }

    /// 每次伤害应用之后都要重查，含结算中途。胜负判定只执行一次。
    fn check_match_end(&self, state: &mut MatchState) {
        if state.is_finished() {
            return;
        }
        if combat::is_over(state) {
            state.position = BattlePosition::Finished;
            let outcome = combat::classify(state);
            state.outcome = outcome;
            if let Some(outcome) = outcome {
                state.record(MatchEvent::MatchEnded { outcome });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::content::{
        sample_deck, AMBUSH_NET, EMBER_COLOSSUS, FLAME_ADEPT, GALE_STRIKER, NULL_VEIL,
        SCORCHED_PLAINS, TIDE_SENTINEL, WAR_BANNER,
    };
    use crate::game::state::{EnvironmentSlot, RESOURCE_CAP};

    fn deck_of(card: CardId, count: usize) -> Vec<DeckEntry> {
        (0..count).map(|_| DeckEntry::new(card)).collect()
    }

    fn started(deck_a: Vec<DeckEntry>, deck_b: Vec<DeckEntry>) -> MatchEngine {
        let mut engine = MatchEngine::with_builtin();
        engine
            .start_match_seeded(deck_a, deck_b, MatchOptions::default(), 7)
            .expect("match should start");
        engine
    }

    fn pass_turn(engine: &mut MatchEngine) {
        engine.end_turn().expect("end_turn should not fault");
    }

    #[test]
    fn hundred_card_deck_draws_an_initial_hand_of_five() {
        let engine = started(deck_of(FLAME_ADEPT, 100), deck_of(FLAME_ADEPT, 100));
        let state = engine.state().expect("state");
        for player in &state.players {
            assert_eq!(player.hand.len(), 5);
            assert_eq!(player.deck.len(), 95);
        }
    }

    #[test]
    fn empty_deck_yields_empty_hand_and_end_turn_does_not_fault() {
        let mut engine = started(Vec::new(), Vec::new());
        assert_eq!(engine.state().unwrap().players[0].hand.len(), 0);

        pass_turn(&mut engine);
        pass_turn(&mut engine);
        assert_eq!(engine.state().unwrap().turn, 2);
    }

    #[test]
    fn first_player_skips_the_first_draw() {
        let mut engine = started(deck_of(FLAME_ADEPT, 10), deck_of(FLAME_ADEPT, 10));
        // 先手开局不抽牌，后手首回合正常抽。
        assert_eq!(engine.state().unwrap().players[0].hand.len(), 5);
        pass_turn(&mut engine);
        assert_eq!(engine.state().unwrap().players[1].hand.len(), 6);
    }

    #[test]
    fn turn_counter_increments_once_per_full_round() {
        let mut engine = started(Vec::new(), Vec::new());
        assert_eq!(engine.state().unwrap().turn, 1);

        pass_turn(&mut engine);
        let state = engine.state().unwrap();
        assert_eq!(state.turn, 1, "turn must not change mid-round");
        assert_eq!(state.active_player, 1);

        pass_turn(&mut engine);
        let state = engine.state().unwrap();
        assert_eq!(state.turn, 2);
        assert_eq!(state.active_player, 0);
    }

    #[test]
    fn resource_pool_tracks_the_turn_and_never_exceeds_the_cap() {
        let mut engine = started(Vec::new(), Vec::new());
        assert_eq!(engine.state().unwrap().players[0].resource, 1);

        pass_turn(&mut engine);
        pass_turn(&mut engine);
        assert_eq!(engine.state().unwrap().players[0].resource, 2);

        for _ in 0..28 {
            pass_turn(&mut engine);
        }
        let state = engine.state().unwrap();
        assert!(state.turn > RESOURCE_CAP as u32);
        assert_eq!(state.players[0].resource, RESOURCE_CAP);
        assert_eq!(state.players[1].resource, RESOURCE_CAP);
    }

    #[test]
    fn play_card_rejects_unaffordable_cost_without_side_effects() {
        let mut engine = started(deck_of(SCORCHED_PLAINS, 10), Vec::new());
        let before = engine.state().unwrap().players[0].clone();
        assert_eq!(before.resource, 1);

        let accepted = engine.play_card(0, 0, None).expect("no fault");
        assert!(!accepted);

        let after = &engine.state().unwrap().players[0];
        assert_eq!(after.resource, before.resource);
        assert_eq!(after.hand.len(), before.hand.len());
    }

    #[test]
    fn play_card_pays_exactly_the_cost_on_success() {
        let mut engine = started(deck_of(FLAME_ADEPT, 10), Vec::new());
        pass_turn(&mut engine);
        pass_turn(&mut engine);
        let before = engine.state().unwrap().players[0].resource;
        assert_eq!(before, 2);

        let accepted = engine.play_card(0, 0, None).expect("no fault");
        assert!(accepted);

        let state = engine.state().unwrap();
        assert_eq!(state.players[0].resource, 0);
        let unit = state.players[0].battlefield[0].as_ref().expect("unit placed");
        assert_eq!(unit.card_id, FLAME_ADEPT);
        assert!(unit.summoning_sick);
    }

    #[test]
    fn invalid_hand_index_is_rejected_not_a_fault() {
        let mut engine = started(deck_of(FLAME_ADEPT, 10), Vec::new());
        assert!(!engine.play_card(0, 42, None).expect("no fault"));
    }

    #[test]
    fn summoning_sickness_blocks_attack_until_next_own_turn() {
        let mut engine = started(deck_of(FLAME_ADEPT, 10), Vec::new());
        pass_turn(&mut engine);
        pass_turn(&mut engine);
        assert!(engine.play_card(0, 0, None).expect("no fault"));

        assert!(!engine
            .execute_attack(0, 0, AttackTarget::Player)
            .expect("no fault"));

        pass_turn(&mut engine);
        pass_turn(&mut engine);
        let unit = engine.state().unwrap().players[0].battlefield[0]
            .as_ref()
            .expect("unit stays");
        assert!(!unit.summoning_sick);

        assert!(engine
            .execute_attack(0, 0, AttackTarget::Player)
            .expect("no fault"));
        assert_eq!(engine.state().unwrap().players[1].health, 27);
    }

    #[test]
    fn only_one_creature_per_turn() {
        let mut engine = started(deck_of(FLAME_ADEPT, 20), Vec::new());
        for _ in 0..6 {
            pass_turn(&mut engine);
        }
        assert_eq!(engine.state().unwrap().players[0].resource, 4);

        assert!(engine.play_card(0, 0, None).expect("no fault"));
        let pool = engine.state().unwrap().players[0].resource;
        assert!(!engine.play_card(0, 0, None).expect("no fault"));
        assert_eq!(engine.state().unwrap().players[0].resource, pool);
        assert_eq!(engine.state().unwrap().players[0].unit_count(), 1);
    }

    #[test]
    fn creature_play_on_full_battlefield_discards_the_card() {
        let mut engine = started(deck_of(FLAME_ADEPT, 20), Vec::new());
        for round in 0..4 {
            pass_turn(&mut engine);
            pass_turn(&mut engine);
            assert!(engine.play_card(0, 0, None).expect("no fault"), "round {round}");
        }

        let state = engine.state().unwrap();
        assert_eq!(state.players[0].unit_count(), BATTLEFIELD_SLOTS);
        assert_eq!(state.players[0].discard.len(), 1);
        assert_eq!(state.players[0].discard[0].card_id, FLAME_ADEPT);
    }

    #[test]
    fn simultaneous_combat_trades_both_units_into_their_discards() {
        let mut engine = started(deck_of(FLAME_ADEPT, 10), deck_of(TIDE_SENTINEL, 10));
        pass_turn(&mut engine);
        pass_turn(&mut engine);
        assert!(engine.play_card(0, 0, None).expect("no fault"));
        pass_turn(&mut engine);
        assert!(engine.play_card(1, 0, None).expect("no fault"));
        pass_turn(&mut engine);

        // 3/2 对 2/3：无先攻时两侧先同时扣血，再一起判定消灭。
        assert!(engine
            .execute_attack(0, 0, AttackTarget::Unit { slot: 0 })
            .expect("no fault"));

        let state = engine.state().unwrap();
        assert_eq!(state.players[0].unit_count(), 0);
        assert_eq!(state.players[1].unit_count(), 0);
        let p0_discarded: Vec<_> = state.players[0]
            .discard
            .iter()
            .filter(|card| card.card_id == FLAME_ADEPT)
            .collect();
        let p1_discarded: Vec<_> = state.players[1]
            .discard
            .iter()
            .filter(|card| card.card_id == TIDE_SENTINEL)
            .collect();
        assert_eq!(p0_discarded.len(), 1, "exactly one discard entry");
        assert_eq!(p1_discarded.len(), 1, "exactly one discard entry");
    }

    #[test]
    fn attack_first_kill_takes_zero_counter_damage() {
        let mut engine = started(deck_of(GALE_STRIKER, 10), deck_of(FLAME_ADEPT, 10));
        pass_turn(&mut engine);
        pass_turn(&mut engine);
        pass_turn(&mut engine);
        assert!(engine.play_card(1, 0, None).expect("no fault"));
        pass_turn(&mut engine);
        assert!(engine.play_card(0, 0, None).expect("no fault"));
        pass_turn(&mut engine);
        pass_turn(&mut engine);

        assert!(engine
            .execute_attack(0, 0, AttackTarget::Unit { slot: 0 })
            .expect("no fault"));

        let state = engine.state().unwrap();
        let striker = state.players[0].battlefield[0].as_ref().expect("survives");
        assert_eq!(striker.health, striker.max_health, "no counter damage");
        assert_eq!(state.players[1].unit_count(), 0);
        assert!(state.players[1]
            .discard
            .iter()
            .any(|card| card.card_id == FLAME_ADEPT));
        // 击杀经验让单位升了一级。
        assert_eq!(striker.level, 2);
    }

    #[test]
    fn one_cost_trap_counters_a_five_cost_environment() {
        let mut engine = started(deck_of(NULL_VEIL, 10), deck_of(SCORCHED_PLAINS, 10));
        assert!(engine.play_card(0, 0, None).expect("no fault"));
        assert!(engine.state().unwrap().players[0].traps[0].is_some());

        for _ in 0..9 {
            pass_turn(&mut engine);
        }
        let state = engine.state().unwrap();
        assert_eq!(state.active_player, 1);
        assert_eq!(state.players[1].resource, 5);

        assert!(engine.play_card(1, 0, None).expect("no fault"));

        let state = engine.state().unwrap();
        assert!(state.environment.is_none(), "environment never installs");
        assert!(state.players[1]
            .discard
            .iter()
            .any(|card| card.card_id == SCORCHED_PLAINS));
        assert!(state.players[0]
            .discard
            .iter()
            .any(|card| card.card_id == NULL_VEIL));
        assert!(state.players[0].traps.iter().all(|slot| slot.is_none()));
    }

    #[test]
    fn attack_trap_negates_the_attack() {
        let mut state = MatchState::bare(["A", "B"]);
        state.spawn_for_test(0, 0, 3, 2);
        state.players[1].traps[0] = Some(AMBUSH_NET);
        let mut engine = MatchEngine::from_state(builtin_content(), state);

        assert!(engine
            .execute_attack(0, 0, AttackTarget::Player)
            .expect("no fault"));

        let state = engine.state().unwrap();
        assert_eq!(state.players[1].health, 30, "negated attack deals nothing");
        assert!(state.players[1].traps[0].is_none());
        assert!(state.players[1]
            .discard
            .iter()
            .any(|card| card.card_id == AMBUSH_NET));
        assert!(state
            .history
            .iter()
            .any(|event| matches!(event, MatchEvent::AttackNegated { .. })));
    }

    #[test]
    fn buff_passive_applies_retroactively_and_to_new_units() {
        let mut state = MatchState::bare(["A", "B"]);
        state.players[0].hand = vec![DeckEntry::new(WAR_BANNER), DeckEntry::new(FLAME_ADEPT)];
        state.players[0].resource = 10;
        state.spawn_for_test(0, 0, 3, 2);
        let mut engine = MatchEngine::from_state(builtin_content(), state);

        assert!(engine.play_card(0, 0, None).expect("no fault"));
        let boosted = engine.state().unwrap().players[0].battlefield[0]
            .as_ref()
            .unwrap()
            .attack;
        assert_eq!(boosted, 4, "existing unit gains the passive");

        assert!(engine.play_card(0, 0, None).expect("no fault"));
        let fresh = engine.state().unwrap().players[0].battlefield[1]
            .as_ref()
            .unwrap();
        assert_eq!(fresh.attack, 4, "new unit enters with the passive applied");
    }

    #[test]
    fn environment_hits_every_unit_at_each_turn_start() {
        let mut state = MatchState::bare(["A", "B"]);
        state.environment = Some(EnvironmentSlot {
            card_id: SCORCHED_PLAINS,
            owner: 0,
        });
        state.spawn_for_test(0, 0, 2, 3);
        state.spawn_for_test(1, 0, 2, 3);
        let mut engine = MatchEngine::from_state(builtin_content(), state);

        pass_turn(&mut engine);

        let state = engine.state().unwrap();
        assert_eq!(state.players[0].battlefield[0].as_ref().unwrap().health, 2);
        assert_eq!(state.players[1].battlefield[0].as_ref().unwrap().health, 2);
    }

    #[test]
    fn burn_counter_ticks_down_and_expires() {
        let mut state = MatchState::bare(["A", "B"]);
        state.spawn_for_test(1, 0, 2, 3);
        state.players[1].battlefield[0]
            .as_mut()
            .unwrap()
            .add_counter(CounterKind::Burn, 1, Some(2));
        let mut engine = MatchEngine::from_state(builtin_content(), state);

        pass_turn(&mut engine);
        let unit = engine.state().unwrap().players[1].battlefield[0]
            .as_ref()
            .unwrap();
        assert_eq!(unit.health, 2);
        assert_eq!(unit.counters[0].remaining_turns, Some(1));

        pass_turn(&mut engine);
        pass_turn(&mut engine);
        let unit = engine.state().unwrap().players[1].battlefield[0]
            .as_ref()
            .unwrap();
        assert_eq!(unit.health, 1);
        assert!(unit.counters.is_empty(), "expired counter is removed");
    }

    #[test]
    fn immobilize_blocks_attack_until_it_expires() {
        let mut state = MatchState::bare(["A", "B"]);
        state.spawn_for_test(0, 0, 3, 3);
        state.players[0].battlefield[0]
            .as_mut()
            .unwrap()
            .add_counter(CounterKind::Immobilize, 0, Some(1));
        let mut engine = MatchEngine::from_state(builtin_content(), state);

        assert!(!engine
            .execute_attack(0, 0, AttackTarget::Player)
            .expect("no fault"));

        pass_turn(&mut engine);
        pass_turn(&mut engine);
        assert!(engine
            .execute_attack(0, 0, AttackTarget::Player)
            .expect("no fault"));
    }

    #[test]
    fn kill_xp_levels_a_creature_and_materializes_stat_gains() {
        let mut state = MatchState::bare(["A", "B"]);
        state.spawn_for_test(0, 0, 5, 5);
        {
            let unit = state.players[0].battlefield[0].as_mut().unwrap();
            unit.card_id = EMBER_COLOSSUS;
            unit.level = 2;
            unit.xp = 150;
        }
        state.spawn_for_test(1, 0, 1, 1);
        let mut engine = MatchEngine::from_state(builtin_content(), state);

        assert!(engine
            .execute_attack(0, 0, AttackTarget::Unit { slot: 0 })
            .expect("no fault"));

        let state = engine.state().unwrap();
        let unit = state.players[0].battlefield[0].as_ref().expect("survives");
        assert_eq!(unit.level, 3);
        assert_eq!(unit.attack, 6, "milestone attack gain applied");
        assert!(state
            .history
            .iter()
            .any(|event| matches!(event, MatchEvent::UnitLeveled { level: 3, .. })));
    }

    #[test]
    fn match_ends_the_moment_health_reaches_zero() {
        let mut state = MatchState::bare(["A", "B"]);
        state.players[1].health = 3;
        state.spawn_for_test(0, 0, 5, 5);
        let mut engine = MatchEngine::from_state(builtin_content(), state);

        assert!(engine
            .execute_attack(0, 0, AttackTarget::Player)
            .expect("no fault"));

        let state = engine.state().unwrap();
        assert_eq!(state.players[1].health, 0, "health floors at zero");
        assert!(state.is_finished());
        assert_eq!(state.outcome, Some(MatchOutcome::Winner { player: 0 }));
        let endings = state
            .history
            .iter()
            .filter(|event| matches!(event, MatchEvent::MatchEnded { .. }))
            .count();
        assert_eq!(endings, 1, "winner determination runs exactly once");

        // 终局后一切操作都被拒绝。
        assert!(!engine.play_card(0, 0, None).expect("no fault"));
        assert!(!engine
            .execute_attack(0, 0, AttackTarget::Player)
            .expect("no fault"));
        assert!(!engine.end_turn().expect("no fault").accepted);
    }

    #[test]
    fn snapshot_is_idle_before_start_and_after_reset() {
        let mut engine = MatchEngine::with_builtin();
        assert_eq!(engine.snapshot(), EngineSnapshot::Idle);
        assert!(!engine.play_card(0, 0, None).expect("acting early is a rejection"));

        engine
            .start_match(sample_deck(), sample_deck(), MatchOptions::default())
            .expect("match should start");
        assert!(matches!(engine.snapshot(), EngineSnapshot::Active { .. }));

        engine.reset();
        assert_eq!(engine.snapshot(), EngineSnapshot::Idle);
        assert!(matches!(engine.end_turn(), Err(MatchFault::NotStarted)));
    }

    #[test]
    fn unknown_card_in_a_deck_is_an_integration_fault() {
        let mut engine = MatchEngine::with_builtin();
        let result = engine.start_match(
            vec![DeckEntry::new(9999)],
            Vec::new(),
            MatchOptions::default(),
        );
        assert!(matches!(
            result,
            Err(MatchFault::UnknownCard { card_id: 9999 })
        ));
    }
}
