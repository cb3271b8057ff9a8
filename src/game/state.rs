use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::combat::MatchOutcome;
use super::content::{Affinity, CardId, DeckEntry};
use super::effects::{CounterKind, ModifierDuration, StatKind, TargetRef};

pub const BATTLEFIELD_SLOTS: usize = 3;
pub const TRAP_SLOTS: usize = 3;
pub const BUFF_SLOTS: usize = 2;
pub const STARTING_HEALTH: i16 = 30;
pub const RESOURCE_CAP: u8 = 10;
pub const INITIAL_HAND_SIZE: usize = 5;

/// 玩家标识（0 或 1）。
pub type PlayerId = u8;
/// 场上单位实例标识。
pub type InstanceId = u32;

/// 对局状态机位置，按回合在两名玩家之间交替。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BattlePosition {
    StartOfTurn,
    Playing,
    EndOfTurn,
    Finished,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_a: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_b: Option<String>,
    /// 回合计时，仅供外层使用，核心不做强制。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_time_limit_secs: Option<u32>,
    /// 建议的最大回合数，核心同样不做强制。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
}

/// 状态计数：类型 + 数量，临时条目带剩余回合数。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusCounter {
    pub kind: CounterKind,
    pub amount: i16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_turns: Option<u8>,
}

/// 激活中的临时属性修正。到期时精确回退应用时记录的增量，
/// 绝不在到期时重新计算。`remaining_turns` 为 `None` 表示
/// 在场期间一直有效。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TempModifier {
    pub stat: StatKind,
    pub delta: i16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_turns: Option<u8>,
}

/// 战场上的卡牌实例。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Unit {
    pub instance_id: InstanceId,
    pub card_id: CardId,
    pub affinity: Affinity,
    pub level: u8,
    pub xp: u32,
    pub base_attack: i16,
    pub attack: i16,
    pub health: i16,
    pub max_health: i16,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub counters: Vec<StatusCounter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modifiers: Vec<TempModifier>,
    /// 本回合各技能的已用次数，回合开始时清零。
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ability_uses: Vec<AbilityUse>,
    pub summoning_sick: bool,
    pub slot: usize,
}

/// 技能在当前回合内的使用计数。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AbilityUse {
    pub name: String,
    pub count: u8,
}

impl Unit {
    pub fn use_count(&self, name: &str) -> u8 {
        self.ability_uses
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.count)
            .unwrap_or(0)
    }

    pub fn record_use(&mut self, name: &str) {
        if let Some(entry) = self.ability_uses.iter_mut().find(|entry| entry.name == name) {
            entry.count += 1;
        } else {
            self.ability_uses.push(AbilityUse {
                name: name.into(),
                count: 1,
            });
        }
    }

    pub fn reset_uses(&mut self) {
        self.ability_uses.clear();
    }

    pub fn has_counter(&self, kind: CounterKind) -> bool {
        self.counters.iter().any(|counter| counter.kind == kind)
    }

    /// 同类计数合并：数量累加，剩余回合取较大值。
    pub fn add_counter(&mut self, kind: CounterKind, amount: i16, turns: Option<u8>) {
        if let Some(existing) = self.counters.iter_mut().find(|counter| counter.kind == kind) {
            existing.amount += amount;
            existing.remaining_turns = match (existing.remaining_turns, turns) {
                (Some(a), Some(b)) => Some(a.max(b)),
                _ => None,
            };
        } else {
            self.counters.push(StatusCounter {
                kind,
                amount,
                remaining_turns: turns,
            });
        }
    }

    pub fn remove_counters(&mut self, kind: Option<CounterKind>) -> Vec<StatusCounter> {
        match kind {
            Some(kind) => {
                let (removed, kept) = self
                    .counters
                    .drain(..)
                    .partition(|counter| counter.kind == kind);
                self.counters = kept;
                removed
            }
            None => self.counters.drain(..).collect(),
        }
    }

    pub fn apply_stat_change(&mut self, stat: StatKind, delta: i16, duration: ModifierDuration) {
        match stat {
            StatKind::Attack => self.attack += delta,
            StatKind::Health => {
                self.max_health += delta;
                self.health += delta;
            }
        }
        match duration {
            ModifierDuration::Permanent => {
                if stat == StatKind::Attack {
                    self.base_attack += delta;
                }
            }
            ModifierDuration::EndOfTurn => self.modifiers.push(TempModifier {
                stat,
                delta,
                remaining_turns: Some(1),
            }),
            ModifierDuration::WhileOnField => self.modifiers.push(TempModifier {
                stat,
                delta,
                remaining_turns: None,
            }),
        }
    }

    /// 回合结束时递减临时修正；归零的精确回退并返回。
    pub fn expire_modifiers(&mut self) -> Vec<TempModifier> {
        let mut expired = Vec::new();
        let mut kept = Vec::new();
        for mut modifier in self.modifiers.drain(..) {
            match modifier.remaining_turns {
                Some(1) => expired.push(modifier),
                Some(turns) => {
                    modifier.remaining_turns = Some(turns - 1);
                    kept.push(modifier);
                }
                None => kept.push(modifier),
            }
        }
        self.modifiers = kept;
        for modifier in &expired {
            match modifier.stat {
                StatKind::Attack => self.attack -= modifier.delta,
                StatKind::Health => {
                    self.max_health -= modifier.delta;
                    self.health -= modifier.delta;
                }
            }
        }
        expired
    }

    /// 消灭敌方单位获得经验；跨过 `等级 × 100` 时升一级。
    /// 返回是否升级，属性加成由调用方依据定义物化。
    pub fn award_xp(&mut self, amount: u32) -> bool {
        self.xp += amount;
        if self.xp >= self.level as u32 * 100 {
            self.level += 1;
            true
        } else {
            false
        }
    }
}

/// 环境槽：双方共享，记录安装者。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentSlot {
    pub card_id: CardId,
    pub owner: PlayerId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerState {
    pub name: String,
    pub health: i16,
    pub resource: u8,
    pub resource_cap: u8,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deck: Vec<DeckEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hand: Vec<DeckEntry>,
    pub battlefield: [Option<Unit>; BATTLEFIELD_SLOTS],
    pub traps: [Option<CardId>; TRAP_SLOTS],
    pub buffs: [Option<CardId>; BUFF_SLOTS],
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub discard: Vec<DeckEntry>,
    #[serde(default)]
    pub summons_this_turn: u8,
}

impl PlayerState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            health: STARTING_HEALTH,
            resource: 0,
            resource_cap: RESOURCE_CAP,
            deck: Vec::new(),
            hand: Vec::new(),
            battlefield: [None, None, None],
            traps: [None, None, None],
            buffs: [None, None],
            discard: Vec::new(),
            summons_this_turn: 0,
        }
    }

    /// 从牌库尾部抽一张进手牌。
    pub fn draw(&mut self) -> Option<DeckEntry> {
        let card = self.deck.pop()?;
        self.hand.push(card);
        Some(card)
    }

    pub fn unit_count(&self) -> usize {
        self.battlefield.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn units(&self) -> impl Iterator<Item = (usize, &Unit)> {
        self.battlefield
            .iter()
            .enumerate()
            .filter_map(|(slot, unit)| unit.as_ref().map(|unit| (slot, unit)))
    }

    pub fn first_empty_unit_slot(&self) -> Option<usize> {
        self.battlefield.iter().position(|slot| slot.is_none())
    }

    pub fn first_empty_trap_slot(&self) -> Option<usize> {
        self.traps.iter().position(|slot| slot.is_none())
    }

    pub fn first_empty_buff_slot(&self) -> Option<usize> {
        self.buffs.iter().position(|slot| slot.is_none())
    }
}

/// 对局事件流，构成回合历史记录。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum MatchEvent {
    MatchStarted {
        first_player: PlayerId,
    },
    TurnStarted {
        player: PlayerId,
        turn: u32,
    },
    TurnEnded {
        player: PlayerId,
    },
    CardDrawn {
        player: PlayerId,
        card_id: CardId,
    },
    CardPlayed {
        player: PlayerId,
        card_id: CardId,
    },
    CardDiscarded {
        player: PlayerId,
        card_id: CardId,
    },
    UnitSummoned {
        player: PlayerId,
        slot: usize,
        instance_id: InstanceId,
        card_id: CardId,
    },
    TrapSet {
        player: PlayerId,
        slot: usize,
    },
    TrapTriggered {
        player: PlayerId,
        slot: usize,
        card_id: CardId,
    },
    EnvironmentInstalled {
        player: PlayerId,
        card_id: CardId,
    },
    EnvironmentReplaced {
        card_id: CardId,
    },
    EnvironmentCountered {
        card_id: CardId,
    },
    BuffInstalled {
        player: PlayerId,
        slot: usize,
        card_id: CardId,
    },
    AttackDeclared {
        player: PlayerId,
        slot: usize,
        target: TargetRef,
    },
    AttackNegated {
        player: PlayerId,
        slot: usize,
    },
    UnitDamaged {
        player: PlayerId,
        slot: usize,
        amount: i16,
        remaining: i16,
    },
    PlayerDamaged {
        player: PlayerId,
        amount: i16,
        remaining: i16,
    },
    UnitHealed {
        player: PlayerId,
        slot: usize,
        amount: i16,
    },
    PlayerHealed {
        player: PlayerId,
        amount: i16,
    },
    StatChanged {
        player: PlayerId,
        slot: usize,
        stat: StatKind,
        delta: i16,
    },
    CounterApplied {
        player: PlayerId,
        slot: usize,
        counter: CounterKind,
        amount: i16,
    },
    CounterExpired {
        player: PlayerId,
        slot: usize,
        counter: CounterKind,
    },
    ModifierExpired {
        player: PlayerId,
        slot: usize,
        stat: StatKind,
        delta: i16,
    },
    ResourceGained {
        player: PlayerId,
        amount: u8,
        total: u8,
    },
    UnitDestroyed {
        player: PlayerId,
        slot: usize,
        instance_id: InstanceId,
        card_id: CardId,
    },
    UnitLeveled {
        player: PlayerId,
        slot: usize,
        level: u8,
    },
    PositionsSwapped {
        player: PlayerId,
        slot_a: usize,
        slot_b: usize,
    },
    EffectSkipped {
        reason: String,
    },
    MatchEnded {
        outcome: MatchOutcome,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum IntegrityError {
    InvalidActivePlayer { player: PlayerId },
    DuplicateInstanceId { instance_id: InstanceId },
    NegativeHealth { player: PlayerId, value: i16 },
    ResourceOverCap { player: PlayerId, value: u8 },
    SlotMismatch { player: PlayerId, slot: usize },
}

/// 对局整体状态。引擎是唯一的修改者。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchState {
    pub turn: u32,
    pub position: BattlePosition,
    pub active_player: PlayerId,
    pub players: [PlayerState; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<EnvironmentSlot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<MatchEvent>,
    #[serde(default)]
    pub options: MatchOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<MatchOutcome>,
    #[serde(default)]
    pub next_instance: InstanceId,
}

impl MatchState {
    pub fn new(players: [PlayerState; 2], options: MatchOptions) -> Self {
        Self {
            turn: 1,
            position: BattlePosition::StartOfTurn,
            active_player: 0,
            players,
            environment: None,
            history: Vec::new(),
            options,
            outcome: None,
            next_instance: 1,
        }
    }

    pub fn opponent_of(&self, player: PlayerId) -> PlayerId {
        1 - player
    }

    pub fn record(&mut self, event: MatchEvent) {
        self.history.push(event);
    }

    pub fn is_finished(&self) -> bool {
        self.position == BattlePosition::Finished
    }

    pub fn allocate_instance(&mut self) -> InstanceId {
        let id = self.next_instance;
        self.next_instance += 1;
        id
    }

    pub fn unit(&self, player: PlayerId, slot: usize) -> Option<&Unit> {
        self.players[player as usize].battlefield.get(slot)?.as_ref()
    }

    pub fn unit_mut(&mut self, player: PlayerId, slot: usize) -> Option<&mut Unit> {
        self.players[player as usize].battlefield.get_mut(slot)?.as_mut()
    }

    /// 把单位移出战场。调用方负责丢弃与后续派发。
    pub fn remove_unit(&mut self, player: PlayerId, slot: usize) -> Option<Unit> {
        self.players[player as usize].battlefield.get_mut(slot)?.take()
    }

    pub fn integrity_check(&self) -> Result<(), IntegrityError> {
        if self.active_player > 1 {
            return Err(IntegrityError::InvalidActivePlayer {
                player: self.active_player,
            });
        }

        let mut seen = HashSet::new();
        for (index, player) in self.players.iter().enumerate() {
            let player_id = index as PlayerId;
            if player.health < 0 {
                return Err(IntegrityError::NegativeHealth {
                    player: player_id,
                    value: player.health,
                });
            }
            if player.resource > player.resource_cap {
                return Err(IntegrityError::ResourceOverCap {
                    player: player_id,
                    value: player.resource,
                });
            }
            for (slot, unit) in player.units() {
                if unit.slot != slot {
                    return Err(IntegrityError::SlotMismatch {
                        player: player_id,
                        slot,
                    });
                }
                if !seen.insert(unit.instance_id) {
                    return Err(IntegrityError::DuplicateInstanceId {
                        instance_id: unit.instance_id,
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
impl MatchState {
    /// 测试用：空白对局，双方满血零资源。
    pub fn bare(names: [&str; 2]) -> Self {
        let mut state = MatchState::new(
            [PlayerState::new(names[0]), PlayerState::new(names[1])],
            MatchOptions::default(),
        );
        state.position = BattlePosition::Playing;
        state
    }

    /// 测试用：直接向指定槽位放一个单位。
    pub fn spawn_for_test(&mut self, player: PlayerId, slot: usize, attack: i16, health: i16) {
        let instance_id = self.allocate_instance();
        self.players[player as usize].battlefield[slot] = Some(Unit {
            instance_id,
            card_id: 0,
            affinity: Affinity::Flame,
            level: 1,
            xp: 0,
            base_attack: attack,
            attack,
            health,
            max_health: health,
            counters: Vec::new(),
            modifiers: Vec::new(),
            ability_uses: Vec::new(),
            summoning_sick: false,
            slot,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draw_takes_from_the_deck_tail() {
        let mut player = PlayerState::new("A");
        player.deck = vec![DeckEntry::new(1), DeckEntry::new(2), DeckEntry::new(3)];

        let drawn = player.draw().expect("deck not empty");
        assert_eq!(drawn.card_id, 3);
        assert_eq!(player.hand.len(), 1);
        assert_eq!(player.deck.len(), 2);
    }

    #[test]
    fn draw_from_empty_deck_is_none() {
        let mut player = PlayerState::new("A");
        assert!(player.draw().is_none());
        assert!(player.hand.is_empty());
    }

    #[test]
    fn temp_modifier_expiry_reverts_the_exact_delta() {
        let mut state = MatchState::bare(["A", "B"]);
        state.spawn_for_test(0, 0, 2, 2);
        let unit = state.unit_mut(0, 0).unwrap();

        unit.apply_stat_change(StatKind::Attack, 3, ModifierDuration::EndOfTurn);
        unit.apply_stat_change(StatKind::Health, 1, ModifierDuration::WhileOnField);
        assert_eq!(unit.attack, 5);
        assert_eq!(unit.health, 3);

        let expired = unit.expire_modifiers();
        assert_eq!(expired.len(), 1);
        assert_eq!(unit.attack, 2);
        // 在场期间有效的修正不回退。
        assert_eq!(unit.health, 3);
        assert_eq!(unit.modifiers.len(), 1);
    }

    #[test]
    fn permanent_stat_change_raises_the_base() {
        let mut state = MatchState::bare(["A", "B"]);
        state.spawn_for_test(0, 0, 2, 2);
        let unit = state.unit_mut(0, 0).unwrap();

        unit.apply_stat_change(StatKind::Attack, 2, ModifierDuration::Permanent);
        assert_eq!(unit.base_attack, 4);
        assert_eq!(unit.attack, 4);
        assert!(unit.modifiers.is_empty());
    }

    #[test]
    fn counters_of_the_same_kind_merge() {
        let mut state = MatchState::bare(["A", "B"]);
        state.spawn_for_test(0, 0, 2, 2);
        let unit = state.unit_mut(0, 0).unwrap();

        unit.add_counter(CounterKind::Burn, 1, Some(2));
        unit.add_counter(CounterKind::Burn, 2, Some(1));
        assert_eq!(unit.counters.len(), 1);
        assert_eq!(unit.counters[0].amount, 3);
        assert_eq!(unit.counters[0].remaining_turns, Some(2));
    }

    #[test]
    fn xp_crossing_the_threshold_levels_up_once() {
        let mut state = MatchState::bare(["A", "B"]);
        state.spawn_for_test(0, 0, 2, 2);
        let unit = state.unit_mut(0, 0).unwrap();

        assert!(!unit.award_xp(50));
        assert_eq!(unit.level, 1);
        assert!(unit.award_xp(50));
        assert_eq!(unit.level, 2);
    }

    #[test]
    fn integrity_check_flags_duplicate_instances() {
        let mut state = MatchState::bare(["A", "B"]);
        state.spawn_for_test(0, 0, 1, 1);
        state.spawn_for_test(1, 0, 1, 1);
        state.players[1].battlefield[0].as_mut().unwrap().instance_id =
            state.players[0].battlefield[0].as_ref().unwrap().instance_id;

        assert!(matches!(
            state.integrity_check(),
            Err(IntegrityError::DuplicateInstanceId { .. })
        ));
    }

    #[test]
    fn state_round_trips_through_json() {
        let mut state = MatchState::bare(["A", "B"]);
        state.spawn_for_test(0, 1, 3, 4);
        state.record(MatchEvent::TurnStarted { player: 0, turn: 1 });

        let json = serde_json::to_string(&state).expect("serialize");
        let back: MatchState = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(state, back);
    }
}
