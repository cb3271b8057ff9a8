use std::collections::HashMap;
use std::rc::Rc;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::effects::{
    AbilityTrigger, AttackModifier, CounterKind, EffectCondition, EffectKind, EffectTarget,
    ModifierDuration, StatKind, TrapTrigger,
};

/// 全局唯一的卡牌定义标识。
pub type CardId = u32;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CardCategory {
    Creature,
    Environment,
    Instant,
    Trap,
    Buff,
}

/// 卡牌的元素属性，部分效果条件会检查它。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Affinity {
    Flame,
    Tide,
    Gale,
    Stone,
    Void,
}

/// 单个效果及其可选的触发条件。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AbilityEffect {
    pub kind: EffectKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<EffectCondition>,
}

impl AbilityEffect {
    pub fn new(kind: EffectKind) -> Self {
        Self {
            kind,
            condition: None,
        }
    }

    pub fn when(mut self, condition: EffectCondition) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// 卡牌技能：触发器 + 按声明顺序排列的效果列表。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AbilityDef {
    pub name: String,
    pub trigger: AbilityTrigger,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation_cost: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses_per_turn: Option<u8>,
    pub effects: Vec<AbilityEffect>,
}

impl AbilityDef {
    pub fn new(name: impl Into<String>, trigger: AbilityTrigger, effects: Vec<AbilityEffect>) -> Self {
        Self {
            name: name.into(),
            trigger,
            activation_cost: None,
            uses_per_turn: None,
            effects,
        }
    }

    pub fn with_activation_cost(mut self, cost: u8) -> Self {
        self.activation_cost = Some(cost);
        self
    }

    pub fn with_uses_per_turn(mut self, cap: u8) -> Self {
        self.uses_per_turn = Some(cap);
        self
    }
}

/// 陷阱卡的触发器与效果，面朝下放置后由对手的行动激活。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrapDef {
    pub trigger: TrapTrigger,
    pub effects: Vec<AbilityEffect>,
}

/// 某一等级的累计属性加成（相对一级基础值的总量）。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatGain {
    pub level: u8,
    pub attack: i16,
    pub health: i16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum AbilityUpgrade {
    Add { ability: AbilityDef },
    Replace { name: String, ability: AbilityDef },
}

/// 里程碑：达到指定等级时对技能列表做一次增改。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Milestone {
    pub level: u8,
    pub upgrade: AbilityUpgrade,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LevelingConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gains: Vec<StatGain>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub milestones: Vec<Milestone>,
}

/// 不可变的卡牌定义，由内容源提供。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardDefinition {
    pub id: CardId,
    pub name: String,
    pub category: CardCategory,
    pub affinity: Affinity,
    pub cost: u8,
    #[serde(default)]
    pub attack: i16,
    #[serde(default)]
    pub health: i16,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub abilities: Vec<AbilityDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trap: Option<TrapDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leveling: Option<LevelingConfig>,
}

impl CardDefinition {
    pub fn creature(
        id: CardId,
        name: impl Into<String>,
        affinity: Affinity,
        cost: u8,
        attack: i16,
        health: i16,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            category: CardCategory::Creature,
            affinity,
            cost,
            attack,
            health,
            abilities: Vec::new(),
            trap: None,
            leveling: None,
        }
    }

    pub fn spell(
        id: CardId,
        name: impl Into<String>,
        category: CardCategory,
        affinity: Affinity,
        cost: u8,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            category,
            affinity,
            cost,
            attack: 0,
            health: 0,
            abilities: Vec::new(),
            trap: None,
            leveling: None,
        }
    }

    pub fn with_abilities(mut self, abilities: Vec<AbilityDef>) -> Self {
        self.abilities = abilities;
        self
    }

    pub fn with_trap(mut self, trap: TrapDef) -> Self {
        self.trap = Some(trap);
        self
    }

    pub fn with_leveling(mut self, leveling: LevelingConfig) -> Self {
        self.leveling = Some(leveling);
        self
    }
}

/// 一条牌组条目：卡牌 id 与其初始等级。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeckEntry {
    pub card_id: CardId,
    #[serde(default = "default_level")]
    pub level: u8,
}

fn default_level() -> u8 {
    1
}

impl DeckEntry {
    pub fn new(card_id: CardId) -> Self {
        Self { card_id, level: 1 }
    }

    pub fn at_level(card_id: CardId, level: u8) -> Self {
        Self {
            card_id,
            level: level.max(1),
        }
    }
}

/// 只读的卡牌内容源。引擎通过它按 id 查询定义，
/// 替换底层数据不需要改动核心逻辑。
pub trait ContentSource {
    fn definition(&self, id: CardId) -> Option<&CardDefinition>;
}

#[derive(Debug, Default)]
pub struct MapContent {
    cards: HashMap<CardId, CardDefinition>,
}

impl MapContent {
    pub fn new(cards: Vec<CardDefinition>) -> Self {
        Self {
            cards: cards.into_iter().map(|card| (card.id, card)).collect(),
        }
    }
}

impl ContentSource for MapContent {
    fn definition(&self, id: CardId) -> Option<&CardDefinition> {
        self.cards.get(&id)
    }
}

pub const FLAME_ADEPT: CardId = 1;
pub const TIDE_SENTINEL: CardId = 2;
pub const GALE_STRIKER: CardId = 3;
pub const STONE_WARDEN: CardId = 4;
pub const VOID_REAPER: CardId = 5;
pub const EMBER_COLOSSUS: CardId = 6;
pub const LIGHTNING_SURGE: CardId = 20;
pub const RENEWAL_RAIN: CardId = 21;
pub const SNARE_PIT: CardId = 40;
pub const NULL_VEIL: CardId = 41;
pub const AMBUSH_NET: CardId = 42;
pub const SCORCHED_PLAINS: CardId = 60;
pub const WAR_BANNER: CardId = 80;

static BUILTIN_CARDS: Lazy<MapContent> = Lazy::new(|| MapContent::new(builtin_definitions()));

/// 内置卡牌表,测试与演示共用的默认内容源。
pub fn builtin_content() -> Rc<dyn ContentSource> {
    Rc::new(BuiltinContent)
}

struct BuiltinContent;

impl ContentSource for BuiltinContent {
    fn definition(&self, id: CardId) -> Option<&CardDefinition> {
        BUILTIN_CARDS.definition(id)
    }
}

fn builtin_definitions() -> Vec<CardDefinition> {
    vec![
        CardDefinition::creature(FLAME_ADEPT, "Flame Adept", Affinity::Flame, 2, 3, 2),
        CardDefinition::creature(TIDE_SENTINEL, "Tide Sentinel", Affinity::Tide, 2, 2, 3)
            .with_abilities(vec![AbilityDef::new(
                "Soothing Current",
                AbilityTrigger::TurnStart,
                vec![AbilityEffect::new(EffectKind::Heal {
                    target: EffectTarget::OwnPlayer,
                    amount: 1,
                })],
            )]),
        CardDefinition::creature(GALE_STRIKER, "Gale Striker", Affinity::Gale, 3, 2, 2)
            .with_abilities(vec![AbilityDef::new(
                "Wind Step",
                AbilityTrigger::Passive,
                vec![AbilityEffect::new(EffectKind::AttackModifier {
                    modifier: AttackModifier::AttackFirst,
                })],
            )]),
        CardDefinition::creature(STONE_WARDEN, "Stone Warden", Affinity::Stone, 4, 2, 6)
            .with_abilities(vec![AbilityDef::new(
                "Rallying Presence",
                AbilityTrigger::AllySummoned,
                vec![AbilityEffect::new(EffectKind::ModifyStat {
                    target: EffectTarget::SelfUnit,
                    stat: StatKind::Attack,
                    delta: 1,
                    duration: ModifierDuration::EndOfTurn,
                })],
            )]),
        CardDefinition::creature(VOID_REAPER, "Void Reaper", Affinity::Void, 5, 4, 3)
            .with_abilities(vec![
                AbilityDef::new(
                    "Phase Blade",
                    AbilityTrigger::Passive,
                    vec![AbilityEffect::new(EffectKind::AttackModifier {
                        modifier: AttackModifier::CannotBeCountered,
                    })],
                ),
                AbilityDef::new(
                    "Devour",
                    AbilityTrigger::Passive,
                    vec![AbilityEffect::new(EffectKind::AttackModifier {
                        modifier: AttackModifier::InstantDestroy,
                    })
                    .when(EffectCondition::EnemiesAtLeast { count: 3 })],
                ),
            ]),
        CardDefinition::creature(EMBER_COLOSSUS, "Ember Colossus", Affinity::Flame, 6, 5, 5)
            .with_abilities(vec![AbilityDef::new(
                "Cinder Veil",
                AbilityTrigger::Damaged,
                vec![AbilityEffect::new(EffectKind::InflictCounter {
                    target: EffectTarget::Chosen,
                    counter: CounterKind::Burn,
                    amount: 1,
                    turns: Some(2),
                })],
            )])
            .with_leveling(LevelingConfig {
                gains: vec![
                    StatGain {
                        level: 3,
                        attack: 1,
                        health: 2,
                    },
                    StatGain {
                        level: 5,
                        attack: 3,
                        health: 4,
                    },
                ],
                milestones: vec![
                    Milestone {
                        level: 3,
                        upgrade: AbilityUpgrade::Add {
                            ability: AbilityDef::new(
                                "Molten Core",
                                AbilityTrigger::TurnEnd,
                                vec![AbilityEffect::new(EffectKind::DealDamage {
                                    target: EffectTarget::EnemyPlayer,
                                    amount: 1,
                                })],
                            ),
                        },
                    },
                    Milestone {
                        level: 5,
                        upgrade: AbilityUpgrade::Replace {
                            name: "Cinder Veil".into(),
                            ability: AbilityDef::new(
                                "Inferno Veil",
                                AbilityTrigger::Damaged,
                                vec![AbilityEffect::new(EffectKind::InflictCounter {
                                    target: EffectTarget::Chosen,
                                    counter: CounterKind::Burn,
                                    amount: 2,
                                    turns: Some(2),
                                })],
                            ),
                        },
                    },
                ],
            }),
        CardDefinition::spell(
            LIGHTNING_SURGE,
            "Lightning Surge",
            CardCategory::Instant,
            Affinity::Gale,
            3,
        )
        .with_abilities(vec![AbilityDef::new(
            "Surge",
            AbilityTrigger::Cast,
            vec![AbilityEffect::new(EffectKind::DealDamage {
                target: EffectTarget::Chosen,
                amount: 3,
            })],
        )]),
        CardDefinition::spell(
            RENEWAL_RAIN,
            "Renewal Rain",
            CardCategory::Instant,
            Affinity::Tide,
            2,
        )
        .with_abilities(vec![AbilityDef::new(
            "Renewal",
            AbilityTrigger::Cast,
            vec![
                AbilityEffect::new(EffectKind::Heal {
                    target: EffectTarget::OwnPlayer,
                    amount: 4,
                }),
                AbilityEffect::new(EffectKind::DrawCards {
                    target: EffectTarget::OwnPlayer,
                    count: 1,
                }),
            ],
        )]),
        CardDefinition::spell(SNARE_PIT, "Snare Pit", CardCategory::Trap, Affinity::Stone, 2)
            .with_trap(TrapDef {
                trigger: TrapTrigger::CreaturePlay,
                effects: vec![AbilityEffect::new(EffectKind::DealDamage {
                    target: EffectTarget::EnemyPlayer,
                    amount: 2,
                })],
            }),
        CardDefinition::spell(NULL_VEIL, "Null Veil", CardCategory::Trap, Affinity::Void, 1)
            .with_trap(TrapDef {
                trigger: TrapTrigger::EnvironmentPlay,
                effects: vec![AbilityEffect::new(EffectKind::NullifyEffect)],
            }),
        CardDefinition::spell(AMBUSH_NET, "Ambush Net", CardCategory::Trap, Affinity::Gale, 2)
            .with_trap(TrapDef {
                trigger: TrapTrigger::Attack,
                effects: vec![AbilityEffect::new(EffectKind::NullifyEffect)],
            }),
        CardDefinition::spell(
            SCORCHED_PLAINS,
            "Scorched Plains",
            CardCategory::Environment,
            Affinity::Flame,
            5,
        )
        .with_abilities(vec![
            AbilityDef::new(
                "Heat Haze",
                AbilityTrigger::EveryTurnStart,
                vec![AbilityEffect::new(EffectKind::DealDamage {
                    target: EffectTarget::AllUnits,
                    amount: 1,
                })
                .when(EffectCondition::Any {
                    conditions: vec![
                        EffectCondition::AlliesAtLeast { count: 1 },
                        EffectCondition::EnemiesAtLeast { count: 1 },
                    ],
                })],
            ),
            AbilityDef::new(
                "Shimmer",
                AbilityTrigger::Install,
                vec![AbilityEffect::new(EffectKind::DrawCards {
                    target: EffectTarget::OwnPlayer,
                    count: 1,
                })],
            ),
        ]),
        CardDefinition::spell(WAR_BANNER, "War Banner", CardCategory::Buff, Affinity::Stone, 3)
            .with_abilities(vec![
                AbilityDef::new(
                    "Standard of War",
                    AbilityTrigger::Passive,
                    vec![AbilityEffect::new(EffectKind::ModifyStat {
                        target: EffectTarget::AllAllies,
                        stat: StatKind::Attack,
                        delta: 1,
                        duration: ModifierDuration::WhileOnField,
                    })],
                ),
                AbilityDef::new(
                    "Rally",
                    AbilityTrigger::Install,
                    vec![AbilityEffect::new(EffectKind::DrawCards {
                        target: EffectTarget::OwnPlayer,
                        count: 1,
                    })],
                ),
            ]),
    ]
}

/// 演示/测试用的默认牌组。
pub fn sample_deck() -> Vec<DeckEntry> {
    vec![
        DeckEntry::new(FLAME_ADEPT),
        DeckEntry::new(TIDE_SENTINEL),
        DeckEntry::new(GALE_STRIKER),
        DeckEntry::new(STONE_WARDEN),
        DeckEntry::new(VOID_REAPER),
        DeckEntry::at_level(EMBER_COLOSSUS, 3),
        DeckEntry::new(LIGHTNING_SURGE),
        DeckEntry::new(RENEWAL_RAIN),
        DeckEntry::new(SNARE_PIT),
        DeckEntry::new(NULL_VEIL),
        DeckEntry::new(AMBUSH_NET),
        DeckEntry::new(SCORCHED_PLAINS),
        DeckEntry::new(WAR_BANNER),
        DeckEntry::new(FLAME_ADEPT),
        DeckEntry::new(TIDE_SENTINEL),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_content_resolves_every_sample_entry() {
        let content = builtin_content();
        for entry in sample_deck() {
            assert!(
                content.definition(entry.card_id).is_some(),
                "missing definition for card {}",
                entry.card_id
            );
        }
    }

    #[test]
    fn unknown_id_yields_none() {
        let content = builtin_content();
        assert!(content.definition(9999).is_none());
    }

    #[test]
    fn definitions_round_trip_through_json() {
        for card in builtin_definitions() {
            let json = serde_json::to_string(&card).expect("serialize");
            let back: CardDefinition = serde_json::from_str(&json).expect("deserialize");
            assert_eq!(card, back);
        }
    }
}
