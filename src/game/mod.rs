//! 游戏核心逻辑模块（状态机、规则引擎、技能结算等）。

pub mod combat;
pub mod content;
pub mod effects;
pub mod leveling;
pub mod rules;
pub mod state;

pub use combat::MatchOutcome;
pub use content::{
    builtin_content,
    sample_deck,
    AbilityDef,
    AbilityEffect,
    AbilityUpgrade,
    Affinity,
    CardCategory,
    CardDefinition,
    CardId,
    ContentSource,
    DeckEntry,
    LevelingConfig,
    MapContent,
    Milestone,
    StatGain,
    TrapDef,
};
pub use effects::{
    AbilityContext,
    AbilityTrigger,
    AttackModifier,
    CounterKind,
    EffectCondition,
    EffectKind,
    EffectOutcome,
    EffectTarget,
    ModifierDuration,
    StatKind,
    StateDelta,
    TargetRef,
    TrapTrigger,
};
pub use rules::{
    AttackTarget,
    EngineSnapshot,
    MatchEngine,
    MatchFault,
    TurnResolution,
};
pub use state::{
    BattlePosition,
    EnvironmentSlot,
    InstanceId,
    IntegrityError,
    MatchEvent,
    MatchOptions,
    MatchState,
    PlayerId,
    PlayerState,
    StatusCounter,
    TempModifier,
    Unit,
    BATTLEFIELD_SLOTS,
    BUFF_SLOTS,
    INITIAL_HAND_SIZE,
    RESOURCE_CAP,
    TRAP_SLOTS,
};
