pub mod ai;
pub mod game;
pub mod utils;

use gloo_timers::future::TimeoutFuture;
use serde::Serialize;
use serde_wasm_bindgen::{from_value, to_value};
use std::str::FromStr;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;
use web_sys::js_sys::Promise;

pub use ai::{
    run_ai_turn, AbortFlag, AiAgent, AiConfig, AiDecision, AiDifficulty, AiStrategy, EngineAction,
};
pub use game::{
    builtin_content, sample_deck, AbilityDef, AbilityEffect, AbilityTrigger, Affinity,
    AttackModifier, AttackTarget, BattlePosition, CardCategory, CardDefinition, CardId,
    ContentSource, CounterKind, DeckEntry, EffectCondition, EffectKind, EffectOutcome,
    EffectTarget, EngineSnapshot, IntegrityError, MapContent, MatchEngine, MatchEvent, MatchFault,
    MatchOptions, MatchOutcome, MatchState, ModifierDuration, PlayerId, PlayerState, StatKind,
    TargetRef, TrapTrigger, TurnResolution, Unit,
};

#[cfg(feature = "wee_alloc")]
#[global_allocator]
static ALLOC: wee_alloc::WeeAlloc = wee_alloc::WeeAlloc::INIT;

#[wasm_bindgen(start)]
pub fn start() {
    set_panic_hook();
}

fn to_js_error<E: Serialize>(error: E) -> JsValue {
    to_value(&error).unwrap_or_else(|serialize_err| JsValue::from_str(&serialize_err.to_string()))
}

fn serde_to_js_error<E: std::fmt::Display>(error: E) -> JsValue {
    JsValue::from_str(&error.to_string())
}

fn ai_config(difficulty: Option<String>, strategy: Option<String>) -> AiConfig {
    let difficulty = difficulty
        .as_deref()
        .and_then(|value| AiDifficulty::from_str(value).ok())
        .unwrap_or(AiDifficulty::Normal);
    let mut config = AiConfig::from_difficulty(difficulty);
    if let Some(strategy) = strategy
        .as_deref()
        .and_then(|value| AiStrategy::from_str(value).ok())
    {
        config = config.with_strategy(strategy);
    }
    config
}

#[derive(Serialize)]
struct AiMoveResponse {
    decision: AiDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    applied: Option<TurnResolution>,
}

/// 对局句柄：持有引擎与权威状态，供前端逐步驱动。
#[wasm_bindgen]
pub struct MatchHandle {
    engine: MatchEngine,
}

impl Default for MatchHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[wasm_bindgen]
impl MatchHandle {
    #[wasm_bindgen(constructor)]
    pub fn new() -> MatchHandle {
        MatchHandle {
            engine: MatchEngine::with_builtin(),
        }
    }

    pub fn start_match_json(
        &mut self,
        deck_a_json: &str,
        deck_b_json: &str,
        options_json: Option<String>,
    ) -> Result<String, JsValue> {
        let deck_a: Vec<DeckEntry> = serde_json::from_str(deck_a_json).map_err(serde_to_js_error)?;
        let deck_b: Vec<DeckEntry> = serde_json::from_str(deck_b_json).map_err(serde_to_js_error)?;
        let options: MatchOptions = match options_json {
            Some(json) => serde_json::from_str(&json).map_err(serde_to_js_error)?,
            None => MatchOptions::default(),
        };
        let resolution = self
            .engine
            .start_match(deck_a, deck_b, options)
            .map_err(to_js_error)?;
        serde_json::to_string(&resolution).map_err(serde_to_js_error)
    }

    pub fn play_card(
        &mut self,
        player: u8,
        hand_index: usize,
        target_json: Option<String>,
    ) -> Result<String, JsValue> {
        let target: Option<TargetRef> = match target_json {
            Some(json) => Some(serde_json::from_str(&json).map_err(serde_to_js_error)?),
            None => None,
        };
        let mark = self.engine.history_len();
        let accepted = self
            .engine
            .play_card(player, hand_index, target)
            .map_err(to_js_error)?;
        let resolution = self
            .engine
            .resolution_since(accepted, mark)
            .map_err(to_js_error)?;
        serde_json::to_string(&resolution).map_err(serde_to_js_error)
    }

    pub fn execute_attack(
        &mut self,
        player: u8,
        attacker_slot: usize,
        target_json: &str,
    ) -> Result<String, JsValue> {
        let target: AttackTarget = serde_json::from_str(target_json).map_err(serde_to_js_error)?;
        let mark = self.engine.history_len();
        let accepted = self
            .engine
            .execute_attack(player, attacker_slot, target)
            .map_err(to_js_error)?;
        let resolution = self
            .engine
            .resolution_since(accepted, mark)
            .map_err(to_js_error)?;
        serde_json::to_string(&resolution).map_err(serde_to_js_error)
    }

    pub fn end_turn(&mut self) -> Result<String, JsValue> {
        let resolution = self.engine.end_turn().map_err(to_js_error)?;
        serde_json::to_string(&resolution).map_err(serde_to_js_error)
    }

    /// 对局开始前返回空状态标记。
    pub fn state_json(&self) -> Result<String, JsValue> {
        serde_json::to_string(&self.engine.snapshot()).map_err(serde_to_js_error)
    }

    pub fn set_state_json(&mut self, json: &str) -> Result<(), JsValue> {
        let state: MatchState = serde_json::from_str(json).map_err(serde_to_js_error)?;
        state.integrity_check().map_err(to_js_error)?;
        self.engine = MatchEngine::from_state(self.engine.content(), state);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.engine.reset();
    }

    pub fn apply_ai_move(
        &mut self,
        player: u8,
        difficulty: Option<String>,
        strategy: Option<String>,
    ) -> Result<String, JsValue> {
        let config = ai_config(difficulty, strategy);
        let state = self
            .engine
            .state()
            .cloned()
            .ok_or_else(|| to_js_error(MatchFault::NotStarted))?;

        let mut agent = AiAgent::new(config, self.engine.content());
        let decision = agent.decide_action(&state, player);

        let applied = match decision.action {
            Some(action) => Some(self.apply_engine_action(action)?),
            None => None,
        };

        let response = AiMoveResponse { decision, applied };
        serde_json::to_string(&response).map_err(serde_to_js_error)
    }

    /// 异步思考：可选延迟用于前端动画节奏，计算本身不持有状态。
    pub fn think(
        &self,
        player: u8,
        difficulty: Option<String>,
        strategy: Option<String>,
        delay_ms: Option<u32>,
    ) -> Promise {
        let state = self.engine.state().cloned();
        let content = self.engine.content();
        let config = ai_config(difficulty, strategy);
        let delay = delay_ms.unwrap_or(0);

        future_to_promise(async move {
            if delay > 0 {
                TimeoutFuture::new(delay).await;
            }
            let Some(state) = state else {
                return Err(to_js_error(MatchFault::NotStarted));
            };
            let mut agent = AiAgent::new(config, content);
            let decision = agent.decide_action(&state, player);
            let json = serde_json::to_string(&decision).map_err(serde_to_js_error)?;
            Ok(JsValue::from_str(&json))
        })
    }

    fn apply_engine_action(&mut self, action: EngineAction) -> Result<TurnResolution, JsValue> {
        let mark = self.engine.history_len();
        let accepted = match action {
            EngineAction::Play {
                player,
                hand_index,
                target,
            } => self
                .engine
                .play_card(player, hand_index, target)
                .map_err(to_js_error)?,
            EngineAction::Attack {
                player,
                slot,
                target,
            } => self
                .engine
                .execute_attack(player, slot, target)
                .map_err(to_js_error)?,
            EngineAction::EndTurn => self.engine.end_turn().map_err(to_js_error)?.accepted,
        };
        self.engine.resolution_since(accepted, mark).map_err(to_js_error)
    }
}

/// 返回一局内置牌组的示例对局，方便前端调试或初始化。
#[wasm_bindgen(js_name = "createMatchState")]
pub fn create_match_state() -> Result<JsValue, JsValue> {
    let mut engine = MatchEngine::with_builtin();
    let resolution = engine
        .start_match(sample_deck(), sample_deck(), MatchOptions::default())
        .map_err(to_js_error)?;
    to_value(&resolution.state).map_err(JsValue::from)
}

#[wasm_bindgen(js_name = "playCard")]
pub fn play_card(
    state: JsValue,
    player: u8,
    hand_index: usize,
    target: JsValue,
) -> Result<JsValue, JsValue> {
    let state: MatchState = from_value(state).map_err(JsValue::from)?;
    let target: Option<TargetRef> = if target.is_undefined() || target.is_null() {
        None
    } else {
        Some(from_value(target).map_err(JsValue::from)?)
    };
    let mut engine = MatchEngine::from_state(builtin_content(), state);
    let mark = engine.history_len();
    let accepted = engine
        .play_card(player, hand_index, target)
        .map_err(to_js_error)?;
    let resolution = engine.resolution_since(accepted, mark).map_err(to_js_error)?;
    to_value(&resolution).map_err(JsValue::from)
}

#[wasm_bindgen(js_name = "executeAttack")]
pub fn execute_attack(
    state: JsValue,
    player: u8,
    attacker_slot: usize,
    target: JsValue,
) -> Result<JsValue, JsValue> {
    let state: MatchState = from_value(state).map_err(JsValue::from)?;
    let target: AttackTarget = from_value(target).map_err(JsValue::from)?;
    let mut engine = MatchEngine::from_state(builtin_content(), state);
    let mark = engine.history_len();
    let accepted = engine
        .execute_attack(player, attacker_slot, target)
        .map_err(to_js_error)?;
    let resolution = engine.resolution_since(accepted, mark).map_err(to_js_error)?;
    to_value(&resolution).map_err(JsValue::from)
}

#[wasm_bindgen(js_name = "endTurn")]
pub fn end_turn(state: JsValue) -> Result<JsValue, JsValue> {
    let state: MatchState = from_value(state).map_err(JsValue::from)?;
    let mut engine = MatchEngine::from_state(builtin_content(), state);
    let resolution = engine.end_turn().map_err(to_js_error)?;
    to_value(&resolution).map_err(JsValue::from)
}

#[wasm_bindgen(js_name = "checkOutcome")]
pub fn check_outcome(state: JsValue) -> Result<JsValue, JsValue> {
    let state: MatchState = from_value(state).map_err(JsValue::from)?;
    to_value(&state.outcome).map_err(JsValue::from)
}

#[wasm_bindgen(js_name = "validateState")]
pub fn validate_state(state: JsValue) -> Result<(), JsValue> {
    let state: MatchState = from_value(state).map_err(JsValue::from)?;
    state.integrity_check().map_err(to_js_error)?;
    Ok(())
}

#[wasm_bindgen(js_name = "computeAiMove")]
pub fn compute_ai_move(
    state: JsValue,
    player: u8,
    difficulty: Option<String>,
    strategy: Option<String>,
) -> Result<JsValue, JsValue> {
    let state: MatchState = from_value(state).map_err(JsValue::from)?;
    let config = ai_config(difficulty, strategy);
    let mut agent = AiAgent::new(config, builtin_content());
    let decision = agent.decide_action(&state, player);
    to_value(&decision).map_err(JsValue::from)
}

#[cfg(feature = "console_error_panic_hook")]
fn set_panic_hook() {
    console_error_panic_hook::set_once();
}

#[cfg(not(feature = "console_error_panic_hook"))]
fn set_panic_hook() {}
