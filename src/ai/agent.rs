use std::cell::Cell;
use std::rc::Rc;
use std::str::FromStr;
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::game::{
    AttackTarget, ContentSource, MatchEngine, MatchFault, MatchState, PlayerId, TargetRef,
    TurnResolution, BATTLEFIELD_SLOTS,
};

#[derive(Debug, Clone, Copy)]
struct Clock {
    #[cfg(target_arch = "wasm32")]
    origin_ms: f64,
    #[cfg(not(target_arch = "wasm32"))]
    origin: std::time::Instant,
}

impl Clock {
    #[cfg(target_arch = "wasm32")]
    fn now() -> Self {
        Self {
            origin_ms: web_sys::js_sys::Date::now(),
        }
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn now() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }

    #[cfg(target_arch = "wasm32")]
    fn elapsed(&self) -> Duration {
        let elapsed_ms = web_sys::js_sys::Date::now() - self.origin_ms;
        Duration::from_millis(elapsed_ms.max(0.0) as u64)
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// 引擎入口动作的统一表示，AI 决策与对外序列化共用。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum EngineAction {
    Play {
        player: PlayerId,
        hand_index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<TargetRef>,
    },
    Attack {
        player: PlayerId,
        slot: usize,
        target: AttackTarget,
    },
    EndTurn,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AiStrategy {
    Aggressive,
    Control,
    Combo,
    Random,
    Adaptive,
}

impl FromStr for AiStrategy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aggressive" | "aggro" => Ok(AiStrategy::Aggressive),
            "control" => Ok(AiStrategy::Control),
            "combo" => Ok(AiStrategy::Combo),
            "random" => Ok(AiStrategy::Random),
            "adaptive" | "balanced" => Ok(AiStrategy::Adaptive),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiDifficulty {
    Easy,
    Normal,
    Hard,
    Expert,
}

impl FromStr for AiDifficulty {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "easy" => Ok(AiDifficulty::Easy),
            "normal" | "medium" => Ok(AiDifficulty::Normal),
            "hard" => Ok(AiDifficulty::Hard),
            "expert" | "extreme" => Ok(AiDifficulty::Expert),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    pub depth: u8,
    pub randomness: f64,
    pub time_limit: Duration,
    pub strategy: AiStrategy,
}

impl AiConfig {
    pub fn from_difficulty(difficulty: AiDifficulty) -> Self {
        match difficulty {
            AiDifficulty::Easy => Self {
                depth: 1,
                randomness: 1.2,
                time_limit: Duration::from_millis(40),
                strategy: AiStrategy::Random,
            },
            AiDifficulty::Normal => Self {
                depth: 2,
                randomness: 0.6,
                time_limit: Duration::from_millis(90),
                strategy: AiStrategy::Control,
            },
            AiDifficulty::Hard => Self {
                depth: 3,
                randomness: 0.2,
                time_limit: Duration::from_millis(160),
                strategy: AiStrategy::Aggressive,
            },
            AiDifficulty::Expert => Self {
                depth: 4,
                randomness: 0.0,
                time_limit: Duration::from_millis(260),
                strategy: AiStrategy::Adaptive,
            },
        }
    }

    pub fn with_strategy(mut self, strategy: AiStrategy) -> Self {
        self.strategy = strategy;
        if matches!(self.strategy, AiStrategy::Random) {
            self.randomness = self.randomness.max(1.0);
        }
        self
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        AiConfig::from_difficulty(AiDifficulty::Normal)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiDecision {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<EngineAction>,
    pub evaluation: f64,
    pub depth_reached: u8,
    pub nodes: u64,
    pub timed_out: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<TurnResolution>,
    pub strategy: AiStrategy,
}

/// 协作式中止标志：两次离散动作之间检查，从不抢占进行中的结算。
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Rc<Cell<bool>>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.set(true);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.get()
    }
}

struct SearchStats {
    nodes: u64,
    depth_reached: u8,
    timed_out: bool,
}

impl SearchStats {
    fn new() -> Self {
        Self {
            nodes: 0,
            depth_reached: 0,
            timed_out: false,
        }
    }
}

pub struct AiAgent {
    config: AiConfig,
    content: Rc<dyn ContentSource>,
    rng: SmallRng,
}

impl AiAgent {
    pub fn new(config: AiConfig, content: Rc<dyn ContentSource>) -> Self {
        Self {
            config,
            content,
            rng: SmallRng::from_entropy(),
        }
    }

    pub fn with_seed(config: AiConfig, content: Rc<dyn ContentSource>, seed: u64) -> Self {
        Self {
            config,
            content,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn decide_action(&mut self, state: &MatchState, player_id: PlayerId) -> AiDecision {
        let mut stats = SearchStats::new();
        let start = Clock::now();
        let limit = if self.config.time_limit.is_zero() {
            None
        } else {
            Some(self.config.time_limit)
        };
        let strategy = self.config.strategy;

        if state.is_finished() {
            return AiDecision {
                action: None,
                evaluation: self.evaluate(state, player_id),
                depth_reached: 0,
                nodes: 0,
                timed_out: false,
                duration_ms: start.elapsed().as_millis() as u64,
                resolution: None,
                strategy,
            };
        }

        if strategy == AiStrategy::Random {
            return self.random_decision(state, player_id, start);
        }

        let depth = self.config.depth.saturating_sub(1);
        let maximizing = state.active_player == player_id;
        let mut transitions = self.generate_transitions(state, state.active_player);
        self.prioritize_actions(state, &mut transitions, strategy, player_id);

        if transitions.is_empty() {
            return AiDecision {
                action: None,
                evaluation: self.evaluate(state, player_id),
                depth_reached: stats.depth_reached,
                nodes: stats.nodes,
                timed_out: stats.timed_out,
                duration_ms: start.elapsed().as_millis() as u64,
                resolution: None,
                strategy,
            };
        }

        let mut alpha = f64::NEG_INFINITY;
        let mut beta = f64::INFINITY;
        let mut best_action = None;
        let mut best_score = f64::NEG_INFINITY;
        let mut best_cmp = f64::NEG_INFINITY;

        for (action, child_state) in transitions {
            let score = self.minimax(
                &child_state,
                depth,
                alpha,
                beta,
                player_id,
                start,
                limit,
                &mut stats,
            );
            if stats.timed_out {
                break;
            }

            if maximizing {
                alpha = alpha.max(score);
            } else {
                beta = beta.min(score);
            }

            let comparison = if self.config.randomness > 0.0 {
                score + self.random_noise()
            } else {
                score
            };
            if comparison > best_cmp {
                best_cmp = comparison;
                best_score = score;
                best_action = Some(action);
            }

            if alpha >= beta {
                break;
            }
        }

        let resolution = best_action.and_then(|action| self.simulate(state, action).ok());
        if best_action.is_none() {
            best_score = self.evaluate(state, player_id);
        }

        AiDecision {
            action: best_action,
            evaluation: best_score,
            depth_reached: stats.depth_reached,
            nodes: stats.nodes,
            timed_out: stats.timed_out,
            duration_ms: start.elapsed().as_millis() as u64,
            resolution,
            strategy,
        }
    }

    fn random_decision(
        &mut self,
        state: &MatchState,
        player_id: PlayerId,
        start: Clock,
    ) -> AiDecision {
        let mut transitions = self.generate_transitions(state, state.active_player);
        if transitions.is_empty() {
            return AiDecision {
                action: None,
                evaluation: self.evaluate(state, player_id),
                depth_reached: 0,
                nodes: 0,
                timed_out: false,
                duration_ms: start.elapsed().as_millis() as u64,
                resolution: None,
                strategy: AiStrategy::Random,
            };
        }

        transitions.shuffle(&mut self.rng);
        let (action, new_state) = transitions.swap_remove(0);
        let resolution = self.simulate(state, action).ok();

        AiDecision {
            action: Some(action),
            evaluation: self.evaluate(&new_state, player_id),
            depth_reached: 1,
            nodes: 1,
            timed_out: false,
            duration_ms: start.elapsed().as_millis() as u64,
            resolution,
            strategy: AiStrategy::Random,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn minimax(
        &mut self,
        state: &MatchState,
        depth_remaining: u8,
        mut alpha: f64,
        mut beta: f64,
        root_player: PlayerId,
        start: Clock,
        limit: Option<Duration>,
        stats: &mut SearchStats,
    ) -> f64 {
        stats.nodes += 1;
        let depth_explored = self.config.depth.saturating_sub(depth_remaining);
        if depth_explored > stats.depth_reached {
            stats.depth_reached = depth_explored;
        }

        if let Some(limit) = limit {
            if start.elapsed() >= limit {
                stats.timed_out = true;
                return self.evaluate(state, root_player);
            }
        }
        if depth_remaining == 0 || state.is_finished() {
            return self.evaluate(state, root_player);
        }

        let actor = state.active_player;
        let maximizing = actor == root_player;
        let mut transitions = self.generate_transitions(state, actor);
        self.prioritize_actions(state, &mut transitions, self.config.strategy, root_player);
        if transitions.is_empty() {
            return self.evaluate(state, root_player);
        }

        if maximizing {
            let mut value = f64::NEG_INFINITY;
            for (_, child) in transitions {
                let score = self.minimax(
                    &child,
                    depth_remaining - 1,
                    alpha,
                    beta,
                    root_player,
                    start,
                    limit,
                    stats,
                );
                value = value.max(score);
                alpha = alpha.max(value);
                if stats.timed_out || beta <= alpha {
                    break;
                }
            }
            value
        } else {
            let mut value = f64::INFINITY;
            for (_, child) in transitions {
                let score = self.minimax(
                    &child,
                    depth_remaining - 1,
                    alpha,
                    beta,
                    root_player,
                    start,
                    limit,
                    stats,
                );
                value = value.min(score);
                beta = beta.min(value);
                if stats.timed_out || beta <= alpha {
                    break;
                }
            }
            value
        }
    }

    fn generate_transitions(
        &mut self,
        state: &MatchState,
        actor: PlayerId,
    ) -> Vec<(EngineAction, MatchState)> {
        let mut actions = Vec::new();
        if state.is_finished() || state.active_player != actor {
            return actions;
        }
        let enemy = state.opponent_of(actor);

        // 出牌候选：逐张手牌，分别尝试无目标、指向对方玩家、
        // 指向双方的每个在场单位。
        let hand_len = state.players[actor as usize].hand.len();
        for hand_index in 0..hand_len {
            let mut candidates: Vec<Option<TargetRef>> = vec![None, Some(TargetRef::player(enemy))];
            for side in [actor, enemy] {
                for (slot, _) in state.players[side as usize].units() {
                    candidates.push(Some(TargetRef::unit(side, slot)));
                }
            }
            for target in candidates {
                let action = EngineAction::Play {
                    player: actor,
                    hand_index,
                    target,
                };
                if let Ok(resolution) = self.simulate(state, action) {
                    if resolution.accepted {
                        actions.push((action, resolution.state));
                        // 同一张牌有一个可行目标就够了，控制分支数量。
                        break;
                    }
                }
            }
        }

        // 攻击候选：每个在场单位打对方玩家或任一对方单位。
        for (slot, _) in state.players[actor as usize].units() {
            let mut targets = vec![AttackTarget::Player];
            for defender_slot in 0..BATTLEFIELD_SLOTS {
                if state.players[enemy as usize].battlefield[defender_slot].is_some() {
                    targets.push(AttackTarget::Unit {
                        slot: defender_slot,
                    });
                }
            }
            for target in targets {
                let action = EngineAction::Attack {
                    player: actor,
                    slot,
                    target,
                };
                if let Ok(resolution) = self.simulate(state, action) {
                    if resolution.accepted {
                        actions.push((action, resolution.state));
                    }
                }
            }
        }

        if let Ok(resolution) = self.simulate(state, EngineAction::EndTurn) {
            if resolution.accepted {
                actions.push((EngineAction::EndTurn, resolution.state));
            }
        }

        if self.config.randomness > 0.0 {
            actions.shuffle(&mut self.rng);
        }
        actions
    }

    fn prioritize_actions(
        &mut self,
        base_state: &MatchState,
        actions: &mut [(EngineAction, MatchState)],
        strategy: AiStrategy,
        player_id: PlayerId,
    ) {
        if actions.len() <= 1 {
            return;
        }

        match strategy {
            AiStrategy::Random => {}
            AiStrategy::Aggressive => actions.sort_by(|a, b| {
                aggressive_score(base_state, b, player_id)
                    .partial_cmp(&aggressive_score(base_state, a, player_id))
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
            AiStrategy::Control => actions.sort_by(|a, b| {
                control_score(base_state, b, player_id)
                    .partial_cmp(&control_score(base_state, a, player_id))
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
            AiStrategy::Combo => {
                let content = Rc::clone(&self.content);
                actions.sort_by(|a, b| {
                    combo_score(content.as_ref(), base_state, b, player_id)
                        .partial_cmp(&combo_score(content.as_ref(), base_state, a, player_id))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
            }
            AiStrategy::Adaptive => {
                let scored: Vec<f64> = actions
                    .iter()
                    .map(|(_, child)| self.evaluate(child, player_id))
                    .collect();
                let mut order: Vec<usize> = (0..actions.len()).collect();
                order.sort_by(|&a, &b| {
                    scored[b]
                        .partial_cmp(&scored[a])
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                let reordered: Vec<(EngineAction, MatchState)> =
                    order.iter().map(|&i| actions[i].clone()).collect();
                actions.clone_from_slice(&reordered);
            }
        }
    }

    fn simulate(
        &self,
        state: &MatchState,
        action: EngineAction,
    ) -> Result<TurnResolution, MatchFault> {
        let mut engine = MatchEngine::from_state(Rc::clone(&self.content), state.clone());
        let mark = engine.history_len();
        let accepted = match action {
            EngineAction::Play {
                player,
                hand_index,
                target,
            } => engine.play_card(player, hand_index, target)?,
            EngineAction::Attack {
                player,
                slot,
                target,
            } => engine.execute_attack(player, slot, target)?,
            EngineAction::EndTurn => engine.end_turn()?.accepted,
        };
        engine.resolution_since(accepted, mark)
    }

    fn evaluate(&self, state: &MatchState, player_id: PlayerId) -> f64 {
        if let Some(outcome) = state.outcome {
            return match outcome {
                crate::game::MatchOutcome::Winner { player } if player == player_id => 1_000_000.0,
                crate::game::MatchOutcome::Winner { .. } => -1_000_000.0,
                crate::game::MatchOutcome::Draw => 0.0,
            };
        }

        let player = &state.players[player_id as usize];
        let opponent = &state.players[state.opponent_of(player_id) as usize];

        let health_diff = (player.health - opponent.health) as f64;
        let board_diff = board_value(player) - board_value(opponent);
        let hand_diff = player.hand.len() as f64 - opponent.hand.len() as f64;
        let resource_diff = player.resource as f64 - opponent.resource as f64;
        let combo_value = combo_potential(self.content.as_ref(), player);

        let weights = match self.config.strategy {
            AiStrategy::Aggressive => StrategyWeights {
                health: 3.0,
                board: 1.2,
                hand: 0.6,
                resource: 0.4,
                combo: 0.4,
            },
            AiStrategy::Control => StrategyWeights {
                health: 1.2,
                board: 2.4,
                hand: 1.6,
                resource: 0.8,
                combo: 0.5,
            },
            AiStrategy::Combo => StrategyWeights {
                health: 1.0,
                board: 1.4,
                hand: 1.8,
                resource: 0.9,
                combo: 2.6,
            },
            AiStrategy::Adaptive => adaptive_weights(health_diff, board_diff),
            AiStrategy::Random => StrategyWeights {
                health: 1.0,
                board: 1.0,
                hand: 1.0,
                resource: 0.5,
                combo: 0.3,
            },
        };

        let turn_bonus = if state.active_player == player_id {
            0.3
        } else {
            -0.3
        };

        health_diff * weights.health
            + board_diff * weights.board
            + hand_diff * weights.hand
            + resource_diff * weights.resource
            + combo_value * weights.combo
            + turn_bonus
    }

    fn random_noise(&mut self) -> f64 {
        if self.config.randomness <= 0.0 {
            0.0
        } else {
            (self.rng.gen::<f64>() - 0.5) * 2.0 * self.config.randomness
        }
    }
}

/// 对手回合驱动：反复决策并应用，直到回合交还或标志被置起。
/// 中止只发生在离散动作之间，从不打断单次结算。
pub fn run_ai_turn(
    engine: &mut MatchEngine,
    player: PlayerId,
    config: AiConfig,
    abort: &AbortFlag,
) -> Result<Vec<EngineAction>, MatchFault> {
    let mut agent = AiAgent::new(config, engine.content());
    let mut applied = Vec::new();

    // 动作数量上限，防止无进展的决策循环占住回合。
    for _ in 0..64 {
        if abort.is_aborted() {
            break;
        }
        let Some(state) = engine.state() else {
            break;
        };
        if state.is_finished() || state.active_player != player {
            break;
        }

        let decision = agent.decide_action(state, player);
        let action = decision.action.unwrap_or(EngineAction::EndTurn);
        let accepted = match action {
            EngineAction::Play {
                player,
                hand_index,
                target,
            } => engine.play_card(player, hand_index, target)?,
            EngineAction::Attack {
                player,
                slot,
                target,
            } => engine.execute_attack(player, slot, target)?,
            EngineAction::EndTurn => {
                engine.end_turn()?;
                applied.push(EngineAction::EndTurn);
                break;
            }
        };
        if !accepted {
            engine.end_turn()?;
            applied.push(EngineAction::EndTurn);
            break;
        }
        applied.push(action);
    }

    // 达到上限仍未交出回合时强制结束，不把回合悬在半空。
    if !abort.is_aborted()
        && engine
            .state()
            .map_or(false, |state| !state.is_finished() && state.active_player == player)
    {
        engine.end_turn()?;
        applied.push(EngineAction::EndTurn);
    }

    Ok(applied)
}

fn board_value(player: &crate::game::PlayerState) -> f64 {
    player
        .units()
        .map(|(_, unit)| {
            let attack = unit.attack.max(0) as f64;
            let health = unit.health.max(0) as f64;
            attack * 1.6 + health
        })
        .sum()
}

fn combo_potential(content: &dyn ContentSource, player: &crate::game::PlayerState) -> f64 {
    player
        .hand
        .iter()
        .map(|card| {
            content
                .definition(card.card_id)
                .map(|def| def.abilities.len() as f64 * 0.8)
                .unwrap_or(0.0)
        })
        .sum()
}

fn aggressive_score(
    base: &MatchState,
    action_state: &(EngineAction, MatchState),
    player_id: PlayerId,
) -> f64 {
    let (_, new_state) = action_state;
    let enemy = base.opponent_of(player_id);
    let damage = (base.players[enemy as usize].health - new_state.players[enemy as usize].health)
        as f64;
    damage + board_value(&new_state.players[player_id as usize])
}

fn control_score(
    base: &MatchState,
    action_state: &(EngineAction, MatchState),
    player_id: PlayerId,
) -> f64 {
    let (_, new_state) = action_state;
    let enemy = base.opponent_of(player_id);
    let own_growth = board_value(&new_state.players[player_id as usize])
        - board_value(&base.players[player_id as usize]);
    own_growth - board_value(&new_state.players[enemy as usize])
}

fn combo_score(
    content: &dyn ContentSource,
    base: &MatchState,
    action_state: &(EngineAction, MatchState),
    player_id: PlayerId,
) -> f64 {
    let (_, new_state) = action_state;
    let before = combo_potential(content, &base.players[player_id as usize]);
    let after = combo_potential(content, &new_state.players[player_id as usize]);
    before - after
}

#[derive(Debug, Clone, Copy)]
struct StrategyWeights {
    health: f64,
    board: f64,
    hand: f64,
    resource: f64,
    combo: f64,
}

fn adaptive_weights(health_diff: f64, board_diff: f64) -> StrategyWeights {
    let health_weight = if health_diff < 0.0 { 2.6 } else { 1.4 };
    let board_weight = if board_diff < 0.0 { 2.8 } else { 1.6 };
    StrategyWeights {
        health: health_weight,
        board: board_weight,
        hand: 1.3,
        resource: 0.9,
        combo: 1.1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{builtin_content, MatchOutcome, MatchState};

    fn expert() -> AiConfig {
        AiConfig::from_difficulty(AiDifficulty::Expert)
    }

    #[test]
    fn ai_handles_finished_match() {
        let mut state = MatchState::bare(["A", "B"]);
        state.players[1].health = 0;
        state.position = crate::game::BattlePosition::Finished;
        state.outcome = Some(MatchOutcome::Winner { player: 0 });

        let mut agent = AiAgent::with_seed(expert(), builtin_content(), 1);
        let decision = agent.decide_action(&state, 0);
        assert!(decision.action.is_none());
        assert!(decision.evaluation > 0.0);
    }

    #[test]
    fn ai_finds_the_lethal_attack() {
        let mut state = MatchState::bare(["A", "B"]);
        state.players[1].health = 3;
        state.spawn_for_test(0, 0, 5, 5);
        let mut engine = MatchEngine::from_state(builtin_content(), state);

        let abort = AbortFlag::new();
        let applied = run_ai_turn(&mut engine, 0, expert(), &abort).expect("no fault");

        assert!(!applied.is_empty());
        let state = engine.state().expect("state");
        assert!(state.is_finished());
        assert_eq!(state.outcome, Some(MatchOutcome::Winner { player: 0 }));
    }

    #[test]
    fn abort_flag_stops_the_turn_between_actions() {
        let mut state = MatchState::bare(["A", "B"]);
        state.spawn_for_test(0, 0, 2, 2);
        let before = state.clone();
        let mut engine = MatchEngine::from_state(builtin_content(), state);

        let abort = AbortFlag::new();
        abort.abort();
        let applied = run_ai_turn(&mut engine, 0, expert(), &abort).expect("no fault");

        assert!(applied.is_empty(), "no action applied after abort");
        assert_eq!(engine.state().unwrap(), &before);
    }

    #[test]
    fn ai_turn_hands_the_turn_back_when_nothing_is_playable() {
        let state = MatchState::bare(["A", "B"]);
        let mut engine = MatchEngine::from_state(builtin_content(), state);

        let abort = AbortFlag::new();
        let applied = run_ai_turn(&mut engine, 0, expert(), &abort).expect("no fault");

        assert_eq!(applied.last(), Some(&EngineAction::EndTurn));
        assert_eq!(engine.state().unwrap().active_player, 1);
    }
}
