//! 对手 AI 模块（极小极大搜索、策略权重、协作中止）。

pub mod agent;

pub use agent::{
    run_ai_turn, AbortFlag, AiAgent, AiConfig, AiDecision, AiDifficulty, AiStrategy, EngineAction,
};
