use crate::engine::DEFAULT_COMPLEXITY_THRESHOLD;
use crate::types::RuleError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 默认每个场景的模拟次数
pub const DEFAULT_ITERATIONS: usize = 1000;
/// 每个模拟任务处理的次数
pub const DEFAULT_CHUNK_SIZE: usize = 250;
pub const DEFAULT_OVERPOWERED_WIN_RATE: f64 = 0.8;
pub const DEFAULT_UNDERPOWERED_WIN_RATE: f64 = 0.2;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// 平衡评分各子项权重
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceWeights {
    pub power: f64,
    pub complexity: f64,
    pub versatility: f64,
    pub fun_factor: f64,
    pub resource_efficiency: f64,
}

impl Default for BalanceWeights {
    fn default() -> Self {
        Self {
            power: 0.35,
            complexity: 0.15,
            versatility: 0.2,
            fun_factor: 0.15,
            resource_efficiency: 0.15,
        }
    }
}

impl BalanceWeights {
    pub fn total(&self) -> f64 {
        self.power + self.complexity + self.versatility + self.fun_factor + self.resource_efficiency
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub iterations: usize,
    pub chunk_size: usize,
    pub overpowered_win_rate: f64,
    pub underpowered_win_rate: f64,
    pub weights: BalanceWeights,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            overpowered_win_rate: DEFAULT_OVERPOWERED_WIN_RATE,
            underpowered_win_rate: DEFAULT_UNDERPOWERED_WIN_RATE,
            weights: BalanceWeights::default(),
        }
    }
}

/// 引擎配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub complexity_threshold: u32,
    /// 过期实例清理间隔(秒)
    pub sweep_interval_secs: u64,
    /// 是否注册节点日志拦截器
    pub log_node_execution: bool,
    pub simulation: SimulationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            complexity_threshold: DEFAULT_COMPLEXITY_THRESHOLD,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            log_node_execution: true,
            simulation: SimulationConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(content: &str) -> Result<Self, RuleError> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| RuleError::ConfigError(format!("引擎配置解析失败: {}", e)))?;
        config.check()?;
        Ok(config)
    }

    pub async fn load_from_file(path: &str) -> Result<Self, RuleError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RuleError::ConfigError(format!("读取配置文件 {} 失败: {}", path, e)))?;
        Self::from_json_str(&content)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    fn check(&self) -> Result<(), RuleError> {
        let sim = &self.simulation;
        if sim.chunk_size == 0 {
            return Err(RuleError::ConfigError("chunk_size 必须大于0".into()));
        }
        if !(0.0..=1.0).contains(&sim.underpowered_win_rate)
            || !(0.0..=1.0).contains(&sim.overpowered_win_rate)
            || sim.underpowered_win_rate >= sim.overpowered_win_rate
        {
            return Err(RuleError::ConfigError("胜率阈值必须满足 0 <= 下限 < 上限 <= 1".into()));
        }
        if sim.weights.total() <= 0.0 {
            return Err(RuleError::ConfigError("平衡评分权重之和必须大于0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{ "complexity_threshold": 80, "simulation": { "iterations": 10 } }"#,
        )
        .unwrap();
        assert_eq!(config.complexity_threshold, 80);
        assert_eq!(config.simulation.iterations, 10);
        assert_eq!(config.simulation.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.simulation.weights, BalanceWeights::default());
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let result = EngineConfig::from_json_str(
            r#"{ "simulation": { "overpowered_win_rate": 0.1, "underpowered_win_rate": 0.5 } }"#,
        );
        assert!(matches!(result, Err(RuleError::ConfigError(_))));
    }
}
