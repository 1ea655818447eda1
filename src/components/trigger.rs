use crate::engine::NodeHandler;
use crate::types::{NodeContext, PortValue, PortValues, RuleError};
use async_trait::async_trait;
use serde::Deserialize;

/// 内置触发事件
pub const TRIGGER_EVENTS: [&str; 8] = [
    "on_attack",
    "on_hit",
    "on_damage_taken",
    "on_turn_start",
    "on_turn_end",
    "on_spell_cast",
    "on_rest",
    "manual",
];

#[derive(Debug, Default, Deserialize)]
pub struct TriggerConfig {
    /// 只响应 payload 中 value 不低于该值的事件
    #[serde(default)]
    pub min_value: Option<f64>,
}

/// 触发节点,把外部事件转换为输出端口值
#[derive(Debug)]
pub struct TriggerNode {
    config: TriggerConfig,
}

impl TriggerNode {
    pub fn new(config: TriggerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl NodeHandler for TriggerNode {
    async fn handle<'a>(
        &self,
        ctx: &mut NodeContext<'a>,
        _inputs: &PortValues,
    ) -> Result<PortValues, RuleError> {
        let mut outputs = PortValues::new();
        let value = ctx
            .event
            .payload
            .get("value")
            .and_then(PortValue::as_number)
            .unwrap_or(0.0);
        if let Some(min) = self.config.min_value {
            if value < min {
                // 阈值未满足: 不输出控制流,下游全部跳过
                outputs.insert("value".into(), PortValue::Number(value));
                return Ok(outputs);
            }
        }
        outputs.insert("flow".into(), PortValue::Flow);
        outputs.insert("value".into(), PortValue::Number(value));
        if let Some(source) = &ctx.event.source {
            outputs.insert("source".into(), PortValue::Entity(source.clone()));
        }
        if let Some(target) = &ctx.event.target {
            outputs.insert("target".into(), PortValue::Entity(target.clone()));
        }
        Ok(outputs)
    }
}
