use serde::{Deserialize, Serialize};

/// 动作节点请求的状态修改,由调用方决定是否应用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Mutation {
    DealDamage {
        target: Option<String>,
        amount: f64,
        damage_type: String,
    },
    Heal {
        target: Option<String>,
        amount: f64,
    },
    ApplyCondition {
        target: Option<String>,
        condition: String,
        duration_rounds: f64,
    },
    ModifyStat {
        stat: String,
        delta: f64,
    },
    ConsumeResource {
        resource: String,
        amount: f64,
    },
    Message {
        text: String,
    },
}

impl Mutation {
    /// 伤害量,非伤害修改返回 0
    pub fn damage(&self) -> f64 {
        match self {
            Mutation::DealDamage { amount, .. } => *amount,
            _ => 0.0,
        }
    }

    pub fn healing(&self) -> f64 {
        match self {
            Mutation::Heal { amount, .. } => *amount,
            _ => 0.0,
        }
    }

    pub fn resource_cost(&self) -> f64 {
        match self {
            Mutation::ConsumeResource { amount, .. } => *amount,
            _ => 0.0,
        }
    }
}
