use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use uuid::Uuid;

/// 规则的拥有者: 角色、物品、场景等
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerRef {
    pub id: String,
    pub kind: String,
}

impl OwnerRef {
    pub fn new(kind: &str, id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: kind.to_string(),
        }
    }
}

/// 模板绑定到拥有者后的运行实例
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleInstance {
    pub id: Uuid,
    pub template_id: Uuid,
    pub owner: OwnerRef,
    pub parameter_values: Map<String, Value>,
    #[serde(default)]
    pub active_conditions: BTreeSet<String>,
    /// 不透明的调用方状态
    #[serde(default)]
    pub state: Map<String, Value>,
    pub is_active: bool,
    pub activated_at: Option<DateTime<Utc>>,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub usage_count: u64,
    pub created_at: DateTime<Utc>,
}

impl RuleInstance {
    pub fn new(template_id: Uuid, owner: OwnerRef, parameter_values: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            template_id,
            owner,
            parameter_values,
            active_conditions: BTreeSet::new(),
            state: Map::new(),
            is_active: true,
            activated_at: Some(now),
            deactivated_at: None,
            expires_at: None,
            usage_count: 0,
            created_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}
