use super::*;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, BTreeSet};

/// 触发一次执行的外部事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// 事件类型,如 on_hit、on_turn_start
    pub event_type: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub payload: PortValues,
    /// 随机种子,相同种子保证相同的执行轨迹
    #[serde(default)]
    pub seed: u64,
}

impl TriggerEvent {
    pub fn new(event_type: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            source: None,
            target: None,
            payload: PortValues::new(),
            seed: 0,
        }
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn with_value(mut self, key: &str, value: PortValue) -> Self {
        self.payload.insert(key.to_string(), value);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// 当前情境: 位面、天气、情绪、地形、时间、月相等
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameContext {
    #[serde(default)]
    pub values: BTreeMap<ContextType, String>,
}

impl GameContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, context_type: ContextType, value: &str) -> Self {
        self.values.insert(context_type, value.to_string());
        self
    }

    pub fn get(&self, context_type: ContextType) -> Option<&str> {
        self.values.get(&context_type).map(String::as_str)
    }

    /// 情境值是否匹配,忽略大小写
    pub fn matches(&self, context_type: ContextType, value: &str) -> bool {
        self.get(context_type)
            .map(|v| v.eq_ignore_ascii_case(value))
            .unwrap_or(false)
    }
}

/// 规则拥有者的当前状态,由调用方提供,只读
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    #[serde(default)]
    pub entity_id: String,
    #[serde(default)]
    pub level: u32,
    #[serde(default)]
    pub stats: BTreeMap<String, f64>,
    #[serde(default)]
    pub resources: BTreeMap<String, f64>,
    #[serde(default)]
    pub conditions: BTreeSet<String>,
    /// 目标实体身上的状态
    #[serde(default)]
    pub target_conditions: BTreeSet<String>,
}

impl EntityState {
    pub fn new(entity_id: &str, level: u32) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            level,
            ..Self::default()
        }
    }

    pub fn with_stat(mut self, stat: &str, value: f64) -> Self {
        self.stats.insert(stat.to_string(), value);
        self
    }

    pub fn with_resource(mut self, resource: &str, value: f64) -> Self {
        self.resources.insert(resource.to_string(), value);
        self
    }

    pub fn with_condition(mut self, condition: &str) -> Self {
        self.conditions.insert(condition.to_string());
        self
    }

    /// 查询属性,level 作为内置属性
    pub fn stat(&self, name: &str) -> Option<f64> {
        if name == "level" {
            return Some(self.level as f64);
        }
        self.stats
            .get(name)
            .or_else(|| self.resources.get(name))
            .copied()
    }
}

/// 节点执行上下文,包含节点执行所需的所有信息
#[derive(Debug)]
pub struct NodeContext<'a> {
    /// 当前执行的节点
    pub node: &'a Node,
    pub event: &'a TriggerEvent,
    pub context: &'a GameContext,
    pub state: &'a EntityState,
    /// 图变量与实例参数
    pub variables: &'a PortValues,
    /// 本次执行的确定性随机源
    pub rng: &'a mut ChaCha8Rng,
}
