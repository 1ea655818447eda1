use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 端口声明的数据类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortType {
    /// 控制流令牌
    Flow,
    Number,
    Boolean,
    Text,
    /// 实体引用(角色、怪物等的ID)
    Entity,
    /// 通配类型,可与任何类型相连
    Any,
}

impl PortType {
    /// 两个端口类型是否可以相连: 完全相同或任一端为 any
    pub fn is_compatible(self, other: PortType) -> bool {
        self == other || self == PortType::Any || other == PortType::Any
    }

    /// 运行时值是否满足该声明类型
    pub fn accepts(self, value: &PortValue) -> bool {
        self == PortType::Any || value.port_type() == self
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PortType::Flow => "flow",
            PortType::Number => "number",
            PortType::Boolean => "boolean",
            PortType::Text => "text",
            PortType::Entity => "entity",
            PortType::Any => "any",
        };
        f.write_str(name)
    }
}

/// 端口上流动的运行时值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PortValue {
    Flow,
    Number(f64),
    Boolean(bool),
    Text(String),
    Entity(String),
}

impl PortValue {
    pub fn port_type(&self) -> PortType {
        match self {
            PortValue::Flow => PortType::Flow,
            PortValue::Number(_) => PortType::Number,
            PortValue::Boolean(_) => PortType::Boolean,
            PortValue::Text(_) => PortType::Text,
            PortValue::Entity(_) => PortType::Entity,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            PortValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PortValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PortValue::Text(s) | PortValue::Entity(s) => Some(s),
            _ => None,
        }
    }

    /// 从参数的 JSON 值转换,数组和对象没有对应的端口值
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(PortValue::Boolean(*b)),
            serde_json::Value::Number(n) => n.as_f64().map(PortValue::Number),
            serde_json::Value::String(s) => Some(PortValue::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            PortValue::Flow => serde_json::Value::Null,
            // 整数值输出为 JSON 整数,以便反序列化到整型字段
            PortValue::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => {
                serde_json::json!(*n as i64)
            }
            PortValue::Number(n) => serde_json::json!(n),
            PortValue::Boolean(b) => serde_json::Value::Bool(*b),
            PortValue::Text(s) | PortValue::Entity(s) => serde_json::Value::String(s.clone()),
        }
    }
}

/// 按端口名索引的值集合
pub type PortValues = BTreeMap<String, PortValue>;

/// 节点上的输入或输出端口
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    pub name: String,
    pub port_type: PortType,
    /// 输入端口: 未连接且无默认值时是否报错
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<PortValue>,
    /// 输出端口: 记录前要套用的修正键,如 damage_multiplier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifier: Option<String>,
}

impl Port {
    pub fn new(name: &str, port_type: PortType) -> Self {
        Self {
            name: name.to_string(),
            port_type,
            required: false,
            default: None,
            modifier: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: PortValue) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_modifier(mut self, key: &str) -> Self {
        self.modifier = Some(key.to_string());
        self
    }
}
