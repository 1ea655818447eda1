use super::{Port, PortType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// 节点的稳定标识,由作者在图中指定
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// 节点大类,封闭集合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// 触发节点 - 无输入,由外部事件启动一次执行
    Trigger,
    /// 条件节点 - 根据布尔结果选择一个分支
    Condition,
    /// 动作节点 - 产生对状态的修改请求
    Action,
    /// 计算节点 - 产生数值
    Calculation,
    /// 流程节点 - 分叉与汇聚
    Flow,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::Trigger => "trigger",
            NodeKind::Condition => "condition",
            NodeKind::Action => "action",
            NodeKind::Calculation => "calculation",
            NodeKind::Flow => "flow",
        };
        f.write_str(name)
    }
}

/// 规则图中的节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub subtype: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub inputs: Vec<Port>,
    #[serde(default)]
    pub outputs: Vec<Port>,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind, subtype: &str) -> Self {
        Self {
            id: NodeId::new(id),
            kind,
            subtype: subtype.to_string(),
            properties: Map::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// 设置节点属性
    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn input(&self, name: &str) -> Option<&Port> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&Port> {
        self.outputs.iter().find(|p| p.name == name)
    }

    pub fn is_trigger(&self) -> bool {
        self.kind == NodeKind::Trigger
    }

    /// 是否为汇聚节点
    pub fn is_merge(&self) -> bool {
        self.kind == NodeKind::Flow && self.subtype == "merge"
    }

    /// 所有 flow 类型的输出端口名
    pub fn flow_outputs(&self) -> impl Iterator<Item = &str> {
        self.outputs
            .iter()
            .filter(|p| p.port_type == PortType::Flow)
            .map(|p| p.name.as_str())
    }
}
