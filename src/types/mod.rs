mod context;
mod descriptor;
mod error;
mod instance;
mod log;
mod modifier;
mod mutation;
mod node;
mod port;
mod template;

pub use context::*;
pub use descriptor::*;
pub use error::*;
pub use instance::*;
pub use log::*;
pub use modifier::*;
pub use mutation::*;
pub use node::*;
pub use port::*;
pub use template::*;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// 规则图定义: 节点集合、连接、起始节点与变量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleGraph {
    /// 规则图唯一标识
    pub id: Uuid,
    pub name: String,
    /// 按声明顺序排列的节点
    pub nodes: Vec<Node>,
    /// 节点之间的连接关系
    pub connections: Vec<Connection>,
    /// 起始节点,必须是触发节点
    pub start_node_id: Option<NodeId>,
    /// 图变量
    #[serde(default)]
    pub variables: BTreeMap<String, PortValue>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// 节点端口之间的连接定义
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub from_node: NodeId,
    pub from_port: String,
    pub to_node: NodeId,
    pub to_port: String,
}

impl Connection {
    pub fn new(from_node: &str, from_port: &str, to_node: &str, to_port: &str) -> Self {
        Self {
            from_node: NodeId::from(from_node),
            from_port: from_port.to_string(),
            to_node: NodeId::from(to_node),
            to_port: to_port.to_string(),
        }
    }
}

/// 规则图元数据信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// 版本号
    pub version: u64,
    /// 创建时间戳
    pub created_at: i64,
    /// 最后更新时间戳
    pub updated_at: i64,
}

impl RuleGraph {
    pub fn new(name: &str) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            nodes: Vec::new(),
            connections: Vec::new(),
            start_node_id: None,
            variables: BTreeMap::new(),
            metadata: Metadata {
                version: 0,
                created_at: now,
                updated_at: now,
            },
        }
    }

    /// 添加节点,第一个触发节点自动成为起始节点
    pub fn add_node(&mut self, node: Node) -> &mut Self {
        if self.start_node_id.is_none() && node.is_trigger() {
            self.start_node_id = Some(node.id.clone());
        }
        self.nodes.push(node);
        self
    }

    pub fn connect(&mut self, from_node: &str, from_port: &str, to_node: &str, to_port: &str) -> &mut Self {
        self.connections
            .push(Connection::new(from_node, from_port, to_node, to_port));
        self
    }

    pub fn get_node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    pub fn get_start_node(&self) -> Option<&Node> {
        self.start_node_id.as_ref().and_then(|id| self.get_node(id))
    }

    /// 节点ID到声明顺序下标的映射
    pub fn index(&self) -> BTreeMap<&NodeId, usize> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (&n.id, i))
            .collect()
    }

    pub fn outgoing<'a>(&'a self, id: &'a NodeId) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections.iter().filter(move |c| &c.from_node == id)
    }

    pub fn incoming<'a>(&'a self, id: &'a NodeId) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections.iter().filter(move |c| &c.to_node == id)
    }
}
