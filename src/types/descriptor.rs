use crate::types::{Node, NodeKind, Port};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// 节点模板,描述某类节点的属性与端口形状
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct NodeTemplate {
    pub kind: NodeKind,
    pub subtype: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub default_properties: Map<String, Value>,
    /// 必须由作者填写的属性,补全时不使用默认值
    #[serde(default)]
    pub required_properties: BTreeSet<String>,
    #[serde(default)]
    pub inputs: Vec<Port>,
    #[serde(default)]
    pub outputs: Vec<Port>,
    /// 系统内置模板不可被覆盖
    #[serde(default)]
    pub system: bool,
}

impl NodeTemplate {
    pub fn new(kind: NodeKind, subtype: &str, name: &str, description: &str) -> Self {
        Self {
            kind,
            subtype: subtype.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            default_properties: Map::new(),
            required_properties: BTreeSet::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            system: false,
        }
    }

    pub fn with_input(mut self, port: Port) -> Self {
        self.inputs.push(port);
        self
    }

    pub fn with_output(mut self, port: Port) -> Self {
        self.outputs.push(port);
        self
    }

    pub fn with_default(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.default_properties.insert(key.to_string(), value.into());
        self
    }

    /// 必填属性,`example` 仅用于编辑器实例化
    pub fn with_required(mut self, key: &str, example: impl Into<Value>) -> Self {
        self.required_properties.insert(key.to_string());
        self.with_default(key, example)
    }

    pub fn is_required(&self, key: &str) -> bool {
        self.required_properties.contains(key)
    }

    pub fn system(mut self) -> Self {
        self.system = true;
        self
    }

    /// 用模板的默认属性和端口创建一个节点
    pub fn instantiate(&self, id: impl Into<String>) -> Node {
        let mut node = Node::new(id, self.kind, &self.subtype);
        node.properties = self.default_properties.clone();
        node.inputs = self.inputs.clone();
        node.outputs = self.outputs.clone();
        node
    }
}
