use crate::types::{
    Mutation, Node, NodeContext, NodeKind, NodeTemplate, PortValues, RuleError, RuleGraph,
};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// 属性检查问题的严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// 节点处理器对自身配置的检查结果
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyIssue {
    pub severity: Severity,
    pub message: String,
}

impl PropertyIssue {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }
}

/// 节点处理器特征,定义了节点的核心处理逻辑
#[async_trait]
pub trait NodeHandler: Send + Sync + fmt::Debug {
    /// 计算节点输出
    ///
    /// # Arguments
    /// * `ctx` - 节点执行上下文
    /// * `inputs` - 已解析的输入端口值
    ///
    /// # Returns
    /// * `Result<PortValues, RuleError>` - 产生的输出端口值; 未产生的端口视为未走分支
    async fn handle<'a>(
        &self,
        ctx: &mut NodeContext<'a>,
        inputs: &PortValues,
    ) -> Result<PortValues, RuleError>;

    /// 根据套用修正后的输出生成状态修改请求
    fn mutations(
        &self,
        _ctx: &NodeContext<'_>,
        _inputs: &PortValues,
        _outputs: &PortValues,
    ) -> Vec<Mutation> {
        Vec::new()
    }

    /// 检查配置中合法但少见的取值
    fn check(&self) -> Vec<PropertyIssue> {
        Vec::new()
    }

    /// 是否包含掷骰,用于复杂度计算
    fn rolls_dice(&self) -> bool {
        false
    }
}

/// 节点工厂函数类型,用于根据属性创建节点处理器
pub type NodeFactory = Arc<dyn Fn(Value) -> Result<Arc<dyn NodeHandler>, RuleError> + Send + Sync>;

#[derive(Clone)]
struct CatalogEntry {
    template: NodeTemplate,
    factory: NodeFactory,
}

/// 节点目录,管理所有已注册的节点类型
#[derive(Clone, Default)]
pub struct NodeCatalog {
    entries: BTreeMap<(NodeKind, String), CatalogEntry>,
}

impl NodeCatalog {
    /// 创建空目录
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建包含全部内置节点类型的目录
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        crate::components::register_builtins(&mut catalog);
        catalog
    }

    /// 注册新的节点类型
    ///
    /// # Arguments
    /// * `template` - 节点模板
    /// * `factory` - 节点工厂函数
    ///
    /// 已存在同名系统模板时返回 `TemplateConflict`
    pub fn register(&mut self, template: NodeTemplate, factory: NodeFactory) -> Result<(), RuleError> {
        let key = (template.kind, template.subtype.clone());
        if let Some(existing) = self.entries.get(&key) {
            if existing.template.system {
                return Err(RuleError::TemplateConflict {
                    kind: template.kind.to_string(),
                    subtype: template.subtype,
                });
            }
        }
        tracing::debug!("注册节点类型 {}/{}", template.kind, template.subtype);
        self.entries.insert(key, CatalogEntry { template, factory });
        Ok(())
    }

    /// 获取指定节点类型的模板
    pub fn lookup(&self, kind: NodeKind, subtype: &str) -> Result<&NodeTemplate, RuleError> {
        self.entries
            .get(&(kind, subtype.to_string()))
            .map(|e| &e.template)
            .ok_or_else(|| RuleError::NodeTypeNotFound {
                kind: kind.to_string(),
                subtype: subtype.to_string(),
            })
    }

    /// 用模板默认值创建节点
    pub fn instantiate(&self, kind: NodeKind, subtype: &str, id: &str) -> Result<Node, RuleError> {
        Ok(self.lookup(kind, subtype)?.instantiate(id))
    }

    /// 根据节点属性创建处理器实例
    ///
    /// # Arguments
    /// * `node` - 图中的节点
    /// * `variables` - 用于替换 `{{name}}` 引用的变量
    pub fn create_handler(
        &self,
        node: &Node,
        variables: &PortValues,
    ) -> Result<Arc<dyn NodeHandler>, RuleError> {
        let entry = self
            .entries
            .get(&(node.kind, node.subtype.clone()))
            .ok_or_else(|| RuleError::NodeTypeNotFound {
                kind: node.kind.to_string(),
                subtype: node.subtype.clone(),
            })?;
        let properties = resolve_properties(&node.properties, variables);
        (entry.factory)(Value::Object(properties)).map_err(|e| match e {
            RuleError::ConfigError(msg) => RuleError::node(&node.id, format!("属性配置错误: {}", msg)),
            other => other,
        })
    }

    /// 用模板补全 JSON 中省略的端口和默认属性; 未知类型的节点保持原样,由校验报告
    pub fn complete_graph(&self, graph: &mut RuleGraph) {
        for node in &mut graph.nodes {
            let Ok(template) = self.lookup(node.kind, &node.subtype) else {
                continue;
            };
            if node.inputs.is_empty() {
                node.inputs = template.inputs.clone();
            }
            if node.outputs.is_empty() {
                node.outputs = template.outputs.clone();
            }
            for (key, value) in &template.default_properties {
                if template.is_required(key) {
                    continue;
                }
                node.properties
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
        }
    }

    pub fn templates(&self) -> impl Iterator<Item = &NodeTemplate> {
        self.entries.values().map(|e| &e.template)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for NodeCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeCatalog")
            .field("types", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

lazy_static! {
    static ref PARAM_REF_REGEX: Regex = Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").unwrap();
}

/// 属性值是否为参数引用 `{{name}}`
pub fn is_parameter_reference(value: &str) -> bool {
    PARAM_REF_REGEX
        .find(value)
        .map(|m| m.start() == 0 && m.end() == value.len())
        .unwrap_or(false)
}

/// 替换属性中的 `{{name}}` 引用; 整串引用按原类型替换,嵌入文本中的按字符串替换
pub fn resolve_properties(properties: &Map<String, Value>, variables: &PortValues) -> Map<String, Value> {
    properties
        .iter()
        .map(|(key, value)| (key.clone(), resolve_value(value, variables)))
        .collect()
}

fn resolve_value(value: &Value, variables: &PortValues) -> Value {
    match value {
        Value::String(s) => {
            if is_parameter_reference(s) {
                let name = PARAM_REF_REGEX
                    .captures(s)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                return variables
                    .get(name)
                    .map(|v| v.to_json())
                    .unwrap_or_else(|| value.clone());
            }
            let replaced = PARAM_REF_REGEX.replace_all(s, |caps: &regex::Captures| {
                match variables.get(&caps[1]) {
                    Some(v) => v
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| v.to_json().to_string()),
                    None => caps[0].to_string(),
                }
            });
            Value::String(replaced.into_owned())
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, variables)).collect()),
        Value::Object(map) => Value::Object(resolve_properties(map, variables)),
        other => other.clone(),
    }
}
