use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::NodeId;

/// 规则图引擎的错误类型,所有失败都以该类型返回给调用方
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RuleError {
    #[error("规则图未通过校验: {0}")]
    GraphInvalid(String),

    #[error("节点 {node_id} 的输入端口 {port} 既没有连接也没有默认值")]
    UnresolvedPort { node_id: NodeId, port: String },

    #[error("节点 {node_id} 端口 {port} 类型不匹配: 期望 {expected}, 实际 {actual}")]
    TypeMismatch {
        node_id: NodeId,
        port: String,
        expected: String,
        actual: String,
    },

    #[error("节点 {node_id} 执行失败: {message}")]
    NodeEvaluation { node_id: NodeId, message: String },

    #[error("循环依赖: {0}")]
    CycleDetected(String),

    #[error("规则模板未找到: {0}")]
    TemplateNotFound(Uuid),

    #[error("规则实例未找到: {0}")]
    InstanceNotFound(Uuid),

    #[error("规则实例未激活: {0}")]
    InstanceInactive(Uuid),

    #[error("规则模板无效: {0}")]
    TemplateInvalid(String),

    #[error("参数 {name} 无效: {message}")]
    InvalidParameter { name: String, message: String },

    #[error("找不到节点类型: {kind}/{subtype}")]
    NodeTypeNotFound { kind: String, subtype: String },

    #[error("系统节点类型已存在: {kind}/{subtype}")]
    TemplateConflict { kind: String, subtype: String },

    #[error("模拟中止: {0}")]
    SimulationAborted(String),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("日志写入失败: {0}")]
    LogSink(String),
}

impl RuleError {
    /// 构造节点执行错误
    pub fn node(node_id: &NodeId, message: impl Into<String>) -> Self {
        RuleError::NodeEvaluation {
            node_id: node_id.clone(),
            message: message.into(),
        }
    }

    /// 出错节点的ID,与节点无关的错误返回 None
    pub fn node_id(&self) -> Option<&NodeId> {
        match self {
            RuleError::UnresolvedPort { node_id, .. }
            | RuleError::TypeMismatch { node_id, .. }
            | RuleError::NodeEvaluation { node_id, .. } => Some(node_id),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for RuleError {
    fn from(e: serde_json::Error) -> Self {
        RuleError::ConfigError(e.to_string())
    }
}
