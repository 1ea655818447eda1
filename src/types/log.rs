use super::{ModifierSet, Mutation, NodeId, NodeKind, PortValues, RuleError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 单个节点的执行记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub node_id: NodeId,
    pub kind: NodeKind,
    pub subtype: String,
    pub inputs: PortValues,
    pub outputs: PortValues,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    /// 墙钟耗时,不参与相等比较
    pub duration_us: u64,
}

impl PartialEq for TraceEntry {
    fn eq(&self, other: &Self) -> bool {
        self.node_id == other.node_id
            && self.kind == other.kind
            && self.subtype == other.subtype
            && self.inputs == other.inputs
            && self.outputs == other.outputs
            && self.success == other.success
            && self.error == other.error
    }
}

/// 一次执行的结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// 触发节点是否响应了该事件
    pub fired: bool,
    /// 以 "节点ID.端口名" 为键的输出值
    pub output_values: PortValues,
    pub mutations: Vec<Mutation>,
    pub trace: Vec<TraceEntry>,
    pub active_modifiers: ModifierSet,
    pub error: Option<RuleError>,
    pub duration_us: u64,
}

impl ExecutionResult {
    /// 未触发: 事件类型与触发节点不符
    pub fn not_fired(active_modifiers: ModifierSet) -> Self {
        Self {
            success: true,
            fired: false,
            active_modifiers,
            ..Self::default()
        }
    }

    pub fn output(&self, node_id: &str, port: &str) -> Option<&super::PortValue> {
        self.output_values.get(&format!("{}.{}", node_id, port))
    }

    pub fn total_damage(&self) -> f64 {
        self.mutations.iter().map(Mutation::damage).sum()
    }

    /// 把失败的执行转为错误
    pub fn into_result(self) -> Result<Self, RuleError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }
}

/// 执行日志条目,只追加
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub template_id: Uuid,
    pub trigger_type: String,
    pub input_values: PortValues,
    pub output_values: PortValues,
    pub trace: Vec<TraceEntry>,
    pub duration_us: u64,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionLogEntry {
    pub fn from_result(
        instance_id: Uuid,
        template_id: Uuid,
        trigger_type: &str,
        input_values: PortValues,
        result: &ExecutionResult,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            instance_id,
            template_id,
            trigger_type: trigger_type.to_string(),
            input_values,
            output_values: result.output_values.clone(),
            trace: result.trace.clone(),
            duration_us: result.duration_us,
            success: result.success,
            error: result.error.as_ref().map(|e| e.to_string()),
            timestamp: Utc::now(),
        }
    }
}
