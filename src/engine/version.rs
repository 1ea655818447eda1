use crate::engine::{GraphValidator, ValidationResult};
use crate::types::{PortValues, RuleError, RuleGraph};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// 规则图版本管理
#[derive(Debug)]
pub struct VersionManager {
    current_version: AtomicU64,
}

pub struct Version {
    pub version: u64,
    pub timestamp: i64,
}

impl Default for VersionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionManager {
    pub fn new() -> Self {
        Self {
            current_version: AtomicU64::new(1),
        }
    }

    pub fn create_version(&self, _graph: &RuleGraph) -> Version {
        let version = self.current_version.fetch_add(1, Ordering::SeqCst);
        Version {
            version,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn get_current_version(&self) -> u64 {
        self.current_version.load(Ordering::SeqCst)
    }
}

/// 规则图指纹: 规范化 JSON 的 blake3 摘要
pub(crate) fn fingerprint(graph: &RuleGraph) -> String {
    // 元数据(版本、时间戳)不影响可执行性,不计入指纹
    let mut canonical = graph.clone();
    canonical.metadata = Default::default();
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}

/// 已通过校验的规则图,执行器只接受该类型
#[derive(Debug, Clone)]
pub struct CertifiedGraph {
    graph: Arc<RuleGraph>,
    fingerprint: String,
    validation: ValidationResult,
}

impl CertifiedGraph {
    pub(crate) fn new(graph: Arc<RuleGraph>, validation: ValidationResult) -> Self {
        let fingerprint = fingerprint(&graph);
        Self {
            graph,
            fingerprint,
            validation,
        }
    }

    /// 确认规则图与模板证书一致,再用本次执行的变量重新校验
    pub fn verify(
        graph: Arc<RuleGraph>,
        certificate: Option<&str>,
        validator: &GraphValidator<'_>,
        variables: &PortValues,
    ) -> Result<Self, RuleError> {
        let certificate = certificate.ok_or_else(|| {
            RuleError::GraphInvalid(format!("规则图 {} 未经过校验", graph.id))
        })?;
        if fingerprint(&graph) != certificate {
            return Err(RuleError::GraphInvalid(format!(
                "规则图 {} 在校验后被修改",
                graph.id
            )));
        }
        validator.certify(graph, variables)
    }

    pub fn graph(&self) -> &RuleGraph {
        &self.graph
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// 签发时的校验结果(警告、复杂度)
    pub fn validation(&self) -> &ValidationResult {
        &self.validation
    }
}
