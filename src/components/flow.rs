use crate::engine::{NodeHandler, PropertyIssue};
use crate::types::{NodeContext, PortValue, PortValues, PortType, RuleError};
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct SplitConfig {
    #[serde(default = "default_branches")]
    pub branches: usize,
}

fn default_branches() -> usize {
    2
}

/// 分叉节点: 在所有 flow 输出端口上放出令牌,后续分支按端口声明顺序依次执行
#[derive(Debug)]
pub struct SplitNode {
    config: SplitConfig,
}

impl SplitNode {
    pub fn new(config: SplitConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl NodeHandler for SplitNode {
    async fn handle<'a>(
        &self,
        ctx: &mut NodeContext<'a>,
        _inputs: &PortValues,
    ) -> Result<PortValues, RuleError> {
        Ok(ctx
            .node
            .outputs
            .iter()
            .filter(|p| p.port_type == PortType::Flow)
            .map(|p| (p.name.clone(), PortValue::Flow))
            .collect())
    }

    fn check(&self) -> Vec<PropertyIssue> {
        if self.config.branches < 2 {
            vec![PropertyIssue::warning("分叉节点只有一个分支")]
        } else {
            Vec::new()
        }
    }
}

/// 汇聚节点: 等待所有入边结束后继续
#[derive(Debug, Default, Deserialize)]
pub struct MergeConfig {}

#[derive(Debug)]
pub struct MergeNode;

#[async_trait]
impl NodeHandler for MergeNode {
    async fn handle<'a>(
        &self,
        _ctx: &mut NodeContext<'a>,
        inputs: &PortValues,
    ) -> Result<PortValues, RuleError> {
        let mut outputs = PortValues::new();
        outputs.insert("flow".into(), PortValue::Flow);
        outputs.insert(
            "completed".into(),
            PortValue::Number(inputs.len() as f64),
        );
        Ok(outputs)
    }
}
