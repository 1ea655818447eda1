use crate::engine::{NodeHandler, PropertyIssue};
use crate::types::{ContextType, NodeContext, PortValue, PortValues, RuleError};
use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;

/// 比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Operator {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = ">")]
    Gt,
}

impl Operator {
    pub fn evaluate(self, left: f64, right: f64) -> bool {
        match self {
            Operator::Lt => left < right,
            Operator::Le => left <= right,
            Operator::Eq => (left - right).abs() < f64::EPSILON,
            Operator::Ne => (left - right).abs() >= f64::EPSILON,
            Operator::Ge => left >= right,
            Operator::Gt => left > right,
        }
    }
}

/// 按布尔结果只输出 true 或 false 其中一个分支
fn branch(result: bool) -> PortValues {
    let mut outputs = PortValues::new();
    let port = if result { "true" } else { "false" };
    outputs.insert(port.into(), PortValue::Flow);
    outputs.insert("result".into(), PortValue::Boolean(result));
    outputs
}

fn number_input(ctx: &NodeContext<'_>, inputs: &PortValues, port: &str) -> Result<Option<f64>, RuleError> {
    match inputs.get(port) {
        None => Ok(None),
        Some(PortValue::Number(n)) => Ok(Some(*n)),
        Some(other) => Err(RuleError::TypeMismatch {
            node_id: ctx.node.id.clone(),
            port: port.to_string(),
            expected: "number".into(),
            actual: other.port_type().to_string(),
        }),
    }
}

#[derive(Debug, Deserialize)]
pub struct CompareConfig {
    pub operator: Operator,
    /// 右操作数未连接时使用的常量
    #[serde(default)]
    pub value: Option<f64>,
}

/// 比较节点: left <op> right
#[derive(Debug)]
pub struct CompareNode {
    config: CompareConfig,
}

impl CompareNode {
    pub fn new(config: CompareConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl NodeHandler for CompareNode {
    async fn handle<'a>(
        &self,
        ctx: &mut NodeContext<'a>,
        inputs: &PortValues,
    ) -> Result<PortValues, RuleError> {
        let left = number_input(ctx, inputs, "left")?
            .ok_or_else(|| RuleError::node(&ctx.node.id, "缺少左操作数"))?;
        let right = number_input(ctx, inputs, "right")?
            .or(self.config.value)
            .ok_or_else(|| RuleError::node(&ctx.node.id, "缺少右操作数且未配置 value"))?;
        Ok(branch(self.config.operator.evaluate(left, right)))
    }
}

#[derive(Debug, Deserialize)]
pub struct HasConditionConfig {
    pub condition: String,
    /// self 或 target
    #[serde(default = "default_subject")]
    pub subject: String,
}

fn default_subject() -> String {
    "self".to_string()
}

/// 检查拥有者或目标身上是否有某状态
#[derive(Debug)]
pub struct HasConditionNode {
    config: HasConditionConfig,
}

impl HasConditionNode {
    pub fn new(config: HasConditionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl NodeHandler for HasConditionNode {
    async fn handle<'a>(
        &self,
        ctx: &mut NodeContext<'a>,
        _inputs: &PortValues,
    ) -> Result<PortValues, RuleError> {
        let conditions = match self.config.subject.as_str() {
            "target" => &ctx.state.target_conditions,
            _ => &ctx.state.conditions,
        };
        Ok(branch(conditions.contains(&self.config.condition)))
    }

    fn check(&self) -> Vec<PropertyIssue> {
        match self.config.subject.as_str() {
            "self" | "target" => Vec::new(),
            other => vec![PropertyIssue::error(format!("未知的 subject: {}", other))],
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RandomChanceConfig {
    pub chance: f64,
}

/// 按概率选择分支
#[derive(Debug)]
pub struct RandomChanceNode {
    config: RandomChanceConfig,
}

impl RandomChanceNode {
    pub fn new(config: RandomChanceConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl NodeHandler for RandomChanceNode {
    async fn handle<'a>(
        &self,
        ctx: &mut NodeContext<'a>,
        _inputs: &PortValues,
    ) -> Result<PortValues, RuleError> {
        let roll: f64 = ctx.rng.gen();
        Ok(branch(roll < self.config.chance))
    }

    fn check(&self) -> Vec<PropertyIssue> {
        let chance = self.config.chance;
        if !chance.is_finite() {
            vec![PropertyIssue::error("chance 必须是有限数值")]
        } else if chance <= 0.0 || chance >= 1.0 {
            vec![PropertyIssue::warning(format!(
                "chance={} 使分支结果恒定",
                chance
            ))]
        } else {
            Vec::new()
        }
    }

    fn rolls_dice(&self) -> bool {
        true
    }
}

#[derive(Debug, Deserialize)]
pub struct ContextIsConfig {
    pub context_type: ContextType,
    pub value: String,
}

/// 检查当前情境
#[derive(Debug)]
pub struct ContextIsNode {
    config: ContextIsConfig,
}

impl ContextIsNode {
    pub fn new(config: ContextIsConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl NodeHandler for ContextIsNode {
    async fn handle<'a>(
        &self,
        ctx: &mut NodeContext<'a>,
        _inputs: &PortValues,
    ) -> Result<PortValues, RuleError> {
        Ok(branch(
            ctx.context
                .matches(self.config.context_type, &self.config.value),
        ))
    }
}

#[derive(Debug, Deserialize)]
pub struct StatCheckConfig {
    pub stat: String,
    pub operator: Operator,
    pub value: f64,
}

/// 把拥有者属性与常量比较
#[derive(Debug)]
pub struct StatCheckNode {
    config: StatCheckConfig,
}

impl StatCheckNode {
    pub fn new(config: StatCheckConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl NodeHandler for StatCheckNode {
    async fn handle<'a>(
        &self,
        ctx: &mut NodeContext<'a>,
        _inputs: &PortValues,
    ) -> Result<PortValues, RuleError> {
        let stat = ctx.state.stat(&self.config.stat).ok_or_else(|| {
            RuleError::node(&ctx.node.id, format!("拥有者没有属性 {}", self.config.stat))
        })?;
        Ok(branch(self.config.operator.evaluate(stat, self.config.value)))
    }
}
