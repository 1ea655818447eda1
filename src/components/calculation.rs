use super::dice::DiceExpr;
use crate::engine::{NodeHandler, PropertyIssue};
use crate::types::{NodeContext, PortValue, PortValues, RuleError};
use async_trait::async_trait;
use serde::Deserialize;

fn single(port: &str, value: PortValue) -> PortValues {
    let mut outputs = PortValues::new();
    outputs.insert(port.into(), value);
    outputs
}

fn require_number(ctx: &NodeContext<'_>, inputs: &PortValues, port: &str) -> Result<f64, RuleError> {
    match inputs.get(port) {
        Some(PortValue::Number(n)) => Ok(*n),
        Some(other) => Err(RuleError::TypeMismatch {
            node_id: ctx.node.id.clone(),
            port: port.to_string(),
            expected: "number".into(),
            actual: other.port_type().to_string(),
        }),
        None => Err(RuleError::UnresolvedPort {
            node_id: ctx.node.id.clone(),
            port: port.to_string(),
        }),
    }
}

#[derive(Debug, Deserialize)]
pub struct DiceRollConfig {
    pub dice: String,
}

/// 掷骰计算
#[derive(Debug)]
pub struct DiceRollNode {
    dice: DiceExpr,
}

impl DiceRollNode {
    pub fn new(config: DiceRollConfig) -> Result<Self, RuleError> {
        Ok(Self {
            dice: config.dice.parse()?,
        })
    }
}

#[async_trait]
impl NodeHandler for DiceRollNode {
    async fn handle<'a>(
        &self,
        ctx: &mut NodeContext<'a>,
        _inputs: &PortValues,
    ) -> Result<PortValues, RuleError> {
        let rolled = self.dice.roll(&mut *ctx.rng) as f64;
        Ok(single("result", PortValue::Number(rolled)))
    }

    fn check(&self) -> Vec<PropertyIssue> {
        if self.dice.count == 0 {
            vec![PropertyIssue::warning("骰子数量为0,结果恒为加值")]
        } else {
            Vec::new()
        }
    }

    fn rolls_dice(&self) -> bool {
        true
    }
}

/// 四则与极值运算
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MathOperation {
    Add,
    Subtract,
    Multiply,
    Divide,
    Min,
    Max,
}

#[derive(Debug, Deserialize)]
pub struct MathConfig {
    pub operation: MathOperation,
    /// b 端口未连接时使用的常量
    #[serde(default)]
    pub operand: Option<f64>,
}

#[derive(Debug)]
pub struct MathNode {
    config: MathConfig,
}

impl MathNode {
    pub fn new(config: MathConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl NodeHandler for MathNode {
    async fn handle<'a>(
        &self,
        ctx: &mut NodeContext<'a>,
        inputs: &PortValues,
    ) -> Result<PortValues, RuleError> {
        let a = require_number(ctx, inputs, "a")?;
        let b = match (inputs.contains_key("b"), self.config.operand) {
            (false, Some(operand)) => operand,
            _ => require_number(ctx, inputs, "b")?,
        };
        let result = match self.config.operation {
            MathOperation::Add => a + b,
            MathOperation::Subtract => a - b,
            MathOperation::Multiply => a * b,
            MathOperation::Divide => {
                if b == 0.0 {
                    return Err(RuleError::node(&ctx.node.id, "除数为0"));
                }
                a / b
            }
            MathOperation::Min => a.min(b),
            MathOperation::Max => a.max(b),
        };
        Ok(single("result", PortValue::Number(result)))
    }

    fn check(&self) -> Vec<PropertyIssue> {
        match (self.config.operation, self.config.operand) {
            (MathOperation::Divide, Some(b)) if b == 0.0 => {
                vec![PropertyIssue::error("operand 为0时不能做除法")]
            }
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StatLookupConfig {
    pub stat: String,
}

/// 读取拥有者属性
#[derive(Debug)]
pub struct StatLookupNode {
    config: StatLookupConfig,
}

impl StatLookupNode {
    pub fn new(config: StatLookupConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl NodeHandler for StatLookupNode {
    async fn handle<'a>(
        &self,
        ctx: &mut NodeContext<'a>,
        _inputs: &PortValues,
    ) -> Result<PortValues, RuleError> {
        let value = ctx.state.stat(&self.config.stat).ok_or_else(|| {
            RuleError::node(&ctx.node.id, format!("拥有者没有属性 {}", self.config.stat))
        })?;
        Ok(single("value", PortValue::Number(value)))
    }
}

#[derive(Debug, Deserialize)]
pub struct VariableConfig {
    pub name: String,
}

/// 读取图变量或实例参数
#[derive(Debug)]
pub struct VariableNode {
    config: VariableConfig,
}

impl VariableNode {
    pub fn new(config: VariableConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl NodeHandler for VariableNode {
    async fn handle<'a>(
        &self,
        ctx: &mut NodeContext<'a>,
        _inputs: &PortValues,
    ) -> Result<PortValues, RuleError> {
        let value = ctx.variables.get(&self.config.name).cloned().ok_or_else(|| {
            RuleError::node(&ctx.node.id, format!("变量 {} 未定义", self.config.name))
        })?;
        Ok(single("value", value))
    }
}

#[derive(Debug, Deserialize)]
pub struct ConstantConfig {
    pub value: f64,
}

#[derive(Debug)]
pub struct ConstantNode {
    config: ConstantConfig,
}

impl ConstantNode {
    pub fn new(config: ConstantConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl NodeHandler for ConstantNode {
    async fn handle<'a>(
        &self,
        _ctx: &mut NodeContext<'a>,
        _inputs: &PortValues,
    ) -> Result<PortValues, RuleError> {
        Ok(single("value", PortValue::Number(self.config.value)))
    }
}
