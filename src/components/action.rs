use super::dice::DiceExpr;
use crate::engine::{NodeHandler, PropertyIssue};
use crate::types::{Mutation, NodeContext, PortValue, PortValues, RuleError};
use async_trait::async_trait;
use serde::Deserialize;

/// 单次掷骰超过该数量视为少见配置
const LARGE_DICE_POOL: u32 = 20;

fn flow_with(port: &str, value: f64) -> PortValues {
    let mut outputs = PortValues::new();
    outputs.insert("flow".into(), PortValue::Flow);
    outputs.insert(port.into(), PortValue::Number(value));
    outputs
}

fn number_of(outputs: &PortValues, port: &str) -> f64 {
    outputs.get(port).and_then(PortValue::as_number).unwrap_or(0.0)
}

/// 目标: 优先取 target 输入端口,否则取事件目标
fn target_of(ctx: &NodeContext<'_>, inputs: &PortValues) -> Option<String> {
    inputs
        .get("target")
        .and_then(PortValue::as_str)
        .map(str::to_string)
        .or_else(|| ctx.event.target.clone())
}

fn parse_dice(notation: &str) -> Result<DiceExpr, RuleError> {
    notation.parse()
}

fn dice_pool_issues(notation: &str) -> Vec<PropertyIssue> {
    match notation.parse::<DiceExpr>() {
        Ok(d) if d.count > LARGE_DICE_POOL => vec![PropertyIssue::warning(format!(
            "骰子数量 {} 异常偏大",
            d.count
        ))],
        Ok(d) if d.min() < 0 => vec![PropertyIssue::warning(format!(
            "{} 的最小值为负数",
            notation
        ))],
        _ => Vec::new(),
    }
}

#[derive(Debug, Deserialize)]
pub struct DealDamageConfig {
    pub damage_dice: String,
    #[serde(default = "default_damage_type")]
    pub damage_type: String,
}

fn default_damage_type() -> String {
    "force".to_string()
}

/// 造成伤害
#[derive(Debug)]
pub struct DealDamageNode {
    config: DealDamageConfig,
    dice: DiceExpr,
}

impl DealDamageNode {
    pub fn new(config: DealDamageConfig) -> Result<Self, RuleError> {
        let dice = parse_dice(&config.damage_dice)?;
        Ok(Self { config, dice })
    }
}

#[async_trait]
impl NodeHandler for DealDamageNode {
    async fn handle<'a>(
        &self,
        ctx: &mut NodeContext<'a>,
        inputs: &PortValues,
    ) -> Result<PortValues, RuleError> {
        let mut damage = self.dice.roll(&mut *ctx.rng) as f64;
        if let Some(bonus) = inputs.get("bonus").and_then(PortValue::as_number) {
            damage += bonus;
        }
        Ok(flow_with("damage", damage.max(0.0)))
    }

    fn mutations(
        &self,
        ctx: &NodeContext<'_>,
        inputs: &PortValues,
        outputs: &PortValues,
    ) -> Vec<Mutation> {
        vec![Mutation::DealDamage {
            target: target_of(ctx, inputs),
            amount: number_of(outputs, "damage"),
            damage_type: self.config.damage_type.clone(),
        }]
    }

    fn check(&self) -> Vec<PropertyIssue> {
        dice_pool_issues(&self.config.damage_dice)
    }

    fn rolls_dice(&self) -> bool {
        true
    }
}

#[derive(Debug, Deserialize)]
pub struct HealConfig {
    pub amount_dice: String,
}

/// 治疗
#[derive(Debug)]
pub struct HealNode {
    config: HealConfig,
    dice: DiceExpr,
}

impl HealNode {
    pub fn new(config: HealConfig) -> Result<Self, RuleError> {
        let dice = parse_dice(&config.amount_dice)?;
        Ok(Self { config, dice })
    }
}

#[async_trait]
impl NodeHandler for HealNode {
    async fn handle<'a>(
        &self,
        ctx: &mut NodeContext<'a>,
        _inputs: &PortValues,
    ) -> Result<PortValues, RuleError> {
        let amount = self.dice.roll(&mut *ctx.rng) as f64;
        Ok(flow_with("amount", amount.max(0.0)))
    }

    fn mutations(
        &self,
        ctx: &NodeContext<'_>,
        inputs: &PortValues,
        outputs: &PortValues,
    ) -> Vec<Mutation> {
        let target = inputs
            .get("target")
            .and_then(PortValue::as_str)
            .map(str::to_string)
            .or_else(|| Some(ctx.state.entity_id.clone()));
        vec![Mutation::Heal {
            target,
            amount: number_of(outputs, "amount"),
        }]
    }

    fn check(&self) -> Vec<PropertyIssue> {
        dice_pool_issues(&self.config.amount_dice)
    }

    fn rolls_dice(&self) -> bool {
        true
    }
}

#[derive(Debug, Deserialize)]
pub struct ApplyConditionConfig {
    pub condition: String,
    #[serde(default = "default_duration")]
    pub duration_rounds: f64,
}

fn default_duration() -> f64 {
    1.0
}

/// 施加状态
#[derive(Debug)]
pub struct ApplyConditionNode {
    config: ApplyConditionConfig,
}

impl ApplyConditionNode {
    pub fn new(config: ApplyConditionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl NodeHandler for ApplyConditionNode {
    async fn handle<'a>(
        &self,
        _ctx: &mut NodeContext<'a>,
        _inputs: &PortValues,
    ) -> Result<PortValues, RuleError> {
        Ok(flow_with("duration", self.config.duration_rounds))
    }

    fn mutations(
        &self,
        ctx: &NodeContext<'_>,
        inputs: &PortValues,
        outputs: &PortValues,
    ) -> Vec<Mutation> {
        vec![Mutation::ApplyCondition {
            target: target_of(ctx, inputs),
            condition: self.config.condition.clone(),
            duration_rounds: number_of(outputs, "duration"),
        }]
    }

    fn check(&self) -> Vec<PropertyIssue> {
        let mut issues = Vec::new();
        if self.config.condition.trim().is_empty() {
            issues.push(PropertyIssue::error("condition 不能为空"));
        }
        if self.config.duration_rounds <= 0.0 {
            issues.push(PropertyIssue::error("duration_rounds 必须大于0"));
        } else if self.config.duration_rounds > 100.0 {
            issues.push(PropertyIssue::warning("持续回合数异常偏大"));
        }
        issues
    }
}

#[derive(Debug, Deserialize)]
pub struct ModifyStatConfig {
    pub stat: String,
    #[serde(default)]
    pub delta: f64,
}

/// 修改拥有者属性,amount 输入端口优先于 delta 属性
#[derive(Debug)]
pub struct ModifyStatNode {
    config: ModifyStatConfig,
}

impl ModifyStatNode {
    pub fn new(config: ModifyStatConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl NodeHandler for ModifyStatNode {
    async fn handle<'a>(
        &self,
        _ctx: &mut NodeContext<'a>,
        inputs: &PortValues,
    ) -> Result<PortValues, RuleError> {
        let delta = inputs
            .get("amount")
            .and_then(PortValue::as_number)
            .unwrap_or(self.config.delta);
        Ok(flow_with("delta", delta))
    }

    fn mutations(
        &self,
        _ctx: &NodeContext<'_>,
        _inputs: &PortValues,
        outputs: &PortValues,
    ) -> Vec<Mutation> {
        vec![Mutation::ModifyStat {
            stat: self.config.stat.clone(),
            delta: number_of(outputs, "delta"),
        }]
    }
}

#[derive(Debug, Deserialize)]
pub struct ConsumeResourceConfig {
    pub resource: String,
    pub cost: f64,
}

/// 消耗资源(法术位、气力等)
#[derive(Debug)]
pub struct ConsumeResourceNode {
    config: ConsumeResourceConfig,
}

impl ConsumeResourceNode {
    pub fn new(config: ConsumeResourceConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl NodeHandler for ConsumeResourceNode {
    async fn handle<'a>(
        &self,
        ctx: &mut NodeContext<'a>,
        _inputs: &PortValues,
    ) -> Result<PortValues, RuleError> {
        let available = ctx.state.resources.get(&self.config.resource).copied();
        if let Some(available) = available {
            if available < self.config.cost {
                return Err(RuleError::node(
                    &ctx.node.id,
                    format!(
                        "资源 {} 不足: 需要 {}, 剩余 {}",
                        self.config.resource, self.config.cost, available
                    ),
                ));
            }
        }
        Ok(flow_with("cost", self.config.cost))
    }

    fn mutations(
        &self,
        _ctx: &NodeContext<'_>,
        _inputs: &PortValues,
        outputs: &PortValues,
    ) -> Vec<Mutation> {
        vec![Mutation::ConsumeResource {
            resource: self.config.resource.clone(),
            amount: number_of(outputs, "cost"),
        }]
    }

    fn check(&self) -> Vec<PropertyIssue> {
        if self.config.cost < 0.0 {
            vec![PropertyIssue::error("cost 不能为负数")]
        } else if self.config.cost == 0.0 {
            vec![PropertyIssue::warning("cost 为0,该节点不消耗资源")]
        } else {
            Vec::new()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SendMessageConfig {
    pub text: String,
}

/// 向玩家输出一段文本
#[derive(Debug)]
pub struct SendMessageNode {
    config: SendMessageConfig,
}

impl SendMessageNode {
    pub fn new(config: SendMessageConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl NodeHandler for SendMessageNode {
    async fn handle<'a>(
        &self,
        _ctx: &mut NodeContext<'a>,
        _inputs: &PortValues,
    ) -> Result<PortValues, RuleError> {
        let mut outputs = PortValues::new();
        outputs.insert("flow".into(), PortValue::Flow);
        outputs.insert("text".into(), PortValue::Text(self.config.text.clone()));
        Ok(outputs)
    }

    fn mutations(
        &self,
        _ctx: &NodeContext<'_>,
        _inputs: &PortValues,
        outputs: &PortValues,
    ) -> Vec<Mutation> {
        let text = outputs
            .get("text")
            .and_then(PortValue::as_str)
            .unwrap_or(&self.config.text)
            .to_string();
        vec![Mutation::Message { text }]
    }
}
