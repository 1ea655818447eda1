mod action;
mod calculation;
mod condition;
pub mod dice;
mod flow;
mod trigger;

pub use action::{
    ApplyConditionConfig, ApplyConditionNode, ConsumeResourceConfig, ConsumeResourceNode,
    DealDamageConfig, DealDamageNode, HealConfig, HealNode, ModifyStatConfig, ModifyStatNode,
    SendMessageConfig, SendMessageNode,
};
pub use calculation::{
    ConstantConfig, ConstantNode, DiceRollConfig, DiceRollNode, MathConfig, MathNode,
    MathOperation, StatLookupConfig, StatLookupNode, VariableConfig, VariableNode,
};
pub use condition::{
    CompareConfig, CompareNode, ContextIsConfig, ContextIsNode, HasConditionConfig,
    HasConditionNode, Operator, RandomChanceConfig, RandomChanceNode, StatCheckConfig,
    StatCheckNode,
};
pub use dice::DiceExpr;
pub use flow::{MergeConfig, MergeNode, SplitConfig, SplitNode};
pub use trigger::{TriggerConfig, TriggerNode, TRIGGER_EVENTS};

use crate::engine::{NodeCatalog, NodeFactory, NodeHandler};
use crate::types::{NodeKind, NodeTemplate, Port, PortType, RuleError};
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// 由配置结构体和构造函数生成节点工厂
pub fn factory<C, H, F>(build: F) -> NodeFactory
where
    C: DeserializeOwned,
    H: NodeHandler + 'static,
    F: Fn(C) -> Result<H, RuleError> + Send + Sync + 'static,
{
    Arc::new(move |config| {
        let config: C = serde_json::from_value(config)?;
        Ok(Arc::new(build(config)?) as Arc<dyn NodeHandler>)
    })
}

fn flow_in() -> Port {
    Port::new("flow", PortType::Flow).required()
}

fn flow_out() -> Port {
    Port::new("flow", PortType::Flow)
}

/// 计算节点的可选控制流输入,用于把纯数据节点接入执行顺序
fn optional_flow_in() -> Port {
    Port::new("flow", PortType::Flow)
}

fn condition_template(subtype: &str, name: &str, description: &str) -> NodeTemplate {
    NodeTemplate::new(NodeKind::Condition, subtype, name, description)
        .system()
        .with_input(flow_in())
        .with_output(Port::new("true", PortType::Flow))
        .with_output(Port::new("false", PortType::Flow))
        .with_output(Port::new("result", PortType::Boolean))
}

/// 注册全部内置节点类型
pub fn register_builtins(catalog: &mut NodeCatalog) {
    let mut builtins: Vec<(NodeTemplate, NodeFactory)> = Vec::new();

    for event in TRIGGER_EVENTS {
        builtins.push((
            NodeTemplate::new(NodeKind::Trigger, event, event, "外部事件触发")
                .system()
                .with_output(flow_out())
                .with_output(Port::new("source", PortType::Entity))
                .with_output(Port::new("target", PortType::Entity))
                .with_output(Port::new("value", PortType::Number)),
            factory(|c: TriggerConfig| Ok(TriggerNode::new(c))),
        ));
    }

    builtins.push((
        condition_template("compare", "比较", "比较两个数值")
            .with_input(Port::new("left", PortType::Number).required())
            .with_input(Port::new("right", PortType::Number))
            .with_required("operator", ">="),
        factory(|c: CompareConfig| Ok(CompareNode::new(c))),
    ));
    builtins.push((
        condition_template("has_condition", "状态检查", "检查拥有者或目标的状态")
            .with_required("condition", "")
            .with_default("subject", "self"),
        factory(|c: HasConditionConfig| Ok(HasConditionNode::new(c))),
    ));
    builtins.push((
        condition_template("random_chance", "概率", "按概率选择分支").with_required("chance", 0.5),
        factory(|c: RandomChanceConfig| Ok(RandomChanceNode::new(c))),
    ));
    builtins.push((
        condition_template("context_is", "情境检查", "检查当前情境")
            .with_required("context_type", "weather")
            .with_required("value", ""),
        factory(|c: ContextIsConfig| Ok(ContextIsNode::new(c))),
    ));
    builtins.push((
        condition_template("stat_check", "属性检查", "把拥有者属性与常量比较")
            .with_required("stat", "level")
            .with_required("operator", ">=")
            .with_required("value", 1),
        factory(|c: StatCheckConfig| Ok(StatCheckNode::new(c))),
    ));

    builtins.push((
        NodeTemplate::new(NodeKind::Action, "deal_damage", "造成伤害", "掷骰造成伤害")
            .system()
            .with_input(flow_in())
            .with_input(Port::new("target", PortType::Entity))
            .with_input(Port::new("bonus", PortType::Number))
            .with_output(flow_out())
            .with_output(Port::new("damage", PortType::Number).with_modifier("damage_multiplier"))
            .with_required("damage_dice", "1d6")
            .with_default("damage_type", "force"),
        factory(DealDamageNode::new),
    ));
    builtins.push((
        NodeTemplate::new(NodeKind::Action, "heal", "治疗", "掷骰恢复生命")
            .system()
            .with_input(flow_in())
            .with_input(Port::new("target", PortType::Entity))
            .with_output(flow_out())
            .with_output(Port::new("amount", PortType::Number).with_modifier("healing_multiplier"))
            .with_required("amount_dice", "1d4"),
        factory(HealNode::new),
    ));
    builtins.push((
        NodeTemplate::new(NodeKind::Action, "apply_condition", "施加状态", "对目标施加状态")
            .system()
            .with_input(flow_in())
            .with_input(Port::new("target", PortType::Entity))
            .with_output(flow_out())
            .with_output(Port::new("duration", PortType::Number).with_modifier("duration_multiplier"))
            .with_required("condition", "stunned")
            .with_default("duration_rounds", 1),
        factory(|c: ApplyConditionConfig| Ok(ApplyConditionNode::new(c))),
    ));
    builtins.push((
        NodeTemplate::new(NodeKind::Action, "modify_stat", "修改属性", "修改拥有者属性")
            .system()
            .with_input(flow_in())
            .with_input(Port::new("amount", PortType::Number))
            .with_output(flow_out())
            .with_output(Port::new("delta", PortType::Number))
            .with_required("stat", "strength")
            .with_default("delta", 0),
        factory(|c: ModifyStatConfig| Ok(ModifyStatNode::new(c))),
    ));
    builtins.push((
        NodeTemplate::new(NodeKind::Action, "consume_resource", "消耗资源", "消耗法术位等资源")
            .system()
            .with_input(flow_in())
            .with_output(flow_out())
            .with_output(Port::new("cost", PortType::Number).with_modifier("cost_multiplier"))
            .with_required("resource", "spell_slots")
            .with_required("cost", 1),
        factory(|c: ConsumeResourceConfig| Ok(ConsumeResourceNode::new(c))),
    ));
    builtins.push((
        NodeTemplate::new(NodeKind::Action, "send_message", "消息", "向玩家输出文本")
            .system()
            .with_input(flow_in())
            .with_output(flow_out())
            .with_output(Port::new("text", PortType::Text))
            .with_required("text", ""),
        factory(|c: SendMessageConfig| Ok(SendMessageNode::new(c))),
    ));

    builtins.push((
        NodeTemplate::new(NodeKind::Calculation, "dice_roll", "掷骰", "按骰子表达式掷骰")
            .system()
            .with_input(optional_flow_in())
            .with_output(Port::new("result", PortType::Number))
            .with_required("dice", "1d20"),
        factory(DiceRollNode::new),
    ));
    builtins.push((
        NodeTemplate::new(NodeKind::Calculation, "math", "运算", "对两个数值做运算")
            .system()
            .with_input(optional_flow_in())
            .with_input(Port::new("a", PortType::Number).required())
            .with_input(Port::new("b", PortType::Number))
            .with_output(Port::new("result", PortType::Number))
            .with_required("operation", "add"),
        factory(|c: MathConfig| Ok(MathNode::new(c))),
    ));
    builtins.push((
        NodeTemplate::new(NodeKind::Calculation, "stat_lookup", "属性", "读取拥有者属性")
            .system()
            .with_input(optional_flow_in())
            .with_output(Port::new("value", PortType::Number))
            .with_required("stat", "level"),
        factory(|c: StatLookupConfig| Ok(StatLookupNode::new(c))),
    ));
    builtins.push((
        NodeTemplate::new(NodeKind::Calculation, "variable", "变量", "读取图变量或实例参数")
            .system()
            .with_input(optional_flow_in())
            .with_output(Port::new("value", PortType::Any))
            .with_required("name", ""),
        factory(|c: VariableConfig| Ok(VariableNode::new(c))),
    ));
    builtins.push((
        NodeTemplate::new(NodeKind::Calculation, "constant", "常量", "输出固定数值")
            .system()
            .with_input(optional_flow_in())
            .with_output(Port::new("value", PortType::Number))
            .with_required("value", 0),
        factory(|c: ConstantConfig| Ok(ConstantNode::new(c))),
    ));

    builtins.push((
        NodeTemplate::new(NodeKind::Flow, "split", "分叉", "把控制流分为多个依次执行的分支")
            .system()
            .with_input(flow_in())
            .with_output(Port::new("branch_1", PortType::Flow))
            .with_output(Port::new("branch_2", PortType::Flow))
            .with_default("branches", 2),
        factory(|c: SplitConfig| Ok(SplitNode::new(c))),
    ));
    builtins.push((
        NodeTemplate::new(NodeKind::Flow, "merge", "汇聚", "等待所有入边完成后继续")
            .system()
            .with_input(Port::new("in_1", PortType::Flow))
            .with_input(Port::new("in_2", PortType::Flow))
            .with_output(flow_out())
            .with_output(Port::new("completed", PortType::Number)),
        factory(|_: MergeConfig| Ok(MergeNode)),
    ));

    for (template, factory) in builtins {
        if let Err(e) = catalog.register(template, factory) {
            tracing::error!("注册内置节点类型失败: {}", e);
        }
    }
}

