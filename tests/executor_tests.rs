mod common;

use async_trait::async_trait;
use common::{catalog, node, run, run_with, strike_graph};
use pretty_assertions::assert_eq;
use rule_graph::components::factory;
use rule_graph::engine::{CertifiedGraph, GraphValidator, IssueCode, ModifierResolver};
use rule_graph::types::{
    ConditionalModifier, ContextType, GameContext, ModifierSet, Mutation, NodeContext, NodeKind,
    NodeTemplate, Port, PortType, PortValue, PortValues, RuleError, RuleGraph, TriggerEvent,
};
use rule_graph::NodeHandler;
use serde::Deserialize;
use std::sync::Arc;

fn attack(seed: u64) -> TriggerEvent {
    TriggerEvent::new("on_attack")
        .with_source("hero")
        .with_target("goblin")
        .with_value("value", PortValue::Number(12.0))
        .with_seed(seed)
}

fn trace_ids(result: &rule_graph::types::ExecutionResult) -> Vec<&str> {
    result.trace.iter().map(|t| t.node_id.as_str()).collect()
}

#[test_log::test(tokio::test)]
async fn strike_deals_damage_to_event_target() {
    let catalog = catalog();
    let graph = strike_graph(&catalog, "0d6+7");

    let result = run(&catalog, &graph, &attack(1)).await.unwrap();
    assert!(result.fired);
    assert!(result.success);
    assert_eq!(trace_ids(&result), vec!["trigger", "hit"]);
    assert_eq!(
        result.mutations,
        vec![Mutation::DealDamage {
            target: Some("goblin".into()),
            amount: 7.0,
            damage_type: "slashing".into(),
        }]
    );
    assert_eq!(result.output("hit", "damage"), Some(&PortValue::Number(7.0)));
    assert_eq!(result.output("trigger", "target"), Some(&PortValue::Entity("goblin".into())));
    // flow 端口不出现在输出值中
    assert!(result.output("hit", "flow").is_none());
}

#[tokio::test]
async fn mismatched_event_does_not_fire() {
    let catalog = catalog();
    let graph = strike_graph(&catalog, "1d6");
    let event = TriggerEvent::new("on_rest");

    let result = run(&catalog, &graph, &event).await.unwrap();
    assert!(!result.fired);
    assert!(result.success);
    assert!(result.trace.is_empty());
    assert!(result.mutations.is_empty());
}

#[tokio::test]
async fn same_seed_gives_identical_passes() {
    let catalog = catalog();
    let graph = strike_graph(&catalog, "4d8+2");

    let first = run(&catalog, &graph, &attack(99)).await.unwrap();
    let second = run(&catalog, &graph, &attack(99)).await.unwrap();
    assert_eq!(first.trace, second.trace);
    assert_eq!(first.mutations, second.mutations);
    assert_eq!(first.output_values, second.output_values);
}

#[tokio::test]
async fn two_d6_plus_three_stays_in_bounds() {
    let catalog = catalog();
    let graph = strike_graph(&catalog, "2d6+3");

    let mut seen_min = f64::MAX;
    let mut seen_max = f64::MIN;
    for seed in 0..10_000u64 {
        let result = run(&catalog, &graph, &attack(seed)).await.unwrap();
        let damage = result.total_damage();
        assert!((5.0..=15.0).contains(&damage), "seed {} rolled {}", seed, damage);
        seen_min = seen_min.min(damage);
        seen_max = seen_max.max(damage);
    }
    assert_eq!(seen_min, 5.0);
    assert_eq!(seen_max, 15.0);
}

/// 触发 -> 比较(value >= 10) -> true: 伤害 / false: 消息
fn branching_graph() -> RuleGraph {
    let catalog = catalog();
    let mut graph = RuleGraph::new("branch");
    graph
        .add_node(node(&catalog, NodeKind::Trigger, "on_attack", "t"))
        .add_node(
            node(&catalog, NodeKind::Condition, "compare", "check")
                .with_property("operator", ">=")
                .with_property("value", 10),
        )
        .add_node(node(&catalog, NodeKind::Action, "deal_damage", "hit").with_property("damage_dice", "0d4+5"))
        .add_node(node(&catalog, NodeKind::Action, "send_message", "miss").with_property("text", "missed"))
        .connect("t", "flow", "check", "flow")
        .connect("t", "value", "check", "left")
        .connect("check", "true", "hit", "flow")
        .connect("check", "false", "miss", "flow");
    graph
}

#[tokio::test]
async fn condition_selects_one_branch() {
    let catalog = catalog();
    let graph = branching_graph();

    let high = run(&catalog, &graph, &attack(3)).await.unwrap();
    assert_eq!(trace_ids(&high), vec!["t", "check", "hit"]);
    assert_eq!(high.output("check", "result"), Some(&PortValue::Boolean(true)));

    let low_event = TriggerEvent::new("on_attack").with_value("value", PortValue::Number(4.0));
    let low = run(&catalog, &graph, &low_event).await.unwrap();
    assert_eq!(trace_ids(&low), vec!["t", "check", "miss"]);
    assert_eq!(low.mutations, vec![Mutation::Message { text: "missed".into() }]);
}

#[tokio::test]
async fn split_runs_branches_in_declaration_order() {
    let catalog = catalog();
    let mut graph = RuleGraph::new("split");
    graph
        .add_node(node(&catalog, NodeKind::Trigger, "on_turn_start", "t"))
        .add_node(node(&catalog, NodeKind::Flow, "split", "fork"))
        .add_node(node(&catalog, NodeKind::Action, "send_message", "a").with_property("text", "a"))
        .add_node(node(&catalog, NodeKind::Action, "send_message", "b").with_property("text", "b"))
        .add_node(node(&catalog, NodeKind::Action, "send_message", "a2").with_property("text", "a2"))
        .connect("t", "flow", "fork", "flow")
        .connect("fork", "branch_1", "a", "flow")
        .connect("fork", "branch_2", "b", "flow")
        .connect("a", "flow", "a2", "flow");

    let event = TriggerEvent::new("on_turn_start");
    let result = run(&catalog, &graph, &event).await.unwrap();
    // 第一个分支走完才进入第二个分支
    assert_eq!(trace_ids(&result), vec!["t", "fork", "a", "a2", "b"]);
}

#[tokio::test]
async fn merge_waits_for_all_inbound_edges() {
    let catalog = catalog();
    let mut graph = RuleGraph::new("merge");
    graph
        .add_node(node(&catalog, NodeKind::Trigger, "on_turn_end", "t"))
        .add_node(
            node(&catalog, NodeKind::Condition, "compare", "check")
                .with_property("operator", ">")
                .with_property("value", 100),
        )
        .add_node(node(&catalog, NodeKind::Action, "heal", "big").with_property("amount_dice", "0d4+9"))
        .add_node(node(&catalog, NodeKind::Action, "heal", "small").with_property("amount_dice", "0d4+1"))
        .add_node(node(&catalog, NodeKind::Flow, "merge", "join"))
        .add_node(node(&catalog, NodeKind::Action, "send_message", "done").with_property("text", "done"))
        .connect("t", "flow", "check", "flow")
        .connect("t", "value", "check", "left")
        .connect("check", "true", "big", "flow")
        .connect("check", "false", "small", "flow")
        .connect("big", "flow", "join", "in_1")
        .connect("small", "flow", "join", "in_2")
        .connect("join", "flow", "done", "flow");

    let event = TriggerEvent::new("on_turn_end").with_value("value", PortValue::Number(3.0));
    let result = run(&catalog, &graph, &event).await.unwrap();
    assert_eq!(trace_ids(&result), vec!["t", "check", "small", "join", "done"]);
    assert_eq!(result.output("join", "completed"), Some(&PortValue::Number(1.0)));
}

#[tokio::test]
async fn node_after_untaken_branch_is_skipped() {
    let catalog = catalog();
    let mut graph = branching_graph();
    graph
        .add_node(node(&catalog, NodeKind::Action, "send_message", "after").with_property("text", "after"))
        .connect("hit", "flow", "after", "flow");

    let low_event = TriggerEvent::new("on_attack").with_value("value", PortValue::Number(1.0));
    let result = run(&catalog, &graph, &low_event).await.unwrap();
    assert!(!trace_ids(&result).contains(&"after"));
}

#[tokio::test]
async fn data_edges_feed_calculations() {
    let catalog = catalog();
    let mut graph = RuleGraph::new("scaled");
    graph
        .add_node(node(&catalog, NodeKind::Trigger, "on_hit", "t"))
        .add_node(node(&catalog, NodeKind::Calculation, "stat_lookup", "str").with_property("stat", "strength"))
        .add_node(
            node(&catalog, NodeKind::Calculation, "math", "mod")
                .with_property("operation", "subtract")
                .with_property("operand", 10),
        )
        .add_node(node(&catalog, NodeKind::Action, "deal_damage", "hit").with_property("damage_dice", "0d6+2"))
        .connect("t", "flow", "str", "flow")
        .connect("str", "value", "mod", "a")
        .connect("mod", "result", "hit", "bonus")
        .connect("t", "flow", "hit", "flow");

    let event = TriggerEvent::new("on_hit").with_seed(5);
    let result = run(&catalog, &graph, &event).await.unwrap();
    // 力量 16 - 10 + 2
    assert_eq!(result.total_damage(), 8.0);
    assert_eq!(result.output("mod", "result"), Some(&PortValue::Number(6.0)));
}

#[tokio::test]
async fn failing_node_stops_the_pass() {
    let catalog = catalog();
    let mut graph = RuleGraph::new("costly");
    graph
        .add_node(node(&catalog, NodeKind::Trigger, "on_spell_cast", "t"))
        .add_node(
            node(&catalog, NodeKind::Action, "consume_resource", "slot")
                .with_property("resource", "spell_slots")
                .with_property("cost", 9),
        )
        .add_node(node(&catalog, NodeKind::Action, "deal_damage", "burn").with_property("damage_dice", "8d6"))
        .connect("t", "flow", "slot", "flow")
        .connect("slot", "flow", "burn", "flow");

    let result = run(&catalog, &graph, &TriggerEvent::new("on_spell_cast")).await.unwrap();
    assert!(result.fired);
    assert!(!result.success);
    assert!(result.mutations.is_empty());
    assert!(result.output_values.is_empty());
    assert!(matches!(
        result.error,
        Some(RuleError::NodeEvaluation { ref node_id, .. }) if node_id.as_str() == "slot"
    ));
    let last = result.trace.last().unwrap();
    assert_eq!(last.node_id.as_str(), "slot");
    assert!(!last.success);
    assert!(last.error.is_some());
}

#[derive(Debug, Deserialize)]
struct QuietConfig {}

/// 声明了数值输出却从不产生
#[derive(Debug)]
struct QuietNode;

#[async_trait]
impl NodeHandler for QuietNode {
    async fn handle<'a>(
        &self,
        _ctx: &mut NodeContext<'a>,
        _inputs: &PortValues,
    ) -> Result<PortValues, RuleError> {
        Ok(PortValues::new())
    }
}

#[tokio::test]
async fn missing_required_data_is_unresolved() {
    let mut catalog = catalog();
    catalog
        .register(
            NodeTemplate::new(NodeKind::Calculation, "quiet", "Quiet", "")
                .with_input(Port::new("flow", PortType::Flow))
                .with_output(Port::new("reading", PortType::Number)),
            factory(|_: QuietConfig| Ok(QuietNode)),
        )
        .unwrap();
    let mut graph = RuleGraph::new("silent sensor");
    graph
        .add_node(node(&catalog, NodeKind::Trigger, "manual", "t"))
        .add_node(node(&catalog, NodeKind::Calculation, "quiet", "sensor"))
        .add_node(node(&catalog, NodeKind::Calculation, "math", "sum").with_property("operand", 1))
        .connect("t", "flow", "sensor", "flow")
        .connect("t", "flow", "sum", "flow")
        .connect("sensor", "reading", "sum", "a");

    let result = run(&catalog, &graph, &TriggerEvent::new("manual")).await.unwrap();
    assert!(!result.success);
    assert_eq!(trace_ids(&result), vec!["t", "sensor", "sum"]);
    assert!(matches!(
        result.error,
        Some(RuleError::UnresolvedPort { ref port, .. }) if port == "a"
    ));
}

#[tokio::test]
async fn text_variable_into_number_port_is_a_type_mismatch() {
    let catalog = catalog();
    let mut graph = RuleGraph::new("labelled");
    graph
        .variables
        .insert("label".into(), PortValue::Text("ogre".into()));
    graph
        .add_node(node(&catalog, NodeKind::Trigger, "manual", "t"))
        .add_node(node(&catalog, NodeKind::Calculation, "variable", "label").with_property("name", "label"))
        .add_node(node(&catalog, NodeKind::Calculation, "math", "sum").with_property("operand", 1))
        .connect("t", "flow", "label", "flow")
        .connect("t", "flow", "sum", "flow")
        .connect("label", "value", "sum", "a");

    let result = run(&catalog, &graph, &TriggerEvent::new("manual")).await.unwrap();
    assert!(matches!(
        result.error,
        Some(RuleError::TypeMismatch { ref port, .. }) if port == "a"
    ));
}

#[tokio::test]
async fn split_order_follows_ports_not_connection_order() {
    let catalog = catalog();
    let mut graph = RuleGraph::new("split reversed");
    graph
        .add_node(node(&catalog, NodeKind::Trigger, "on_turn_start", "t"))
        .add_node(node(&catalog, NodeKind::Flow, "split", "fork"))
        .add_node(node(&catalog, NodeKind::Action, "send_message", "b").with_property("text", "b"))
        .add_node(node(&catalog, NodeKind::Action, "send_message", "a").with_property("text", "a"))
        .add_node(node(&catalog, NodeKind::Action, "send_message", "a2").with_property("text", "a2"))
        .connect("t", "flow", "fork", "flow")
        .connect("fork", "branch_2", "b", "flow")
        .connect("fork", "branch_1", "a", "flow")
        .connect("a", "flow", "a2", "flow");

    let result = run(&catalog, &graph, &TriggerEvent::new("on_turn_start")).await.unwrap();
    assert_eq!(trace_ids(&result), vec!["t", "fork", "a", "a2", "b"]);
    assert_eq!(
        result.mutations,
        vec![
            Mutation::Message { text: "a".into() },
            Mutation::Message { text: "a2".into() },
            Mutation::Message { text: "b".into() },
        ]
    );
}

#[tokio::test]
async fn merge_after_split_counts_both_branches() {
    let catalog = catalog();
    let mut graph = RuleGraph::new("rejoin");
    graph
        .add_node(node(&catalog, NodeKind::Trigger, "on_turn_start", "t"))
        .add_node(node(&catalog, NodeKind::Flow, "split", "fork"))
        .add_node(node(&catalog, NodeKind::Action, "heal", "left").with_property("amount_dice", "0d4+1"))
        .add_node(node(&catalog, NodeKind::Action, "heal", "right").with_property("amount_dice", "0d4+2"))
        .add_node(node(&catalog, NodeKind::Flow, "merge", "join"))
        .connect("t", "flow", "fork", "flow")
        .connect("fork", "branch_1", "left", "flow")
        .connect("fork", "branch_2", "right", "flow")
        .connect("left", "flow", "join", "in_1")
        .connect("right", "flow", "join", "in_2");

    let result = run(&catalog, &graph, &TriggerEvent::new("on_turn_start")).await.unwrap();
    assert_eq!(trace_ids(&result), vec!["t", "fork", "left", "right", "join"]);
    assert_eq!(result.output("join", "completed"), Some(&PortValue::Number(2.0)));
}

#[test]
fn certification_rejects_graphs_the_validator_rejects() {
    let catalog = catalog();
    let mut graph = strike_graph(&catalog, "1d6");
    graph
        .add_node(node(&catalog, NodeKind::Action, "send_message", "say").with_property("text", "hi"))
        // text -> flow
        .connect("say", "text", "hit", "flow")
        .connect("trigger", "flow", "say", "flow");

    let validator = GraphValidator::new(&catalog);
    assert!(!validator.validate(&graph).valid);
    assert!(matches!(
        validator.certify(Arc::new(graph.clone()), &graph.variables),
        Err(RuleError::GraphInvalid(_))
    ));
    assert!(matches!(
        CertifiedGraph::verify(Arc::new(graph.clone()), None, &validator, &graph.variables),
        Err(RuleError::GraphInvalid(_))
    ));
}

#[tokio::test]
async fn unreachable_data_source_is_rejected() {
    let catalog = catalog();
    let mut graph = strike_graph(&catalog, "0d6+3");
    graph
        .add_node(node(&catalog, NodeKind::Calculation, "constant", "extra").with_property("value", 4))
        .connect("extra", "value", "hit", "bonus");

    let validation = GraphValidator::new(&catalog).validate(&graph);
    assert!(!validation.valid);
    assert!(validation.has_error(IssueCode::UnreachableSource));
    assert!(matches!(
        GraphValidator::new(&catalog).certify(Arc::new(graph.clone()), &graph.variables),
        Err(RuleError::GraphInvalid(_))
    ));

    // 接入控制流后常量可达,伤害带上加值
    graph.connect("trigger", "flow", "extra", "flow");
    let result = run(&catalog, &graph, &attack(2)).await.unwrap();
    assert!(result.success);
    assert_eq!(result.total_damage(), 7.0);
}

#[tokio::test]
async fn modifiers_scale_declared_outputs() {
    let catalog = catalog();
    let graph = strike_graph(&catalog, "0d6+10");
    let context = GameContext::new()
        .with(ContextType::Plane, "elemental_fire")
        .with(ContextType::Weather, "rain");
    let modifiers = vec![
        ConditionalModifier::new("fire plane", ContextType::Plane, "elemental_fire", 10)
            .with_number("damage_multiplier", 1.5),
        ConditionalModifier::new("rain", ContextType::Weather, "rain", 5)
            .with_number("damage_multiplier", 0.5),
    ];
    let set = ModifierResolver::new().resolve(&context, &modifiers);

    let result = run_with(&catalog, &graph, &attack(1), &context, set.clone()).await.unwrap();
    assert_eq!(result.total_damage(), 7.5);
    assert_eq!(result.active_modifiers, set);

    let plain = run_with(&catalog, &graph, &attack(1), &context, ModifierSet::new()).await.unwrap();
    assert_eq!(plain.total_damage(), 10.0);
}
