#![allow(dead_code)]

use rule_graph::aop::InterceptorManager;
use rule_graph::engine::{CertifiedGraph, Executor, GraphValidator, NodeCatalog, Pass};
use rule_graph::types::{
    EntityState, ExecutionResult, GameContext, ModifierSet, Node, NodeKind,
    RuleError, RuleGraph, TriggerEvent,
};
use std::sync::Arc;

pub fn catalog() -> NodeCatalog {
    NodeCatalog::with_builtins()
}

pub fn node(catalog: &NodeCatalog, kind: NodeKind, subtype: &str, id: &str) -> Node {
    catalog.instantiate(kind, subtype, id).unwrap()
}

pub fn certify(catalog: &NodeCatalog, graph: &RuleGraph) -> CertifiedGraph {
    GraphValidator::new(catalog)
        .certify(Arc::new(graph.clone()), &graph.variables)
        .unwrap()
}

pub fn owner_state() -> EntityState {
    EntityState::new("hero", 5)
        .with_stat("strength", 16.0)
        .with_resource("spell_slots", 3.0)
}

/// 触发 -> 造成伤害
pub fn strike_graph(catalog: &NodeCatalog, dice: &str) -> RuleGraph {
    let mut graph = RuleGraph::new("strike");
    graph
        .add_node(node(catalog, NodeKind::Trigger, "on_attack", "trigger"))
        .add_node(
            node(catalog, NodeKind::Action, "deal_damage", "hit")
                .with_property("damage_dice", dice)
                .with_property("damage_type", "slashing"),
        )
        .connect("trigger", "flow", "hit", "flow");
    graph
}

pub async fn run_with(
    catalog: &NodeCatalog,
    graph: &RuleGraph,
    event: &TriggerEvent,
    context: &GameContext,
    modifiers: ModifierSet,
) -> Result<ExecutionResult, RuleError> {
    let interceptors = InterceptorManager::new();
    let state = owner_state();
    let variables = graph.variables.clone();
    let pass = Pass {
        event,
        context,
        state: &state,
        variables: &variables,
        modifiers,
    };
    Executor::new(catalog, &interceptors)
        .execute(&certify(catalog, graph), pass)
        .await
}

pub async fn run(
    catalog: &NodeCatalog,
    graph: &RuleGraph,
    event: &TriggerEvent,
) -> Result<ExecutionResult, RuleError> {
    run_with(catalog, graph, event, &GameContext::new(), ModifierSet::new()).await
}
