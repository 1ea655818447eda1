mod common;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::{catalog, node, owner_state, strike_graph};
use pretty_assertions::assert_eq;
use rule_graph::aop::PassInterceptor;
use rule_graph::types::{
    ExecutionResult, GameContext, NodeKind, OwnerRef, Parameter, ParameterType, RuleError,
    RuleGraph, RuleTemplate, TriggerEvent,
};
use rule_graph::{RuleEngine, RuleEngineTrait};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

fn params(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn parameterized_template() -> RuleTemplate {
    let catalog = catalog();
    RuleTemplate::new("scalable strike", strike_graph(&catalog, "{{damage}}"))
        .with_parameter(Parameter::new("damage", ParameterType::Dice).with_default("1d8"))
        .with_parameter(Parameter::new("rank", ParameterType::Integer).with_range(Some(1.0), Some(5.0)))
}

async fn engine_with_template() -> (RuleEngine, RuleTemplate) {
    let engine = RuleEngine::new().await;
    let template = engine.register_template(parameterized_template()).await.unwrap();
    (engine, template)
}

fn attack() -> TriggerEvent {
    TriggerEvent::new("on_attack").with_target("goblin").with_seed(11)
}

async fn strike(engine: &RuleEngine, id: uuid::Uuid) -> Result<ExecutionResult, RuleError> {
    engine
        .execute(id, attack(), GameContext::new(), owner_state())
        .await
}

#[tokio::test]
async fn attach_fills_defaults() {
    let (engine, template) = engine_with_template().await;
    let owner = OwnerRef::new("character", "hero");

    let instance = engine
        .attach(template.id, owner.clone(), params(json!({ "rank": 3 })))
        .await
        .unwrap();
    assert!(instance.is_active);
    assert_eq!(instance.usage_count, 0);
    assert_eq!(instance.parameter_values["damage"], json!("1d8"));
    assert_eq!(instance.parameter_values["rank"], json!(3));

    let owned = engine.instances_for_owner(&owner).await.unwrap();
    assert_eq!(owned.len(), 1);
    assert_eq!(owned[0].id, instance.id);
}

#[tokio::test]
async fn attach_rejects_bad_parameters() {
    let (engine, template) = engine_with_template().await;
    let owner = OwnerRef::new("character", "hero");

    let out_of_range = engine
        .attach(template.id, owner.clone(), params(json!({ "rank": 9 })))
        .await;
    assert!(matches!(out_of_range, Err(RuleError::InvalidParameter { ref name, .. }) if name == "rank"));

    let not_dice = engine
        .attach(template.id, owner.clone(), params(json!({ "damage": "lots" })))
        .await;
    assert!(matches!(not_dice, Err(RuleError::InvalidParameter { ref name, .. }) if name == "damage"));

    let unknown = engine
        .attach(template.id, owner, params(json!({ "colour": "red" })))
        .await;
    assert!(matches!(unknown, Err(RuleError::InvalidParameter { ref name, .. }) if name == "colour"));
}

#[tokio::test]
async fn attach_revalidates_with_bound_parameters() {
    let engine = RuleEngine::new().await;
    let catalog = catalog();
    let template = RuleTemplate::new("free text", strike_graph(&catalog, "{{damage}}"))
        .with_parameter(Parameter::new("damage", ParameterType::Text).required());
    let template = assert_ok!(engine.register_template(template).await);

    let result = engine
        .attach(template.id, OwnerRef::new("item", "sword"), params(json!({ "damage": "banana" })))
        .await;
    assert!(matches!(result, Err(RuleError::TemplateInvalid(_))));

    let missing = engine
        .attach(template.id, OwnerRef::new("item", "sword"), Map::new())
        .await;
    assert!(matches!(missing, Err(RuleError::InvalidParameter { .. })));
}

#[tokio::test]
async fn usage_counts_successful_passes() {
    let (engine, template) = engine_with_template().await;
    let instance = engine
        .attach(template.id, OwnerRef::new("character", "hero"), Map::new())
        .await
        .unwrap();

    for _ in 0..3 {
        assert_ok!(strike(&engine, instance.id).await);
    }
    // 事件类型不符时不计数
    let ignored = engine
        .execute(instance.id, TriggerEvent::new("on_rest"), GameContext::new(), owner_state())
        .await
        .unwrap();
    assert!(!ignored.fired);

    let stored = engine.instances().get(instance.id).await.unwrap();
    assert_eq!(stored.usage_count, 3);
}

#[tokio::test]
async fn lifecycle_activate_deactivate_detach() {
    let (engine, template) = engine_with_template().await;
    let instance = engine
        .attach(template.id, OwnerRef::new("character", "hero"), Map::new())
        .await
        .unwrap();

    let inactive = engine.deactivate(instance.id).await.unwrap();
    assert!(!inactive.is_active);
    assert!(inactive.deactivated_at.is_some());
    assert!(matches!(
        strike(&engine, instance.id).await,
        Err(RuleError::InstanceInactive(id)) if id == instance.id
    ));

    let active = engine.activate(instance.id).await.unwrap();
    assert!(active.is_active);
    assert_ok!(strike(&engine, instance.id).await);

    let detached = engine.detach(instance.id).await.unwrap();
    assert!(!detached.is_active);
    assert!(matches!(
        strike(&engine, instance.id).await,
        Err(RuleError::InstanceNotFound(_))
    ));
    assert_err!(engine.activate(instance.id).await);
}

#[tokio::test]
async fn expired_instances_are_swept() {
    let (engine, template) = engine_with_template().await;
    let owner = OwnerRef::new("character", "hero");
    let expiring = engine.attach(template.id, owner.clone(), Map::new()).await.unwrap();
    let lasting = engine.attach(template.id, owner, Map::new()).await.unwrap();

    let now = Utc::now();
    engine
        .set_expiry(expiring.id, Some(now - Duration::seconds(1)))
        .await
        .unwrap();
    engine
        .set_expiry(lasting.id, Some(now + Duration::hours(1)))
        .await
        .unwrap();

    let swept = engine.sweep_expired_at(now).await.unwrap();
    assert_eq!(swept, vec![expiring.id]);
    assert!(!engine.instances().get(expiring.id).await.unwrap().is_active);
    assert!(engine.instances().get(lasting.id).await.unwrap().is_active);

    // 重复清理没有副作用
    assert!(engine.sweep_expired_at(now).await.unwrap().is_empty());

    assert!(matches!(
        strike(&engine, expiring.id).await,
        Err(RuleError::InstanceInactive(_))
    ));
    assert_ok!(strike(&engine, lasting.id).await);
}

#[tokio::test]
async fn execute_expires_due_instance_without_sweep() {
    let (engine, template) = engine_with_template().await;
    let instance = engine
        .attach(template.id, OwnerRef::new("character", "hero"), Map::new())
        .await
        .unwrap();
    engine
        .set_expiry(instance.id, Some(Utc::now() - Duration::minutes(5)))
        .await
        .unwrap();

    assert!(matches!(
        strike(&engine, instance.id).await,
        Err(RuleError::InstanceInactive(_))
    ));
    let stored = engine.instances().get(instance.id).await.unwrap();
    assert!(!stored.is_active);
    assert_eq!(stored.usage_count, 0);
}

/// 记录同时进行中的执行数
#[derive(Debug, Default)]
struct OverlapWatch {
    in_flight: AtomicUsize,
    max_seen: AtomicUsize,
    passes: AtomicUsize,
}

#[async_trait]
impl PassInterceptor for OverlapWatch {
    async fn before_pass(&self, _event: &TriggerEvent) -> Result<(), RuleError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        Ok(())
    }

    async fn after_pass(&self, _event: &TriggerEvent, _result: &ExecutionResult) -> Result<(), RuleError> {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.passes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_triggers_on_one_instance_never_interleave() {
    let (engine, template) = engine_with_template().await;
    let watch = Arc::new(OverlapWatch::default());
    engine.add_pass_interceptor(watch.clone()).await;
    let instance = engine
        .attach(template.id, OwnerRef::new("character", "hero"), Map::new())
        .await
        .unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { strike(&engine, instance.id).await })
        })
        .collect();
    for handle in futures::future::join_all(handles).await {
        assert_ok!(handle.unwrap());
    }

    assert_eq!(watch.passes.load(Ordering::SeqCst), 16);
    assert_eq!(watch.max_seen.load(Ordering::SeqCst), 1);
    let stored = engine.instances().get(instance.id).await.unwrap();
    assert_eq!(stored.usage_count, 16);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_instances_may_run_together() {
    let (engine, template) = engine_with_template().await;
    let a = engine
        .attach(template.id, OwnerRef::new("character", "a"), Map::new())
        .await
        .unwrap();
    let b = engine
        .attach(template.id, OwnerRef::new("character", "b"), Map::new())
        .await
        .unwrap();

    let (ra, rb) = tokio::join!(strike(&engine, a.id), strike(&engine, b.id));
    assert_ok!(ra);
    assert_ok!(rb);
}

#[tokio::test]
async fn instance_conditions_join_the_owner_state() {
    let engine = RuleEngine::new().await;
    let catalog = catalog();
    let mut graph = RuleGraph::new("blessed strike");
    graph
        .add_node(node(&catalog, NodeKind::Trigger, "on_attack", "t"))
        .add_node(node(&catalog, NodeKind::Condition, "has_condition", "blessed").with_property("condition", "blessed"))
        .add_node(node(&catalog, NodeKind::Action, "deal_damage", "smite").with_property("damage_dice", "0d4+6"))
        .connect("t", "flow", "blessed", "flow")
        .connect("blessed", "true", "smite", "flow");
    let template = engine
        .register_template(RuleTemplate::new("blessed strike", graph))
        .await
        .unwrap();
    let instance = engine
        .attach(template.id, OwnerRef::new("character", "paladin"), Map::new())
        .await
        .unwrap();

    let plain = strike(&engine, instance.id).await.unwrap();
    assert_eq!(plain.total_damage(), 0.0);

    let updated = engine
        .set_active_conditions(instance.id, ["blessed"])
        .await
        .unwrap();
    assert!(updated.active_conditions.contains("blessed"));
    let blessed = strike(&engine, instance.id).await.unwrap();
    assert_eq!(blessed.total_damage(), 6.0);

    engine
        .set_active_conditions(instance.id, Vec::<String>::new())
        .await
        .unwrap();
    let cleared = strike(&engine, instance.id).await.unwrap();
    assert_eq!(cleared.total_damage(), 0.0);
}

#[tokio::test]
async fn unknown_instances_leave_no_lock_behind() {
    let (engine, template) = engine_with_template().await;
    for _ in 0..3 {
        let ghost = uuid::Uuid::new_v4();
        assert!(matches!(
            strike(&engine, ghost).await,
            Err(RuleError::InstanceNotFound(id)) if id == ghost
        ));
        assert_err!(engine.activate(ghost).await);
        assert_err!(engine.deactivate(ghost).await);
        assert_err!(engine.set_expiry(ghost, None).await);
        assert_err!(engine.set_active_conditions(ghost, ["stunned"]).await);
    }
    assert_eq!(engine.instances().lock_count().await, 0);

    let instance = engine
        .attach(template.id, OwnerRef::new("character", "hero"), Map::new())
        .await
        .unwrap();
    assert_ok!(strike(&engine, instance.id).await);
    assert_eq!(engine.instances().lock_count().await, 1);
    engine.detach(instance.id).await.unwrap();
    assert_eq!(engine.instances().lock_count().await, 0);
}
