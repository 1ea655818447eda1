use rule_graph::types::{ContextType, EntityState, GameContext, OwnerRef, PortValue, TriggerEvent};
use rule_graph::{RuleEngine, RuleEngineTrait, Scenario, SimulationSettings};
use serde_json::json;
use tracing::{info, Level};

// 火球术: 消耗法术位,目标豁免失败受全额伤害,成功受半数伤害
const FIREBALL: &str = r#"{
    "id": "6f1c2a7e-2b0d-4c1e-9a51-3d6a0f4b8c21",
    "name": "火球术",
    "description": "20尺半径的火焰爆炸",
    "graph": {
        "id": "0b6a4f8e-8d3c-4a52-b7e4-1c9d2e5f6a70",
        "name": "fireball",
        "nodes": [
            { "id": "cast", "kind": "trigger", "subtype": "on_spell_cast" },
            {
                "id": "slot",
                "kind": "action",
                "subtype": "consume_resource",
                "properties": { "resource": "spell_slots", "cost": 1 }
            },
            {
                "id": "save",
                "kind": "condition",
                "subtype": "random_chance",
                "properties": { "chance": 0.5 }
            },
            {
                "id": "full",
                "kind": "action",
                "subtype": "deal_damage",
                "properties": { "damage_dice": "{{damage}}", "damage_type": "fire" }
            },
            {
                "id": "half",
                "kind": "action",
                "subtype": "deal_damage",
                "properties": { "damage_dice": "{{half_damage}}", "damage_type": "fire" }
            }
        ],
        "connections": [
            { "from_node": "cast", "from_port": "flow", "to_node": "slot", "to_port": "flow" },
            { "from_node": "slot", "from_port": "flow", "to_node": "save", "to_port": "flow" },
            { "from_node": "save", "from_port": "true", "to_node": "full", "to_port": "flow" },
            { "from_node": "save", "from_port": "false", "to_node": "half", "to_port": "flow" }
        ],
        "start_node_id": "cast"
    },
    "parameters": [
        { "name": "damage", "display_name": "伤害骰", "param_type": "dice", "default_value": "8d6" },
        { "name": "half_damage", "display_name": "豁免伤害骰", "param_type": "dice", "default_value": "4d6" }
    ],
    "modifiers": [
        {
            "name": "火元素位面",
            "context_type": "plane",
            "context_value": "elemental_fire",
            "priority": 10,
            "modifiers": { "damage_multiplier": 1.5, "additional_effect": "点燃周围的易燃物" }
        },
        {
            "name": "暴雨",
            "context_type": "weather",
            "context_value": "rain",
            "priority": 5,
            "modifiers": { "damage_multiplier": 0.5, "restriction": "无法在水下施放" }
        }
    ]
}"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let engine = RuleEngine::new().await;

    // 1. 登记模板
    let template = engine.load_template(FIREBALL).await?;
    info!(
        "模板 {} 已登记, 证书 {}",
        template.name,
        template.certificate.as_deref().unwrap_or("-")
    );

    // 2. 绑定到角色,提升伤害骰
    let instance = engine
        .attach(
            template.id,
            OwnerRef::new("character", "wizard-01"),
            json!({ "damage": "10d6" }).as_object().cloned().unwrap_or_default(),
        )
        .await?;

    // 3. 在火元素位面的雨中施放
    let context = GameContext::new()
        .with(ContextType::Plane, "Elemental_Fire")
        .with(ContextType::Weather, "rain");
    let state = EntityState::new("wizard-01", 9)
        .with_stat("intelligence", 18.0)
        .with_resource("spell_slots", 3.0);
    let event = TriggerEvent::new("on_spell_cast")
        .with_source("wizard-01")
        .with_target("ogre")
        .with_value("value", PortValue::Number(15.0))
        .with_seed(42);

    let result = engine.execute(instance.id, event, context, state).await?;
    info!("执行成功: {}, 总伤害: {}", result.success, result.total_damage());
    for mutation in &result.mutations {
        info!("状态修改: {}", serde_json::to_string(mutation)?);
    }
    for effect in result.active_modifiers.additional_effects() {
        info!("附加效果: {}", effect);
    }
    for conflict in result.active_modifiers.conflicts() {
        info!("修正冲突: {:?}", conflict);
    }

    // 4. 平衡模拟
    let report = engine
        .run_simulation(
            template.id,
            SimulationSettings::default()
                .with_iterations(500)
                .with_scenarios(&[Scenario::Pve, Scenario::Pvp])
                .with_levels(5, 10)
                .with_seed(7),
        )
        .await?;
    info!("{}", report.overall_assessment);
    for scenario in &report.scenarios {
        info!(
            "{}: 胜率 {:.2}, 平均伤害 {:.1}, 失败 {}",
            scenario.scenario, scenario.win_rate, scenario.average_damage, scenario.failures
        );
    }
    for issue in &report.issues {
        info!("问题: {}", issue);
    }

    Ok(())
}
