use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rule_graph::engine::ModifierResolver;
use rule_graph::types::{ConditionalModifier, ContextType, GameContext, ModifierSet};

fn fire_and_rain() -> Vec<ConditionalModifier> {
    vec![
        ConditionalModifier::new("rain", ContextType::Weather, "rain", 5)
            .with_number("damage_multiplier", 0.5)
            .with_text("additional_effect", "steam clouds the area"),
        ConditionalModifier::new("fire plane", ContextType::Plane, "elemental_fire", 10)
            .with_number("damage_multiplier", 1.5)
            .with_text("additional_effect", "flames leap higher"),
    ]
}

#[test]
fn no_matching_context_leaves_values_raw() {
    let context = GameContext::new().with(ContextType::Weather, "clear");
    let set = ModifierResolver::new().resolve(&context, &fire_and_rain());

    assert!(set.is_empty());
    assert_eq!(set, ModifierSet::new());
    assert_eq!(set.apply("damage_multiplier", 12.0), 12.0);
    assert_eq!(set.apply("accuracy_bonus", 12.0), 12.0);
}

#[test]
fn multipliers_compose_and_texts_follow_priority() {
    let context = GameContext::new()
        .with(ContextType::Weather, "RAIN")
        .with(ContextType::Plane, "Elemental_Fire");
    let set = ModifierResolver::new().resolve(&context, &fire_and_rain());

    assert_eq!(set.sources, vec!["fire plane", "rain"]);
    assert!((set.multiplier("damage_multiplier") - 0.75).abs() < 1e-9);
    assert_eq!(
        set.additional_effects(),
        vec!["flames leap higher", "steam clouds the area"]
    );
}

#[test]
fn restriction_conflicts_are_surfaced() {
    let context = GameContext::new().with(ContextType::Terrain, "underwater");
    let modifiers = vec![
        ConditionalModifier::new("a", ContextType::Terrain, "underwater", 3)
            .with_text("restriction", "cannot be cast"),
        ConditionalModifier::new("b", ContextType::Terrain, "underwater", 2)
            .with_text("restriction", "half range only"),
    ];
    let set = ModifierResolver::new().resolve(&context, &modifiers);
    let conflicts = set.conflicts();

    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].key, "restriction");
    assert_eq!(conflicts[0].entries.len(), 2);
    assert_eq!(conflicts[0].entries[0].source, "a");
}

#[test]
fn number_and_text_on_one_key_stay_textual() {
    let context = GameContext::new().with(ContextType::MoonPhase, "full");
    let numeric = ConditionalModifier::new("lunar surge", ContextType::MoonPhase, "full", 5)
        .with_number("damage_multiplier", 2.0);
    let textual = ConditionalModifier::new("wild moon", ContextType::MoonPhase, "full", 1)
        .with_text("damage_multiplier", "roll on the surge table");

    // 数值先到与文本先到结果一致
    for (numeric_priority, expected_first) in [(5, "lunar surge"), (0, "wild moon")] {
        let mut numeric = numeric.clone();
        numeric.priority = numeric_priority;
        let set = ModifierResolver::new().resolve(&context, &[numeric, textual.clone()]);

        assert!(set.is_mixed("damage_multiplier"));
        assert!(set.multipliers.is_empty());
        assert_eq!(set.apply("damage_multiplier", 10.0), 10.0);
        let texts = set.texts("damage_multiplier");
        assert_eq!(texts.len(), 2);
        assert_eq!(texts[0].source, expected_first);
        assert!(texts.iter().any(|t| t.text == "2"));

        let conflicts = set.conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].key, "damage_multiplier");
    }
}

#[test]
fn identical_restrictions_do_not_conflict() {
    let context = GameContext::new().with(ContextType::Season, "winter");
    let modifiers = vec![
        ConditionalModifier::new("a", ContextType::Season, "winter", 1).with_text("restriction", "no fire"),
        ConditionalModifier::new("b", ContextType::Season, "winter", 1).with_text("restriction", "no fire"),
    ];
    let set = ModifierResolver::new().resolve(&context, &modifiers);
    assert!(set.conflicts().is_empty());
}

#[test]
fn modifiers_deserialize_from_json() {
    let modifier: ConditionalModifier = serde_json::from_str(
        r#"{
            "name": "full moon",
            "context_type": "moon_phase",
            "context_value": "full",
            "priority": 4,
            "modifiers": { "healing_multiplier": 2, "additional_effect": "silver light" }
        }"#,
    )
    .unwrap();
    let context = GameContext::new().with(ContextType::MoonPhase, "full");
    let set = ModifierResolver::new().resolve(&context, &[modifier]);

    assert_eq!(set.apply("healing_multiplier", 3.0), 6.0);
    assert_eq!(set.additional_effects(), vec!["silver light"]);
}

proptest! {
    #[test]
    fn multiplier_order_does_not_matter(a in 0.1f64..4.0, b in 0.1f64..4.0, pa in -20i32..20, pb in -20i32..20) {
        let context = GameContext::new().with(ContextType::Emotion, "angry");
        let forward = vec![
            ConditionalModifier::new("a", ContextType::Emotion, "angry", pa).with_number("damage_multiplier", a),
            ConditionalModifier::new("b", ContextType::Emotion, "angry", pb).with_number("damage_multiplier", b),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();

        let resolver = ModifierResolver::new();
        let x = resolver.resolve(&context, &forward).multiplier("damage_multiplier");
        let y = resolver.resolve(&context, &reversed).multiplier("damage_multiplier");
        prop_assert!((x - y).abs() < 1e-9);
        prop_assert!((x - a * b).abs() < 1e-9);
    }
}
