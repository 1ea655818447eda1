use crate::types::{ConditionalModifier, GameContext, ModifierSet};
use tracing::debug;

/// 情境修正解析器
#[derive(Debug, Clone, Copy, Default)]
pub struct ModifierResolver;

impl ModifierResolver {
    pub fn new() -> Self {
        Self
    }

    /// 筛选与当前情境匹配的修正,按优先级从高到低排列; 同优先级保持声明顺序
    pub fn applicable<'m>(
        &self,
        context: &GameContext,
        modifiers: &'m [ConditionalModifier],
    ) -> Vec<&'m ConditionalModifier> {
        let mut matched: Vec<&ConditionalModifier> = modifiers
            .iter()
            .filter(|m| context.matches(m.context_type, &m.context_value))
            .collect();
        // sort_by 是稳定排序
        matched.sort_by(|a, b| b.priority.cmp(&a.priority));
        matched
    }

    /// 计算当前情境下生效的修正集合
    pub fn resolve(&self, context: &GameContext, modifiers: &[ConditionalModifier]) -> ModifierSet {
        let mut set = ModifierSet::new();
        for modifier in self.applicable(context, modifiers) {
            debug!(
                "套用情境修正 {} ({}={}, 优先级 {})",
                modifier.name, modifier.context_type, modifier.context_value, modifier.priority
            );
            set.fold(modifier);
        }
        let conflicts = set.conflicts();
        if !conflicts.is_empty() {
            debug!("情境修正存在 {} 处文本冲突,交由调用方裁决", conflicts.len());
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContextType;

    #[test]
    fn ties_keep_declaration_order() {
        let ctx = GameContext::new().with(ContextType::Weather, "Storm");
        let mods = vec![
            ConditionalModifier::new("first", ContextType::Weather, "storm", 1)
                .with_text("additional_effect", "a"),
            ConditionalModifier::new("second", ContextType::Weather, "storm", 1)
                .with_text("additional_effect", "b"),
            ConditionalModifier::new("top", ContextType::Weather, "storm", 9)
                .with_text("additional_effect", "c"),
            ConditionalModifier::new("other", ContextType::Plane, "storm", 50)
                .with_text("additional_effect", "x"),
        ];
        let set = ModifierResolver::new().resolve(&ctx, &mods);
        assert_eq!(set.additional_effects(), vec!["c", "a", "b"]);
        assert_eq!(set.sources, vec!["top", "first", "second"]);
    }

    #[test]
    fn additive_and_multiplicative_keys() {
        let ctx = GameContext::new().with(ContextType::MoonPhase, "full");
        let mods = vec![
            ConditionalModifier::new("a", ContextType::MoonPhase, "full", 2)
                .with_number("accuracy_bonus", 2.0)
                .with_number("range_multiplier", 2.0),
            ConditionalModifier::new("b", ContextType::MoonPhase, "full", 1)
                .with_number("accuracy_bonus", -1.0)
                .with_number("range_multiplier", 1.5),
        ];
        let set = ModifierResolver::new().resolve(&ctx, &mods);
        assert_eq!(set.bonus("accuracy_bonus"), 1.0);
        assert_eq!(set.multiplier("range_multiplier"), 3.0);
        assert_eq!(set.apply("accuracy_bonus", 10.0), 11.0);
        assert_eq!(set.apply("range_multiplier", 10.0), 30.0);
    }
}
