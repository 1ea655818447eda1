use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 情境类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextType {
    Plane,
    Weather,
    Emotion,
    Terrain,
    Time,
    MoonPhase,
    Season,
    Location,
}

impl ContextType {
    pub const ALL: [ContextType; 8] = [
        ContextType::Plane,
        ContextType::Weather,
        ContextType::Emotion,
        ContextType::Terrain,
        ContextType::Time,
        ContextType::MoonPhase,
        ContextType::Season,
        ContextType::Location,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.to_string().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for ContextType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContextType::Plane => "plane",
            ContextType::Weather => "weather",
            ContextType::Emotion => "emotion",
            ContextType::Terrain => "terrain",
            ContextType::Time => "time",
            ContextType::MoonPhase => "moon_phase",
            ContextType::Season => "season",
            ContextType::Location => "location",
        };
        f.write_str(name)
    }
}

/// 单个修正值: 数值或文本
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModifierDelta {
    Number(f64),
    Text(String),
}

/// 情境修正: 情境匹配时生效的一组数值/文本修正
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalModifier {
    pub name: String,
    pub context_type: ContextType,
    pub context_value: String,
    pub modifiers: BTreeMap<String, ModifierDelta>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub description: String,
}

impl ConditionalModifier {
    pub fn new(name: &str, context_type: ContextType, context_value: &str, priority: i32) -> Self {
        Self {
            name: name.to_string(),
            context_type,
            context_value: context_value.to_string(),
            modifiers: BTreeMap::new(),
            priority,
            description: String::new(),
        }
    }

    pub fn with_number(mut self, key: &str, value: f64) -> Self {
        self.modifiers
            .insert(key.to_string(), ModifierDelta::Number(value));
        self
    }

    pub fn with_text(mut self, key: &str, value: &str) -> Self {
        self.modifiers
            .insert(key.to_string(), ModifierDelta::Text(value.to_string()));
        self
    }
}

/// 乘法类修正键以 _multiplier 结尾
pub fn is_multiplicative(key: &str) -> bool {
    key.ends_with("_multiplier")
}

/// 来自某条修正的文本
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextModifier {
    pub source: String,
    pub text: String,
}

/// 无法自动裁决的文本修正冲突,全部条目原样交给调用方
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifierConflict {
    pub key: String,
    pub entries: Vec<TextModifier>,
}

/// 修正累加器
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModifierSet {
    pub multipliers: BTreeMap<String, f64>,
    pub bonuses: BTreeMap<String, f64>,
    pub texts: BTreeMap<String, Vec<TextModifier>>,
    /// 已应用的修正名,按应用顺序
    pub sources: Vec<String>,
    /// 各键收到的数值修正,键转为文本时按原顺序并入 texts
    #[serde(skip)]
    numeric_entries: BTreeMap<String, Vec<TextModifier>>,
}

impl ModifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// 把一条修正并入累加器
    ///
    /// 同一个键一旦出现文本修正就整体按文本处理,之前和之后的数值都以文本形式保留。
    pub fn fold(&mut self, modifier: &ConditionalModifier) {
        for (key, delta) in &modifier.modifiers {
            match delta {
                ModifierDelta::Number(v) => {
                    let entry = TextModifier {
                        source: modifier.name.clone(),
                        text: v.to_string(),
                    };
                    self.numeric_entries
                        .entry(key.clone())
                        .or_default()
                        .push(entry.clone());
                    if self.texts.contains_key(key) {
                        self.texts.entry(key.clone()).or_default().push(entry);
                    } else if is_multiplicative(key) {
                        *self.multipliers.entry(key.clone()).or_insert(1.0) *= v;
                    } else {
                        *self.bonuses.entry(key.clone()).or_insert(0.0) += v;
                    }
                }
                ModifierDelta::Text(text) => {
                    let entries = self.texts.entry(key.clone()).or_default();
                    if entries.is_empty() {
                        // 先前的数值改为文本
                        if let Some(numbers) = self.numeric_entries.get(key) {
                            entries.extend(numbers.iter().cloned());
                        }
                        self.multipliers.remove(key);
                        self.bonuses.remove(key);
                    }
                    entries.push(TextModifier {
                        source: modifier.name.clone(),
                        text: text.clone(),
                    });
                }
            }
        }
        self.sources.push(modifier.name.clone());
    }

    /// 同时收到数值与文本修正、因而按文本处理的键
    pub fn is_mixed(&self, key: &str) -> bool {
        self.texts.contains_key(key) && self.numeric_entries.contains_key(key)
    }

    pub fn multiplier(&self, key: &str) -> f64 {
        self.multipliers.get(key).copied().unwrap_or(1.0)
    }

    pub fn bonus(&self, key: &str) -> f64 {
        self.bonuses.get(key).copied().unwrap_or(0.0)
    }

    /// 对原始数值套用某个修正键
    pub fn apply(&self, key: &str, value: f64) -> f64 {
        if is_multiplicative(key) {
            value * self.multiplier(key)
        } else {
            value + self.bonus(key)
        }
    }

    pub fn texts(&self, key: &str) -> &[TextModifier] {
        self.texts.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn additional_effects(&self) -> Vec<&str> {
        self.texts("additional_effect")
            .iter()
            .map(|t| t.text.as_str())
            .collect()
    }

    /// 相互矛盾的限制文本,以及同一个键上数值与文本混用的情况
    pub fn conflicts(&self) -> Vec<ModifierConflict> {
        let mut conflicts = Vec::new();
        let restrictions = self.texts("restriction");
        let distinct = restrictions
            .iter()
            .filter(|r| r.text != restrictions[0].text)
            .count();
        if distinct > 0 {
            conflicts.push(ModifierConflict {
                key: "restriction".to_string(),
                entries: restrictions.to_vec(),
            });
        }
        for (key, entries) in &self.texts {
            if self.is_mixed(key) {
                conflicts.push(ModifierConflict {
                    key: key.clone(),
                    entries: entries.clone(),
                });
            }
        }
        conflicts
    }
}
