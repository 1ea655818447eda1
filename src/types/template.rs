use super::{ConditionalModifier, RuleGraph};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// 模板参数类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    Number,
    Integer,
    Boolean,
    Text,
    /// 骰子表达式,如 2d6+3
    Dice,
    /// 从 options 中选择
    Choice,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterConstraints {
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub options: Vec<String>,
}

/// 模板可调参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub display_name: String,
    pub param_type: ParameterType,
    #[serde(default)]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub constraints: ParameterConstraints,
}

impl Parameter {
    pub fn new(name: &str, param_type: ParameterType) -> Self {
        Self {
            name: name.to_string(),
            display_name: name.to_string(),
            param_type,
            default_value: None,
            constraints: ParameterConstraints::default(),
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.constraints.required = true;
        self
    }

    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.constraints.min = min;
        self.constraints.max = max;
        self
    }

    pub fn with_options(mut self, options: &[&str]) -> Self {
        self.constraints.options = options.iter().map(|o| o.to_string()).collect();
        self
    }

    /// 把类型与约束翻译为 JSON Schema,供参数校验使用
    pub fn json_schema(&self) -> Value {
        let mut schema = match self.param_type {
            ParameterType::Number => json!({ "type": "number" }),
            ParameterType::Integer => json!({ "type": "integer" }),
            ParameterType::Boolean => json!({ "type": "boolean" }),
            ParameterType::Text => json!({ "type": "string" }),
            ParameterType::Dice => json!({
                "type": "string",
                "pattern": r"^\d+d\d+([+-]\d+)?$"
            }),
            ParameterType::Choice => json!({ "type": "string" }),
        };
        if let Some(obj) = schema.as_object_mut() {
            if let Some(min) = self.constraints.min {
                obj.insert("minimum".into(), json!(min));
            }
            if let Some(max) = self.constraints.max {
                obj.insert("maximum".into(), json!(max));
            }
            if !self.constraints.options.is_empty() {
                obj.insert("enum".into(), json!(self.constraints.options));
            }
        }
        schema
    }
}

/// 规则模板: 规则图加上参数与情境修正
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTemplate {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub graph: RuleGraph,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub modifiers: Vec<ConditionalModifier>,
    /// 校验通过时记录的图指纹
    #[serde(default)]
    pub certificate: Option<String>,
}

impl RuleTemplate {
    pub fn new(name: &str, graph: RuleGraph) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: String::new(),
            graph,
            parameters: Vec::new(),
            modifiers: Vec::new(),
            certificate: None,
        }
    }

    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_modifier(mut self, modifier: ConditionalModifier) -> Self {
        self.modifiers.push(modifier);
        self
    }
}
