use crate::engine::{is_parameter_reference, CertifiedGraph, NodeCatalog, Severity};
use crate::types::{Node, NodeId, NodeKind, PortValues, RuleError, RuleGraph};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// 复杂度超过该值给出性能警告
pub const DEFAULT_COMPLEXITY_THRESHOLD: u32 = 50;
/// 每个节点的基础复杂度
pub const NODE_WEIGHT: u32 = 2;
pub const CONNECTION_WEIGHT: u32 = 1;
pub const FLOW_NODE_WEIGHT: u32 = 3;
pub const ROLL_NODE_WEIGHT: u32 = 2;
pub const CALCULATION_NODE_WEIGHT: u32 = 1;

/// 校验问题编码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    MissingStartNode,
    StartNodeNotTrigger,
    NoTrigger,
    NoAction,
    DuplicateNodeId,
    Unreachable,
    CycleDetected,
    UnknownNodeType,
    InvalidProperty,
    UnusualProperty,
    ParameterDependent,
    DanglingConnection,
    UnknownPort,
    PortTypeMismatch,
    UnresolvedInput,
    UnreachableSource,
    HighComplexity,
    Summary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: IssueCode,
    pub node_id: Option<NodeId>,
    pub message: String,
}

impl ValidationIssue {
    fn new(code: IssueCode, node_id: Option<&NodeId>, message: impl Into<String>) -> Self {
        Self {
            code,
            node_id: node_id.cloned(),
            message: message.into(),
        }
    }
}

/// 校验结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub info: Vec<ValidationIssue>,
    pub complexity_score: u32,
}

impl ValidationResult {
    pub fn has_error(&self, code: IssueCode) -> bool {
        self.errors.iter().any(|i| i.code == code)
    }

    pub fn has_warning(&self, code: IssueCode) -> bool {
        self.warnings.iter().any(|i| i.code == code)
    }

    /// 把所有错误合并为一行描述
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|i| match &i.node_id {
                Some(id) => format!("[{}] {}", id, i.message),
                None => i.message.clone(),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn error(&mut self, code: IssueCode, node_id: Option<&NodeId>, message: impl Into<String>) {
        self.errors.push(ValidationIssue::new(code, node_id, message));
    }

    fn warning(&mut self, code: IssueCode, node_id: Option<&NodeId>, message: impl Into<String>) {
        self.warnings.push(ValidationIssue::new(code, node_id, message));
    }
}

/// 规则图校验器: 纯函数,不修改输入
#[derive(Debug, Clone, Copy)]
pub struct GraphValidator<'c> {
    catalog: &'c NodeCatalog,
    complexity_threshold: u32,
}

impl<'c> GraphValidator<'c> {
    pub fn new(catalog: &'c NodeCatalog) -> Self {
        Self {
            catalog,
            complexity_threshold: DEFAULT_COMPLEXITY_THRESHOLD,
        }
    }

    pub fn with_complexity_threshold(mut self, threshold: u32) -> Self {
        self.complexity_threshold = threshold;
        self
    }

    /// 使用图变量校验
    pub fn validate(&self, graph: &RuleGraph) -> ValidationResult {
        self.validate_with(graph, &graph.variables)
    }

    /// 使用给定变量(图变量加实例参数)校验,参数引用据此解析
    pub fn validate_with(&self, graph: &RuleGraph, variables: &PortValues) -> ValidationResult {
        let mut result = ValidationResult::default();
        let index = self.check_node_ids(graph, &mut result);

        self.check_start_node(graph, &mut result);
        self.check_kinds(graph, &mut result);
        let reachable = self.check_reachability(graph, &index, &mut result);
        self.check_cycles(graph, &index, &mut result);
        let rolls = self.check_properties(graph, variables, &mut result);
        self.check_connections(graph, &index, &reachable, &mut result);
        self.check_complexity(graph, &rolls, &mut result);

        result.info.push(ValidationIssue::new(
            IssueCode::Summary,
            None,
            format!(
                "{} 个节点, {} 条连接, 复杂度 {}",
                graph.nodes.len(),
                graph.connections.len(),
                result.complexity_score
            ),
        ));
        result.valid = result.errors.is_empty();
        debug!(
            "规则图 {} 校验完成: {} 个错误, {} 个警告",
            graph.name,
            result.errors.len(),
            result.warnings.len()
        );
        result
    }

    /// 校验通过才签发可执行的规则图,任何错误都拒绝
    pub fn certify(
        &self,
        graph: Arc<RuleGraph>,
        variables: &PortValues,
    ) -> Result<CertifiedGraph, RuleError> {
        let validation = self.validate_with(&graph, variables);
        if !validation.valid {
            return Err(RuleError::GraphInvalid(format!(
                "规则图 {} 校验失败: {}",
                graph.name,
                validation.error_summary()
            )));
        }
        Ok(CertifiedGraph::new(graph, validation))
    }

    /// 节点ID必须唯一; 返回ID到下标的映射(重复ID保留第一个)
    fn check_node_ids<'g>(
        &self,
        graph: &'g RuleGraph,
        result: &mut ValidationResult,
    ) -> BTreeMap<&'g NodeId, usize> {
        let mut index = BTreeMap::new();
        for (i, node) in graph.nodes.iter().enumerate() {
            if index.contains_key(&node.id) {
                result.error(IssueCode::DuplicateNodeId, Some(&node.id), "节点ID重复");
            } else {
                index.insert(&node.id, i);
            }
        }
        index
    }

    fn check_start_node(&self, graph: &RuleGraph, result: &mut ValidationResult) {
        match &graph.start_node_id {
            None => result.error(IssueCode::MissingStartNode, None, "未声明起始节点"),
            Some(id) => match graph.get_node(id) {
                None => result.error(
                    IssueCode::MissingStartNode,
                    Some(id),
                    format!("起始节点 {} 不存在", id),
                ),
                Some(node) if node.kind != NodeKind::Trigger => result.error(
                    IssueCode::StartNodeNotTrigger,
                    Some(id),
                    format!("起始节点必须是触发节点, 实际为 {}", node.kind),
                ),
                Some(_) => {}
            },
        }
    }

    fn check_kinds(&self, graph: &RuleGraph, result: &mut ValidationResult) {
        if !graph.nodes.iter().any(|n| n.kind == NodeKind::Trigger) {
            result.error(IssueCode::NoTrigger, None, "规则图中没有触发节点");
        }
        if !graph.nodes.iter().any(|n| n.kind == NodeKind::Action) {
            result.warning(IssueCode::NoAction, None, "规则图中没有动作节点,执行不会产生效果");
        }
    }

    /// 从起始节点沿连接正向可达的节点
    fn check_reachability(
        &self,
        graph: &RuleGraph,
        index: &BTreeMap<&NodeId, usize>,
        result: &mut ValidationResult,
    ) -> BTreeSet<usize> {
        let mut reachable = BTreeSet::new();
        let Some(start) = graph.start_node_id.as_ref().and_then(|id| index.get(id)) else {
            return reachable;
        };
        let mut queue = VecDeque::from([*start]);
        reachable.insert(*start);
        while let Some(current) = queue.pop_front() {
            for conn in graph.outgoing(&graph.nodes[current].id) {
                if let Some(&next) = index.get(&conn.to_node) {
                    if reachable.insert(next) {
                        queue.push_back(next);
                    }
                }
            }
        }
        for (i, node) in graph.nodes.iter().enumerate() {
            if !reachable.contains(&i) && index.get(&node.id) == Some(&i) {
                result.warning(
                    IssueCode::Unreachable,
                    Some(&node.id),
                    "节点无法从起始节点到达,不会被执行",
                );
            }
        }
        reachable
    }

    /// 迭代式深度优先搜索,显式维护递归栈; 指向栈内节点的边即为环
    fn check_cycles(
        &self,
        graph: &RuleGraph,
        index: &BTreeMap<&NodeId, usize>,
        result: &mut ValidationResult,
    ) {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        let n = graph.nodes.len();
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
        for conn in &graph.connections {
            if let (Some(&from), Some(&to)) = (index.get(&conn.from_node), index.get(&conn.to_node)) {
                successors[from].push(to);
            }
        }

        let mut marks = vec![Mark::Unvisited; n];
        let mut reported: BTreeSet<Vec<usize>> = BTreeSet::new();
        for root in 0..n {
            if marks[root] != Mark::Unvisited {
                continue;
            }
            // (节点, 下一条待检查的出边)
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
            marks[root] = Mark::OnStack;
            while let Some(frame) = stack.last_mut() {
                let (node, edge) = *frame;
                if edge >= successors[node].len() {
                    marks[node] = Mark::Done;
                    stack.pop();
                    continue;
                }
                frame.1 += 1;
                let next = successors[node][edge];
                match marks[next] {
                    Mark::Unvisited => {
                        marks[next] = Mark::OnStack;
                        stack.push((next, 0));
                    }
                    Mark::OnStack => {
                        let start = stack.iter().position(|(id, _)| *id == next).unwrap_or(0);
                        let cycle: Vec<usize> = stack[start..].iter().map(|(id, _)| *id).collect();
                        let mut key = cycle.clone();
                        key.sort_unstable();
                        if reported.insert(key) {
                            let path = cycle
                                .iter()
                                .chain(std::iter::once(&next))
                                .map(|&i| graph.nodes[i].id.to_string())
                                .collect::<Vec<_>>()
                                .join(" -> ");
                            result.error(
                                IssueCode::CycleDetected,
                                Some(&graph.nodes[next].id),
                                format!("节点循环依赖: {}", path),
                            );
                        }
                    }
                    Mark::Done => {}
                }
            }
        }
    }

    /// 按节点类型检查属性; 返回包含掷骰的节点下标
    fn check_properties(
        &self,
        graph: &RuleGraph,
        variables: &PortValues,
        result: &mut ValidationResult,
    ) -> BTreeSet<usize> {
        let mut rolls = BTreeSet::new();
        for (i, node) in graph.nodes.iter().enumerate() {
            if let Err(e) = self.catalog.lookup(node.kind, &node.subtype) {
                result.error(IssueCode::UnknownNodeType, Some(&node.id), e.to_string());
                continue;
            }
            match self.catalog.create_handler(node, variables) {
                Ok(handler) => {
                    if handler.rolls_dice() {
                        rolls.insert(i);
                    }
                    for issue in handler.check() {
                        match issue.severity {
                            Severity::Error => {
                                result.error(IssueCode::InvalidProperty, Some(&node.id), issue.message)
                            }
                            Severity::Warning => {
                                result.warning(IssueCode::UnusualProperty, Some(&node.id), issue.message)
                            }
                        }
                    }
                }
                Err(e) if has_unresolved_reference(node, variables) => {
                    // 取值依赖实例参数,绑定时再检查
                    result.warning(
                        IssueCode::ParameterDependent,
                        Some(&node.id),
                        format!("属性引用了未提供的参数,绑定实例时重新检查: {}", e),
                    );
                    if matches!(node.subtype.as_str(), "deal_damage" | "heal" | "dice_roll") {
                        rolls.insert(i);
                    }
                }
                Err(e) => result.error(IssueCode::InvalidProperty, Some(&node.id), e.to_string()),
            }
        }
        rolls
    }

    /// 连接端点存在、端口存在、类型兼容; 可达节点的必需输入必须有来源
    fn check_connections(
        &self,
        graph: &RuleGraph,
        index: &BTreeMap<&NodeId, usize>,
        reachable: &BTreeSet<usize>,
        result: &mut ValidationResult,
    ) {
        for conn in &graph.connections {
            let (from_index, to_index) = match (index.get(&conn.from_node), index.get(&conn.to_node)) {
                (Some(&f), Some(&t)) => (f, t),
                (None, _) => {
                    result.error(
                        IssueCode::DanglingConnection,
                        Some(&conn.from_node),
                        format!("连接的源节点 {} 不存在", conn.from_node),
                    );
                    continue;
                }
                (_, None) => {
                    result.error(
                        IssueCode::DanglingConnection,
                        Some(&conn.to_node),
                        format!("连接的目标节点 {} 不存在", conn.to_node),
                    );
                    continue;
                }
            };
            let (from, to) = (&graph.nodes[from_index], &graph.nodes[to_index]);
            let Some(out_port) = from.output(&conn.from_port) else {
                result.error(
                    IssueCode::UnknownPort,
                    Some(&from.id),
                    format!("节点没有输出端口 {}", conn.from_port),
                );
                continue;
            };
            let Some(in_port) = to.input(&conn.to_port) else {
                result.error(
                    IssueCode::UnknownPort,
                    Some(&to.id),
                    format!("节点没有输入端口 {}", conn.to_port),
                );
                continue;
            };
            if !out_port.port_type.is_compatible(in_port.port_type) {
                result.error(
                    IssueCode::PortTypeMismatch,
                    Some(&to.id),
                    format!(
                        "端口类型不兼容: {}.{} ({}) -> {}.{} ({})",
                        from.id,
                        out_port.name,
                        out_port.port_type,
                        to.id,
                        in_port.name,
                        in_port.port_type
                    ),
                );
            }
            // 源节点永远不会执行,下游会一直等待这条边
            if reachable.contains(&to_index) && !reachable.contains(&from_index) {
                result.error(
                    IssueCode::UnreachableSource,
                    Some(&to.id),
                    format!(
                        "输入 {} 来自无法到达的节点 {},该节点永远不会执行",
                        in_port.name, from.id
                    ),
                );
            }
        }

        for &i in reachable {
            let node = &graph.nodes[i];
            for port in node.inputs.iter().filter(|p| p.required && p.default.is_none()) {
                let connected = graph
                    .incoming(&node.id)
                    .any(|c| c.to_port == port.name);
                if !connected {
                    result.error(
                        IssueCode::UnresolvedInput,
                        Some(&node.id),
                        format!("必需输入端口 {} 未连接且没有默认值", port.name),
                    );
                }
            }
        }
    }

    fn check_complexity(
        &self,
        graph: &RuleGraph,
        rolls: &BTreeSet<usize>,
        result: &mut ValidationResult,
    ) {
        let extra: u32 = graph
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| match node.kind {
                NodeKind::Flow => FLOW_NODE_WEIGHT,
                _ if rolls.contains(&i) => ROLL_NODE_WEIGHT,
                NodeKind::Calculation => CALCULATION_NODE_WEIGHT,
                _ => 0,
            })
            .sum();
        let score = NODE_WEIGHT * graph.nodes.len() as u32
            + CONNECTION_WEIGHT * graph.connections.len() as u32
            + extra;
        result.complexity_score = score;
        if score > self.complexity_threshold {
            result.warning(
                IssueCode::HighComplexity,
                None,
                format!(
                    "复杂度 {} 超过阈值 {},可能影响执行性能",
                    score, self.complexity_threshold
                ),
            );
        }
    }
}

/// 节点属性中是否还有未被变量解析的 `{{name}}` 引用
fn has_unresolved_reference(node: &Node, variables: &PortValues) -> bool {
    fn visit(value: &Value, variables: &PortValues) -> bool {
        match value {
            Value::String(s) if is_parameter_reference(s) => {
                let name = s.trim_start_matches("{{").trim_end_matches("}}").trim();
                !variables.contains_key(name)
            }
            Value::Array(items) => items.iter().any(|v| visit(v, variables)),
            Value::Object(map) => map.values().any(|v| visit(v, variables)),
            _ => false,
        }
    }
    node.properties.values().any(|v| visit(v, variables))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Node, NodeKind};

    fn catalog() -> NodeCatalog {
        NodeCatalog::with_builtins()
    }

    fn node(catalog: &NodeCatalog, kind: NodeKind, subtype: &str, id: &str) -> Node {
        catalog.instantiate(kind, subtype, id).unwrap()
    }

    #[test]
    fn reports_cycle_path() {
        let catalog = catalog();
        let mut graph = RuleGraph::new("loop");
        graph
            .add_node(node(&catalog, NodeKind::Trigger, "on_hit", "t"))
            .add_node(node(&catalog, NodeKind::Action, "deal_damage", "a"))
            .add_node(node(&catalog, NodeKind::Action, "heal", "b"))
            .connect("t", "flow", "a", "flow")
            .connect("a", "flow", "b", "flow")
            .connect("b", "flow", "a", "flow");

        let result = GraphValidator::new(&catalog).validate(&graph);
        assert!(!result.valid);
        let cycle = result
            .errors
            .iter()
            .find(|i| i.code == IssueCode::CycleDetected)
            .unwrap();
        assert!(cycle.message.contains("a -> b -> a"));
    }

    #[test]
    fn parameter_reference_is_deferred() {
        let catalog = catalog();
        let mut graph = RuleGraph::new("param");
        graph
            .add_node(node(&catalog, NodeKind::Trigger, "on_hit", "t"))
            .add_node(
                node(&catalog, NodeKind::Action, "deal_damage", "a")
                    .with_property("damage_dice", "{{damage}}"),
            )
            .connect("t", "flow", "a", "flow");

        let result = GraphValidator::new(&catalog).validate(&graph);
        assert!(result.valid);
        assert!(result.has_warning(IssueCode::ParameterDependent));

        let mut vars = PortValues::new();
        vars.insert("damage".into(), crate::types::PortValue::Text("banana".into()));
        let bound = GraphValidator::new(&catalog).validate_with(&graph, &vars);
        assert!(bound.has_error(IssueCode::InvalidProperty));
    }

    #[test]
    fn complexity_weights() {
        let catalog = catalog();
        let mut graph = RuleGraph::new("weights");
        graph
            .add_node(node(&catalog, NodeKind::Trigger, "on_hit", "t"))
            .add_node(node(&catalog, NodeKind::Flow, "split", "s"))
            .add_node(node(&catalog, NodeKind::Calculation, "dice_roll", "r"))
            .add_node(node(&catalog, NodeKind::Calculation, "constant", "c"))
            .connect("t", "flow", "s", "flow")
            .connect("s", "branch_1", "r", "flow")
            .connect("s", "branch_2", "c", "flow");

        let result = GraphValidator::new(&catalog).validate(&graph);
        // 4 节点 * 2 + 3 连接 + 分叉 3 + 掷骰 2 + 计算 1
        assert_eq!(result.complexity_score, 8 + 3 + 3 + 2 + 1);
    }
}
