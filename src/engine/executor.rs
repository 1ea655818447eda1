use crate::aop::InterceptorManager;
use crate::engine::{CertifiedGraph, NodeCatalog, NodeHandler};
use crate::metrics;
use crate::types::{
    Connection, EntityState, ExecutionResult, GameContext, ModifierSet, Mutation, Node,
    NodeContext, NodeKind, PortType, PortValue, PortValues, RuleError, TraceEntry, TriggerEvent,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

/// 连接在一次执行中的状态
#[derive(Debug, Clone)]
enum EdgeState {
    /// 源节点在该端口产生了值
    Live(PortValue),
    /// 源节点被跳过,或没有走这条控制流分支
    Dead,
    /// 源节点执行了但没有产生该数据端口
    Empty,
}

/// 单次执行的输入
pub struct Pass<'p> {
    pub event: &'p TriggerEvent,
    pub context: &'p GameContext,
    pub state: &'p EntityState,
    /// 图变量与实例参数
    pub variables: &'p PortValues,
    pub modifiers: ModifierSet,
}

/// 规则图执行器
///
/// 按数据流就绪顺序执行节点: 节点的全部入边都有结果后才决定执行或跳过,
/// 就绪节点按源节点输出端口的声明顺序深度优先执行,结果完全由输入与随机种子决定。
pub struct Executor<'e> {
    catalog: &'e NodeCatalog,
    interceptors: &'e InterceptorManager,
}

struct Failure {
    error: RuleError,
    entry: TraceEntry,
}

impl<'e> Executor<'e> {
    pub fn new(catalog: &'e NodeCatalog, interceptors: &'e InterceptorManager) -> Self {
        Self {
            catalog,
            interceptors,
        }
    }

    pub async fn execute(
        &self,
        graph: &CertifiedGraph,
        pass: Pass<'_>,
    ) -> Result<ExecutionResult, RuleError> {
        let started = Instant::now();
        let graph = graph.graph();
        let start = graph
            .get_start_node()
            .ok_or_else(|| RuleError::GraphInvalid(format!("规则图 {} 没有起始节点", graph.id)))?;

        if start.subtype != pass.event.event_type {
            debug!(
                "事件 {} 与触发节点 {} 不匹配,跳过规则图 {}",
                pass.event.event_type, start.subtype, graph.name
            );
            return Ok(ExecutionResult::not_fired(pass.modifiers));
        }

        self.interceptors.before_pass(pass.event).await?;

        let index = graph.index();
        let n = graph.nodes.len();
        let mut inbound: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut outbound: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (ci, conn) in graph.connections.iter().enumerate() {
            if let (Some(&from), Some(&to)) = (index.get(&conn.from_node), index.get(&conn.to_node)) {
                outbound[from].push(ci);
                inbound[to].push(ci);
            }
        }

        let mut edges: Vec<Option<EdgeState>> = vec![None; graph.connections.len()];
        let mut queued = vec![false; n];
        let mut rng = ChaCha8Rng::seed_from_u64(pass.event.seed);
        let mut trace = Vec::new();
        let mut output_values = PortValues::new();
        let mut mutations: Vec<Mutation> = Vec::new();

        let start_idx = index[&start.id];
        let mut stack = vec![start_idx];
        queued[start_idx] = true;

        while let Some(i) = stack.pop() {
            let node = &graph.nodes[i];
            let run = i == start_idx || should_run(node, &inbound[i], &edges);

            let produced = if run {
                match self
                    .run_node(node, graph_inputs(node, &inbound[i], &graph.connections, &edges), &pass, &mut rng)
                    .await
                {
                    Ok((entry, outputs, node_mutations)) => {
                        for (port, value) in &outputs {
                            if value.port_type() != PortType::Flow {
                                output_values.insert(format!("{}.{}", node.id, port), value.clone());
                            }
                        }
                        mutations.extend(node_mutations);
                        trace.push(entry);
                        Some(outputs)
                    }
                    Err(failure) => {
                        trace.push(failure.entry);
                        metrics::record_pass("failure");
                        let result = ExecutionResult {
                            success: false,
                            fired: true,
                            trace,
                            active_modifiers: pass.modifiers,
                            error: Some(failure.error),
                            duration_us: started.elapsed().as_micros() as u64,
                            ..ExecutionResult::default()
                        };
                        self.interceptors.after_pass(pass.event, &result).await?;
                        return Ok(result);
                    }
                }
            } else {
                debug!("跳过节点 [{}]", node.id);
                None
            };

            for &ci in &outbound[i] {
                let conn = &graph.connections[ci];
                edges[ci] = Some(match &produced {
                    None => EdgeState::Dead,
                    Some(outputs) => match outputs.get(&conn.from_port) {
                        Some(value) => EdgeState::Live(value.clone()),
                        None if is_flow_port(node, &conn.from_port) => EdgeState::Dead,
                        None => EdgeState::Empty,
                    },
                });
            }

            // 后继按源端口的声明顺序就绪,同一端口按连接顺序; 逆序压栈以便先声明的先执行
            let mut ready: Vec<(usize, usize)> = Vec::new();
            for &ci in &outbound[i] {
                let conn = &graph.connections[ci];
                let Some(&next) = index.get(&conn.to_node) else {
                    continue;
                };
                if !queued[next] && inbound[next].iter().all(|&e| edges[e].is_some()) {
                    queued[next] = true;
                    ready.push((port_rank(node, &conn.from_port), next));
                }
            }
            ready.sort_by_key(|&(rank, _)| rank);
            stack.extend(ready.into_iter().rev().map(|(_, next)| next));
        }

        metrics::record_pass("success");
        let result = ExecutionResult {
            success: true,
            fired: true,
            output_values,
            mutations,
            trace,
            active_modifiers: pass.modifiers,
            error: None,
            duration_us: started.elapsed().as_micros() as u64,
        };
        self.interceptors.after_pass(pass.event, &result).await?;
        Ok(result)
    }

    async fn run_node(
        &self,
        node: &Node,
        inputs: Result<PortValues, RuleError>,
        pass: &Pass<'_>,
        rng: &mut ChaCha8Rng,
    ) -> Result<(TraceEntry, PortValues, Vec<Mutation>), Failure> {
        let started = Instant::now();
        let fail = |error: RuleError, inputs: PortValues, started: Instant| {
            metrics::record_node_failure(&node.subtype);
            Failure {
                entry: TraceEntry {
                    node_id: node.id.clone(),
                    kind: node.kind,
                    subtype: node.subtype.clone(),
                    inputs,
                    outputs: PortValues::new(),
                    success: false,
                    error: Some(error.to_string()),
                    duration_us: started.elapsed().as_micros() as u64,
                },
                error,
            }
        };

        let inputs = match inputs {
            Ok(inputs) => inputs,
            Err(e) => return Err(fail(e, PortValues::new(), started)),
        };
        let handler: Arc<dyn NodeHandler> = match self.catalog.create_handler(node, pass.variables) {
            Ok(handler) => handler,
            Err(e) => {
                if matches!(e, RuleError::NodeTypeNotFound { .. }) {
                    error!("节点目录缺少已校验图使用的节点类型 {}/{}", node.kind, node.subtype);
                }
                return Err(fail(e, inputs, started));
            }
        };

        let mut ctx = NodeContext {
            node,
            event: pass.event,
            context: pass.context,
            state: pass.state,
            variables: pass.variables,
            rng,
        };

        if let Err(e) = self.interceptors.before_node(&ctx, &inputs).await {
            return Err(fail(e, inputs, started));
        }

        let mut outputs = match handler.handle(&mut ctx, &inputs).await {
            Ok(outputs) => outputs,
            Err(e) => {
                self.interceptors.node_error(&ctx, &e).await;
                return Err(fail(e, inputs, started));
            }
        };

        if matches!(node.kind, NodeKind::Action | NodeKind::Calculation) {
            apply_modifiers(node, &mut outputs, &pass.modifiers);
        }

        if let Err(e) = self.interceptors.after_node(&ctx, &outputs).await {
            return Err(fail(e, inputs, started));
        }

        let node_mutations = handler.mutations(&ctx, &inputs, &outputs);
        let entry = TraceEntry {
            node_id: node.id.clone(),
            kind: node.kind,
            subtype: node.subtype.clone(),
            inputs,
            outputs: outputs.clone(),
            success: true,
            error: None,
            duration_us: started.elapsed().as_micros() as u64,
        };
        Ok((entry, outputs, node_mutations))
    }
}

/// 非汇聚节点: 没有失效入边且至少一条有值; 汇聚节点: 至少一条有值
fn should_run(node: &Node, inbound: &[usize], edges: &[Option<EdgeState>]) -> bool {
    let states = inbound.iter().filter_map(|&ci| edges[ci].as_ref());
    let mut live = false;
    let mut dead = false;
    for state in states {
        match state {
            EdgeState::Live(_) => live = true,
            EdgeState::Dead => dead = true,
            EdgeState::Empty => {}
        }
    }
    if node.is_merge() {
        live
    } else {
        live && !dead
    }
}

/// 输出端口在节点声明中的位置,未声明的排在最后
fn port_rank(node: &Node, port: &str) -> usize {
    node.outputs
        .iter()
        .position(|p| p.name == port)
        .unwrap_or(usize::MAX)
}

fn is_flow_port(node: &Node, port: &str) -> bool {
    node.output(port)
        .map(|p| p.port_type == PortType::Flow)
        .unwrap_or(false)
}

/// 解析输入: 连接的值,其次端口默认值,必需端口缺失时报错
fn graph_inputs(
    node: &Node,
    inbound: &[usize],
    connections: &[Connection],
    edges: &[Option<EdgeState>],
) -> Result<PortValues, RuleError> {
    let mut connected: BTreeMap<&str, &PortValue> = BTreeMap::new();
    for &ci in inbound {
        if let Some(EdgeState::Live(value)) = &edges[ci] {
            connected
                .entry(connections[ci].to_port.as_str())
                .or_insert(value);
        }
    }

    let mut inputs = PortValues::new();
    for port in &node.inputs {
        let value = match connected.get(port.name.as_str()) {
            Some(value) => {
                if !port.port_type.accepts(value) {
                    return Err(RuleError::TypeMismatch {
                        node_id: node.id.clone(),
                        port: port.name.clone(),
                        expected: port.port_type.to_string(),
                        actual: value.port_type().to_string(),
                    });
                }
                Some((*value).clone())
            }
            None => port.default.clone(),
        };
        match value {
            Some(value) => {
                inputs.insert(port.name.clone(), value);
            }
            None if port.required => {
                return Err(RuleError::UnresolvedPort {
                    node_id: node.id.clone(),
                    port: port.name.clone(),
                })
            }
            None => {}
        }
    }
    Ok(inputs)
}

/// 对声明了修正键的数值输出套用修正
fn apply_modifiers(node: &Node, outputs: &mut PortValues, modifiers: &ModifierSet) {
    if modifiers.is_empty() {
        return;
    }
    for port in &node.outputs {
        let Some(key) = &port.modifier else {
            continue;
        };
        if let Some(PortValue::Number(value)) = outputs.get_mut(&port.name) {
            let modified = modifiers.apply(key, *value);
            if modified != *value {
                debug!("节点 [{}] 端口 {} 经修正 {}: {} -> {}", node.id, port.name, key, value, modified);
            }
            *value = modified;
        }
    }
}
