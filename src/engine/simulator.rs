use crate::aop::InterceptorManager;
use crate::config::{BalanceWeights, SimulationConfig};
use crate::engine::{
    bind_parameters, merge_variables, CertifiedGraph, Executor, GraphValidator, ModifierResolver,
    NodeCatalog, Pass,
};
use crate::types::{
    ContextType, EntityState, GameContext, Mutation, PortValue, PortValues, RuleError,
    RuleTemplate, TriggerEvent,
};
use futures::future::join_all;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 理想的伤害离散系数
const IDEAL_DAMAGE_VARIATION: f64 = 0.3;
const PVP_DAMAGE_FACTOR: f64 = 1.25;

const WEATHERS: [&str; 5] = ["clear", "rain", "storm", "fog", "snow"];
const PLANES: [&str; 4] = ["material", "feywild", "shadowfell", "elemental_fire"];
const TERRAINS: [&str; 5] = ["forest", "dungeon", "urban", "mountain", "desert"];
const TIMES: [&str; 4] = ["dawn", "day", "dusk", "night"];
const MOON_PHASES: [&str; 4] = ["new", "waxing", "full", "waning"];
const EMOTIONS: [&str; 4] = ["calm", "angry", "afraid", "joyful"];
const OWNER_CONDITIONS: [&str; 3] = ["hasted", "blessed", "poisoned"];
const TARGET_CONDITIONS: [&str; 3] = ["prone", "frightened", "burning"];
const ABILITIES: [&str; 6] = [
    "strength",
    "dexterity",
    "constitution",
    "intelligence",
    "wisdom",
    "charisma",
];

/// 模拟场景
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    Pvp,
    Pve,
    Exploration,
    Roleplay,
}

impl Scenario {
    pub const ALL: [Scenario; 4] = [
        Scenario::Pvp,
        Scenario::Pve,
        Scenario::Exploration,
        Scenario::Roleplay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scenario::Pvp => "pvp",
            Scenario::Pve => "pve",
            Scenario::Exploration => "exploration",
            Scenario::Roleplay => "roleplay",
        }
    }

    pub fn is_combat(&self) -> bool {
        matches!(self, Scenario::Pvp | Scenario::Pve)
    }

    fn target(&self) -> &'static str {
        match self {
            Scenario::Pvp => "rival",
            Scenario::Pve => "monster",
            Scenario::Exploration => "obstacle",
            Scenario::Roleplay => "npc",
        }
    }

    /// 该等级下一次行动的期望伤害
    pub fn expected_damage(&self, level: u32) -> f64 {
        let base = 4.5 + level as f64 * 1.5;
        match self {
            Scenario::Pvp => base * PVP_DAMAGE_FACTOR,
            _ => base,
        }
    }

    /// 战斗场景看伤害是否达到期望; 其他场景看是否产生了伤害以外的效果
    fn is_win(&self, level: u32, damage: f64, mutations: &[Mutation]) -> bool {
        if self.is_combat() {
            damage >= self.expected_damage(level)
        } else {
            mutations.iter().any(|m| {
                !matches!(
                    m,
                    Mutation::DealDamage { .. } | Mutation::ConsumeResource { .. }
                )
            })
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 单次模拟请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// 每个场景的执行次数
    pub iterations: usize,
    pub scenarios: Vec<Scenario>,
    pub min_level: u32,
    pub max_level: u32,
    pub seed: u64,
    /// 覆盖模板参数默认值
    pub parameter_values: Map<String, Value>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            iterations: crate::config::DEFAULT_ITERATIONS,
            scenarios: Scenario::ALL.to_vec(),
            min_level: 1,
            max_level: 20,
            seed: 0,
            parameter_values: Map::new(),
        }
    }
}

impl SimulationSettings {
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_scenarios(mut self, scenarios: &[Scenario]) -> Self {
        self.scenarios = scenarios.to_vec();
        self
    }

    pub fn with_levels(mut self, min_level: u32, max_level: u32) -> Self {
        self.min_level = min_level;
        self.max_level = max_level;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// 单个场景的统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario: Scenario,
    pub runs: usize,
    pub win_rate: f64,
    pub average_damage: f64,
    /// 每次成功执行产生的状态修改数
    pub action_economy: f64,
    /// 每单位资源消耗产生的效果量
    pub resource_efficiency: f64,
    pub failures: usize,
    /// 场景整体中止时的原因
    pub error: Option<RuleError>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    pub power: f64,
    pub complexity: f64,
    pub versatility: f64,
    pub fun_factor: f64,
    pub resource_efficiency: f64,
}

impl SubScores {
    fn weighted(&self, weights: &BalanceWeights) -> f64 {
        let total = weights.total();
        if total <= 0.0 {
            return 0.0;
        }
        let sum = self.power * weights.power
            + self.complexity * weights.complexity
            + self.versatility * weights.versatility
            + self.fun_factor * weights.fun_factor
            + self.resource_efficiency * weights.resource_efficiency;
        (sum / total).clamp(0.0, 100.0)
    }
}

/// 平衡报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceReport {
    pub template_id: Uuid,
    pub iterations: usize,
    pub scenarios: Vec<ScenarioResult>,
    pub sub_scores: SubScores,
    pub balance_score: f64,
    pub complexity_score: u32,
    pub issues: Vec<String>,
    pub overall_assessment: String,
}

impl BalanceReport {
    pub fn scenario(&self, scenario: Scenario) -> Option<&ScenarioResult> {
        self.scenarios.iter().find(|s| s.scenario == scenario)
    }
}

/// 一个模拟任务的累计值
#[derive(Debug, Default, Clone)]
struct ChunkStats {
    runs: usize,
    successes: usize,
    failures: usize,
    wins: usize,
    damage_sum: f64,
    damage_sq_sum: f64,
    mutation_count: usize,
    effect_sum: f64,
    cost_sum: f64,
    level_sum: u64,
    last_error: Option<String>,
}

impl ChunkStats {
    fn merge(&mut self, other: ChunkStats) {
        self.runs += other.runs;
        self.successes += other.successes;
        self.failures += other.failures;
        self.wins += other.wins;
        self.damage_sum += other.damage_sum;
        self.damage_sq_sum += other.damage_sq_sum;
        self.mutation_count += other.mutation_count;
        self.effect_sum += other.effect_sum;
        self.cost_sum += other.cost_sum;
        self.level_sum += other.level_sum;
        if other.last_error.is_some() {
            self.last_error = other.last_error;
        }
    }
}

/// 一个模拟任务需要的共享数据
#[derive(Clone)]
struct ChunkJob {
    catalog: Arc<NodeCatalog>,
    graph: CertifiedGraph,
    template: Arc<RuleTemplate>,
    variables: Arc<PortValues>,
    scenario: Scenario,
    runs: usize,
    min_level: u32,
    max_level: u32,
    seed: u64,
}

/// 平衡模拟器: 并行运行执行器并汇总统计,不写入任何存储
#[derive(Debug, Clone)]
pub struct BalanceSimulator {
    catalog: Arc<NodeCatalog>,
    config: SimulationConfig,
    complexity_threshold: u32,
}

impl BalanceSimulator {
    pub fn new(catalog: Arc<NodeCatalog>, config: SimulationConfig, complexity_threshold: u32) -> Self {
        Self {
            catalog,
            config,
            complexity_threshold,
        }
    }

    pub async fn simulate(
        &self,
        template: &RuleTemplate,
        settings: SimulationSettings,
    ) -> Result<BalanceReport, RuleError> {
        if settings.iterations == 0 {
            return Err(RuleError::ConfigError("模拟次数必须大于0".into()));
        }
        if settings.min_level > settings.max_level {
            return Err(RuleError::ConfigError(format!(
                "等级范围无效: {}..={}",
                settings.min_level, settings.max_level
            )));
        }
        let bound = bind_parameters(template, settings.parameter_values.clone())?;
        let variables = Arc::new(merge_variables(&template.graph, &bound));
        let validator =
            GraphValidator::new(&self.catalog).with_complexity_threshold(self.complexity_threshold);
        let graph = CertifiedGraph::verify(
            Arc::new(template.graph.clone()),
            template.certificate.as_deref(),
            &validator,
            &variables,
        )?;
        let complexity_score = graph.validation().complexity_score;

        let scenarios = if settings.scenarios.is_empty() {
            Scenario::ALL.to_vec()
        } else {
            let mut unique = settings.scenarios.clone();
            unique.sort();
            unique.dedup();
            unique
        };

        info!(
            "开始模拟模板 {}: {} 个场景, 每个场景 {} 次",
            template.name,
            scenarios.len(),
            settings.iterations
        );

        let template = Arc::new(template.clone());
        let chunk_size = self.config.chunk_size.max(1);
        let mut jobs = Vec::new();
        for (si, scenario) in scenarios.iter().enumerate() {
            let mut remaining = settings.iterations;
            let mut chunk = 0u64;
            while remaining > 0 {
                let runs = remaining.min(chunk_size);
                remaining -= runs;
                jobs.push(ChunkJob {
                    catalog: self.catalog.clone(),
                    graph: graph.clone(),
                    template: template.clone(),
                    variables: variables.clone(),
                    scenario: *scenario,
                    runs,
                    min_level: settings.min_level,
                    max_level: settings.max_level,
                    seed: chunk_seed(settings.seed, si as u64, chunk),
                });
                chunk += 1;
            }
        }

        let handles: Vec<_> = jobs
            .iter()
            .cloned()
            .map(|job| tokio::spawn(run_chunk(job)))
            .collect();
        let joined = join_all(handles).await;

        let mut totals: BTreeMap<Scenario, ChunkStats> = BTreeMap::new();
        let mut aborted: BTreeMap<Scenario, RuleError> = BTreeMap::new();
        for (job, outcome) in jobs.iter().zip(joined) {
            match outcome {
                Ok(stats) => totals.entry(job.scenario).or_default().merge(stats),
                Err(e) => {
                    warn!("场景 {} 的模拟任务异常退出: {}", job.scenario, e);
                    aborted.insert(
                        job.scenario,
                        RuleError::SimulationAborted(format!("{} 模拟任务异常: {}", job.scenario, e)),
                    );
                }
            }
        }

        let mut results = Vec::new();
        let mut issues = Vec::new();
        let mut spread = DamageSpread::default();
        let mut level_sum = 0u64;
        let mut run_count = 0u64;
        for scenario in &scenarios {
            let stats = totals.get(scenario).cloned().unwrap_or_default();
            let mut error = aborted.remove(scenario);
            if error.is_none() && stats.runs > 0 && stats.successes == 0 {
                error = Some(RuleError::SimulationAborted(format!(
                    "{} 的所有执行均失败: {}",
                    scenario,
                    stats.last_error.clone().unwrap_or_default()
                )));
            }
            if error.is_none() {
                spread.count += stats.successes;
                spread.sum += stats.damage_sum;
                spread.sq_sum += stats.damage_sq_sum;
            }
            level_sum += stats.level_sum;
            run_count += stats.runs as u64;

            let result = scenario_result(*scenario, &stats, error);
            self.collect_issues(&result, &mut issues);
            results.push(result);
        }

        let average_level = if run_count > 0 {
            (level_sum / run_count) as u32
        } else {
            settings.min_level
        };
        let sub_scores = self.sub_scores(&results, complexity_score, average_level, &spread);
        let balance_score = sub_scores.weighted(&self.config.weights);
        let overall_assessment = assessment(balance_score, results.len(), issues.len());
        debug!("模板 {} 平衡评分 {:.1}", template.name, balance_score);

        Ok(BalanceReport {
            template_id: template.id,
            iterations: settings.iterations,
            scenarios: results,
            sub_scores,
            balance_score,
            complexity_score,
            issues,
            overall_assessment,
        })
    }

    fn collect_issues(&self, result: &ScenarioResult, issues: &mut Vec<String>) {
        if let Some(error) = &result.error {
            issues.push(format!("simulation aborted in {}: {}", result.scenario, error));
            return;
        }
        if result.win_rate > self.config.overpowered_win_rate {
            issues.push(format!("overpowered in {}", result.scenario));
        } else if result.win_rate < self.config.underpowered_win_rate {
            issues.push(format!("underpowered in {}", result.scenario));
        }
        if result.failures > 0 {
            issues.push(format!(
                "{} of {} runs failed in {}",
                result.failures, result.runs, result.scenario
            ));
        }
    }

    fn sub_scores(
        &self,
        results: &[ScenarioResult],
        complexity_score: u32,
        average_level: u32,
        damage: &DamageSpread,
    ) -> SubScores {
        let usable: Vec<&ScenarioResult> = results.iter().filter(|r| r.error.is_none()).collect();
        let combat: Vec<&&ScenarioResult> = usable.iter().filter(|r| r.scenario.is_combat()).collect();
        let power_rates: Vec<f64> = if combat.is_empty() {
            usable.iter().map(|r| r.win_rate).collect()
        } else {
            combat.iter().map(|r| r.win_rate).collect()
        };
        let power = mean(&power_rates)
            .map(|win| (100.0 - (win - 0.5).abs() * 200.0).clamp(0.0, 100.0))
            .unwrap_or(0.0);

        let threshold = self.complexity_threshold.max(1) as f64;
        let complexity = (100.0 * (1.0 - complexity_score as f64 / (2.0 * threshold))).clamp(0.0, 100.0);

        let versatility = if results.is_empty() {
            0.0
        } else {
            let viable = usable
                .iter()
                .filter(|r| r.win_rate >= self.config.underpowered_win_rate)
                .count();
            100.0 * viable as f64 / results.len() as f64
        };

        let fun_factor = match damage.coefficient_of_variation() {
            Some(cv) => (100.0 - (cv - IDEAL_DAMAGE_VARIATION).abs() * 200.0).clamp(0.0, 100.0),
            None => 50.0,
        };

        let efficiencies: Vec<f64> = usable.iter().map(|r| r.resource_efficiency).collect();
        let expected = Scenario::Pve.expected_damage(average_level);
        let resource_efficiency = mean(&efficiencies)
            .map(|e| (100.0 * e / expected).clamp(0.0, 100.0))
            .unwrap_or(0.0);

        SubScores {
            power,
            complexity,
            versatility,
            fun_factor,
            resource_efficiency,
        }
    }
}

/// 伤害分布,用于趣味性评分
#[derive(Debug, Default)]
struct DamageSpread {
    count: usize,
    sum: f64,
    sq_sum: f64,
}

impl DamageSpread {
    fn coefficient_of_variation(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        let mean = self.sum / n;
        if mean <= 0.0 {
            return None;
        }
        let variance = (self.sq_sum / n - mean * mean).max(0.0);
        Some(variance.sqrt() / mean)
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn scenario_result(scenario: Scenario, stats: &ChunkStats, error: Option<RuleError>) -> ScenarioResult {
    let runs = stats.runs.max(1) as f64;
    let successes = stats.successes.max(1) as f64;
    // 没有资源消耗时按每次行动计一单位
    let cost_basis = if stats.cost_sum > 0.0 { stats.cost_sum } else { successes };
    ScenarioResult {
        scenario,
        runs: stats.runs,
        win_rate: stats.wins as f64 / runs,
        average_damage: stats.damage_sum / successes,
        action_economy: stats.mutation_count as f64 / successes,
        resource_efficiency: stats.effect_sum / cost_basis,
        failures: stats.failures,
        error,
    }
}

fn assessment(score: f64, scenarios: usize, issues: usize) -> String {
    let tier = if score >= 80.0 {
        "Well balanced"
    } else if score >= 60.0 {
        "Mostly balanced; review flagged issues"
    } else if score >= 40.0 {
        "Needs tuning"
    } else {
        "Significantly imbalanced"
    };
    format!(
        "{}: balance score {:.1}/100 across {} scenario(s), {} issue(s)",
        tier, score, scenarios, issues
    )
}

fn chunk_seed(seed: u64, scenario: u64, chunk: u64) -> u64 {
    seed.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .wrapping_add(scenario.wrapping_mul(1_000_003))
        .wrapping_add(chunk.wrapping_mul(7_919))
}

fn pick<'a>(rng: &mut ChaCha8Rng, options: &[&'a str]) -> &'a str {
    options[rng.gen_range(0..options.len())]
}

/// 随机生成一次模拟的情境、拥有者状态与事件
fn synthesize(
    rng: &mut ChaCha8Rng,
    scenario: Scenario,
    trigger: &str,
    min_level: u32,
    max_level: u32,
) -> (TriggerEvent, GameContext, EntityState) {
    let level = rng.gen_range(min_level..=max_level);
    let context = GameContext::new()
        .with(ContextType::Weather, pick(rng, &WEATHERS))
        .with(ContextType::Plane, pick(rng, &PLANES))
        .with(ContextType::Terrain, pick(rng, &TERRAINS))
        .with(ContextType::Time, pick(rng, &TIMES))
        .with(ContextType::MoonPhase, pick(rng, &MOON_PHASES))
        .with(ContextType::Emotion, pick(rng, &EMOTIONS))
        .with(ContextType::Location, scenario.as_str());

    let mut state = EntityState::new("sim_owner", level);
    for ability in ABILITIES {
        state = state.with_stat(ability, rng.gen_range(8..=18) as f64);
    }
    state = state
        .with_resource("spell_slots", (1 + level / 2) as f64)
        .with_resource("hit_points", (level * 8) as f64)
        .with_resource("ki", level as f64);
    if rng.gen_bool(0.2) {
        state = state.with_condition(pick(rng, &OWNER_CONDITIONS));
    }
    if rng.gen_bool(0.3) {
        state.target_conditions.insert(pick(rng, &TARGET_CONDITIONS).to_string());
    }

    let event = TriggerEvent::new(trigger)
        .with_source("sim_owner")
        .with_target(scenario.target())
        .with_value("value", PortValue::Number(rng.gen_range(1..=20) as f64))
        .with_seed(rng.gen());
    (event, context, state)
}

async fn run_chunk(job: ChunkJob) -> ChunkStats {
    let mut rng = ChaCha8Rng::seed_from_u64(job.seed);
    let interceptors = InterceptorManager::new();
    let executor = Executor::new(&job.catalog, &interceptors);
    let resolver = ModifierResolver::new();
    let trigger = job
        .graph
        .graph()
        .get_start_node()
        .map(|n| n.subtype.clone())
        .unwrap_or_default();

    let mut stats = ChunkStats::default();
    for _ in 0..job.runs {
        let (event, context, state) =
            synthesize(&mut rng, job.scenario, &trigger, job.min_level, job.max_level);
        let modifiers = resolver.resolve(&context, &job.template.modifiers);
        stats.runs += 1;
        stats.level_sum += state.level as u64;

        let pass = Pass {
            event: &event,
            context: &context,
            state: &state,
            variables: &job.variables,
            modifiers,
        };
        let result = match executor.execute(&job.graph, pass).await {
            Ok(result) if result.success => result,
            Ok(result) => {
                stats.failures += 1;
                stats.last_error = result.error.map(|e| e.to_string());
                continue;
            }
            Err(e) => {
                stats.failures += 1;
                stats.last_error = Some(e.to_string());
                continue;
            }
        };

        let damage = result.total_damage();
        let healing: f64 = result.mutations.iter().map(Mutation::healing).sum();
        let cost: f64 = result.mutations.iter().map(Mutation::resource_cost).sum();
        stats.successes += 1;
        stats.damage_sum += damage;
        stats.damage_sq_sum += damage * damage;
        stats.mutation_count += result.mutations.len();
        stats.effect_sum += damage + healing;
        stats.cost_sum += cost;
        if job.scenario.is_win(state.level, damage, &result.mutations) {
            stats.wins += 1;
        }
    }
    stats
}
