use crate::aop::{
    ExecutionLogSink, InterceptorManager, LogDispatcher, NodeInterceptor, PassInterceptor,
    TracingLogSink,
};
use crate::config::EngineConfig;
use crate::engine::{
    fingerprint, merge_variables, BalanceReport, BalanceSimulator, CertifiedGraph, Executor,
    GraphValidator, InstanceManager, ModifierResolver, NodeCatalog, NodeFactory, Pass,
    SimulationSettings, ValidationResult, VersionManager,
};
use crate::store::{MemoryRepository, RuleRepository};
use crate::types::{
    EntityState, ExecutionLogEntry, ExecutionResult, GameContext, NodeTemplate, OwnerRef,
    RuleError, RuleGraph, RuleInstance, RuleTemplate, TriggerEvent,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

pub type DynRuleEngine = Arc<dyn RuleEngineTrait + Send + Sync>;

#[async_trait]
pub trait RuleEngineTrait: Debug + Send + Sync {
    /// 校验规则图,不保存
    async fn submit_graph(&self, graph: &RuleGraph) -> ValidationResult;
    /// 校验并登记模板,记录校验证书
    async fn register_template(&self, template: RuleTemplate) -> Result<RuleTemplate, RuleError>;
    async fn load_template(&self, content: &str) -> Result<RuleTemplate, RuleError>;
    async fn load_template_from_file(&self, path: &str) -> Result<RuleTemplate, RuleError>;
    async fn get_template(&self, id: Uuid) -> Result<RuleTemplate, RuleError>;
    async fn attach(
        &self,
        template_id: Uuid,
        owner: OwnerRef,
        parameter_values: Map<String, Value>,
    ) -> Result<RuleInstance, RuleError>;
    async fn detach(&self, instance_id: Uuid) -> Result<RuleInstance, RuleError>;
    async fn activate(&self, instance_id: Uuid) -> Result<RuleInstance, RuleError>;
    async fn deactivate(&self, instance_id: Uuid) -> Result<RuleInstance, RuleError>;
    async fn execute(
        &self,
        instance_id: Uuid,
        event: TriggerEvent,
        context: GameContext,
        state: EntityState,
    ) -> Result<ExecutionResult, RuleError>;
    async fn sweep_expired(&self) -> Result<Vec<Uuid>, RuleError>;
    async fn run_simulation(
        &self,
        template_id: Uuid,
        settings: SimulationSettings,
    ) -> Result<BalanceReport, RuleError>;
    async fn register_node_type(&self, template: NodeTemplate, factory: NodeFactory) -> Result<(), RuleError>;
    async fn add_node_interceptor(&self, interceptor: Arc<dyn NodeInterceptor>);
    async fn add_pass_interceptor(&self, interceptor: Arc<dyn PassInterceptor>);
    async fn get_current_version(&self) -> u64;
}

/// 规则引擎门面: 组合节点目录、校验器、执行器、实例管理、日志与模拟
#[derive(Debug, Clone)]
pub struct RuleEngine {
    config: Arc<EngineConfig>,
    catalog: Arc<RwLock<Arc<NodeCatalog>>>,
    repository: Arc<dyn RuleRepository>,
    instances: Arc<InstanceManager>,
    version_manager: Arc<VersionManager>,
    interceptor_manager: Arc<RwLock<InterceptorManager>>,
    log: LogDispatcher,
}

impl RuleEngine {
    /// 默认配置、内存仓库、tracing 日志
    pub async fn new() -> Self {
        Self::with_components(
            EngineConfig::default(),
            Arc::new(MemoryRepository::new()),
            Arc::new(TracingLogSink),
        )
        .await
    }

    pub async fn with_components(
        config: EngineConfig,
        repository: Arc<dyn RuleRepository>,
        sink: Arc<dyn ExecutionLogSink>,
    ) -> Self {
        let interceptors = if config.log_node_execution {
            InterceptorManager::with_logging()
        } else {
            InterceptorManager::new()
        };
        let (log, _) = LogDispatcher::spawn(sink);
        let catalog = NodeCatalog::with_builtins();
        info!("规则引擎启动, 已注册 {} 种节点类型", catalog.len());

        Self {
            config: Arc::new(config),
            catalog: Arc::new(RwLock::new(Arc::new(catalog))),
            instances: Arc::new(InstanceManager::new(repository.clone())),
            repository,
            version_manager: Arc::new(VersionManager::new()),
            interceptor_manager: Arc::new(RwLock::new(interceptors)),
            log,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 当前节点目录快照
    pub async fn catalog(&self) -> Arc<NodeCatalog> {
        self.catalog.read().await.clone()
    }

    pub fn instances(&self) -> &Arc<InstanceManager> {
        &self.instances
    }

    pub fn log_failures(&self) -> u64 {
        self.log.failures()
    }

    pub async fn instances_for_owner(&self, owner: &OwnerRef) -> Result<Vec<RuleInstance>, RuleError> {
        self.instances.instances_for_owner(owner).await
    }

    pub async fn set_expiry(
        &self,
        instance_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<RuleInstance, RuleError> {
        self.instances.set_expiry(instance_id, expires_at).await
    }

    /// 以给定时间清理过期实例
    pub async fn sweep_expired_at(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, RuleError> {
        self.instances.sweep_expired(now).await
    }

    /// 按配置间隔启动周期清理
    pub fn spawn_expiry_sweeper(&self) -> JoinHandle<()> {
        self.instances
            .clone()
            .spawn_expiry_sweeper(self.config.sweep_interval())
    }

    /// 以配置中的模拟次数生成默认模拟设置
    pub fn default_simulation_settings(&self) -> SimulationSettings {
        SimulationSettings::default().with_iterations(self.config.simulation.iterations)
    }

    /// 替换实例的持续状态
    pub async fn set_active_conditions<I, S>(
        &self,
        instance_id: Uuid,
        conditions: I,
    ) -> Result<RuleInstance, RuleError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.instances.set_conditions(instance_id, conditions).await
    }

    fn validator<'c>(&self, catalog: &'c NodeCatalog) -> GraphValidator<'c> {
        GraphValidator::new(catalog).with_complexity_threshold(self.config.complexity_threshold)
    }

    fn validate(&self, catalog: &NodeCatalog, graph: &RuleGraph) -> ValidationResult {
        self.validator(catalog).validate(graph)
    }
}

#[async_trait]
impl RuleEngineTrait for RuleEngine {
    async fn submit_graph(&self, graph: &RuleGraph) -> ValidationResult {
        let catalog = self.catalog().await;
        let mut graph = graph.clone();
        catalog.complete_graph(&mut graph);
        self.validate(&catalog, &graph)
    }

    async fn register_template(&self, mut template: RuleTemplate) -> Result<RuleTemplate, RuleError> {
        let catalog = self.catalog().await;
        catalog.complete_graph(&mut template.graph);
        let validation = self.validate(&catalog, &template.graph);
        if !validation.valid {
            return Err(RuleError::TemplateInvalid(format!(
                "模板 {} 校验失败: {}",
                template.name,
                validation.error_summary()
            )));
        }
        for warning in &validation.warnings {
            warn!("模板 {} 校验警告: {}", template.name, warning.message);
        }

        let version = self.version_manager.create_version(&template.graph);
        template.graph.metadata.version = version.version;
        template.graph.metadata.updated_at = version.timestamp;
        template.certificate = Some(fingerprint(&template.graph));
        self.repository.save_template(&template).await?;
        info!(
            "模板 {} 已登记, 版本 {}, 复杂度 {}",
            template.name, version.version, validation.complexity_score
        );
        Ok(template)
    }

    async fn load_template(&self, content: &str) -> Result<RuleTemplate, RuleError> {
        let template: RuleTemplate = serde_json::from_str(content)
            .map_err(|e| RuleError::ConfigError(format!("模板解析失败: {}", e)))?;
        self.register_template(template).await
    }

    async fn load_template_from_file(&self, path: &str) -> Result<RuleTemplate, RuleError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RuleError::ConfigError(e.to_string()))?;
        self.load_template(&content).await
    }

    async fn get_template(&self, id: Uuid) -> Result<RuleTemplate, RuleError> {
        self.repository
            .load_template(id)
            .await?
            .ok_or(RuleError::TemplateNotFound(id))
    }

    async fn attach(
        &self,
        template_id: Uuid,
        owner: OwnerRef,
        parameter_values: Map<String, Value>,
    ) -> Result<RuleInstance, RuleError> {
        let template = self.get_template(template_id).await?;
        let catalog = self.catalog().await;
        self.instances
            .attach(&self.validator(&catalog), &template, owner, parameter_values)
            .await
    }

    async fn detach(&self, instance_id: Uuid) -> Result<RuleInstance, RuleError> {
        self.instances.detach(instance_id).await
    }

    async fn activate(&self, instance_id: Uuid) -> Result<RuleInstance, RuleError> {
        self.instances.activate(instance_id).await
    }

    async fn deactivate(&self, instance_id: Uuid) -> Result<RuleInstance, RuleError> {
        self.instances.deactivate(instance_id).await
    }

    async fn execute(
        &self,
        instance_id: Uuid,
        event: TriggerEvent,
        context: GameContext,
        mut state: EntityState,
    ) -> Result<ExecutionResult, RuleError> {
        // 同一实例的执行与清理串行
        let (_guard, mut instance) = self.instances.lock_existing(instance_id).await?;
        self.instances.expire_if_due(&mut instance, Utc::now()).await?;
        if !instance.is_active {
            return Err(RuleError::InstanceInactive(instance_id));
        }

        let template = self.get_template(instance.template_id).await?;
        let catalog = self.catalog().await;
        let variables = merge_variables(&template.graph, &instance.parameter_values);
        let graph = CertifiedGraph::verify(
            Arc::new(template.graph.clone()),
            template.certificate.as_deref(),
            &self.validator(&catalog),
            &variables,
        )?;
        let modifiers = ModifierResolver::new().resolve(&context, &template.modifiers);
        state
            .conditions
            .extend(instance.active_conditions.iter().cloned());

        let result = {
            let interceptors = self.interceptor_manager.read().await;
            let pass = Pass {
                event: &event,
                context: &context,
                state: &state,
                variables: &variables,
                modifiers,
            };
            Executor::new(&catalog, &interceptors).execute(&graph, pass).await?
        };

        if !result.fired {
            return Ok(result);
        }
        if result.success {
            self.instances.record_usage(&mut instance).await?;
        }
        self.log.dispatch(ExecutionLogEntry::from_result(
            instance.id,
            template.id,
            &event.event_type,
            event.payload.clone(),
            &result,
        ));
        Ok(result)
    }

    async fn sweep_expired(&self) -> Result<Vec<Uuid>, RuleError> {
        self.sweep_expired_at(Utc::now()).await
    }

    async fn run_simulation(
        &self,
        template_id: Uuid,
        settings: SimulationSettings,
    ) -> Result<BalanceReport, RuleError> {
        let template = self.get_template(template_id).await?;
        let simulator = BalanceSimulator::new(
            self.catalog().await,
            self.config.simulation.clone(),
            self.config.complexity_threshold,
        );
        simulator.simulate(&template, settings).await
    }

    /// 注册自定义节点类型; 已有执行继续使用旧目录快照
    async fn register_node_type(&self, template: NodeTemplate, factory: NodeFactory) -> Result<(), RuleError> {
        let mut catalog = self.catalog.write().await;
        Arc::make_mut(&mut catalog).register(template, factory)
    }

    async fn add_node_interceptor(&self, interceptor: Arc<dyn NodeInterceptor>) {
        self.interceptor_manager
            .write()
            .await
            .register_node_interceptor(interceptor);
    }

    async fn add_pass_interceptor(&self, interceptor: Arc<dyn PassInterceptor>) {
        self.interceptor_manager
            .write()
            .await
            .register_pass_interceptor(interceptor);
    }

    async fn get_current_version(&self) -> u64 {
        self.version_manager.get_current_version()
    }
}
