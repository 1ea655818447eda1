mod sink;

pub use sink::*;

use crate::types::{ExecutionResult, NodeContext, PortValues, RuleError, TriggerEvent};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 节点拦截器特征,用于在节点执行的不同阶段进行拦截处理
#[async_trait]
pub trait NodeInterceptor: Send + Sync + std::fmt::Debug {
    /// 节点执行前的拦截处理
    ///
    /// # Arguments
    /// * `ctx` - 节点执行上下文
    /// * `inputs` - 已解析的输入端口值
    async fn before<'a>(&self, ctx: &NodeContext<'a>, inputs: &PortValues) -> Result<(), RuleError>;

    /// 节点执行后的拦截处理
    ///
    /// # Arguments
    /// * `ctx` - 节点执行上下文
    /// * `outputs` - 套用修正后的输出端口值
    async fn after<'a>(&self, ctx: &NodeContext<'a>, outputs: &PortValues) -> Result<(), RuleError>;

    /// 节点执行出错时的拦截处理
    async fn error<'a>(&self, ctx: &NodeContext<'a>, error: &RuleError) -> Result<(), RuleError>;
}

/// 执行拦截器,包裹一次完整的图执行
#[async_trait]
pub trait PassInterceptor: Send + Sync + std::fmt::Debug {
    async fn before_pass(&self, event: &TriggerEvent) -> Result<(), RuleError>;

    async fn after_pass(&self, event: &TriggerEvent, result: &ExecutionResult) -> Result<(), RuleError>;
}

/// 拦截器管理器,用于管理和执行所有注册的拦截器
#[derive(Debug, Default)]
pub struct InterceptorManager {
    node_interceptors: Vec<Arc<dyn NodeInterceptor>>,
    pass_interceptors: Vec<Arc<dyn PassInterceptor>>,
}

impl InterceptorManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 带默认日志拦截器的管理器
    pub fn with_logging() -> Self {
        let mut manager = Self::new();
        manager.register_node_interceptor(Arc::new(LoggingInterceptor));
        manager
    }

    /// 注册节点拦截器
    pub fn register_node_interceptor(&mut self, interceptor: Arc<dyn NodeInterceptor>) {
        self.node_interceptors.push(interceptor);
    }

    /// 注册执行拦截器
    pub fn register_pass_interceptor(&mut self, interceptor: Arc<dyn PassInterceptor>) {
        self.pass_interceptors.push(interceptor);
    }

    pub async fn before_node<'a>(
        &self,
        ctx: &NodeContext<'a>,
        inputs: &PortValues,
    ) -> Result<(), RuleError> {
        for interceptor in &self.node_interceptors {
            interceptor.before(ctx, inputs).await?;
        }
        Ok(())
    }

    pub async fn after_node<'a>(
        &self,
        ctx: &NodeContext<'a>,
        outputs: &PortValues,
    ) -> Result<(), RuleError> {
        for interceptor in &self.node_interceptors {
            interceptor.after(ctx, outputs).await?;
        }
        Ok(())
    }

    /// 错误拦截器自身失败只记录,不覆盖原始错误
    pub async fn node_error<'a>(&self, ctx: &NodeContext<'a>, error: &RuleError) {
        for interceptor in &self.node_interceptors {
            if let Err(e) = interceptor.error(ctx, error).await {
                warn!("节点 [{}] 错误拦截器失败: {}", ctx.node.id, e);
            }
        }
    }

    pub async fn before_pass(&self, event: &TriggerEvent) -> Result<(), RuleError> {
        debug!("执行前置拦截器, 事件: {}", event.event_type);
        for interceptor in &self.pass_interceptors {
            interceptor.before_pass(event).await?;
        }
        Ok(())
    }

    pub async fn after_pass(
        &self,
        event: &TriggerEvent,
        result: &ExecutionResult,
    ) -> Result<(), RuleError> {
        debug!("执行后置拦截器, 事件: {}", event.event_type);
        for interceptor in &self.pass_interceptors {
            interceptor.after_pass(event, result).await?;
        }
        Ok(())
    }
}

/// 日志节点拦截器,用于记录节点执行的关键信息
#[derive(Debug)]
pub struct LoggingInterceptor;

#[async_trait]
impl NodeInterceptor for LoggingInterceptor {
    async fn before<'a>(&self, ctx: &NodeContext<'a>, inputs: &PortValues) -> Result<(), RuleError> {
        debug!(
            "开始执行节点 [{}], 类型: {}/{}, 输入: {:?}",
            ctx.node.id, ctx.node.kind, ctx.node.subtype, inputs
        );
        Ok(())
    }

    async fn after<'a>(&self, ctx: &NodeContext<'a>, outputs: &PortValues) -> Result<(), RuleError> {
        debug!("节点 [{}] 执行成功, 输出: {:?}", ctx.node.id, outputs);
        Ok(())
    }

    async fn error<'a>(&self, ctx: &NodeContext<'a>, error: &RuleError) -> Result<(), RuleError> {
        info!(
            "节点 [{}] 执行失败, 类型: {}/{}, 错误: {}",
            ctx.node.id, ctx.node.kind, ctx.node.subtype, error
        );
        Ok(())
    }
}
