use crate::metrics;
use crate::types::{ExecutionLogEntry, RuleError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// 执行日志接收端
#[async_trait]
pub trait ExecutionLogSink: Send + Sync + std::fmt::Debug {
    async fn append(&self, entry: ExecutionLogEntry) -> Result<(), RuleError>;
}

/// 内存日志,测试与调试用
#[derive(Debug, Default, Clone)]
pub struct MemoryLogSink {
    entries: Arc<RwLock<Vec<ExecutionLogEntry>>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<ExecutionLogEntry> {
        self.entries.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ExecutionLogSink for MemoryLogSink {
    async fn append(&self, entry: ExecutionLogEntry) -> Result<(), RuleError> {
        self.entries.write().await.push(entry);
        Ok(())
    }
}

/// 把日志转发给外部消费者
#[derive(Debug, Clone)]
pub struct ChannelLogSink {
    tx: mpsc::UnboundedSender<ExecutionLogEntry>,
}

impl ChannelLogSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ExecutionLogEntry>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ExecutionLogSink for ChannelLogSink {
    async fn append(&self, entry: ExecutionLogEntry) -> Result<(), RuleError> {
        self.tx
            .send(entry)
            .map_err(|_| RuleError::LogSink("日志接收端已关闭".to_string()))
    }
}

/// 以结构化日志输出执行记录
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

#[async_trait]
impl ExecutionLogSink for TracingLogSink {
    async fn append(&self, entry: ExecutionLogEntry) -> Result<(), RuleError> {
        info!(
            instance_id = %entry.instance_id,
            template_id = %entry.template_id,
            trigger = %entry.trigger_type,
            success = entry.success,
            duration_us = entry.duration_us,
            nodes = entry.trace.len(),
            "规则执行记录"
        );
        Ok(())
    }
}

/// 后台日志分发器: 执行路径只做入队,写入在独立任务中完成
#[derive(Debug, Clone)]
pub struct LogDispatcher {
    tx: mpsc::UnboundedSender<ExecutionLogEntry>,
    failures: Arc<AtomicU64>,
}

impl LogDispatcher {
    /// 启动分发任务,必须在 tokio 运行时内调用
    pub fn spawn(sink: Arc<dyn ExecutionLogSink>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<ExecutionLogEntry>();
        let failures = Arc::new(AtomicU64::new(0));
        let counter = failures.clone();
        let handle = tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                let id = entry.id;
                if let Err(e) = sink.append(entry).await {
                    counter.fetch_add(1, Ordering::Relaxed);
                    metrics::record_log_failure("sink");
                    warn!("写入执行日志 {} 失败: {}", id, e);
                }
            }
        });
        (Self { tx, failures }, handle)
    }

    /// 入队,不等待写入完成
    pub fn dispatch(&self, entry: ExecutionLogEntry) {
        if self.tx.send(entry).is_err() {
            self.failures.fetch_add(1, Ordering::Relaxed);
            metrics::record_log_failure("dispatcher");
            warn!("执行日志分发任务已停止,丢弃日志");
        }
    }

    /// 写入失败的日志条数
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}
