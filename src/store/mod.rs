use crate::types::{OwnerRef, RuleError, RuleInstance, RuleTemplate};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// 模板与实例的持久化接口,由宿主实现
#[async_trait]
pub trait RuleRepository: Send + Sync + std::fmt::Debug {
    async fn load_template(&self, id: Uuid) -> Result<Option<RuleTemplate>, RuleError>;

    async fn save_template(&self, template: &RuleTemplate) -> Result<(), RuleError>;

    async fn load_instance(&self, id: Uuid) -> Result<Option<RuleInstance>, RuleError>;

    async fn save_instance(&self, instance: &RuleInstance) -> Result<(), RuleError>;

    async fn delete_instance(&self, id: Uuid) -> Result<(), RuleError>;

    /// 全部实例,可按拥有者过滤
    async fn list_instances(&self, owner: Option<&OwnerRef>) -> Result<Vec<RuleInstance>, RuleError>;
}

/// 内存仓库
#[derive(Debug, Default, Clone)]
pub struct MemoryRepository {
    templates: Arc<RwLock<HashMap<Uuid, RuleTemplate>>>,
    instances: Arc<RwLock<HashMap<Uuid, RuleInstance>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuleRepository for MemoryRepository {
    async fn load_template(&self, id: Uuid) -> Result<Option<RuleTemplate>, RuleError> {
        Ok(self.templates.read().await.get(&id).cloned())
    }

    async fn save_template(&self, template: &RuleTemplate) -> Result<(), RuleError> {
        self.templates
            .write()
            .await
            .insert(template.id, template.clone());
        Ok(())
    }

    async fn load_instance(&self, id: Uuid) -> Result<Option<RuleInstance>, RuleError> {
        Ok(self.instances.read().await.get(&id).cloned())
    }

    async fn save_instance(&self, instance: &RuleInstance) -> Result<(), RuleError> {
        self.instances
            .write()
            .await
            .insert(instance.id, instance.clone());
        Ok(())
    }

    async fn delete_instance(&self, id: Uuid) -> Result<(), RuleError> {
        self.instances.write().await.remove(&id);
        Ok(())
    }

    async fn list_instances(&self, owner: Option<&OwnerRef>) -> Result<Vec<RuleInstance>, RuleError> {
        let instances = self.instances.read().await;
        let mut matched: Vec<RuleInstance> = instances
            .values()
            .filter(|i| owner.map(|o| &i.owner == o).unwrap_or(true))
            .cloned()
            .collect();
        matched.sort_by_key(|i| (i.created_at, i.id));
        Ok(matched)
    }
}
