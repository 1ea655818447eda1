use crate::engine::GraphValidator;
use crate::store::RuleRepository;
use crate::types::{
    OwnerRef, PortValue, PortValues, RuleError, RuleGraph, RuleInstance, RuleTemplate,
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 按模板参数定义校验实例参数,并补全默认值
pub fn bind_parameters(
    template: &RuleTemplate,
    values: Map<String, Value>,
) -> Result<Map<String, Value>, RuleError> {
    if let Some(unknown) = values
        .keys()
        .find(|k| !template.parameters.iter().any(|p| &p.name == *k))
    {
        return Err(RuleError::InvalidParameter {
            name: unknown.clone(),
            message: format!("模板 {} 没有该参数", template.name),
        });
    }

    let mut bound = Map::new();
    for param in &template.parameters {
        let value = match values.get(&param.name).or(param.default_value.as_ref()) {
            Some(value) => value.clone(),
            None if param.constraints.required => {
                return Err(RuleError::InvalidParameter {
                    name: param.name.clone(),
                    message: "缺少必需参数".into(),
                })
            }
            None => continue,
        };

        let schema = param.json_schema();
        let validator = jsonschema::validator_for(&schema).map_err(|e| RuleError::InvalidParameter {
            name: param.name.clone(),
            message: format!("参数约束无效: {}", e),
        })?;
        if !validator.is_valid(&value) {
            let message = validator
                .iter_errors(&value)
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(RuleError::InvalidParameter {
                name: param.name.clone(),
                message,
            });
        }
        bound.insert(param.name.clone(), value);
    }
    Ok(bound)
}

/// 图变量叠加实例参数,同名时实例参数优先
pub fn merge_variables(graph: &RuleGraph, parameter_values: &Map<String, Value>) -> PortValues {
    let mut variables = graph.variables.clone();
    for (name, value) in parameter_values {
        match PortValue::from_json(value) {
            Some(v) => {
                variables.insert(name.clone(), v);
            }
            None => debug!("参数 {} 不是标量,不作为变量", name),
        }
    }
    variables
}

/// 规则实例管理器
#[derive(Debug)]
pub struct InstanceManager {
    repository: Arc<dyn RuleRepository>,
    /// 每个实例一把公平锁,保证同一实例的执行串行且按到达顺序
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl InstanceManager {
    pub fn new(repository: Arc<dyn RuleRepository>) -> Self {
        Self {
            repository,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// 把模板绑定到拥有者
    ///
    /// 参数不满足约束返回 `InvalidParameter`; 代入参数后模板校验失败返回 `TemplateInvalid`
    pub async fn attach(
        &self,
        validator: &GraphValidator<'_>,
        template: &RuleTemplate,
        owner: OwnerRef,
        parameter_values: Map<String, Value>,
    ) -> Result<RuleInstance, RuleError> {
        let bound = bind_parameters(template, parameter_values)?;
        let variables = merge_variables(&template.graph, &bound);
        let validation = validator.validate_with(&template.graph, &variables);
        if !validation.valid {
            return Err(RuleError::TemplateInvalid(format!(
                "模板 {} 校验失败: {}",
                template.name,
                validation.error_summary()
            )));
        }
        for warning in &validation.warnings {
            debug!("模板 {} 校验警告: {}", template.name, warning.message);
        }

        let instance = RuleInstance::new(template.id, owner, bound);
        self.repository.save_instance(&instance).await?;
        info!(
            "模板 {} 已绑定到 {}:{}, 实例 {}",
            template.name, instance.owner.kind, instance.owner.id, instance.id
        );
        Ok(instance)
    }

    pub async fn get(&self, id: Uuid) -> Result<RuleInstance, RuleError> {
        self.repository
            .load_instance(id)
            .await?
            .ok_or(RuleError::InstanceNotFound(id))
    }

    pub async fn activate(&self, id: Uuid) -> Result<RuleInstance, RuleError> {
        let (_guard, mut instance) = self.lock_existing(id).await?;
        if !instance.is_active {
            instance.is_active = true;
            instance.activated_at = Some(Utc::now());
            instance.deactivated_at = None;
            self.repository.save_instance(&instance).await?;
        }
        Ok(instance)
    }

    pub async fn deactivate(&self, id: Uuid) -> Result<RuleInstance, RuleError> {
        let (_guard, mut instance) = self.lock_existing(id).await?;
        if instance.is_active {
            Self::mark_inactive(&mut instance, Utc::now());
            self.repository.save_instance(&instance).await?;
        }
        Ok(instance)
    }

    /// 解除绑定: 先停用再删除
    pub async fn detach(&self, id: Uuid) -> Result<RuleInstance, RuleError> {
        let instance = self.deactivate(id).await?;
        self.repository.delete_instance(id).await?;
        self.locks.lock().await.remove(&id);
        info!("实例 {} 已解除绑定", id);
        Ok(instance)
    }

    pub async fn set_expiry(
        &self,
        id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<RuleInstance, RuleError> {
        let (_guard, mut instance) = self.lock_existing(id).await?;
        instance.expires_at = expires_at;
        self.repository.save_instance(&instance).await?;
        Ok(instance)
    }

    /// 替换实例上持续存在的状态,执行时并入拥有者的状态集合
    pub async fn set_conditions<I, S>(&self, id: Uuid, conditions: I) -> Result<RuleInstance, RuleError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (_guard, mut instance) = self.lock_existing(id).await?;
        instance.active_conditions = conditions.into_iter().map(Into::into).collect();
        self.repository.save_instance(&instance).await?;
        debug!("实例 {} 的持续状态: {:?}", id, instance.active_conditions);
        Ok(instance)
    }

    /// 停用所有已过期的活动实例,返回本次停用的实例ID; 重复调用无副作用
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, RuleError> {
        let candidates: Vec<Uuid> = self
            .repository
            .list_instances(None)
            .await?
            .into_iter()
            .filter(|i| i.is_active && i.is_expired(now))
            .map(|i| i.id)
            .collect();

        let mut swept = Vec::new();
        for id in candidates {
            // 与该实例的执行互斥
            let (_guard, mut instance) = match self.lock_existing(id).await {
                Ok(locked) => locked,
                Err(RuleError::InstanceNotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            if self.expire_if_due(&mut instance, now).await? {
                swept.push(id);
            }
        }
        if !swept.is_empty() {
            info!("清理过期实例 {} 个", swept.len());
        }
        Ok(swept)
    }

    /// 启动周期清理任务
    pub fn spawn_expiry_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep_expired(Utc::now()).await {
                    warn!("清理过期实例失败: {}", e);
                }
            }
        })
    }

    /// 成功执行后使用次数加一
    pub async fn record_usage(&self, instance: &mut RuleInstance) -> Result<u64, RuleError> {
        instance.usage_count += 1;
        self.repository.save_instance(instance).await?;
        Ok(instance.usage_count)
    }

    pub async fn instances_for_owner(&self, owner: &OwnerRef) -> Result<Vec<RuleInstance>, RuleError> {
        self.repository.list_instances(Some(owner)).await
    }

    /// 获取实例的执行令牌; 持有期间同一实例的其他执行和清理排队等待
    async fn lock(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        lock.lock_owned().await
    }

    /// 获取令牌并读取实例; 实例不存在时归还令牌,不留下锁记录
    pub async fn lock_existing(
        &self,
        id: Uuid,
    ) -> Result<(OwnedMutexGuard<()>, RuleInstance), RuleError> {
        let guard = self.lock(id).await;
        match self.repository.load_instance(id).await? {
            Some(instance) => Ok((guard, instance)),
            None => {
                drop(guard);
                self.forget_if_idle(id).await;
                Err(RuleError::InstanceNotFound(id))
            }
        }
    }

    /// 当前登记的实例锁数量
    pub async fn lock_count(&self) -> usize {
        self.locks.lock().await.len()
    }

    /// 没有其他任务持有或等待时移除锁记录
    async fn forget_if_idle(&self, id: Uuid) {
        let mut locks = self.locks.lock().await;
        if locks.get(&id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&id);
        }
    }

    /// 调用方须已持有该实例的令牌
    pub(crate) async fn expire_if_due(
        &self,
        instance: &mut RuleInstance,
        now: DateTime<Utc>,
    ) -> Result<bool, RuleError> {
        if !instance.is_active || !instance.is_expired(now) {
            return Ok(false);
        }
        Self::mark_inactive(instance, now);
        self.repository.save_instance(instance).await?;
        debug!("实例 {} 已过期,停用", instance.id);
        Ok(true)
    }

    fn mark_inactive(instance: &mut RuleInstance, now: DateTime<Utc>) {
        instance.is_active = false;
        instance.deactivated_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Parameter, ParameterType};
    use serde_json::json;

    fn template() -> RuleTemplate {
        RuleTemplate::new("fireball", RuleGraph::new("fireball"))
            .with_parameter(Parameter::new("damage", ParameterType::Dice).with_default("8d6"))
            .with_parameter(
                Parameter::new("radius", ParameterType::Integer)
                    .with_range(Some(5.0), Some(60.0))
                    .required(),
            )
    }

    #[test]
    fn defaults_fill_missing_values() {
        let bound = bind_parameters(&template(), json!({ "radius": 20 }).as_object().unwrap().clone())
            .unwrap();
        assert_eq!(bound["damage"], json!("8d6"));
        assert_eq!(bound["radius"], json!(20));
    }

    #[test]
    fn constraint_violations_are_rejected() {
        let cases = [
            json!({ "radius": 100 }),
            json!({ "radius": 20, "damage": "lots" }),
            json!({}),
            json!({ "radius": 20, "color": "red" }),
        ];
        for case in cases {
            let result = bind_parameters(&template(), case.as_object().unwrap().clone());
            assert!(
                matches!(result, Err(RuleError::InvalidParameter { .. })),
                "{:?}",
                case
            );
        }
    }
}
