//! 租户作用域校验契约。
//!
//! - **意图 (Why)**：租户元数据的合法性由外部决定（例如企业版才允许非默认分区），本服务只在边界调用；
//! - **契约 (What)**：校验失败统一表现为 `InvalidRequest`，请求不会被执行。

use crate::{error::HealthError, model::TenantScope};

/// 租户作用域校验器。
pub trait TenantValidator: Send + Sync {
    fn validate(&self, scope: &TenantScope) -> Result<(), HealthError>;
}

/// 仅允许默认分区与默认命名空间。
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultTenantValidator;

impl TenantValidator for DefaultTenantValidator {
    fn validate(&self, scope: &TenantScope) -> Result<(), HealthError> {
        if scope.partition() != TenantScope::DEFAULT {
            return Err(HealthError::invalid_request(format!(
                "partition `{}` is not supported, only `default` is available",
                scope.partition()
            )));
        }
        if scope.namespace() != TenantScope::DEFAULT {
            return Err(HealthError::invalid_request(format!(
                "namespace `{}` is not supported, only `default` is available",
                scope.namespace()
            )));
        }
        Ok(())
    }
}

/// 接受任意作用域，适用于多租户部署由外层完成校验的场景。
#[derive(Clone, Copy, Debug, Default)]
pub struct AnyTenant;

impl TenantValidator for AnyTenant {
    fn validate(&self, _scope: &TenantScope) -> Result<(), HealthError> {
        Ok(())
    }
}
