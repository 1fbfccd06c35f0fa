//! # BlockingQueryExecutor：阻塞读取协议
//!
//! ## 意图（Why）
//! - 客户端带着上次见到的版本令牌发起查询，期望在“有更新的数据”或“等待预算耗尽”时才返回，
//!   从而用一次长轮询代替高频轮询；
//! - 整个查询链路中只有这里会挂起，且挂起点只有一个：快照附带的 [`ChangeWatch`]。
//!
//! ## 契约（What）
//! 1. 调用读取函数；失败立即返回，不重试；
//! 2. `min_version == 0`、快照版本大于 `min_version`、或等待预算已耗尽时返回本次快照；
//! 3. 否则在剩余预算内等待订阅句柄，然后回到第 1 步重读（无论唤醒还是超时）。
//!
//! - 至少读取一次；总时延以 `max_wait` 加一次读取为上界；
//! - “超时”与“新数据”只能通过返回的版本区分；
//! - 调用方取消（[`CancellationToken`]）会立即打断挂起中的等待，返回 `Cancelled`。

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    error::{HealthError, StoreError},
    model::VersionToken,
    store::Snapshot,
};

/// 阻塞读取的结果：快照版本与记录。
#[derive(Clone, Debug, PartialEq)]
pub struct Observed<R> {
    pub version: VersionToken,
    pub records: Vec<R>,
}

/// 阻塞查询执行器。
#[derive(Clone, Copy, Debug)]
pub struct BlockingQueryExecutor {
    operation: &'static str,
}

impl BlockingQueryExecutor {
    /// `operation` 用于日志与取消错误。
    pub fn new(operation: &'static str) -> Self {
        Self { operation }
    }

    /// 执行阻塞读取。
    ///
    /// - **输入 (Inputs)**：`read` 每次调用都必须返回一份新的一致快照及其订阅句柄；
    /// - **前置条件**：`max_wait` 已由调用方按配置截断；
    /// - **后置条件**：返回的版本即记录被读取时的存储版本。
    pub async fn run<R, F>(
        &self,
        min_version: VersionToken,
        max_wait: Duration,
        cancel: &CancellationToken,
        mut read: F,
    ) -> Result<Observed<R>, HealthError>
    where
        F: FnMut() -> Result<Snapshot<R>, StoreError>,
    {
        let deadline = Instant::now() + max_wait;
        let mut reads = 0_u32;
        loop {
            let Snapshot {
                version,
                records,
                mut watch,
            } = read()?;
            reads += 1;
            debug!(
                operation = self.operation,
                %version,
                min_version = %min_version,
                reads,
                records = records.len(),
                "snapshot read"
            );

            if min_version.is_zero() || version > min_version {
                return Ok(Observed { version, records });
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(
                    operation = self.operation,
                    %version,
                    reads,
                    "wait budget exhausted, returning current snapshot"
                );
                return Ok(Observed { version, records });
            }

            let remaining = deadline - now;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(operation = self.operation, reads, "blocking query cancelled");
                    return Err(HealthError::Cancelled { operation: self.operation });
                }
                fired = watch.wait(remaining) => {
                    debug!(
                        operation = self.operation,
                        fired,
                        remaining_ms = remaining.as_millis() as u64,
                        "watch woke"
                    );
                }
            }
        }
    }
}
