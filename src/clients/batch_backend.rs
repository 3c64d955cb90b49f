use async_trait::async_trait;

use crate::clients::wire::{GenerateRequest, JobHandle, JobSnapshot};
use crate::error::RemoteError;

/// 远程批处理服务
///
/// 流水线只依赖这个接口：提交一批请求得到任务句柄，再按句柄查询状态。
/// 成功后的响应必须与提交时的请求顺序一一对应。
#[async_trait]
pub trait BatchBackend: Send + Sync {
    /// 提交一批请求
    async fn create_job(
        &self,
        model: &str,
        display_name: &str,
        requests: &[GenerateRequest],
    ) -> Result<JobHandle, RemoteError>;

    /// 查询任务状态
    async fn job_status(&self, handle: &JobHandle) -> Result<JobSnapshot, RemoteError>;
}
