//! TaskStore port - タスク行の永続化
//!
//! 1 回の呼び出し = 1 回の試行：
//! 接続 → INSERT（パラメータ化）→ COMMIT → 切断
//!
//! リトライはこの trait の外（`ingest::persist`）で行う。

use async_trait::async_trait;

use crate::config::{ConnectTimeouts, ConnectionDescriptor};
use crate::domain::{StoreError, StoredTask};

/// Persistence adapter for the task table.
///
/// # 設計原則
/// - 呼び出しごとにステートレス（接続は試行ごとに開いて閉じる）
/// - 取得した接続はどの終了パスでも解放する
/// - INSERT と COMMIT は原子的：失敗した試行の行は読み手から見えない
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Run one persist attempt and return the committed row.
    async fn insert_task(
        &self,
        descriptor: &ConnectionDescriptor,
        timeouts: ConnectTimeouts,
        payload: &str,
    ) -> Result<StoredTask, StoreError>;

    fn backend_name(&self) -> &'static str;
}
