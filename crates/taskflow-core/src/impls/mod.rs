//! Impls - TaskStore の実装
//!
//! - memory: テスト・ローカル実行用（障害注入つき）
//! - postgres: 本番用（試行ごとに接続を開閉）＋ LISTEN/NOTIFY の変更フィード

pub mod memory;
pub mod postgres;


pub use self::memory::{Fault, InMemoryTaskStore};
pub use self::postgres::{PostgresChangeFeed, PostgresTaskStore};
