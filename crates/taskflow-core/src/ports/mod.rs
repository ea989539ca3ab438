//! Ports - 外部システムへの抽象化レイヤー
//!
//! ストアの実装（PostgreSQL, in-memory）は `impls` にあり、
//! ingest はこの trait だけに依存する。

pub mod task_store;

pub use self::task_store::TaskStore;
