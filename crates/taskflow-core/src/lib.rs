//! taskflow-core
//!
//! Task ingestion: an HTTP endpoint that writes each submitted task to the
//! `tasks` table with bounded retry, plus a consumer for the table's change
//! feed.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（TaskRequest, StoredTask, AttemptRecord, errors）
//! - **config**: 接続文字列の解析とサービス設定
//! - **ports**: 抽象化レイヤー（TaskStore）
//! - **impls**: TaskStore の実装（in-memory, PostgreSQL）
//! - **ingest**: エンドポイントとリトライつき永続化
//! - **change_feed**: 変更フィードのログ出力
//! - **http**: axum ルーター
//! - **observability**: tracing の初期化

pub mod change_feed;
pub mod config;
pub mod domain;
pub mod http;
pub mod impls;
pub mod ingest;
pub mod observability;
pub mod ports;
