// src/lib.rs
pub mod book;
pub mod client;
pub mod commands;
pub mod error;
pub mod framing;
pub mod models;
pub mod render;

use dashmap::DashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use commands::config::{load_app_config, AppConfig, LogFormat};

// --- 基础数据结构 ---

/// 一个正在进行的流式回答
pub struct ActiveStream {
    /// 本次任务的唯一标识，任务结束时只移除自己登记的条目
    pub stream_id: Uuid,
    pub task: JoinHandle<()>,
}

/// 正在进行的流任务，键为会话 ID，用于“停止生成”和单会话并发限制
#[derive(Clone, Default)]
pub struct StreamManager(pub Arc<DashMap<String, ActiveStream>>);

impl StreamManager {
    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.0.contains_key(conversation_id)
    }
}

/// 路由共享的状态。书籍内容是静态常量，不在这里。
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub http: reqwest::Client,
    pub streams: StreamManager,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
            http: reqwest::Client::new(),
            streams: StreamManager::default(),
        }
    }
}

/// 初始化日志，级别由 `RUST_LOG` 控制，默认 info
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}

// --- 应用程序入口 ---

pub fn run() -> Result<(), String> {
    let config = load_app_config()?;
    init_tracing(config.log_format);
    info!(?config, "configuration loaded");

    if config.api_key.is_none() {
        // 不阻止启动，每个聊天请求会返回配置错误
        tracing::warn!("OPENAI_API_KEY is not set; /api/chat will answer with a configuration error");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to start runtime: {e}"))?;

    runtime.block_on(commands::server::serve(AppState::new(config)))
}
