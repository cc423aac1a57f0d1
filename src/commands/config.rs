use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::RelayError;

/// 配置文件所在的子目录名
const CONFIG_DIR_NAME: &str = "book-assistant";

/// 日志输出格式
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// 应用程序的全局配置。
///
/// 优先级从低到高：默认值、config.json、`.env`、进程环境变量。
#[derive(Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    /// 上游 API 服务基地址（OpenAI 兼容）。
    #[serde(rename = "apiUrl")]
    pub api_url: String,
    /// API 访问密钥。缺失时服务照常启动，由每个聊天请求报告配置错误。
    #[serde(rename = "apiKey", skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(rename = "defaultModel")]
    pub model: String,
    pub temperature: f32,
    #[serde(rename = "maxTokens")]
    pub max_tokens: u32,
    /// HTTP 监听地址。
    #[serde(rename = "bindAddr")]
    pub bind_addr: String,
    #[serde(rename = "logFormat")]
    pub log_format: LogFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".into(),
            api_key: None,
            model: "gpt-4o".into(),
            temperature: 0.7,
            max_tokens: 1500,
            bind_addr: "127.0.0.1:3000".into(),
            log_format: LogFormat::Text,
        }
    }
}

// 手写 Debug，避免把密钥打进日志
impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("bind_addr", &self.bind_addr)
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl AppConfig {
    /// 从配置文件（可选）和环境变量读取配置。
    ///
    /// `env` 抽象了环境变量的读取，测试里可以传入固定的映射。
    pub fn load(
        path: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<AppConfig, String> {
        // 1. 配置文件存在则读取，否则从默认值开始
        let mut config = match path {
            Some(p) if p.exists() => {
                let content = fs::read_to_string(p)
                    .map_err(|e| format!("failed to read {}: {}", p.display(), e))?;
                serde_json::from_str(&content)
                    .map_err(|e| format!("invalid config {}: {}", p.display(), e))?
            }
            _ => AppConfig::default(),
        };

        // 2. 环境变量覆盖
        if let Some(key) = env("OPENAI_API_KEY") {
            config.api_key = Some(key);
        }
        if let Some(url) = env("OPENAI_BASE_URL") {
            config.api_url = url;
        }
        if let Some(model) = env("OPENAI_MODEL") {
            config.model = model;
        }
        if let Some(bind) = env("BOOK_ASSISTANT_BIND") {
            config.bind_addr = bind;
        }
        if let Some(format) = env("BOOK_ASSISTANT_LOG_FORMAT") {
            config.log_format = match format.trim().to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" => LogFormat::Text,
                other => return Err(format!("unknown log format: {other}")),
            };
        }

        // 3. 空白密钥等同于未配置
        config.api_key = config
            .api_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        Ok(config)
    }

    /// 返回 API 密钥；未配置时返回配置错误。
    pub fn credential(&self) -> Result<&str, RelayError> {
        self.api_key.as_deref().ok_or(RelayError::MissingCredential)
    }

    /// 安全处理 URL，确保以 /chat/completions 结尾
    pub fn chat_completions_url(&self) -> String {
        let base = self.api_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{}/chat/completions", base)
        }
    }
}

/// 配置文件路径：`BOOK_ASSISTANT_CONFIG` 指定的路径，
/// 否则为系统配置目录下的 `book-assistant/config.json`。
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("BOOK_ASSISTANT_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let mut path = dirs::config_dir()?;
    path.push(CONFIG_DIR_NAME);
    path.push("config.json");
    Some(path)
}

/// 读取应用程序配置（进程入口使用）。
pub fn load_app_config() -> Result<AppConfig, String> {
    // .env 不存在是正常情况
    dotenvy::dotenv().ok();
    let path = config_file_path();
    AppConfig::load(path.as_deref(), |key| std::env::var(key).ok())
}
