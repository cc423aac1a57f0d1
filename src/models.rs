//! # 数据模型模块
//!
//! 该模块定义了应用程序中使用的核心数据结构，涵盖了对话消息、
//! 中继接口的请求/响应体、流式片段、上游模型 API 的请求格式以及书籍元数据。
//!
//! 主要配合 `serde` 库进行 JSON 数据解析，浏览器、终端客户端与中继服务共用同一套定义。

use serde::{Deserialize, Serialize};

/// 消息发送者的角色。
///
/// 对话历史中只允许出现用户与助手两种角色，系统指令由中继自行添加。
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// 代表对话中的一条消息。
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// 消息发送者的角色。
    pub role: Role,
    /// 消息的正文内容。
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// `POST /api/chat` 的请求体。
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ChatRequest {
    /// 完整的对话历史，最后一条必须是用户消息。
    pub messages: Vec<Message>,
    /// 会话 ID，用于“停止生成”以及同一会话的并发检查。
    /// 缺省时由服务端生成。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// `POST /api/chat/stop` 的请求体。
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StopRequest {
    pub conversation_id: String,
}

/// 流式输出时发送给前端的单个文本片段，序列化后为 `{"text": "..."}`。
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Fragment {
    pub text: String,
}

/// 非流式错误响应体。
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ErrorBody {
    pub error: String,
}

/// 发往上游模型 API 的单条消息（OpenAI chat-completions 格式）。
#[derive(Serialize, Clone, Debug)]
pub struct ApiMessage<'a> {
    pub role: &'a str,
    pub content: &'a str,
}

/// 上游模型 API 的请求体，始终开启 stream 模式。
#[derive(Serialize, Clone, Debug)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ApiMessage<'a>>,
    pub stream: bool,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// 书籍的基础信息。
///
/// 字段顺序即系统提示词中 JSON 的输出顺序。
#[derive(Serialize, Clone, Debug)]
pub struct BookMetadata {
    pub title: &'static str,
    pub subtitle: &'static str,
    pub author: &'static str,
    pub year: u16,
    pub publisher: &'static str,
    pub isbn: &'static str,
    /// 免费 PDF 的下载地址。
    pub url: &'static str,
    pub languages: &'static [&'static str],
    pub description: &'static str,
}

/// 目录中的一个部分及其下属章节。
#[derive(Serialize, Clone, Debug)]
pub struct BookPart {
    pub part: &'static str,
    pub title: &'static str,
    pub chapters: &'static [&'static str],
}

/// `GET /api/book` 的响应体。
#[derive(Serialize, Clone, Debug)]
pub struct BookResponse {
    pub metadata: &'static BookMetadata,
    pub structure: &'static [BookPart],
}

/// `GET /api/questions` 的响应体。
#[derive(Serialize, Clone, Debug)]
pub struct QuestionsResponse {
    pub lang: crate::book::Language,
    pub placeholder: &'static str,
    pub questions: &'static [&'static str],
}
