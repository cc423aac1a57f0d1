//! 错误类型。
//!
//! `RelayError` 是中继服务端的错误，直接转换为 `{"error": "..."}` 形式的 JSON 响应；
//! `ClientError` 是终端/测试客户端读取流时的错误。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::models::ErrorBody;

#[derive(Debug, Error)]
pub enum RelayError {
    /// 未配置上游模型服务的 API 密钥。在发起任何网络请求之前检测。
    #[error("OPENAI_API_KEY não configurada")]
    MissingCredential,

    #[error("Requisição inválida: {0}")]
    InvalidRequest(String),

    /// 同一会话已有一个回答正在生成。
    #[error("Já existe uma resposta em andamento para a conversa {0}")]
    ConversationBusy(String),

    /// 上游返回了非 2xx 状态。
    #[error("Erro do provedor ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("Falha de conexão com o provedor: {0}")]
    Transport(String),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::MissingCredential => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::ConversationBusy(_) => StatusCode::CONFLICT,
            RelayError::Upstream { .. } | RelayError::Transport(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        RelayError::Transport(e.to_string())
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.to_string(),
        });
        (self.status(), body).into_response()
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    /// 中继返回了非 2xx 状态，`message` 取自响应体的 `error` 字段。
    #[error("{message}")]
    Status { status: u16, message: String },

    #[error("{0}")]
    Transport(String),

    /// 连接在收到结束标记之前就关闭了。
    #[error("A conexão foi interrompida antes do fim da resposta")]
    Dropped,

    /// 用户主动取消，不向界面展示。
    #[error("cancelled")]
    Cancelled,
}

impl ClientError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::Cancelled)
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Transport(e.to_string())
    }
}
