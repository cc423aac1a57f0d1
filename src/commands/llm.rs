use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use dashmap::mapref::entry::Entry;
use futures_util::StreamExt; // 用于处理流式数据
use std::convert::Infallible;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::book::system_prompt;
use crate::error::RelayError;
use crate::framing::{encode_fragment, LineBuffer, DONE_FRAME};
use crate::models::*;
use crate::{ActiveStream, AppState};

/// 会话 ID 的最大长度
const MAX_CONVERSATION_ID_LEN: usize = 128;

/// 上游 SSE 中的一行解析结果
#[derive(Debug, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// 一个增量文本片段
    Delta(String),
    /// `data: [DONE]`
    Done,
    /// 流中途出现的错误对象
    Failed(String),
    /// 空行、注释、心跳或无法解析的数据
    Skip,
}

/// 解析每行数据: data: {"choices":[{"delta":{"content":"..."}}]}
pub fn parse_upstream_line(line: &str) -> UpstreamEvent {
    let line = line.trim();
    let Some(payload) = line.strip_prefix("data:") else {
        return UpstreamEvent::Skip;
    };
    let payload = payload.trim_start();

    if payload == "[DONE]" {
        return UpstreamEvent::Done;
    }

    let Ok(val) = serde_json::from_str::<serde_json::Value>(payload) else {
        return UpstreamEvent::Skip;
    };

    // 部分兼容服务在正常分块里也带 "error": null
    if let Some(err) = val.get("error").filter(|e| !e.is_null()) {
        return UpstreamEvent::Failed(upstream_error_text(err));
    }

    match val["choices"][0]["delta"]["content"].as_str() {
        Some(content) if !content.is_empty() => UpstreamEvent::Delta(content.to_string()),
        _ => UpstreamEvent::Skip,
    }
}

fn upstream_error_text(err: &serde_json::Value) -> String {
    err.get("message")
        .and_then(|m| m.as_str())
        .or_else(|| err.as_str())
        .unwrap_or("API Error")
        .to_string()
}

/// 构造发往模型的消息列表：固定的系统指令在最前面，且只出现一次，后面是调用方的完整历史。
pub fn build_api_messages(history: &[Message]) -> Vec<ApiMessage<'_>> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(ApiMessage {
        role: "system",
        content: system_prompt(),
    });
    messages.extend(history.iter().map(|m| ApiMessage {
        role: m.role.as_str(),
        content: &m.content,
    }));
    messages
}

/// 校验请求体：历史不能为空，且最后一条必须是非空的用户消息。
pub fn validate_request(request: &ChatRequest) -> Result<(), RelayError> {
    match request.messages.last() {
        None => return Err(RelayError::InvalidRequest("messages vazio".into())),
        Some(last) if last.role != Role::User => {
            return Err(RelayError::InvalidRequest(
                "a última mensagem deve ser do usuário".into(),
            ))
        }
        Some(last) if last.content.trim().is_empty() => {
            return Err(RelayError::InvalidRequest("mensagem vazia".into()))
        }
        Some(_) => {}
    }

    if let Some(id) = &request.conversation_id {
        let valid = !id.is_empty()
            && id.len() <= MAX_CONVERSATION_ID_LEN
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(RelayError::InvalidRequest("conversation_id inválido".into()));
        }
    }
    Ok(())
}

/// 中继任务的结束方式，只用于日志
enum RelayOutcome {
    /// 收到上游 [DONE] 并已发出结束标记
    Completed { fragments: usize },
    /// 下游连接已关闭，停止读取上游
    ClientGone { fragments: usize },
}

/// 核心函数：调用 LLM 并分块回传结果（流式输出）
///
/// `POST /api/chat`
pub async fn chat_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, RelayError> {
    let Json(request) = payload.map_err(|e| RelayError::InvalidRequest(e.body_text()))?;

    // 1. 先检查密钥，缺失时不发起任何网络请求
    let api_key = state.config.credential()?.to_string();
    validate_request(&request)?;

    let conversation_id = request
        .conversation_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let stream_id = Uuid::new_v4();

    // 2. 响应头在上游返回成功状态之后才发送，失败走 JSON 错误
    let (head_tx, head_rx) = oneshot::channel::<Result<(), RelayError>>();
    let (frame_tx, frame_rx) = mpsc::unbounded_channel::<String>();

    let span = info_span!(
        "chat",
        conversation_id = %conversation_id,
        turns = request.messages.len()
    );

    // 3. 同一会话同一时间只允许一个回答，已有任务时直接拒绝而不是排队
    match state.streams.0.entry(conversation_id.clone()) {
        Entry::Occupied(_) => {
            warn!(conversation_id = %conversation_id, "rejected: stream already in flight");
            return Err(RelayError::ConversationBusy(conversation_id));
        }
        Entry::Vacant(slot) => {
            let task_state = state.clone();
            let task_key = conversation_id.clone();
            let task = tokio::spawn(
                async move {
                    let result =
                        relay_upstream(&task_state, &api_key, &request.messages, head_tx, frame_tx)
                            .await;
                    match result {
                        Ok(RelayOutcome::Completed { fragments }) => {
                            info!(fragments, "stream completed")
                        }
                        Ok(RelayOutcome::ClientGone { fragments }) => {
                            info!(fragments, "client disconnected, upstream dropped")
                        }
                        Err(e) => warn!(error = %e, "stream failed"),
                    }
                    // 任务完成后，从全局状态中移除自己的 handle
                    task_state
                        .streams
                        .0
                        .remove_if(&task_key, |_, active| active.stream_id == stream_id);
                }
                .instrument(span),
            );
            slot.insert(ActiveStream { stream_id, task });
        }
    }

    // 4. 等待上游的响应状态
    match head_rx.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e),
        // 任务在上游响应前被 stop 掉了
        Err(_) => return Err(RelayError::Transport("requisição cancelada".into())),
    }

    let frames = futures_util::stream::unfold(frame_rx, |mut rx| async move {
        rx.recv().await.map(|frame| (Ok::<_, Infallible>(frame), rx))
    });

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream; charset=utf-8".to_string()),
            (header::CACHE_CONTROL, "no-cache".to_string()),
            (header::HeaderName::from_static("x-conversation-id"), conversation_id),
        ],
        Body::from_stream(frames),
    )
        .into_response())
}

/// 发起上游请求并把片段逐个转发到 `frame_tx`。
///
/// 返回 `Err` 时不会发送结束标记，客户端据此判断为异常中断。
async fn relay_upstream(
    state: &AppState,
    api_key: &str,
    history: &[Message],
    head_tx: oneshot::Sender<Result<(), RelayError>>,
    frame_tx: mpsc::UnboundedSender<String>,
) -> Result<RelayOutcome, RelayError> {
    let config = &state.config;
    let body = CompletionRequest {
        model: &config.model,
        messages: build_api_messages(history),
        stream: true,
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    };

    let sent = state
        .http
        .post(config.chat_completions_url())
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await;

    let response = match sent {
        Ok(r) => r,
        Err(e) => {
            let message = e.to_string();
            let _ = head_tx.send(Err(RelayError::Transport(message.clone())));
            return Err(RelayError::Transport(message));
        }
    };

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|v| v.get("error").map(upstream_error_text))
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("erro").to_string());
        let _ = head_tx.send(Err(RelayError::Upstream {
            status: status.as_u16(),
            message: message.clone(),
        }));
        return Err(RelayError::Upstream {
            status: status.as_u16(),
            message,
        });
    }

    if head_tx.send(Ok(())).is_err() {
        // 调用方已经不在了
        return Ok(RelayOutcome::ClientGone { fragments: 0 });
    }

    // 获取响应字节流
    let mut stream = response.bytes_stream();
    let mut lines = LineBuffer::default();
    let mut fragments = 0usize;

    loop {
        let item = tokio::select! {
            // 下游断开（用户取消或关闭页面）时立即停止读取上游
            _ = frame_tx.closed() => return Ok(RelayOutcome::ClientGone { fragments }),
            item = stream.next() => item,
        };

        let Some(item) = item else {
            break;
        };
        let chunk = item?;

        for line in lines.push(&chunk) {
            match parse_upstream_line(&line) {
                UpstreamEvent::Delta(text) => {
                    // 将解析出的片段实时推送到前端
                    if frame_tx.send(encode_fragment(&text)).is_err() {
                        return Ok(RelayOutcome::ClientGone { fragments });
                    }
                    fragments += 1;
                }
                UpstreamEvent::Done => {
                    let _ = frame_tx.send(DONE_FRAME.to_string());
                    return Ok(RelayOutcome::Completed { fragments });
                }
                UpstreamEvent::Failed(message) => return Err(RelayError::Transport(message)),
                UpstreamEvent::Skip => {}
            }
        }
    }

    if let Some(line) = lines.finish() {
        if parse_upstream_line(&line) == UpstreamEvent::Done {
            let _ = frame_tx.send(DONE_FRAME.to_string());
            return Ok(RelayOutcome::Completed { fragments });
        }
    }

    Err(RelayError::Transport(
        "o provedor encerrou a conexão antes de [DONE]".into(),
    ))
}

/// 停止函数：用户点击“停止生成”或清空对话时调用
///
/// `POST /api/chat/stop`，重复调用没有副作用。
pub async fn stop_handler(
    State(state): State<AppState>,
    payload: Result<Json<StopRequest>, JsonRejection>,
) -> Result<StatusCode, RelayError> {
    let Json(request) = payload.map_err(|e| RelayError::InvalidRequest(e.body_text()))?;

    // 从状态中取出对应的任务句柄并执行 abort() 强制停止任务
    if let Some((_, active)) = state.streams.0.remove(&request.conversation_id) {
        active.task.abort();
        info!(conversation_id = %request.conversation_id, "stream stopped by client");
    }
    Ok(StatusCode::NO_CONTENT)
}
