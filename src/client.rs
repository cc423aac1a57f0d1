//! 中继客户端与对话状态。
//!
//! `RelayClient` 负责读取 `/api/chat` 的流；`ChatSession` 持有界面状态
//! （消息列表、当前语言、进行中的回答和错误信息），终端客户端和测试都通过它驱动对话。

use futures_util::StreamExt;
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::book::Language;
use crate::error::ClientError;
use crate::framing::{Frame, FrameDecoder};
use crate::models::{ChatRequest, ErrorBody, Message, StopRequest};

/// 错误提示后面附加的重试建议
pub const RETRY_HINT: &str = "Verifique se a API key está configurada e tente novamente.";

/// 中继服务的 HTTP 客户端
#[derive(Clone)]
pub struct RelayClient {
    http: reqwest::Client,
    base_url: String,
}

impl RelayClient {
    /// `base_url` 形如 `http://127.0.0.1:3000`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// 发送完整历史并读取流式回答。
    ///
    /// 每收到一个片段调用一次 `on_fragment`；收到结束标记后返回拼接好的完整文本。
    /// 没有结束标记就断开返回 `Dropped`，令牌被取消返回 `Cancelled`。
    pub async fn stream_reply(
        &self,
        history: &[Message],
        conversation_id: Option<&str>,
        cancel: &CancellationToken,
        mut on_fragment: impl FnMut(&str),
    ) -> Result<String, ClientError> {
        let request = ChatRequest {
            messages: history.to_vec(),
            conversation_id: conversation_id.map(str::to_string),
        };
        let send = self.http.post(self.url("/api/chat")).json(&request).send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            response = send => response?,
        };

        // 非 2xx 不会打开流，错误信息取自 JSON 的 error 字段
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .json::<ErrorBody>()
                .await
                .map(|body| body.error)
                .unwrap_or_else(|_| format!("Erro {status}"));
            return Err(ClientError::Status { status, message });
        }

        let mut stream = response.bytes_stream();
        let mut decoder = FrameDecoder::default();
        let mut accumulated = String::new();

        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                item = stream.next() => item,
            };
            let Some(item) = item else {
                break;
            };
            let chunk = item?;

            for frame in decoder.push(&chunk) {
                match frame {
                    Frame::Fragment(text) => {
                        if !text.is_empty() {
                            accumulated.push_str(&text);
                            on_fragment(&text);
                        }
                    }
                    Frame::Done => return Ok(accumulated),
                }
            }
        }

        if decoder.finish() == Some(Frame::Done) {
            return Ok(accumulated);
        }
        Err(ClientError::Dropped)
    }

    /// 通知中继终止某个会话的回答
    pub async fn stop(&self, conversation_id: &str) -> Result<(), ClientError> {
        self.http
            .post(self.url("/api/chat/stop"))
            .json(&StopRequest {
                conversation_id: conversation_id.to_string(),
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// 进行中的回答
#[derive(Debug)]
pub struct StreamState {
    request_id: u64,
    buffer: String,
    cancel: CancellationToken,
}

/// 一次提交产生的请求参数，由调用方交给 `RelayClient`
#[derive(Debug, Clone)]
pub struct PendingTurn {
    pub request_id: u64,
    pub conversation_id: String,
    pub history: Vec<Message>,
    pub cancel: CancellationToken,
}

/// 对话界面的状态
#[derive(Debug)]
pub struct ChatSession {
    messages: Vec<Message>,
    language: Language,
    /// 输入框中尚未提交的文本
    input: String,
    conversation_id: String,
    stream: Option<StreamState>,
    error: Option<String>,
    next_request_id: u64,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            language: Language::default(),
            input: String::new(),
            conversation_id: Uuid::new_v4().to_string(),
            stream: None,
            error: None,
            next_request_id: 1,
        }
    }
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn set_language(&mut self, language: Language) {
        self.language = language;
    }

    pub fn suggested_questions(&self) -> &'static [&'static str] {
        self.language.suggested_questions()
    }

    pub fn placeholder(&self) -> &'static str {
        self.language.placeholder()
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// 有回答正在生成时为 true，此时不接受新的提交
    pub fn is_loading(&self) -> bool {
        self.stream.is_some()
    }

    /// 正在生成的部分回答
    pub fn streaming_text(&self) -> Option<&str> {
        self.stream.as_ref().map(|s| s.buffer.as_str())
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// 提交一条用户消息。
    ///
    /// 内容为空或已有回答在进行时返回 `None`，状态不变。
    pub fn begin_submit(&mut self, content: &str) -> Option<PendingTurn> {
        let content = content.trim();
        if content.is_empty() || self.is_loading() {
            return None;
        }

        self.messages.push(Message::user(content));
        self.error = None;

        let request_id = self.next_request_id;
        self.next_request_id += 1;
        let cancel = CancellationToken::new();
        self.stream = Some(StreamState {
            request_id,
            buffer: String::new(),
            cancel: cancel.clone(),
        });

        Some(PendingTurn {
            request_id,
            conversation_id: self.conversation_id.clone(),
            history: self.messages.clone(),
            cancel,
        })
    }

    /// 提交输入框中的文本，被接受后清空输入框
    pub fn submit_input(&mut self) -> Option<PendingTurn> {
        let input = std::mem::take(&mut self.input);
        let turn = self.begin_submit(&input);
        if turn.is_none() {
            self.input = input;
        }
        turn
    }

    /// 点击推荐问题，下标越界时返回 `None`
    pub fn select_suggestion(&mut self, index: usize) -> Option<PendingTurn> {
        let question = self.suggested_questions().get(index)?;
        self.begin_submit(question)
    }

    pub fn push_fragment(&mut self, request_id: u64, text: &str) {
        if let Some(stream) = self.stream.as_mut() {
            if stream.request_id == request_id {
                stream.buffer.push_str(text);
            }
        }
    }

    /// 结束一次请求。
    ///
    /// 成功时把完整文本作为助手消息提交；用户取消不产生任何消息或错误；
    /// 其他错误丢弃已收到的部分文本并记录错误提示。已被取消的旧请求结果直接忽略。
    pub fn finish(&mut self, request_id: u64, result: Result<String, ClientError>) {
        match &self.stream {
            Some(stream) if stream.request_id == request_id => {}
            _ => return,
        }
        self.stream = None;

        match result {
            Ok(text) => self.messages.push(Message::assistant(text)),
            Err(ClientError::Cancelled) => {}
            Err(e) => self.error = Some(format!("{}. {}", e, RETRY_HINT)),
        }
    }

    /// 取消进行中的回答，返回是否确实取消了一个请求
    pub fn cancel(&mut self) -> bool {
        match self.stream.take() {
            Some(stream) => {
                stream.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// 清空对话：取消进行中的请求，清除消息和错误，并换一个新的会话 ID
    pub fn clear(&mut self) {
        self.cancel();
        self.messages.clear();
        self.error = None;
        self.conversation_id = Uuid::new_v4().to_string();
    }
}

fn lock(session: &Mutex<ChatSession>) -> MutexGuard<'_, ChatSession> {
    session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 完整执行一轮对话：提交、读取流、提交结果。
///
/// 提交被拒绝（空内容或已有请求在进行）时返回 `false`。
pub async fn send_message(
    session: &Mutex<ChatSession>,
    client: &RelayClient,
    content: &str,
    on_fragment: impl FnMut(&str),
) -> bool {
    let Some(turn) = lock(session).begin_submit(content) else {
        return false;
    };
    run_turn(session, client, turn, on_fragment).await;
    true
}

/// 读取一次已提交请求的回答，并把结果写回会话
pub async fn run_turn(
    session: &Mutex<ChatSession>,
    client: &RelayClient,
    turn: PendingTurn,
    mut on_fragment: impl FnMut(&str),
) {
    let result = client
        .stream_reply(
            &turn.history,
            Some(&turn.conversation_id),
            &turn.cancel,
            |text| {
                lock(session).push_fragment(turn.request_id, text);
                on_fragment(text);
            },
        )
        .await;

    if result.as_ref().is_err_and(ClientError::is_cancelled) {
        // 断开连接已足够让中继停止，这里再显式通知一次
        if let Err(e) = client.stop(&turn.conversation_id).await {
            tracing::debug!(error = %e, "stop request failed");
        }
    }

    lock(session).finish(turn.request_id, result);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_while_loading_is_rejected() {
        let mut session = ChatSession::new();
        let first = session.begin_submit("O que é capital improdutivo?");
        assert!(first.is_some());
        assert!(session.begin_submit("Outra pergunta").is_none());
        assert_eq!(session.messages().len(), 1);
    }

    #[test]
    fn empty_input_is_rejected() {
        let mut session = ChatSession::new();
        assert!(session.begin_submit("   ").is_none());
        assert!(!session.is_loading());
    }

    #[test]
    fn fragments_commit_on_success() {
        let mut session = ChatSession::new();
        let turn = session.begin_submit("O que é capital improdutivo?").unwrap();
        assert_eq!(turn.history, vec![Message::user("O que é capital improdutivo?")]);

        session.push_fragment(turn.request_id, "Capital ");
        session.push_fragment(turn.request_id, "improdutivo é...");
        assert_eq!(session.streaming_text(), Some("Capital improdutivo é..."));

        session.finish(turn.request_id, Ok("Capital improdutivo é...".into()));
        assert!(!session.is_loading());
        assert_eq!(
            session.messages().last(),
            Some(&Message::assistant("Capital improdutivo é..."))
        );
    }

    #[test]
    fn cancel_discards_partial_text_without_error() {
        let mut session = ChatSession::new();
        let turn = session.begin_submit("pergunta").unwrap();
        session.push_fragment(turn.request_id, "parcial");

        assert!(session.cancel());
        assert!(turn.cancel.is_cancelled());
        session.finish(turn.request_id, Err(ClientError::Cancelled));

        assert_eq!(session.messages().len(), 1);
        assert!(session.error().is_none());
        assert!(session.streaming_text().is_none());
    }

    #[test]
    fn stale_completion_after_clear_is_ignored() {
        let mut session = ChatSession::new();
        let old_id = session.conversation_id().to_string();
        let turn = session.begin_submit("pergunta").unwrap();
        session.clear();
        session.finish(turn.request_id, Ok("tarde demais".into()));

        assert!(session.messages().is_empty());
        assert!(session.error().is_none());
        assert_ne!(session.conversation_id(), old_id);
    }

    #[test]
    fn failure_sets_error_and_keeps_no_partial() {
        let mut session = ChatSession::new();
        let turn = session.begin_submit("pergunta").unwrap();
        session.push_fragment(turn.request_id, "meia resposta");
        session.finish(turn.request_id, Err(ClientError::Dropped));

        assert_eq!(session.messages().len(), 1);
        let error = session.error().unwrap();
        assert!(error.ends_with(RETRY_HINT));

        // 出错后可以再次提交
        assert!(session.begin_submit("de novo").is_some());
        assert!(session.error().is_none());
    }

    #[test]
    fn input_cleared_only_when_accepted() {
        let mut session = ChatSession::new();
        session.set_input("  ");
        assert!(session.submit_input().is_none());

        session.set_input("O que é financeirização?");
        let turn = session.submit_input().unwrap();
        assert_eq!(session.input(), "");
        assert_eq!(turn.history, vec![Message::user("O que é financeirização?")]);

        // 回答进行中，输入保留
        session.set_input("próxima");
        assert!(session.submit_input().is_none());
        assert_eq!(session.input(), "próxima");
    }

    #[test]
    fn suggestions_follow_language() {
        let mut session = ChatSession::new();
        session.set_language(Language::Es);
        assert!(session.select_suggestion(99).is_none());
        let turn = session.select_suggestion(0).unwrap();
        assert_eq!(turn.history[0].content, "¿Qué es el capital improductivo?");
    }
}
