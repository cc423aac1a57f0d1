//! 中继与客户端之间的流式分帧协议。
//!
//! 每个事件占一行，以 `data: ` 开头，后面是 `{"text": "..."}` 或结束标记 `[DONE]`，
//! 事件之间用空行分隔。结束标记与传输层的连接关闭是两回事：
//! 没有收到 `[DONE]` 就断开的流一律视为异常中断。

use crate::models::Fragment;

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

/// 正常结束时发送的最后一帧。
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// 解码后的一个下行事件。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Fragment(String),
    Done,
}

/// 把一个文本片段编码为下行事件行。
pub fn encode_fragment(text: &str) -> String {
    let payload = serde_json::json!({ "text": text });
    format!("{}{}\n\n", DATA_PREFIX, payload)
}

/// 解析一行下行事件。
///
/// 不以 `data: ` 开头的行返回 `None`；无法解析的 JSON 同样返回 `None`（静默跳过）。
pub fn decode_line(line: &str) -> Option<Frame> {
    let payload = line.strip_prefix(DATA_PREFIX)?.trim_end();
    if payload == DONE_SENTINEL {
        return Some(Frame::Done);
    }
    serde_json::from_str::<Fragment>(payload)
        .ok()
        .map(|f| Frame::Fragment(f.text))
}

/// 按字节累积分块数据，只在遇到换行时切出完整的行。
///
/// 网络分块可能把一行，甚至一个多字节 UTF-8 字符，拆到两个分块里，
/// 所以这里缓冲原始字节而不是逐块解码成字符串。
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// 追加一个分块，返回其中所有已完整的行（不含换行符和行尾的 `\r`）。
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..pos]);
            lines.push(line.trim_end_matches('\r').to_string());
        }
        lines
    }

    /// 流结束时取出最后一段没有换行结尾的数据。
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&raw).trim_end_matches('\r').to_string())
    }
}

/// 客户端侧的增量解码器：字节分块进，事件出。
#[derive(Debug, Default)]
pub struct FrameDecoder {
    lines: LineBuffer,
}

impl FrameDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.lines
            .push(chunk)
            .iter()
            .filter_map(|line| decode_line(line))
            .collect()
    }

    pub fn finish(&mut self) -> Option<Frame> {
        self.lines.finish().and_then(|line| decode_line(&line))
    }
}
