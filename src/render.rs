//! 助手回答的轻量标记渲染。
//!
//! 规则：空行分隔段落；首行以 `- ` 或 `• ` 开头的段落是列表，每个非空行是一项；
//! `**...**` 为加粗，`*...*` 为斜体。流式中的文本与最终文本使用同一套规则。

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Span {
    Text(String),
    Strong(String),
    Emphasis(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Paragraph(Vec<Span>),
    List(Vec<Vec<Span>>),
}

/// 把文本切分为段落和列表。
pub fn parse_blocks(text: &str) -> Vec<Block> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|para| !para.is_empty())
        .map(|para| {
            if para.starts_with("- ") || para.starts_with("• ") {
                let items = para
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(|l| parse_inline(strip_bullet(l)))
                    .collect();
                Block::List(items)
            } else {
                Block::Paragraph(parse_inline(para))
            }
        })
        .collect()
}

fn strip_bullet(line: &str) -> &str {
    line.strip_prefix('-')
        .or_else(|| line.strip_prefix('•'))
        .unwrap_or(line)
        .trim_start()
}

/// 解析行内强调。没有闭合的 `*` 按普通字符处理。
pub fn parse_inline(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut plain = String::new();
    let mut rest = text;

    while let Some(pos) = rest.find('*') {
        let after = &rest[pos..];
        let (marker, ctor): (&str, fn(String) -> Span) = if after.starts_with("**") {
            ("**", Span::Strong)
        } else {
            ("*", Span::Emphasis)
        };
        let inner_start = pos + marker.len();

        // 非贪婪匹配，且内容至少一个字符
        let closing = rest[inner_start..]
            .char_indices()
            .skip(1)
            .map(|(i, _)| inner_start + i)
            .find(|&i| rest[i..].starts_with(marker));

        match closing {
            Some(end) => {
                plain.push_str(&rest[..pos]);
                if !plain.is_empty() {
                    spans.push(Span::Text(std::mem::take(&mut plain)));
                }
                spans.push(ctor(rest[inner_start..end].to_string()));
                rest = &rest[end + marker.len()..];
            }
            None => {
                plain.push_str(&rest[..inner_start]);
                rest = &rest[inner_start..];
            }
        }
    }

    plain.push_str(rest);
    if !plain.is_empty() {
        spans.push(Span::Text(plain));
    }
    spans
}

/// 渲染为 HTML，文本内容会被转义。
pub fn render_html(text: &str) -> String {
    let mut out = String::new();
    for block in parse_blocks(text) {
        match block {
            Block::Paragraph(spans) => {
                out.push_str("<p>");
                push_html_spans(&mut out, &spans);
                out.push_str("</p>");
            }
            Block::List(items) => {
                out.push_str("<ul>");
                for item in items {
                    out.push_str("<li>");
                    push_html_spans(&mut out, &item);
                    out.push_str("</li>");
                }
                out.push_str("</ul>");
            }
        }
    }
    out
}

fn push_html_spans(out: &mut String, spans: &[Span]) {
    for span in spans {
        match span {
            Span::Text(t) => out.push_str(&html_escape::encode_text(t)),
            Span::Strong(t) => {
                out.push_str("<strong>");
                out.push_str(&html_escape::encode_text(t));
                out.push_str("</strong>");
            }
            Span::Emphasis(t) => {
                out.push_str("<em>");
                out.push_str(&html_escape::encode_text(t));
                out.push_str("</em>");
            }
        }
    }
}

/// 渲染为终端文本（ANSI 粗体/斜体，列表项前加圆点）。
pub fn render_terminal(text: &str) -> String {
    let blocks = parse_blocks(text);
    let mut parts = Vec::with_capacity(blocks.len());
    for block in blocks {
        match block {
            Block::Paragraph(spans) => parts.push(terminal_spans(&spans)),
            Block::List(items) => parts.push(
                items
                    .iter()
                    .map(|item| format!("  • {}", terminal_spans(item)))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
        }
    }
    parts.join("\n\n")
}

fn terminal_spans(spans: &[Span]) -> String {
    spans
        .iter()
        .map(|span| match span {
            Span::Text(t) => t.clone(),
            Span::Strong(t) => format!("\x1b[1m{}\x1b[22m", t),
            Span::Emphasis(t) => format!("\x1b[3m{}\x1b[23m", t),
        })
        .collect()
}
