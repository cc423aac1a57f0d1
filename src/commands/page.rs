//! 首页：书籍信息卡片、推荐问题、目录和聊天面板。
//!
//! 页面在服务端拼接，聊天部分由内嵌的 `chat.js` 调用 `/api/chat`。

use axum::extract::Query;
use axum::response::Html;
use html_escape::{encode_double_quoted_attribute as attr, encode_text as text};
use std::fmt::Write as _;

use crate::book::{Language, BOOK_METADATA, BOOK_STRUCTURE};
use crate::commands::server::QuestionsQuery;
use crate::render::render_html;

const CHAT_SCRIPT: &str = include_str!("chat.js");

const WELCOME: &str = "Sou um assistente especializado em *A Era do Capital Improdutivo* de Ladislau Dowbor. \
Explico conceitos, analiso argumentos e guio sua leitura.\n\n\
Escolha uma pergunta sugerida ou escreva a sua própria.";

pub async fn landing_handler(Query(query): Query<QuestionsQuery>) -> Html<String> {
    Html(render_landing(Language::from_query(query.lang.as_deref())))
}

/// 拼接首页 HTML
pub fn render_landing(lang: Language) -> String {
    let meta = &BOOK_METADATA;
    let mut html = String::with_capacity(8 * 1024);

    let _ = write!(
        html,
        "<!DOCTYPE html><html lang=\"pt-BR\"><head><meta charset=\"utf-8\">\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
         <title>Assistente de Pesquisa | {title} — {author}</title></head><body>",
        title = text(meta.title),
        author = text(meta.author),
    );

    // 书籍信息
    let _ = write!(
        html,
        "<aside class=\"sidebar\"><section class=\"book-card\"><h1>{title}</h1><p class=\"subtitle\">{subtitle}</p>\
         <dl><dt>Autor</dt><dd>{author}</dd><dt>Editora</dt><dd>{publisher}</dd>\
         <dt>Ano</dt><dd>{year}</dd><dt>Idiomas</dt><dd>PT · EN · ES · FR</dd>\
         <dt>Licença</dt><dd>Creative Commons</dd></dl>\
         <a class=\"book-link\" href=\"{url}\" target=\"_blank\" rel=\"noopener noreferrer\">↓ Baixar PDF Gratuitamente</a></section>",
        title = text(meta.title),
        subtitle = text(meta.subtitle),
        author = text(meta.author),
        publisher = text(meta.publisher),
        year = meta.year,
        url = attr(meta.url),
    );

    // 推荐问题
    html.push_str("<section class=\"questions\"><h2>Perguntas Sugeridas</h2>");
    for question in lang.suggested_questions() {
        let _ = write!(
            html,
            "<button class=\"question-btn\" data-question=\"{}\">{}</button>",
            attr(question),
            text(question)
        );
    }
    html.push_str("</section>");

    // 目录
    html.push_str("<section class=\"structure\"><h2>Estrutura do Livro</h2>");
    for part in BOOK_STRUCTURE.iter() {
        let _ = write!(
            html,
            "<div class=\"structure-part\"><div class=\"part-label\">{}</div><div class=\"part-title\">{}</div><ul>",
            text(part.part),
            text(part.title)
        );
        for chapter in part.chapters {
            let _ = write!(html, "<li>{}</li>", text(chapter));
        }
        html.push_str("</ul></div>");
    }
    html.push_str("</section></aside>");

    // 聊天面板
    html.push_str("<main class=\"chat-area\"><nav class=\"lang-selector\">");
    for option in Language::ALL {
        let _ = write!(
            html,
            "<a class=\"lang-btn{active}\" href=\"/?lang={code}\" title=\"{name}\">{upper}</a>",
            active = if option == lang { " active" } else { "" },
            code = option.code(),
            name = attr(option.display_name()),
            upper = option.code().to_ascii_uppercase(),
        );
    }
    let _ = write!(
        html,
        "</nav><button id=\"clear-btn\" hidden>Limpar</button>\
         <div id=\"messages\"><div class=\"welcome-msg\"><h2>Como posso ajudar?</h2>{welcome}</div></div>\
         <div id=\"error\" class=\"error-msg\" hidden></div>\
         <form id=\"chat-form\"><textarea id=\"input\" rows=\"1\" placeholder=\"{placeholder}\"></textarea>\
         <button id=\"send-btn\" type=\"submit\">Enviar →</button>\
         <button id=\"stop-btn\" type=\"button\" hidden>Parar</button></form></main>",
        welcome = render_html(WELCOME),
        placeholder = attr(lang.placeholder()),
    );

    let _ = write!(
        html,
        "<footer>Assistente de pesquisa para <em>{title}</em> · {author} · \
         <a href=\"https://dowbor.org\" target=\"_blank\" rel=\"noopener noreferrer\">dowbor.org</a> · \
         Creative Commons CC BY-NC-ND 4.0</footer>\
         <script>{script}</script></body></html>",
        title = text(meta.title),
        author = text(meta.author),
        script = CHAT_SCRIPT,
    );

    html
}
