//! # 书籍内容模块
//!
//! 《A Era do Capital Improdutivo》的固定内容：元数据、目录、核心概念与章节摘要，
//! 以及按界面语言划分的推荐问题。
//!
//! 所有内容都是进程级只读常量。这里不做检索：每次请求都把整本书的摘要原样放进系统提示词。

use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::models::{BookMetadata, BookPart};

/// 核心概念与作者定义。
pub const KEY_CONCEPTS: &str = include_str!("key_concepts.md");

/// 按章节整理的详细段落，用于深入问题。
pub const CHAPTER_CONTENT: &str = include_str!("chapter_content.md");

/// 系统提示词的开头：角色设定与回答规则。
const INSTRUCTIONS: &str = include_str!("instructions.md");

pub static BOOK_METADATA: BookMetadata = BookMetadata {
    title: "A Era do Capital Improdutivo",
    subtitle: "Nova arquitetura do poder: dominação financeira, sequestro da democracia e destruição do planeta",
    author: "Ladislau Dowbor",
    year: 2017,
    publisher: "Autonomia Literária",
    isbn: "978-85-69536-11-9",
    url: "https://dowbor.org/wp-content/uploads/2018/11/Dowbor-_-A-ERA-DO-CAPITAL-IMPRODUTIVO.pdf",
    languages: &[
        "Português",
        "English (The Age of Unproductive Capital)",
        "Español",
        "Français",
    ],
    description: "Neste livro, Ladislau Dowbor investiga como a riqueza do mundo – minérios, petróleo, trabalho, alimentos –, produzida pelo trabalho, é capturada pelos bancos e seus intermediários financeiros. Com uma vasta pesquisa, Ladislau revela os mecanismos usados pelas corporações financeiras para exercer o poder político diretamente e influenciar as principais decisões dos poderes públicos.",
};

pub static BOOK_STRUCTURE: [BookPart; 4] = [
    BookPart {
        part: "Parte I",
        title: "A concentração de renda e riqueza",
        chapters: &[
            "Capítulo 1: A concentração de renda",
            "Capítulo 2: A concentração de riqueza e o patrimônio",
            "Capítulo 3: As famílias ricas",
        ],
    },
    BookPart {
        part: "Parte II",
        title: "O capital improdutivo",
        chapters: &[
            "Capítulo 4: A intermediação financeira",
            "Capítulo 5: Os paraísos fiscais",
            "Capítulo 6: A financeirização da economia",
        ],
    },
    BookPart {
        part: "Parte III",
        title: "A nova arquitetura do poder",
        chapters: &[
            "Capítulo 7: As corporações financeiras e o poder político",
            "Capítulo 8: O sequestro da democracia",
            "Capítulo 9: A mídia como instrumento de poder",
        ],
    },
    BookPart {
        part: "Parte IV",
        title: "Alternativas e caminhos",
        chapters: &[
            "Capítulo 10: A economia solidária e as alternativas",
            "Capítulo 11: As políticas públicas necessárias",
            "Capítulo 12: Conclusões e perspectivas",
        ],
    },
];

/// 返回完整的系统提示词。
///
/// 第一次调用时拼接并缓存，之后每个请求共用同一份字符串。
pub fn system_prompt() -> &'static str {
    static PROMPT: OnceLock<String> = OnceLock::new();
    PROMPT.get_or_init(build_system_prompt)
}

fn build_system_prompt() -> String {
    // 元数据和目录都是静态结构体，序列化不会失败
    let metadata = serde_json::to_string_pretty(&BOOK_METADATA).unwrap_or_default();
    let structure = serde_json::to_string_pretty(&BOOK_STRUCTURE).unwrap_or_default();

    format!(
        "{INSTRUCTIONS}\nCONTEÚDO DO LIVRO:\n{KEY_CONCEPTS}\n{CHAPTER_CONTENT}\n\
         INFORMAÇÕES DO LIVRO:\n{metadata}\n\n\
         ESTRUTURA DO LIVRO:\n{structure}\n"
    )
}

/// 界面显示语言。决定推荐问题和输入框提示，不影响模型回答的语言。
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Pt,
    En,
    Es,
    Fr,
}

impl Language {
    pub const ALL: [Language; 4] = [Language::Pt, Language::En, Language::Es, Language::Fr];

    pub fn code(self) -> &'static str {
        match self {
            Language::Pt => "pt",
            Language::En => "en",
            Language::Es => "es",
            Language::Fr => "fr",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Language::Pt => "Português",
            Language::En => "English",
            Language::Es => "Español",
            Language::Fr => "Français",
        }
    }

    /// 解析查询参数中的语言代码，缺省或无法识别时回退到葡萄牙语。
    pub fn from_query(code: Option<&str>) -> Self {
        code.and_then(|c| c.parse().ok()).unwrap_or_default()
    }

    pub fn suggested_questions(self) -> &'static [&'static str] {
        match self {
            Language::Pt => &[
                "O que é capital improdutivo?",
                "Como funciona a intermediação financeira parasitária?",
                "O que são paraísos fiscais e qual seu impacto?",
                "O que Dowbor entende por \"sequestro da democracia\"?",
                "Quais alternativas o autor propõe?",
                "Como a desigualdade brasileira se compara ao mundo?",
                "O que é financeirização da economia?",
                "Por que os bancos brasileiros são tão lucrativos?",
            ],
            Language::En => &[
                "What is unproductive capital?",
                "How does parasitic financial intermediation work?",
                "What does Dowbor mean by \"seizure of democracy\"?",
                "What alternatives does the author propose?",
                "How does financialization affect the economy?",
                "What role do tax havens play?",
            ],
            Language::Es => &[
                "¿Qué es el capital improductivo?",
                "¿Cómo funciona la intermediación financiera parasitaria?",
                "¿Qué propone Dowbor como alternativas?",
                "¿Qué son los paraísos fiscales?",
            ],
            Language::Fr => &[
                "Qu'est-ce que le capital improductif?",
                "Quelles alternatives Dowbor propose-t-il?",
                "Qu'est-ce que la financiarisation de l'économie?",
            ],
        }
    }

    pub fn placeholder(self) -> &'static str {
        match self {
            Language::Pt => "Faça uma pergunta sobre o livro… (Enter para enviar)",
            Language::En => "Ask a question about the book… (Enter to send)",
            Language::Es => "Haz una pregunta sobre el libro… (Enter)",
            Language::Fr => "Posez une question sur le livre… (Entrée)",
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pt" => Ok(Language::Pt),
            "en" => Ok(Language::En),
            "es" => Ok(Language::Es),
            "fr" => Ok(Language::Fr),
            other => Err(format!("unknown language: {other}")),
        }
    }
}
