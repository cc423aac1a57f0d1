//! book-chat：book-assistant 中继的终端客户端。
//! 从标准输入读取问题，按段落流式输出回答。
//! 回答进行中按 Ctrl-C 取消，空闲时按 Ctrl-C 退出。

use book_assistant_lib::book::Language;
use book_assistant_lib::client::{run_turn, ChatSession, PendingTurn, RelayClient};
use book_assistant_lib::models::Role;
use book_assistant_lib::render::render_terminal;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

const DEFAULT_RELAY: &str = "http://127.0.0.1:3000";

fn resolve_relay_url() -> String {
    // 1. 命令行参数 --relay <url>
    let args: Vec<String> = std::env::args().collect();
    if let Some(pos) = args.iter().position(|a| a == "--relay") {
        if let Some(url) = args.get(pos + 1) {
            return url.clone();
        }
    }
    // 2. 环境变量 BOOK_CHAT_RELAY
    if let Ok(url) = std::env::var("BOOK_CHAT_RELAY") {
        return url;
    }
    DEFAULT_RELAY.to_string()
}

fn print_questions(session: &ChatSession) {
    println!("Perguntas sugeridas ({}):", session.language().display_name());
    for (i, q) in session.suggested_questions().iter().enumerate() {
        println!("  {}. {}", i + 1, q);
    }
    println!("{}", session.placeholder());
}

fn print_help() {
    println!("/lang pt|en|es|fr   mudar idioma das sugestões");
    println!("/questions          listar perguntas sugeridas");
    println!("/ask N              enviar a pergunta sugerida N");
    println!("/clear              limpar a conversa");
    println!("/quit               sair");
}

/// 流式回答中每遇到空行就把已完成的段落打印出来
struct ParagraphPrinter {
    buffer: String,
    printed: usize,
}

impl ParagraphPrinter {
    fn new() -> Self {
        Self {
            buffer: String::new(),
            printed: 0,
        }
    }

    fn push(&mut self, text: &str) {
        self.buffer.push_str(text);
        if let Some(end) = self.buffer.rfind("\n\n") {
            if end > self.printed {
                print_block(&self.buffer[self.printed..end]);
                self.printed = end + 2;
            }
        }
    }

    fn flush(&mut self) {
        if self.printed < self.buffer.len() {
            print_block(&self.buffer[self.printed..]);
        }
        self.printed = self.buffer.len();
    }
}

fn print_block(text: &str) {
    let rendered = render_terminal(text);
    if !rendered.is_empty() {
        println!("{}\n", rendered);
        let _ = std::io::stdout().flush();
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let client = RelayClient::new(resolve_relay_url());
    let session = Arc::new(Mutex::new(ChatSession::new()));

    // Ctrl-C：有回答在进行时取消，否则退出
    let signal_session = session.clone();
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            let cancelled = signal_session
                .lock()
                .map(|mut s| s.cancel())
                .unwrap_or(false);
            if !cancelled {
                println!();
                std::process::exit(0);
            }
        }
    });

    if let Ok(s) = session.lock() {
        print_questions(&s);
    }
    println!("(/help para comandos)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                eprintln!("Error: failed to read stdin: {}", e);
                break;
            }
        };
        let line = line.trim();

        let submitted: Option<PendingTurn> = match line.split_once(' ').unwrap_or((line, "")) {
            ("", _) => continue,
            ("/quit", _) => break,
            ("/help", _) => {
                print_help();
                continue;
            }
            ("/questions", _) => {
                if let Ok(s) = session.lock() {
                    print_questions(&s);
                }
                continue;
            }
            ("/clear", _) => {
                if let Ok(mut s) = session.lock() {
                    s.clear();
                }
                println!("Conversa limpa.");
                continue;
            }
            ("/lang", code) => {
                match code.parse::<Language>() {
                    Ok(lang) => {
                        if let Ok(mut s) = session.lock() {
                            s.set_language(lang);
                            print_questions(&s);
                        }
                    }
                    Err(e) => eprintln!("{}", e),
                }
                continue;
            }
            ("/ask", n) => {
                // 编号从 1 开始
                let index = n.trim().parse::<usize>().ok().and_then(|n| n.checked_sub(1));
                let turn = index.and_then(|i| session.lock().ok()?.select_suggestion(i));
                match turn {
                    Some(turn) => {
                        if let Some(question) = turn.history.last() {
                            println!("> {}", question.content);
                        }
                        Some(turn)
                    }
                    None => {
                        eprintln!("Pergunta inexistente");
                        continue;
                    }
                }
            }
            _ => session.lock().ok().and_then(|mut s| {
                s.set_input(line);
                s.submit_input()
            }),
        };

        let Some(turn) = submitted else {
            continue;
        };

        let mut printer = ParagraphPrinter::new();
        println!();
        run_turn(&session, &client, turn, |text| printer.push(text)).await;

        let (error, answered) = match session.lock() {
            Ok(s) => (
                s.error().map(str::to_string),
                s.messages()
                    .last()
                    .is_some_and(|m| m.role == Role::Assistant),
            ),
            Err(_) => (None, false),
        };
        match (error, answered) {
            (Some(message), _) => eprintln!("⚠ {}", message),
            (None, true) => printer.flush(),
            (None, false) => println!("(cancelado)"),
        }
    }
}
