// src/main.rs

fn main() {
    // 调用 lib.rs 里的 run 函数
    if let Err(e) = book_assistant_lib::run() {
        eprintln!("book-assistant: {e}");
        std::process::exit(1);
    }
}
