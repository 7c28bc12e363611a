//! Interactive REPL for the sprig interpreter.

use std::process::ExitCode;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use sprig::{Interp, SprigError};

// ANSI color helpers
pub fn green(s: &str) -> String {
    format!("\x1b[32m{}\x1b[0m", s)
}
pub fn red(s: &str) -> String {
    format!("\x1b[31m{}\x1b[0m", s)
}
pub fn cyan(s: &str) -> String {
    format!("\x1b[36m{}\x1b[0m", s)
}
pub fn gray(s: &str) -> String {
    format!("\x1b[90m{}\x1b[0m", s)
}

/// Net delimiter depth of `text`, ignoring strings and comments. A
/// positive result means the form is still open and the REPL should keep
/// reading continuation lines.
fn open_depth(text: &str) -> i32 {
    let mut depth = 0;
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    while let Some(ch) = chars.next() {
        if in_string {
            match ch {
                '\\' => {
                    chars.next();
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            ';' => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ => {}
        }
    }
    depth
}

pub fn run() -> ExitCode {
    let mut editor = match DefaultEditor::new() {
        Ok(e) => e,
        Err(e) => {
            eprintln!("cannot start line editor: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let mut interp = Interp::new();
    println!(
        "{} {}  {}",
        cyan("sprig"),
        env!("CARGO_PKG_VERSION"),
        gray("(:quit to exit)")
    );
    let mut buffer = String::new();
    loop {
        let prompt = if buffer.is_empty() {
            "sprig> "
        } else {
            "  ...> "
        };
        match editor.readline(prompt) {
            Ok(line) => {
                if buffer.is_empty() && line.trim() == ":quit" {
                    break;
                }
                buffer.push_str(&line);
                buffer.push('\n');
                if open_depth(&buffer) > 0 {
                    continue;
                }
                let source = std::mem::take(&mut buffer);
                if source.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(source.trim());
                match interp.eval(&source) {
                    Ok(value) => println!("{}", green(&value.display_pretty())),
                    Err(e) => {
                        report(&e);
                        interp.reset();
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                buffer.clear();
                println!("{}", gray("^C"));
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("readline error: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}

fn report(err: &SprigError) {
    eprintln!("{}", red(&err.to_string()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_depth_counts_all_delimiters() {
        assert_eq!(open_depth("(let [x 1]"), 2);
        assert_eq!(open_depth("(let [x 1] x)"), 0);
        assert_eq!(open_depth("())"), -1);
    }

    #[test]
    fn test_open_depth_ignores_strings_and_comments() {
        assert_eq!(open_depth("\"(((\""), 0);
        assert_eq!(open_depth("; (((\n"), 0);
        assert_eq!(open_depth("(str \")\")"), 0);
    }
}
