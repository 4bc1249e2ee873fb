use std::io::{self, IsTerminal};

use owo_colors::OwoColorize;

/// Terminal printer: colors only on a TTY and when `NO_COLOR` is unset.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    color: bool,
}

impl Output {
    pub fn detect() -> Self {
        Self {
            color: io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none(),
        }
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    pub fn header(&self, text: &str) {
        let rule = "=".repeat(text.chars().count());
        if self.color {
            println!("\n{}", text.cyan().bold());
            println!("{}\n", rule.cyan());
        } else {
            println!("\n{}\n{}\n", text, rule);
        }
    }

    pub fn success(&self, msg: &str) {
        self.line("✓", msg, |s| s.green().to_string());
    }

    pub fn error(&self, msg: &str) {
        self.line("✗", msg, |s| s.red().to_string());
    }

    pub fn warning(&self, msg: &str) {
        self.line("!", msg, |s| s.yellow().to_string());
    }

    pub fn info(&self, msg: &str) {
        self.line("→", msg, |s| s.blue().to_string());
    }

    /// Bold section title followed by a colon
    pub fn section(&self, title: &str) {
        if self.color {
            println!("{}", format!("{}:", title).bold());
        } else {
            println!("{}:", title);
        }
    }

    /// `Status: <value>` line, green when good, yellow otherwise
    pub fn status_line(&self, label: &str, value: &str, good: bool) {
        let text = format!("{}: {}", label, value);
        match (self.color, good) {
            (false, _) => println!("{}", text),
            (true, true) => println!("{}", text.green().bold()),
            (true, false) => println!("{}", text.yellow().bold()),
        }
    }

    pub fn highlight(&self, msg: &str) {
        if self.color {
            println!("{}", msg.green());
        } else {
            println!("{}", msg);
        }
    }

    fn line(&self, mark: &str, msg: &str, paint: impl Fn(&str) -> String) {
        let text = format!("{} {}", mark, msg);
        if self.color {
            println!("{}", paint(&text));
        } else {
            println!("{}", text);
        }
    }
}
