//! Operator interaction
//!
//! Stages ask the operator through [`Prompter`]: a titled message with a few
//! labelled buttons, returning the chosen index. The terminal implementation
//! reads the answer from stdin and refuses to guess when stdin is not a tty.

use crate::core::error::{InstallError, Result};
use async_trait::async_trait;
use owo_colors::OwoColorize;
use std::io::{BufRead, IsTerminal, Write};
use std::path::PathBuf;

/// A question for the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub title: String,
    pub detail: String,
    pub buttons: Vec<String>,
}

impl Prompt {
    pub fn new(title: impl Into<String>, detail: impl Into<String>, buttons: &[&str]) -> Self {
        Self {
            title: title.into(),
            detail: detail.into(),
            buttons: buttons.iter().map(|b| b.to_string()).collect(),
        }
    }
}

/// Presents choices to the operator.
#[async_trait]
pub trait Prompter: Send + Sync {
    /// Show `prompt` and return the index of the chosen button.
    async fn choose(&self, prompt: &Prompt) -> Result<usize>;

    /// Ask for one or more directories. An empty list means the operator cancelled.
    async fn pick_folders(&self, title: &str) -> Result<Vec<PathBuf>>;

    /// Point the operator at a web page.
    fn open_url(&self, url: &str);
}

/// Prompts on the controlling terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    pub fn new() -> Self {
        Self
    }
}

fn read_line_blocking() -> Result<String> {
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| InstallError::io("cannot read answer", e))?;
    Ok(line.trim().to_string())
}

async fn read_line() -> Result<String> {
    tokio::task::spawn_blocking(read_line_blocking)
        .await
        .map_err(|e| InstallError::UserAborted(format!("prompt interrupted: {e}")))?
}

fn ensure_interactive() -> Result<()> {
    if std::io::stdin().is_terminal() {
        Ok(())
    } else {
        Err(InstallError::UserAborted(
            "input required but stdin is not a terminal".into(),
        ))
    }
}

/// Parse a 1-based answer into a 0-based button index.
fn parse_choice(answer: &str, buttons: usize) -> Option<usize> {
    answer
        .parse::<usize>()
        .ok()
        .filter(|n| (1..=buttons).contains(n))
        .map(|n| n - 1)
}

#[async_trait]
impl Prompter for TerminalPrompter {
    async fn choose(&self, prompt: &Prompt) -> Result<usize> {
        ensure_interactive()?;

        println!();
        println!("{} {}", "?".yellow().bold(), prompt.title.bold());
        for line in prompt.detail.lines() {
            println!("  {}", line.dimmed());
        }
        for (i, label) in prompt.buttons.iter().enumerate() {
            println!("  {} {}", format!("[{}]", i + 1).cyan(), label);
        }

        loop {
            print!("  choice: ");
            let _ = std::io::stdout().flush();
            let answer = read_line().await?;
            if let Some(index) = parse_choice(&answer, prompt.buttons.len()) {
                return Ok(index);
            }
            println!("  enter a number from 1 to {}", prompt.buttons.len());
        }
    }

    async fn pick_folders(&self, title: &str) -> Result<Vec<PathBuf>> {
        ensure_interactive()?;
        println!("{} {}", "?".yellow().bold(), title.bold());
        print!("  directory (empty to cancel): ");
        let _ = std::io::stdout().flush();
        let answer = read_line().await?;
        if answer.is_empty() {
            return Ok(Vec::new());
        }
        Ok(std::env::split_paths(&answer).collect())
    }

    fn open_url(&self, url: &str) {
        println!("  {} {}", "open:".cyan(), url.underline());
    }
}
