pub mod render;
pub mod session;

use std::io::{self, Write};
use std::path::PathBuf;

use clap::{ArgAction, Parser};

pub use render::EventPrinter;
pub use session::Session;

#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "naga-loop",
    version,
    about = "Agentic tool loop for OpenAI-compatible chat models"
)]
pub struct Cli {
    /// Run a single turn with this prompt and exit
    pub prompt: Option<String>,

    /// OpenAI-compatible API base URL
    #[arg(long)]
    pub base_url: Option<String>,

    /// Model name
    #[arg(long)]
    pub model: Option<String>,

    /// API key (set via env OPENAI_API_KEY recommended)
    #[arg(long)]
    pub api_key: Option<String>,

    /// Maximum tool rounds per turn
    #[arg(long)]
    pub max_rounds: Option<usize>,

    /// Base URL of the remote agent gateway
    #[arg(long)]
    pub gateway_url: Option<String>,

    /// Emit plain JSON SSE frames instead of base64
    #[arg(long, action = ArgAction::SetTrue)]
    pub plain_frames: bool,

    /// Classify each message first and only inject the tool guides it needs
    #[arg(long, action = ArgAction::SetTrue)]
    pub route: bool,

    /// Print SSE frames verbatim instead of rendered text
    #[arg(long, action = ArgAction::SetTrue)]
    pub raw: bool,

    /// Session id used for gateway session keys
    #[arg(long)]
    pub session_id: Option<String>,

    /// Log level (error,warn,info,debug,trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Handled,
    ResetHistory,
    Quit,
}

pub fn print_help() {
    println!(
        "/help   Show help\n/clear  Clear screen\n/reset  Forget the conversation\n/quit   Quit\nAnything else is sent to the model."
    );
}

/// `None` when `line` is not a slash command.
pub fn handle_command(line: &str) -> Option<CommandOutcome> {
    match line.trim() {
        "/help" => {
            print_help();
            Some(CommandOutcome::Handled)
        }
        "/clear" => {
            print!("\x1B[2J\x1B[H");
            let _ = io::stdout().flush();
            Some(CommandOutcome::Handled)
        }
        "/reset" => Some(CommandOutcome::ResetHistory),
        "/quit" | "/exit" => Some(CommandOutcome::Quit),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_are_recognised() {
        assert_eq!(handle_command("/quit"), Some(CommandOutcome::Quit));
        assert_eq!(handle_command(" /exit "), Some(CommandOutcome::Quit));
        assert_eq!(handle_command("/reset"), Some(CommandOutcome::ResetHistory));
        assert_eq!(handle_command("what's the weather?"), None);
    }

    #[test]
    fn flags_parse() {
        let cli = Cli::parse_from([
            "naga-loop",
            "--max-rounds",
            "3",
            "--plain-frames",
            "--route",
            "hello",
        ]);
        assert_eq!(cli.prompt.as_deref(), Some("hello"));
        assert_eq!(cli.max_rounds, Some(3));
        assert!(cli.plain_frames && cli.route && !cli.raw);
        assert_eq!(cli.log_level, "info");
    }
}
