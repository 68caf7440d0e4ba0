use std::io::{self, BufRead, BufReader, Write};

use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use tracing::{error, info};

use naga_loop::cli::{Cli, CommandOutcome, Session, handle_command};
use naga_loop::config::AppConfig;
use naga_loop::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_file.as_deref())?;

    let cfg = AppConfig::from_cli(&cli)?;
    info!(
        base_url = %cfg.base_url,
        model = %cfg.model,
        max_rounds = cfg.agentic.max_rounds,
        "app config"
    );
    let mut session = Session::from_config(cfg, cli.session_id.clone())?.with_raw(cli.raw);

    match cli.prompt.as_deref() {
        Some(prompt) => {
            let mut stdout = io::stdout();
            session.run_turn(prompt, &mut stdout).await?;
            writeln!(stdout)?;
            Ok(())
        }
        None => {
            run_cli_loop(&mut session).await?;
            info!(
                session_id = %session.session_id(),
                tokens_used = session.tokens_used(),
                "session finished"
            );
            Ok(())
        }
    }
}

async fn run_cli_loop(session: &mut Session) -> Result<()> {
    println!(
        "naga-loop (session {}) - type /help for commands",
        session.session_id()
    );
    let reader = BufReader::new(io::stdin()).lines();
    let mut stdout = io::stdout();

    print!("> ");
    stdout.flush()?;
    for line in reader {
        let line = line?;
        if line.trim().is_empty() {
            print!("> ");
            stdout.flush()?;
            continue;
        }
        match handle_command(&line) {
            Some(CommandOutcome::Quit) => break,
            Some(CommandOutcome::ResetHistory) => session.reset(),
            Some(CommandOutcome::Handled) => {}
            None => {
                if let Err(e) = session.run_turn(line.trim(), &mut stdout).await {
                    error!(error = %e, "turn failed");
                    eprintln!("error: {e:#}");
                }
                writeln!(stdout)?;
            }
        }
        print!("> ");
        stdout.flush()?;
    }
    Ok(())
}
