use std::io;
use std::io::Write;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::warn;

use recall_runtime::{ContentGenerator, GenerationReport};

/// Run one generation, printing fragments as they arrive.
pub(crate) async fn stream_turn(
    generator: &ContentGenerator,
    owner_id: &str,
    session_id: &str,
    prompt: &str,
) -> Result<GenerationReport> {
    let (tx, mut rx) = mpsc::channel::<String>(64);
    let printer = tokio::spawn(async move {
        let mut stdout = io::stdout();
        while let Some(fragment) = rx.recv().await {
            print!("{fragment}");
            let _ = stdout.flush();
        }
        println!();
    });

    let result = generator.generate(owner_id, session_id, prompt, tx).await;
    let _ = printer.await;
    result
}

pub(crate) fn print_report(report: &GenerationReport) {
    eprintln!("── generation ───────────────────────────────────────");
    match report.memory_id {
        Some(id) => eprintln!("  memory id:            {id}"),
        None => eprintln!("  memory id:            (not stored)"),
    }
    eprintln!("  context messages:     {}", report.context_messages);
    eprintln!("  response time:        {:.3}s", report.response_time_secs);
    eprintln!("  prompt effectiveness: {:.2}", report.prompt_effectiveness);
    eprintln!("  engagement score:     {:.2}", report.engagement_score);
    if report.malformed_chunks > 0 {
        eprintln!("  malformed chunks:     {}", report.malformed_chunks);
    }
}

pub(crate) async fn run_chat_session(
    generator: &ContentGenerator,
    owner_id: &str,
    session_id: &str,
) -> Result<()> {
    let memory = generator.memory();
    println!(
        "session {session_id} (keeping the last {} turns)",
        memory.buffers().capacity()
    );
    println!("commands: /report, /forget, /help, /exit");

    let stdin = io::stdin();
    let mut last_report: Option<GenerationReport> = None;
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        let bytes = stdin.read_line(&mut line)?;
        if bytes == 0 {
            println!("session closed");
            break;
        }
        let line = line.trim();

        match line {
            "" => continue,
            "/exit" => {
                println!("session closed");
                break;
            }
            "/help" => {
                println!("/report  -- metrics for the last reply");
                println!("/forget  -- clear this session's recent turns");
                println!("/exit");
                continue;
            }
            "/report" => {
                match &last_report {
                    Some(report) => print_report(report),
                    None => println!("no reply yet"),
                }
                continue;
            }
            "/forget" => {
                if memory.buffers().remove(session_id) {
                    println!("recent turns cleared");
                } else {
                    println!("no recent turns");
                }
                continue;
            }
            _ => {}
        }

        match stream_turn(generator, owner_id, session_id, line).await {
            Ok(report) => last_report = Some(report),
            Err(err) => {
                warn!(error = %err, "generation failed");
                eprintln!("error: {err:#}");
            }
        }
    }

    Ok(())
}
