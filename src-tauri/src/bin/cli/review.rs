use std::io::{self, BufRead, Write};

use anyhow::Result;
use tokio::sync::mpsc::UnboundedReceiver;

use flashdeck_lib::models::Rating;
use flashdeck_lib::session::{Advance, Session};
use flashdeck_lib::study::{StudyController, SyncFailure};

const HELP: &str = "[f] flip  [1] easy  [2] medium  [3] hard  [p] previous  [n] next  [q] quit";

enum Key {
    Flip,
    Rate(Rating),
    Previous,
    Next,
    Quit,
    Unknown,
}

fn parse_key(input: &str) -> Key {
    match input.trim() {
        "f" | "" => Key::Flip,
        "1" => Key::Rate(Rating::Easy),
        "2" => Key::Rate(Rating::Medium),
        "3" => Key::Rate(Rating::Hard),
        "p" => Key::Previous,
        "n" => Key::Next,
        "q" => Key::Quit,
        _ => Key::Unknown,
    }
}

fn show(session: &Session) {
    let (position, total) = session.position();
    let card = session.current();
    println!();
    println!("Card {} / {}  [{}]", position, total, card.category);
    println!("  Q: {}", card.front);
    if session.is_revealed() {
        println!("  A: {}", card.back);
    }
}

fn report_failures(failures: &mut UnboundedReceiver<SyncFailure>) {
    while let Ok(failure) = failures.try_recv() {
        eprintln!("Could not save review of card {}: {}", failure.card_id, failure.error);
    }
}

/// Ask a yes/no question on stdin
pub fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

/// Interactive loop over the active session. Quitting keeps saved progress; finishing the
/// last card and confirming clears it.
pub async fn run(study: &mut StudyController, mut failures: UnboundedReceiver<SyncFailure>) -> Result<()> {
    println!("{}", HELP);
    let stdin = io::stdin();
    let mut line = String::new();

    loop {
        let Some(session) = study.session() else {
            return Ok(());
        };
        show(session);
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            study.exit(true).await?;
            break;
        }

        let complete = match parse_key(&line) {
            Key::Flip => {
                study.flip()?;
                false
            }
            Key::Rate(rating) => study.rate(rating)?.advance == Some(Advance::Complete),
            Key::Previous => {
                if !study.previous()? {
                    println!("Already at the first card");
                }
                false
            }
            Key::Next => study.next()? == Advance::Complete,
            Key::Quit => {
                study.exit(true).await?;
                println!("Progress saved");
                break;
            }
            Key::Unknown => {
                println!("{}", HELP);
                false
            }
        };
        report_failures(&mut failures);

        if complete {
            let mastered = study.session().map(|s| s.mastered_count()).unwrap_or(0);
            println!("All cards reviewed ({} mastered)", mastered);
            if confirm("Finish the session?")? {
                study.exit(false).await?;
                break;
            }
        }
    }

    report_failures(&mut failures);
    Ok(())
}
