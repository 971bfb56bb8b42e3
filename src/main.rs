//! readpace: read a text file one word at a time in the terminal.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use readpace::config::Config;
use readpace::history;
use readpace::{
    BookRecord, BookStore, EngineEvent, EngineEventKind, JsonBookStore, PlainTextSource,
    PlaybackEngine, PlaybackSnapshot, ProgressCoordinator, ProgressEvent, ReadingSession,
};

const SKIP_WORDS: usize = 10;

#[derive(Parser, Debug)]
#[command(name = "readpace", about = "RSVP speed reader with resumable progress")]
struct Args {
    /// Text file to read
    #[arg(required_unless_present = "report")]
    file: Option<PathBuf>,

    /// Path to readpace.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reading speed in words per minute (overrides the saved speed)
    #[arg(short, long)]
    wpm: Option<u32>,

    /// Start the book over from the first word
    #[arg(long)]
    reset: bool,

    /// Print today's reading report and exit
    #[arg(long)]
    report: bool,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Command {
    Toggle,
    Stop,
    Restart,
    Next,
    Previous,
    SkipForward,
    SkipBackward,
    Faster,
    Slower,
    JumpPercent(f64),
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    let command = match parts.next().unwrap_or("p") {
        "p" => Command::Toggle,
        "s" => Command::Stop,
        "r" => Command::Restart,
        "n" => Command::Next,
        "b" => Command::Previous,
        "f" => Command::SkipForward,
        "k" => Command::SkipBackward,
        "+" => Command::Faster,
        "-" => Command::Slower,
        "g" => Command::JumpPercent(parts.next()?.trim_end_matches('%').parse().ok()?),
        "q" => Command::Quit,
        _ => return None,
    };
    Some(command)
}

fn apply(engine: &PlaybackEngine, command: Command) {
    match command {
        Command::Toggle => engine.toggle_play_pause(),
        Command::Stop => engine.stop(),
        Command::Restart => engine.restart(),
        Command::Next => engine.next_word(),
        Command::Previous => engine.previous_word(),
        Command::SkipForward => engine.skip_forward(SKIP_WORDS),
        Command::SkipBackward => engine.skip_backward(SKIP_WORDS),
        Command::Faster => engine.increase_speed(),
        Command::Slower => engine.decrease_speed(),
        Command::JumpPercent(percent) => engine.jump_to_progress(percent / 100.0),
        Command::Quit => {}
    }
}

/// Redraw the single display line.
fn render(snapshot: &PlaybackSnapshot) {
    let word = snapshot.word.as_deref().unwrap_or("");
    let mut stdout = std::io::stdout().lock();
    let _ = write!(
        stdout,
        "\r\x1b[2K{word:^24}  [{}/{} · {} wpm · {}]",
        snapshot.index + 1,
        snapshot.total_words,
        snapshot.wpm,
        snapshot.state
    );
    let _ = stdout.flush();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Logs go to stderr so the word line on stdout stays clean
    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(args.config.as_deref());

    if args.report {
        let dir = config
            .storage
            .history_dir()
            .ok_or("no data directory, set storage.history_dir")?;
        println!("{}", history::generate_report(&dir, "today"));
        return Ok(());
    }

    let document = args.file.ok_or("missing FILE")?.canonicalize()?;
    let library_path = config
        .storage
        .library_path()
        .ok_or("no data directory, set storage.library_path")?;
    let store = Arc::new(JsonBookStore::new(library_path));
    info!("Library: {}", store.path().display());

    let book_id = document.to_string_lossy().to_string();
    let book = match store.get_by_id(&book_id)? {
        Some(book) => {
            info!(
                "{} saved at word {} of {} ({:.0}%)",
                book.title,
                book.current_word_index,
                book.total_words,
                book.progress() * 100.0
            );
            book
        }
        None => {
            let title = document
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| book_id.clone());
            let book = BookRecord::new(book_id.clone(), title);
            store.insert(&book)?;
            info!("Added {} to library", book.title);
            book
        }
    };

    let engine = PlaybackEngine::new(config.reader.clamped_wpm());
    let coordinator =
        ProgressCoordinator::new(engine.clone(), store.clone(), config.progress.auto_save());
    coordinator.subscribe(|event| {
        if let ProgressEvent::SaveFailed { book_id, reason } = event {
            warn!("Progress for {book_id} not saved: {reason}");
        }
    });

    let mut session = ReadingSession::new(coordinator);
    if let Some(dir) = config.storage.history_dir() {
        session = session.with_history(dir);
    }

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<EngineEvent>();
    engine.subscribe(move |event| {
        let _ = event_tx.send(event.clone());
    });

    session.open(&PlainTextSource, &document, book)?;
    if args.reset {
        session.coordinator().reset_progress(&book_id)?;
    }
    if let Some(wpm) = args.wpm {
        engine.set_wpm(wpm);
    }

    // Line commands from stdin
    let (command_tx, mut command_rx) = mpsc::channel::<Command>(16);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match parse_command(&line) {
                Some(command) => {
                    if command_tx.send(command).await.is_err() {
                        break;
                    }
                }
                None => warn!("Unknown command: {line}"),
            }
        }
    });

    info!("p play/pause · n/b word · f/k skip {SKIP_WORDS} · +/- speed · g <pct> jump · s stop · r restart · q quit");
    render(&engine.snapshot());

    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                render(&event.snapshot);
                if event.kind == EngineEventKind::Finished {
                    info!("Finished. p reads again, q quits");
                }
            }
            command = command_rx.recv() => {
                match command {
                    Some(Command::Quit) | None => break,
                    Some(command) => apply(&engine, command),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    println!();

    if let Some(record) = session.close()? {
        info!(
            "Read {} words in {:.0}s, stopped at word {} of {}",
            record.words_read,
            record.elapsed_s,
            record.end_index + 1,
            record.total_words
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse() {
        assert_eq!(parse_command("p"), Some(Command::Toggle));
        assert_eq!(parse_command(""), Some(Command::Toggle));
        assert_eq!(parse_command("  +  "), Some(Command::Faster));
        assert_eq!(parse_command("g 40%"), Some(Command::JumpPercent(40.0)));
        assert_eq!(parse_command("g"), None);
        assert_eq!(parse_command("x"), None);
    }
}
