mod encode;
mod session;
mod source;
mod summarize;

use std::io::Write as _;
use std::sync::Arc;

use chrono::DateTime;
use stream_recap_common::config::Config;
use tokio::io::AsyncBufReadExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use session::{Session, SessionSnapshot};
use summarize::GeminiClient;

/// A recap over fewer than two moments is just the moment's own
/// description again, so the console refuses to request one.
const MIN_MOMENTS_FOR_RECAP: usize = 2;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load config from {config_path}: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!(
        model = %config.summarizer.model,
        stream_mode = %config.stream.mode,
        "starting stream-recap console"
    );

    let summarizer = match GeminiClient::new(&config.summarizer) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            eprintln!("failed to set up summarizer: {e}");
            std::process::exit(1);
        }
    };
    let session = Arc::new(Session::new(
        config.stream.clone(),
        &config.capture,
        summarizer,
    ));

    if !config.stream.url.is_empty() {
        match session.load_stream(&config.stream.url) {
            Ok(()) => println!("loading stream {} ...", config.stream.url),
            Err(e) => println!("error: {e}"),
        }
    }

    print_help();
    run_repl(session).await;
}

async fn run_repl(session: Arc<Session>) {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    prompt();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        let (command, rest) = match line.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };

        match command {
            "" => {}
            "load" | "l" => {
                if rest.is_empty() {
                    println!("usage: load <url>");
                } else {
                    match session.load_stream(rest) {
                        Ok(()) => println!("loading stream {rest} ..."),
                        Err(e) => println!("error: {e}"),
                    }
                }
            }
            "capture" | "c" => spawn_capture(&session),
            "recap" | "r" => spawn_recap(&session),
            "moments" | "m" => print_moments(&session),
            "show" => print_moment(&session, rest),
            "status" | "s" => print_status(&session.snapshot()),
            "help" | "h" | "?" => print_help(),
            "quit" | "exit" | "q" => break,
            other => println!("unknown command {other:?}, try \"help\""),
        }
        prompt();
    }
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

/// Captures run as their own task so the prompt stays responsive while
/// the summarizer call is in flight; the session rejects overlapping
/// captures on its own.
fn spawn_capture(session: &Arc<Session>) {
    let session = Arc::clone(session);
    tokio::spawn(async move {
        match session.capture_moment().await {
            Ok(moment) => println!("\n[moment {}] {}", moment.id, moment.summary),
            Err(e) if e.is_busy() => println!("\n{e}"),
            Err(e) => println!("\nerror: {e}"),
        }
        prompt();
    });
}

fn spawn_recap(session: &Arc<Session>) {
    let have = session.moment_count();
    if have < MIN_MOMENTS_FOR_RECAP {
        println!(
            "need at least {MIN_MOMENTS_FOR_RECAP} captured moments for a recap (have {have})"
        );
        return;
    }
    let session = Arc::clone(session);
    tokio::spawn(async move {
        match session.summarize_all().await {
            Ok(summary) => println!("\n--- final summary ---\n{summary}"),
            Err(e) if e.is_busy() => println!("\n{e}"),
            Err(e) => println!("\nerror: {e}"),
        }
        prompt();
    });
}

fn print_moments(session: &Session) {
    let moments = session.moments();
    if moments.is_empty() {
        println!("no moments captured yet");
        return;
    }
    // Newest first; the stored order stays oldest first.
    for moment in moments.iter().rev() {
        println!(
            "[{:>3}] {}  {}",
            moment.id,
            format_timestamp(moment.captured_at_ms),
            moment.summary
        );
    }
}

fn print_moment(session: &Session, arg: &str) {
    let Ok(id) = arg.parse::<u64>() else {
        println!("usage: show <id>");
        return;
    };
    match session.moment(id) {
        Some(moment) => {
            println!(
                "[moment {}] captured {} UTC",
                moment.id,
                format_timestamp(moment.captured_at_ms)
            );
            println!(
                "  {}x{} JPEG, {} bytes",
                moment.image.width, moment.image.height, moment.image.jpeg_bytes
            );
            println!("  {}", moment.summary);
            println!("  {}", moment.image.data_url());
        }
        None => println!("no moment with id {id}"),
    }
}

fn print_status(snap: &SessionSnapshot) {
    match (&snap.stream_url, &snap.source_status) {
        (Some(url), Some(status)) => println!("stream:   {url} ({status})"),
        _ => println!("stream:   none loaded"),
    }
    println!(
        "capture:  {}",
        if snap.capturing { "in flight" } else { "idle" }
    );
    println!(
        "recap:    {}",
        if snap.summarizing { "in flight" } else { "idle" }
    );
    println!("moments:  {}", snap.moment_count);
    if let Some(summary) = &snap.final_summary {
        println!("summary:  {summary}");
    }
    if let Some(error) = &snap.last_error {
        println!("error:    {error}");
    }
}

fn print_help() {
    println!("commands:");
    println!("  load <url>   bind a live stream (mjpeg or polling, per config)");
    println!("  capture      describe the current frame and keep it as a key moment");
    println!("  recap        fold every captured moment into one final summary");
    println!("  moments      list captured moments, newest first");
    println!("  show <id>    print one moment in full, including its image data URL");
    println!("  status       show the session state");
    println!("  quit         exit");
}

fn format_timestamp(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string())
}
