//! # Live Board Feed Test
//!
//! Connects to the public board API through lib_livechan, prints the board
//! directory, then listens to one board for a while and prints every post the
//! poller delivers.

use clap::Parser;
use lib_livechan::{
    BoardFeed, BoardPoller, ChanClient, ChannelSink, ClientSettings, DispatchHub, HubSettings,
    ListenerFilter, PollTuning, SourceRegistry,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(about = "Live smoke check against the board API")]
struct Args {
    /// Board to listen to
    #[arg(short, long, default_value = "g")]
    board: String,

    /// How long to listen, in seconds
    #[arg(short, long, default_value_t = 120)]
    seconds: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // // Statement: Plain stdout logging so the poller's decisions are visible
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .chain(std::io::stdout())
        .apply()?;

    let client = ChanClient::new(ClientSettings::default())?;
    let sources = Arc::new(SourceRegistry::new(PollTuning::default()));

    println!("[*] Requesting board directory...");
    match sources.refresh(&client).await {
        Ok(_) => {
            println!("\n[SUCCESS] {} boards listed.", sources.list().len());
            println!("-----------------------------------------------");
            for meta in sources.list().iter().take(10) {
                println!("/{}/ - {}", meta.key, meta.title);
            }
            println!("-----------------------------------------------");
        }
        Err(e) => {
            eprintln!("\n[ERROR] Directory retrieval failed:");
            eprintln!(">>> {}", e);
            std::process::exit(1);
        }
    }

    if !sources.contains(&args.board) {
        eprintln!("\n[ERROR] Board /{}/ is not in the directory.", args.board);
        std::process::exit(1);
    }

    let hub = DispatchHub::new(Arc::clone(&sources), HubSettings::default());
    let feed: Arc<dyn BoardFeed> = Arc::new(client);
    BoardPoller::new(feed, hub.clone()).spawn();

    let (sink, mut posts) = ChannelSink::channel(1024);
    hub.subscribe(sink, ListenerFilter::source(args.board.clone()));

    println!("[*] Listening to /{}/ for {}s...", args.board, args.seconds);
    let deadline = tokio::time::sleep(Duration::from_secs(args.seconds));
    tokio::pin!(deadline);

    let mut received = 0usize;
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            frame = posts.recv() => match frame {
                Some(text) => {
                    received += 1;
                    let post: serde_json::Value = serde_json::from_str(&text)?;
                    println!(
                        "[POST] /{}/ #{} (thread {})",
                        post["board"].as_str().unwrap_or("?"),
                        post["no"],
                        post["resto"]
                    );
                }
                None => break,
            },
        }
    }

    println!("\n[INFO] Status at exit:");
    println!("{}", serde_json::to_string_pretty(&hub.status())?);
    hub.shutdown().await;

    if received == 0 {
        eprintln!("\n[ERROR] No posts received from /{}/.", args.board);
        std::process::exit(1);
    }
    println!("\n[SUCCESS] {} posts received.", received);
    Ok(())
}
