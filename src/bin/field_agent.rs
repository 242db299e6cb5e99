//! Provider device agent: reads "lat,lng" fixes from stdin and reports them,
//! optionally mirroring one chat and the open job board over the change feed.

use dotenv::dotenv;
use fixlink::{
    agent::{
        chat::ChatMirror,
        connect_feed,
        reporter::{parse_fix, HttpLocationSink, LocationReporter, ReportOutcome},
        AgentConfig,
    },
    realtime::{client::Delivery, feed::JobBoard, protocol::Table},
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::filter::LevelFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::INFO)
        .init();

    dotenv().ok();

    let config = AgentConfig::init();
    let (manager, connection) = connect_feed(&config);

    let mut jobs = manager.subscribe(Table::Jobs, None);
    tokio::spawn(async move {
        let mut board = JobBoard::new();
        while let Some(delivery) = jobs.next().await {
            match delivery {
                Delivery::Change(event) => {
                    if board.apply_event(&event) {
                        tracing::info!("{} open jobs visible", board.open_jobs().len());
                    }
                }
                Delivery::ResyncRequired { cursor } => {
                    tracing::warn!("Job board stale after #{}, clearing", cursor);
                    board = JobBoard::new();
                }
                Delivery::Rejected(reason) => {
                    tracing::error!("Job subscription rejected: {}", reason);
                    break;
                }
            }
        }
    });

    if let Some(chat_id) = config.chat_id {
        let mut mirror = ChatMirror::new(&config.api_url, config.token.clone(), chat_id);
        let mut handle = mirror.subscribe(&manager);
        tokio::spawn(async move {
            match mirror.refresh().await {
                Ok(count) => tracing::info!("Loaded {} messages for chat {}", count, chat_id),
                Err(e) => tracing::warn!("Could not load chat history: {}", e),
            }
            while let Some(delivery) = handle.next().await {
                match mirror.apply(delivery).await {
                    Ok(Some(message)) => {
                        tracing::info!("[{}] {}: {}", message.created_at, message.sender_id, message.body)
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!("Chat mirror stopped: {}", e);
                        break;
                    }
                }
            }
        });
    }

    let mut reporter = LocationReporter::new(HttpLocationSink::new(&config.api_url, config.token.clone()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match parse_fix(&line) {
                    Some(point) => {
                        if reporter.observe(point).await == ReportOutcome::Sent {
                            tracing::debug!("Reported {:?}", point);
                        }
                    }
                    None => tracing::warn!("Expected \"lat,lng\", got {:?}", line),
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Failed to read stdin: {}", e);
                break;
            }
        }
    }

    drop(manager);
    connection.abort();
}
