use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use huddle_client::{ClientConfig, HuddleClient, spawn_health_probe};
use huddle_sync::attachments::PositionError;
use huddle_sync::{
    AttachmentActions, LocationProvider, MessageSync, SessionBuilder, SqliteCache, SyncConfig, SyncUpdate,
    follow_connectivity,
};
use huddle_types::models::{BackgroundColor, Location, Message, MessageDraft};

const PROBE_INTERVAL: Duration = Duration::from_secs(5);

/// Position typed on the command line: `/location <lat> <lon>`.
struct TypedLocation(Option<Location>);

impl LocationProvider for TypedLocation {
    async fn request_permission(&self) -> bool {
        true
    }

    async fn current_position(&self) -> Result<Option<Location>, PositionError> {
        Ok(self.0)
    }
}

fn parse_location(args: &str) -> Option<Location> {
    let mut parts = args.split_whitespace().map(str::parse::<f64>);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(Ok(latitude)), Some(Ok(longitude)), None) => Some(Location { latitude, longitude }),
        _ => None,
    }
}

fn render(message: &Message) -> String {
    let body = if let Some(text) = &message.text {
        text.clone()
    } else if let Some(url) = &message.image {
        format!("[image] {}", url)
    } else if let Some(at) = &message.location {
        format!("[location] {:.5}, {:.5}", at.latitude, at.longitude)
    } else {
        String::new()
    };
    let pending = if message.id.is_none() { " (sending)" } else { "" };
    format!(
        "{} {}: {}{}",
        message.created_at.format("%H:%M"),
        message.author_name,
        body,
        pending
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle=info,huddle_client=info,huddle_sync=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let name = args.next().unwrap_or_else(|| "Guest".into());
    let color = match args.next() {
        Some(hex) => hex.parse::<BackgroundColor>()?,
        None => BackgroundColor::default(),
    };

    let config = ClientConfig::from_env()?;
    let client = HuddleClient::new(config.server_url.clone())?;

    let session = SessionBuilder::new()
        .name(name)
        .color(color)
        .start(&client)
        .await
        .context("could not start a session")?;
    println!("Welcome, {}! (background {})", session.display_name, session.background_color);

    let cache = SqliteCache::open(&config.cache_path)?;
    let sync = MessageSync::new(
        client.clone(),
        cache,
        session,
        SyncConfig::for_collection(config.collection.clone()),
    );

    let mut updates = sync.subscribe();
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(SyncUpdate::Messages(messages)) => {
                    println!("──────────");
                    for message in messages.iter().rev() {
                        println!("{}", render(message));
                    }
                }
                Ok(SyncUpdate::Connectivity { online }) => {
                    println!("[{}]", if online { "online" } else { "offline" });
                }
                Ok(SyncUpdate::Banner(text)) => println!("[!] {}", text),
                Ok(SyncUpdate::Alert(text)) => println!("[ALERT] {}", text),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Display fell behind by {} updates", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let (signal, _probe) = spawn_health_probe(client.clone(), PROBE_INTERVAL);
    let follower = tokio::spawn(follow_connectivity(sync.clone(), signal));

    println!("Type a message, /image <path>, /location <lat> <lon>, or /quit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line == "/quit" {
            break;
        } else if let Some(path) = line.strip_prefix("/image ") {
            let actions = AttachmentActions::new(client.clone(), TypedLocation(None));
            let _ = actions.upload_and_send_image(&sync, path.trim()).await;
        } else if let Some(rest) = line.strip_prefix("/location") {
            let actions = AttachmentActions::new(client.clone(), TypedLocation(parse_location(rest)));
            let _ = actions.send_location(&sync).await;
        } else {
            sync.send(MessageDraft::text(line));
        }
    }

    sync.close();
    follower.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn location_needs_exactly_two_numbers() {
        assert_eq!(
            parse_location(" 48.85 2.35"),
            Some(Location {
                latitude: 48.85,
                longitude: 2.35
            })
        );
        assert_eq!(parse_location(""), None);
        assert_eq!(parse_location("48.85"), None);
        assert_eq!(parse_location("north 2.35"), None);
        assert_eq!(parse_location("1 2 3"), None);
    }

    #[test]
    fn unacknowledged_messages_render_as_sending() {
        let message = Message {
            id: None,
            author_id: "u1".into(),
            author_name: "Ada".into(),
            text: Some("hi".into()),
            image: None,
            location: None,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 9, 30, 0).unwrap(),
        };
        assert_eq!(render(&message), "09:30 Ada: hi (sending)");
    }
}
