//! Presence tracking
//!
//! Each connection holds one presence entry per channel, grouped under
//! `presence_key`. Calling `track()` again replaces the metadata of that entry.

use phoenix_realtime_rs::{
    RealtimeChannel, RealtimeChannelOptions, RealtimeClient, RealtimeClientOptions,
};
use std::time::Duration;

fn display_presence_list(channel: &RealtimeChannel) {
    let presence = channel.presence_list();
    println!("📋 Users present: {} entries", presence.len());
    for (key, metas) in &presence {
        println!("   - {}: {:?}", key, metas);
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let url = std::env::var("SUPABASE_URL").expect("SUPABASE_URL must be set in .env");
    let api_key = std::env::var("SUPABASE_API_KEY").expect("SUPABASE_API_KEY must be set in .env");
    let user = std::env::args().nth(1).unwrap_or_else(|| "Ludo".to_string());

    let client = RealtimeClient::new(
        url,
        RealtimeClientOptions {
            api_key,
            ..Default::default()
        },
    )?;
    client.connect().await;

    let channel = client.channel(
        "room:lobby",
        RealtimeChannelOptions {
            presence_key: Some(user.clone()),
            ..Default::default()
        },
    );

    // Register listeners before subscribing so the first sync is not missed
    channel.on_presence_join(|key, metas| println!("👋 {} joined ({} metas)", key, metas.len()));
    channel.on_presence_leave(|key, metas| println!("🚪 {} left ({} metas)", key, metas.len()));
    channel.on_presence_sync(|state| println!("🔄 sync: {} keys", state.len()));
    channel.subscribe()?;

    tokio::time::sleep(Duration::from_secs(1)).await;
    channel
        .track(serde_json::json!({ "user": user, "status": "online" }))?
        .receive("ok", |_| println!("✅ tracked"))
        .receive("error", |reason| println!("❌ track rejected: {}", reason));

    tokio::time::sleep(Duration::from_secs(2)).await;
    display_presence_list(&channel);

    channel.track(serde_json::json!({ "user": user, "status": "away" }))?;
    tokio::time::sleep(Duration::from_secs(2)).await;
    display_presence_list(&channel);

    println!("Press Ctrl+C to leave");
    tokio::signal::ctrl_c().await?;

    channel.untrack()?;
    tokio::time::sleep(Duration::from_millis(500)).await;
    client.remove_channel(&channel)?;
    client.disconnect();
    Ok(())
}
