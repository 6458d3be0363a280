use phoenix_realtime_rs::{RealtimeChannelOptions, RealtimeClient, RealtimeClientOptions};
use std::time::Duration;

/// Watches reconnection against a live server. Drop the network while it runs
/// to see the backoff and the channel rejoin in the logs.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let url = std::env::var("SUPABASE_URL").expect("SUPABASE_URL must be set in .env");
    let api_key = std::env::var("SUPABASE_API_KEY").expect("SUPABASE_API_KEY must be set in .env");

    let client = RealtimeClient::new(
        url,
        RealtimeClientOptions {
            api_key,
            heartbeat_interval: Some(5_000),
            ..Default::default()
        },
    )?;

    client.connect().await;
    let channel = client.channel("room:reconnect", RealtimeChannelOptions::default());
    channel.subscribe_with(|status, _| println!("Subscription: {:?}", status))?;

    // Manual disconnect must not reconnect
    tokio::time::sleep(Duration::from_secs(2)).await;
    client.disconnect();
    tokio::time::sleep(Duration::from_secs(5)).await;
    if client.is_connected() {
        return Err("reconnected after a manual disconnect".into());
    }
    println!("✅ Stayed disconnected after manual disconnect\n");

    client.connect().await;
    println!("Reconnected manually, channel is {:?}", channel.status());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tokio::time::sleep(Duration::from_secs(5)) => {
                println!(
                    "state={:?} channel={:?}",
                    client.connection_state(),
                    channel.status()
                );
            }
        }
    }

    client.disconnect();
    Ok(())
}
