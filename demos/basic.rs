use phoenix_realtime_rs::{RealtimeChannelOptions, RealtimeClient, RealtimeClientOptions};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let url = std::env::var("SUPABASE_URL").expect("SUPABASE_URL must be set in .env");
    let api_key = std::env::var("SUPABASE_API_KEY").expect("SUPABASE_API_KEY must be set in .env");

    let client = RealtimeClient::new(
        url,
        RealtimeClientOptions {
            api_key,
            ..Default::default()
        },
    )?;

    println!("Connecting to Supabase Realtime...");
    client.connect().await;
    println!("Connection state: {:?}", client.connection_state());

    let channel = client.channel("room1", RealtimeChannelOptions::default());
    channel.on_broadcast("message", |payload| {
        println!("📥 message: {}", payload);
    });
    channel.subscribe_with(|status, error| match error {
        Some(e) => println!("❌ {:?}: {}", status, e),
        None => println!("✅ {:?}", status),
    })?;

    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    channel
        .send("message", serde_json::json!({ "text": "hello from rust" }))
        .await?;

    // Keep connection alive
    tokio::signal::ctrl_c().await?;

    println!("Disconnecting...");
    client.remove_all_channels()?;
    client.disconnect();
    println!("Disconnected!");

    Ok(())
}
