use phoenix_realtime_rs::{
    PostgresChangeEvent, PostgresChangesFilter, RealtimeChannelOptions, RealtimeClient,
    RealtimeClientOptions,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let url = std::env::var("SUPABASE_URL").expect("SUPABASE_URL must be set in .env");
    let api_key = std::env::var("SUPABASE_API_KEY").expect("SUPABASE_API_KEY must be set in .env");

    println!("📡 Connecting to: {}\n", url);
    let client = RealtimeClient::new(
        url,
        RealtimeClientOptions {
            api_key,
            ..Default::default()
        },
    )?;
    client.connect().await;

    let channel = client.channel("schema-db-changes", RealtimeChannelOptions::default());

    // Inserts on users only
    channel.on_postgres_changes(
        PostgresChangesFilter::new(PostgresChangeEvent::Insert, "public").table("users"),
        |change| println!("🆕 users insert: {:?}", change.new_record()),
    );
    channel.on_postgres_changes(
        PostgresChangesFilter::new(PostgresChangeEvent::Update, "public").table("users"),
        |change| {
            println!(
                "✏️  users update: {:?} -> {:?}",
                change.old_record(),
                change.new_record()
            )
        },
    );
    // Every event on posts
    channel.on_postgres_changes(
        PostgresChangesFilter::new(PostgresChangeEvent::All, "public").table("posts"),
        |change| println!("📝 posts {:?} at {}", change.event_type(), change.commit_timestamp()),
    );

    channel.subscribe_with(|status, error| println!("Subscription: {:?} {:?}", status, error))?;

    println!("Listening for database changes, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    client.remove_channel(&channel)?;
    client.disconnect();
    Ok(())
}
