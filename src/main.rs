#[tokio::main]
async fn main() -> travelbuddy::error::Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("travelbuddy=info"),
    )
    .init();
    log::info!("Starting travelbuddy Telegram webhook bot");

    match travelbuddy::run().await {
        Ok(()) => {
            log::info!("Bot shut down successfully");
            Ok(())
        }
        Err(e) => {
            log::error!("Bot encountered an error: {e}");
            Err(e)
        }
    }
}
