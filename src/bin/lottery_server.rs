//! Lottery server - collects agency bets and draws once all have notified.
//!
//! ```text
//! LISTEN_ADDRESS=0.0.0.0:12345 EXPECTED_AGENCIES=5 lottery_server
//! ```

use lottery_wire::config::ServerConfig;
use lottery_wire::events::TracingSink;
use lottery_wire::server::LotteryServer;
use lottery_wire::telemetry::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing("lottery_server=info,lottery_wire=info");

    let config = ServerConfig::load()?;
    let server = LotteryServer::bind(config, TracingSink::shared()).await?;

    server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    tracing::info!("Lottery server stopped");
    Ok(())
}
