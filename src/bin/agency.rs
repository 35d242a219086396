//! Agency client - submits a bet dataset, then asks for its winners.
//!
//! Configuration comes from `CONFIG_FILE` and the environment:
//!
//! ```text
//! AGENCY_ID=1 SERVER_ADDRESS=127.0.0.1:12345 DATASET_PATH=agency-1.csv agency
//! ```

use lottery_wire::client::{run_agency, CsvBetSource};
use lottery_wire::config::ClientConfig;
use lottery_wire::events::TracingSink;
use lottery_wire::telemetry::init_tracing;
use lottery_wire::LotteryError;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing("agency=info,lottery_wire=info");

    let config = ClientConfig::load()?;
    let dataset = config
        .dataset_path
        .clone()
        .ok_or_else(|| LotteryError::Config("DATASET_PATH must be set".into()))?;

    tracing::info!(
        agency = config.agency_id,
        server = %config.server_address,
        senders = config.sender_count,
        dataset = %dataset.display(),
        "Agency starting"
    );

    let source = CsvBetSource::open(&dataset, config.agency_id).await?;
    let agency = config.agency_id;
    let outcome = run_agency(config, source, TracingSink::shared()).await?;

    tracing::info!(
        agency,
        bets = outcome.report.bets_sent,
        winners = outcome.winners.len(),
        "Agency finished"
    );
    Ok(())
}
