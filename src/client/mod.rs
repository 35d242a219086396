//! Agency client: bet submission pipeline and winners query.
//!
//! # Example
//!
//! ```ignore
//! use lottery_wire::client::{run_agency, CsvBetSource};
//! use lottery_wire::config::ClientConfig;
//! use lottery_wire::events::TracingSink;
//!
//! let config = ClientConfig::load()?;
//! let source = CsvBetSource::open("agency-1.csv", config.agency_id).await?;
//! let outcome = run_agency(config, source, TracingSink::shared()).await?;
//! println!("{} winners", outcome.winners.len());
//! ```

mod pipeline;
mod sender;
mod source;
mod winners;

pub use pipeline::{ConnectionPipeline, PipelineReport};
pub use sender::SenderReport;
pub use source::{BetSource, CsvBetSource, MemorySource};
pub use winners::{WinnersRetryLoop, WinnersState};

use crate::config::ClientConfig;
use crate::error::Result;
use crate::events::SharedSink;

/// Result of a full agency run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgencyOutcome {
    pub report: PipelineReport,
    pub winners: Vec<u32>,
}

/// Submit every bet from `source`, then resolve this agency's winners.
pub async fn run_agency<S>(
    config: ClientConfig,
    source: S,
    events: SharedSink,
) -> Result<AgencyOutcome>
where
    S: BetSource + 'static,
{
    let address = config.server_address.clone();
    let winners_loop =
        WinnersRetryLoop::new(config.agency_id, config.winners.clone(), events.clone());

    let report = ConnectionPipeline::new(config, source, events).run().await?;
    let winners = winners_loop.query(&address).await?;

    Ok(AgencyOutcome { report, winners })
}
