//! # lottery-wire
//!
//! Agency bet submission over a length-prefixed binary protocol, and the
//! lottery server that collects the bets and runs a one-shot draw.
//!
//! ## Architecture
//!
//! - **Protocol**: 4-byte big-endian length, 1-byte type tag, typed body
//! - **Client**: producer → batch aggregator → sender lanes, then a winners
//!   query with bounded retries
//! - **Server**: one task per connection, a mutex-guarded registry and a
//!   rendezvous barrier gating the draw
//!
//! ## Example
//!
//! ```ignore
//! use lottery_wire::client::{run_agency, MemorySource};
//! use lottery_wire::config::ClientConfig;
//! use lottery_wire::events::TracingSink;
//!
//! #[tokio::main]
//! async fn main() -> lottery_wire::Result<()> {
//!     let config = ClientConfig::load()?;
//!     let outcome = run_agency(config, MemorySource::default(), TracingSink::shared()).await?;
//!     println!("{:?}", outcome.report);
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod bet;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod protocol;
pub mod server;
pub mod telemetry;
pub mod transport;

pub use bet::Bet;
pub use error::{LotteryError, Result};
