//! Market Data Service
//!
//! Consumes executed limit-order batches and best-price quotes and maintains,
//! per instrument:
//! - Time-stamped series of base volume, quote volume, open price, high and low
//! - A snapshot map of last price, bid, ask and derived rolling statistics
//! - Rolling-window reads that overlay live window aggregates on the snapshot
//!
//! A background sweeper trims series entries that fell out of the window.
//!
//! # Architecture
//!
//! ```text
//!  limit orders        quotes
//!       │                 │
//!   ┌───▼────┐       ┌────▼───┐
//!   │ Trades │       │ Quotes │
//!   └─┬────┬─┘       └────┬───┘
//!     │    │              │
//! ┌───▼──┐ │  ┌───────────▼──┐
//! │Series│ └──► Snapshot map │
//! └──┬───┘    └──────┬───────┘
//!    │   ┌───────────┘
//! ┌──▼───▼───┐   ┌─────────┐
//! │  Reader  │   │ Sweeper │──► Series
//! └──────────┘   └─────────┘
//! ```

pub mod api;
pub mod assets;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod index;
pub mod ingestion;
pub mod logging;
pub mod metrics;
pub mod publisher;
pub mod quotes;
pub mod retention;
pub mod series;
pub mod service;
pub mod slice;
pub mod snapshot;
pub mod store;
pub mod ticker;
pub mod trades;
pub mod window;

// Library version
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");
