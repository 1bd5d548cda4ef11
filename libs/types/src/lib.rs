//! Types library for the market data services
//!
//! Shared primitives used by every service that reads or writes market data:
//! identifiers, quote sides and the decimal helpers used at the store boundary.
//!
//! # Modules
//! - `ids`: Identifiers (InstrumentId, AssetId, OrderId)
//! - `numeric`: Decimal parsing/formatting for the string boundary
//! - `order`: Order and quote side

pub mod ids;
pub mod numeric;
pub mod order;
