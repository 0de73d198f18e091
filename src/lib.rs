//! Monte Carlo asset-price engine: modified GBM with optional Merton jumps and
//! year-indexed drift/volatility overrides, reduced to distributional and
//! tail-risk statistics. The `server`, `db` and `scenario` modules form the
//! HTTP shell around the engine; `sim` and `analytics` have no I/O.

pub mod analytics;
pub mod config;
pub mod db;
pub mod errors;
pub mod scenario;
pub mod server;
pub mod sim;
pub mod state;
