pub mod api;
pub mod config;
pub mod ledger;
pub mod model;
pub mod observability;
