// Route tracker - routing-table collection and historical route reconciliation

pub mod collector;
pub mod config;
pub mod error;
pub mod inventory;
pub mod parsers;
pub mod purge;
pub mod routes;
pub mod store;
pub mod transport;
