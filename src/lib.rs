pub mod backend;
pub mod cleaning;
pub mod config;
pub mod data_models;
pub mod errors;
pub mod exporter;
pub mod features;
pub mod gbdt;
pub mod hardware;
pub mod heat_index;
pub mod heat_index_table;
pub mod io;
pub mod metrics;
pub mod pipeline;
pub mod planner;
pub mod series_fill;
pub mod split;
pub mod trainer;

#[cfg(test)]
mod tests;
