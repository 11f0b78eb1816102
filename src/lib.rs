pub mod aggregator_core;
pub mod config;
pub mod pipeline;
pub mod replay;
pub mod sink_core;
