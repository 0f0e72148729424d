pub mod analyzers;
pub mod charts;
pub mod export;
pub mod fetch;
pub mod geo;
pub mod map;
pub mod output;
pub mod relay;
pub mod snapshot;
pub mod stats;
