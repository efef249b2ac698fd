pub mod fetch;
pub mod gtfs_rt;
pub mod model;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod registry;
pub mod stats;
pub mod store;
pub mod validate;
