pub mod config;
pub mod database;
pub mod dataset;
pub mod errors;
pub mod load;
pub mod notify;
pub mod pipeline;
pub mod sources;
pub mod transform;
pub mod uploads;
pub mod utils;
pub mod validate;
