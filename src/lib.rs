pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod errors;
pub mod logging;
pub mod model;
pub mod parser;
pub mod stage;
pub mod ui;
