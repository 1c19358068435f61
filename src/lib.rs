pub mod abi;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod storage;
pub mod utils;
