pub mod audit;
pub mod config;
pub mod fsutil;
pub mod ledger;
pub mod loaded;
pub mod lock;
pub mod paths;
pub mod pipeline;
pub mod prompt;
pub mod report;
pub mod result_store;
pub mod util;
pub mod walker;
pub mod warn;
