pub mod db;
pub mod processor;

pub use db::DbAdapter;
pub use processor::HttpProcessorAdapter;
