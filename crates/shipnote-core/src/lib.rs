pub mod commit;
pub mod config;
pub mod filter;
pub mod redact;

pub use commit::*;
