pub mod generate;
pub mod pipeline;
