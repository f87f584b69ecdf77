pub mod cli;
pub mod config;
pub mod data;
pub mod evaluate;
pub mod pipeline;
pub mod probing;
pub mod train;
pub mod vocab;
