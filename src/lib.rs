pub mod cli;
pub mod downloader;

pub use cli::{run, Cli};
