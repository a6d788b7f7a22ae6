pub mod cli;
pub mod load_config;
pub mod notion;
pub mod server;
pub mod wechat;

pub use cli::{run, Cli, Commands};
