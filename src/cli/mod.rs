pub mod config_cmd;
pub mod output;
pub mod renderer;
pub mod usage_cmd;
