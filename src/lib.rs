// For integration tests only, gamemind ships as a single binary
pub mod cli;
pub mod completion;
pub mod config;
pub mod decision;
pub mod logging;
pub mod protocol;
pub mod server;
