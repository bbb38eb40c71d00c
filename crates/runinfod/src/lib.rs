pub mod annotate;
pub mod cli;
pub mod init;
pub mod watcher;
