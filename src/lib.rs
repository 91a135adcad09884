pub mod config;
pub mod error;
pub mod event;
pub mod feed;
pub mod supabase;
pub mod sync;
pub mod trigger;
pub mod twitch;
pub mod utils;

#[cfg(test)]
mod local_server;
