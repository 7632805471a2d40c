pub mod config;
pub mod db;
pub mod error;
pub mod flow;
pub mod provider;
pub mod state;
pub mod store;
pub mod token;

pub use flow::{Gateway, TokenPair};
