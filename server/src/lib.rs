#![allow(missing_docs)]

pub mod api;
pub mod client;
pub mod dedup;
pub mod error;
pub mod fetchers;
pub mod filter;
pub mod lock;
pub mod login;
pub mod normalize;
pub mod recorder;
pub mod state;
pub mod store;
pub mod token;
mod util;
