// src/lib.rs — Library root for stimgen

pub mod api;
pub mod cli;
pub mod client;
pub mod infra;
pub mod pipeline;
pub mod session;
pub mod util;
