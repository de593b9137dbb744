#![forbid(unsafe_code)]

pub mod cli;
pub mod refresh;
pub mod signals;
