#![forbid(unsafe_code)]

mod process;
mod table;

pub use process::{ClientConnection, ListenSocket, Process};
pub use table::ProcessTable;
