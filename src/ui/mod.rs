//! UI layer: status item, popup window and the event loop that drives them

pub mod placement;
mod shell;
pub mod tray;

pub use shell::{run, ShellContext, UserEvent};
