pub mod commands;
pub mod util;

pub use util::CommandContext;
