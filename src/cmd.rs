mod args;
mod command;

pub use self::args::*;
pub use self::command::*;
