pub mod command;
pub mod keyframes;

pub use command::*;
pub use keyframes::*;
