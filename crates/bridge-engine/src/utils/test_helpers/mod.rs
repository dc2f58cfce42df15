pub mod fixtures;
mod utils;

pub use utils::*;
