pub mod args;

use clap::Parser;
pub use args::{Arguments, ErrorStrategy};

pub fn parse() -> Arguments {
    Arguments::parse()
}
