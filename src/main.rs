//! varex binary

use std::process;
use varex::{EngineError, VarexCli};

fn main() {
    let mut cli = VarexCli::new();

    match cli.run() {
        Ok(()) => {}
        Err(EngineError::Io(e)) => {
            eprintln!("IO Error: {}", e);
            process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
