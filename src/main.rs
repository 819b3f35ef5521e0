//! Binary entry point for `workspace-broker`.

use std::process;

fn main() {
    if let Err(e) = workspace_broker::run() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
