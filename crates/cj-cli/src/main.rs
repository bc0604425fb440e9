#![forbid(unsafe_code)]

use clap::Parser;

use cj_cli::{Args, init_logging, run};

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(err) = run(&args) {
        eprintln!("csv-join: {err}");
        std::process::exit(1);
    }
}
