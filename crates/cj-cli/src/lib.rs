#![forbid(unsafe_code)]

use std::path::PathBuf;

use clap::Parser;

use cj_io::{IoError, ReadOptions, WriteOptions, load_table, write_csv_file};
use cj_join::{JoinStrategy, join_tables};

#[derive(Parser, Debug, Clone)]
#[command(name = "csv-join")]
#[command(about = "Join two delimited-text tables on a key column")]
#[command(version)]
pub struct Args {
    /// Log load and join details (RUST_LOG takes precedence)
    #[arg(short, long)]
    pub verbose: bool,

    /// Filename of the left table
    pub left_file_name: PathBuf,

    /// Name of the column to use as the primary key for the left table
    pub left_primary_key: String,

    /// Filename of the right table
    pub right_file_name: PathBuf,

    /// Name of the column to use as the primary key for the right table
    pub right_primary_key: String,

    /// Output filename
    pub output_file_name: PathBuf,

    /// Type of join: left, right, inner or full
    #[arg(short = 't', long = "type", value_name = "TYPE", default_value_t = JoinStrategy::Left)]
    pub join_strategy: JoinStrategy,

    /// Single-byte field delimiter for inputs and output
    #[arg(short, long, default_value = ",", value_parser = parse_delimiter)]
    pub delimiter: u8,
}

fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value.as_bytes() {
        [byte] => Ok(*byte),
        _ => Err(format!("delimiter must be a single ASCII character, got `{value}`")),
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub output_rows: usize,
    pub output_columns: usize,
}

pub fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

/// Loads both tables, joins them and writes the result. Nothing is written
/// unless both loads succeed.
pub fn run(args: &Args) -> Result<RunSummary, IoError> {
    let read_options = ReadOptions {
        delimiter: args.delimiter,
    };
    let left = load_table(&args.left_file_name, &args.left_primary_key, read_options)?;
    let right = load_table(&args.right_file_name, &args.right_primary_key, read_options)?;

    let merged = join_tables(&left, &right, args.join_strategy);
    write_csv_file(
        &args.output_file_name,
        merged.header(),
        merged.rows(),
        WriteOptions {
            delimiter: args.delimiter,
        },
    )?;

    let summary = RunSummary {
        output_rows: merged.rows().len(),
        output_columns: merged.header().len(),
    };
    log::info!(
        "{} join wrote {} rows x {} columns to {}",
        args.join_strategy,
        summary.output_rows,
        summary.output_columns,
        args.output_file_name.display()
    );
    Ok(summary)
}
