//! Stresstest binary for content-addressable file stores.
//!
//! Select a backend with `--aostor`, `--weed` or `--memory`, see `--help` for all options. The
//! process exits with a non-zero code matching the kind of failure, see
//! [`Error::exit_code`](filestore_stresstest::Error::exit_code).

use std::process::ExitCode;

use filestore_stresstest::Error;
use filestore_stresstest::cli;
use filestore_stresstest::error::EXIT_CONFIG;

fn main() -> ExitCode {
    match cli::execute() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            let code = error
                .downcast_ref::<Error>()
                .map_or(EXIT_CONFIG, Error::exit_code);
            ExitCode::from(code)
        }
    }
}
