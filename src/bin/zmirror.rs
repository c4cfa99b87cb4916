//! `zmirror` binary entry point; all logic lives in `zmirror_cli`.

use std::process::ExitCode;

fn main() -> ExitCode {
    zmirror_cli::run(std::env::args_os()).into()
}
