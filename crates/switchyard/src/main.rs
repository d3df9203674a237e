use std::io::{self, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    match switchyard::run_daemon(switchyard::register_builtins) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let mut stderr = io::stderr().lock();
            if writeln!(stderr, "switchyardd: {error}").is_err() {
                return ExitCode::from(2);
            }
            ExitCode::FAILURE
        }
    }
}
