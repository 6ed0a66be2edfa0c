use std::process::ExitCode;

fn main() -> ExitCode {
    payrail_cli::run()
}
