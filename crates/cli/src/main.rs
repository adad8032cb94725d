use std::process::ExitCode;

fn main() -> ExitCode {
    plantwise_cli::run()
}
