use std::process::ExitCode;

fn main() -> ExitCode {
    expensely_cli::run()
}
