use std::process::ExitCode;

fn main() -> ExitCode {
    apiagent_cli::run()
}
