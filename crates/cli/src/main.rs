use std::process::ExitCode;

fn main() -> ExitCode {
    teamdesk_cli::run()
}
