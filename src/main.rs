use std::process::ExitCode;

fn main() -> ExitCode {
    forgeplane::run()
}
