//! Binary entrypoint that launches the Taskline agent bootstrap.

use std::process::ExitCode;

use taskline_agent::start_taskline_agent;

/// Start the agent server with configuration drawn from the environment.
fn main() -> ExitCode {
    start_taskline_agent::run()
}
