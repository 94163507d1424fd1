//! Change reporter: submits namespaced JSON changesets to the admin server.

mod cli;
mod helpers;
mod instrumentation;
mod runtime;
mod source;
mod submitter;

use std::process::ExitCode;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let (log_control, _log_guard) = match instrumentation::tracing::init_tracing() {
        Ok(handles) => handles,
        Err(e) => {
            eprintln!("ERROR: could not initialise logging: {e}");
            return ExitCode::FAILURE;
        }
    };
    instrumentation::tracing::init_panic_handler();

    // Main entrypoint simply delegates control to CLI layer.
    // The CLI resolves settings and then hands over to the runtime.
    let args: Vec<String> = std::env::args().skip(1).collect();
    match cli::cli::run(args, &log_control).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
