// Local crates
use crate::{
    helpers::load_config::{ConfigError, Settings},
    instrumentation::tracing::LogControl,
    runtime,
};

// External crates
use anyhow::Result;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::instrument;

const USAGE: &str = "\
--help/-h:                       show this output message
--configuration/-c FILE:         sets the configuration file
--debug/-d/-v:                   enables debugging/verbose output
--run-mode forever|until-idle:   keep running until signalled, or exit once submissions complete
--changes FILE:                  submit the JSON-lines changesets in FILE (- for stdin)
";

/// Entry function for CLI: resolve settings from `args` (without the program
/// name), then hand over to the runtime.
pub async fn run(args: Vec<String>, log_control: &LogControl) -> Result<()> {
    let settings = resolve(&args, log_control)?;
    runtime::runtime::run_change_reporter(settings).await
}

/// Resolve settings from defaults, an optional key-file and flags.
///
/// Flags are applied strictly left to right: `--debug` raises log verbosity
/// for everything after it, including loading a later `--configuration`.
/// `--help` prints usage and scanning carries on; unknown tokens are ignored.
#[instrument(name = "config_resolver", level = "debug", skip_all)]
pub fn resolve<S: AsRef<str>>(args: &[S], log_control: &LogControl) -> Result<Settings, ConfigError> {
    let mut settings = Settings::default();
    let mut tokens = args.iter().map(AsRef::<str>::as_ref);

    while let Some(token) = tokens.next() {
        match token {
            "--help" | "-h" => write_usage(&mut io::stderr()),
            "--debug" | "-d" | "-v" => {
                settings.debug = true;
                log_control.enable_debug();
                tracing::debug!("Debugging output enabled");
            }
            "--configuration" | "-c" => {
                let path = PathBuf::from(value_for(token, tokens.next())?);
                settings = settings.overlay_key_file(&path)?;
            }
            "--run-mode" => {
                settings.run_mode = value_for(token, tokens.next())?.parse()?;
                tracing::debug!(run_mode = %settings.run_mode, "Run mode selected");
            }
            "--changes" => {
                settings.changes = Some(PathBuf::from(value_for(token, tokens.next())?));
            }
            other => tracing::debug!(token = other, "Ignoring unrecognised argument"),
        }
    }

    tracing::debug!(
        "admin_server_host: {} - admin_server_port: {}",
        settings.admin_server_host,
        settings.admin_server_port
    );
    Ok(settings)
}

fn write_usage(out: &mut impl Write) {
    if let Err(e) = out.write_all(USAGE.as_bytes()) {
        tracing::debug!(error = %e, "Could not print usage");
    }
}

fn value_for<'a>(flag: &str, value: Option<&'a str>) -> Result<&'a str, ConfigError> {
    value.ok_or_else(|| ConfigError::MissingArgument {
        flag: flag.to_string(),
    })
}
