//! EFT histograms: command-line front-end
//!
//! ```text
//! eft_histos <settings.toml> [output.json]
//! ```
//!
//! Reads the analysis settings, processes every sample from its JSON event
//! files, and writes the resulting histogram store. The output location is,
//! in order of priority, the second command-line argument, the `output` entry
//! of the settings, or `histos.json`.
//!
//! Log verbosity is controlled by the `RUST_LOG` environment variable.

#![warn(missing_docs)]

use eft_histos::{pipeline, JsonSource, Settings};

use eyre::{bail, WrapErr};
use tracing::info;
use tracing_subscriber::EnvFilter;

use std::{env, path::PathBuf, time::Instant};

/// We'll use eyre's type-erased result type throughout the application
type Result<T> = eyre::Result<T>;

/// Default location of the histogram store
const DEFAULT_OUTPUT: &str = "histos.json";

/// This will act as our main function, with suitable error handling
fn main() -> Result<()> {
    // ### LOGGING ###

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ### CONFIGURATION READOUT ###

    let mut args = env::args_os().skip(1);
    let Some(settings_path) = args.next().map(PathBuf::from) else {
        bail!("Usage: eft_histos <settings.toml> [output.json]");
    };
    let output_override = args.next().map(PathBuf::from);
    if args.next().is_some() {
        bail!("Too many arguments. Usage: eft_histos <settings.toml> [output.json]");
    }

    let settings = Settings::load(&settings_path)
        .wrap_err_with(|| format!("Failed to load the settings from {settings_path:?}"))?;
    let output = output_override
        .or_else(|| settings.output.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));
    let cfg = settings
        .into_configuration()
        .wrap_err("Failed to set up the analysis")?;

    // ### HISTOGRAM PRODUCTION ###

    // NOTE: We start the clock after configuration I/O, which is not what we
    //       want to measure
    let start = Instant::now();
    let store = pipeline::run(&cfg, &JsonSource).wrap_err("Failed to produce the histograms")?;
    info!("Histograms produced in {:?}", start.elapsed());

    // ### RESULTS STORAGE ###

    store
        .save(&output)
        .wrap_err_with(|| format!("Failed to write the histograms to {output:?}"))?;
    info!("Wrote {} histograms to {output:?}", store.len());

    // ...and we're done
    Ok(())
}
