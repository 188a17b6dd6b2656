use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use serde_json::Value;

use speccore::simulation::stage::StageKind;
use specdf::data::request::{load_payload, peaks_response, spectrum_response};
use specdf::data::sample_file::SampleFile;
use specdf::error::DataResult;
use specdf::logging;

/// Synthetic spectra and second-derivative peak search.
#[derive(Parser, Debug)]
#[command(name = "specdf", version, about)]
struct Cli {
    /// Log level used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Indent the JSON output
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the spectrum stages of a payload and print one of them
    Spectrum {
        payload: PathBuf,
        /// Stage index 0-3 or name (raw, with_background, with_broadening, with_noise)
        #[arg(long, default_value = "with_noise")]
        stage: StageKind,
        /// Noise seed, overrides `modes.seed`
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Run the peak finder of a payload over a sample file
    Peaks { payload: PathBuf, samples: PathBuf },
}

fn run(command: Command) -> DataResult<Value> {
    match command {
        Command::Spectrum { payload, stage, seed } => spectrum_response(&load_payload(payload)?, stage, seed),
        Command::Peaks { payload, samples } => {
            let payload = load_payload(payload)?;
            peaks_response(&payload, &mut SampleFile::new(samples))
        }
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let output = run(cli.command).and_then(|value| {
        let text = if cli.pretty {
            serde_json::to_string_pretty(&value)?
        } else {
            serde_json::to_string(&value)?
        };
        Ok(text)
    });

    match output {
        Ok(text) => println!("{}", text),
        Err(err) => {
            tracing::error!(error = %err, "request failed");
            process::exit(err.exit_code());
        }
    }
}
