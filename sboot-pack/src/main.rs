use std::io::{Read, Write};

use clap::{Parser, Subcommand, ValueEnum};

mod image;
mod inspect;
mod layout;
mod pack;

use image::Format;

#[derive(Parser)]
#[command(version, about = "Build and inspect sboot update images", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Ihex,
    Bin,
}

#[derive(Subcommand)]
enum Commands {
    /// Wrap an application image into a header and candidate
    Pack {
        /// Flash map description (TOML)
        #[arg(long, value_parser)]
        layout: clio::Input,

        #[arg(long, value_enum, default_value_t = Format::Auto)]
        format: Format,

        #[arg(long, value_enum, default_value_t = OutputFormat::Ihex)]
        output_format: OutputFormat,

        #[arg(value_parser)]
        input: clio::Input,

        #[arg(value_parser)]
        output: clio::Output,
    },
    /// Decode and check the header and candidate in a flash dump
    Inspect {
        /// Flash map description (TOML)
        #[arg(long, value_parser)]
        layout: clio::Input,

        /// Binary dumps start at the header base
        #[arg(long, value_enum, default_value_t = Format::Auto)]
        format: Format,

        #[arg(value_parser)]
        dump: clio::Input,
    },
}

fn read_all(input: &mut clio::Input) -> Result<Vec<u8>, String> {
    let mut data = Vec::<u8>::new();
    input
        .read_to_end(&mut data)
        .or_else(|e| Err(format!("Could not read {} ({e})", input.path())))?;
    Ok(data)
}

fn write_output(mut output: clio::Output, data: &[u8]) -> Result<(), String> {
    let path = output.path().to_string();
    output
        .write_all(data)
        .or_else(|e| Err(format!("Could not write {path} ({e})")))?;
    output
        .finish()
        .or_else(|e| Err(format!("Could not write {path} ({e})")))?;

    log::info!("Wrote {} bytes to {path}", data.len());
    Ok(())
}

fn read_layout(input: &mut clio::Input) -> Result<layout::Layout, String> {
    let data = read_all(input)?;
    let text =
        core::str::from_utf8(&data).or_else(|e| Err(format!("Invalid UTF-8 string ({e:?})")))?;
    layout::parse(text)
}

fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Commands::Pack {
            mut layout,
            format,
            output_format,
            mut input,
            output,
        } => {
            let layout = read_layout(&mut layout)?;
            let flash = layout.flash;

            let data = read_all(&mut input)?;
            let segments = image::load(&data, format, flash.application.base)?;
            let payload = image::flatten(&segments, &flash.application)?;
            let package = pack::Package::new(payload, &flash)?;

            let out = match output_format {
                OutputFormat::Ihex => pack::to_ihex(&package, &flash)?.into_bytes(),
                OutputFormat::Bin => pack::to_bin(&package, &flash)?,
            };
            write_output(output, &out)
        }
        Commands::Inspect {
            mut layout,
            format,
            mut dump,
        } => {
            let layout = read_layout(&mut layout)?;

            let data = read_all(&mut dump)?;
            let segments = image::load(&data, format, layout.flash.header.base)?;
            let report = inspect::inspect(&segments, &layout)?;
            inspect::log_report(&report);

            if report.installable() {
                Ok(())
            } else {
                Err(String::from("Dump holds no installable candidate"))
            }
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Cli::parse()) {
        log::error!("{e}");
        std::process::exit(1);
    }
}
