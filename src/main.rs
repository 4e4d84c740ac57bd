//! Command-line interface for extracting embedded PDF images.

use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::Parser;
use log::{info, LevelFilter};

use pdfimages::{extract_images, ExtractOptions};

#[derive(Parser, Debug)]
#[command(
    name = "pdfimages",
    about = "Extract raster images embedded in a PDF document",
    version
)]
struct Args {
    /// PDF file to read.
    input: PathBuf,

    /// Password for encrypted documents.
    #[arg(long, default_value = "")]
    password: String,

    /// Output file name prefix; defaults to the input name without extension.
    #[arg(long)]
    prefix: Option<String>,

    /// Directory to write images into.
    #[arg(long = "out-dir", default_value = ".")]
    out_dir: PathBuf,

    /// Write JPEG-compressed images as-is instead of re-encoding them.
    #[arg(long = "directJPEG")]
    direct_jpeg: bool,

    /// Dump raw sample data without color conversion.
    #[arg(long = "noColorConvert")]
    no_color_convert: bool,

    /// Record the computed rendering resolution in the output files.
    #[arg(long = "includeDensity")]
    include_density: bool,

    /// Verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = match Args::try_parse() {
        Ok(args) => args,
        // Help and version requests are not failures; clap prints them to
        // stdout and exits 0. Malformed arguments exit 1 with usage on stderr.
        Err(e) if e.kind() == clap::error::ErrorKind::DisplayHelp
            || e.kind() == clap::error::ErrorKind::DisplayVersion =>
        {
            e.exit()
        }
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };

    simple_logger::SimpleLogger::new()
        .with_level(if args.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .init()?;

    let options = ExtractOptions {
        direct_jpeg: args.direct_jpeg,
        no_color_convert: args.no_color_convert,
        include_density: args.include_density,
    };

    let written = extract_images(
        &args.input,
        &args.out_dir,
        args.prefix.as_deref(),
        &args.password,
        &options,
    )
    .with_context(|| format!("extracting images from {}", args.input.display()))?;

    for image in &written {
        info!("wrote {} ({}x{})", image.file_name, image.width, image.height);
    }
    info!("extracted {} image(s)", written.len());
    Ok(())
}
