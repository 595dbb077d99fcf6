//! pdfsave - Apply form and annotation edits to a PDF file
//!
//! Reads a JSON object of edits keyed by annotation id (`"12R"`) or editor
//! id, and writes the input file followed by an incremental update.

use addendum_core::annotations::storage_from_json;
use addendum_core::{PDFDocument, PdfError, RangeSource, SaveRequest};
use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser};
use memmap2::Mmap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Apply edits to a PDF file as an incremental update.
#[derive(Parser, Debug)]
#[command(name = "pdfsave")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the PDF file to update
    input: PathBuf,

    /// JSON file with the edits, `-` for stdin
    #[arg(short = 'e', long)]
    edits: Option<PathBuf>,

    /// Output file, `-` for stdout
    #[arg(short = 'o', long, default_value = "-")]
    outfile: String,

    /// Password for encrypted files
    #[arg(short = 'P', long, default_value = "")]
    password: String,

    /// Only save widgets of the first N pages
    #[arg(long)]
    pages: Option<usize>,

    /// The form only exists as XFA
    #[arg(long = "pure-xfa", action = ArgAction::SetTrue)]
    pure_xfa: bool,

    /// File with a replacement XFA datasets packet
    #[arg(long = "xfa-data")]
    xfa_data: Option<PathBuf>,

    /// Name hashed into the new file identifier (defaults to the output name)
    #[arg(long)]
    filename: Option<String>,

    /// Use debug logging level
    #[arg(short = 'd', long, action = ArgAction::SetTrue)]
    debug: bool,
}

/// Byte ranges served straight from a memory map.
struct MmapSource(Mmap);

impl RangeSource for MmapSource {
    fn length(&self) -> usize {
        self.0.len()
    }

    fn read_range(&self, begin: usize, end: usize) -> addendum_core::Result<Vec<u8>> {
        self.0
            .get(begin..end)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| PdfError::Transport(format!("range [{begin}, {end}) outside of the file")))
    }
}

fn read_edits(path: Option<&Path>) -> Result<String> {
    let Some(path) = path else {
        return Ok("{}".to_string());
    };
    if path == Path::new("-") {
        let mut json = String::new();
        io::stdin().read_to_string(&mut json)?;
        return Ok(json);
    }
    fs::read_to_string(path).with_context(|| format!("cannot read edits from {}", path.display()))
}

fn output_name(args: &Args) -> Option<String> {
    if args.filename.is_some() {
        return args.filename.clone();
    }
    if args.outfile == "-" {
        return args
            .input
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
    }
    Path::new(&args.outfile)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    if !args.input.exists() {
        bail!("file not found: {}", args.input.display());
    }
    let file = File::open(&args.input)?;
    // SAFETY: the map is read-only and the file is not modified while it is open.
    let mmap = unsafe { Mmap::map(&file) }?;
    let doc = PDFDocument::open(Arc::new(MmapSource(mmap)), &args.password)
        .with_context(|| format!("cannot open {}", args.input.display()))?;

    let storage = storage_from_json(&read_edits(args.edits.as_deref())?).context("invalid edits")?;
    let mut request = SaveRequest::new(storage);
    request.num_pages = args.pages;
    request.is_pure_xfa = args.pure_xfa;
    request.filename = output_name(&args);
    if let Some(path) = &args.xfa_data {
        request.xfa_data = Some(
            fs::read_to_string(path)
                .with_context(|| format!("cannot read XFA data from {}", path.display()))?,
        );
    }

    let saved = doc.save(&request)?;
    info!(pages = doc.page_count(), bytes = saved.len(), "saved");

    if args.outfile == "-" {
        let mut stdout = io::stdout().lock();
        stdout.write_all(&saved)?;
        stdout.flush()?;
    } else {
        fs::write(&args.outfile, &saved)
            .with_context(|| format!("cannot write {}", args.outfile))?;
    }
    Ok(())
}
