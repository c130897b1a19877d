mod logger;

use anyhow::Result;
use clap::{ArgAction, Parser, ValueEnum};
use colored::Colorize;
use logger::Logger;
use mp4decrypt::{Mp4Decrypter, SchemeFamily};
use std::{path::PathBuf, process};

/// Decrypt CENC, OMA DCF, Marlin IPMP and ISMACryp protected mp4 files.
#[derive(Debug, Clone, Parser)]
#[command(version, author = "clitic <clitic21@gmail.com>", about)]
struct Args {
    /// Path of the encrypted mp4 file.
    #[arg(required = true)]
    input: PathBuf,

    /// Path where the decrypted mp4 file is written.
    /// It is left behind on failure and should be discarded.
    #[arg(required = true)]
    output: PathBuf,

    /// Content key for a 128-bit KID in hex or a decimal track id.
    /// Can be used multiple times.
    #[arg(short, long = "key", value_name = "KID|TRACK:KEY")]
    keys: Vec<String>,

    /// Marlin group key used to unwrap ACGK track keys.
    #[arg(long, value_name = "KEY")]
    group_key: Option<String>,

    /// Read track information from this file and decrypt the fragments of input only.
    #[arg(long, value_name = "PATH")]
    fragments_info: Option<PathBuf>,

    /// Protection scheme of input.
    #[arg(long, value_enum, default_value_t = Scheme::Auto)]
    scheme: Scheme,

    /// Increase logging, can be used multiple times.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Disable logging.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Scheme {
    Auto,
    Cenc,
    OmaDcf,
    Marlin,
    Standard,
}

impl Scheme {
    fn family(self) -> Option<SchemeFamily> {
        match self {
            Self::Auto => None,
            Self::Cenc => Some(SchemeFamily::Cenc),
            Self::OmaDcf => Some(SchemeFamily::OmaDcf),
            Self::Marlin => Some(SchemeFamily::Marlin),
            Self::Standard => Some(SchemeFamily::Standard),
        }
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    Logger::init(args.verbose, args.quiet)?;

    let mut builder = Mp4Decrypter::new().keys(&args.keys)?;

    if let Some(key) = &args.group_key {
        builder = builder.group_key(key)?;
    }

    if let Some(scheme) = args.scheme.family() {
        builder = builder.scheme(scheme);
    }

    builder.build()?.decrypt_file(
        &args.input,
        &args.output,
        args.fragments_info.as_ref(),
    )?;

    log::info!(
        "Decrypted {} to {}",
        args.input.display(),
        args.output.display()
    );
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        let code = e
            .downcast_ref::<mp4decrypt::Error>()
            .map(|x| x.code())
            .unwrap_or(mp4decrypt::code::FAILURE);

        eprintln!("{}: {} (code {})", "error".bold().red(), e, code);
        process::exit(1);
    }
}
