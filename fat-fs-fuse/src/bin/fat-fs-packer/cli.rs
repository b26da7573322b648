use std::path::PathBuf;

use clap::Parser;
use typed_bytesize::ByteSizeIec;

#[derive(Parser)]
pub struct Cli {
    /// Directory of files to pack into the image
    #[arg(long, short)]
    pub source: PathBuf,

    /// Output directory
    #[arg(long, short = 'O')]
    pub out_dir: PathBuf,

    /// Volume size
    #[arg(long, default_value = "64MiB")]
    pub size: ByteSizeIec,
}
