use std::path::PathBuf;

use clap::Parser;

/// Format a FAT32 image and copy host files into it
#[derive(Parser)]
pub struct Cli {
    /// Image size in MiB
    #[arg(long, short, default_value_t = 64)]
    pub size: u64,

    /// Output image
    #[arg(long, short)]
    pub out: PathBuf,

    /// Directory inside the image that receives the files
    #[arg(long, short, default_value = "/")]
    pub dir: String,

    /// Host files to copy
    pub files: Vec<PathBuf>,
}
