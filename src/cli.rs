use clap::Parser;
use std::path::PathBuf;

const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Target: ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Render layered documents: groups, smart objects and smart filters
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    /// Document to load (JSON)
    #[arg(value_name = "DOC")]
    pub doc: PathBuf,

    /// Write the composite image to this PNG
    #[arg(short = 'o', long = "output", value_name = "PNG")]
    pub output: Option<PathBuf>,

    /// Also save a copy of the document with all layers merged into one
    #[arg(long = "flatten", value_name = "DOC")]
    pub flatten: Option<PathBuf>,

    /// Reload linked smart objects whose files changed since load
    #[arg(long = "check-reload")]
    pub check_reload: bool,

    /// Print the layer tree
    #[arg(short = 't', long = "tree")]
    pub tree: bool,

    /// Enable logging to file (default: strata.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,
}
