//! confres cli interface

use clap::{Parser, Subcommand, ValueEnum};
use std::fmt::Formatter;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Change the work directory
    ///
    /// Can be specified multiple times. Note that all
    /// paths on the way to the final path must exist.
    ///
    /// This is equivalent to running { cd <directory>; confres ... }
    #[clap(short = 'C', long = "directory", global(true))]
    pub directory: Vec<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Evaluate configurations
    ///
    /// Reads HCL from stdin unless any other source is provided (via --input-*)
    #[command(alias = "eval")]
    Evaluate(EvaluateCommand),

    /// Compare two sets of configuration files
    Diff(DiffCommand),

    /// Print debug information for development
    Dev(DevCommand),
}

#[derive(Parser, Debug)]
pub struct EvaluateCommand {
    #[clap(flatten)]
    pub input: InputArgs,

    #[clap(flatten)]
    pub output: OutputArgs,

    /// Files providing default configuration
    ///
    /// Used for anything the input does not configure itself.
    #[clap(long = "defaults")]
    pub defaults: Vec<PathBuf>,

    /// Only evaluate configurations of this type (pid or alias)
    #[clap(value_name = "TYPE")]
    pub kind: Option<String>,

    /// Only evaluate the instance with this id
    #[clap(requires("kind"))]
    pub id: Option<String>,

    /// Variable overrides as `--name=value`
    ///
    /// These beat variables declared in documents.
    #[clap(last = true)]
    pub overrides: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct DiffCommand {
    /// Files of the old configuration
    #[clap(long = "old", required = true)]
    pub old: Vec<PathBuf>,

    /// Files of the new configuration
    #[clap(long = "new", required = true)]
    pub new: Vec<PathBuf>,

    #[clap(flatten)]
    pub output: OutputArgs,
}

#[derive(Parser, Debug)]
pub struct InputArgs {
    /// Load files from work directory
    #[clap(short = 'w', long = "input-workdir")]
    pub workdir: bool,

    /// Load a file
    #[clap(short = 'f', long = "input-file")]
    pub files: Vec<PathBuf>,

    /// Load files from given directory
    #[clap(short = 'd', long = "input-dir")]
    pub directories: Vec<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct OutputArgs {
    #[arg(short = 'F', long = "output-format", default_value_t)]
    pub format: OutputFormat,
}

#[derive(ValueEnum, Clone, Default, Debug)]
pub enum OutputFormat {
    Json,
    #[default]
    Yaml,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Json => f.write_str("json"),
            OutputFormat::Yaml => f.write_str("yaml"),
        }
    }
}

#[derive(Parser, Debug)]
pub struct DevCommand {
    #[command(subcommand)]
    pub command: DevSubCommand,
}

#[derive(Subcommand, Debug)]
pub enum DevSubCommand {
    /// Loaded hcl documents
    Documents,
    /// Merged configuration store
    Store,
    /// Registered schemas
    Schemas,
}
