use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    version,
    about = "mdscatter CLI - Neutron-scattering and structural observables from MD trajectories.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Set the number of threads for parallel computation.
    /// Also the default worker count of `run` when the job does not set `running_mode`.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run an analysis job on a trajectory.
    Run(RunArgs),
    /// List the registered jobs, grouped by family.
    List,
    /// Show the parameters of a job with their kinds and defaults.
    Info {
        /// Job name, case-insensitive.
        #[arg(required = true)]
        job: String,
    },
    /// Inspect or edit the user atoms database.
    Atoms(AtomsArgs),
    /// Show where user data (atoms database, settings) is stored.
    Data(DataArgs),
}

/// Arguments for the `run` subcommand.
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Job name, case-insensitive (see `mdscatter list`).
    #[arg(required = true)]
    pub job: String,

    /// Job parameter file in TOML format, one key per job parameter.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Input trajectory, overriding `trajectory` from the parameter file.
    #[arg(short, long, value_name = "PATH")]
    pub input: Option<PathBuf>,

    /// Output root, overriding the root of `output_files` from the parameter file.
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Set a job parameter, overriding the parameter file. The value is parsed as TOML and
    /// kept as a string when that fails. Can be used multiple times.
    /// Example: -S frames=[0,100,2] -S weights=mass
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}

/// Arguments for the `atoms` subcommand.
#[derive(Args, Debug)]
pub struct AtomsArgs {
    #[command(subcommand)]
    pub command: AtomsCommands,
}

#[derive(Subcommand, Debug)]
pub enum AtomsCommands {
    /// Print the properties of one element, or list every element.
    Show {
        symbol: Option<String>,
    },
    /// Add an element with every property at its default value.
    AddAtom {
        #[arg(required = true)]
        symbol: String,
    },
    /// Add a property to every element.
    AddProperty {
        #[arg(required = true)]
        name: String,
        /// One of float, int, str, list.
        #[arg(required = true, value_name = "TYPE")]
        property_type: String,
    },
    /// Set one property of one element. The value is parsed as TOML.
    Set {
        #[arg(required = true)]
        symbol: String,
        #[arg(required = true)]
        property: String,
        #[arg(required = true)]
        value: String,
    },
}

/// Arguments for the `data` subcommand.
#[derive(Args, Debug)]
pub struct DataArgs {
    #[command(subcommand)]
    pub command: DataCommands,
}

/// Available commands for data management.
#[derive(Subcommand, Debug)]
pub enum DataCommands {
    /// Show the absolute path to the local data directory.
    Path,
    /// Set a custom absolute path for the local data directory.
    SetPath {
        /// The new path to use for storing data files.
        #[arg(required = true)]
        path: PathBuf,
    },
    /// Reset the data path to its default, OS-specific location.
    ResetPath,
}
