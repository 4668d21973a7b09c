use clap::Args;
use std::path::PathBuf;

#[derive(Clone, clap::ValueEnum, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable summary
    #[default]
    Text,
    /// JSON payload suitable for downstream tooling
    Json,
}

#[derive(Args, Clone, Debug)]
pub struct ValidateArgs {
    /// Dataset YAML file, or a directory of them
    #[arg(value_name = "DATASETS")]
    pub datasets: PathBuf,

    /// Identity value seeding the traversal, as key=value (repeatable)
    #[arg(long = "identity", value_name = "KEY=VALUE")]
    pub identity: Vec<String>,

    /// Workspace holding dsrgraph.toml and .dsrgraph/ (defaults to current directory)
    #[arg(long, value_name = "DIR")]
    pub workspace: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Args, Clone, Debug)]
pub struct LintArgs {
    /// Dataset YAML file, or a directory of them
    #[arg(value_name = "DATASETS")]
    pub datasets: PathBuf,

    #[arg(long, value_name = "DIR")]
    pub workspace: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Args, Clone, Debug)]
pub struct DotArgs {
    /// Dataset YAML file, or a directory of them
    #[arg(value_name = "DATASETS")]
    pub datasets: PathBuf,

    /// Render the traversal seeded with these identities instead of the raw graph
    #[arg(long = "identity", value_name = "KEY=VALUE")]
    pub identity: Vec<String>,

    /// Write DOT to this file instead of stdout
    #[arg(long, short, value_name = "FILE")]
    pub output: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    pub workspace: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
pub struct StatusArgs {
    /// Privacy request id
    #[arg(value_name = "REQUEST_ID")]
    pub request_id: String,

    /// Workspace holding the state directory (defaults to current directory)
    #[arg(long, value_name = "DIR")]
    pub workspace: Option<PathBuf>,

    /// Include retrieved rows (sensitive keys are redacted)
    #[arg(long)]
    pub show_data: bool,

    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}
