pub mod args;
pub mod commands;

pub use args::{DotArgs, LintArgs, OutputFormat, StatusArgs, ValidateArgs};
use clap::{Parser, Subcommand};

const HELP_TEMPLATE: &str = "\
{name} {version}\n\
{about-with-newline}\n\
USAGE:\n    {usage}\n\
\nOPTIONS:\n{options}\n\
COMMANDS:\n{subcommands}\n";

#[derive(Parser)]
#[command(name = "dsrgraph")]
#[command(version = crate::VERSION)]
#[command(about = "Traversal and execution engine for data subject request graphs")]
#[command(help_template = HELP_TEMPLATE)]
#[command(
    after_long_help = "Typical flow: lint dataset definitions, validate a traversal for an identity, render it with dot, then inspect running requests with status."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[command(
        about = "Build the graph and dry-run a traversal",
        long_about = "Validate loads dataset definitions, builds the dataset graph and runs a traversal from the given identities. It prints the visit order and terminal collections, and exits non-zero when the graph or traversal is invalid.",
        after_help = "Example:\n    dsrgraph validate ./datasets --identity email=customer@example.com"
    )]
    Validate(ValidateArgs),
    #[command(
        about = "Report static problems in dataset definitions",
        long_about = "Lint checks after-constraints, reachability from identity fields and reference typing without building a traversal.",
        after_help = "Example:\n    dsrgraph lint ./datasets --format json"
    )]
    Lint(LintArgs),
    #[command(
        about = "Render the dataset graph as Graphviz DOT",
        after_help = "Example:\n    dsrgraph dot ./datasets --identity email=a@b.com | dot -Tsvg > graph.svg"
    )]
    Dot(DotArgs),
    #[command(
        about = "Show task statuses of a persisted privacy request",
        after_help = "Example:\n    dsrgraph status 4a0f... --workspace ./"
    )]
    Status(StatusArgs),
}

pub async fn run(args: Args) -> crate::Result<()> {
    match args.command {
        Command::Validate(validate_args) => commands::validate(validate_args).await,
        Command::Lint(lint_args) => commands::lint(lint_args).await,
        Command::Dot(dot_args) => commands::dot(dot_args).await,
        Command::Status(status_args) => commands::status(status_args).await,
    }
}
