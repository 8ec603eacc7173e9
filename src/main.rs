use clap::{Parser, Subcommand};

mod cmd;

#[derive(Parser, Debug)]
#[command(
    name = "taxrec",
    version,
    about = "Reconcile transaction bundles and compute realized gains"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile bundles and print the result of every stage
    Consolidate(cmd::consolidate::ConsolidateCommand),
    /// Reconcile bundles, then compute taxable events
    Report(cmd::report::ReportCommand),
    /// Print the expected input formats
    Schema(cmd::schema::SchemaCommand),
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Command::Consolidate(consolidate) => consolidate.exec(),
        Command::Report(report) => report.exec(),
        Command::Schema(schema) => schema.exec(),
    }
}
