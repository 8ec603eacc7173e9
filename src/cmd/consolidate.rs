//! Consolidate command - reconcile bundles and show every stage

use super::{format_amount, load_and_consolidate};
use clap::Args;
use std::path::PathBuf;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};
use taxrec::core::{Consolidation, TransactionBundle};

#[derive(Args, Debug)]
pub struct ConsolidateCommand {
    /// JSON file containing bundles (use - for stdin)
    #[arg(default_value = "-")]
    bundles: PathBuf,

    /// Currency to set aside before reconciliation (repeatable)
    #[arg(short = 'x', long = "exclude")]
    exclude: Vec<String>,

    /// Output as JSON instead of formatted tables
    #[arg(long)]
    json: bool,
}

impl ConsolidateCommand {
    pub fn exec(&self) -> anyhow::Result<()> {
        let consolidation = load_and_consolidate(&self.bundles, &self.exclude)?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&consolidation)?);
            return Ok(());
        }

        print_stages(&consolidation);
        println!();
        print_bundles(consolidation.bundles());
        Ok(())
    }
}

#[derive(Debug, Clone, Tabled)]
struct StageRow {
    #[tabled(rename = "Stage")]
    stage: &'static str,
    #[tabled(rename = "Bundles")]
    count: usize,
}

fn print_stages(consolidation: &Consolidation) {
    let rows = vec![
        StageRow {
            stage: "Excluded",
            count: consolidation.excluded.len(),
        },
        StageRow {
            stage: "Complete",
            count: consolidation.complete.len(),
        },
        StageRow {
            stage: "Deduplicated",
            count: consolidation.deduplicated.len(),
        },
        StageRow {
            stage: "Merged",
            count: consolidation.merged.len(),
        },
        StageRow {
            stage: "Matched",
            count: consolidation.matched.len(),
        },
        StageRow {
            stage: "Self transfers",
            count: consolidation.self_transfers.len(),
        },
        StageRow {
            stage: "Orphans",
            count: consolidation.orphans.len(),
        },
    ];
    let table = Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::new(1..)).with(Alignment::right()))
        .to_string();
    println!("{}", table);
}

#[derive(Debug, Clone, Tabled)]
pub struct BundleRow {
    #[tabled(rename = "Date")]
    pub date: String,
    #[tabled(rename = "Id")]
    pub id: String,
    #[tabled(rename = "Action")]
    pub action: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Movements")]
    pub movements: String,
}

impl From<&TransactionBundle> for BundleRow {
    fn from(bundle: &TransactionBundle) -> Self {
        let movements = bundle
            .atomic_transactions()
            .iter()
            .map(|t| {
                format!(
                    "{} {} {} -> {}{}",
                    format_amount(t.amount()),
                    t.currency(),
                    t.from(),
                    t.to(),
                    if t.is_fee_payment() { " (fee)" } else { "" }
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        BundleRow {
            date: bundle
                .timestamp()
                .map_or(String::new(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
            id: bundle.id().to_string(),
            action: format!("{:?}", bundle.action()),
            status: format!("{:?}", bundle.status()),
            movements,
        }
    }
}

pub fn print_bundles<'a, I>(bundles: I)
where
    I: IntoIterator<Item = &'a TransactionBundle>,
{
    let rows: Vec<BundleRow> = bundles.into_iter().map(BundleRow::from).collect();
    if rows.is_empty() {
        println!("No bundles");
        return;
    }
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}
