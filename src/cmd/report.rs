//! Report command - taxable events computed from reconciled bundles

use super::consolidate::print_bundles;
use super::{format_amount, format_fiat, load_and_consolidate};
use clap::Args;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};
use taxrec::core::Prices;
use taxrec::tax::{calculate_taxes, TaxReport, TaxableEvent, TaxableEventKind};

#[derive(Args, Debug)]
pub struct ReportCommand {
    /// JSON file containing bundles (use - for stdin)
    #[arg(default_value = "-")]
    bundles: PathBuf,

    /// CSV file of daily prices (currency,date,price)
    #[arg(short, long)]
    prices: PathBuf,

    /// Currency to set aside before reconciliation (repeatable)
    #[arg(short = 'x', long = "exclude")]
    exclude: Vec<String>,

    /// Output as JSON instead of formatted tables
    #[arg(long, conflicts_with = "csv")]
    json: bool,

    /// Output events as CSV instead of formatted tables
    #[arg(long)]
    csv: bool,
}

impl ReportCommand {
    pub fn exec(&self) -> anyhow::Result<()> {
        let prices_file = File::open(&self.prices).map_err(|e| {
            anyhow::anyhow!("Cannot open prices {}: {}", self.prices.display(), e)
        })?;
        let prices = Prices::read_csv(BufReader::new(prices_file))?;
        let consolidation = load_and_consolidate(&self.bundles, &self.exclude)?;
        let report = calculate_taxes(&consolidation, &prices)?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        } else if self.csv {
            self.write_csv(&report)
        } else {
            self.print_report(&report);
            Ok(())
        }
    }

    fn write_csv(&self, report: &TaxReport) -> anyhow::Result<()> {
        let mut wtr = csv::Writer::from_writer(io::stdout());
        for event in &report.events {
            wtr.serialize(EventRow::from(event))?;
        }
        wtr.flush()?;
        Ok(())
    }

    fn print_report(&self, report: &TaxReport) {
        println!("TAXABLE EVENTS");
        println!();
        if report.events.is_empty() {
            println!("No taxable events");
        } else {
            let rows: Vec<EventRow> = report.events.iter().map(EventRow::from).collect();
            let table = Table::new(rows)
                .with(Style::rounded())
                .with(Modify::new(Rows::new(1..)).with(Alignment::right()))
                .to_string();
            println!("{}", table);
        }
        println!();
        println!("Total benefit: {}", format_fiat(report.total_benefit()));

        let shortfalls = report.shortfalls();
        if !shortfalls.is_empty() {
            println!();
            println!("SHORTFALLS");
            println!();
            let rows: Vec<ShortfallRow> = shortfalls
                .iter()
                .map(|(event, update)| ShortfallRow {
                    bundle: event.bundle_id.clone(),
                    amount: format_amount(update.amount),
                    note: update.notes.join(" "),
                })
                .collect();
            println!("{}", Table::new(rows).with(Style::rounded()));
        }

        if !report.holdings.is_empty() {
            println!();
            println!("HOLDINGS");
            println!();
            let rows: Vec<HoldingRow> = report
                .holdings
                .iter()
                .map(|h| HoldingRow {
                    currency: h.ticker.clone(),
                    amount: format_amount(h.amount),
                    cost: format_fiat(h.cost),
                })
                .collect();
            let table = Table::new(rows)
                .with(Style::rounded())
                .with(Modify::new(Rows::new(1..)).with(Alignment::right()))
                .to_string();
            println!("{}", table);
        }

        if !report.needs_review.is_empty() {
            println!();
            println!("NEEDS REVIEW ({})", report.needs_review.len());
            println!();
            print_bundles(&report.needs_review);
        }
    }
}

/// Row for the events table and CSV output
#[derive(Debug, Clone, Tabled, serde::Serialize)]
struct EventRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Bundle")]
    bundle_id: String,
    #[tabled(rename = "Type")]
    event_type: String,
    #[tabled(rename = "Details")]
    details: String,
    #[tabled(rename = "Fee")]
    fee: String,
    #[tabled(rename = "Benefit")]
    benefit: String,
}

impl From<&TaxableEvent> for EventRow {
    fn from(event: &TaxableEvent) -> Self {
        let summary = &event.summary;
        let details = match &summary.kind {
            TaxableEventKind::TransferToSelf {
                currency,
                amount,
                from,
                to,
            } => format!("{} {} {} -> {}", format_amount(*amount), currency, from, to),
            TaxableEventKind::Purchase {
                currency,
                amount,
                fiat_currency,
                fiat_amount,
                ..
            } => format!(
                "{} {} for {} {}",
                format_amount(*amount),
                currency,
                format_fiat(*fiat_amount),
                fiat_currency
            ),
            TaxableEventKind::Sale {
                currency,
                amount,
                fiat_currency,
                fiat_amount,
                ..
            } => format!(
                "{} {} for {} {}",
                format_amount(*amount),
                currency,
                format_fiat(*fiat_amount),
                fiat_currency
            ),
            TaxableEventKind::Swap {
                currency_out,
                amount_out,
                currency_in,
                amount_in,
                ..
            } => format!(
                "{} {} for {} {}",
                format_amount(*amount_out),
                currency_out,
                format_amount(*amount_in),
                currency_in
            ),
            TaxableEventKind::GetFree { gains } => gains
                .iter()
                .map(|g| format!("{} {}", format_amount(g.amount), g.currency))
                .collect::<Vec<_>>()
                .join(", "),
        };
        EventRow {
            date: event.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            bundle_id: event.bundle_id.clone(),
            event_type: summary.kind.name().to_string(),
            details,
            fee: summary.fee.as_ref().map_or(String::new(), |f| {
                format!("{} {}", format_amount(f.amount), f.currency)
            }),
            benefit: format_fiat(summary.benefit),
        }
    }
}

#[derive(Debug, Clone, Tabled)]
struct ShortfallRow {
    #[tabled(rename = "Bundle")]
    bundle: String,
    #[tabled(rename = "Missing")]
    amount: String,
    #[tabled(rename = "Note")]
    note: String,
}

#[derive(Debug, Clone, Tabled)]
struct HoldingRow {
    #[tabled(rename = "Currency")]
    currency: String,
    #[tabled(rename = "Amount")]
    amount: String,
    #[tabled(rename = "Cost")]
    cost: String,
}
