//! Schema command - print expected input formats

use clap::Args;
use schemars::schema_for;
use taxrec::core::{BundleInput, PriceRecord};

#[derive(Args, Debug)]
pub struct SchemaCommand {
    /// Output format: json-schema (bundles), csv-header or csv-fields (prices)
    #[arg(value_enum, default_value = "json-schema")]
    format: SchemaFormat,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum SchemaFormat {
    /// JSON Schema for the bundle input
    JsonSchema,
    /// CSV header row of the price file
    CsvHeader,
    /// Price file column descriptions
    CsvFields,
}

impl SchemaCommand {
    pub fn exec(&self) -> anyhow::Result<()> {
        match self.format {
            SchemaFormat::JsonSchema => self.print_json_schema(),
            SchemaFormat::CsvHeader => {
                println!("{}", PriceRecord::csv_header());
                Ok(())
            }
            SchemaFormat::CsvFields => {
                self.print_csv_fields();
                Ok(())
            }
        }
    }

    fn print_json_schema(&self) -> anyhow::Result<()> {
        let schema = schema_for!(BundleInput);
        println!("{}", serde_json::to_string_pretty(&schema)?);
        Ok(())
    }

    fn print_csv_fields(&self) {
        println!("Price CSV Format");
        println!("================");
        println!();
        for field in PriceRecord::csv_schema() {
            let req = if field.required { "required" } else { "optional" };
            println!("{:20} ({:8})  {}", field.name, req, field.description);
        }
        println!();
        println!("A missing day uses the most recent price from up to 4 days earlier.");
    }
}
