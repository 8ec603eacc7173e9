pub mod consolidate;
pub mod report;
pub mod schema;

use rust_decimal::Decimal;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use taxrec::core::{
    read_bundles_json, AddressRegistry, BundleConsolidator, Consolidation, CurrencyRegistry,
    LoadedBundles,
};

/// Read bundles (JSON) from a file, or stdin with "-"
pub fn read_bundles(
    path: &Path,
    currencies: &mut CurrencyRegistry,
    addresses: &mut AddressRegistry,
) -> anyhow::Result<LoadedBundles> {
    if path.as_os_str() == "-" {
        let mut buffer = Vec::new();
        BufReader::new(io::stdin().lock()).read_to_end(&mut buffer)?;
        if buffer.is_empty() {
            anyhow::bail!("No input received. Provide a file or pipe data to stdin.");
        }
        Ok(read_bundles_json(buffer.as_slice(), currencies, addresses)?)
    } else {
        let file = File::open(path)
            .map_err(|e| anyhow::anyhow!("Cannot open {}: {}", path.display(), e))?;
        Ok(read_bundles_json(BufReader::new(file), currencies, addresses)?)
    }
}

/// Load bundles and run them through the consolidator. `exclude` adds to the file's own list.
pub fn load_and_consolidate(path: &Path, exclude: &[String]) -> anyhow::Result<Consolidation> {
    let mut currencies = CurrencyRegistry::new();
    let mut addresses = AddressRegistry::new();
    let loaded = read_bundles(path, &mut currencies, &mut addresses)?;

    let mut excluded = loaded.excluded_currencies;
    excluded.extend(exclude.iter().cloned());
    let consolidation = BundleConsolidator::new(&excluded).consolidate_detailed(loaded.bundles)?;
    Ok(consolidation)
}

pub fn format_amount(amount: Decimal) -> String {
    amount.normalize().to_string()
}

pub fn format_fiat(amount: Decimal) -> String {
    format!("{:.2}", amount.round_dp(2))
}
