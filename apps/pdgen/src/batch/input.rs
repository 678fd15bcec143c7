//! Input CSV reader. Columns: `name`, `features` (required), `category`,
//! `audience`, `keywords` (optional, keywords comma-separated).

use std::path::Path;

use serde::Deserialize;

use crate::errors::AppError;
use crate::generation::features::ProductInput;

#[derive(Debug, Deserialize)]
struct InputRecord {
    name: String,
    features: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    audience: String,
    #[serde(default)]
    keywords: String,
}

/// Reads every product row up front. Rows may leave out trailing optional
/// columns; any other read or schema error is fatal.
pub fn read_products(path: &Path) -> Result<Vec<ProductInput>, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|e| AppError::Input(format!("cannot read {}: {e}", path.display())))?;

    let mut products = Vec::new();
    for (index, record) in reader.deserialize::<InputRecord>().enumerate() {
        let record = record.map_err(|e| {
            AppError::Input(format!("{} row {}: {e}", path.display(), index + 1))
        })?;
        products.push(ProductInput::from_raw(
            index,
            &record.name,
            &record.features,
            &record.category,
            &record.audience,
            &record.keywords,
        ));
    }
    Ok(products)
}
