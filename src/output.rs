use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::info;

use crate::error::ScrapeError;
use crate::models::Product;

pub const DEFAULT_OUTPUT: &str = "kilimall_products.json";

/// Write products as an indented UTF-8 JSON array. Non-ASCII text is
/// written as-is, not escaped.
pub fn save_to_json(products: &[Product], path: &Path) -> Result<(), ScrapeError> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, products)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    info!("Saved {} products to {}", products.len(), path.display());
    Ok(())
}

/// Save `products` unless the run found none. Returns whether a file was
/// written; an empty run leaves `path` untouched.
pub fn persist(products: &[Product], path: &Path) -> Result<bool, ScrapeError> {
    if products.is_empty() {
        info!("No products to save, leaving {} untouched", path.display());
        return Ok(false);
    }
    save_to_json(products, path)?;
    Ok(true)
}

pub fn load_from_json(path: &Path) -> Result<Vec<Product>, ScrapeError> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(file)?)
}

/// Short run summary: the count, then the first five products.
pub fn summary_lines(products: &[Product]) -> Vec<String> {
    let mut lines = vec![format!(
        "Successfully scraped {} products!",
        products.len()
    )];
    lines.extend(products.iter().take(5).enumerate().map(|(i, p)| {
        format!("{}. {} - {}", i + 1, p.name_or_sentinel(), p.price_or_sentinel())
    }));
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(name: &str, price: Option<&str>) -> Product {
        Product {
            name: Some(name.to_string()),
            price: price.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn writes_readable_json_and_keeps_unicode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let products = vec![product("Kettle – 1.8L", Some("KSh 1,299"))];

        save_to_json(&products, &path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("Kettle – 1.8L"));
        assert!(raw.contains("\n  {"));
        assert!(raw.contains("\"original_price\": \"N/A\""));
        assert_eq!(load_from_json(&path).unwrap(), products);
    }

    #[test]
    fn empty_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kilimall_products.json");

        assert!(!persist(&[], &path).unwrap());
        assert!(!path.exists());

        assert!(persist(&[product("Itel A70", Some("KSh 9,499"))], &path).unwrap());
        assert_eq!(load_from_json(&path).unwrap().len(), 1);
    }

    #[test]
    fn summary_shows_at_most_five() {
        let products: Vec<Product> = (1..=7)
            .map(|i| product(&format!("Item {i}"), None))
            .collect();
        let lines = summary_lines(&products);

        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "Successfully scraped 7 products!");
        assert_eq!(lines[1], "1. Item 1 - N/A");
        assert_eq!(lines[5], "5. Item 5 - N/A");
    }
}
