use std::sync::Arc;

use anyhow::Result;
use chrono::Local;
use serde_json::{Value, json};

use super::{PriceBand, ReportGenerator, mean, price, quantity, stock_value};
use crate::jobs::round2;
use crate::source::{DataSource, Record, raw_field, str_field};

/// Products under this many units count as low stock in the inventory report.
const LOW_STOCK_UNITS: i64 = 10;
const TOP_VALUABLE: usize = 10;

pub struct InventoryReport {
    source: Arc<dyn DataSource>,
}

impl InventoryReport {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self { source }
    }
}

#[async_trait::async_trait]
impl ReportGenerator for InventoryReport {
    fn kind(&self) -> &str {
        "inventory"
    }

    async fn generate(&self) -> Result<Value> {
        let products = self.source.fetch("products").await.into_result("products")?;
        if products.is_empty() {
            anyhow::bail!("No products available");
        }
        Ok(build(&products))
    }
}

fn product_line(p: &Record) -> Value {
    json!({
        "id": raw_field(p, "id"),
        "name": str_field(p, "name", "Product"),
        "quantity": quantity(p),
        "price": price(p),
    })
}

pub(crate) fn build(products: &[Record]) -> Value {
    let quantities: Vec<f64> = products.iter().map(|p| quantity(p) as f64).collect();
    let prices: Vec<f64> = products.iter().map(price).collect();
    let total_quantity: i64 = products.iter().map(quantity).sum();
    let total_value: f64 = products.iter().map(stock_value).sum();

    let low_stock: Vec<&Record> = products
        .iter()
        .filter(|p| quantity(p) < LOW_STOCK_UNITS)
        .collect();
    let out_of_stock = products.iter().filter(|p| quantity(p) == 0).count();

    let mut by_value: Vec<&Record> = products.iter().collect();
    by_value.sort_by(|a, b| stock_value(b).total_cmp(&stock_value(a)));

    let band_count = |band: PriceBand| prices.iter().filter(|&&p| PriceBand::of(p) == band).count();

    json!({
        "report_type": "inventory",
        "generated_at": Local::now().to_rfc3339(),
        "summary": {
            "total_products": products.len(),
            "total_quantity": total_quantity,
            "total_inventory_value": round2(total_value),
            "average_quantity_per_product": round2(mean(&quantities)),
            "average_price_per_product": round2(mean(&prices)),
            "low_stock_alerts": low_stock.len(),
        },
        "analysis": {
            "price_distribution": {
                "low": band_count(PriceBand::Low),
                "medium": band_count(PriceBand::Medium),
                "high": band_count(PriceBand::High),
            },
            "stock_status": {
                "adequate_stock": products.len() - low_stock.len(),
                "low_stock": low_stock.len(),
                "out_of_stock": out_of_stock,
            },
        },
        "details": {
            "low_stock_products": low_stock.iter().map(|p| product_line(p)).collect::<Vec<_>>(),
            "most_valuable_products": by_value
                .iter()
                .take(TOP_VALUABLE)
                .map(|p| {
                    let mut line = product_line(p);
                    line["total_value"] = json!(round2(stock_value(p)));
                    line
                })
                .collect::<Vec<_>>(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::testing::StaticSource;

    #[test]
    fn test_inventory_summary() {
        let products = vec![
            json!({"id": 1, "name": "Bolt", "quantity": 100, "price": 0.5}),
            json!({"id": 2, "name": "Drill", "quantity": 3, "price": 250.0}),
            json!({"id": 3, "name": "Saw", "quantity": 0, "price": 75.0}),
        ];
        let report = build(&products);
        assert_eq!(report["summary"]["total_products"], 3);
        assert_eq!(report["summary"]["total_quantity"], 103);
        assert_eq!(report["summary"]["total_inventory_value"], 800.0);
        assert_eq!(report["summary"]["low_stock_alerts"], 2);
        assert_eq!(report["analysis"]["stock_status"]["out_of_stock"], 1);
        assert_eq!(report["analysis"]["price_distribution"]["low"], 1);
        assert_eq!(report["analysis"]["price_distribution"]["medium"], 1);
        assert_eq!(report["analysis"]["price_distribution"]["high"], 1);
        assert_eq!(report["details"]["most_valuable_products"][0]["name"], "Drill");
    }

    #[tokio::test]
    async fn test_inventory_requires_products() {
        let empty = InventoryReport::new(Arc::new(StaticSource::new().with("products", vec![])));
        assert!(empty.generate().await.is_err());

        let failing = InventoryReport::new(Arc::new(StaticSource::new().failing("products", "down")));
        let err = failing.generate().await.unwrap_err();
        assert!(err.to_string().contains("down"));
    }
}
