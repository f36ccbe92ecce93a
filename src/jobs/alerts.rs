use std::sync::Arc;

use anyhow::Result;
use chrono::Local;
use serde::Serialize;
use serde_json::{Value, json};

use super::{Job, JobOutcome};
use crate::source::{DataSource, Record, float_field, int_field, raw_field, str_field};

const DEFAULT_MIN_QUANTITY: i64 = 10;
/// Overstock threshold as a multiple of the minimum.
const MAX_QUANTITY_FACTOR: i64 = 5;
/// At or below this share of the minimum a low-stock product is also critical.
const CRITICAL_RATIO: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    LowStock,
    OutOfStock,
    Overstock,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertRecord {
    pub product_id: Value,
    pub name: String,
    pub current_quantity: i64,
    pub min_quantity: i64,
    pub supplier_id: Value,
    pub price: f64,
    pub category: AlertCategory,
    /// Why a product landed in the critical bucket.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_type: Option<&'static str>,
    pub recommendation: String,
}

/// Products grouped by alert. A product may sit in `critical` as well as
/// in `out_of_stock` or `low_stock`.
#[derive(Debug, Default, Serialize)]
pub struct AlertBuckets {
    pub low_stock: Vec<AlertRecord>,
    pub out_of_stock: Vec<AlertRecord>,
    pub overstock: Vec<AlertRecord>,
    pub critical: Vec<AlertRecord>,
}

impl AlertBuckets {
    pub fn total_alerts(&self) -> usize {
        self.low_stock.len() + self.out_of_stock.len() + self.overstock.len()
    }
}

struct ProductStock<'a> {
    product: &'a Record,
    quantity: i64,
    min_quantity: i64,
}

impl ProductStock<'_> {
    fn max_quantity(&self) -> i64 {
        self.min_quantity.saturating_mul(MAX_QUANTITY_FACTOR)
    }

    fn alert(&self, category: AlertCategory, alert_type: Option<&'static str>) -> AlertRecord {
        let recommendation = match (category, alert_type) {
            (AlertCategory::OutOfStock, _) | (AlertCategory::Critical, Some("out_of_stock")) => {
                format!("Restock immediately (minimum {})", self.min_quantity)
            }
            (AlertCategory::Critical, _) => format!(
                "Urgent reorder: {} units left, below half of minimum {}",
                self.quantity, self.min_quantity
            ),
            (AlertCategory::LowStock, _) => format!(
                "Reorder at least {} units",
                self.min_quantity.saturating_sub(self.quantity).max(1)
            ),
            (AlertCategory::Overstock, _) => format!(
                "Review purchasing: {} units exceed maximum {}",
                self.quantity,
                self.max_quantity()
            ),
        };
        AlertRecord {
            product_id: raw_field(self.product, "id"),
            name: str_field(self.product, "name", "Product"),
            current_quantity: self.quantity,
            min_quantity: self.min_quantity,
            supplier_id: raw_field(self.product, "supplier_id"),
            price: float_field(self.product, "price", 0.0),
            category,
            alert_type,
            recommendation,
        }
    }
}

pub fn classify(products: &[Record]) -> AlertBuckets {
    let mut buckets = AlertBuckets::default();

    for product in products {
        let stock = ProductStock {
            product,
            quantity: int_field(product, "quantity", 0),
            min_quantity: int_field(product, "min_quantity", DEFAULT_MIN_QUANTITY),
        };

        if stock.quantity == 0 {
            buckets.out_of_stock.push(stock.alert(AlertCategory::OutOfStock, None));
            buckets
                .critical
                .push(stock.alert(AlertCategory::Critical, Some("out_of_stock")));
        } else if stock.quantity <= stock.min_quantity {
            buckets.low_stock.push(stock.alert(AlertCategory::LowStock, None));
            if stock.quantity as f64 <= stock.min_quantity as f64 * CRITICAL_RATIO {
                buckets
                    .critical
                    .push(stock.alert(AlertCategory::Critical, Some("critical_low_stock")));
            }
        } else if stock.quantity > stock.max_quantity() {
            buckets.overstock.push(stock.alert(AlertCategory::Overstock, None));
        }
    }

    buckets
}

pub fn recommendations(buckets: &AlertBuckets) -> Vec<String> {
    let mut out = Vec::new();
    if !buckets.out_of_stock.is_empty() {
        out.push(format!(
            "URGENT: {} products out of stock - restock immediately",
            buckets.out_of_stock.len()
        ));
    }
    if !buckets.low_stock.is_empty() {
        out.push(format!("Restock {} products with low stock", buckets.low_stock.len()));
    }
    if !buckets.overstock.is_empty() {
        out.push(format!(
            "Review {} products with excess stock",
            buckets.overstock.len()
        ));
    }
    if buckets.critical.is_empty() {
        out.push("Stock levels adequate - keep monitoring".to_string());
    }
    out
}

pub struct StockAlertJob {
    source: Arc<dyn DataSource>,
}

impl StockAlertJob {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self { source }
    }
}

#[async_trait::async_trait]
impl Job for StockAlertJob {
    fn id(&self) -> &str {
        "stock_alerts"
    }

    fn description(&self) -> &str {
        "Classify products against stock thresholds"
    }

    async fn run(&self) -> Result<JobOutcome> {
        let products = self.source.fetch("products").await.into_result("products")?;
        let checked_at = Local::now().to_rfc3339();

        if products.is_empty() {
            return Ok(JobOutcome::success("No products found")
                .with_detail("checked_at", json!(checked_at))
                .with_detail("total_products_checked", json!(0)));
        }

        let buckets = classify(&products);
        let recommendations = recommendations(&buckets);
        let critical = buckets.critical.len();
        if critical > 0 {
            tracing::warn!("{critical} products need immediate stock attention");
        }

        Ok(JobOutcome::success(format!(
            "{} alerts, {critical} critical",
            buckets.total_alerts()
        ))
        .with_detail("checked_at", json!(checked_at))
        .with_detail("total_products_checked", json!(products.len()))
        .with_detail(
            "alerts_summary",
            json!({
                "total_alerts": buckets.total_alerts(),
                "critical_alerts": critical,
                "out_of_stock": buckets.out_of_stock.len(),
                "low_stock": buckets.low_stock.len(),
                "overstock": buckets.overstock.len(),
            }),
        )
        .with_detail("priority_actions", json!(buckets.critical))
        .with_detail("recommendations", json!(recommendations))
        .with_detail("alerts", json!(buckets)))
    }
}
