pub mod financial;
pub mod inventory;
pub mod supplier;

use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;

use crate::source::{DataSource, Record, float_field, int_field};

pub use financial::FinancialReport;
pub use inventory::InventoryReport;
pub use supplier::SupplierReport;

/// Produces one structured report from the inventory data.
#[async_trait::async_trait]
pub trait ReportGenerator: Send + Sync {
    /// Short name used in artifact filenames, e.g. `inventory`.
    fn kind(&self) -> &str;
    async fn generate(&self) -> Result<Value>;
}

/// The inventory, supplier and financial generators, in run order.
pub fn default_generators(source: Arc<dyn DataSource>) -> Vec<Box<dyn ReportGenerator>> {
    vec![
        Box::new(InventoryReport::new(source.clone())),
        Box::new(SupplierReport::new(source.clone())),
        Box::new(FinancialReport::new(source)),
    ]
}

// --- Shared product arithmetic ---

pub(crate) fn quantity(product: &Record) -> i64 {
    int_field(product, "quantity", 0)
}

pub(crate) fn price(product: &Record) -> f64 {
    float_field(product, "price", 0.0)
}

pub(crate) fn stock_value(product: &Record) -> f64 {
    float_field(product, "quantity", 0.0) * price(product)
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Price bands shared by the inventory and financial reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PriceBand {
    Low,
    Medium,
    High,
}

impl PriceBand {
    pub(crate) fn of(price: f64) -> Self {
        if price < 50.0 {
            PriceBand::Low
        } else if price < 200.0 {
            PriceBand::Medium
        } else {
            PriceBand::High
        }
    }
}
