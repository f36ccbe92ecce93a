use std::sync::Arc;

use anyhow::Result;
use chrono::Local;
use serde_json::{Value, json};

use super::{ReportGenerator, mean, price, quantity, stock_value};
use crate::jobs::round2;
use crate::source::{DataSource, Record, raw_field, str_field};

const TOP_SUPPLIERS: usize = 5;

pub struct SupplierReport {
    source: Arc<dyn DataSource>,
}

impl SupplierReport {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self { source }
    }
}

#[async_trait::async_trait]
impl ReportGenerator for SupplierReport {
    fn kind(&self) -> &str {
        "supplier"
    }

    async fn generate(&self) -> Result<Value> {
        let suppliers = self.source.fetch("suppliers").await.into_result("suppliers")?;
        if suppliers.is_empty() {
            anyhow::bail!("No suppliers available");
        }
        let products = self.source.fetch("products").await.into_records_or_empty();
        Ok(build(&suppliers, &products))
    }
}

struct SupplierLine {
    value: f64,
    products: usize,
    json: Value,
}

pub(crate) fn build(suppliers: &[Record], products: &[Record]) -> Value {
    let mut lines: Vec<SupplierLine> = suppliers
        .iter()
        .map(|supplier| {
            let id = raw_field(supplier, "id");
            let supplied: Vec<&Record> = products
                .iter()
                .filter(|p| !id.is_null() && raw_field(p, "supplier_id") == id)
                .collect();
            let value: f64 = supplied.iter().map(|p| stock_value(p)).sum();
            let prices: Vec<f64> = supplied.iter().map(|p| price(p)).collect();
            let json = json!({
                "supplier_id": id,
                "supplier_name": str_field(supplier, "name", "Supplier"),
                "contact": str_field(supplier, "contact", "N/A"),
                "email": str_field(supplier, "email", "N/A"),
                "products_supplied": supplied.len(),
                "total_inventory_value": round2(value),
                "average_product_price": round2(mean(&prices)),
                "product_list": supplied
                    .iter()
                    .map(|p| json!({
                        "id": raw_field(p, "id"),
                        "name": str_field(p, "name", "Product"),
                        "quantity": quantity(p),
                        "price": price(p),
                    }))
                    .collect::<Vec<_>>(),
            });
            SupplierLine {
                value,
                products: supplied.len(),
                json,
            }
        })
        .collect();

    lines.sort_by(|a, b| b.value.total_cmp(&a.value));

    let total_products: usize = lines.iter().map(|l| l.products).sum();
    let total_value: f64 = lines.iter().map(|l| l.value).sum();
    let top_supplier = lines
        .first()
        .map(|l| l.json["supplier_name"].clone())
        .unwrap_or_else(|| json!("N/A"));
    let all: Vec<Value> = lines.into_iter().map(|l| l.json).collect();

    json!({
        "report_type": "suppliers",
        "generated_at": Local::now().to_rfc3339(),
        "summary": {
            "total_suppliers": all.len(),
            "total_products_supplied": total_products,
            "total_supply_value": round2(total_value),
            "average_products_per_supplier": round2(total_products as f64 / all.len().max(1) as f64),
            "top_supplier": top_supplier,
        },
        "top_suppliers": all.iter().take(TOP_SUPPLIERS).cloned().collect::<Vec<_>>(),
        "suppliers": all,
    })
}
