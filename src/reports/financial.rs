use std::sync::Arc;

use anyhow::Result;
use chrono::Local;
use serde_json::{Value, json};

use super::{PriceBand, ReportGenerator, price, stock_value};
use crate::jobs::round2;
use crate::source::{DataSource, Record, raw_field, str_field};

// Planning ratios: share of inventory sold per month, cost share of sales,
// operating cost share of inventory, and assumed supplier return.
const MONTHLY_SALES_RATIO: f64 = 0.3;
const COST_OF_GOODS_RATIO: f64 = 0.7;
const OPERATING_COST_RATIO: f64 = 0.05;
const SUPPLIER_ROI_RATIO: f64 = 0.2;

pub struct FinancialReport {
    source: Arc<dyn DataSource>,
}

impl FinancialReport {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self { source }
    }
}

#[async_trait::async_trait]
impl ReportGenerator for FinancialReport {
    fn kind(&self) -> &str {
        "financial"
    }

    async fn generate(&self) -> Result<Value> {
        let products = self.source.fetch("products").await.into_result("products")?;
        if products.is_empty() {
            anyhow::bail!("No products available");
        }
        let suppliers = self.source.fetch("suppliers").await.into_records_or_empty();
        Ok(build(&products, &suppliers))
    }
}

fn ratio_pct(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        round2(part / whole * 100.0)
    } else {
        0.0
    }
}

pub(crate) fn build(products: &[Record], suppliers: &[Record]) -> Value {
    let inventory_value: f64 = products.iter().map(stock_value).sum();
    let monthly_sales = inventory_value * MONTHLY_SALES_RATIO;
    let cost_of_goods = monthly_sales * COST_OF_GOODS_RATIO;
    let gross_profit = monthly_sales - cost_of_goods;
    let operating_costs = inventory_value * OPERATING_COST_RATIO;
    let net_profit = gross_profit - operating_costs;

    let mut bands = [(0usize, 0.0f64); 3];
    for p in products {
        let slot = match PriceBand::of(price(p)) {
            PriceBand::Low => 0,
            PriceBand::Medium => 1,
            PriceBand::High => 2,
        };
        bands[slot].0 += 1;
        bands[slot].1 += stock_value(p);
    }
    let band = |(count, value): (usize, f64)| {
        json!({
            "count": count,
            "total_value": round2(value),
            "percentage": ratio_pct(value, inventory_value),
        })
    };

    let supplier_roi: Vec<Value> = suppliers
        .iter()
        .map(|s| {
            let id = raw_field(s, "id");
            let value: f64 = products
                .iter()
                .filter(|p| !id.is_null() && raw_field(p, "supplier_id") == id)
                .map(stock_value)
                .sum();
            json!({
                "supplier_name": str_field(s, "name", "Supplier"),
                "inventory_value": round2(value),
                "estimated_monthly_roi": round2(value * SUPPLIER_ROI_RATIO / value.max(1.0) * 100.0),
            })
        })
        .collect();

    let turnover = if inventory_value > 0.0 {
        round2(monthly_sales / inventory_value)
    } else {
        0.0
    };

    json!({
        "report_type": "financial",
        "generated_at": Local::now().to_rfc3339(),
        "summary": {
            "total_inventory_value": round2(inventory_value),
            "estimated_monthly_sales": round2(monthly_sales),
            "estimated_gross_profit": round2(gross_profit),
            "estimated_net_profit": round2(net_profit),
            "profit_margin": ratio_pct(net_profit, monthly_sales),
        },
        "cost_analysis": {
            "cost_of_goods_sold": round2(cost_of_goods),
            "operating_costs": round2(operating_costs),
            "inventory_turnover_ratio": turnover,
        },
        "category_breakdown": {
            "low_value_products": band(bands[0]),
            "medium_value_products": band(bands[1]),
            "high_value_products": band(bands[2]),
        },
        "supplier_roi_analysis": supplier_roi,
    })
}
