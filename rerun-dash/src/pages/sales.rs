//! Sales explorer page

use super::Page;
use crate::render::format_number;
use crate::ui::Ui;
use anyhow::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rerun_cache::{Content, FunctionSpec, InvocationContext, MemoCache, ValueFn};
use serde::Serialize;

pub const NAME: &str = "sales";

pub const REGIONS: &[&str] = &["north", "south", "east", "west"];
pub const CATEGORIES: &[&str] = &["hardware", "software", "services"];
const MONTHS: &[&str] = &[
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sale {
    pub month: u32,
    pub region: String,
    pub category: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthTotal {
    pub month: u32,
    pub orders: usize,
    pub total: f64,
}

/// Seeded synthetic order book
pub fn generate_sales(rows: usize, seed: u64) -> Vec<Sale> {
    let mut rng = StdRng::seed_from_u64(seed);

    (0..rows)
        .map(|_| {
            let month = rng.gen_range(1..=12);
            // Seasonal bump toward the end of the year
            let base = 40.0 + 5.0 * month as f64;
            Sale {
                month,
                region: REGIONS.choose(&mut rng).copied().unwrap_or("north").to_string(),
                category: CATEGORIES
                    .choose(&mut rng)
                    .copied()
                    .unwrap_or("hardware")
                    .to_string(),
                amount: (base * rng.gen_range(0.2..4.0) * 100.0).round() / 100.0,
            }
        })
        .collect()
}

/// Totals per month (all twelve, empty months included) after filtering.
///
/// `region == "all"` keeps every region; an empty category list keeps nothing.
pub fn monthly_totals(
    sales: &[Sale],
    region: &str,
    categories: &[String],
    min_amount: f64,
) -> Vec<MonthTotal> {
    let mut totals: Vec<MonthTotal> = (1..=12)
        .map(|month| MonthTotal {
            month,
            orders: 0,
            total: 0.0,
        })
        .collect();

    for sale in sales.iter().filter(|sale| {
        (region == "all" || sale.region == region)
            && categories.contains(&sale.category)
            && sale.amount >= min_amount
    }) {
        // Sales outside 1..=12 belong to no month
        let slot = (sale.month as usize)
            .checked_sub(1)
            .and_then(|index| totals.get_mut(index));
        if let Some(slot) = slot {
            slot.orders += 1;
            slot.total += sale.amount;
        }
    }

    for total in &mut totals {
        total.total = (total.total * 100.0).round() / 100.0;
    }
    totals
}

pub struct Sales {
    load: ValueFn<(u32, u64), Vec<Sale>>,
    totals: ValueFn<(Content<Vec<Sale>>, String, Vec<String>, f64), Vec<MonthTotal>>,
}

impl Sales {
    pub fn register(cache: &MemoCache) -> Result<Self> {
        let load = cache.register_value(
            FunctionSpec::new("sales.load").version("1"),
            |(rows, seed): (u32, u64)| async move { Ok(generate_sales(rows as usize, seed)) },
        )?;

        let totals = cache.register_value(
            FunctionSpec::new("sales.monthly_totals").version("1"),
            |(sales, region, categories, min_amount): (Content<Vec<Sale>>, String, Vec<String>, f64)| async move {
                Ok(monthly_totals(&sales, &region, &categories, min_amount))
            },
        )?;

        Ok(Self { load, totals })
    }

    async fn render(&self, ctx: &InvocationContext, ui: &mut Ui<'_>) -> Result<()> {
        ui.title("Sales explorer");

        let rows = ui.slider("rows", 100, 50_000, 5_000);
        let seed = ui.slider("seed", 0, 1000, 7);

        let mut regions = vec!["all"];
        regions.extend_from_slice(REGIONS);
        let region = ui.select("region", &regions, 0);
        let categories = ui.multiselect("categories", CATEGORIES, CATEGORIES);
        let min_amount = ui.number_input("min_amount", 0.0, 500.0, 0.0);

        let sales = ctx.value(&self.load, (rows as u32, seed as u64)).await?;
        let totals = ctx
            .value(
                &self.totals,
                (Content(sales), region.clone(), categories.clone(), min_amount),
            )
            .await?;

        let orders: usize = totals.iter().map(|t| t.orders).sum();
        let revenue: f64 = totals.iter().map(|t| t.total).sum();
        ui.metric("orders", orders);
        ui.metric("revenue", format_number(revenue));

        ui.table(
            &["month", "orders", "total"],
            totals
                .iter()
                .map(|t| {
                    vec![
                        month_name(t.month).to_string(),
                        t.orders.to_string(),
                        format_number(t.total),
                    ]
                })
                .collect(),
        );
        ui.bar_chart(
            format!("Revenue by month ({})", region),
            totals
                .iter()
                .map(|t| (month_name(t.month).to_string(), t.total))
                .collect(),
        );

        Ok(())
    }
}

fn month_name(month: u32) -> &'static str {
    (month as usize)
        .checked_sub(1)
        .and_then(|index| MONTHS.get(index))
        .copied()
        .unwrap_or("?")
}

impl Page for Sales {
    fn name(&self) -> &'static str {
        NAME
    }

    fn run<'a, 's: 'a>(
        &'a self,
        ctx: &'a InvocationContext,
        ui: &'a mut Ui<'s>,
    ) -> BoxFuture<'a, Result<()>> {
        self.render(ctx, ui).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sale(month: u32, region: &str, category: &str, amount: f64) -> Sale {
        Sale {
            month,
            region: region.to_string(),
            category: category.to_string(),
            amount,
        }
    }

    #[test]
    fn test_generate_sales_is_seeded() {
        assert_eq!(generate_sales(50, 1), generate_sales(50, 1));
        assert_ne!(generate_sales(50, 1), generate_sales(50, 2));
        assert!(generate_sales(200, 3)
            .iter()
            .all(|s| (1..=12).contains(&s.month) && s.amount > 0.0));
    }

    #[test]
    fn test_monthly_totals_filters() {
        let sales = vec![
            sale(1, "west", "hardware", 10.0),
            sale(1, "east", "hardware", 20.0),
            sale(2, "west", "software", 5.0),
            sale(2, "west", "hardware", 1.0),
        ];
        let all = vec!["hardware".to_string(), "software".to_string()];

        let totals = monthly_totals(&sales, "all", &all, 0.0);
        assert_eq!(totals.len(), 12);
        assert_eq!(totals[0].total, 30.0);
        assert_eq!(totals[1].orders, 2);

        let west = monthly_totals(&sales, "west", &all, 2.0);
        assert_eq!(west[0].total, 10.0);
        assert_eq!(west[1].orders, 1);

        let none = monthly_totals(&sales, "all", &[], 0.0);
        assert!(none.iter().all(|t| t.orders == 0));
    }

    #[test]
    fn test_monthly_totals_skip_unknown_months() {
        let sales = vec![
            sale(0, "west", "hardware", 10.0),
            sale(13, "west", "hardware", 10.0),
            sale(3, "west", "hardware", 4.0),
        ];
        let all = vec!["hardware".to_string()];

        let totals = monthly_totals(&sales, "all", &all, 0.0);
        assert_eq!(totals.iter().map(|t| t.orders).sum::<usize>(), 1);
        assert_eq!(totals[2].total, 4.0);
    }

    #[test]
    fn test_month_name() {
        assert_eq!(month_name(1), "Jan");
        assert_eq!(month_name(12), "Dec");
        assert_eq!(month_name(0), "?");
        assert_eq!(month_name(13), "?");
    }
}
