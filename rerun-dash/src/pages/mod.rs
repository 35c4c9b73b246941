//! Dashboard pages
//!
//! Each page is a script that reruns top to bottom on every interaction. Its
//! expensive steps are registered with the shared [`MemoCache`] when the page
//! is built, and called through the rerun's [`InvocationContext`] so repeated
//! reruns (and other sessions) reuse their results.

pub mod classifier;
pub mod histogram;
pub mod raffle;
pub mod sales;

use crate::ui::Ui;
use anyhow::{bail, Result};
use futures::future::BoxFuture;
use rerun_cache::{InvocationContext, MemoCache};
use std::path::PathBuf;
use std::sync::Arc;

/// Names and one-line descriptions of the available pages
pub const PAGES: &[(&str, &str)] = &[
    (
        classifier::NAME,
        "k-NN classifier on a synthetic two-class dataset",
    ),
    (sales::NAME, "Monthly sales totals with region and category filters"),
    (histogram::NAME, "Histogram of a column read from SQLite"),
    (raffle::NAME, "Seeded entrant list with an uncached draw"),
];

/// A rerunnable dashboard script
pub trait Page: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run the script once against the current widget state
    fn run<'a, 's: 'a>(
        &'a self,
        ctx: &'a InvocationContext,
        ui: &'a mut Ui<'s>,
    ) -> BoxFuture<'a, Result<()>>;
}

/// Settings shared by all pages
#[derive(Debug, Clone)]
pub struct PageOptions {
    /// SQLite database backing the histogram page
    pub db_path: PathBuf,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/measurements.sqlite"),
        }
    }
}

/// Build a page by name, registering its cached functions
pub fn build(name: &str, cache: &MemoCache, options: &PageOptions) -> Result<Arc<dyn Page>> {
    let page: Arc<dyn Page> = match name {
        classifier::NAME => Arc::new(classifier::Classifier::register(cache)?),
        sales::NAME => Arc::new(sales::Sales::register(cache)?),
        histogram::NAME => Arc::new(histogram::Histogram::register(cache, options)?),
        raffle::NAME => Arc::new(raffle::Raffle::register(cache)?),
        other => bail!(
            "Unknown page '{}'. Available: {}",
            other,
            PAGES
                .iter()
                .map(|(name, _)| *name)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };
    Ok(page)
}
