//! SQLite histogram page
//!
//! The connection is a resource: one per database for the whole process,
//! shared by every session. Column reads are values computed through it.

use super::{Page, PageOptions};
use crate::render::format_number;
use crate::ui::Ui;
use anyhow::{anyhow, bail, Context, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rerun_cache::{
    ArgValue, CacheArg, Fingerprint, FunctionSpec, InvocationContext, MemoCache, ResourceFn,
    ValueFn,
};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

pub const NAME: &str = "histogram";

/// Columns the page may read
pub const COLUMNS: &[&str] = &["temperature", "humidity"];

const SEED_ROWS: usize = 1000;
const SENSORS: &[&str] = &["s1", "s2", "s3", "s4"];

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS measurements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sensor TEXT NOT NULL,
    temperature REAL,
    humidity REAL
)";

const COLUMN_QUERY: &str = "SELECT {column} FROM measurements WHERE {column} IS NOT NULL ORDER BY id";

/// An open SQLite database
pub struct Db {
    dsn: String,
    conn: Mutex<Connection>,
}

impl Db {
    /// Open (creating if needed) the database at `dsn` and seed it when empty
    pub fn open(dsn: &str) -> Result<Self> {
        if let Some(parent) = Path::new(dsn).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let mut conn =
            Connection::open(dsn).with_context(|| format!("Failed to open database {}", dsn))?;
        conn.execute_batch(SCHEMA)
            .context("Failed to create measurements table")?;

        let rows: i64 = conn.query_row("SELECT COUNT(*) FROM measurements", [], |row| row.get(0))?;
        if rows == 0 {
            seed(&mut conn, SEED_ROWS)?;
            info!("Seeded {} with {} measurements", dsn, SEED_ROWS);
        }

        Ok(Self {
            dsn: dsn.to_string(),
            conn: Mutex::new(conn),
        })
    }

    /// Read every non-null value of `name`
    pub fn column(&self, name: &str) -> Result<Vec<f64>> {
        if !COLUMNS.contains(&name) {
            bail!("Unknown column '{}'. Available: {}", name, COLUMNS.join(", "));
        }

        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("connection to {} is poisoned", self.dsn))?;
        let mut stmt = conn.prepare(&COLUMN_QUERY.replace("{column}", name))?;
        let values = stmt
            .query_map([], |row| row.get::<_, f64>(0))?
            .collect::<rusqlite::Result<Vec<f64>>>()
            .with_context(|| format!("Failed to read column {}", name))?;
        Ok(values)
    }
}

// A live connection says nothing about the data behind it
impl CacheArg for Db {
    fn to_arg(&self) -> rerun_cache::Result<ArgValue> {
        Ok(ArgValue::Handle("sqlite connection".to_string()))
    }
}

fn seed(conn: &mut Connection, rows: usize) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(7);
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO measurements (sensor, temperature, humidity) VALUES (?1, ?2, ?3)",
        )?;
        for i in 0..rows {
            let sensor = SENSORS[i % SENSORS.len()];
            // Sum of uniforms: roughly bell-shaped
            let spread: f64 = (0..4).map(|_| rng.gen_range(-1.0..1.0)).sum();
            let temperature = 21.0 + 3.0 * spread;
            let humidity = rng.gen_range(30.0..70.0);
            stmt.execute(params![sensor, temperature, humidity])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Equal-width bins `(lo, hi, count)` covering min..=max
pub fn histogram(values: &[f64], bins: usize) -> Vec<(f64, f64, usize)> {
    if values.is_empty() || bins == 0 {
        return Vec::new();
    }

    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let width = if max > min { (max - min) / bins as f64 } else { 1.0 };

    let mut counts = vec![0usize; bins];
    for value in values {
        let index = (((value - min) / width) as usize).min(bins - 1);
        counts[index] += 1;
    }

    counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| {
            let lo = min + width * i as f64;
            (lo, lo + width, count)
        })
        .collect()
}

pub struct Histogram {
    dsn: String,
    query: ValueFn<(String, String), Vec<f64>>,
}

impl Histogram {
    pub fn register(cache: &MemoCache, options: &PageOptions) -> Result<Self> {
        let conn = cache.register_resource(
            FunctionSpec::new("histogram.open_conn").version("1"),
            |dsn: String| async move {
                tokio::task::spawn_blocking(move || Db::open(&dsn))
                    .await
                    .context("database open panicked")?
            },
        )?;

        let query = cache.register_value(
            FunctionSpec::new("histogram.query_column")
                .fingerprint(Fingerprint::of_source(COLUMN_QUERY)),
            move |(dsn, column): (String, String)| {
                let conn: ResourceFn<String, Db> = conn.clone();
                async move {
                    let db = conn.call(dsn).await?;
                    tokio::task::spawn_blocking(move || db.column(&column))
                        .await
                        .context("column query panicked")?
                }
            },
        )?;

        Ok(Self {
            dsn: options.db_path.display().to_string(),
            query,
        })
    }

    async fn render(&self, ctx: &InvocationContext, ui: &mut Ui<'_>) -> Result<()> {
        ui.title("Measurements histogram");

        let column = ui.select("column", COLUMNS, 0);
        let bins = ui.slider("bins", 2, 50, 12);

        let values = ctx
            .value(&self.query, (self.dsn.clone(), column.clone()))
            .await?;

        if values.is_empty() {
            ui.write(format!("No rows in {}", self.dsn));
            return Ok(());
        }

        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        ui.metric("rows", values.len());
        ui.metric("mean", format_number(mean));
        ui.metric("min", format_number(min));
        ui.metric("max", format_number(max));

        ui.bar_chart(
            format!("{} ({} bins)", column, bins),
            histogram(&values, bins as usize)
                .into_iter()
                .map(|(lo, hi, count)| (format!("{:.1}..{:.1}", lo, hi), count as f64))
                .collect(),
        );

        Ok(())
    }
}

impl Page for Histogram {
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
