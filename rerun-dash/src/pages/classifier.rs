//! k-NN classifier page
//!
//! Both the dataset and the fitted model are values: every slider position
//! yields a new model, so models must stay under the LRU bound like any other
//! derived data.

use super::Page;
use crate::ui::Ui;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rerun_cache::{Content, FunctionSpec, InvocationContext, MemoCache, ValueFn};
use serde::Serialize;

pub const NAME: &str = "classifier";

/// Every fifth point is held out for evaluation
const HOLDOUT_EVERY: usize = 5;

/// Two-class points in the plane
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dataset {
    pub points: Vec<[f64; 2]>,
    pub labels: Vec<u8>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Split into (train, test), holding out every `every`-th point
    pub fn split(&self, every: usize) -> (Dataset, Dataset) {
        let mut train = Dataset {
            points: Vec::new(),
            labels: Vec::new(),
        };
        let mut test = train.clone();

        for (i, (point, label)) in self.points.iter().zip(&self.labels).enumerate() {
            let part = if i % every == 0 { &mut test } else { &mut train };
            part.points.push(*point);
            part.labels.push(*label);
        }

        (train, test)
    }
}

/// Two gaussian blobs centred on (-1, -1) and (1, 1)
pub fn make_blobs(samples: usize, noise: f64, seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut points = Vec::with_capacity(samples);
    let mut labels = Vec::with_capacity(samples);

    for i in 0..samples {
        let label = (i % 2) as u8;
        let center = if label == 0 { -1.0 } else { 1.0 };
        points.push([
            center + noise * gaussian(&mut rng),
            center + noise * gaussian(&mut rng),
        ]);
        labels.push(label);
    }

    Dataset { points, labels }
}

// Box-Muller
fn gaussian(rng: &mut impl Rng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

/// Fitted k-nearest-neighbours model
#[derive(Debug, Clone, Serialize)]
pub struct KnnModel {
    points: Vec<[f64; 2]>,
    labels: Vec<u8>,
    k: usize,
}

impl KnnModel {
    pub fn fit(train: &Dataset, k: usize) -> Self {
        Self {
            points: train.points.clone(),
            labels: train.labels.clone(),
            k: k.max(1),
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Majority label among the k nearest training points; ties go to the
    /// nearest point's label.
    pub fn predict(&self, point: [f64; 2]) -> u8 {
        let mut distances: Vec<(f64, u8)> = self
            .points
            .iter()
            .zip(&self.labels)
            .map(|(p, label)| {
                let dx = p[0] - point[0];
                let dy = p[1] - point[1];
                (dx * dx + dy * dy, *label)
            })
            .collect();
        distances.sort_by(|a, b| a.0.total_cmp(&b.0));

        let neighbours = &distances[..self.k.min(distances.len())];
        let ones = neighbours.iter().filter(|(_, label)| *label == 1).count();
        let zeros = neighbours.len() - ones;

        match ones.cmp(&zeros) {
            std::cmp::Ordering::Greater => 1,
            std::cmp::Ordering::Less => 0,
            std::cmp::Ordering::Equal => neighbours.first().map_or(0, |(_, label)| *label),
        }
    }

    /// Confusion counts `[[tn, fp], [fn, tp]]` on `test`
    pub fn confusion(&self, test: &Dataset) -> [[usize; 2]; 2] {
        let mut counts = [[0usize; 2]; 2];
        for (point, label) in test.points.iter().zip(&test.labels) {
            let predicted = self.predict(*point);
            counts[*label as usize][predicted as usize] += 1;
        }
        counts
    }
}

/// Fraction of correct predictions in a confusion matrix
pub fn accuracy(confusion: &[[usize; 2]; 2]) -> f64 {
    let correct = confusion[0][0] + confusion[1][1];
    let total: usize = confusion.iter().flatten().sum();
    if total == 0 {
        0.0
    } else {
        correct as f64 / total as f64
    }
}

pub struct Classifier {
    dataset: ValueFn<(u32, f64, u64), Dataset>,
    model: ValueFn<(Content<Dataset>, u32), KnnModel>,
}

impl Classifier {
    pub fn register(cache: &MemoCache) -> Result<Self> {
        let dataset = cache.register_value(
            FunctionSpec::new("classifier.make_blobs").version("1"),
            |(samples, noise, seed): (u32, f64, u64)| async move {
                tokio::task::spawn_blocking(move || make_blobs(samples as usize, noise, seed))
                    .await
                    .context("dataset generation panicked")
            },
        )?;

        let model = cache.register_value(
            FunctionSpec::new("classifier.fit_knn").version("1"),
            |(train, k): (Content<Dataset>, u32)| async move {
                Ok(KnnModel::fit(&train, k as usize))
            },
        )?;

        Ok(Self { dataset, model })
    }

    async fn render(&self, ctx: &InvocationContext, ui: &mut Ui<'_>) -> Result<()> {
        ui.title("k-NN classifier");

        let samples = ui.slider("samples", 20, 5000, 400);
        let noise = ui.number_input("noise", 0.0, 3.0, 0.8);
        let k = ui.slider("k", 1, 25, 5);
        let seed = ui.slider("seed", 0, 1000, 42);

        let dataset = ctx
            .value(&self.dataset, (samples as u32, noise, seed as u64))
            .await?;
        let (train, test) = dataset.split(HOLDOUT_EVERY);
        ui.write(format!(
            "{} points: {} for training, {} held out",
            dataset.len(),
            train.len(),
            test.len()
        ));

        let model = ctx.value(&self.model, (Content(train), k as u32)).await?;
        let confusion = model.confusion(&test);

        ui.metric("k", model.k());
        ui.metric("accuracy", format!("{:.3}", accuracy(&confusion)));
        ui.table(
            &["actual", "predicted 0", "predicted 1"],
            vec![
                vec![
                    "0".to_string(),
                    confusion[0][0].to_string(),
                    confusion[0][1].to_string(),
                ],
                vec![
                    "1".to_string(),
                    confusion[1][0].to_string(),
                    confusion[1][1].to_string(),
                ],
            ],
        );

        Ok(())
    }
}

impl Page for Classifier {
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

    #[test]
    fn test_make_blobs_is_deterministic() {
        let a = make_blobs(100, 0.5, 7);
        let b = make_blobs(100, 0.5, 7);
        let c = make_blobs(100, 0.5, 8);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.labels.iter().filter(|l| **l == 1).count(), 50);
    }

    #[test]
    fn test_split() {
        let data = make_blobs(10, 0.5, 1);
        let (train, test) = data.split(5);
        assert_eq!(train.len(), 8);
        assert_eq!(test.len(), 2);
    }

    #[test]
    fn test_knn_separates_clean_blobs() {
        let data = make_blobs(200, 0.3, 3);
        let (train, test) = data.split(HOLDOUT_EVERY);
        let model = KnnModel::fit(&train, 5);

        let confusion = model.confusion(&test);
        assert!(accuracy(&confusion) > 0.95);
        assert_eq!(model.predict([-1.0, -1.0]), 0);
        assert_eq!(model.predict([1.0, 1.0]), 1);
    }

    #[test]
    fn test_accuracy_of_empty_confusion() {
        assert_eq!(accuracy(&[[0, 0], [0, 0]]), 0.0);
    }
}
