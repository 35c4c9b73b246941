//! Raffle page
//!
//! The entrant list is cached; the draw is not, so every press of `Draw`
//! picks fresh winners.

use super::Page;
use crate::ui::Ui;
use anyhow::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rerun_cache::{ClearTarget, FunctionSpec, InvocationContext, MemoCache, ValueFn};

pub const NAME: &str = "raffle";

pub const CLEAR_BUTTON: &str = "Clear cache";
pub const DRAW_BUTTON: &str = "Draw";

const FIRST_NAMES: &[&str] = &[
    "Ada", "Bea", "Cyd", "Dov", "Eli", "Fay", "Gus", "Hal", "Ida", "Jon", "Kit", "Lou",
];
const LAST_NAMES: &[&str] = &[
    "Abbot", "Baker", "Chen", "Diaz", "Evans", "Fox", "Gray", "Hale", "Ito", "Jain", "Khan",
    "Lind",
];

/// `count` distinct entrant names in seeded order
pub fn entrants(count: usize, seed: u64) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(seed);

    let mut names: Vec<String> = FIRST_NAMES
        .iter()
        .flat_map(|first| LAST_NAMES.iter().map(move |last| format!("{} {}", first, last)))
        .collect();
    names.shuffle(&mut rng);

    let pool = names.len();
    (0..count)
        .map(|i| {
            let name = &names[i % pool];
            if i < pool {
                name.clone()
            } else {
                format!("{} {}", name, i / pool + 1)
            }
        })
        .collect()
}

/// Pick up to `winners` distinct entrants at random
pub fn draw(entrants: &[String], winners: usize) -> Vec<String> {
    let mut rng = rand::thread_rng();
    entrants
        .choose_multiple(&mut rng, winners)
        .cloned()
        .collect()
}

pub struct Raffle {
    entrants: ValueFn<(u32, u64), Vec<String>>,
}

impl Raffle {
    pub fn register(cache: &MemoCache) -> Result<Self> {
        let entrants = cache.register_value(
            FunctionSpec::new("raffle.entrants").version("1"),
            |(count, seed): (u32, u64)| async move { Ok(entrants(count as usize, seed)) },
        )?;

        Ok(Self { entrants })
    }

    async fn render(&self, ctx: &InvocationContext, ui: &mut Ui<'_>) -> Result<()> {
        ui.title("Raffle");

        if ui.button(CLEAR_BUTTON) {
            let event = ctx.cache().clear(ClearTarget::All)?;
            ui.write(format!("Cache cleared ({} entries)", event.count()));
        }

        let count = ui.slider("count", 1, 500, 50);
        let seed = ui.slider("seed", 0, 1000, 1);
        let winners = ui.slider("winners", 1, 10, 3);

        let entrants = ctx.value(&self.entrants, (count as u32, seed as u64)).await?;
        ui.metric("entrants", entrants.len());

        if ui.button(DRAW_BUTTON) {
            let picked = draw(&entrants, winners as usize);
            ui.table(
                &["#", "winner"],
                picked
                    .into_iter()
                    .enumerate()
                    .map(|(i, name)| vec![(i + 1).to_string(), name])
                    .collect(),
            );
        } else {
            ui.write(format!("Press {} to pick {} winners", DRAW_BUTTON, winners));
            ui.table(
                &["entrant"],
                entrants.iter().take(5).map(|name| vec![name.clone()]).collect(),
            );
        }

        Ok(())
    }
}

impl Page for Raffle {
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
    use std::collections::HashSet;

    #[test]
    fn test_entrants_are_unique_and_seeded() {
        let a = entrants(300, 4);
        assert_eq!(a.len(), 300);
        assert_eq!(a.iter().collect::<HashSet<_>>().len(), 300);
        assert_eq!(a, entrants(300, 4));
        assert_ne!(a, entrants(300, 5));
    }

    #[test]
    fn test_draw_picks_distinct_entrants() {
        let pool = entrants(20, 1);
        let winners = draw(&pool, 5);
        assert_eq!(winners.len(), 5);
        assert_eq!(winners.iter().collect::<HashSet<_>>().len(), 5);
        assert!(winners.iter().all(|w| pool.contains(w)));

        assert_eq!(draw(&pool[..2], 5).len(), 2);
    }
}
