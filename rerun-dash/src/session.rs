//! Rerun sessions
//!
//! A [`Session`] is one user's view of a page: its widget state plus the
//! widgets the last rerun declared. Every interaction updates the state and
//! reruns the page from the top. A [`Driver`] hosts many sessions over one
//! shared [`MemoCache`], so concurrent users reuse each other's computations.

use crate::pages::{self, Page, PageOptions};
use crate::scenario::Scenario;
use crate::ui::{Block, Interaction, Ui, WidgetError, WidgetKind, WidgetState, WidgetValue};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rerun_cache::{InvocationContext, MemoCache, RerunSummary};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Result of one rerun
#[derive(Debug, Clone, Serialize)]
pub struct RerunOutput {
    pub rerun: u64,
    pub blocks: Vec<Block>,
    pub summary: RerunSummary,
    /// The page's error, also rendered as the last block
    pub error: Option<String>,
}

/// One user's session on a page
pub struct Session {
    id: Uuid,
    page: Arc<dyn Page>,
    cache: MemoCache,
    state: WidgetState,
    widgets: BTreeMap<String, WidgetKind>,
    reruns: u64,
    created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(page: Arc<dyn Page>, cache: MemoCache) -> Self {
        Self {
            id: Uuid::new_v4(),
            page,
            cache,
            state: WidgetState::default(),
            widgets: BTreeMap::new(),
            reruns: 0,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn page_name(&self) -> &'static str {
        self.page.name()
    }

    pub fn reruns(&self) -> u64 {
        self.reruns
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Widgets declared by the last rerun
    pub fn widgets(&self) -> &BTreeMap<String, WidgetKind> {
        &self.widgets
    }

    pub fn state(&self) -> &WidgetState {
        &self.state
    }

    /// First run of the page with default widget values
    pub async fn start(&mut self) -> RerunOutput {
        self.rerun(None).await
    }

    /// Apply an interaction and rerun.
    ///
    /// Interactions are checked against the widgets the previous rerun
    /// declared; a rejected interaction leaves the state untouched and does
    /// not rerun.
    pub async fn interact(
        &mut self,
        interaction: Interaction,
    ) -> std::result::Result<RerunOutput, WidgetError> {
        match interaction {
            Interaction::Set { widget, value } => {
                let kind = self
                    .widgets
                    .get(&widget)
                    .ok_or_else(|| WidgetError::Unknown(widget.clone()))?;
                let value = kind.validate(&widget, &value)?;
                debug!("Session {} set {} = {}", self.id, widget, value);
                self.state.insert(widget, value);
                Ok(self.rerun(None).await)
            }
            Interaction::Press { button } => {
                match self.widgets.get(&button) {
                    Some(WidgetKind::Button) => {}
                    Some(_) => return Err(WidgetError::NotAButton(button)),
                    None => return Err(WidgetError::Unknown(button)),
                }
                debug!("Session {} pressed {}", self.id, button);
                Ok(self.rerun(Some(button)).await)
            }
        }
    }

    async fn rerun(&mut self, pressed: Option<String>) -> RerunOutput {
        self.reruns += 1;
        let ctx = InvocationContext::new(self.cache.clone(), self.id, self.reruns);
        let span = ctx.span().clone();

        let mut ui = Ui::new(&self.state, pressed.as_deref());
        let result = self.page.run(&ctx, &mut ui).instrument(span).await;

        let error = result.err().map(|e| format!("{:#}", e));
        if let Some(message) = &error {
            warn!("Rerun {} of session {} failed: {}", self.reruns, self.id, message);
            ui.error(message.clone());
        }

        let (widgets, blocks) = ui.finish();
        self.widgets = widgets;

        RerunOutput {
            rerun: self.reruns,
            blocks,
            summary: ctx.finish(),
            error,
        }
    }
}

/// Everything one session produced
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub name: String,
    pub session: Uuid,
    pub page: String,
    pub outputs: Vec<RerunOutput>,
}

impl SessionReport {
    /// Output of the final rerun
    pub fn last(&self) -> Option<&RerunOutput> {
        self.outputs.last()
    }

    /// Summed cache outcomes over all reruns
    pub fn totals(&self) -> RerunSummary {
        let mut totals = RerunSummary {
            session: self.session,
            rerun: self.outputs.len() as u64,
            started_at: self
                .outputs
                .first()
                .map(|o| o.summary.started_at)
                .unwrap_or_else(Utc::now),
            hits: 0,
            computed: 0,
            coalesced: 0,
            errors: 0,
        };
        for output in &self.outputs {
            totals.hits += output.summary.hits;
            totals.computed += output.summary.computed;
            totals.coalesced += output.summary.coalesced;
            totals.errors += output.summary.errors;
        }
        totals
    }
}

/// Hosts sessions over one shared cache
#[derive(Clone)]
pub struct Driver {
    cache: MemoCache,
    options: PageOptions,
}

impl Driver {
    pub fn new(cache: MemoCache, options: PageOptions) -> Self {
        Self { cache, options }
    }

    pub fn cache(&self) -> &MemoCache {
        &self.cache
    }

    /// Open a new session on `page`
    pub fn open(&self, page: &str) -> Result<Session> {
        let page = pages::build(page, &self.cache, &self.options)?;
        Ok(Session::new(page, self.cache.clone()))
    }

    /// Start a session and apply `interactions` in order
    pub async fn run_script(
        &self,
        name: &str,
        page: &str,
        interactions: Vec<Interaction>,
    ) -> Result<SessionReport> {
        let mut session = self.open(page)?;
        let mut outputs = vec![session.start().await];

        for (i, interaction) in interactions.into_iter().enumerate() {
            let output = session
                .interact(interaction)
                .await
                .with_context(|| format!("Session '{}': interaction {} rejected", name, i + 1))?;
            outputs.push(output);
        }

        Ok(SessionReport {
            name: name.to_string(),
            session: session.id(),
            page: page.to_string(),
            outputs,
        })
    }

    /// Replay every session of a scenario concurrently
    pub async fn replay(&self, scenario: &Scenario) -> Result<Vec<SessionReport>> {
        info!("Replaying {} sessions", scenario.sessions.len());

        let runs = scenario.sessions.iter().map(|script| async move {
            let page = scenario.page_for(script)?;
            self.run_script(&script.name, page, script.interactions.clone())
                .await
        });

        join_all(runs).await.into_iter().collect()
    }

    /// Run `sessions` concurrent sessions on `page`, each making `steps`
    /// random valid interactions.
    pub async fn simulate(
        &self,
        page: &str,
        sessions: usize,
        steps: usize,
        seed: u64,
    ) -> Result<Vec<SessionReport>> {
        info!(
            "Simulating {} sessions x {} steps on {}",
            sessions, steps, page
        );

        let runs = (0..sessions).map(|i| async move {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
            let mut session = self.open(page)?;
            let mut outputs = vec![session.start().await];

            for _ in 0..steps {
                let Some(interaction) = random_interaction(session.widgets(), &mut rng) else {
                    break;
                };
                outputs.push(session.interact(interaction).await?);
            }

            Ok::<_, anyhow::Error>(SessionReport {
                name: format!("sim-{}", i + 1),
                session: session.id(),
                page: page.to_string(),
                outputs,
            })
        });

        join_all(runs).await.into_iter().collect()
    }
}

/// A valid interaction with one of `widgets`.
///
/// Numeric widgets only take their bounds or midpoint, so simulated sessions
/// overlap and exercise the shared cache.
pub fn random_interaction(
    widgets: &BTreeMap<String, WidgetKind>,
    rng: &mut impl Rng,
) -> Option<Interaction> {
    let names: Vec<&String> = widgets.keys().collect();
    let name = (*names.choose(rng)?).clone();

    let interaction = match &widgets[&name] {
        WidgetKind::Slider { min, max } => {
            let value = *[*min, min + (max - min) / 2, *max].choose(rng)?;
            Interaction::set(name, WidgetValue::Int(value))
        }
        WidgetKind::NumberInput { min, max } => {
            let value = *[*min, (min + max) / 2.0, *max].choose(rng)?;
            Interaction::set(name, WidgetValue::Float(value))
        }
        WidgetKind::Select { options } => {
            Interaction::set(name, WidgetValue::Text(options.choose(rng)?.clone()))
        }
        WidgetKind::Multiselect { options } => {
            let amount = rng.gen_range(1..=options.len().max(1));
            let picked = options.choose_multiple(rng, amount).cloned().collect();
            Interaction::set(name, WidgetValue::List(picked))
        }
        WidgetKind::TextInput => Interaction::set(name, WidgetValue::Text("sim".to_string())),
        WidgetKind::Button => Interaction::press(name),
    };
    Some(interaction)
}
