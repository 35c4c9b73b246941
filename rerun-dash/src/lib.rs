//! # rerun-dash
//!
//! Dashboard scripts that rerun top to bottom on every interaction, with
//! their expensive steps memoized in a [`rerun_cache::MemoCache`] shared by
//! all sessions.

pub mod pages;
pub mod render;
pub mod scenario;
pub mod session;
pub mod ui;

pub use pages::{Page, PageOptions, PAGES};
pub use scenario::{Scenario, SessionScript};
pub use session::{Driver, RerunOutput, Session, SessionReport};
pub use ui::{Block, Interaction, Ui, WidgetError, WidgetKind, WidgetState, WidgetValue};
