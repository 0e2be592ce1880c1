mod action_items;
mod actions;
mod alerts;
mod analytics;
mod app_router;
mod auth;
mod categories;
mod emails;
mod expenses;
mod rules;
mod sync;

pub use alerts::load_alert_rules;
pub use app_router::AppRouter;
