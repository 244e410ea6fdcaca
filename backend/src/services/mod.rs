//! Module for services that sit beside the session logic.
//!
//! Currently holds the webhook notifier used for session anomaly alerts.

pub mod notification_dispatcher;
