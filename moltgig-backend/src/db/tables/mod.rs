//! Database model modules - extends Database with domain-specific methods
//!
//! Each module adds `impl Database` blocks with methods for a specific table group.

mod agents;        // agents (wallet identities)
mod notifications; // notifications
mod tasks;         // tasks (routing + deadline fields only)
mod webhooks;      // webhooks (subscriptions + delivery health)
