pub mod audit;
pub mod composer;
pub mod guard;
pub mod poller;
pub mod responder;

#[cfg(test)]
mod tests;

pub use audit::AuditLog;
pub use composer::{build_search_query, render_reply, table_safe, ReplyComposer};
pub use guard::already_replied;
pub use poller::{ItemOutcome, PassSummary, StreamPoller};
pub use responder::{Responder, RetryPolicy};
