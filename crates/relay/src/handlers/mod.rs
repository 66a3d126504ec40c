//! Downstream handlers driven by outbox events.

mod quote_award;

pub use quote_award::RejectLosingQuotes;
