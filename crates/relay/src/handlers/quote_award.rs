use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateId;
use domain::{
    Aggregate, DomainError, Quote, QuoteKind, QuoteStatus, StateMachineEngine,
    TransitionEventPayload, TransitionRequest,
};
use store::{OutboxEvent, Store};
use tracing::{debug, info};

use crate::consumer::EventHandler;
use crate::error::{RelayError, Result};

const HANDLER_NAME: &str = "reject_losing_quotes";

/// Rejects the quotes that lost an RFQ award.
///
/// Consumes `rfq.awarded` and moves every other SUBMITTED quote on the RFQ
/// to REJECTED as a system transition. Quotes that already left SUBMITTED
/// are left alone, so a retried event only finishes what a failed run
/// started.
pub struct RejectLosingQuotes<S: Store> {
    engine: Arc<StateMachineEngine<S>>,
}

impl<S: Store> RejectLosingQuotes<S> {
    pub fn new(engine: Arc<StateMachineEngine<S>>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl<S: Store + 'static> EventHandler for RejectLosingQuotes<S> {
    fn name(&self) -> &'static str {
        HANDLER_NAME
    }

    fn handles(&self, event_type: &str) -> bool {
        event_type == "rfq.awarded"
    }

    #[tracing::instrument(skip(self, event), fields(event_id = %event.id, rfq_id = %event.aggregate_id))]
    async fn handle(&self, event: &OutboxEvent) -> Result<()> {
        let payload: TransitionEventPayload = serde_json::from_value(event.payload.clone())?;
        let awarded = payload
            .data
            .get("awarded_quote_id")
            .cloned()
            .map(serde_json::from_value::<AggregateId>)
            .transpose()?
            .ok_or_else(|| RelayError::Handler {
                handler: HANDLER_NAME,
                reason: "rfq.awarded payload has no awarded_quote_id".into(),
            })?;

        let quotes: Vec<Quote> = self.engine.children(payload.aggregate_id).await?;
        let mut rejected = 0;
        for quote in quotes
            .iter()
            .filter(|q| q.id() != awarded && q.status() == QuoteStatus::Submitted)
        {
            let request = TransitionRequest::system(quote.id(), QuoteKind::Reject)
                .with_reason("another quote was awarded")
                .with_metadata("awarded_quote_id", awarded.to_string());
            match self.engine.transition::<Quote>(request).await {
                Ok(_) => rejected += 1,
                Err(DomainError::InvalidTransition { from, .. }) => {
                    debug!(quote_id = %quote.id(), %from, "Quote left SUBMITTED before rejection");
                }
                Err(err) => return Err(err.into()),
            }
        }

        info!(%awarded, rejected, "Losing quotes rejected");
        Ok(())
    }
}
