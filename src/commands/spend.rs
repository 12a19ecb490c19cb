use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use serde::Serialize;
use tower::Service;
use tracing::{info, info_span, warn, Instrument};

use crate::{
    domain::{Deduction, SpendAmount},
    ports::ledger::LedgerPort,
};

use super::{bounded, DomainLogic, Error};

pub struct SpendRequest {
    pub points: i64,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct SpendResponse {
    /// Points taken per payer, oldest grants first
    pub deductions: Vec<Deduction>,
}

impl<L> Service<SpendRequest> for DomainLogic<L>
where
    L: LedgerPort + Send + Sync + 'static,
{
    type Response = SpendResponse;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: SpendRequest) -> Self::Future {
        let ledger = self.ledger.clone();
        let limit = self.config.transaction_timeout();
        let span = info_span!("spend", points = req.points);
        Box::pin(
            async move {
                let amount = SpendAmount::try_from(req.points)?;

                let deductions = match bounded(limit, ledger.spend(amount)).await {
                    Ok(deductions) => deductions,
                    Err(err @ Error::InsufficientFunds { .. }) => {
                        warn!(%err, "spend rejected");
                        return Err(err);
                    }
                    Err(err) => {
                        warn!(%err, "spend failed, nothing was deducted");
                        return Err(err);
                    }
                };
                info!(payers = deductions.len(), "points spent");

                Ok(SpendResponse { deductions })
            }
            .instrument(span),
        )
    }
}
