use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use serde::Serialize;
use tower::Service;
use tracing::{info_span, Instrument};

use crate::{domain::GrantRecord, ports::ledger::LedgerPort};

use super::{bounded, DomainLogic, Error};

/// List every grant record, oldest first
pub struct LedgerRequest;

#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LedgerResponse {
    pub records: Vec<GrantRecord>,
}

impl<L> Service<LedgerRequest> for DomainLogic<L>
where
    L: LedgerPort + Send + Sync + 'static,
{
    type Response = LedgerResponse;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: LedgerRequest) -> Self::Future {
        let ledger = self.ledger.clone();
        let limit = self.config.transaction_timeout();
        Box::pin(
            async move {
                let records = bounded(limit, ledger.grants()).await?;
                Ok(LedgerResponse { records })
            }
            .instrument(info_span!("ledger")),
        )
    }
}
