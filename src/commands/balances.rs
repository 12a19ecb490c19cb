use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use serde::Serialize;
use tower::Service;
use tracing::{debug, info_span, Instrument};

use crate::{domain::Balances, ports::ledger::LedgerPort};

use super::{bounded, DomainLogic, Error};

pub struct BalancesRequest;

#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct BalancesResponse {
    pub balances: Balances,
}

impl<L> Service<BalancesRequest> for DomainLogic<L>
where
    L: LedgerPort + Send + Sync + 'static,
{
    type Response = BalancesResponse;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: BalancesRequest) -> Self::Future {
        let ledger = self.ledger.clone();
        let limit = self.config.transaction_timeout();
        Box::pin(
            async move {
                let balances = bounded(limit, ledger.balances()).await?;
                debug!(payers = balances.len(), "balances read");

                Ok(BalancesResponse { balances })
            }
            .instrument(info_span!("balances")),
        )
    }
}
