use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tower::Service;
use tracing::{info, info_span, Instrument};

use crate::{
    domain::{GrantRecord, NewGrant},
    ports::ledger::LedgerPort,
};

use super::{bounded, DomainLogic, Error};

pub struct GrantRequest {
    /// Partner issuing the points
    ///
    /// Leading and trailing whitespace is trimmed, and the trimmed name is what gets stored.
    pub payer: String,
    /// Points to add; a negative number records a correction
    pub points: i64,
    /// When the partner issued the points, defaults to now
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct GrantResponse {
    pub record: GrantRecord,
}

impl<L> Service<GrantRequest> for DomainLogic<L>
where
    L: LedgerPort + Send + Sync + 'static,
{
    type Response = GrantResponse;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: GrantRequest) -> Self::Future {
        let ledger = self.ledger.clone();
        let limit = self.config.transaction_timeout();
        let span = info_span!("grant", payer = %req.payer, points = req.points);
        Box::pin(
            async move {
                let grant = new_grant(req)?;
                let record = bounded(limit, ledger.insert_grant(grant)).await?;
                info!(id = record.id, remainder = record.remainder, "points granted");

                Ok(GrantResponse { record })
            }
            .instrument(span),
        )
    }
}

fn new_grant(req: GrantRequest) -> Result<NewGrant, Error> {
    let payer = req.payer.trim();
    if payer.is_empty() {
        return Err(Error::InvalidRequest("payer must not be empty".into()));
    }

    Ok(NewGrant {
        payer: payer.to_string(),
        points: req.points,
        created_at: req.timestamp,
    })
}
