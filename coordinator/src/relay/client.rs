use super::{Error, Hub};
use crate::{
    backoff::{self, Failure, Policy, Step},
    session::{self, Status},
    types::{CrossChainId, CrossChainMessage, Message},
};
use bytes::Bytes;
use commonware_runtime::Clock;
use std::future::Future;
use tracing::{debug, warn};

/// Retrying front-end of a [Hub].
#[derive(Clone)]
pub struct Client<E: Clock, H: Hub> {
    context: E,
    hub: H,
    policy: Policy,
}

impl<E: Clock, H: Hub> Client<E, H> {
    /// Create a client that retries transient failures according to `policy`.
    pub fn new(context: E, hub: H, policy: Policy) -> Self {
        Self {
            context,
            hub,
            policy,
        }
    }

    /// Route `payload` to `(destination_chain, destination_address)`.
    pub async fn deliver(
        &self,
        source_chain: &str,
        source_address: &str,
        destination_chain: &str,
        destination_address: &str,
        payload: Bytes,
    ) -> Result<CrossChainMessage, Error> {
        let message = self
            .call("call_contract", || {
                let hub = self.hub.clone();
                let source_chain = source_chain.to_string();
                let source_address = source_address.to_string();
                let destination_chain = destination_chain.to_string();
                let destination_address = destination_address.to_string();
                let payload = payload.clone();
                async move {
                    hub.call_contract(
                        &source_chain,
                        &source_address,
                        &destination_chain,
                        &destination_address,
                        payload,
                    )
                    .await
                }
            })
            .await?;
        debug!(cc_id = %message.cc_id(), destination_chain, "message routed");
        Ok(message)
    }

    /// Request a proof over `cc_ids`.
    pub async fn construct_proof(&self, cc_ids: &[CrossChainId]) -> Result<session::Id, Error> {
        if cc_ids.is_empty() {
            return Err(Error::EmptyBatch);
        }
        let session = self
            .call("construct_proof", || {
                let hub = self.hub.clone();
                let cc_ids = cc_ids.to_vec();
                async move { hub.construct_proof(&cc_ids).await }
            })
            .await?;
        debug!(session, count = cc_ids.len(), "proof requested");
        Ok(session)
    }

    /// Query the status of `session` once.
    pub async fn poll(&self, session: session::Id) -> Result<Status, Error> {
        self.call("proof", || {
            let hub = self.hub.clone();
            async move { hub.proof(session).await }
        })
        .await
    }

    /// Look up the routed state of `cc_id`.
    pub async fn message(&self, cc_id: &CrossChainId) -> Result<Option<Message>, Error> {
        self.call("message", || {
            let hub = self.hub.clone();
            let cc_id = cc_id.clone();
            async move { hub.message(&cc_id).await }
        })
        .await
    }

    async fn call<T, F, Fut>(&self, method: &'static str, mut request: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let result = backoff::retry(&self.context, &self.policy, || {
            let response = request();
            async move {
                match response.await {
                    Ok(value) => Step::Ready(value),
                    Err(err) if err.is_transient() => {
                        warn!(method, ?err, "hub request failed");
                        Step::Retry
                    }
                    Err(err) => Step::Abort(err),
                }
            }
        })
        .await;
        match result {
            Ok(value) => Ok(value),
            Err(Failure::Aborted(err)) => Err(err),
            Err(Failure::Timeout(waited)) => Err(Error::Unavailable(format!(
                "{method} failed for {waited:?}"
            ))),
        }
    }
}
