use super::{Approval, Destination, Error, Kind, ProposalStatus, Receipt};
use crate::{
    backoff::{self, Failure, Policy, Step},
    registry::{Chain, Registry},
    types::{Address, CrossChainId, Value},
};
use bytes::Bytes;
use commonware_runtime::Clock;
use std::{collections::BTreeMap, future::Future, sync::Arc};
use tracing::{debug, info, warn};

/// Registry-aware, retrying front-end of the destination ledgers.
#[derive(Clone)]
pub struct Submitter<E: Clock, D: Destination> {
    context: E,
    registry: Arc<Registry>,
    ledgers: BTreeMap<String, D>,
    policy: Policy,
}

impl<E: Clock, D: Destination> Submitter<E, D> {
    /// Create a submitter with no ledgers attached.
    pub fn new(context: E, registry: Arc<Registry>, policy: Policy) -> Self {
        Self {
            context,
            registry,
            ledgers: BTreeMap::new(),
            policy,
        }
    }

    /// Attach the adapter used to reach `chain`.
    pub fn register(&mut self, chain: impl Into<String>, ledger: D) {
        self.ledgers.insert(chain.into(), ledger);
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Registry entry of `chain`.
    pub fn chain(&self, chain: &str) -> Result<&Chain, Error> {
        self.registry
            .chain(chain)
            .map_err(|_| Error::UnknownChain(chain.to_string()))
    }

    fn ledger(&self, chain: &str) -> Result<(&Chain, &D), Error> {
        let entry = self.chain(chain)?;
        let ledger = self
            .ledgers
            .get(chain)
            .ok_or_else(|| Error::UnknownChain(chain.to_string()))?;
        Ok((entry, ledger))
    }

    /// Submit a completed proof to the gateway of `chain`.
    pub async fn submit_proof(
        &self,
        chain: &str,
        execute_data: Bytes,
    ) -> Result<Vec<Approval>, Error> {
        let (_, ledger) = self.ledger(chain)?;
        let approvals = self
            .call("approve", || {
                let ledger = ledger.clone();
                let execute_data = execute_data.clone();
                async move { ledger.approve(execute_data).await }
            })
            .await?;
        for approval in &approvals {
            debug!(
                chain,
                cc_id = %approval.cc_id,
                command_id = %approval.command_id,
                "message approved"
            );
        }
        Ok(approvals)
    }

    /// Approval status of `cc_id` on `chain`.
    pub async fn approval(
        &self,
        chain: &str,
        cc_id: &CrossChainId,
    ) -> Result<Option<(Approval, bool)>, Error> {
        let (_, ledger) = self.ledger(chain)?;
        self.call("approval", || {
            let ledger = ledger.clone();
            let cc_id = cc_id.clone();
            async move { ledger.approval(&cc_id).await }
        })
        .await
    }

    /// Execute an approved payload through the entry point the registry declares for
    /// `chain`.
    pub async fn execute(
        &self,
        chain: &str,
        approval: &Approval,
        payload: Bytes,
    ) -> Result<Receipt, Error> {
        let (entry, ledger) = self.ledger(chain)?;
        let kind = entry.kind;
        let receipt = self
            .call("execute", || {
                let ledger = ledger.clone();
                let approval = approval.clone();
                let payload = payload.clone();
                async move {
                    match kind {
                        Kind::Legacy => {
                            ledger
                                .execute_legacy(
                                    approval.command_id,
                                    &approval.cc_id.chain,
                                    &approval.source_address,
                                    payload,
                                )
                                .await
                        }
                        Kind::Amplifier => {
                            ledger
                                .execute_amplifier(
                                    &approval.cc_id,
                                    &approval.source_address,
                                    payload,
                                )
                                .await
                        }
                    }
                }
            })
            .await?;
        info!(
            chain,
            %kind,
            cc_id = %approval.cc_id,
            command_id = %approval.command_id,
            "payload executed"
        );
        Ok(receipt)
    }

    /// Eta of the proposal `(target, call_data, native_value)` on `chain`.
    pub async fn eta(
        &self,
        chain: &str,
        target: &Address,
        call_data: &Bytes,
        native_value: &Value,
    ) -> Result<Option<u64>, Error> {
        let (_, ledger) = self.ledger(chain)?;
        self.call("eta", || {
            let ledger = ledger.clone();
            let (target, call_data, native_value) =
                (target.clone(), call_data.clone(), *native_value);
            async move { ledger.eta(&target, &call_data, &native_value).await }
        })
        .await
    }

    /// Status of the proposal `(target, call_data, native_value)` on `chain`.
    pub async fn proposal_status(
        &self,
        chain: &str,
        target: &Address,
        call_data: &Bytes,
        native_value: &Value,
    ) -> Result<Option<ProposalStatus>, Error> {
        let (_, ledger) = self.ledger(chain)?;
        self.call("proposal_status", || {
            let ledger = ledger.clone();
            let (target, call_data, native_value) =
                (target.clone(), call_data.clone(), *native_value);
            async move {
                ledger
                    .proposal_status(&target, &call_data, &native_value)
                    .await
            }
        })
        .await
    }

    /// Whether the proposal may be executed through the operator path on `chain`.
    pub async fn is_operator_approved(
        &self,
        chain: &str,
        target: &Address,
        call_data: &Bytes,
        native_value: &Value,
    ) -> Result<bool, Error> {
        let (_, ledger) = self.ledger(chain)?;
        self.call("is_operator_approved", || {
            let ledger = ledger.clone();
            let (target, call_data, native_value) =
                (target.clone(), call_data.clone(), *native_value);
            async move {
                ledger
                    .is_operator_approved(&target, &call_data, &native_value)
                    .await
            }
        })
        .await
    }

    /// Execute a scheduled proposal on `chain`.
    pub async fn execute_proposal(
        &self,
        chain: &str,
        target: &Address,
        call_data: &Bytes,
        native_value: &Value,
    ) -> Result<Receipt, Error> {
        let (_, ledger) = self.ledger(chain)?;
        self.call("execute_proposal", || {
            let ledger = ledger.clone();
            let (target, call_data, native_value) =
                (target.clone(), call_data.clone(), *native_value);
            async move {
                ledger
                    .execute_proposal(&target, &call_data, &native_value)
                    .await
            }
        })
        .await
    }

    /// Execute an operator-approved proposal on `chain`.
    pub async fn execute_operator_proposal(
        &self,
        chain: &str,
        target: &Address,
        call_data: &Bytes,
        native_value: &Value,
    ) -> Result<Receipt, Error> {
        let (_, ledger) = self.ledger(chain)?;
        self.call("execute_operator_proposal", || {
            let ledger = ledger.clone();
            let (target, call_data, native_value) =
                (target.clone(), call_data.clone(), *native_value);
            async move {
                ledger
                    .execute_operator_proposal(&target, &call_data, &native_value)
                    .await
            }
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
                    Err(Error::Unavailable(reason)) => {
                        warn!(method, %reason, "destination request failed");
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
