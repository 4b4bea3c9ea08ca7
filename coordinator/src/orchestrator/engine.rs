use super::{Config, Delivery, Error, Id, Metrics, Proposal, Stage};
use crate::{
    backoff::{self, Failure, Policy, Step},
    destination::{self, Class, Destination, ProposalStatus, Submitter},
    proposal::{self, Command, Kind},
    relay::{self, Client, Hub},
    session::{Status, Tracker},
    types::{payload_hash, unix, CrossChainId, CrossChainMessage},
};
use bytes::Bytes;
use commonware_runtime::{Clock, Metrics as RuntimeMetrics};
use prometheus_client::metrics::gauge::Gauge;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Tracks a pipeline in the `inflight` gauge until dropped.
struct Inflight(Gauge);

impl Inflight {
    fn new(gauge: &Gauge) -> Self {
        gauge.inc();
        Self(gauge.clone())
    }
}

impl Drop for Inflight {
    fn drop(&mut self) {
        self.0.dec();
    }
}

/// Sequences proposals (and arbitrary payloads) from the hub to execution.
#[derive(Clone)]
pub struct Orchestrator<E: Clock + RuntimeMetrics, H: Hub, D: Destination> {
    context: E,
    cfg: Config,
    relay: Client<E, H>,
    submitter: Submitter<E, D>,
    metrics: Metrics,
}

impl<E: Clock + RuntimeMetrics, H: Hub, D: Destination> Orchestrator<E, H, D> {
    /// Create a new orchestrator reaching the hub through `hub` and destination ledgers
    /// through `submitter`.
    pub fn new(context: E, cfg: Config, hub: H, submitter: Submitter<E, D>) -> Self {
        let metrics = Metrics::init(&context);
        let relay = Client::new(context.with_label("relay"), hub, cfg.rpc);
        Self {
            context,
            cfg,
            relay,
            submitter,
            metrics,
        }
    }

    /// Validate `command` against `destination_chain` and deliver it to the chain's
    /// governance contract.
    pub async fn schedule(
        &self,
        destination_chain: &str,
        command: Command,
    ) -> Result<Proposal, Error> {
        let hash = command.proposal_hash();
        let chain = self
            .submitter
            .chain(destination_chain)
            .map_err(|source| Error::Destination {
                id: Id::Proposal(hash),
                source,
            })?;
        command
            .check(&chain.commands())
            .map_err(|source| Error::Invalid {
                id: Id::Proposal(hash),
                source,
            })?;
        let governance = chain.governance.clone();
        let message = self
            .relay
            .deliver(
                &self.cfg.source_chain,
                &self.cfg.source_address,
                destination_chain,
                &governance,
                command.to_payload(),
            )
            .await
            .map_err(|source| Error::Relay {
                id: Id::Proposal(hash),
                source,
            })?;
        info!(
            cc_id = %message.cc_id(),
            %hash,
            kind = %command.kind,
            destination_chain,
            "command delivered"
        );
        Ok(Proposal::new(command, message))
    }

    /// Deliver `command` and drive it to completion.
    pub async fn run(&self, destination_chain: &str, command: Command) -> Result<Proposal, Error> {
        let _inflight = Inflight::new(&self.metrics.inflight);
        let mut proposal = self.schedule(destination_chain, command).await?;
        self.drive(&mut proposal).await?;
        Ok(proposal)
    }

    /// Deliver the cancellation of `scheduled` and drive it to completion.
    ///
    /// On success, `scheduled` is moved to [Stage::Cancelled] and the (completed)
    /// cancel proposal is returned.
    pub async fn cancel(&self, scheduled: &mut Proposal) -> Result<Proposal, Error> {
        let _inflight = Inflight::new(&self.metrics.inflight);
        let kind = scheduled.command.kind;
        let Some(cancellation) = kind.cancellation() else {
            return Err(Error::Invalid {
                id: Id::Proposal(scheduled.hash),
                source: proposal::Error::NotCancellable(kind),
            });
        };
        let command = Command::new(
            cancellation,
            scheduled.command.target.clone(),
            scheduled.command.call_data.clone(),
            scheduled.command.native_value,
            0,
        );
        let mut cancel = self.schedule(scheduled.destination_chain(), command).await?;
        self.drive(&mut cancel).await?;
        scheduled.delivery.advance(Stage::Cancelled);
        info!(hash = %scheduled.hash, cc_id = %scheduled.cc_id(), "proposal cancelled");
        Ok(cancel)
    }

    /// Resume the pipeline of a command already delivered as `cc_id`, skipping every
    /// step the hub and `destination_chain` report as done.
    pub async fn resume(
        &self,
        cc_id: CrossChainId,
        destination_chain: &str,
        command: Command,
    ) -> Result<Proposal, Error> {
        let _inflight = Inflight::new(&self.metrics.inflight);
        let id = Id::Message(cc_id.clone());
        let message = self
            .relay
            .message(&cc_id)
            .await
            .map_err(|source| Error::Relay {
                id: id.clone(),
                source,
            })?
            .ok_or_else(|| Error::Relay {
                id: id.clone(),
                source: relay::Error::UnknownMessage(cc_id.clone()),
            })?;
        let payload = command.to_payload();
        if message.payload_hash != payload_hash(&payload)
            || message.destination_chain != destination_chain
        {
            return Err(Error::PayloadMismatch(cc_id));
        }
        let mut proposal = Proposal::new(command, CrossChainMessage { message, payload });

        let status = self
            .submitter
            .approval(destination_chain, &cc_id)
            .await
            .map_err(|source| Error::Destination { id, source })?;
        if let Some((approval, consumed)) = status {
            proposal.delivery.approval = Some(approval);
            proposal.delivery.consumed = consumed;
            proposal.delivery.advance(Stage::Approved);
        }
        info!(
            %cc_id,
            hash = %proposal.hash,
            stage = %proposal.stage(),
            consumed = proposal.delivery.consumed,
            "resuming proposal"
        );
        self.drive(&mut proposal).await?;
        Ok(proposal)
    }

    /// Route an arbitrary payload to `destination_address` and execute it there.
    pub async fn relay(
        &self,
        destination_chain: &str,
        destination_address: &str,
        payload: Bytes,
    ) -> Result<Delivery, Error> {
        let _inflight = Inflight::new(&self.metrics.inflight);
        let id = Id::Payload(payload_hash(&payload));
        self.submitter
            .chain(destination_chain)
            .map_err(|source| Error::Destination {
                id: id.clone(),
                source,
            })?;
        let message = self
            .relay
            .deliver(
                &self.cfg.source_chain,
                &self.cfg.source_address,
                destination_chain,
                destination_address,
                payload,
            )
            .await
            .map_err(|source| Error::Relay { id, source })?;
        let mut delivery = Delivery::new(message);
        self.settle(&mut delivery).await?;
        delivery.advance(Stage::Executed);
        Ok(delivery)
    }

    /// Drive `proposal` from its current stage to completion.
    pub async fn drive(&self, proposal: &mut Proposal) -> Result<(), Error> {
        if proposal.stage().is_terminal() {
            return Ok(());
        }
        self.settle(&mut proposal.delivery).await?;
        match proposal.command.kind {
            Kind::CancelTimelock | Kind::CancelOperatorApproval => {
                proposal.delivery.advance(Stage::Cancelled);
                info!(hash = %proposal.hash, kind = %proposal.command.kind, "cancellation applied");
                Ok(())
            }
            Kind::ScheduleTimelock => self.execute_timelock(proposal).await,
            Kind::ApproveOperator => self.execute_operator(proposal).await,
        }
    }

    /// Wait for a completed proof over `cc_id`.
    ///
    /// Expired sessions are replaced by fresh ones until [Config::approval] is exhausted.
    pub async fn wait_for_approval(&self, cc_id: &CrossChainId) -> Result<Bytes, Error> {
        let mut tracker = Tracker::new();
        self.prove(cc_id, &mut tracker).await
    }

    fn elapsed(&self, start: SystemTime) -> Duration {
        self.context
            .current()
            .duration_since(start)
            .unwrap_or_default()
    }

    async fn prove(&self, cc_id: &CrossChainId, tracker: &mut Tracker) -> Result<Bytes, Error> {
        let start = self.context.current();
        let cc_ids = [cc_id.clone()];
        loop {
            let session = self
                .relay
                .construct_proof(&cc_ids)
                .await
                .map_err(|source| Error::Relay {
                    id: Id::Message(cc_id.clone()),
                    source,
                })?;
            self.metrics.proofs_requested.inc();

            let waited = self.elapsed(start);
            if waited >= self.cfg.approval.max_wait {
                return Err(Error::ApprovalTimeout {
                    cc_id: cc_id.clone(),
                    waited,
                });
            }
            if tracker.last(session).is_some_and(|status| status.is_terminal()) {
                // The hub handed back a session that already resolved
                self.context.sleep(self.cfg.approval.initial).await;
                continue;
            }

            let policy = Policy {
                max_wait: self.cfg.approval.max_wait - waited,
                ..self.cfg.approval
            };
            debug!(%cc_id, session, "waiting for proof");
            let result = backoff::retry(&self.context, &policy, || {
                let relay = &self.relay;
                async move {
                    match relay.poll(session).await {
                        Ok(Status::Pending) => Step::Retry,
                        Ok(status) => Step::Ready(status),
                        Err(err) => Step::Abort(err),
                    }
                }
            })
            .await;
            match result {
                Ok(status) => match tracker.observe(session, status) {
                    Status::Completed { execute_data } => {
                        debug!(%cc_id, session, "proof ready");
                        return Ok(execute_data);
                    }
                    Status::Expired => {
                        self.metrics.sessions_expired.inc();
                        tracker.replay();
                        warn!(%cc_id, session, "session expired");
                    }
                    Status::Pending => {}
                },
                Err(Failure::Timeout(_)) => {
                    return Err(Error::ApprovalTimeout {
                        cc_id: cc_id.clone(),
                        waited: self.elapsed(start),
                    })
                }
                Err(Failure::Aborted(source)) => {
                    return Err(Error::Relay {
                        id: Id::Message(cc_id.clone()),
                        source,
                    })
                }
            }
        }
    }

    /// Prove, approve and execute the payload of `delivery` (skipping completed steps).
    async fn settle(&self, delivery: &mut Delivery) -> Result<(), Error> {
        let cc_id = delivery.cc_id().clone();
        let chain = delivery.destination_chain().to_string();

        // Obtain an approval on the destination gateway
        let mut attempts = 0;
        while delivery.approval.is_none() {
            if attempts == self.cfg.max_proof_attempts {
                return Err(Error::ProofAttemptsExhausted { cc_id, attempts });
            }
            attempts += 1;
            delivery.advance(Stage::ProofPending);
            let execute_data = self.prove(&cc_id, &mut delivery.tracker).await?;
            delivery.advance(Stage::ProofReady);
            match self.submitter.submit_proof(&chain, execute_data).await {
                Ok(approvals) => {
                    let approval = match approvals.into_iter().find(|a| a.cc_id == cc_id) {
                        Some(approval) => approval,
                        None => {
                            // Approved by an earlier proof
                            let (approval, consumed) = self
                                .submitter
                                .approval(&chain, &cc_id)
                                .await
                                .map_err(|source| Error::Destination {
                                    id: Id::Message(cc_id.clone()),
                                    source,
                                })?
                                .ok_or_else(|| Error::MissingApproval(cc_id.clone()))?;
                            delivery.consumed = consumed;
                            approval
                        }
                    };
                    info!(%cc_id, command_id = %approval.command_id, chain, "message approved");
                    delivery.approval = Some(approval);
                    delivery.advance(Stage::Approved);
                }
                Err(err) if err.class() == Class::Replay => {
                    self.metrics.proofs_replayed.inc();
                    delivery.tracker.replay();
                    warn!(%cc_id, ?err, "proof rejected");
                }
                Err(source) => {
                    return Err(Error::Destination {
                        id: Id::Message(cc_id),
                        source,
                    })
                }
            }
        }
        if delivery.consumed {
            return Ok(());
        }
        let Some(approval) = delivery.approval.clone() else {
            return Err(Error::MissingApproval(cc_id));
        };

        // Execute the approved payload
        let payload = delivery.message.payload.clone();
        let result = backoff::retry(&self.context, &self.cfg.execution, || {
            let (submitter, chain, approval) = (&self.submitter, &chain, &approval);
            let payload = payload.clone();
            async move {
                match submitter.execute(chain, approval, payload).await {
                    Ok(receipt) => Step::Ready(Some(receipt)),
                    Err(err) => match err.class() {
                        Class::Done => Step::Ready(None),
                        Class::Transient => {
                            debug!(?err, "payload not executable yet");
                            Step::Retry
                        }
                        Class::Replay | Class::Fatal => Step::Abort(err),
                    },
                }
            }
        })
        .await;
        match result {
            Ok(receipt) => {
                if receipt.is_some() {
                    self.metrics.messages_executed.inc();
                } else {
                    debug!(%cc_id, "payload already executed");
                }
                delivery.receipt = receipt;
                delivery.consumed = true;
                Ok(())
            }
            Err(Failure::Timeout(waited)) => Err(Error::ExecutionTimeout {
                id: Id::Message(cc_id),
                waited,
            }),
            Err(Failure::Aborted(source)) => Err(Error::Destination {
                id: Id::Message(cc_id),
                source,
            }),
        }
    }

    /// Wait for the eta of a scheduled proposal and execute it.
    async fn execute_timelock(&self, proposal: &mut Proposal) -> Result<(), Error> {
        let hash = proposal.hash;
        let chain = proposal.destination_chain().to_string();
        let Command {
            target,
            call_data,
            native_value,
            ..
        } = proposal.command.clone();

        // The on-chain eta is authoritative (absent once executed or cancelled)
        let eta = self
            .submitter
            .eta(&chain, &target, &call_data, &native_value)
            .await
            .map_err(|source| Error::Destination {
                id: Id::Proposal(hash),
                source,
            })?
            .unwrap_or_default();
        let now = unix(self.context.current());
        if eta > now {
            info!(%hash, eta, now, "waiting for eta");
        }
        let policy = Policy {
            max_wait: self
                .cfg
                .execution
                .max_wait
                .saturating_add(Duration::from_secs(eta.saturating_sub(now))),
            ..self.cfg.execution
        };
        let result = backoff::retry(&self.context, &policy, || {
            let now = unix(self.context.current());
            let submitter = &self.submitter;
            let (chain, target, call_data, native_value) =
                (&chain, &target, &call_data, &native_value);
            async move {
                if now < eta {
                    return Step::RetryAfter(Duration::from_secs(eta - now));
                }
                match submitter
                    .execute_proposal(chain, target, call_data, native_value)
                    .await
                {
                    Ok(receipt) => Step::Ready(Some(receipt)),
                    Err(destination::Error::TooEarly { eta, now }) => {
                        debug!(eta, now, "destination reports eta not reached");
                        Step::RetryAfter(Duration::from_secs(eta.saturating_sub(now).max(1)))
                    }
                    Err(err) => match err.class() {
                        Class::Done => Step::Ready(None),
                        Class::Transient => Step::Retry,
                        Class::Replay | Class::Fatal => Step::Abort(err),
                    },
                }
            }
        })
        .await;
        self.finish(proposal, result)
    }

    /// Wait for operator approval of a proposal and execute it (no eta).
    async fn execute_operator(&self, proposal: &mut Proposal) -> Result<(), Error> {
        let hash = proposal.hash;
        let chain = proposal.destination_chain().to_string();
        let Command {
            target,
            call_data,
            native_value,
            ..
        } = proposal.command.clone();
        let result = backoff::retry(&self.context, &self.cfg.execution, || {
            let submitter = &self.submitter;
            let (chain, target, call_data, native_value) =
                (&chain, &target, &call_data, &native_value);
            async move {
                match submitter
                    .is_operator_approved(chain, target, call_data, native_value)
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => {
                        // Not approved: either not yet visible or already closed
                        return match submitter
                            .proposal_status(chain, target, call_data, native_value)
                            .await
                        {
                            Ok(Some(ProposalStatus::Executed)) => Step::Ready(None),
                            Ok(Some(status @ ProposalStatus::Cancelled)) => {
                                Step::Abort(destination::Error::ProposalClosed { hash, status })
                            }
                            Ok(_) => {
                                debug!(%hash, "operator approval not observed");
                                Step::Retry
                            }
                            Err(err) if err.class() == Class::Transient => Step::Retry,
                            Err(err) => Step::Abort(err),
                        };
                    }
                    Err(err) if err.class() == Class::Transient => return Step::Retry,
                    Err(err) => return Step::Abort(err),
                }
                match submitter
                    .execute_operator_proposal(chain, target, call_data, native_value)
                    .await
                {
                    Ok(receipt) => Step::Ready(Some(receipt)),
                    Err(err) => match err.class() {
                        Class::Done => Step::Ready(None),
                        Class::Transient => Step::Retry,
                        Class::Replay | Class::Fatal => Step::Abort(err),
                    },
                }
            }
        })
        .await;
        self.finish(proposal, result)
    }

    fn finish(
        &self,
        proposal: &mut Proposal,
        result: Result<Option<destination::Receipt>, Failure<destination::Error>>,
    ) -> Result<(), Error> {
        let hash = proposal.hash;
        match result {
            Ok(receipt) => {
                if receipt.is_some() {
                    self.metrics.proposals_executed.inc();
                    info!(%hash, cc_id = %proposal.cc_id(), "proposal executed");
                } else {
                    debug!(%hash, "proposal already executed");
                }
                proposal.receipt = receipt;
                proposal.delivery.advance(Stage::Executed);
                Ok(())
            }
            Err(Failure::Timeout(waited)) => Err(Error::ExecutionTimeout {
                id: Id::Proposal(hash),
                waited,
            }),
            Err(Failure::Aborted(source)) => Err(Error::Destination {
                id: Id::Proposal(hash),
                source,
            }),
        }
    }
}
