use super::*;
use crate::{
    backoff::Policy,
    destination::{Destination, Kind, ProposalStatus, Subject, Submitter},
    mocks::{Behavior, Effect, Hub, HubConfig, Ledger, LedgerConfig, Proof, VerifierSet},
    proposal::Kind as CommandKind,
    registry::{Authority, Chain, Registry},
    relay::Hub as _,
    types::{unix, Address, CommandId, Value},
};
use bytes::Bytes;
use commonware_codec::DecodeExt;
use commonware_macros::{select, test_traced};
use commonware_runtime::{deterministic, Clock, Metrics as _, Runner, Spawner};
use futures::future::join;
use std::sync::Arc;

const DELAY: u64 = 3600;

type Engine = Orchestrator<
    deterministic::Context,
    Hub<deterministic::Context>,
    Ledger<deterministic::Context>,
>;

struct Fixture {
    orchestrator: Engine,
    hub: Hub<deterministic::Context>,
    solana: Ledger<deterministic::Context>,
    ethereum: Ledger<deterministic::Context>,
}

fn verifiers(epoch: u64) -> VerifierSet {
    VerifierSet::new(epoch, [("a", 1), ("b", 1), ("c", 1)], 2)
}

fn chain(kind: Kind, operator_commands: bool) -> Chain {
    Chain {
        kind,
        gateway: "gtw".into(),
        governance: "gov".into(),
        authority: Authority {
            chain: "axelar".into(),
            address: "governance".into(),
        },
        minimum_eta_delay: DELAY,
        operator_commands,
    }
}

fn registry() -> Arc<Registry> {
    let mut registry = Registry::default();
    registry.insert("solana", chain(Kind::Amplifier, true));
    registry.insert("ethereum", chain(Kind::Legacy, false));
    registry.build().unwrap()
}

fn setup(context: &deterministic::Context, cfg: Config, retention: usize) -> Fixture {
    let registry = registry();
    let hub = Hub::new(
        context.clone(),
        HubConfig {
            chains: vec!["solana".into(), "ethereum".into()],
            verifiers: verifiers(0),
            behavior: Behavior::Sign(Duration::from_secs(2)),
            session_timeout: Duration::from_secs(30),
        },
    );
    let ledger = |name: &str| {
        let cfg = LedgerConfig::from_chain(
            name,
            registry.chain(name).unwrap(),
            verifiers(0),
            retention,
        );
        Ledger::new(context.clone(), cfg)
    };
    let solana = ledger("solana");
    let ethereum = ledger("ethereum");
    let mut submitter = Submitter::new(
        context.with_label("submitter"),
        registry.clone(),
        Policy::bounded(Duration::from_secs(60)),
    );
    submitter.register("solana", solana.clone());
    submitter.register("ethereum", ethereum.clone());
    let orchestrator = Orchestrator::new(
        context.with_label("orchestrator"),
        cfg,
        hub.clone(),
        submitter,
    );
    Fixture {
        orchestrator,
        hub,
        solana,
        ethereum,
    }
}

fn config() -> Config {
    Config::new("axelar", "governance")
}

fn target() -> Address {
    Address::from_hex("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap()
}

fn command(kind: CommandKind, call_data: &[u8], eta: u64) -> Command {
    Command::new(kind, target(), call_data.to_vec(), Value::ZERO, eta)
}

fn now(context: &deterministic::Context) -> u64 {
    unix(context.current())
}

#[test_traced]
fn test_timelock_end_to_end() {
    let executor = deterministic::Runner::default();
    executor.start(|context| async move {
        let Fixture {
            orchestrator,
            solana,
            ..
        } = setup(&context, config(), 1);
        let eta = now(&context) + DELAY + 60;
        let command = command(CommandKind::ScheduleTimelock, &[0x12, 0x34], eta);
        let hash = command.proposal_hash();

        let mut proposal = orchestrator.schedule("solana", command.clone()).await.unwrap();
        let cc_id = CrossChainId::new("axelar", "msg-1");
        assert_eq!(proposal.cc_id(), &cc_id);
        assert_eq!(proposal.stage(), Stage::Delivered);

        // Drive until the proposal is waiting on its eta
        select! {
            _ = orchestrator.drive(&mut proposal) => { panic!("executed before eta"); },
            _ = context.sleep(Duration::from_secs(600)) => {},
        };
        assert_eq!(proposal.stage(), Stage::Approved);
        assert!(proposal.delivery().consumed());
        assert_eq!(
            proposal.delivery().approval().unwrap().command_id,
            CommandId::from_cc_id(&cc_id)
        );
        assert_eq!(
            solana.status(&target(), &[0x12, 0x34], &Value::ZERO),
            Some(ProposalStatus::Scheduled)
        );
        let early = solana
            .execute_proposal(&target(), &[0x12, 0x34], &Value::ZERO)
            .await;
        assert!(matches!(early, Err(destination::Error::TooEarly { .. })));

        // Complete once the eta passes
        orchestrator.drive(&mut proposal).await.unwrap();
        assert!(now(&context) >= eta);
        assert_eq!(proposal.stage(), Stage::Executed);
        assert_eq!(
            proposal.receipt().unwrap().subject,
            Subject::Proposal(hash)
        );
        assert_eq!(
            solana.effects(),
            vec![Effect::Called {
                target: target(),
                call_data: Bytes::from_static(&[0x12, 0x34]),
                native_value: Value::ZERO,
            }]
        );
        assert_eq!(
            solana
                .execute_proposal(&target(), &[0x12, 0x34], &Value::ZERO)
                .await,
            Err(destination::Error::ProposalExecuted(hash))
        );

        // Driving or resuming a finished proposal changes nothing
        orchestrator.drive(&mut proposal).await.unwrap();
        let resumed = orchestrator
            .resume(cc_id, "solana", command)
            .await
            .unwrap();
        assert_eq!(resumed.stage(), Stage::Executed);
        assert!(resumed.receipt().is_none());
        assert_eq!(solana.effects().len(), 1);

        let metrics = context.encode();
        assert!(metrics.contains("orchestrator_proposals_executed_total 1"));
        assert!(metrics.contains("orchestrator_messages_executed_total 1"));
        assert!(metrics.contains("orchestrator_inflight 0"));
    });
}

#[test_traced]
fn test_operator_bypass() {
    let executor = deterministic::Runner::default();
    executor.start(|context| async move {
        let Fixture {
            orchestrator,
            solana,
            ..
        } = setup(&context, config(), 1);
        let command = command(CommandKind::ApproveOperator, &[0x12, 0x34], 0);
        let hash = command.proposal_hash();

        let proposal = orchestrator.run("solana", command.clone()).await.unwrap();
        assert_eq!(proposal.stage(), Stage::Executed);
        assert_eq!(
            proposal.receipt().unwrap().subject,
            Subject::Proposal(hash)
        );

        // No timelock was waited on
        assert!(now(&context) < DELAY);
        assert_eq!(
            solana.status(&target(), &[0x12, 0x34], &Value::ZERO),
            Some(ProposalStatus::Executed)
        );
        assert_eq!(solana.effects().len(), 1);
        assert_eq!(solana.requests("execute_operator_proposal"), 1);

        // Once executed, the approval is gone and nothing is sent again
        let resumed = orchestrator
            .resume(proposal.cc_id().clone(), "solana", command)
            .await
            .unwrap();
        assert_eq!(resumed.stage(), Stage::Executed);
        assert!(resumed.receipt().is_none());
        assert_eq!(solana.requests("execute_operator_proposal"), 1);
        assert_eq!(solana.effects().len(), 1);
    });
}

#[test_traced]
fn test_invalid_commands() {
    let executor = deterministic::Runner::default();
    executor.start(|context| async move {
        let Fixture {
            orchestrator, hub, ..
        } = setup(&context, config(), 1);

        // Unknown chain
        let schedule = command(CommandKind::ScheduleTimelock, &[1], DELAY * 2);
        let err = orchestrator.run("near", schedule.clone()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Destination {
                source: destination::Error::UnknownChain(ref chain),
                ..
            } if chain == "near"
        ));
        assert_eq!(err.id(), Id::Proposal(schedule.proposal_hash()));

        // Operator commands on a chain without the operator path
        let approve = command(CommandKind::ApproveOperator, &[1], 0);
        let err = orchestrator.run("ethereum", approve).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Invalid {
                source: proposal::Error::InvalidCommandKind(2),
                ..
            }
        ));

        // Nothing was routed
        assert_eq!(hub.requests(), 0);

        // Eta below the minimum delay is rejected by the governance contract
        let early = command(CommandKind::ScheduleTimelock, &[1], now(&context) + 60);
        let err = orchestrator.run("solana", early).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Destination {
                source: destination::Error::EtaTooSoon { .. },
                ..
            }
        ));
        assert_eq!(err.id(), Id::Message(CrossChainId::new("axelar", "msg-1")));
    });
}

#[test_traced]
fn test_expired_session_recovered() {
    let executor = deterministic::Runner::default();
    executor.start(|context| async move {
        let Fixture {
            orchestrator,
            hub,
            solana,
            ..
        } = setup(&context, config(), 1);
        hub.set_all(Behavior::Silent);
        context.with_label("verifiers").spawn({
            let hub = hub.clone();
            move |context| async move {
                context.sleep(Duration::from_secs(20)).await;
                hub.set_all(Behavior::Sign(Duration::from_secs(2)));
            }
        });

        let payload = Bytes::from_static(b"hello");
        let delivery = orchestrator
            .relay("solana", "receiver", payload.clone())
            .await
            .unwrap();
        assert_eq!(delivery.stage(), Stage::Executed);
        assert_eq!(delivery.tracker().sessions(), 2);
        assert_eq!(delivery.tracker().replays(), 1);
        assert_eq!(hub.sessions(), 2);

        let command_id = delivery.approval().unwrap().command_id;
        assert_eq!(
            solana.effects(),
            vec![Effect::Delivered {
                command_id,
                destination_address: "receiver".into(),
                payload,
            }]
        );
        assert!(context
            .encode()
            .contains("orchestrator_sessions_expired_total 1"));
    });
}

#[test_traced]
fn test_stale_proof_replayed() {
    let executor = deterministic::Runner::default();
    executor.start(|context| async move {
        let Fixture {
            orchestrator,
            hub,
            solana,
            ..
        } = setup(&context, config(), 0);

        // Rotate while the first session is being signed
        context.with_label("rotation").spawn({
            let hub = hub.clone();
            let solana = solana.clone();
            move |context| async move {
                context.sleep(Duration::from_secs(1)).await;
                hub.rotate(verifiers(1));
                solana.rotate(verifiers(1));
            }
        });

        let delivery = orchestrator
            .relay("solana", "receiver", Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert_eq!(delivery.stage(), Stage::Executed);
        assert_eq!(delivery.tracker().replays(), 1);
        assert_eq!(hub.sessions(), 2);
        assert!(context
            .encode()
            .contains("orchestrator_proofs_replayed_total 1"));
    });
}

#[test_traced]
fn test_proof_attempts_exhausted() {
    let executor = deterministic::Runner::default();
    executor.start(|context| async move {
        let Fixture {
            orchestrator,
            hub,
            solana,
            ..
        } = setup(&context, config(), 0);

        // The gateway moved on, the hub did not
        solana.rotate(verifiers(5));

        let err = orchestrator
            .relay("solana", "receiver", Bytes::from_static(b"hello"))
            .await
            .unwrap_err();
        let cc_id = CrossChainId::new("axelar", "msg-1");
        assert!(matches!(
            err,
            Error::ProofAttemptsExhausted { cc_id: ref id, attempts: 3 } if *id == cc_id
        ));
        assert_eq!(hub.sessions(), 3);
        assert!(solana.effects().is_empty());
    });
}

#[test_traced]
fn test_transient_failures_retried() {
    let executor = deterministic::Runner::default();
    executor.start(|context| async move {
        let Fixture {
            orchestrator,
            hub,
            solana,
            ..
        } = setup(&context, config(), 1);
        hub.fail_next(2);
        solana.fail_next(2);

        let delivery = orchestrator
            .relay("solana", "receiver", Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert_eq!(delivery.stage(), Stage::Executed);
        assert!(delivery.receipt().is_some());
        assert_eq!(solana.effects().len(), 1);
    });
}

#[test_traced]
fn test_approval_timeout() {
    let executor = deterministic::Runner::default();
    executor.start(|context| async move {
        let cfg = Config {
            approval: Policy::bounded(Duration::from_secs(60)),
            ..config()
        };
        let Fixture {
            orchestrator, hub, ..
        } = setup(&context, cfg, 1);
        hub.set_all(Behavior::Silent);

        let err = orchestrator
            .relay("solana", "receiver", Bytes::from_static(b"hello"))
            .await
            .unwrap_err();
        let Error::ApprovalTimeout { cc_id, waited } = err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(cc_id, CrossChainId::new("axelar", "msg-1"));
        assert!(waited >= Duration::from_secs(60));
        assert!(context
            .encode()
            .contains("orchestrator_sessions_expired_total 1"));
    });
}

#[test_traced]
fn test_wait_for_approval() {
    let executor = deterministic::Runner::default();
    executor.start(|context| async move {
        let Fixture {
            orchestrator, hub, ..
        } = setup(&context, config(), 1);
        let message = hub
            .call_contract("axelar", "governance", "solana", "gov", Bytes::from_static(b"x"))
            .await
            .unwrap();

        let execute_data = orchestrator
            .wait_for_approval(message.cc_id())
            .await
            .unwrap();
        let proof = Proof::decode(execute_data).unwrap();
        assert_eq!(proof.epoch, 0);
        assert_eq!(proof.messages, vec![message.message]);
    });
}

#[test_traced]
fn test_cancel_closes_window() {
    let executor = deterministic::Runner::default();
    executor.start(|context| async move {
        let Fixture {
            orchestrator,
            solana,
            ..
        } = setup(&context, config(), 1);
        let eta = now(&context) + DELAY + 60;
        let command = command(CommandKind::ScheduleTimelock, &[0x12, 0x34], eta);
        let hash = command.proposal_hash();

        let mut proposal = orchestrator.schedule("solana", command.clone()).await.unwrap();
        select! {
            _ = orchestrator.drive(&mut proposal) => { panic!("executed before eta"); },
            _ = context.sleep(Duration::from_secs(600)) => {},
        };
        assert_eq!(proposal.stage(), Stage::Approved);

        // Cancel before the eta
        let mut cancel = orchestrator.cancel(&mut proposal).await.unwrap();
        assert_eq!(cancel.command().kind, CommandKind::CancelTimelock);
        assert_eq!(cancel.stage(), Stage::Cancelled);
        assert_eq!(proposal.stage(), Stage::Cancelled);
        assert_eq!(
            solana.status(&target(), &[0x12, 0x34], &Value::ZERO),
            Some(ProposalStatus::Cancelled)
        );

        // A cancelled pipeline stays put
        orchestrator.drive(&mut proposal).await.unwrap();
        assert_eq!(proposal.stage(), Stage::Cancelled);

        // Cancellations cannot be cancelled
        assert!(matches!(
            orchestrator.cancel(&mut cancel).await,
            Err(Error::Invalid {
                source: proposal::Error::NotCancellable(CommandKind::CancelTimelock),
                ..
            })
        ));

        // Past the eta the proposal still cannot run
        context.sleep(Duration::from_secs(2 * DELAY)).await;
        let err = orchestrator
            .resume(proposal.cc_id().clone(), "solana", command)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Destination {
                source: destination::Error::ProposalClosed {
                    status: ProposalStatus::Cancelled,
                    ..
                },
                ..
            }
        ));
        assert_eq!(err.id(), Id::Proposal(hash));
        assert!(solana.effects().is_empty());
    });
}

#[test_traced]
fn test_resume_abandoned_pipeline() {
    let executor = deterministic::Runner::default();
    executor.start(|context| async move {
        let Fixture {
            orchestrator,
            hub,
            solana,
            ..
        } = setup(&context, config(), 1);
        let eta = now(&context) + DELAY + 60;
        let command = command(CommandKind::ScheduleTimelock, &[0x12, 0x34], eta);

        // Abandon the pipeline while its proof is being signed
        let mut proposal = orchestrator.schedule("solana", command.clone()).await.unwrap();
        select! {
            _ = orchestrator.drive(&mut proposal) => { panic!("completed too quickly"); },
            _ = context.sleep(Duration::from_secs(1)) => {},
        };
        assert_eq!(proposal.stage(), Stage::ProofPending);
        let cc_id = proposal.cc_id().clone();
        drop(proposal);

        // Resuming with another command is refused
        let other = self::command(CommandKind::ScheduleTimelock, &[0x56], eta);
        assert!(matches!(
            orchestrator.resume(cc_id.clone(), "solana", other).await,
            Err(Error::PayloadMismatch(ref id)) if *id == cc_id
        ));
        let unknown = CrossChainId::new("axelar", "msg-99");
        assert!(matches!(
            orchestrator.resume(unknown, "solana", command.clone()).await,
            Err(Error::Relay {
                source: relay::Error::UnknownMessage(_),
                ..
            })
        ));

        // Resume picks up the pending session and finishes the proposal
        let proposal = orchestrator.resume(cc_id, "solana", command).await.unwrap();
        assert_eq!(proposal.stage(), Stage::Executed);
        assert!(proposal.receipt().is_some());
        assert_eq!(hub.sessions(), 1);
        assert_eq!(solana.effects().len(), 1);
    });
}

#[test_traced]
fn test_legacy_dispatch() {
    let executor = deterministic::Runner::default();
    executor.start(|context| async move {
        let Fixture {
            orchestrator,
            solana,
            ethereum,
            ..
        } = setup(&context, config(), 1);

        let first = orchestrator
            .relay("ethereum", "0x01", Bytes::from_static(b"one"))
            .await
            .unwrap();
        let second = orchestrator
            .relay("ethereum", "0x01", Bytes::from_static(b"two"))
            .await
            .unwrap();
        assert_eq!(
            first.approval().unwrap().command_id,
            CommandId::from_sequence(0)
        );
        assert_eq!(
            second.approval().unwrap().command_id,
            CommandId::from_sequence(1)
        );
        assert_eq!(ethereum.effects().len(), 2);
        assert!(solana.effects().is_empty());
    });
}

#[test_traced]
fn test_concurrent_proposals() {
    let executor = deterministic::Runner::default();
    executor.start(|context| async move {
        let Fixture {
            orchestrator,
            hub,
            solana,
            ..
        } = setup(&context, config(), 1);
        let eta = now(&context) + DELAY + 60;
        let timelock = command(CommandKind::ScheduleTimelock, &[0x01], eta);
        let operator = command(CommandKind::ApproveOperator, &[0x02], 0);

        let (timelock, operator) = join(
            orchestrator.run("solana", timelock),
            orchestrator.run("solana", operator),
        )
        .await;
        let (timelock, operator) = (timelock.unwrap(), operator.unwrap());
        assert_eq!(timelock.stage(), Stage::Executed);
        assert_eq!(operator.stage(), Stage::Executed);
        assert_ne!(timelock.cc_id(), operator.cc_id());
        assert_eq!(hub.sessions(), 2);

        // The operator proposal did not wait on the timelock
        let called: Vec<_> = solana
            .effects()
            .into_iter()
            .map(|effect| match effect {
                Effect::Called { call_data, .. } => call_data,
                Effect::Delivered { .. } => panic!("unexpected delivery"),
            })
            .collect();
        assert_eq!(
            called,
            vec![Bytes::from_static(&[0x02]), Bytes::from_static(&[0x01])]
        );
        assert!(context.encode().contains("orchestrator_inflight 0"));
    });
}

#[test_traced]
fn test_cancel_operator_approval() {
    let executor = deterministic::Runner::default();
    executor.start(|context| async move {
        let Fixture {
            orchestrator,
            solana,
            ..
        } = setup(&context, config(), 1);
        let approve = command(CommandKind::ApproveOperator, &[0x12, 0x34], 0);
        let hash = approve.proposal_hash();
        let mut approval = orchestrator.schedule("solana", approve.clone()).await.unwrap();
        let cc_id = approval.cc_id().clone();

        // Another relayer applies the approval without executing the proposal
        let execute_data = orchestrator.wait_for_approval(&cc_id).await.unwrap();
        assert_eq!(solana.approve(execute_data).await.unwrap().len(), 1);
        solana
            .execute_amplifier(&cc_id, "governance", approve.to_payload())
            .await
            .unwrap();
        assert_eq!(
            solana.status(&target(), &[0x12, 0x34], &Value::ZERO),
            Some(ProposalStatus::Approved)
        );

        // Revoke the approval
        let cancel = orchestrator.cancel(&mut approval).await.unwrap();
        assert_eq!(cancel.command().kind, CommandKind::CancelOperatorApproval);
        assert_eq!(cancel.stage(), Stage::Cancelled);
        assert_eq!(approval.stage(), Stage::Cancelled);
        assert_eq!(
            solana.status(&target(), &[0x12, 0x34], &Value::ZERO),
            Some(ProposalStatus::Cancelled)
        );

        // Resuming the approval finds the window closed without attempting execution
        let err = orchestrator
            .resume(cc_id, "solana", approve)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Destination {
                source: destination::Error::ProposalClosed {
                    status: ProposalStatus::Cancelled,
                    ..
                },
                ..
            }
        ));
        assert_eq!(err.id(), Id::Proposal(hash));
        assert_eq!(solana.requests("execute_operator_proposal"), 0);
        assert!(solana.effects().is_empty());
    });
}

#[test_traced]
fn test_destination_too_early_retried() {
    let executor = deterministic::Runner::default();
    executor.start(|context| async move {
        let Fixture {
            orchestrator,
            solana,
            ..
        } = setup(&context, config(), 1);
        let eta = now(&context) + DELAY + 60;
        let command = command(CommandKind::ScheduleTimelock, &[0x12, 0x34], eta);
        let mut proposal = orchestrator.schedule("solana", command).await.unwrap();

        // The ledger clock runs behind ours: it still reports the eta as pending
        solana.set_lag(30);
        orchestrator.drive(&mut proposal).await.unwrap();
        assert_eq!(proposal.stage(), Stage::Executed);
        assert!(now(&context) >= eta + 30);
        assert!(proposal.receipt().unwrap().timestamp >= eta);
        assert_eq!(solana.requests("execute_proposal"), 2);
        assert_eq!(solana.effects().len(), 1);
    });
}

#[test_traced]
fn test_far_eta_times_out() {
    let executor = deterministic::Runner::default();
    executor.start(|context| async move {
        let Fixture {
            orchestrator,
            solana,
            ..
        } = setup(&context, config(), 1);
        let command = command(CommandKind::ScheduleTimelock, &[0x12, 0x34], u64::MAX);
        let hash = command.proposal_hash();
        let mut proposal = orchestrator.schedule("solana", command).await.unwrap();

        // The eta is accepted but can never be waited for
        let err = orchestrator.drive(&mut proposal).await.unwrap_err();
        assert!(matches!(err, Error::ExecutionTimeout { .. }));
        assert_eq!(err.id(), Id::Proposal(hash));
        assert_eq!(proposal.stage(), Stage::Approved);
        assert_eq!(
            solana.status(&target(), &[0x12, 0x34], &Value::ZERO),
            Some(ProposalStatus::Scheduled)
        );
        assert_eq!(solana.requests("execute_proposal"), 0);

        // The caller can still close the window
        orchestrator.cancel(&mut proposal).await.unwrap();
        assert_eq!(proposal.stage(), Stage::Cancelled);
        assert_eq!(
            solana.status(&target(), &[0x12, 0x34], &Value::ZERO),
            Some(ProposalStatus::Cancelled)
        );
        assert!(solana.effects().is_empty());
    });
}
