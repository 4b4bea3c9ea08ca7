//! Run governance pipelines against an in-memory hub and in-memory destination ledgers.
//!
//! ```sh
//! cargo run --release --bin coordinator -- --chain solana --proposals 3 --simulate
//! ```

use clap::{value_parser, Arg, ArgAction, Command as Cli};
use commonware_runtime::{deterministic, tokio, Clock, Metrics, Runner};
use commonware_utils::from_hex_formatted;
use futures::future::join_all;
use interchain_coordinator::{
    backoff::Policy,
    destination::{Kind, Submitter},
    mocks::{Behavior, Hub, HubConfig, Ledger, LedgerConfig, VerifierSet},
    proposal::Kind as CommandKind,
    registry::{Authority, Chain},
    types::unix,
    Address, Command, Config, Orchestrator, Registry, Value,
};
use std::{fs, sync::Arc, time::Duration};
use tracing::{error, info, Level};

/// Everything the pipelines need once the runtime is started.
struct Args {
    registry: Arc<Registry>,
    chain: String,
    target: Address,
    call_data: Vec<u8>,
    native_value: Value,
    operator: bool,
    proposals: usize,
    verifiers: u64,
    sign_delay: Duration,
    metrics: bool,
}

/// Registry used when none is provided.
fn default_registry() -> Arc<Registry> {
    let authority = Authority {
        chain: "axelar".into(),
        address: "governance".into(),
    };
    let mut registry = Registry::default();
    registry.insert(
        "solana",
        Chain {
            kind: Kind::Amplifier,
            gateway: "gtw".into(),
            governance: "gov".into(),
            authority: authority.clone(),
            minimum_eta_delay: 3600,
            operator_commands: true,
        },
    );
    registry.insert(
        "ethereum",
        Chain {
            kind: Kind::Legacy,
            gateway: "0x4f4495243837681061c4743b74b3eedf548d56a5".into(),
            governance: "0xfdf36a30070ea0241d69052ea85ff44ad0476a66".into(),
            authority,
            minimum_eta_delay: 86400,
            operator_commands: false,
        },
    );
    registry.build().expect("default registry is valid")
}

async fn run<E: Clock + Metrics>(context: E, args: Args) {
    // Verifiers sign every session after a fixed delay
    let signers = (0..args.verifiers).map(|i| (format!("verifier-{i}"), 1));
    let verifiers = VerifierSet::new(0, signers, args.verifiers * 2 / 3 + 1);
    let hub = Hub::new(
        context.clone(),
        HubConfig {
            chains: args.registry.names().cloned().collect(),
            verifiers: verifiers.clone(),
            behavior: Behavior::Sign(args.sign_delay),
            session_timeout: Duration::from_secs(5 * 60),
        },
    );

    // Attach one ledger per registered chain
    let mut submitter = Submitter::new(
        context.with_label("submitter"),
        args.registry.clone(),
        Policy::bounded(Duration::from_secs(60)),
    );
    for (name, chain) in &args.registry.chains {
        let cfg = LedgerConfig::from_chain(name.clone(), chain, verifiers.clone(), 1);
        submitter.register(name.clone(), Ledger::new(context.clone(), cfg));
    }

    // Commands must originate from the governance authority of the destination
    let chain = args
        .registry
        .chain(&args.chain)
        .expect("destination chain not in registry");
    let cfg = Config::new(chain.authority.chain.clone(), chain.authority.address.clone());
    let orchestrator =
        Orchestrator::new(context.with_label("orchestrator"), cfg, hub, submitter);

    // Run every pipeline concurrently
    let (kind, eta) = if args.operator {
        (CommandKind::ApproveOperator, 0)
    } else {
        let eta = unix(context.current()) + chain.minimum_eta_delay + 60;
        (CommandKind::ScheduleTimelock, eta)
    };
    let pipelines = (0..args.proposals).map(|i| {
        let mut call_data = args.call_data.clone();
        if args.proposals > 1 {
            call_data.extend_from_slice(&(i as u32).to_be_bytes());
        }
        let command = Command::new(kind, args.target.clone(), call_data, args.native_value, eta);
        let orchestrator = orchestrator.clone();
        let chain = args.chain.clone();
        async move { orchestrator.run(&chain, command).await }
    });
    info!(
        chain = %args.chain,
        %kind,
        eta,
        proposals = args.proposals,
        "running pipelines"
    );
    for result in join_all(pipelines).await {
        match result {
            Ok(proposal) => info!(
                hash = %proposal.hash(),
                cc_id = %proposal.cc_id(),
                stage = %proposal.stage(),
                replays = proposal.delivery().tracker().replays(),
                "pipeline finished"
            ),
            Err(err) => error!(id = %err.id(), ?err, "pipeline failed"),
        }
    }
    if args.metrics {
        println!("{}", context.encode());
    }
}

fn main() {
    // Parse arguments
    let matches = Cli::new("coordinator")
        .about("drive governance proposals from the hub to destination ledgers")
        .arg(
            Arg::new("registry")
                .long("registry")
                .required(false)
                .help("Path to a JSON registry of destination chains"),
        )
        .arg(
            Arg::new("chain")
                .long("chain")
                .default_value("solana")
                .help("Destination chain"),
        )
        .arg(
            Arg::new("target")
                .long("target")
                .default_value("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa")
                .help("Contract called by the proposal"),
        )
        .arg(
            Arg::new("call-data")
                .long("call-data")
                .default_value("0x1234")
                .help("Call data of the proposal"),
        )
        .arg(
            Arg::new("native-value")
                .long("native-value")
                .default_value("0")
                .value_parser(value_parser!(u128)),
        )
        .arg(
            Arg::new("operator")
                .long("operator")
                .action(ArgAction::SetTrue)
                .help("Use the operator path instead of the timelock"),
        )
        .arg(
            Arg::new("proposals")
                .long("proposals")
                .default_value("1")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("verifiers")
                .long("verifiers")
                .default_value("4")
                .value_parser(value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("sign-delay")
                .long("sign-delay")
                .default_value("2")
                .value_parser(value_parser!(u64))
                .help("Seconds before a verifier signs a session"),
        )
        .arg(
            Arg::new("simulate")
                .long("simulate")
                .action(ArgAction::SetTrue)
                .help("Run in simulated time (waits on etas complete instantly)"),
        )
        .arg(
            Arg::new("metrics")
                .long("metrics")
                .action(ArgAction::SetTrue)
                .help("Print metrics once all pipelines finish"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .default_value("info")
                .value_parser(value_parser!(Level)),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .get_matches();

    // Create logger
    let level = *matches.get_one::<Level>("log-level").expect("level has a default");
    if matches.get_flag("json") {
        tracing_subscriber::fmt()
            .json()
            .with_max_level(level)
            .init();
    } else {
        tracing_subscriber::fmt().with_max_level(level).init();
    }

    // Load registry
    let registry = match matches.get_one::<String>("registry") {
        Some(path) => {
            let raw = fs::read_to_string(path).expect("could not read registry");
            Registry::from_json(&raw).expect("registry not well-formed")
        }
        None => default_registry(),
    };
    for name in registry.names() {
        info!(chain = %name, "registered destination");
    }

    // Build proposal
    let target = matches
        .get_one::<String>("target")
        .and_then(|target| Address::from_hex(target))
        .expect("target not well-formed");
    let call_data = matches
        .get_one::<String>("call-data")
        .and_then(|call_data| from_hex_formatted(call_data))
        .expect("call data not well-formed");
    let args = Args {
        registry,
        chain: matches
            .get_one::<String>("chain")
            .expect("chain has a default")
            .clone(),
        target,
        call_data,
        native_value: Value::from(*matches.get_one::<u128>("native-value").expect("default")),
        operator: matches.get_flag("operator"),
        proposals: *matches.get_one::<usize>("proposals").expect("default"),
        verifiers: *matches.get_one::<u64>("verifiers").expect("default"),
        sign_delay: Duration::from_secs(*matches.get_one::<u64>("sign-delay").expect("default")),
        metrics: matches.get_flag("metrics"),
    };

    // Start runtime
    if matches.get_flag("simulate") {
        deterministic::Runner::default().start(|context| run(context, args));
    } else {
        tokio::Runner::default().start(|context| run(context, args));
    }
}
