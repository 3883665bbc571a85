//! hop-transfer - Multi-hop AVAX transfer CLI
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────┐    ┌──────────┐
//! │  Config  │───▶│  Route   │───▶│   Hops   │───▶│  Ledger  │
//! │  (YAML)  │    │ + Fees   │    │ (resume) │    │  (RPC)   │
//! └──────────┘    └──────────┘    └──────────┘    └──────────┘
//! ```
//!
//! Send:    hop-transfer --send --from P --to X --amount 1.5 --key sender.pk --destination X-avax1...
//! Receive: hop-transfer --receive --from P --to X --amount 1.5 --key receiver.pk
//! Resume:  add --recovery-step N [--pending-tx ID] as printed by the failed run

use std::path::Path;
use std::sync::Arc;

use anyhow::anyhow;
use tracing::{error, info, warn};

use hop_transfer::config::AppConfig;
use hop_transfer::money::{format_amount, format_amount_full, parse_amount};
use hop_transfer::transfer::types::HopReceipt;
use hop_transfer::transfer::{
    Endpoint, KeySource, LocalSecret, OwnerDescriptor, ResumePoint, RpcLedger, TransferError, TransferFacade,
    TransferMode, TransferRequest, TxId, cancel_pair,
};

// ============================================================
// ARGUMENTS
// ============================================================

fn arg_value(names: &[&str]) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if names.contains(&args[i].as_str()) && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

fn required(name: &str) -> anyhow::Result<String> {
    arg_value(&[name]).ok_or_else(|| anyhow!(TransferError::InvalidRequest(format!("{} is required", name))))
}

fn has_flag(name: &str) -> bool {
    std::env::args().any(|a| a == name)
}

fn get_env() -> String {
    arg_value(&["--env", "-e"]).unwrap_or_else(|| "dev".to_string())
}

fn get_resume() -> anyhow::Result<ResumePoint> {
    let step = match arg_value(&["--recovery-step"]) {
        Some(s) => s
            .parse::<usize>()
            .map_err(|_| TransferError::InvalidRequest(format!("invalid --recovery-step '{}'", s)))?,
        None => 0,
    };
    let mut resume = ResumePoint::at(step);
    if let Some(tx) = arg_value(&["--pending-tx"]) {
        resume = resume.with_pending(tx.parse::<TxId>()?);
    }
    Ok(resume)
}

fn load_keys() -> anyhow::Result<Box<dyn KeySource>> {
    if arg_value(&["--ledger"]).is_some() {
        return Err(TransferError::Key(
            "no hardware wallet transport in this build; use --key".to_string(),
        )
        .into());
    }
    let path = required("--key")?;
    let keys = LocalSecret::load(Path::new(&path))
        .map_err(|e| TransferError::Key(format!("{}: {}", path, e)))?;
    Ok(Box::new(keys))
}

// ============================================================
// TRANSFER
// ============================================================

async fn run(config: &AppConfig) -> anyhow::Result<()> {
    let mode = TransferMode::from_flags(has_flag("--send"), has_flag("--receive"))?;
    let network = &config.network;
    let endpoint = |flag: &str| -> anyhow::Result<Endpoint> {
        network
            .parse_endpoint(&required(flag)?)
            .map_err(|e| TransferError::InvalidRequest(format!("{}: {}", flag, e)).into())
    };
    let source = endpoint("--from")?;
    let destination = endpoint("--to")?;
    let keys = load_keys()?;

    let ledger = Arc::new(RpcLedger::new(network.clone())?);
    let facade = TransferFacade::new(config, ledger)?;
    let route = facade.resolve_route(mode, source, destination, keys.as_ref())?;
    let decimals = route.decimals();
    let amount = parse_amount(&required("--amount")?, decimals)
        .map_err(|e| TransferError::InvalidRequest(format!("--amount: {}", e)))?;
    let destination_owner = arg_value(&["--destination"])
        .map(|d| OwnerDescriptor::parse(&d, &network.hrp))
        .transpose()?;
    let resume = get_resume()?;

    info!(
        signer = keys.name(),
        address = %keys.address_for(source, &network.hrp)?,
        network = %network.name,
        "Signer loaded"
    );

    let (handle, cancel) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            handle.cancel();
        }
    });

    let req = TransferRequest {
        mode,
        source,
        destination,
        amount,
        destination_owner,
        resume,
    };
    let outcome = match facade.transfer(req, keys.as_ref(), &cancel).await {
        Ok(outcome) => outcome,
        Err(failure) => {
            print_receipts(&failure.receipts, decimals);
            return Err(failure.error.into());
        }
    };

    print_receipts(&outcome.receipts, decimals);
    println!(
        "{} of {} {} -> {} complete at step {}",
        mode.as_str(),
        format_amount(amount, decimals, decimals),
        source,
        destination,
        outcome.cursor
    );
    Ok(())
}

fn print_receipts(receipts: &[HopReceipt], decimals: u32) {
    for receipt in receipts {
        let ids: Vec<String> = receipt.tx_ids.iter().map(|t| t.to_string()).collect();
        println!(
            "step {} {}: credited {} ({})",
            receipt.ordinal,
            receipt.hop,
            format_amount_full(receipt.credited, decimals),
            ids.join(", ")
        );
    }
}

// ============================================================
// MAIN
// ============================================================

#[tokio::main]
async fn main() {
    if has_flag("--version") {
        println!("hop-transfer {} ({})", env!("CARGO_PKG_VERSION"), env!("GIT_HASH"));
        return;
    }

    let env = get_env();
    let app_config = match AppConfig::load(&env) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };
    let log_guard = hop_transfer::logging::init_logging(&app_config);

    info!("Starting hop-transfer in {} mode", env);

    if let Err(e) = run(&app_config).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        let code = match e.downcast_ref::<TransferError>() {
            Some(transfer_err) => {
                if let Some(hint) = transfer_err.resume_hint() {
                    eprintln!("{}", hint);
                }
                transfer_err.exit_code()
            }
            None => 1,
        };
        drop(log_guard);
        std::process::exit(code);
    }
}
