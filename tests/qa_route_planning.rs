use std::sync::Arc;

use hop_transfer::config::AppConfig;
use hop_transfer::money::{format_amount, parse_amount};
use hop_transfer::transfer::types::{Endpoint, HopKind, TransferMode};
use hop_transfer::transfer::{
    KeySource, LocalSecret, OwnerDescriptor, ResumePoint, RoutePolicy, RouteResolver, RpcLedger, TransferFacade,
    TransferRequest,
};

const EWOQ_HEX: &str = "56289e99c94b6912bfc12adc093c9b51124f0dc54ac7a766b2bc5ccf558d8027";
const OTHER_HEX: &str = "0101010101010101010101010101010101010101010101010101010101010101";

const CONFIG: &str = r#"
log_level: info
log_dir: ./logs
log_file: hop-transfer.log
use_json: false
rotation: never
network:
  name: local
  network_id: 12345
  hrp: local
  rpc_url: http://127.0.0.1:9650
  avax_asset_id: 2fombhL7aGPwj3KH4bfrmJwW6PVnMobf9Y2fn9GwxiAAJyFDbe
  x_chain_id: 2eNy1mUFdmaxXNj1eQHUe7Np4gju9sJsEtWQ4MX3ToiNKuADed
  c_chain_id: 2CA6j5zYzasynPsFeNoqWkmTCt3VScMvXUZHbfDJ8k3oGzAPtU
fees:
  p_chain_tx_fee: 1000000
  x_chain_tx_fee: 1000000
  c_chain_atomic_budget: 2000000
"#;

/// Facade over an RPC ledger that is never contacted
fn facade() -> TransferFacade {
    let config = AppConfig::from_yaml(CONFIG).unwrap();
    let ledger = Arc::new(RpcLedger::new(config.network.clone()).unwrap());
    TransferFacade::new(&config, ledger).unwrap()
}

fn request(mode: TransferMode, source: Endpoint, destination: Endpoint, owner: Option<OwnerDescriptor>) -> TransferRequest {
    TransferRequest {
        mode,
        source,
        destination,
        amount: 1_000_000_000,
        destination_owner: owner,
        resume: ResumePoint::default(),
    }
}

#[test]
fn qa_every_primary_pair_resolves() {
    let resolver = RouteResolver::new();
    let primary = [Endpoint::PChain, Endpoint::XChain, Endpoint::CChain];
    for source in primary {
        for destination in primary {
            let route = resolver
                .resolve(source, destination, RoutePolicy::default())
                .unwrap_or_else(|e| panic!("{} -> {}: {}", source, destination, e));
            assert_eq!(route.source(), source);
            assert_eq!(route.destination(), destination);
            for pair in route.hops().windows(2) {
                assert_eq!(pair[0].destination, pair[1].source);
            }
        }
    }
}

#[test]
fn qa_relay_splits_between_send_and_receive() {
    let route = RouteResolver::new()
        .resolve(Endpoint::PChain, Endpoint::PChain, RoutePolicy::default())
        .unwrap();
    assert_eq!(route.len(), 4);

    let (send_offset, send) = route.split_for(TransferMode::Send).unwrap();
    let (receive_offset, receive) = route.split_for(TransferMode::Receive).unwrap();
    assert_eq!(send_offset, 0);
    assert_eq!(send.len(), 1);
    assert_eq!(receive_offset, 1);
    assert_eq!(receive.len(), 3);
    assert_eq!(
        receive.hops()[0].kind,
        HopKind::UtxoImport {
            from: Endpoint::PChain
        }
    );
}

#[test]
fn qa_signer_addresses_and_owner_parsing_agree() {
    let key = LocalSecret::parse(EWOQ_HEX).unwrap();
    let x_addr = key.address_for(Endpoint::XChain, "local").unwrap();
    assert!(x_addr.starts_with("X-local1"));

    let owner = OwnerDescriptor::parse(&x_addr, "local").unwrap();
    assert_eq!(owner.short_id, Some(key.short_id()));
    assert!(OwnerDescriptor::parse(&x_addr, "fuji").is_err());

    let c_addr = key.address_for(Endpoint::CChain, "local").unwrap();
    let evm_owner = OwnerDescriptor::parse(&c_addr, "local").unwrap();
    assert_eq!(evm_owner.evm, Some(key.evm_address()));
}

#[test]
fn qa_plan_send_and_receive_halves() {
    let facade = facade();
    let sender = LocalSecret::parse(EWOQ_HEX).unwrap();
    let receiver = LocalSecret::parse(OTHER_HEX).unwrap();
    let to = OwnerDescriptor::utxo(receiver.short_id());

    let send = facade
        .plan(&request(TransferMode::Send, Endpoint::PChain, Endpoint::XChain, Some(to)), &sender)
        .unwrap();
    assert_eq!(send.route.len(), 1);
    assert_eq!(send.value_after(0), 1_001_000_000);
    assert_eq!(send.required_balance(), 1_002_000_000);
    assert_eq!(send.owner, to);

    let receive = facade
        .plan(&request(TransferMode::Receive, Endpoint::PChain, Endpoint::XChain, None), &receiver)
        .unwrap();
    assert_eq!(receive.value_before(0), 1_001_000_000);
    assert_eq!(receive.owner.short_id, Some(receiver.short_id()));
}

#[test]
fn qa_receive_always_relays_p_to_p() {
    let facade = facade();
    let key = LocalSecret::parse(EWOQ_HEX).unwrap();

    let send = facade
        .resolve_route(TransferMode::Send, Endpoint::PChain, Endpoint::PChain, &key)
        .unwrap();
    assert!(send.is_direct());

    let receive = facade
        .resolve_route(TransferMode::Receive, Endpoint::PChain, Endpoint::PChain, &key)
        .unwrap();
    assert_eq!(receive.len(), 4);
}

#[test]
fn qa_plan_rejects_bad_owners() {
    let facade = facade();
    let sender = LocalSecret::parse(EWOQ_HEX).unwrap();
    let receiver = LocalSecret::parse(OTHER_HEX).unwrap();

    let missing = facade
        .plan(&request(TransferMode::Send, Endpoint::XChain, Endpoint::CChain, None), &sender)
        .unwrap_err();
    assert_eq!(missing.code(), "INVALID_REQUEST");

    let evm_to_atomic = facade
        .plan(
            &request(
                TransferMode::Send,
                Endpoint::XChain,
                Endpoint::CChain,
                Some(OwnerDescriptor::evm(receiver.evm_address())),
            ),
            &sender,
        )
        .unwrap_err();
    assert_eq!(evm_to_atomic.code(), "INVALID_REQUEST");

    let not_mine = facade
        .plan(
            &request(
                TransferMode::Receive,
                Endpoint::PChain,
                Endpoint::XChain,
                Some(OwnerDescriptor::utxo(sender.short_id())),
            ),
            &receiver,
        )
        .unwrap_err();
    assert_eq!(not_mine.code(), "INVALID_REQUEST");
}

#[test]
fn qa_amount_decimals_follow_route() {
    let facade = facade();
    let key = LocalSecret::parse(EWOQ_HEX).unwrap();

    let atomic = facade
        .resolve_route(TransferMode::Send, Endpoint::CChain, Endpoint::PChain, &key)
        .unwrap();
    let direct_evm = facade
        .resolve_route(TransferMode::Send, Endpoint::CChain, Endpoint::CChain, &key)
        .unwrap();
    assert_eq!(atomic.decimals(), 9);
    assert_eq!(direct_evm.decimals(), 18);

    let navax = parse_amount("2.5", atomic.decimals()).unwrap();
    let wei = parse_amount("2.5", direct_evm.decimals()).unwrap();
    assert_eq!(navax, 2_500_000_000);
    assert_eq!(wei, navax * 1_000_000_000);
    assert!(parse_amount("0.0000000001", atomic.decimals()).is_err());
    assert_eq!(format_amount(navax, 9, 2), "2.50");
}
