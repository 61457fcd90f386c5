//! Loads and validates a dispatch configuration document without connecting
//! to a chain source, then prints the resolved `(address, selector/topic0)`
//! table — the same routing key space `DispatchTable::build` constructs at
//! process startup, surfaced here for operators to sanity-check a config
//! before pointing it at a live chain.

use pdp_indexer::config::IndexerConfig;
use pdp_indexer::handlers::registry::is_known_handler;
use pdp_indexer::signatures::SignatureRegistry;

fn main() {
    let path = match std::env::args().nth(1) {
        Some(path) => path,
        None => {
            eprintln!("usage: validate-config <config.toml>");
            std::process::exit(2);
        }
    };

    let config = match IndexerConfig::load(&path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("config invalid: {err}");
            std::process::exit(1);
        }
    };

    let registry = SignatureRegistry::new();

    println!("=== RESOLVED TRIGGER TABLE ===");
    let mut unknown_handlers = 0;
    for resource in &config.resources {
        let address = resource.address.to_lowercase();
        println!("{} ({address})", resource.name);
        for trigger in &resource.triggers {
            let known = is_known_handler(&trigger.handler);
            if !known {
                unknown_handlers += 1;
            }
            let key = match trigger.trigger_type {
                pdp_indexer::config::TriggerType::Event => {
                    format!("topic0={}", registry.topic0(&trigger.definition).to_hex())
                }
                pdp_indexer::config::TriggerType::Function => {
                    format!("selector=0x{}", hex::encode(registry.selector(&trigger.definition)))
                }
            };
            let marker = if known { " " } else { " ! " };
            println!("  {marker}{:<60} {key:<68} -> {}", trigger.definition, trigger.handler);
        }
    }

    println!();
    println!(
        "resources={} reorg_window={} pending_tx_max_attempts={} pending_tx_min_retry_delay_secs={}",
        config.resources.len(),
        config.reorg_window,
        config.pending_tx.max_attempts,
        config.pending_tx.min_retry_delay_secs
    );

    if unknown_handlers > 0 {
        eprintln!(
            "\n{unknown_handlers} trigger(s) name a handler with no registered factory; they are omitted from dispatch at startup (see lines marked '!' above)"
        );
        std::process::exit(1);
    }
}
