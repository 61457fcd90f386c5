//! Dispatch Table (C3).
//!
//! Built once at startup from the configuration document: for every
//! `(contract_address, selector|topic0)` pair we need O(1) lookup to the
//! `Trigger` that should fire. Address and signature lookups are
//! case-normalized before insertion and before matching (spec §4.3).

use crate::config::{IndexerConfig, TriggerType};
use crate::handlers::registry::is_known_handler;
use crate::signatures::SignatureRegistry;
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    Event,
    Function,
}

impl From<TriggerType> for TriggerKind {
    fn from(t: TriggerType) -> Self {
        match t {
            TriggerType::Event => TriggerKind::Event,
            TriggerType::Function => TriggerKind::Function,
        }
    }
}

/// A single resolved routing entry: a config trigger plus the canonical
/// signature it was derived from.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub kind: TriggerKind,
    pub definition: String,
    pub handler: String,
    pub method_name: Option<String>,
    pub resource_name: String,
}

/// O(1) lookup from `(contract_address, selector|topic0)` to the matching
/// `Trigger`, built once and read-only thereafter (spec §5).
#[derive(Debug, Default)]
pub struct DispatchTable {
    by_event_topic: HashMap<String, HashMap<String, Trigger>>,
    by_func_selector: HashMap<String, HashMap<String, Trigger>>,
}

impl DispatchTable {
    /// Builds the table from a validated config document. Triggers naming an
    /// unknown handler are omitted with a startup warning, not an error
    /// (spec §4.3) — config validation already guarantees Definition/Handler
    /// are non-empty.
    pub fn build(config: &IndexerConfig, registry: &SignatureRegistry) -> Self {
        let mut table = DispatchTable::default();
        for resource in &config.resources {
            let address = resource.address.to_lowercase();
            for trigger_cfg in &resource.triggers {
                if !is_known_handler(&trigger_cfg.handler) {
                    warn!(
                        resource = %resource.name,
                        handler = %trigger_cfg.handler,
                        "no handler factory registered for this name; trigger omitted"
                    );
                    continue;
                }
                let trigger = Trigger {
                    kind: trigger_cfg.trigger_type.into(),
                    definition: trigger_cfg.definition.clone(),
                    handler: trigger_cfg.handler.clone(),
                    method_name: trigger_cfg.method_name.clone(),
                    resource_name: resource.name.clone(),
                };
                match trigger.kind {
                    TriggerKind::Event => {
                        let topic0 = registry.topic0(&trigger_cfg.definition).to_hex();
                        table
                            .by_event_topic
                            .entry(address.clone())
                            .or_default()
                            .insert(topic0, trigger);
                    }
                    TriggerKind::Function => {
                        let selector = hex::encode(registry.selector(&trigger_cfg.definition));
                        table
                            .by_func_selector
                            .entry(address.clone())
                            .or_default()
                            .insert(selector, trigger);
                    }
                }
            }
        }
        table
    }

    /// Looks up the trigger for a log's `(address, topic0)`. Both are
    /// case-normalized before matching; the topic is the 0x-prefixed or
    /// bare hex string as decoded from the log.
    pub fn find_event(&self, address: &str, topic0: &str) -> Option<&Trigger> {
        let address = address.to_lowercase();
        let topic0 = normalize_hex(topic0);
        self.by_event_topic.get(&address)?.get(&topic0)
    }

    /// Looks up the trigger for a tx's `(to_address, selector)`.
    pub fn find_function(&self, address: &str, selector: &str) -> Option<&Trigger> {
        let address = address.to_lowercase();
        let selector = normalize_hex(selector);
        self.by_func_selector.get(&address)?.get(&selector)
    }
}

fn normalize_hex(s: &str) -> String {
    s.trim_start_matches("0x").to_lowercase()
}
