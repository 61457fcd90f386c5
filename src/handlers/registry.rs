//! Static handler-factory table (spec §9: "handler registry via factory
//! closures becomes a static, compile-time table ... keyed by string
//! name. No dynamic reflection is needed.").

use super::fault::FaultRecordHandler;
use super::fees::ProofFeePaidHandler;
use super::proof_set::{
    ProofSetCreatedHandler, ProofSetDeletedHandler, ProofSetEmptyHandler,
    ProofSetOwnerChangedHandler,
};
use super::proving::{NextProvingPeriodHandler, PossessionProvenHandler};
use super::roots::{RootsAddedHandler, RootsRemovedHandler};
use super::Handler;

type Factory = fn() -> Box<dyn Handler>;

const FACTORIES: &[(&str, Factory)] = &[
    ("ProofSetCreated", || Box::new(ProofSetCreatedHandler)),
    ("ProofSetOwnerChanged", || Box::new(ProofSetOwnerChangedHandler)),
    ("ProofSetDeleted", || Box::new(ProofSetDeletedHandler)),
    ("ProofSetEmpty", || Box::new(ProofSetEmptyHandler)),
    ("ProofFeePaid", || Box::new(ProofFeePaidHandler)),
    ("RootsAdded", || Box::new(RootsAddedHandler)),
    ("RootsRemoved", || Box::new(RootsRemovedHandler)),
    ("NextProvingPeriod", || Box::new(NextProvingPeriodHandler)),
    ("PossessionProven", || Box::new(PossessionProvenHandler)),
    ("FaultRecord", || Box::new(FaultRecordHandler)),
];

/// Whether a name in the configuration's `Handler` field resolves to a
/// known factory (spec §4.3: unknown handlers are omitted with a startup
/// warning, not a fatal error).
pub fn is_known_handler(name: &str) -> bool {
    FACTORIES.iter().any(|(n, _)| *n == name)
}

/// Builds the handler instance for `name`, or `None` if unknown.
pub fn build(name: &str) -> Option<Box<dyn Handler>> {
    FACTORIES.iter().find(|(n, _)| *n == name).map(|(_, f)| f())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_catalog_handler_is_known() {
        for name in [
            "ProofSetCreated",
            "ProofSetOwnerChanged",
            "ProofSetDeleted",
            "ProofSetEmpty",
            "ProofFeePaid",
            "RootsAdded",
            "RootsRemoved",
            "NextProvingPeriod",
            "PossessionProven",
            "FaultRecord",
        ] {
            assert!(is_known_handler(name), "{name} should be known");
            assert!(build(name).is_some());
        }
    }

    #[test]
    fn unknown_handler_name_is_not_known() {
        assert!(!is_known_handler("SomethingElse"));
        assert!(build("SomethingElse").is_none());
    }
}
