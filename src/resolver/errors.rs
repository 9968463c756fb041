//! Binding error types and diagnostics.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::bridge::BridgeError;
use crate::util::diagnostic::{suggestions, BindDiagnostic};

/// Why a service could not be found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFound {
    /// No manifest entry serves the name.
    NotDeclared,
    /// None of the candidate libraries exist or open.
    LibraryMissing { candidates: Vec<PathBuf> },
    /// The library opened but does not export the factory.
    SymbolMissing { library: PathBuf, symbol: String },
    /// The service manager has no such service.
    NotRegistered,
    /// The service did not appear in time.
    TimedOut(Duration),
}

/// Error while binding to a HAL.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("service not found: `{name}`")]
    ServiceNotFound { name: String, reason: NotFound },

    #[error("service `{name}` is dead")]
    DeadObject { name: String },

    #[error("`{name}` is only available for another ABI and no native bridge is initialized")]
    NoBridge { name: String },

    #[error("native bridge failed while binding `{name}`")]
    Bridge {
        name: String,
        #[source]
        source: BridgeError,
    },
}

impl BindError {
    pub(crate) fn not_found(name: impl Into<String>, reason: NotFound) -> Self {
        BindError::ServiceNotFound {
            name: name.into(),
            reason,
        }
    }

    /// Convert to a user-friendly diagnostic.
    pub fn to_diagnostic(&self) -> BindDiagnostic {
        match self {
            BindError::ServiceNotFound { name, reason } => {
                let message = format!("service `{}` not found", name);
                match reason {
                    NotFound::NotDeclared => BindDiagnostic::new("halbind::bind::not_declared", message)
                        .fact("no manifest entry serves this name at a compatible version")
                        .suggest(suggestions::NOT_DECLARED)
                        .suggest(suggestions::LIST_INSTANCES),
                    NotFound::LibraryMissing { candidates } => {
                        let mut diag = BindDiagnostic::new("halbind::bind::library_missing", message)
                            .fact("no passthrough implementation could be loaded");
                        for candidate in candidates {
                            diag = diag.fact(format!("tried {}", candidate.display()));
                        }
                        diag.suggest(suggestions::CHECK_ROOT)
                    }
                    NotFound::SymbolMissing { library, symbol } => {
                        BindDiagnostic::new("halbind::bind::symbol_missing", message)
                            .fact(format!("{} does not export `{}`", library.display(), symbol))
                            .suggest("rebuild the implementation library with its generated passthrough entry point")
                    }
                    NotFound::NotRegistered => BindDiagnostic::new("halbind::bind::not_registered", message)
                        .fact("the service manager has no service by this name")
                        .suggest(suggestions::START_SERVICE),
                    NotFound::TimedOut(timeout) => BindDiagnostic::new("halbind::bind::timed_out", message)
                        .fact(format!("waited {:?} for the service to register", timeout))
                        .suggest(suggestions::START_SERVICE),
                }
            }

            BindError::DeadObject { name } => BindDiagnostic::new(
                "halbind::bind::dead_object",
                format!("service `{}` is dead", name),
            )
            .fact("the hosting process died after registering")
            .suggest(suggestions::START_SERVICE),

            BindError::NoBridge { name } => BindDiagnostic::new(
                "halbind::bind::no_bridge",
                format!("`{}` is only built for another ABI", name),
            )
            .fact("binding across ABIs needs an initialized native bridge")
            .suggest(suggestions::LOAD_BRIDGE),

            BindError::Bridge { name, source } => {
                let diag = BindDiagnostic::new(
                    "halbind::bind::bridge",
                    format!("native bridge failed while binding `{}`", name),
                )
                .fact(source.to_string());
                if matches!(source, BridgeError::Incompatible { .. }) {
                    diag.suggest(suggestions::UPGRADE_BRIDGE)
                } else {
                    diag
                }
            }
        }
    }
}

/// Transaction failures. Surfaced immediately; nothing is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BinderError {
    #[error("dead object")]
    DeadObject,

    #[error("failed transaction")]
    FailedTransaction,

    #[error("unknown transaction code {0}")]
    UnknownTransaction(u32),

    #[error("bad parcel")]
    BadParcel,

    #[error("handle is not a remote binder")]
    NotRemote,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_declared_diagnostic() {
        let err = BindError::not_found("a.b@1.0::IFoo/default", NotFound::NotDeclared);
        let diag = err.to_diagnostic();
        assert_eq!(diag.code, "halbind::bind::not_declared");
        assert!(diag.message.contains("a.b@1.0::IFoo/default"));
        assert_eq!(diag.suggestions.len(), 2);
    }

    #[test]
    fn test_library_missing_lists_candidates() {
        let err = BindError::not_found(
            "a.b@1.0::IFoo/default",
            NotFound::LibraryMissing {
                candidates: vec![
                    PathBuf::from("/vendor/lib64/hw/a.b@1.0-impl.so"),
                    PathBuf::from("/system/lib64/hw/a.b@1.0-impl.so"),
                ],
            },
        );
        let diag = err.to_diagnostic();
        assert_eq!(diag.facts.len(), 3);
        assert!(diag.facts[1].contains("/vendor/lib64/hw"));
    }

    #[test]
    fn test_incompatible_bridge_suggests_upgrade() {
        let err = BindError::Bridge {
            name: "a.b@1.0::IFoo/default".into(),
            source: BridgeError::Incompatible {
                version: crate::bridge::BridgeVersion(2),
                required: crate::bridge::BridgeVersion(3),
            },
        };
        let diag = err.to_diagnostic();
        assert_eq!(diag.suggestions, vec![suggestions::UPGRADE_BRIDGE.to_string()]);
    }
}
