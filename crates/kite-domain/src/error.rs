//! Boundary error kinds surfaced at the CLI and HTTP layers.
//!
//! Engine crates keep their own local error enums; everything that crosses a
//! public surface is mapped into [`EngineError`] so the CLI can print a
//! stable kind string and the daemon can pick an HTTP status.

use crate::run::Stage;

/// The error vocabulary of the public surfaces.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineError {
    /// Strategy/config file failed to load or validate.
    ConfigInvalid { detail: String },
    /// S0 coverage below a configured minimum.
    DataQualityFail { detail: String },
    /// Fewer observations than an engine's minimum (e.g. Monte Carlo samples).
    InsufficientData { needed: usize, got: usize },
    /// Risk engine limit breached and the gate blocked.
    RiskLimitViolation { detail: String },
    /// Broker refused an order.
    BrokerRejected { detail: String },
    /// Broker unreachable after retries.
    BrokerUnavailable { detail: String },
    /// Target value floors to zero shares at the current price.
    OrderTooSmall { code: String, target_value: i64, price: i64 },
    /// A run with this id is already active.
    DuplicateRun { run_id: String },
    /// A stage hit a structural failure and the run aborted.
    StageFailed { stage: Stage, detail: String },
    /// An external call exceeded its deadline.
    Timeout { what: String },
    /// Cancellation was requested and honored.
    Canceled,
    /// Keyed read found nothing.
    NotFound { what: String },
    /// Caller-supplied input rejected before any work.
    InvalidInput { detail: String },
}

impl EngineError {
    /// Stable machine-readable kind, printed by the CLI and returned in the
    /// HTTP error envelope. Never change existing values.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::ConfigInvalid { .. } => "CONFIG_INVALID",
            EngineError::DataQualityFail { .. } => "DATA_QUALITY_FAIL",
            EngineError::InsufficientData { .. } => "INSUFFICIENT_DATA",
            EngineError::RiskLimitViolation { .. } => "RISK_LIMIT_VIOLATION",
            EngineError::BrokerRejected { .. } => "BROKER_REJECTED",
            EngineError::BrokerUnavailable { .. } => "BROKER_UNAVAILABLE",
            EngineError::OrderTooSmall { .. } => "ORDER_TOO_SMALL",
            EngineError::DuplicateRun { .. } => "DUPLICATE_RUN",
            EngineError::StageFailed { .. } => "STAGE_FAILED",
            EngineError::Timeout { .. } => "TIMEOUT",
            EngineError::Canceled => "CANCELED",
            EngineError::NotFound { .. } => "NOT_FOUND",
            EngineError::InvalidInput { .. } => "INVALID_INPUT",
        }
    }

    /// True when the failure came from the caller, not the engine
    /// (HTTP 4xx territory).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidInput { .. }
                | EngineError::NotFound { .. }
                | EngineError::ConfigInvalid { .. }
                | EngineError::DuplicateRun { .. }
        )
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::ConfigInvalid { detail } => write!(f, "config invalid: {detail}"),
            EngineError::DataQualityFail { detail } => write!(f, "data quality fail: {detail}"),
            EngineError::InsufficientData { needed, got } => {
                write!(f, "insufficient data: needed {needed}, got {got}")
            }
            EngineError::RiskLimitViolation { detail } => {
                write!(f, "risk limit violation: {detail}")
            }
            EngineError::BrokerRejected { detail } => write!(f, "broker rejected: {detail}"),
            EngineError::BrokerUnavailable { detail } => {
                write!(f, "broker unavailable: {detail}")
            }
            EngineError::OrderTooSmall {
                code,
                target_value,
                price,
            } => write!(
                f,
                "order too small: {code} target_value={target_value} price={price}"
            ),
            EngineError::DuplicateRun { run_id } => write!(f, "duplicate run: {run_id}"),
            EngineError::StageFailed { stage, detail } => {
                write!(f, "stage {} failed: {detail}", stage.as_str())
            }
            EngineError::Timeout { what } => write!(f, "timeout: {what}"),
            EngineError::Canceled => write!(f, "canceled"),
            EngineError::NotFound { what } => write!(f, "not found: {what}"),
            EngineError::InvalidInput { detail } => write!(f, "invalid input: {detail}"),
        }
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_stable() {
        let cases: Vec<(EngineError, &str)> = vec![
            (
                EngineError::ConfigInvalid {
                    detail: "x".into(),
                },
                "CONFIG_INVALID",
            ),
            (
                EngineError::InsufficientData { needed: 30, got: 7 },
                "INSUFFICIENT_DATA",
            ),
            (
                EngineError::StageFailed {
                    stage: Stage::S2Signals,
                    detail: "x".into(),
                },
                "STAGE_FAILED",
            ),
            (EngineError::Canceled, "CANCELED"),
        ];
        for (err, kind) in cases {
            assert_eq!(err.kind(), kind);
        }
    }

    #[test]
    fn client_error_split() {
        assert!(EngineError::InvalidInput {
            detail: "bad date".into()
        }
        .is_client_error());
        assert!(!EngineError::BrokerUnavailable {
            detail: "down".into()
        }
        .is_client_error());
    }

    #[test]
    fn display_is_non_empty() {
        let err = EngineError::OrderTooSmall {
            code: "005930".into(),
            target_value: 30_000,
            price: 71_000,
        };
        assert!(err.to_string().contains("005930"));
    }
}
