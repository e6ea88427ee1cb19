//! RPC fault taxonomy and the free-text fault translation table.
//!
//! The storefront reports application faults as free-text messages. All
//! substring matching against those messages happens here, at the adapter
//! boundary; the reconciliation core only ever sees a [`FaultKind`].

use std::time::Duration;

/// Canonical classification of a storefront RPC fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Connection, protocol, or server failure.
    Transport,
    /// The call exceeded its configured deadline locally.
    Timeout,
    /// Credit-memo creation exceeded the remaining refundable amount.
    RefundCeiling,
    /// Product creation hit the unique-SKU constraint.
    DuplicateSku,
    /// A storefront fault that matched no known pattern.
    Other,
}

impl FaultKind {
    /// Stable code for logs.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::RefundCeiling => "refund_ceiling",
            Self::DuplicateSku => "duplicate_sku",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// A classified fault from a storefront RPC call.
#[derive(Debug, Clone, thiserror::Error)]
#[error("rpc fault in {call} ({kind}): {message}")]
pub struct RpcFault {
    pub kind: FaultKind,
    /// The RPC method that faulted.
    pub call: String,
    pub message: String,
}

impl RpcFault {
    /// A transport-level failure (no usable response).
    pub fn transport(call: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Transport,
            call: call.into(),
            message: message.into(),
        }
    }

    /// A locally enforced deadline expiry.
    pub fn timeout(call: impl Into<String>, after: Duration) -> Self {
        Self {
            kind: FaultKind::Timeout,
            call: call.into(),
            message: format!("no response within {}s", after.as_secs()),
        }
    }

    /// Whether retrying later could plausibly succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, FaultKind::Transport | FaultKind::Timeout)
    }
}

/// Substring pattern → fault kind translation table.
///
/// First matching pattern wins; unmatched application faults classify as
/// [`FaultKind::Other`].
#[derive(Debug, Clone)]
pub struct FaultTranslator {
    patterns: Vec<(String, FaultKind)>,
}

impl FaultTranslator {
    /// The storefront's known fault strings.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            patterns: vec![
                (
                    "Maximum amount available to refund is".to_string(),
                    FaultKind::RefundCeiling,
                ),
                (
                    "The value of attribute \"SKU\" must be unique".to_string(),
                    FaultKind::DuplicateSku,
                ),
            ],
        }
    }

    /// Add a pattern (checked after the builtin ones).
    #[must_use]
    pub fn with_pattern(mut self, pattern: impl Into<String>, kind: FaultKind) -> Self {
        self.patterns.push((pattern.into(), kind));
        self
    }

    /// Classify a raw fault message.
    #[must_use]
    pub fn classify(&self, message: &str) -> FaultKind {
        self.patterns
            .iter()
            .find(|(pattern, _)| message.contains(pattern.as_str()))
            .map_or(FaultKind::Other, |(_, kind)| *kind)
    }
}

impl Default for FaultTranslator {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_patterns() {
        let translator = FaultTranslator::builtin();
        assert_eq!(
            translator.classify("SOAP Fault: Maximum amount available to refund is 14.50"),
            FaultKind::RefundCeiling
        );
        assert_eq!(
            translator.classify("The value of attribute \"SKU\" must be unique"),
            FaultKind::DuplicateSku
        );
        assert_eq!(translator.classify("Access denied"), FaultKind::Other);
    }

    #[test]
    fn test_custom_pattern() {
        let translator =
            FaultTranslator::builtin().with_pattern("Requested order not exists", FaultKind::Other);
        assert_eq!(
            translator.classify("Requested order not exists."),
            FaultKind::Other
        );
    }

    #[test]
    fn test_fault_transience() {
        assert!(RpcFault::transport("salesOrderList", "connection reset").is_transient());
        assert!(RpcFault::timeout("salesOrderInfo", Duration::from_secs(30)).is_transient());
        let fault = RpcFault {
            kind: FaultKind::RefundCeiling,
            call: "salesOrderCreditmemoCreate".to_string(),
            message: "Maximum amount available to refund is 5.00".to_string(),
        };
        assert!(!fault.is_transient());
    }
}
