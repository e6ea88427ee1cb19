//! Order status classification and retrieval eligibility.
//!
//! The storefront exposes a long tail of payment-provider statuses;
//! the sync engine collapses them into classes that drive stock
//! effects and action preconditions. The sets are fixed: an unknown
//! status classifies as [`StatusClass::Other`] and triggers nothing.

use chrono::{DateTime, Utc};

use crate::context::OrderIdBands;
use crate::window::RetrievalWindow;

pub const STATUS_ON_HOLD: &str = "holded";
pub const STATUS_CANCELED: &str = "canceled";
pub const STATUS_COMPLETE: &str = "complete";
pub const STATUS_CLOSED: &str = "closed";

const PENDING_STATUSES: [&str; 10] = [
    "pending",
    "pending_alipay",
    "new",
    "pending_dps",
    "pending_ogone",
    "pending_payment",
    "pending_paypal",
    "payment_review",
    "fraud",
    "fraud_dps",
];

const PROCESSING_STATUSES: [&str; 5] = [
    "processing",
    "processing_dps_paid",
    "processed_ogone",
    "processing_dps_auth",
    "paypal_canceled_reversal",
];

const FINAL_STATUSES: [&str; 3] = [STATUS_COMPLETE, STATUS_CLOSED, STATUS_CANCELED];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Pending,
    Processing,
    OnHold,
    Cancelled,
    Final,
    Other,
}

pub fn is_pending(status: &str) -> bool {
    PENDING_STATUSES.contains(&status)
}

pub fn is_processing(status: &str) -> bool {
    PROCESSING_STATUSES.contains(&status)
}

pub fn is_on_hold(status: &str) -> bool {
    status == STATUS_ON_HOLD
}

pub fn is_cancelled(status: &str) -> bool {
    status == STATUS_CANCELED
}

/// Complete, closed, or canceled; no further remote changes expected.
pub fn is_final(status: &str) -> bool {
    FINAL_STATUSES.contains(&status)
}

#[must_use]
pub fn classify(status: &str) -> StatusClass {
    if is_pending(status) {
        StatusClass::Pending
    } else if is_processing(status) {
        StatusClass::Processing
    } else if is_on_hold(status) {
        StatusClass::OnHold
    } else if is_cancelled(status) {
        StatusClass::Cancelled
    } else if is_final(status) {
        StatusClass::Final
    } else {
        StatusClass::Other
    }
}

/// Numeric order id from an increment id, reading leading digits only.
pub fn parse_order_id(increment_id: &str) -> Option<i64> {
    let digits: String = increment_id
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Whether a listed order belongs to this channel right now.
///
/// Fresh records (updated at or after the window end) are deferred;
/// the trailing cursor re-matches them next pass. Band boundaries are
/// exclusive on every edge.
pub fn is_order_retrievable(
    bands: &OrderIdBands,
    window: &RetrievalWindow,
    increment_id: &str,
    status: &str,
    updated_at: Option<DateTime<Utc>>,
) -> bool {
    if updated_at.is_some_and(|at| window.is_fresh(at)) {
        return false;
    }
    let Some(order_id) = parse_order_id(increment_id) else {
        return false;
    };
    if order_id > bands.new_min && order_id < bands.new_max {
        true
    } else if order_id > bands.legacy_floor {
        true
    } else {
        order_id > bands.new_max && (is_pending(status) || is_processing(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn every_status_set_member_classifies() {
        for status in PENDING_STATUSES {
            assert_eq!(classify(status), StatusClass::Pending, "{status}");
        }
        for status in PROCESSING_STATUSES {
            assert_eq!(classify(status), StatusClass::Processing, "{status}");
        }
        assert_eq!(classify("holded"), StatusClass::OnHold);
        assert_eq!(classify("canceled"), StatusClass::Cancelled);
        assert_eq!(classify("complete"), StatusClass::Final);
        assert_eq!(classify("closed"), StatusClass::Final);
        assert_eq!(classify("paypal_reversed"), StatusClass::Other);
        assert_eq!(classify("cancelled"), StatusClass::Other);
    }

    #[test]
    fn canceled_is_both_cancelled_and_final() {
        assert!(is_cancelled("canceled"));
        assert!(is_final("canceled"));
        assert_eq!(classify("canceled"), StatusClass::Cancelled);
    }

    #[test]
    fn order_ids_read_leading_digits() {
        assert_eq!(parse_order_id("100000123"), Some(100_000_123));
        assert_eq!(parse_order_id("200048294suffix"), Some(200_048_294));
        assert_eq!(parse_order_id("ORD-1"), None);
        assert_eq!(parse_order_id(""), None);
    }

    fn window() -> RetrievalWindow {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        RetrievalWindow::compute(Some(now - chrono::Duration::hours(1)), now, 90, 0)
    }

    #[test]
    fn band_boundaries_are_exclusive() {
        let bands = OrderIdBands::default();
        let w = window();
        assert!(!is_order_retrievable(&bands, &w, "100000000", "complete", None));
        assert!(is_order_retrievable(&bands, &w, "100000001", "complete", None));
        assert!(is_order_retrievable(&bands, &w, "199999999", "complete", None));
        assert!(!is_order_retrievable(&bands, &w, "200000000", "complete", None));
        assert!(!is_order_retrievable(&bands, &w, "200048293", "complete", None));
        assert!(is_order_retrievable(&bands, &w, "200048294", "complete", None));
    }

    #[test]
    fn foreign_open_orders_are_picked_up() {
        let bands = OrderIdBands::default();
        let w = window();
        // Above new_max, below the legacy floor: only while still open.
        assert!(is_order_retrievable(&bands, &w, "200000001", "pending", None));
        assert!(is_order_retrievable(&bands, &w, "200000001", "processing", None));
        assert!(!is_order_retrievable(&bands, &w, "200000001", "complete", None));
        assert!(!is_order_retrievable(&bands, &w, "200000001", "holded", None));
    }

    #[test]
    fn fresh_records_are_deferred() {
        let bands = OrderIdBands::default();
        let w = window();
        assert!(!is_order_retrievable(
            &bands,
            &w,
            "100000123",
            "pending",
            Some(w.until),
        ));
        assert!(is_order_retrievable(
            &bands,
            &w,
            "100000123",
            "pending",
            Some(w.until - chrono::Duration::seconds(1)),
        ));
    }
}
