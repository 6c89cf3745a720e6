//! Usage billing arithmetic.
//!
//! All money is handled as integer micro-dollars so that the round-up to
//! whole credits is exact. Floating point only appears at the edges: the
//! cost artifact and the configured rates are decimal USD.

use std::path::Path;

use serde::Serialize;

use crate::artifacts::USAGE_COST_FILE;
use crate::error::CoreError;

/// Ledger `source` value for usage charges. Together with `external_id =
/// task id` it identifies the single charge a task may ever receive.
pub const USAGE_BILLING_SOURCE: &str = "usage_billing";

/// Task parameter key that opts a task out of usage billing when `false`.
pub const USAGE_BILLING_PARAM: &str = "usage_billing";

const MICROS_PER_USD: f64 = 1_000_000.0;

/// Largest usage cost, in USD, accepted from the cost artifact. Anything
/// above is treated as a corrupt artifact.
pub const MAX_USAGE_COST_USD: f64 = 1_000_000.0;

/// Convert decimal USD to micro-dollars. Negative or non-finite input is 0;
/// amounts beyond `i64` saturate.
pub fn usd_to_micros(usd: f64) -> i64 {
    if !usd.is_finite() || usd <= 0.0 {
        return 0;
    }
    (usd * MICROS_PER_USD).round() as i64
}

/// Configured prices, in micro-dollars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingRates {
    pub credit_price_micros: i64,
    pub success_fee_micros: i64,
}

impl BillingRates {
    /// Build rates from decimal USD values.
    pub fn from_usd(credit_price_usd: f64, success_fee_usd: f64) -> Result<Self, CoreError> {
        if !credit_price_usd.is_finite() || credit_price_usd <= 0.0 {
            return Err(CoreError::Validation(format!(
                "credit price must be a positive amount, got {credit_price_usd}"
            )));
        }
        if !success_fee_usd.is_finite() || success_fee_usd < 0.0 {
            return Err(CoreError::Validation(format!(
                "success fee must not be negative, got {success_fee_usd}"
            )));
        }
        let credit_price_micros = usd_to_micros(credit_price_usd);
        if credit_price_micros == 0 {
            return Err(CoreError::Validation(
                "credit price is below one micro-dollar".to_string(),
            ));
        }
        Ok(Self {
            credit_price_micros,
            success_fee_micros: usd_to_micros(success_fee_usd),
        })
    }
}

/// Amount owed for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Charge {
    pub usd_micros: i64,
    pub credits: i64,
}

/// Compute the charge for a run: usage plus the success fee when the run
/// produced a report, rounded up to whole credits.
pub fn compute_charge(usage_usd: f64, success: bool, rates: BillingRates) -> Charge {
    let mut usd_micros = usd_to_micros(usage_usd);
    if success {
        usd_micros = usd_micros.saturating_add(rates.success_fee_micros.max(0));
    }
    let price = rates.credit_price_micros.max(1);
    let credits = usd_micros / price + i64::from(usd_micros % price != 0);
    Charge {
        usd_micros,
        credits,
    }
}

/// Read `total_cost` (USD) from the usage cost artifact in `work_dir`.
///
/// The artifact is optional. A missing file, invalid JSON, or a missing or
/// non-numeric field all mean zero usage, as does a value above
/// [`MAX_USAGE_COST_USD`].
pub fn read_usage_cost(work_dir: &Path) -> f64 {
    let path = work_dir.join(USAGE_COST_FILE);
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(_) => return 0.0,
    };
    let cost = serde_json::from_str::<serde_json::Value>(&raw)
        .ok()
        .and_then(|v| v.get("total_cost").and_then(serde_json::Value::as_f64));
    match cost {
        Some(cost) if cost.is_finite() && (0.0..=MAX_USAGE_COST_USD).contains(&cost) => cost,
        _ => {
            tracing::warn!(path = %path.display(), "Unreadable usage cost artifact, billing zero usage");
            0.0
        }
    }
}

/// Whether usage billing applies to a task with these parameters.
pub fn usage_billing_enabled(parameters: &serde_json::Value) -> bool {
    parameters
        .get(USAGE_BILLING_PARAM)
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(true)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn rates() -> BillingRates {
        BillingRates::from_usd(0.10, 1.00).unwrap()
    }

    #[test]
    fn usd_to_micros_rejects_garbage() {
        assert_eq!(usd_to_micros(f64::NAN), 0);
        assert_eq!(usd_to_micros(f64::INFINITY), 0);
        assert_eq!(usd_to_micros(-3.0), 0);
        assert_eq!(usd_to_micros(0.25), 250_000);
    }

    #[test]
    fn rates_validation() {
        assert_matches!(BillingRates::from_usd(0.0, 1.0), Err(CoreError::Validation(_)));
        assert_matches!(BillingRates::from_usd(0.1, -1.0), Err(CoreError::Validation(_)));
        assert_matches!(
            BillingRates::from_usd(0.000_000_1, 1.0),
            Err(CoreError::Validation(_))
        );
        assert_eq!(
            BillingRates::from_usd(0.10, 0.0).unwrap(),
            BillingRates {
                credit_price_micros: 100_000,
                success_fee_micros: 0,
            }
        );
    }

    #[test]
    fn success_adds_fee() {
        let charge = compute_charge(0.35, true, rates());
        assert_eq!(charge.usd_micros, 1_350_000);
        assert_eq!(charge.credits, 14);
    }

    #[test]
    fn failure_charges_usage_only() {
        let charge = compute_charge(0.35, false, rates());
        assert_eq!(charge.usd_micros, 350_000);
        assert_eq!(charge.credits, 4);
    }

    #[test]
    fn exact_multiple_is_not_rounded_up() {
        let charge = compute_charge(0.30, false, rates());
        assert_eq!(charge.credits, 3);
    }

    #[test]
    fn tiny_usage_rounds_up_to_one_credit() {
        let charge = compute_charge(0.000_001, false, rates());
        assert_eq!(charge.credits, 1);
    }

    #[test]
    fn zero_usage_without_success_is_free() {
        let charge = compute_charge(0.0, false, rates());
        assert_eq!(charge, Charge { usd_micros: 0, credits: 0 });
    }

    #[test]
    fn read_usage_cost_variants() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_usage_cost(dir.path()), 0.0);

        let path = dir.path().join(USAGE_COST_FILE);
        std::fs::write(&path, r#"{"total_cost": 0.42, "calls": 7}"#).unwrap();
        assert_eq!(read_usage_cost(dir.path()), 0.42);

        std::fs::write(&path, "not json").unwrap();
        assert_eq!(read_usage_cost(dir.path()), 0.0);

        std::fs::write(&path, r#"{"total_cost": "lots"}"#).unwrap();
        assert_eq!(read_usage_cost(dir.path()), 0.0);

        std::fs::write(&path, r#"{"total_cost": -5}"#).unwrap();
        assert_eq!(read_usage_cost(dir.path()), 0.0);
    }

    #[test]
    fn oversized_usage_cost_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(USAGE_COST_FILE);

        std::fs::write(&path, r#"{"total_cost": 1e13}"#).unwrap();
        assert_eq!(read_usage_cost(dir.path()), 0.0);

        std::fs::write(&path, format!(r#"{{"total_cost": {:e}}}"#, f64::MAX)).unwrap();
        assert_eq!(read_usage_cost(dir.path()), 0.0);

        std::fs::write(&path, r#"{"total_cost": 1000000}"#).unwrap();
        assert_eq!(read_usage_cost(dir.path()), MAX_USAGE_COST_USD);
    }

    #[test]
    fn huge_amounts_saturate_instead_of_wrapping() {
        for usd in [1e13, f64::MAX] {
            for success in [false, true] {
                let charge = compute_charge(usd, success, rates());
                assert_eq!(charge.usd_micros, i64::MAX);
                assert_eq!(charge.credits, i64::MAX / 100_000 + 1);
            }
        }
    }

    #[test]
    fn usage_billing_opt_out() {
        assert!(usage_billing_enabled(&serde_json::json!({})));
        assert!(usage_billing_enabled(&serde_json::json!({"usage_billing": true})));
        assert!(!usage_billing_enabled(&serde_json::json!({"usage_billing": false})));
        assert!(usage_billing_enabled(&serde_json::json!({"usage_billing": "no"})));
        assert!(usage_billing_enabled(&serde_json::Value::Null));
    }
}
