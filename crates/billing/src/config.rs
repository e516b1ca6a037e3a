//! Ledger configuration
//!
//! Read from the environment at startup:
//!
//! - `LEDGER_OVERDRAFT_LIMIT`: how far below zero a deduction may take a
//!   balance. Unset or `0` disables overdraft.
//! - `FEATURE_COST_<FEATURE>`: overrides (or adds) the system default cost of
//!   a feature, e.g. `FEATURE_COST_WHATSAPP_NOTIFICATION=0.25`.

use std::str::FromStr;

use rust_decimal::Decimal;

use crate::accounting::{validate_cost, validate_non_negative, OverdraftPolicy};
use crate::costs::DefaultCosts;
use crate::error::{LedgerError, LedgerResult};

const OVERDRAFT_VAR: &str = "LEDGER_OVERDRAFT_LIMIT";
const FEATURE_COST_PREFIX: &str = "FEATURE_COST_";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerConfig {
    pub overdraft: OverdraftPolicy,
    pub default_costs: DefaultCosts,
}

impl LedgerConfig {
    pub fn from_env() -> LedgerResult<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Build from an explicit set of variables. Malformed values are an
    /// error rather than silently falling back to defaults.
    pub fn from_vars<I, K, V>(vars: I) -> LedgerResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();

        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref().trim());

            if key == OVERDRAFT_VAR {
                config.overdraft = parse_overdraft(value)?;
            } else if let Some(feature) = key.strip_prefix(FEATURE_COST_PREFIX) {
                let cost = parse_decimal(key, value)?;
                let cost = validate_cost(cost)
                    .map_err(|e| LedgerError::Config(format!("{}: {}", key, e)))?;
                config.default_costs = config
                    .default_costs
                    .with_cost(feature, cost)
                    .map_err(|e| LedgerError::Config(format!("{}: {}", key, e)))?;
            }
        }

        Ok(config)
    }
}

fn parse_decimal(key: &str, value: &str) -> LedgerResult<Decimal> {
    Decimal::from_str(value)
        .map_err(|e| LedgerError::Config(format!("{} must be a decimal, got '{}': {}", key, value, e)))
}

fn parse_overdraft(value: &str) -> LedgerResult<OverdraftPolicy> {
    if value.is_empty() {
        return Ok(OverdraftPolicy::Disallow);
    }
    let limit = parse_decimal(OVERDRAFT_VAR, value)?;
    let limit = validate_non_negative(limit, OVERDRAFT_VAR)
        .map_err(|e| LedgerError::Config(e.to_string()))?;

    if limit.is_zero() {
        Ok(OverdraftPolicy::Disallow)
    } else {
        Ok(OverdraftPolicy::Limit(limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_without_variables() {
        let config = LedgerConfig::from_vars(vars(&[("PATH", "/usr/bin")])).unwrap();
        assert_eq!(config.overdraft, OverdraftPolicy::Disallow);
        assert_eq!(config.default_costs, DefaultCosts::standard());
    }

    #[test]
    fn test_overdraft_limit() {
        let config = LedgerConfig::from_vars(vars(&[(OVERDRAFT_VAR, "25.5")])).unwrap();
        assert_eq!(
            config.overdraft,
            OverdraftPolicy::Limit(Decimal::new(255, 1))
        );

        let config = LedgerConfig::from_vars(vars(&[(OVERDRAFT_VAR, "0")])).unwrap();
        assert_eq!(config.overdraft, OverdraftPolicy::Disallow);
    }

    #[test]
    fn test_malformed_overdraft_is_config_error() {
        for value in ["lots", "-5"] {
            let err = LedgerConfig::from_vars(vars(&[(OVERDRAFT_VAR, value)])).unwrap_err();
            assert!(matches!(err, LedgerError::Config(_)), "{}", value);
        }
    }

    #[test]
    fn test_feature_cost_overrides() {
        let config = LedgerConfig::from_vars(vars(&[
            ("FEATURE_COST_WHATSAPP_NOTIFICATION", "0.25"),
            ("FEATURE_COST_label_printing", "3"),
        ]))
        .unwrap();

        let costs = &config.default_costs;
        assert_eq!(
            costs.get("WHATSAPP_NOTIFICATION"),
            Some(Decimal::new(25, 2))
        );
        assert_eq!(costs.get("LABEL_PRINTING"), Some(Decimal::from(3)));
        assert_eq!(costs.get("ORDER"), Some(Decimal::ONE));
    }

    #[test]
    fn test_negative_feature_cost_rejected() {
        let err =
            LedgerConfig::from_vars(vars(&[("FEATURE_COST_ORDER", "-1")])).unwrap_err();
        assert!(matches!(err, LedgerError::Config(_)));
    }

    #[test]
    fn test_feature_cost_without_feature_name_rejected() {
        for key in ["FEATURE_COST_", "FEATURE_COST_   "] {
            let err = LedgerConfig::from_vars(vars(&[(key, "1")])).unwrap_err();
            assert!(matches!(err, LedgerError::Config(_)), "{}", key);
        }
    }
}
