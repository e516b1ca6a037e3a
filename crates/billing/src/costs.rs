//! Feature credit costs
//!
//! Per-tenant price list mapping a billable feature to the credits charged
//! per use, with system-wide defaults as the fallback.

use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::accounting::validate_cost;
use crate::error::{LedgerError, LedgerResult};
use crate::store::LedgerStore;

/// Features every deployment knows how to price, with their default cost.
pub const STANDARD_FEATURE_COSTS: &[(&str, i64, u32)] = &[
    // (feature, mantissa, scale)
    ("ORDER", 1, 0),
    ("ADDRESS_PARSING", 1, 0),
    ("WHATSAPP_NOTIFICATION", 5, 1),
    ("IMAGE_PROCESSING", 2, 0),
];

/// Tenant-specific cost rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureCreditCost {
    pub client_id: String,
    pub feature: String,
    pub cost: Decimal,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Where an effective cost came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CostSource {
    Tenant,
    Default,
}

/// A row of the price list as a tenant sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveCost {
    pub feature: String,
    pub cost: Decimal,
    pub source: CostSource,
    /// Present when the tenant has its own (possibly inactive) rule
    pub tenant_rule: Option<FeatureCreditCost>,
}

/// System-wide fallback costs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultCosts {
    costs: BTreeMap<String, Decimal>,
}

impl Default for DefaultCosts {
    fn default() -> Self {
        Self::standard()
    }
}

impl DefaultCosts {
    pub fn standard() -> Self {
        let costs = STANDARD_FEATURE_COSTS
            .iter()
            .map(|(feature, mantissa, scale)| {
                (feature.to_string(), Decimal::new(*mantissa, *scale))
            })
            .collect();
        Self { costs }
    }

    pub fn empty() -> Self {
        Self {
            costs: BTreeMap::new(),
        }
    }

    /// Add or replace a default. The feature name is normalised.
    pub fn with_cost(mut self, feature: &str, cost: Decimal) -> LedgerResult<Self> {
        let feature = normalize_feature(feature)?;
        let cost = validate_cost(cost)?;
        self.costs.insert(feature, cost);
        Ok(self)
    }

    pub fn get(&self, feature: &str) -> Option<Decimal> {
        self.costs.get(feature).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Decimal)> {
        self.costs.iter().map(|(f, c)| (f.as_str(), *c))
    }

    pub fn len(&self) -> usize {
        self.costs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.costs.is_empty()
    }
}

/// Canonical form of a feature tag: trimmed and upper-cased.
pub fn normalize_feature(feature: &str) -> LedgerResult<String> {
    let normalized = feature.trim().to_ascii_uppercase();
    if normalized.is_empty() {
        return Err(LedgerError::UnknownFeature(
            "feature name must not be empty".to_string(),
        ));
    }
    Ok(normalized)
}

/// Cost lookups and tenant pricing edits
pub struct FeatureCostTable<S> {
    store: Arc<S>,
    defaults: Arc<DefaultCosts>,
}

impl<S> Clone for FeatureCostTable<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            defaults: Arc::clone(&self.defaults),
        }
    }
}

impl<S: LedgerStore> FeatureCostTable<S> {
    pub fn new(store: Arc<S>, defaults: DefaultCosts) -> Self {
        Self {
            store,
            defaults: Arc::new(defaults),
        }
    }

    pub fn defaults(&self) -> &DefaultCosts {
        &self.defaults
    }

    /// Credits charged for one use of `feature` by `client_id`.
    pub async fn get_cost(&self, client_id: &str, feature: &str) -> LedgerResult<Decimal> {
        let feature = normalize_feature(feature)?;

        if let Some(rule) = self.store.find_cost_rule(client_id, &feature).await? {
            if rule.is_active {
                return Ok(rule.cost);
            }
        }

        self.defaults
            .get(&feature)
            .ok_or(LedgerError::UnknownFeature(feature))
    }

    /// Create or replace the tenant's rule for `feature`. The rule is active
    /// afterwards.
    pub async fn set_cost(
        &self,
        client_id: &str,
        feature: &str,
        cost: Decimal,
    ) -> LedgerResult<FeatureCreditCost> {
        self.set_rule(client_id, feature, cost, true).await
    }

    /// Create or replace the tenant's rule for `feature` with the given
    /// activity flag in a single write.
    pub async fn set_rule(
        &self,
        client_id: &str,
        feature: &str,
        cost: Decimal,
        is_active: bool,
    ) -> LedgerResult<FeatureCreditCost> {
        let feature = normalize_feature(feature)?;
        let cost = validate_cost(cost)?;

        let rule = self
            .store
            .upsert_cost_rule(client_id, &feature, cost, is_active)
            .await?;

        tracing::info!(
            client_id = %client_id,
            feature = %feature,
            cost = %cost,
            is_active = is_active,
            "Feature cost updated"
        );

        Ok(rule)
    }

    /// Enable or disable an existing tenant rule.
    pub async fn set_active(
        &self,
        client_id: &str,
        feature: &str,
        active: bool,
    ) -> LedgerResult<FeatureCreditCost> {
        let feature = normalize_feature(feature)?;
        self.store
            .set_cost_rule_active(client_id, &feature, active)
            .await?
            .ok_or(LedgerError::UnknownFeature(feature))
    }

    /// Effective price list: every default feature plus every tenant rule.
    pub async fn list_costs(&self, client_id: &str) -> LedgerResult<Vec<EffectiveCost>> {
        let mut rules: BTreeMap<String, FeatureCreditCost> = self
            .store
            .list_cost_rules(client_id)
            .await?
            .into_iter()
            .map(|rule| (rule.feature.clone(), rule))
            .collect();

        let mut features: Vec<String> = self.defaults.iter().map(|(f, _)| f.to_string()).collect();
        for feature in rules.keys() {
            if self.defaults.get(feature).is_none() {
                features.push(feature.clone());
            }
        }
        features.sort();

        let mut costs = Vec::with_capacity(features.len());
        for feature in features {
            let rule = rules.remove(&feature);
            let default = self.defaults.get(&feature);
            let (cost, source) = match (&rule, default) {
                (Some(r), _) if r.is_active => (r.cost, CostSource::Tenant),
                (_, Some(d)) => (d, CostSource::Default),
                // Inactive tenant-only feature: no effective price
                _ => continue,
            };
            costs.push(EffectiveCost {
                feature,
                cost,
                source,
                tenant_rule: rule,
            });
        }

        Ok(costs)
    }

    /// Give a new tenant its own copy of every default. Existing rules are
    /// left alone. Returns how many rules were created.
    pub async fn seed_defaults(&self, client_id: &str) -> LedgerResult<usize> {
        let mut created = 0;
        for (feature, cost) in self.defaults.iter() {
            if self
                .store
                .insert_cost_rule_if_absent(client_id, feature, cost)
                .await?
            {
                created += 1;
            }
        }

        tracing::info!(
            client_id = %client_id,
            created = created,
            "Seeded default feature costs"
        );

        Ok(created)
    }
}
