//! Plan Catalog

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::schedule::GrantPolicy;

/// A purchasable plan and its credit grant policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Stable key referenced by subscriptions and webhooks
    pub key: String,
    /// Display name
    pub name: String,
    /// Price per billing cycle
    pub monthly_price: Decimal,
    /// Full credit allotment per billing cycle
    pub credits_per_cycle: i64,
    /// How the allotment is delivered
    pub grant_policy: GrantPolicy,
}

/// Catalog of plans, keyed by plan key
#[derive(Clone)]
pub struct PlanCatalog {
    plans: Arc<RwLock<HashMap<String, Plan>>>,
}

impl PlanCatalog {
    /// Catalog seeded with the default plans
    pub fn new() -> Self {
        let catalog = Self::empty();
        catalog.load_default_plans();
        catalog
    }

    /// Catalog with no plans
    pub fn empty() -> Self {
        Self {
            plans: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn load_default_plans(&self) {
        let mut plans = self.plans.write();

        plans.insert(
            "free".into(),
            Plan {
                key: "free".into(),
                name: "Free".into(),
                monthly_price: dec!(0),
                credits_per_cycle: 50,
                grant_policy: GrantPolicy::AllAtOnce,
            },
        );

        plans.insert(
            "pro_monthly".into(),
            Plan {
                key: "pro_monthly".into(),
                name: "Pro (monthly)".into(),
                monthly_price: dec!(19),
                credits_per_cycle: 400,
                grant_policy: GrantPolicy::Installments {
                    grants_per_cycle: 4,
                    interval_months: 1,
                    credits_per_grant: Some(100),
                    initial_grants: 1,
                },
            },
        );

        // Yearly plan pays once, credits land month by month
        plans.insert(
            "pro_yearly".into(),
            Plan {
                key: "pro_yearly".into(),
                name: "Pro (yearly)".into(),
                monthly_price: dec!(190),
                credits_per_cycle: 4800,
                grant_policy: GrantPolicy::Installments {
                    grants_per_cycle: 12,
                    interval_months: 1,
                    credits_per_grant: None,
                    initial_grants: 1,
                },
            },
        );
    }

    /// Plan by key
    pub fn get(&self, key: &str) -> Option<Plan> {
        self.plans.read().get(key).cloned()
    }

    /// All plans
    pub fn all(&self) -> Vec<Plan> {
        self.plans.read().values().cloned().collect()
    }

    /// Insert or replace a plan
    pub fn upsert(&self, plan: Plan) {
        self.plans.write().insert(plan.key.clone(), plan);
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::new()
    }
}
