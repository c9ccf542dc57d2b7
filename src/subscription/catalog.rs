// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Plan catalog. Prices are in minor units (paise).

use crate::models::BillingCycle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub slug: &'static str,
    pub name: &'static str,
    pub monthly_price: u64,
    pub annual_price: u64,
}

impl Plan {
    pub fn price(&self, cycle: BillingCycle) -> u64 {
        match cycle {
            BillingCycle::Monthly => self.monthly_price,
            BillingCycle::Annual => self.annual_price,
        }
    }
}

const PLANS: &[Plan] = &[
    Plan {
        slug: "basic",
        name: "Basic",
        monthly_price: 84_900,
        annual_price: 849_000,
    },
    Plan {
        slug: "premium",
        name: "Premium",
        monthly_price: 149_900,
        annual_price: 1_499_000,
    },
];

#[derive(Debug, Clone, Copy, Default)]
pub struct PlanCatalog;

impl PlanCatalog {
    pub fn plans(&self) -> &'static [Plan] {
        PLANS
    }

    pub fn get(&self, slug: &str) -> Option<&'static Plan> {
        PLANS.iter().find(|plan| plan.slug == slug)
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.get(slug).is_some()
    }

    pub fn price(&self, slug: &str, cycle: BillingCycle) -> Option<u64> {
        self.get(slug).map(|plan| plan.price(cycle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prices_per_cycle() {
        let catalog = PlanCatalog;
        assert_eq!(catalog.price("basic", BillingCycle::Monthly), Some(84_900));
        assert_eq!(catalog.price("basic", BillingCycle::Annual), Some(849_000));
        assert_eq!(catalog.price("premium", BillingCycle::Monthly), Some(149_900));
        assert_eq!(catalog.price("premium", BillingCycle::Annual), Some(1_499_000));
        assert_eq!(catalog.price("gold", BillingCycle::Monthly), None);
    }

    #[test]
    fn annual_is_cheaper_than_twelve_months() {
        for plan in PlanCatalog.plans() {
            assert!(plan.annual_price < plan.monthly_price * 12, "{}", plan.slug);
        }
    }
}
