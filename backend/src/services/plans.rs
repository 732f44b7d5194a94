//! Investment plan catalog.

use rust_decimal::Decimal;
use serde::Serialize;

/// A plan users can invest in. `roi` is the annual return in percent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: i32,
    pub name: &'static str,
    pub roi: Decimal,
    pub duration_days: i32,
    pub min_amount: Decimal,
    pub max_amount: Option<Decimal>,
}

impl Plan {
    /// Whether `amount` is inside the plan's bounds.
    pub fn accepts(&self, amount: Decimal) -> bool {
        amount >= self.min_amount && self.max_amount.map_or(true, |max| amount <= max)
    }
}

#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: Vec<Plan>,
}

impl PlanCatalog {
    pub fn new(plans: Vec<Plan>) -> Self {
        Self { plans }
    }

    pub fn get(&self, id: i32) -> Option<&Plan> {
        self.plans.iter().find(|p| p.id == id)
    }

    pub fn all(&self) -> &[Plan] {
        &self.plans
    }
}

impl Default for PlanCatalog {
    /// Mining, Premium and Gold.
    fn default() -> Self {
        Self::new(vec![
            Plan {
                id: 1,
                name: "Mining",
                roi: Decimal::from(5),
                duration_days: 30,
                min_amount: Decimal::from(1000),
                max_amount: None,
            },
            Plan {
                id: 2,
                name: "Premium",
                roi: Decimal::from(10),
                duration_days: 60,
                min_amount: Decimal::from(5000),
                max_amount: None,
            },
            Plan {
                id: 3,
                name: "Gold",
                roi: Decimal::from(15),
                duration_days: 90,
                min_amount: Decimal::from(10000),
                max_amount: None,
            },
        ])
    }
}
