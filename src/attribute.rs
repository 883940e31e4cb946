//! Tracked campaign attributes, their column names and value types.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    BudgetAmount,
    TargetCpa,
    TargetRoas,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeKind {
    Integer,
    Ratio,
}

pub const ALL_ATTRIBUTES: [Attribute; 3] = [
    Attribute::BudgetAmount,
    Attribute::TargetCpa,
    Attribute::TargetRoas,
];

impl Attribute {
    pub fn column(self) -> &'static str {
        match self {
            Self::BudgetAmount => "budget_amount",
            Self::TargetCpa => "target_cpa",
            Self::TargetRoas => "target_roas",
        }
    }

    pub fn old_column(self) -> String {
        format!("old_{}", self.column())
    }

    pub fn new_column(self) -> String {
        format!("new_{}", self.column())
    }

    pub fn kind(self) -> AttributeKind {
        match self {
            Self::BudgetAmount | Self::TargetCpa => AttributeKind::Integer,
            Self::TargetRoas => AttributeKind::Ratio,
        }
    }

    // Budgets need both sides positive; bid targets only need a prior value.
    pub fn is_relevant_change(self, old: Option<f64>, new: Option<f64>) -> bool {
        let positive = |value: Option<f64>| value.map(|v| v > 0.0).unwrap_or(false);
        match self {
            Self::BudgetAmount => positive(old) && positive(new),
            Self::TargetCpa | Self::TargetRoas => positive(old),
        }
    }

    pub fn from_column(column: &str) -> Option<Self> {
        ALL_ATTRIBUTES
            .into_iter()
            .find(|attribute| attribute.column() == column)
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Integer(i64),
    Ratio(f64),
}

impl AttributeValue {
    pub fn cast(attribute: Attribute, raw: f64) -> Option<Self> {
        if !raw.is_finite() {
            return None;
        }
        match attribute.kind() {
            AttributeKind::Integer => {
                let rounded = raw.round();
                if rounded < i64::MIN as f64 || rounded >= i64::MAX as f64 {
                    return None;
                }
                Some(Self::Integer(rounded as i64))
            }
            AttributeKind::Ratio => Some(Self::Ratio(raw)),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::Ratio(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeValues {
    pub budget_amount: Option<f64>,
    pub target_cpa: Option<f64>,
    pub target_roas: Option<f64>,
}

impl AttributeValues {
    pub fn get(&self, attribute: Attribute) -> Option<f64> {
        match attribute {
            Attribute::BudgetAmount => self.budget_amount,
            Attribute::TargetCpa => self.target_cpa,
            Attribute::TargetRoas => self.target_roas,
        }
    }

    pub fn set(&mut self, attribute: Attribute, value: Option<f64>) {
        match attribute {
            Attribute::BudgetAmount => self.budget_amount = value,
            Attribute::TargetCpa => self.target_cpa = value,
            Attribute::TargetRoas => self.target_roas = value,
        }
    }

    pub fn with(mut self, attribute: Attribute, value: f64) -> Self {
        self.set(attribute, Some(value));
        self
    }
}
