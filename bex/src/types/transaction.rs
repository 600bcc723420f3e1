use serde::Deserialize;

/// Typed schema of the semi-structured `transaction_data` column.
///
/// Unknown fields are ignored; absent fields deserialize to their defaults
/// so that flattening can render them as empty output columns instead of
/// failing the row. Only a payload that is not valid JSON at all is a
/// decode failure.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransactionData {
    pub customer: Customer,
    pub merchant: Merchant,
    pub items: Vec<Item>,
    pub status: Option<String>,
    pub risk_score: Option<f64>,
}

/// Customer sub-document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Customer {
    pub id: Option<i64>,
    pub email: Option<String>,
    pub tier: Option<String>,
}

/// Merchant sub-document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Merchant {
    pub name: Option<String>,
    pub category: Option<String>,
    pub country: Option<String>,
}

/// One purchased item inside the transaction.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Item {
    pub product: Option<String>,
    pub price: Option<f64>,
}
