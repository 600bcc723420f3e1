//! Pure projection of details into output rows.
//!
//! Flattening renders every field to text, rejects rows whose fields carry
//! the output delimiter, and joins the result into the final detail line.
//! All failures here are per-row values; nothing in this module touches the
//! store or the filesystem.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::config::ProcessingMode;
use crate::emit::DELIMITER;
use crate::error::{RowError, RowErrorKind};
use crate::types::{Detail, OutputRow, TransactionData};

/// Renders a fixed-point amount with exactly two fractional digits.
pub fn format_amount(amount: Decimal) -> String {
    format!("{:.2}", amount.round_dp(2))
}

/// Renders an instant as `yyyyMMddHHmmss` in UTC.
pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.format("%Y%m%d%H%M%S").to_string()
}

/// Renders an optional numeric score with its natural precision.
///
/// Absent numerics map to the empty string, never to zero.
fn format_score(score: Option<f64>) -> String {
    score.map(|value| value.to_string()).unwrap_or_default()
}

/// Maps a detail (plus its decoded sub-document in JSONB mode) into an
/// output row.
///
/// Standard and enhanced modes emit the relational projection; streaming
/// JSONB mode decodes `transaction_payload` and appends the flattened tail.
/// A malformed payload or a field containing the delimiter rejects the row.
pub fn flatten(detail: &Detail, mode: ProcessingMode) -> Result<OutputRow, RowError> {
    let mut fields: Vec<(&'static str, String)> = vec![
        ("record_type", detail.record_type.clone()),
        ("detail_id", detail.detail_id.to_string()),
        ("account_number", detail.account_number.clone()),
        ("customer_name", detail.customer_name.clone()),
        ("amount", format_amount(detail.amount)),
        ("currency", detail.currency.clone()),
        ("description", detail.description.clone()),
        (
            "transaction_date",
            format_timestamp(detail.transaction_date),
        ),
    ];

    if mode == ProcessingMode::StreamingJsonb {
        let data = decode_payload(detail)?;

        fields.push((
            "customer_email",
            data.customer.email.clone().unwrap_or_default(),
        ));
        fields.push((
            "merchant_name",
            data.merchant.name.clone().unwrap_or_default(),
        ));
        fields.push(("items_count", data.items.len().to_string()));
        fields.push(("status", data.status.clone().unwrap_or_default()));
        fields.push(("risk_score", format_score(data.risk_score)));
    }

    for (name, value) in &fields {
        if value.contains(DELIMITER) {
            return Err(RowError {
                detail_id: detail.detail_id,
                kind: RowErrorKind::DelimiterConflict { field: name },
            });
        }
    }

    let line = fields
        .iter()
        .map(|(_, value)| value.as_str())
        .collect::<Vec<_>>()
        .join(&DELIMITER.to_string());

    Ok(OutputRow {
        detail_id: detail.detail_id,
        amount: detail.amount,
        line,
    })
}

/// Decodes the semi-structured payload attached to a detail.
///
/// A missing payload flattens like an empty document; only malformed JSON
/// is a decode failure.
fn decode_payload(detail: &Detail) -> Result<TransactionData, RowError> {
    let Some(payload) = &detail.transaction_payload else {
        return Ok(TransactionData::default());
    };

    serde_json::from_str(payload).map_err(|err| RowError {
        detail_id: detail.detail_id,
        kind: RowErrorKind::Decode {
            reason: err.to_string(),
        },
    })
}
