//! Detail readers: typed streams over the cursor gateway.
//!
//! Both variants stream `batch_details` rows for one master in ascending
//! `detail_id` order. The JSONB variant additionally selects the
//! semi-structured column as raw text; decoding it is deferred to the
//! transformer so a malformed payload stays a per-row failure instead of
//! killing the stream.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio_postgres::Row;

use crate::config::{PgConnectionConfig, ProcessingMode};
use crate::error::BexResult;
use crate::store::cursor::CursorStream;
use crate::types::Detail;

const RELATIONAL_DETAILS_SQL: &str = "\
SELECT detail_id, master_id, record_type, account_number, customer_name,
       amount, currency, description, transaction_date
FROM batch_details
WHERE master_id = $1
ORDER BY detail_id ASC";

const JSONB_DETAILS_SQL: &str = "\
SELECT detail_id, master_id, record_type, account_number, customer_name,
       amount, currency, description, transaction_date,
       transaction_data::text AS transaction_data
FROM batch_details_jsonb
WHERE master_id = $1
ORDER BY detail_id ASC";

/// Opens detail streams for batches.
#[derive(Debug, Clone)]
pub struct DetailReader {
    connection_config: PgConnectionConfig,
    fetch_size: u32,
}

impl DetailReader {
    pub fn new(connection_config: PgConnectionConfig, fetch_size: u32) -> Self {
        Self {
            connection_config,
            fetch_size,
        }
    }

    /// Streams the details of one batch in the source shape selected by the
    /// processing mode.
    ///
    /// The returned sequence is lazy, finite and consumed once; it reserves
    /// a dedicated connection until dropped or closed.
    pub async fn stream(&self, master_id: i64, mode: ProcessingMode) -> BexResult<DetailStream> {
        let (sql, decode): (&str, DecodeFn) = match mode {
            ProcessingMode::Standard | ProcessingMode::Enhanced => {
                (RELATIONAL_DETAILS_SQL, decode_relational)
            }
            ProcessingMode::StreamingJsonb => (JSONB_DETAILS_SQL, decode_jsonb),
        };

        let inner = CursorStream::open(
            &self.connection_config,
            sql.to_string(),
            vec![Box::new(master_id)],
            self.fetch_size,
        )
        .await?;

        Ok(DetailStream { inner, decode })
    }
}

type DecodeFn = fn(&Row) -> BexResult<Detail>;

/// A lazy, finite, non-restartable sequence of typed details.
pub struct DetailStream {
    inner: CursorStream,
    decode: DecodeFn,
}

impl DetailStream {
    /// Closes the underlying cursor; idempotent, also run on drop.
    pub fn close(&mut self) {
        self.inner.close();
    }
}

impl Stream for DetailStream {
    type Item = BexResult<Detail>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        Pin::new(&mut this.inner)
            .poll_next(cx)
            .map(|item| item.map(|row| row.and_then(|row| (this.decode)(&row))))
    }
}

fn decode_relational(row: &Row) -> BexResult<Detail> {
    Ok(Detail {
        detail_id: row.try_get("detail_id")?,
        master_id: row.try_get("master_id")?,
        record_type: row.try_get("record_type")?,
        account_number: row.try_get("account_number")?,
        customer_name: row.try_get("customer_name")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        description: row.try_get("description")?,
        transaction_date: row.try_get("transaction_date")?,
        transaction_payload: None,
    })
}

fn decode_jsonb(row: &Row) -> BexResult<Detail> {
    let mut detail = decode_relational(row)?;
    detail.transaction_payload = row.try_get("transaction_data")?;

    Ok(detail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_queries_order_by_detail_id() {
        for sql in [RELATIONAL_DETAILS_SQL, JSONB_DETAILS_SQL] {
            assert!(sql.contains("ORDER BY detail_id ASC"));
            assert!(sql.contains("WHERE master_id = $1"));
        }
    }

    #[test]
    fn test_jsonb_query_reads_payload_as_text() {
        assert!(JSONB_DETAILS_SQL.contains("transaction_data::text"));
        assert!(!RELATIONAL_DETAILS_SQL.contains("transaction_data"));
    }
}
