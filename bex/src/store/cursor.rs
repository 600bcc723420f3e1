//! Cursor-backed streaming reads with a dedicated connection per stream.
//!
//! A [`CursorStream`] opens its own Postgres connection, binds the query to
//! a server-side portal inside an explicit transaction, and fetches
//! `fetch_size` rows per round trip. The sequence is lazy, finite and
//! non-restartable; the connection is reserved until the stream is closed.
//! Memory stays bounded by the fetch batch plus the hand-off channel, both
//! sized by `fetch_size`.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Config, Connection, NoTls, Row, Socket, tls::NoTlsStream};
use tracing::{debug, error};

use crate::config::{BEX_STREAMING_OPTIONS, IntoConnectOptions, PgConnectionConfig};
use crate::error::{BexError, BexResult};

/// Owned query parameters shippable into the cursor task.
pub type StreamParams = Vec<Box<dyn ToSql + Send + Sync>>;

/// Spawns a background task to drive a Postgres connection until it terminates.
fn spawn_postgres_connection(connection: Connection<Socket, NoTlsStream>) {
    // The task ends on its own once the `Client` is dropped, so there is no
    // need to keep the `JoinHandle` around.
    tokio::spawn(async move {
        match connection.await {
            Err(err) => error!(error = %err, "postgres stream connection error"),
            Ok(()) => debug!("postgres stream connection terminated"),
        }
    });
}

/// A lazy, finite, non-restartable sequence of rows read through a
/// server-side portal.
///
/// Dropping the stream closes the cursor: the fetch task is aborted, the
/// transaction rolls back and the dedicated connection is released. This
/// also propagates cooperative cancellation into the database on every exit
/// path, including panics in the consumer.
pub struct CursorStream {
    rows: mpsc::Receiver<BexResult<Row>>,
    fetch_task: JoinHandle<()>,
    closed: bool,
}

impl CursorStream {
    /// Opens a cursor over `sql` with the given parameters and fetch size.
    ///
    /// Connection errors surface here; errors during fetching surface as
    /// items of the stream.
    pub async fn open(
        connection_config: &PgConnectionConfig,
        sql: String,
        params: StreamParams,
        fetch_size: u32,
    ) -> BexResult<Self> {
        let pg_config: Config = connection_config.with_db(Some(&BEX_STREAMING_OPTIONS));

        let (client, connection) = pg_config.connect(NoTls).await?;
        spawn_postgres_connection(connection);

        let capacity = fetch_size.max(1) as usize;
        let (row_tx, row_rx) = mpsc::channel(capacity);

        let fetch_task = tokio::spawn(run_cursor(client, sql, params, fetch_size, row_tx));

        Ok(Self {
            rows: row_rx,
            fetch_task,
            closed: false,
        })
    }

    /// Releases the cursor and its dedicated connection.
    ///
    /// Idempotent; also invoked on drop so every exit path closes the
    /// stream.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.rows.close();
        self.fetch_task.abort();
    }
}

impl Stream for CursorStream {
    type Item = BexResult<Row>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rows.poll_recv(cx)
    }
}

impl Drop for CursorStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Drives the portal fetch loop on the stream's dedicated connection.
///
/// Rows flow through a bounded channel so a slow consumer backpressures the
/// fetch loop instead of buffering the result set.
async fn run_cursor(
    mut client: Client,
    sql: String,
    params: StreamParams,
    fetch_size: u32,
    row_tx: mpsc::Sender<BexResult<Row>>,
) {
    let result = async {
        let transaction = client.transaction().await?;

        let statement = transaction.prepare(&sql).await?;
        let param_refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|param| param.as_ref() as &(dyn ToSql + Sync))
            .collect();
        let portal = transaction.bind(&statement, &param_refs).await?;

        loop {
            let rows = transaction.query_portal(&portal, fetch_size as i32).await?;
            if rows.is_empty() {
                break;
            }

            for row in rows {
                if row_tx.send(Ok(row)).await.is_err() {
                    // Consumer closed the stream; roll back by dropping the
                    // transaction.
                    return Ok(());
                }
            }
        }

        transaction.commit().await?;

        Ok::<(), BexError>(())
    }
    .await;

    if let Err(err) = result {
        let _ = row_tx.send(Err(err)).await;
    }
}
