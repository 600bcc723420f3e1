use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sqlx::postgres::PgConnectOptions as SqlxConnectOptions;
use std::sync::LazyLock;
use tokio_postgres::Config as TokioPgConnectOptions;

/// Common Postgres settings shared across all bex connection types.
const COMMON_DATESTYLE: &str = "ISO";
const COMMON_CLIENT_ENCODING: &str = "UTF8";
const COMMON_TIMEZONE: &str = "UTC";

const APP_NAME_STATE: &str = "bex_exporter_state";
const APP_NAME_STREAMING: &str = "bex_exporter_streaming";

/// Connection options for claim, finalize and reap operations.
///
/// Uses short timeouts since state transitions are small single-row
/// statements that should fail fast and be retried.
pub static BEX_STATE_OPTIONS: LazyLock<PgConnectionOptions> =
    LazyLock::new(|| PgConnectionOptions {
        datestyle: COMMON_DATESTYLE.to_string(),
        client_encoding: COMMON_CLIENT_ENCODING.to_string(),
        timezone: COMMON_TIMEZONE.to_string(),
        statement_timeout: 30_000,
        lock_timeout: 5_000,
        idle_in_transaction_session_timeout: 60_000,
        application_name: APP_NAME_STATE.to_string(),
    });

/// Connection options for cursor-backed detail streams.
///
/// Disables the statement timeout since a cursor over a very large batch
/// legitimately stays open for as long as the batch takes to emit.
pub static BEX_STREAMING_OPTIONS: LazyLock<PgConnectionOptions> =
    LazyLock::new(|| PgConnectionOptions {
        datestyle: COMMON_DATESTYLE.to_string(),
        client_encoding: COMMON_CLIENT_ENCODING.to_string(),
        timezone: COMMON_TIMEZONE.to_string(),
        statement_timeout: 0,
        lock_timeout: 30_000,
        idle_in_transaction_session_timeout: 0,
        application_name: APP_NAME_STREAMING.to_string(),
    });

/// Session-level Postgres options applied on top of a [`PgConnectionConfig`].
#[derive(Debug, Clone)]
pub struct PgConnectionOptions {
    pub datestyle: String,
    pub client_encoding: String,
    pub timezone: String,
    pub statement_timeout: u32,
    pub lock_timeout: u32,
    pub idle_in_transaction_session_timeout: u32,
    pub application_name: String,
}

impl PgConnectionOptions {
    pub fn to_options_string(&self) -> String {
        format!(
            "-c datestyle={} -c client_encoding={} -c timezone={} -c statement_timeout={} -c lock_timeout={} -c idle_in_transaction_session_timeout={} -c application_name={}",
            self.datestyle,
            self.client_encoding,
            self.timezone,
            self.statement_timeout,
            self.lock_timeout,
            self.idle_in_transaction_session_timeout,
            self.application_name
        )
    }

    pub fn to_key_value_pairs(&self) -> Vec<(String, String)> {
        vec![
            ("datestyle".to_string(), self.datestyle.clone()),
            ("client_encoding".to_string(), self.client_encoding.clone()),
            ("timezone".to_string(), self.timezone.clone()),
            (
                "statement_timeout".to_string(),
                self.statement_timeout.to_string(),
            ),
            ("lock_timeout".to_string(), self.lock_timeout.to_string()),
            (
                "idle_in_transaction_session_timeout".to_string(),
                self.idle_in_transaction_session_timeout.to_string(),
            ),
            (
                "application_name".to_string(),
                self.application_name.clone(),
            ),
        ]
    }
}

/// Connection settings for the source Postgres instance.
///
/// This intentionally does not implement `Serialize` to avoid accidentally
/// leaking the password into serialized forms.
#[derive(Debug, Clone, Deserialize)]
pub struct PgConnectionConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub username: String,
    pub password: Option<SecretString>,
}

/// Converts a [`PgConnectionConfig`] into driver-specific connect options.
pub trait IntoConnectOptions<Output> {
    fn with_db(&self, options: Option<&PgConnectionOptions>) -> Output;
}

impl IntoConnectOptions<SqlxConnectOptions> for PgConnectionConfig {
    fn with_db(&self, options: Option<&PgConnectionOptions>) -> SqlxConnectOptions {
        let mut connect_options = SqlxConnectOptions::new_without_pgpass()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .database(&self.name);

        if let Some(password) = &self.password {
            connect_options = connect_options.password(password.expose_secret());
        }

        if let Some(opts) = options {
            connect_options = connect_options.options(opts.to_key_value_pairs());
        }

        connect_options
    }
}

impl IntoConnectOptions<TokioPgConnectOptions> for PgConnectionConfig {
    fn with_db(&self, options: Option<&PgConnectionOptions>) -> TokioPgConnectOptions {
        let mut config = TokioPgConnectOptions::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(&self.username)
            .dbname(&self.name);

        if let Some(password) = &self.password {
            config.password(password.expose_secret());
        }

        if let Some(opts) = options {
            config.options(&opts.to_options_string());
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_options_disable_statement_timeout() {
        assert_eq!(BEX_STREAMING_OPTIONS.statement_timeout, 0);
        assert_eq!(BEX_STREAMING_OPTIONS.idle_in_transaction_session_timeout, 0);
        assert_eq!(BEX_STREAMING_OPTIONS.application_name, APP_NAME_STREAMING);
    }

    #[test]
    fn test_state_options_string_format() {
        let options_string = BEX_STATE_OPTIONS.to_options_string();
        assert_eq!(
            options_string,
            "-c datestyle=ISO -c client_encoding=UTF8 -c timezone=UTC -c statement_timeout=30000 -c lock_timeout=5000 -c idle_in_transaction_session_timeout=60000 -c application_name=bex_exporter_state"
        );
    }
}
