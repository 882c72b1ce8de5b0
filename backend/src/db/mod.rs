pub mod issue_query;
pub mod schema;

use diesel::sql_types::Text;
use diesel::ConnectionError;
use diesel_async::pooled_connection::deadpool::{BuildError, Object, Pool};
use diesel_async::pooled_connection::{AsyncDieselConnectionManager, ManagerConfig};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use futures_util::FutureExt;
use rustls_platform_verifier::ConfigVerifierExt;

use crate::error::AppResult;

pub type DbPool = Pool<AsyncPgConnection>;
pub type DbConn = Object<AsyncPgConnection>;

/// Session setting read by the row-level security policies.
const ORGANIZATION_SETTING: &str = "app.current_organization_id";

/// Builds the pool. No connection is opened until the first checkout.
pub fn build_pool(database_url: &str, max_size: usize) -> Result<DbPool, BuildError> {
    let mut manager_config = ManagerConfig::default();
    manager_config.custom_setup = Box::new(establish_connection);

    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new_with_config(
        database_url,
        manager_config,
    );
    Pool::builder(manager).max_size(max_size).build()
}

fn establish_connection(
    config: &str,
) -> futures_util::future::BoxFuture<'_, diesel::ConnectionResult<AsyncPgConnection>> {
    let fut = async {
        let rustls_config = rustls::ClientConfig::with_platform_verifier()
            .map_err(|e| ConnectionError::BadConnection(e.to_string()))?;
        let tls = tokio_postgres_rustls::MakeRustlsConnect::new(rustls_config);
        let (client, conn) = tokio_postgres::connect(config, tls)
            .await
            .map_err(|e| ConnectionError::BadConnection(e.to_string()))?;
        AsyncPgConnection::try_from_client_and_connection(client, conn).await
    };
    fut.boxed()
}

/// Checks out a connection restricted to one organization's rows.
pub async fn scoped(pool: &DbPool, organization_id: i32) -> AppResult<DbConn> {
    let mut conn = pool.get().await?;
    set_organization(&mut conn, Some(organization_id)).await?;
    Ok(conn)
}

/// Checks out an unrestricted connection for cross-tenant work: auth,
/// organization lookup, public QR reports, background sync.
pub async fn system(pool: &DbPool) -> AppResult<DbConn> {
    let mut conn = pool.get().await?;
    set_organization(&mut conn, None).await?;
    Ok(conn)
}

pub async fn set_organization(
    conn: &mut AsyncPgConnection,
    organization_id: Option<i32>,
) -> Result<(), diesel::result::Error> {
    let value = organization_id.map(|id| id.to_string()).unwrap_or_default();
    diesel::sql_query("SELECT set_config($1, $2, false)")
        .bind::<Text, _>(ORGANIZATION_SETTING)
        .bind::<Text, _>(value)
        .execute(conn)
        .await?;
    Ok(())
}
