//! Connection manager: opening, upgrading and deleting databases.

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::migration::{MigrationPlan, MigrationReport};
use crate::request;
use std::cell::RefCell;
use std::rc::Rc;
use stowage_host::{HostConnection, HostError, HostErrorKind, StorageHost, UpgradeHandler, UpgradeScope};
use tracing::{info, warn};

/// What the upgrade handler left behind for the open call.
///
/// A report means the handler ran to completion. If the open still fails
/// the host aborted the version change afterwards.
#[derive(Default)]
struct UpgradeOutcome {
    report: Option<MigrationReport>,
    failure: Option<StoreError>,
}

/// An open connection plus the report of the upgrade it ran, if any.
pub(crate) struct Opened<C> {
    pub(crate) connection: C,
    pub(crate) report: Option<MigrationReport>,
}

fn upgrade_handler(plan: MigrationPlan, outcome: Rc<RefCell<UpgradeOutcome>>) -> UpgradeHandler {
    Box::new(move |scope: &mut dyn UpgradeScope| match plan.run(scope) {
        Ok(report) => {
            outcome.borrow_mut().report = Some(report);
            Ok(())
        }
        Err(err) => {
            let host_err = HostError::abort(err.to_string());
            outcome.borrow_mut().failure = Some(err);
            Err(host_err)
        }
    })
}

/// Opens `name` at `version`, running due migrations.
pub(crate) async fn connect<H: StorageHost>(
    host: &H,
    name: &str,
    version: u32,
    plan: &MigrationPlan,
    config: &StoreConfig,
) -> StoreResult<Opened<H::Connection>> {
    if name.is_empty() {
        return Err(StoreError::connection("database name must not be empty"));
    }
    if version == 0 {
        return Err(StoreError::connection("database version must be at least 1"));
    }

    let outcome = Rc::new(RefCell::new(UpgradeOutcome::default()));
    let handler = upgrade_handler(plan.clone(), Rc::clone(&outcome));
    let result = request::issue(|callback| host.open(name, Some(version), handler, callback)).await;

    let connection = match result {
        Ok(connection) => connection,
        Err(err) if err.is(HostErrorKind::Version) && config.reuse_newer_schema => {
            warn!(
                name,
                requested = version,
                "stored schema is newer than requested, reopening at the stored version"
            );
            request::issue(|callback| host.open(name, None, Box::new(|_| Ok(())), callback))
                .await
                .map_err(|e| {
                    StoreError::connection_from(format!("cannot reopen '{name}'"), e)
                })?
        }
        Err(err) => {
            let UpgradeOutcome { report, failure } = std::mem::take(&mut *outcome.borrow_mut());
            return Err(match (failure, report) {
                (Some(migration_err), _) => {
                    warn!(name, version, error = %migration_err, "schema upgrade aborted");
                    migration_err
                }
                (None, Some(_)) => {
                    warn!(name, version, error = %err, "host aborted completed schema upgrade");
                    StoreError::migration(format!(
                        "upgrade of '{name}' to version {version} was aborted by the host: {err}"
                    ))
                }
                (None, None) => StoreError::connection_from(
                    format!("cannot open '{name}' at version {version}"),
                    err,
                ),
            });
        }
    };

    let report = outcome.borrow_mut().report.take();
    info!(
        name,
        version = connection.version(),
        upgraded = report.is_some(),
        "opened database"
    );
    Ok(Opened { connection, report })
}

/// Deletes a database and its schema. Deleting a missing database succeeds.
///
/// # Errors
///
/// Returns [`StoreError::Connection`] if the host refuses.
pub async fn delete_database<H: StorageHost>(host: &H, name: &str) -> StoreResult<()> {
    if name.is_empty() {
        return Err(StoreError::connection("database name must not be empty"));
    }
    request::issue(|callback| host.delete_database(name, callback))
        .await
        .map_err(|e| StoreError::connection_from(format!("cannot delete '{name}'"), e))?;
    info!(name, "deleted database");
    Ok(())
}
