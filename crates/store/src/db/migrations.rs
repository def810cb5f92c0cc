use std::sync::LazyLock;

use rusqlite::Connection;
use rusqlite_migration::{Migrations, M};
use tracing::{debug, info, instrument};

use crate::COMPONENT;

const MIGRATION_SCRIPTS: [&str; 1] = [include_str!("migrations/001-init.sql")];
static MIGRATIONS: LazyLock<Migrations> = LazyLock::new(prepare_migrations);

fn up(s: &'static str) -> M<'static> {
    M::up(s).foreign_key_check()
}

#[instrument(target = COMPONENT, skip_all, err)]
pub fn apply_migrations(conn: &mut Connection) -> super::Result<()> {
    let version_before = MIGRATIONS.current_version(conn)?;

    info!(target: COMPONENT, version_before = %version_before, "Running database migrations");

    MIGRATIONS.to_latest(conn)?;

    debug!(
        target: COMPONENT,
        version_after = %MIGRATIONS.current_version(conn)?,
        "Database migrations applied",
    );

    Ok(())
}

fn prepare_migrations() -> Migrations<'static> {
    Migrations::new(MIGRATION_SCRIPTS.map(up).to_vec())
}

#[test]
fn migrations_validate() {
    assert_eq!(MIGRATIONS.validate(), Ok(()));
}
