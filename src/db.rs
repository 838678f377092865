use diesel::connection::SimpleConnection;
use diesel::r2d2::{self, ConnectionManager, CustomizeConnection};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::{debug, info};

pub type Pool = r2d2::Pool<ConnectionManager<SqliteConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[derive(Debug, Clone, Copy)]
struct SqlitePragmas;

impl CustomizeConnection<SqliteConnection, r2d2::Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), r2d2::Error> {
        conn.batch_execute("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
            .map_err(r2d2::Error::QueryError)
    }
}

/// Applies every embedded migration not yet recorded in the database and
/// returns the versions it ran.
pub fn run_migrations(conn: &mut SqliteConnection) -> anyhow::Result<Vec<String>> {
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|err| anyhow::anyhow!("failed to migrate db: {err}"))?;
    let applied: Vec<String> = applied.iter().map(ToString::to_string).collect();
    debug!(?applied, "migrations applied");
    Ok(applied)
}

/// Builds a pool for `database_url` and runs pending migrations.
///
/// `:memory:` databases exist per connection, so they get a single,
/// never-recycled connection.
pub fn establish_pool(database_url: &str) -> anyhow::Result<Pool> {
    let in_memory = database_url.contains(":memory:");
    let max_size = if in_memory { 1 } else { 8 };
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let mut builder = r2d2::Pool::builder()
        .max_size(max_size)
        .connection_customizer(Box::new(SqlitePragmas));
    if in_memory {
        // Recycling the only connection would drop the database with it.
        builder = builder.idle_timeout(None).max_lifetime(None);
    }
    let pool = builder.build(manager)?;

    let mut conn = pool.get()?;
    let applied = run_migrations(&mut conn)?;
    info!(database_url, max_size, migrations = applied.len(), "database ready");

    Ok(pool)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::users::dsl::*;
    use diesel::prelude::*;

    #[test]
    fn test_migrations_are_recorded_and_run_once() {
        let pool = test_utils::test_pool();
        let mut conn = pool.get().unwrap();

        assert!(!conn.has_pending_migration(MIGRATIONS).unwrap());
        let applied = run_migrations(&mut conn).unwrap();
        assert!(applied.is_empty());

        let count: i64 = users.count().get_result(&mut conn).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_migrations_revert_and_reapply() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("migrate.db");
        let mut conn = SqliteConnection::establish(path.to_str().unwrap()).unwrap();

        let applied = run_migrations(&mut conn).unwrap();
        assert_eq!(applied.len(), 1);

        conn.revert_all_migrations(MIGRATIONS).unwrap();
        assert!(users.count().get_result::<i64>(&mut conn).is_err());

        let applied = run_migrations(&mut conn).unwrap();
        assert_eq!(applied.len(), 1);
        let count: i64 = users.count().get_result(&mut conn).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_file_database_persists_across_pools() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mindmirror.db");
        let url = path.to_str().unwrap();

        {
            let pool = establish_pool(url).unwrap();
            let mut conn = pool.get().unwrap();
            diesel::insert_into(users)
                .values((
                    username.eq("persisted"),
                    email.eq("persisted@example.com"),
                    password_hash.eq("x"),
                    created_at.eq(chrono::Utc::now().naive_utc()),
                ))
                .execute(&mut conn)
                .unwrap();
        }

        let pool = establish_pool(url).unwrap();
        let mut conn = pool.get().unwrap();
        let names: Vec<String> = users.select(username).load(&mut conn).unwrap();
        assert_eq!(names, vec!["persisted".to_string()]);
    }
}
