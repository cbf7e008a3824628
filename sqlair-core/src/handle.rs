//! User-facing handles whose `Drop` impls release cache entries and driver
//! resources (spec.md §9 REDESIGN FLAGS: move ownership to these handles
//! instead of relying on a finalizer to release prepared statements when a
//! logical statement object becomes unreachable).

use std::sync::{Arc, Mutex};

use crate::cache::{DatabaseId, StatementCache, StatementId};
use crate::driver::{Driver, DriverConnection, DriverError, DriverStatement};

/// The concrete cached-statement type for a given driver: one prepared
/// driver statement, shared (and internally synchronized) across every
/// [`Statement`] handle that currently prepares against the same
/// [`DatabaseHandle`].
pub type CachedStatement<D> = Arc<Mutex<<<D as Driver>::Connection as DriverConnection>::Statement>>;

/// A reference-counted logical statement (spec.md Glossary: "Logical
/// statement"). Interns its SQL text with the shared cache on first
/// creation; the last clone to drop evicts every cached prepared form of
/// this statement, on every database (spec.md §4.6).
pub struct Statement<D: Driver> {
    inner: Arc<StatementRegistration<D>>,
}

struct StatementRegistration<D: Driver> {
    id: StatementId,
    sql: String,
    cache: Arc<StatementCache<CachedStatement<D>>>,
}

impl<D: Driver> Drop for StatementRegistration<D> {
    fn drop(&mut self) {
        self.cache.evict_statement(self.id);
    }
}

impl<D: Driver> Statement<D> {
    pub fn prepare(sql: &str, cache: Arc<StatementCache<CachedStatement<D>>>) -> Self {
        let id = cache.statement_id_for(sql);
        Self { inner: Arc::new(StatementRegistration { id, sql: sql.to_string(), cache }) }
    }

    pub fn id(&self) -> StatementId {
        self.inner.id
    }

    pub fn sql(&self) -> &str {
        &self.inner.sql
    }
}

impl<D: Driver> Clone for Statement<D> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

/// A reference-counted live connection (spec.md Glossary: "Database
/// handle"). The last clone to drop evicts every cache entry keyed to this
/// connection and asks the driver to close it.
pub struct DatabaseHandle<D: Driver> {
    inner: Arc<DatabaseInner<D>>,
}

struct DatabaseInner<D: Driver> {
    id: DatabaseId,
    cache: Arc<StatementCache<CachedStatement<D>>>,
    connection: Mutex<D::Connection>,
}

impl<D: Driver> Drop for DatabaseInner<D> {
    fn drop(&mut self) {
        self.cache.evict_database(self.id);
        if let Ok(mut conn) = self.connection.lock() {
            let _ = conn.close();
        }
    }
}

impl<D: Driver> DatabaseHandle<D> {
    pub fn open(driver: &D, cache: Arc<StatementCache<CachedStatement<D>>>) -> Result<Self, DriverError> {
        let connection = driver.connect()?;
        let id = cache.new_database_id();
        Ok(Self { inner: Arc::new(DatabaseInner { id, cache, connection: Mutex::new(connection) }) })
    }

    pub fn id(&self) -> DatabaseId {
        self.inner.id
    }

    /// Fetch (preparing, single-flight, if necessary) the driver-side
    /// prepared form of `statement` on this connection, for the given
    /// `primed_sql` — the final, placeholder-rendered SQL text for one
    /// particular call (spec.md §4.5). A call whose primed SQL differs from
    /// what is currently cached (e.g. a bulk insert at a different row
    /// count) re-prepares rather than reusing the stale handle (spec.md
    /// §4.6, scenario 4).
    pub fn prepared(&self, statement: &Statement<D>, primed_sql: &str) -> Result<CachedStatement<D>, DriverError> {
        let connection = &self.inner.connection;
        self.inner.cache.get_or_prepare(statement.id(), self.inner.id, primed_sql, || {
            let mut conn = connection.lock().expect("sqlair connection lock poisoned");
            let stmt = conn.prepare(primed_sql)?;
            Ok(Arc::new(Mutex::new(stmt)))
        })
    }

    /// Transaction execution path (spec.md §4.6 "Transactions"): reuse a
    /// cached prepared form opportunistically, but never insert one into the
    /// cache — a transaction prepares ad hoc against the connection and lets
    /// the result drop at the end of the call, so the cache stays keyed by
    /// non-transactional use only.
    pub fn prepared_for_transaction(
        &self,
        statement: &Statement<D>,
        primed_sql: &str,
    ) -> Result<CachedStatement<D>, DriverError> {
        if let Some(cached) = self.inner.cache.peek(statement.id(), self.inner.id, primed_sql) {
            return Ok(cached);
        }
        let mut conn = self.inner.connection.lock().expect("sqlair connection lock poisoned");
        let stmt = conn.prepare(primed_sql)?;
        Ok(Arc::new(Mutex::new(stmt)))
    }

    pub fn begin(&self) -> Result<(), DriverError> {
        self.inner.connection.lock().expect("sqlair connection lock poisoned").begin()
    }

    pub fn commit(&self) -> Result<(), DriverError> {
        self.inner.connection.lock().expect("sqlair connection lock poisoned").commit()
    }

    pub fn rollback(&self) -> Result<(), DriverError> {
        self.inner.connection.lock().expect("sqlair connection lock poisoned").rollback()
    }
}

impl<D: Driver> Clone for DatabaseHandle<D> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::test_driver::TestDriver;

    #[test]
    fn statement_handle_evicts_on_last_drop() {
        let cache = Arc::new(StatementCache::new());
        let driver = TestDriver::new();
        driver.define_table("person", &["id", "name"]);
        let db = DatabaseHandle::open(&driver, cache.clone()).unwrap();

        let stmt = Statement::prepare("SELECT id FROM person", cache.clone());
        let stmt2 = stmt.clone();
        let _ = db.prepared(&stmt, "SELECT id FROM person").unwrap();
        assert_eq!(cache.len(), 1);

        drop(stmt);
        assert_eq!(cache.len(), 1, "a clone is still alive");

        drop(stmt2);
        assert_eq!(cache.len(), 0, "the last handle dropping evicts every database");
    }

    #[test]
    fn database_handle_drop_evicts_only_its_entries() {
        let cache = Arc::new(StatementCache::new());
        let driver = TestDriver::new();
        driver.define_table("person", &["id", "name"]);

        let db1 = DatabaseHandle::open(&driver, cache.clone()).unwrap();
        let db2 = DatabaseHandle::open(&driver, cache.clone()).unwrap();
        let stmt = Statement::prepare("SELECT id FROM person", cache.clone());

        let _ = db1.prepared(&stmt, "SELECT id FROM person").unwrap();
        let _ = db2.prepared(&stmt, "SELECT id FROM person").unwrap();
        assert_eq!(cache.len(), 2);

        drop(db1);
        assert_eq!(cache.len(), 1);

        drop(db2);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn transaction_prepare_does_not_populate_cache() {
        let cache = Arc::new(StatementCache::new());
        let driver = TestDriver::new();
        driver.define_table("person", &["id", "name"]);
        let db = DatabaseHandle::open(&driver, cache.clone()).unwrap();
        let stmt = Statement::prepare("SELECT id FROM person", cache.clone());

        let _ = db.prepared_for_transaction(&stmt, "SELECT id FROM person").unwrap();
        assert_eq!(cache.len(), 0, "transaction execution must not cache a new entry");

        let _ = db.prepared(&stmt, "SELECT id FROM person").unwrap();
        assert_eq!(cache.len(), 1);

        let cached = db.prepared_for_transaction(&stmt, "SELECT id FROM person").unwrap();
        let direct = db.prepared(&stmt, "SELECT id FROM person").unwrap();
        assert!(Arc::ptr_eq(&cached, &direct), "an existing cache entry is reused opportunistically");
    }

    #[test]
    fn repeated_prepared_calls_reuse_cache_entry() {
        let cache = Arc::new(StatementCache::new());
        let driver = TestDriver::new();
        driver.define_table("person", &["id", "name"]);
        let db = DatabaseHandle::open(&driver, cache.clone()).unwrap();
        let stmt = Statement::prepare("SELECT id FROM person", cache.clone());

        let a = db.prepared(&stmt, "SELECT id FROM person").unwrap();
        let b = db.prepared(&stmt, "SELECT id FROM person").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn differing_primed_sql_re_prepares_for_same_statement() {
        let cache = Arc::new(StatementCache::new());
        let driver = TestDriver::new();
        driver.define_table("t", &["col"]);
        let db = DatabaseHandle::open(&driver, cache.clone()).unwrap();
        let stmt = Statement::prepare("INSERT INTO t (*) VALUES ($Row.*)", cache.clone());

        let three = db.prepared(&stmt, "(col) VALUES (?), (?), (?)").unwrap();
        let two = db.prepared(&stmt, "(col) VALUES (?), (?)").unwrap();
        assert!(!Arc::ptr_eq(&three, &two));
        assert_eq!(cache.len(), 1, "only the latest primed form stays cached");
    }
}
