//! `sqlair`: a type-safe SQL mapping layer built around small `$input`/
//! `&output` sub-grammars embedded in plain SQL.
//!
//! This crate is a thin façade (spec.md §2 component H) over [`sqlair_core`],
//! which does the actual parsing, type binding, priming, and statement
//! caching. Sequencing those stages into `prepare`/`query`/`get_one`/
//! `get_all`/`iterate`/`run`, plus transaction `begin`/`commit`/`rollback`,
//! is all this crate does — following the teacher's own `sqlx` crate, which
//! re-exports `sqlx-core` behind a thin surface rather than carrying engine
//! logic itself.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

pub use sqlair_core::driver::{Driver, DriverConnection, DriverRows, DriverStatement};
pub use sqlair_core::error::{CatalogError, Error, Result};
pub use sqlair_core::types::value::{FromValue, IntoValue, Value};
pub use sqlair_core::types::SqlairType;
pub use sqlair_core::Catalogue;
pub use sqlair_macros::SqlairType;

use sqlair_core::bind::{self, BoundStatement};
use sqlair_core::cache::StatementCache;
use sqlair_core::driver::DriverError;
use sqlair_core::error::DriverPhase;
use sqlair_core::handle::{CachedStatement, DatabaseHandle, Statement as CoreStatement};
use sqlair_core::locator::{Arguments, Locator};
use sqlair_core::parser;
use sqlair_core::prime::{self, PrimedStatement};

/// An open database, holding the type catalogue, the process-shareable
/// statement cache, and one live driver connection (spec.md Glossary:
/// "Database handle").
///
/// Cloning is cheap (an `Arc` bump, like [`sqlair_core::handle::DatabaseHandle`])
/// and every clone shares the same cache entries and connection.
pub struct Database<D: Driver> {
    catalogue: Arc<Catalogue>,
    cache: Arc<StatementCache<CachedStatement<D>>>,
    handle: DatabaseHandle<D>,
}

impl<D: Driver> Database<D> {
    /// Open a connection through `driver`, with a fresh, private statement
    /// cache and type catalogue.
    ///
    /// The cache is private per [`Database`] rather than a single
    /// process-wide global (spec.md §9 REDESIGN FLAGS notes the cache is
    /// "process-wide"; SPEC_FULL.md §4.6 records that this crate makes it
    /// swappable per instance instead, so tests never share state with each
    /// other) — construct one `Database` per logical process-wide connection
    /// pool to get the sharing spec.md describes.
    pub fn open(driver: &D) -> Result<Self> {
        let cache = Arc::new(StatementCache::new());
        let handle = DatabaseHandle::open(driver, cache.clone())
            .map_err(|e| Error::driver(DriverPhase::Connect, DriverStringError(e)))?;
        Ok(Self { catalogue: Arc::new(Catalogue::new()), cache, handle })
    }

    /// Register a sample type with this database's catalogue (spec.md
    /// §4.1). Every type referenced by a `$`/`&` expression must be
    /// registered before the statement that names it is prepared.
    pub fn register<T: SqlairType>(&self) -> Result<()> {
        self.catalogue.register::<T>().map_err(Error::from)
    }

    /// Parse and type-bind `sql` (spec.md §6 "Prepare"). The statement text
    /// is interned with the statement cache on first use; every later
    /// `prepare` call with the same text, on any [`Database`] sharing this
    /// cache, reuses the same logical statement id (spec.md §4.6).
    pub fn prepare(&self, sql: &str) -> Result<Statement<D>> {
        let ast = parser::parse(sql)?;
        let bound = bind::bind(&ast, &self.catalogue)?;
        let core = CoreStatement::prepare(sql, self.cache.clone());
        Ok(Statement { core, bound: Arc::new(bound) })
    }

    /// Start building a call against `statement` (spec.md §6 "Query").
    pub fn query<'a>(&'a self, statement: &'a Statement<D>) -> Query<'a, D> {
        Query { db: self, statement, in_transaction: false, args: Arguments::new() }
    }

    /// Begin a transaction (spec.md §6 "Transaction begin/commit/rollback").
    /// Statements run through [`Transaction::query`] reuse a cached prepared
    /// form opportunistically but never populate the cache themselves
    /// (spec.md §4.6 "Transactions").
    pub fn begin(&self) -> Result<Transaction<'_, D>> {
        self.handle.begin().map_err(|e| Error::driver(DriverPhase::Begin, DriverStringError(e)))?;
        Ok(Transaction { db: self, finished: false })
    }
}

/// Wraps a [`DriverError`] (`Box<dyn std::error::Error + Send + Sync>`) in a
/// concrete type so it can be handed to [`Error::driver`], which requires
/// `std::error::Error + Send + Sync + 'static` rather than an already-boxed
/// trait object.
#[derive(Debug)]
struct DriverStringError(DriverError);

impl std::fmt::Display for DriverStringError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for DriverStringError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

/// A reference-counted logical statement (spec.md Glossary: "Logical
/// statement"): a type-bound form plus the [`sqlair_core::handle::Statement`]
/// whose `Drop` evicts every cached driver-prepared handle for it, on every
/// database, once the last clone goes away (spec.md §4.6).
pub struct Statement<D: Driver> {
    core: CoreStatement<D>,
    bound: Arc<BoundStatement>,
}

impl<D: Driver> Clone for Statement<D> {
    fn clone(&self) -> Self {
        Self { core: self.core.clone(), bound: self.bound.clone() }
    }
}

impl<D: Driver> Statement<D> {
    pub fn sql(&self) -> &str {
        self.core.sql()
    }
}

/// A call to a [`Statement`] under construction: input arguments are bound
/// with [`Query::bind`]/[`Query::bind_all`] (spec.md §6 "Query(ctx, statement,
/// inputArgs…)") before one of [`Query::get_one`], [`Query::get_all`],
/// [`Query::iterate`], or [`Query::run`] consumes it.
///
/// Named, and shaped as a consuming builder, after the teacher's own
/// `sqlx-core::query::Query`/`Query::bind`.
pub struct Query<'a, D: Driver> {
    db: &'a Database<D>,
    statement: &'a Statement<D>,
    in_transaction: bool,
    args: Arguments<'a>,
}

impl<'a, D: Driver> Query<'a, D> {
    /// Bind a single sample value for use as `$Type...` references to `T`
    /// (spec.md §6: "each must be... provided at most once").
    pub fn bind<T: SqlairType + Any>(mut self, value: &'a T) -> Result<Self> {
        self.args.insert_one(TypeId::of::<T>(), T::type_name(), value as &dyn Any)?;
        Ok(self)
    }

    /// Bind a slice of `T` for use as a bulk-insert source (spec.md §4.2
    /// "bulk-insert detection") or, via `$T[:]`, a whole-sequence expansion.
    pub fn bind_all<T: SqlairType + Any>(mut self, values: &'a [T]) -> Result<Self> {
        let refs: Vec<&dyn Any> = values.iter().map(|v| v as &dyn Any).collect();
        self.args.insert_many(TypeId::of::<T>(), T::type_name(), refs)?;
        Ok(self)
    }

    fn prime(&self) -> Result<PrimedStatement> {
        prime::prime(&self.statement.bound, &self.args)
    }

    /// Fetch (preparing, re-preparing on a primed-SQL change, if necessary)
    /// the driver handle for one already-primed call (spec.md §4.5/§4.6: the
    /// primed SQL, not the raw `$Type.col` statement text, is what a driver
    /// actually prepares; a bulk insert's placeholder count depends on the
    /// call's row count, so the handle cached for this logical statement can
    /// legitimately change between calls).
    fn prepared_statement(&self, primed_sql: &str) -> Result<CachedStatement<D>> {
        let db = self.db;
        let result = if self.in_transaction {
            db.handle.prepared_for_transaction(&self.statement.core, primed_sql)
        } else {
            db.handle.prepared(&self.statement.core, primed_sql)
        };
        result.map_err(|e| Error::driver(DriverPhase::Prepare, DriverStringError(e)))
    }

    /// Run a statement expected to mutate rows and not produce any (spec.md
    /// §6 "run (no results)").
    pub fn run(self) -> Result<u64> {
        let primed = self.prime()?;
        let stmt = self.prepared_statement(&primed.sql)?;
        let mut stmt = stmt.lock().expect("sqlair statement lock poisoned");
        stmt.execute(&primed.params).map_err(|e| Error::driver(DriverPhase::Execute, DriverStringError(e)))
    }

    /// Begin iterating the rows produced by this call (spec.md §6
    /// "iterate (next/get/close)").
    pub fn iterate(self) -> Result<RowIter<D>> {
        let primed = self.prime()?;
        let stmt = self.prepared_statement(&primed.sql)?;
        let rows = {
            let mut stmt = stmt.lock().expect("sqlair statement lock poisoned");
            stmt.query(&primed.params).map_err(|e| Error::driver(DriverPhase::Query, DriverStringError(e)))?
        };
        Ok(RowIter { output_columns: primed.output_columns, rows, _stmt: stmt, pending: None, finished: false })
    }

    /// Fetch exactly one row into `targets` (spec.md §6 "get-one (exactly
    /// one row or \"no rows\" error)").
    pub fn get_one(self, targets: &mut ScanTargets<'_>) -> Result<()> {
        let mut iter = self.iterate()?;
        if !iter.next(targets)? {
            return Err(Error::NotFound);
        }
        if iter.has_more()? {
            return Err(Error::FoundMoreThanOne);
        }
        Ok(())
    }

    /// Convenience form of [`Query::get_one`] for statements whose entire
    /// output targets a single registered record/mapping type.
    pub fn get_one_as<T: SqlairType + Any + Default>(self) -> Result<T> {
        let mut value = T::default();
        let mut targets = ScanTargets::new();
        targets.insert(&mut value);
        self.get_one(&mut targets)?;
        Ok(value)
    }

    /// Convenience form of [`Query::get_all`] for statements whose entire
    /// output targets a single registered record/mapping type (spec.md §6
    /// "get-all (populate caller slices of the output types...)").
    pub fn get_all_as<T: SqlairType + Any + Default>(self) -> Result<Vec<T>> {
        let mut iter = self.iterate()?;
        let mut out = Vec::new();
        loop {
            let mut value = T::default();
            let mut targets = ScanTargets::new();
            targets.insert(&mut value);
            if !iter.next(&mut targets)? {
                break;
            }
            out.push(value);
        }
        Ok(out)
    }
}

/// A type-erased destination for one call's row scanning (spec.md §4.2's
/// scan targets), one entry per distinct output type referenced by a
/// statement's `&Type.col` expressions. Mirrors [`Arguments`]'s
/// `TypeId`-keyed shape on the output side.
pub struct ScanTargets<'a> {
    targets: HashMap<TypeId, &'a mut dyn Any>,
}

impl<'a> ScanTargets<'a> {
    pub fn new() -> Self {
        Self { targets: HashMap::new() }
    }

    /// Register `dest` as the destination for any output column bound to
    /// `T`. A second registration for the same `T` replaces the first.
    pub fn insert<T: SqlairType + Any>(&mut self, dest: &'a mut T) {
        self.targets.insert(TypeId::of::<T>(), dest as &mut dyn Any);
    }
}

impl<'a> Default for ScanTargets<'a> {
    fn default() -> Self {
        Self::new()
    }
}

/// A live cursor over the rows of one [`Query`] call (spec.md §6 "iterate
/// (next/get/close)"; spec.md §6 bullet "`GetAll` is equivalent to iterating
/// with `Next`/`Get` until exhaustion plus `Close`").
///
/// Closing happens implicitly on `Drop`, by dropping the underlying driver
/// cursor (spec.md §5: "a failed scan leaves the iterator in a terminal
/// state"); there is no separate `close()` method to call, since nothing in
/// this crate's driver boundary needs an explicit teardown step beyond
/// dropping the cursor value.
pub struct RowIter<D: Driver> {
    output_columns: Vec<Locator>,
    rows: <<D::Connection as DriverConnection>::Statement as DriverStatement>::Rows,
    /// Keeps the prepared statement (and, through it, the cache entry) alive
    /// for at least as long as `rows` is read from.
    _stmt: CachedStatement<D>,
    /// One row of lookahead, used by [`RowIter::has_more`] to detect a
    /// second row without requiring scan destinations for it.
    pending: Option<Vec<Value>>,
    finished: bool,
}

impl<D: Driver> RowIter<D> {
    fn pull(&mut self) -> Result<Option<Vec<Value>>> {
        if let Some(row) = self.pending.take() {
            return Ok(Some(row));
        }
        if self.finished {
            return Ok(None);
        }
        match self.rows.next().map_err(|e| Error::driver(DriverPhase::Scan, DriverStringError(e)))? {
            Some(row) => Ok(Some(row)),
            None => {
                self.finished = true;
                Ok(None)
            }
        }
    }

    /// Scan the next row into `targets`, returning `false` once exhausted
    /// (spec.md §4.2: "scan proxies fire in column order after a successful
    /// row scan, committing values into caller destinations").
    pub fn next(&mut self, targets: &mut ScanTargets<'_>) -> Result<bool> {
        let row = match self.pull()? {
            Some(row) => row,
            None => return Ok(false),
        };

        for (locator, value) in self.output_columns.iter().zip(row.into_iter()) {
            let dest = targets.targets.get_mut(&locator.type_id()).ok_or_else(|| {
                Error::Value(sqlair_core::error::ValueError::TypeNotSupplied {
                    type_name: locator.type_name().to_string(),
                })
            })?;
            let proxy = locator.locate_scan_target(&mut **dest)?;
            proxy.commit(value)?;
        }
        Ok(true)
    }

    /// Whether another row is available, without scanning it (spec.md §6
    /// "get-one... or \"no rows\" error" needs to detect a *second* row to
    /// reject it, which requires no destinations at all).
    pub fn has_more(&mut self) -> Result<bool> {
        match self.pull()? {
            Some(row) => {
                self.pending = Some(row);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// An in-progress transaction (spec.md §6 "Transaction wrapping:
/// begin/commit/rollback"). Queries run through [`Transaction::query`] go
/// through the driver connection directly rather than the prepared-statement
/// cache, consulting the cache only for opportunistic reuse (spec.md §4.6
/// "Transactions").
pub struct Transaction<'a, D: Driver> {
    db: &'a Database<D>,
    finished: bool,
}

impl<'a, D: Driver> Transaction<'a, D> {
    pub fn query<'b>(&'b self, statement: &'b Statement<D>) -> Query<'b, D> {
        Query { db: self.db, statement, in_transaction: true, args: Arguments::new() }
    }

    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.db.handle.commit().map_err(|e| Error::driver(DriverPhase::Commit, DriverStringError(e)))
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.db.handle.rollback().map_err(|e| Error::driver(DriverPhase::Rollback, DriverStringError(e)))
    }
}

impl<'a, D: Driver> Drop for Transaction<'a, D> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.db.handle.rollback();
        }
    }
}
