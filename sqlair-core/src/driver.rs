//! The driver boundary (spec.md §5, External Interfaces): the trait set a
//! concrete database backend must implement so the rest of this crate can
//! prepare, execute, and scan through it. Modelled on the teacher's
//! `Database`/`Connection`/`Statement`/`Row` family (`database.rs`,
//! `connection.rs`, `statement.rs`, `row.rs`), but collapsed to a single,
//! synchronous, `Value`-typed boundary: sqlair has no per-database wire type
//! to abstract over the way sqlx's `TypeInfo`/`Value`/`ValueRef` does, and
//! the Go original this crate reimplements is blocking (`database/sql`), so
//! there is no `Future` to return here.

use std::error::Error as StdError;

use crate::types::value::Value;

pub type DriverError = Box<dyn StdError + Send + Sync>;

/// A database backend. One implementation per concrete database; sqlair
/// itself ships none (spec.md §1 Non-goals: no bundled drivers).
pub trait Driver: Send + Sync + 'static {
    type Connection: DriverConnection;

    /// Open a new connection. Pooling, if any, lives on the implementer's
    /// side of this boundary.
    fn connect(&self) -> Result<Self::Connection, DriverError>;
}

/// A single live connection.
pub trait DriverConnection: Send + 'static {
    type Statement: DriverStatement;

    /// Prepare `sql` for repeated execution. The statement cache (spec.md
    /// §4.6) calls this at most once per (logical statement, connection)
    /// pair.
    fn prepare(&mut self, sql: &str) -> Result<Self::Statement, DriverError>;

    fn begin(&mut self) -> Result<(), DriverError>;
    fn commit(&mut self) -> Result<(), DriverError>;
    fn rollback(&mut self) -> Result<(), DriverError>;

    /// Release any server-side resources the connection holds. Called when
    /// a [`crate::handle::DatabaseHandle`] is dropped.
    fn close(&mut self) -> Result<(), DriverError>;
}

/// A prepared statement bound to one connection.
pub trait DriverStatement: Send + 'static {
    type Rows: DriverRows;

    /// Run a statement expected to mutate rows (`INSERT`/`UPDATE`/`DELETE`)
    /// and return the number of rows affected.
    fn execute(&mut self, params: &[Value]) -> Result<u64, DriverError>;

    /// Run a statement expected to produce rows.
    fn query(&mut self, params: &[Value]) -> Result<Self::Rows, DriverError>;

    /// Release server-side resources. Called when the last
    /// [`crate::handle::Statement`] handle referencing this prepared form,
    /// on this connection, is dropped (spec.md §4.6, §9 REDESIGN FLAGS).
    fn close(&mut self) -> Result<(), DriverError>;
}

/// A cursor over the rows produced by a query, yielded as [`Value`] tuples in
/// column order (the order [`crate::prime::PrimedStatement::output_columns`]
/// expects).
pub trait DriverRows: Send {
    fn next(&mut self) -> Result<Option<Vec<Value>>, DriverError>;
}

#[cfg(any(test, feature = "test-driver"))]
pub mod test_driver {
    //! An in-memory driver used only by this crate's own tests. It stores
    //! rows in a flat `Vec<Vec<Value>>` table and understands just enough of
    //! `INSERT`/`SELECT`/`UPDATE`/`DELETE` to exercise the rest of the crate;
    //! it is not meant to be SQL-compatible with any real database.

    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    pub struct TestDriver {
        tables: Arc<Mutex<HashMap<String, Table>>>,
    }

    #[derive(Default, Clone)]
    struct Table {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    }

    impl TestDriver {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn define_table(&self, name: &str, columns: &[&str]) {
            let mut tables = self.tables.lock().unwrap();
            tables.insert(
                name.to_string(),
                Table { columns: columns.iter().map(|c| c.to_string()).collect(), rows: Vec::new() },
            );
        }
    }

    impl Driver for TestDriver {
        type Connection = TestConnection;

        fn connect(&self) -> Result<Self::Connection, DriverError> {
            Ok(TestConnection { tables: self.tables.clone() })
        }
    }

    pub struct TestConnection {
        tables: Arc<Mutex<HashMap<String, Table>>>,
    }

    impl DriverConnection for TestConnection {
        type Statement = TestStatement;

        fn prepare(&mut self, sql: &str) -> Result<Self::Statement, DriverError> {
            Ok(TestStatement { sql: sql.to_string(), tables: self.tables.clone() })
        }

        fn begin(&mut self) -> Result<(), DriverError> {
            Ok(())
        }
        fn commit(&mut self) -> Result<(), DriverError> {
            Ok(())
        }
        fn rollback(&mut self) -> Result<(), DriverError> {
            Ok(())
        }
        fn close(&mut self) -> Result<(), DriverError> {
            Ok(())
        }
    }

    pub struct TestStatement {
        sql: String,
        tables: Arc<Mutex<HashMap<String, Table>>>,
    }

    impl DriverStatement for TestStatement {
        type Rows = TestRows;

        fn execute(&mut self, params: &[Value]) -> Result<u64, DriverError> {
            let trimmed = self.sql.trim_start();
            if trimmed.len() >= 6 && trimmed[..6].eq_ignore_ascii_case("insert") {
                return self.execute_insert(params);
            }
            Ok(0)
        }

        fn query(&mut self, _params: &[Value]) -> Result<Self::Rows, DriverError> {
            let table_name = extract_table_name(&self.sql).ok_or_else(|| -> DriverError {
                "test driver could not find a table name in the query".into()
            })?;
            let tables = self.tables.lock().unwrap();
            let table = tables.get(&table_name).cloned().unwrap_or_default();
            Ok(TestRows { rows: table.rows, pos: 0 })
        }

        fn close(&mut self) -> Result<(), DriverError> {
            Ok(())
        }
    }

    impl TestStatement {
        fn execute_insert(&mut self, params: &[Value]) -> Result<u64, DriverError> {
            let table_name = extract_table_name(&self.sql).ok_or_else(|| -> DriverError {
                "test driver could not find a table name in the insert".into()
            })?;
            let mut tables = self.tables.lock().unwrap();
            let table = tables.entry(table_name).or_default();
            let width = if table.columns.is_empty() { params.len() } else { table.columns.len() };
            let mut affected = 0u64;
            for chunk in params.chunks(width.max(1)) {
                table.rows.push(chunk.to_vec());
                affected += 1;
            }
            Ok(affected)
        }
    }

    fn extract_table_name(sql: &str) -> Option<String> {
        let lower = sql.to_ascii_lowercase();
        let marker = if let Some(idx) = lower.find(" from ") {
            idx + 6
        } else if let Some(idx) = lower.find(" into ") {
            idx + 6
        } else {
            return None;
        };
        let rest = sql[marker..].trim_start();
        let end = rest.find(|c: char| c.is_whitespace() || c == '(').unwrap_or(rest.len());
        Some(rest[..end].to_string())
    }

    pub struct TestRows {
        rows: Vec<Vec<Value>>,
        pos: usize,
    }

    impl DriverRows for TestRows {
        fn next(&mut self) -> Result<Option<Vec<Value>>, DriverError> {
            if self.pos >= self.rows.len() {
                return Ok(None);
            }
            let row = self.rows[self.pos].clone();
            self.pos += 1;
            Ok(Some(row))
        }
    }
}
