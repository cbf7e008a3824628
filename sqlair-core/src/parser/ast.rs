//! AST node types (spec.md §3).

/// A qualified reference `Type.col` or `Type.*` appearing on either side of
/// an I/O expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeColumnRef {
    pub type_name: String,
    pub column: ColumnRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRef {
    Named(String),
    Star,
}

/// One column on the source side of an output expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceColumn {
    /// `col` or `t.col`.
    Named { qualifier: Option<String>, name: String },
    /// `t.*`: project every catalogue member of the paired type, qualified.
    QualifiedStar { qualifier: String },
}

/// `&Type.col`, `&Type.*`, `&(Type.col1, Type.col2)`, or the `AS` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputExpr {
    /// Empty for the bare `&...` form; non-empty for the `... AS &...` form.
    pub sources: Vec<SourceColumn>,
    pub targets: Vec<TypeColumnRef>,
}

/// One element of an insert-values column list: either a plain SQL column
/// name or the literal `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertColumns {
    Explicit(Vec<String>),
    Star,
}

/// One reference inside the `VALUES (...)` list of an insert-values
/// expression: `$T.col` or `$T.*`. Whether the `*` form means "all of a
/// record's columns" or "the rest of a mapping's keys" is resolved by the
/// type-bound stage (spec.md §4.4), not the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertRef {
    Member { type_name: String, column: String },
    Star { type_name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertValuesExpr {
    pub columns: InsertColumns,
    pub refs: Vec<InsertRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputExpr {
    /// `$Type.col`
    Member { type_name: String, column: String },
    /// `$Type[:]`
    WholeSequence { type_name: String },
    /// `(cols) VALUES ($T.col, $T.*, ...)`
    InsertValues(InsertValuesExpr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    PassThrough,
    Output(OutputExpr),
    Input(InputExpr),
}

/// One element of the parsed source (spec.md §3): `raw` is the exact
/// substring of the source this node spans, so that concatenating every
/// node's `raw` reproduces the input verbatim (spec.md §3 invariant, §8
/// round-trip law).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub raw: String,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ast {
    pub nodes: Vec<Node>,
}

impl Ast {
    /// Concatenate every node's raw text; equals the original source
    /// string by construction (spec.md §3, §8).
    pub fn render(&self) -> String {
        self.nodes.iter().map(|n| n.raw.as_str()).collect()
    }
}
