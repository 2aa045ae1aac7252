//! SQL expressions for query building.
//!
//! Expressions render to PostgreSQL with `$n` placeholders. Every value,
//! LIKE pattern and JSON key is bound as a parameter; only identifiers are
//! spliced into the SQL text, and those are always quoted.

use crate::clause::{OrderBy, OrderDirection};
use crate::select::SelectQuery;
use relmap_core::Value;

/// Quote a SQL identifier using ANSI double-quoting.
///
/// A dotted name such as `schema.table` is quoted part by part. Embedded
/// double-quotes are doubled, so any input is safe to splice.
///
/// ```
/// use relmap_query::quote_ident;
///
/// assert_eq!(quote_ident("users"), "\"users\"");
/// assert_eq!(quote_ident("public.users"), "\"public\".\"users\"");
/// assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
/// ```
pub fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

/// Quote `table.column`, or just `column` when `table` is empty.
pub fn quote_qualified(table: &str, column: &str) -> String {
    if table.is_empty() {
        quote_ident(column)
    } else {
        format!("{}.{}", quote_ident(table), quote_ident(column))
    }
}

/// Placeholder for the parameter at 1-based `index`.
pub fn placeholder(index: usize) -> String {
    format!("${index}")
}

/// Escape LIKE wildcards so `text` matches literally.
///
/// PostgreSQL's default LIKE escape character is backslash.
pub fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// A SQL expression that can be used in WHERE, ORDER BY, SET, etc.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Column reference with optional table qualifier
    Column {
        table: Option<String>,
        name: String,
    },

    /// Bound value
    Literal(Value),

    /// Binary operation (e.g., a = b, a AND b)
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },

    /// NOT expr
    Not(Box<Expr>),

    /// IN list
    In { expr: Box<Expr>, values: Vec<Expr> },

    /// `expr = ANY($n)` with an array parameter
    Any { expr: Box<Expr>, array: Value },

    /// IS NULL / IS NOT NULL
    IsNull { expr: Box<Expr>, negated: bool },

    /// LIKE / ILIKE pattern (pattern is bound)
    Like {
        expr: Box<Expr>,
        pattern: String,
        negated: bool,
        case_insensitive: bool,
    },

    /// JSON key extracted as text: `expr ->> $n`
    JsonText { expr: Box<Expr>, key: String },

    /// Function call, e.g. `unaccent(col)`
    Function { name: String, args: Vec<Expr> },

    /// EXISTS / NOT EXISTS (subquery)
    Exists {
        query: Box<SelectQuery>,
        negated: bool,
    },

    /// Raw SQL fragment (escape hatch)
    Raw(String),

    /// Parenthesized expression
    Paren(Box<Expr>),
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    /// Get the SQL representation of this operator.
    pub const fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }
}

impl Expr {
    // ==================== Constructors ====================

    /// Create a column reference expression.
    pub fn col(name: impl Into<String>) -> Self {
        Expr::Column {
            table: None,
            name: name.into(),
        }
    }

    /// Create a qualified column reference (table.column).
    pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> Self {
        Expr::Column {
            table: Some(table.into()),
            name: column.into(),
        }
    }

    /// Create a bound value expression.
    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    /// Create a raw SQL expression (escape hatch).
    pub fn raw(sql: impl Into<String>) -> Self {
        Expr::Raw(sql.into())
    }

    /// Function call.
    pub fn function(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Function {
            name: name.into(),
            args,
        }
    }

    /// EXISTS (subquery)
    pub fn exists(query: SelectQuery) -> Self {
        Expr::Exists {
            query: Box::new(query),
            negated: false,
        }
    }

    /// NOT EXISTS (subquery)
    pub fn not_exists(query: SelectQuery) -> Self {
        Expr::Exists {
            query: Box::new(query),
            negated: true,
        }
    }

    // ==================== Comparison Operators ====================

    fn binary(self, op: BinaryOp, other: impl Into<Expr>) -> Self {
        Expr::Binary {
            left: Box::new(self),
            op,
            right: Box::new(other.into()),
        }
    }

    /// Equal to (=)
    pub fn eq(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Eq, other)
    }

    /// Not equal to (<>)
    pub fn ne(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ne, other)
    }

    /// Less than (<)
    pub fn lt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Lt, other)
    }

    /// Less than or equal (<=)
    pub fn le(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Le, other)
    }

    /// Greater than (>)
    pub fn gt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Gt, other)
    }

    /// Greater than or equal (>=)
    pub fn ge(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ge, other)
    }

    // ==================== Logical Operators ====================

    /// Logical AND
    pub fn and(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::And, other)
    }

    /// Logical OR
    pub fn or(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Or, other)
    }

    /// Logical NOT
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// OR together `exprs`; two or more are parenthesized.
    /// `None` when `exprs` is empty.
    pub fn any_of(exprs: impl IntoIterator<Item = Expr>) -> Option<Self> {
        Self::combine(exprs, |a, b| a.or(b))
    }

    /// AND together `exprs`; two or more are parenthesized.
    /// `None` when `exprs` is empty.
    pub fn all_of(exprs: impl IntoIterator<Item = Expr>) -> Option<Self> {
        Self::combine(exprs, |a, b| a.and(b))
    }

    fn combine(
        exprs: impl IntoIterator<Item = Expr>,
        join: impl Fn(Expr, Expr) -> Expr,
    ) -> Option<Self> {
        let mut iter = exprs.into_iter();
        let first = iter.next()?;
        match iter.next() {
            None => Some(first),
            Some(second) => Some(iter.fold(join(first, second), join).paren()),
        }
    }

    // ==================== Null Checks ====================

    /// IS NULL
    pub fn is_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    /// IS NOT NULL
    pub fn is_not_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    // ==================== Pattern Matching ====================

    /// LIKE pattern match
    pub fn like(self, pattern: impl Into<String>) -> Self {
        Expr::Like {
            expr: Box::new(self),
            pattern: pattern.into(),
            negated: false,
            case_insensitive: false,
        }
    }

    /// ILIKE (case-insensitive) pattern match
    pub fn ilike(self, pattern: impl Into<String>) -> Self {
        Expr::Like {
            expr: Box::new(self),
            pattern: pattern.into(),
            negated: false,
            case_insensitive: true,
        }
    }

    /// Case-insensitive substring match with `text` taken literally.
    ///
    /// ```ignore
    /// Expr::col("name").icontains("50%")
    /// // Generates: "name" ILIKE $1   with $1 = '%50\%%'
    /// ```
    pub fn icontains(self, text: &str) -> Self {
        self.ilike(format!("%{}%", escape_like(text)))
    }

    // ==================== Sets ====================

    /// IN list of values
    pub fn in_list(self, values: Vec<impl Into<Expr>>) -> Self {
        if values.is_empty() {
            return Expr::raw("1 = 0");
        }
        Expr::In {
            expr: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// `expr = ANY($n)` binding `values` as one array parameter.
    pub fn eq_any(self, values: impl Into<Value>) -> Self {
        Expr::Any {
            expr: Box::new(self),
            array: values.into(),
        }
    }

    // ==================== JSON ====================

    /// Extract a JSON key as text (`->>`), binding the key.
    pub fn json_text(self, key: impl Into<String>) -> Self {
        Expr::JsonText {
            expr: Box::new(self),
            key: key.into(),
        }
    }

    // ==================== Utility ====================

    /// Wrap expression in parentheses.
    pub fn paren(self) -> Self {
        Expr::Paren(Box::new(self))
    }

    // ==================== Ordering ====================

    /// Create an ascending ORDER BY expression.
    pub fn asc(self) -> OrderBy {
        OrderBy::new(self, OrderDirection::Asc)
    }

    /// Create a descending ORDER BY expression.
    pub fn desc(self) -> OrderBy {
        OrderBy::new(self, OrderDirection::Desc)
    }

    // ==================== SQL Generation ====================

    /// Build SQL, appending bound values to `params`.
    ///
    /// Placeholders are numbered `offset + params.len()`, so `offset` is the
    /// number of parameters already bound before `params` starts.
    pub fn build(&self, params: &mut Vec<Value>, offset: usize) -> String {
        match self {
            Expr::Column { table, name } => match table {
                Some(t) => quote_qualified(t, name),
                None => quote_ident(name),
            },

            Expr::Literal(value) => {
                params.push(value.clone());
                placeholder(offset + params.len())
            }

            Expr::Binary { left, op, right } => {
                let left_sql = left.build_operand(*op, params, offset);
                let right_sql = right.build_operand(*op, params, offset);
                format!("{left_sql} {} {right_sql}", op.as_str())
            }

            Expr::Not(expr) => format!("NOT {}", expr.build(params, offset)),

            Expr::In { expr, values } => {
                let expr_sql = expr.build(params, offset);
                let value_sqls: Vec<_> = values.iter().map(|v| v.build(params, offset)).collect();
                format!("{expr_sql} IN ({})", value_sqls.join(", "))
            }

            Expr::Any { expr, array } => {
                let expr_sql = expr.build(params, offset);
                params.push(array.clone());
                format!("{expr_sql} = ANY({})", placeholder(offset + params.len()))
            }

            Expr::IsNull { expr, negated } => {
                let expr_sql = expr.build(params, offset);
                let not_str = if *negated { " NOT" } else { "" };
                format!("{expr_sql} IS{not_str} NULL")
            }

            Expr::Like {
                expr,
                pattern,
                negated,
                case_insensitive,
            } => {
                let expr_sql = expr.build(params, offset);
                params.push(Value::Text(pattern.clone()));
                let param = placeholder(offset + params.len());
                let not_str = if *negated { "NOT " } else { "" };
                let op = if *case_insensitive { "ILIKE" } else { "LIKE" };
                format!("{expr_sql} {not_str}{op} {param}")
            }

            Expr::JsonText { expr, key } => {
                let expr_sql = expr.build(params, offset);
                params.push(Value::Text(key.clone()));
                format!("{expr_sql} ->> {}", placeholder(offset + params.len()))
            }

            Expr::Function { name, args } => {
                let arg_sqls: Vec<_> = args.iter().map(|a| a.build(params, offset)).collect();
                format!("{name}({})", arg_sqls.join(", "))
            }

            Expr::Exists { query, negated } => {
                let sub_sql = query.build_into(params, offset);
                let not_str = if *negated { "NOT " } else { "" };
                format!("{not_str}EXISTS ({sub_sql})")
            }

            Expr::Raw(sql) => sql.clone(),

            Expr::Paren(expr) => format!("({})", expr.build(params, offset)),
        }
    }

    /// Build an operand of `parent`, parenthesizing an OR under an AND.
    fn build_operand(&self, parent: BinaryOp, params: &mut Vec<Value>, offset: usize) -> String {
        let sql = self.build(params, offset);
        match self {
            Expr::Binary {
                op: BinaryOp::Or, ..
            } if parent == BinaryOp::And => format!("({sql})"),
            _ => sql,
        }
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::Literal(value)
    }
}

impl From<i64> for Expr {
    fn from(v: i64) -> Self {
        Expr::Literal(Value::BigInt(v))
    }
}

impl From<i32> for Expr {
    fn from(v: i32) -> Self {
        Expr::Literal(Value::Int(v))
    }
}

impl From<bool> for Expr {
    fn from(v: bool) -> Self {
        Expr::Literal(Value::Bool(v))
    }
}

impl From<&str> for Expr {
    fn from(v: &str) -> Self {
        Expr::Literal(Value::Text(v.to_string()))
    }
}

impl From<String> for Expr {
    fn from(v: String) -> Self {
        Expr::Literal(Value::Text(v))
    }
}
