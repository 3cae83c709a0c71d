// ============================================================================
// Statement execution against a set of tables
// ============================================================================
//
// Pure functions over `Tables`; locking, snapshots and sessions are the
// store's business. A write statement either applies completely or leaves
// the tables untouched.
//
// ============================================================================

use super::table::Table;
use crate::core::{Column, DbError, Result, Row, Schema, Value};
use crate::parser::ast::*;
use crate::result::QueryResult;
use std::cmp::Ordering;
use std::collections::HashSet;

pub type Tables = im::HashMap<String, Table>;

/// Row being evaluated and the table it belongs to.
struct Scope<'a> {
    table: &'a str,
    schema: Option<&'a Schema>,
    row: &'a [Value],
}

/// Scope for expressions that may only use literals.
const NO_ROW: Scope<'static> = Scope {
    table: "",
    schema: None,
    row: &[],
};

impl Scope<'_> {
    fn column(&self, name: &str) -> Result<&Value> {
        self.schema
            .and_then(|schema| schema.find_column_index(name))
            .and_then(|idx| self.row.get(idx))
            .ok_or_else(|| DbError::ColumnNotFound(name.to_string(), self.table.to_string()))
    }
}

fn eval(expr: &Expr, scope: &Scope<'_>) -> Result<Value> {
    match expr {
        Expr::Column(name) => scope.column(name).cloned(),
        Expr::Literal(value) => Ok(value.clone()),
        Expr::IsNull { expr, negated } => {
            let is_null = eval(expr, scope)?.is_null();
            Ok(Value::Boolean(is_null != *negated))
        }
        Expr::Not(inner) => match eval(inner, scope)? {
            Value::Null => Ok(Value::Null),
            value => Ok(Value::Boolean(!value.as_bool())),
        },
        Expr::Negate(inner) => match eval(inner, scope)? {
            Value::Null => Ok(Value::Null),
            Value::Integer(i) => i
                .checked_neg()
                .map(Value::Integer)
                .ok_or_else(|| DbError::ExecutionError(format!("Integer overflow in -{}", i))),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(DbError::TypeMismatch(format!("Cannot negate {}", other.type_name()))),
        },
        Expr::BinaryOp { left, op, right } => {
            let lhs = eval(left, scope)?;
            let rhs = eval(right, scope)?;
            eval_binary(&lhs, *op, &rhs)
        }
    }
}

fn eval_binary(lhs: &Value, op: BinaryOp, rhs: &Value) -> Result<Value> {
    let ordering = |accept: fn(Ordering) -> bool| -> Result<Value> {
        if lhs.is_null() || rhs.is_null() {
            return Ok(Value::Null);
        }
        Ok(Value::Boolean(accept(lhs.compare(rhs)?)))
    };

    match op {
        BinaryOp::Add => lhs.add(rhs),
        BinaryOp::Subtract => lhs.subtract(rhs),
        BinaryOp::Eq => ordering(Ordering::is_eq),
        BinaryOp::NotEq => ordering(Ordering::is_ne),
        BinaryOp::Lt => ordering(Ordering::is_lt),
        BinaryOp::LtEq => ordering(Ordering::is_le),
        BinaryOp::Gt => ordering(Ordering::is_gt),
        BinaryOp::GtEq => ordering(Ordering::is_ge),
        BinaryOp::And => Ok(Value::Boolean(lhs.as_bool() && rhs.as_bool())),
        BinaryOp::Or => Ok(Value::Boolean(lhs.as_bool() || rhs.as_bool())),
    }
}

fn scope<'a>(table: &'a str, schema: Option<&'a Schema>, row: &'a [Value]) -> Scope<'a> {
    Scope { table, schema, row }
}

fn matches(selection: Option<&Expr>, scope: &Scope<'_>) -> Result<bool> {
    match selection {
        Some(expr) => Ok(eval(expr, scope)?.as_bool()),
        None => Ok(true),
    }
}

fn lookup<'t>(tables: &'t Tables, name: &str) -> Result<&'t Table> {
    tables.get(name).ok_or_else(|| DbError::TableNotFound(name.to_string()))
}

/// Run a write or DDL statement. SELECT goes through [`query`].
pub fn execute(tables: &mut Tables, stmt: Statement) -> Result<QueryResult> {
    match stmt {
        Statement::CreateTable(create) => create_table(tables, create),
        Statement::DropTable(drop) => drop_table(tables, drop),
        Statement::Insert(insert) => insert_rows(tables, insert),
        Statement::Update(update) => update_rows(tables, update),
        Statement::Delete(delete) => delete_rows(tables, delete),
        Statement::Select(select) => query(tables, &select),
    }
}

fn create_table(tables: &mut Tables, create: CreateTableStmt) -> Result<QueryResult> {
    if tables.contains_key(&create.table_name) {
        if create.if_not_exists {
            return Ok(QueryResult::empty());
        }
        return Err(DbError::TableExists(create.table_name));
    }

    let mut seen = HashSet::new();
    for column in &create.columns {
        if !seen.insert(column.name.to_ascii_lowercase()) {
            return Err(DbError::ExecutionError(format!(
                "Duplicate column '{}' in table '{}'",
                column.name, create.table_name
            )));
        }
    }

    let table = Table::new(create.table_name.clone(), Schema::new(create.columns));
    tables.insert(create.table_name, table);
    Ok(QueryResult::empty())
}

fn drop_table(tables: &mut Tables, drop: DropTableStmt) -> Result<QueryResult> {
    if tables.remove(&drop.table_name).is_none() && !drop.if_exists {
        return Err(DbError::TableNotFound(drop.table_name));
    }
    Ok(QueryResult::empty())
}

fn insert_rows(tables: &mut Tables, insert: InsertStmt) -> Result<QueryResult> {
    let mut table = lookup(tables, &insert.table_name)?.clone();
    let columns: &[Column] = table.schema().columns();

    // Position in the stored row for each supplied value.
    let targets: Vec<usize> = match &insert.columns {
        Some(names) => names
            .iter()
            .map(|name| {
                table
                    .schema()
                    .find_column_index(name)
                    .ok_or_else(|| DbError::ColumnNotFound(name.clone(), insert.table_name.clone()))
            })
            .collect::<Result<_>>()?,
        None => (0..columns.len()).collect(),
    };
    let width = columns.len();

    let mut inserted = 0;
    for exprs in &insert.values {
        if exprs.len() != targets.len() {
            return Err(DbError::ExecutionError(format!(
                "INSERT into '{}' has {} target column(s) but {} value(s)",
                insert.table_name,
                targets.len(),
                exprs.len()
            )));
        }

        let mut row: Row = vec![Value::Null; width];
        for (target, expr) in targets.iter().zip(exprs) {
            row[*target] = eval(expr, &NO_ROW)?;
        }
        table.insert(row)?;
        inserted += 1;
    }

    tables.insert(insert.table_name, table);
    Ok(QueryResult::affected(inserted))
}

fn update_rows(tables: &mut Tables, update: UpdateStmt) -> Result<QueryResult> {
    let mut table = lookup(tables, &update.table_name)?.clone();

    let assignments = update
        .assignments
        .iter()
        .map(|assign| {
            table
                .schema()
                .find_column_index(&assign.column)
                .map(|idx| (idx, &assign.value))
                .ok_or_else(|| DbError::ColumnNotFound(assign.column.clone(), update.table_name.clone()))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut changes = Vec::new();
    for (index, row) in table.rows().enumerate() {
        let scope = Scope {
            table: &update.table_name,
            schema: Some(table.schema()),
            row,
        };
        if !matches(update.selection.as_ref(), &scope)? {
            continue;
        }

        let mut new_row = row.clone();
        for (idx, expr) in &assignments {
            new_row[*idx] = eval(expr, &scope)?;
        }
        changes.push((index, new_row));
    }

    let updated = changes.len() as u64;
    for (index, row) in changes {
        table.replace(index, row)?;
    }

    tables.insert(update.table_name, table);
    Ok(QueryResult::affected(updated))
}

fn delete_rows(tables: &mut Tables, delete: DeleteStmt) -> Result<QueryResult> {
    let mut table = lookup(tables, &delete.table_name)?.clone();
    let schema = table.schema().clone();

    let removed = table.retain(|row| {
        let scope = Scope {
            table: &delete.table_name,
            schema: Some(&schema),
            row,
        };
        Ok(!matches(delete.selection.as_ref(), &scope)?)
    })?;

    tables.insert(delete.table_name, table);
    Ok(QueryResult::affected(removed as u64))
}

/// Run a SELECT.
pub fn query(tables: &Tables, select: &SelectStmt) -> Result<QueryResult> {
    let source = select.from.as_deref().map(|name| lookup(tables, name)).transpose()?;
    let table_name = select.from.as_deref().unwrap_or_default();
    let schema = source.map(|t| t.schema());

    let empty_row: Row = Vec::new();
    let candidates: Vec<&Row> = match source {
        Some(t) => t.rows().collect(),
        None => vec![&empty_row],
    };

    let mut filtered = Vec::new();
    for row in candidates {
        if matches(select.selection.as_ref(), &scope(table_name, schema, row))? {
            filtered.push(row);
        }
    }

    if select.is_count() {
        let columns = select
            .projection
            .iter()
            .map(|item| match item {
                SelectItem::CountAll { label } => label.clone(),
                _ => String::new(),
            })
            .collect::<Vec<_>>();
        let count = Value::Integer(filtered.len() as i64);
        let row = vec![count; columns.len()];
        let rows = paginate(vec![row], select)?;
        return Ok(QueryResult::new(columns, rows));
    }

    if !select.order_by.is_empty() {
        let mut keyed = filtered
            .into_iter()
            .map(|row| {
                let keys = select
                    .order_by
                    .iter()
                    .map(|order| eval(&order.expr, &scope(table_name, schema, row)))
                    .collect::<Result<Vec<_>>>()?;
                Ok((keys, row))
            })
            .collect::<Result<Vec<_>>>()?;

        keyed.sort_by(|(a, _), (b, _)| {
            for ((x, y), order) in a.iter().zip(b).zip(&select.order_by) {
                let ord = x.compare(y).unwrap_or(Ordering::Equal);
                let ord = if order.descending { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        filtered = keyed.into_iter().map(|(_, row)| row).collect();
    }

    let filtered = paginate(filtered, select)?;

    let mut columns = Vec::new();
    for item in &select.projection {
        match item {
            SelectItem::Wildcard => {
                let schema = schema.ok_or_else(|| DbError::ParseError("SELECT * requires a FROM clause".into()))?;
                columns.extend(schema.column_names());
            }
            SelectItem::Expr { label, .. } => columns.push(label.clone()),
            SelectItem::CountAll { .. } => {
                return Err(DbError::UnsupportedOperation(
                    "COUNT(*) cannot be mixed with other columns".into(),
                ));
            }
        }
    }

    let mut rows = Vec::with_capacity(filtered.len());
    for row in filtered {
        let scope = scope(table_name, schema, row);
        let mut out = Vec::with_capacity(columns.len());
        for item in &select.projection {
            match item {
                SelectItem::Wildcard => out.extend(row.iter().cloned()),
                SelectItem::Expr { expr, .. } => out.push(eval(expr, &scope)?),
                SelectItem::CountAll { .. } => {}
            }
        }
        rows.push(out);
    }

    Ok(QueryResult::new(columns, rows))
}

fn paginate<T>(rows: Vec<T>, select: &SelectStmt) -> Result<Vec<T>> {
    let bound = |expr: Option<&Expr>, what: &str| -> Result<Option<usize>> {
        let Some(expr) = expr else {
            return Ok(None);
        };
        let value = eval(expr, &NO_ROW)?;
        value
            .as_i64()
            .and_then(|n| usize::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| DbError::InvalidArgument(format!("{} must be a non-negative integer, got {}", what, value)))
    };

    let offset = bound(select.offset.as_ref(), "OFFSET")?.unwrap_or(0);
    let limit = bound(select.limit.as_ref(), "LIMIT")?.unwrap_or(usize::MAX);

    Ok(rows.into_iter().skip(offset).take(limit).collect())
}
