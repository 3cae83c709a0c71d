// ============================================================================
// src/parser/adapter.rs - sqlparser AST to the store's statement tree
// ============================================================================

use crate::core::{Column, DataType, DbError, Result, Value};
use crate::parser::ast::*;
use sqlparser::ast as sql_ast;
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;

pub struct SqlParserAdapter {
    dialect: MySqlDialect,
}

/// Hands out bound parameters to `?` placeholders in textual order.
struct Binder<'p> {
    params: &'p [Value],
    next: usize,
}

impl Binder<'_> {
    fn bind(&mut self, placeholder: &str) -> Result<Value> {
        let index = match placeholder.strip_prefix('$') {
            Some(n) => n
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .ok_or_else(|| DbError::ParseError(format!("Invalid placeholder: {}", placeholder)))?,
            None => self.next,
        };
        self.next = self.next.max(index + 1);

        self.params.get(index).cloned().ok_or_else(|| {
            DbError::InvalidArgument(format!(
                "Statement expects more than {} parameter(s)",
                self.params.len()
            ))
        })
    }

    fn finish(&self) -> Result<()> {
        if self.next != self.params.len() {
            return Err(DbError::InvalidArgument(format!(
                "Statement has {} placeholder(s) but {} parameter(s) were supplied",
                self.next,
                self.params.len()
            )));
        }
        Ok(())
    }
}

impl SqlParserAdapter {
    pub fn new() -> Self {
        Self { dialect: MySqlDialect {} }
    }

    /// Parse exactly one statement and bind `params` to its placeholders.
    pub fn parse(&self, sql: &str, params: &[Value]) -> Result<Statement> {
        let trimmed = sql.trim().trim_end_matches(';').trim().to_uppercase();
        if ["BEGIN", "START TRANSACTION", "COMMIT", "ROLLBACK"]
            .iter()
            .any(|kw| trimmed.starts_with(kw))
        {
            return Err(DbError::UnsupportedOperation(
                "Transaction control statements must go through the connection API".into(),
            ));
        }

        let mut statements =
            Parser::parse_sql(&self.dialect, sql).map_err(|e| DbError::ParseError(e.to_string()))?;

        let stmt = match statements.len() {
            0 => return Err(DbError::ParseError("Empty statement".into())),
            1 => statements.remove(0),
            n => {
                return Err(DbError::UnsupportedOperation(format!(
                    "Expected one statement, got {}",
                    n
                )));
            }
        };

        let mut binder = Binder { params, next: 0 };
        let converted = self.convert_statement(stmt, &mut binder)?;
        binder.finish()?;
        Ok(converted)
    }

    fn convert_statement(&self, stmt: sql_ast::Statement, binder: &mut Binder<'_>) -> Result<Statement> {
        match stmt {
            sql_ast::Statement::CreateTable(create) => Ok(Statement::CreateTable(self.convert_create_table(create)?)),
            sql_ast::Statement::Drop {
                object_type,
                names,
                if_exists,
                ..
            } => {
                if let sql_ast::ObjectType::Table = object_type {
                    Ok(Statement::DropTable(self.convert_drop_table(names, if_exists)?))
                } else {
                    Err(DbError::UnsupportedOperation(format!(
                        "Only DROP TABLE supported, got: {}",
                        object_type
                    )))
                }
            }
            sql_ast::Statement::Insert(insert) => Ok(Statement::Insert(self.convert_insert(insert, binder)?)),
            sql_ast::Statement::Query(query) => Ok(Statement::Select(self.convert_query(*query, binder)?)),
            sql_ast::Statement::Delete(delete) => Ok(Statement::Delete(self.convert_delete(delete, binder)?)),
            sql_ast::Statement::Update {
                table,
                assignments,
                selection,
                ..
            } => Ok(Statement::Update(self.convert_update(table, assignments, selection, binder)?)),
            other => Err(DbError::UnsupportedOperation(format!(
                "Statement type not supported: {}",
                other
            ))),
        }
    }

    fn convert_create_table(&self, create: sql_ast::CreateTable) -> Result<CreateTableStmt> {
        let table_name = extract_table_name(&create.name)?;
        if create.columns.is_empty() {
            return Err(DbError::ParseError(format!("Table '{}' needs at least one column", table_name)));
        }

        let columns = create
            .columns
            .into_iter()
            .map(|col| self.convert_column_def(col))
            .collect::<Result<Vec<_>>>()?;

        Ok(CreateTableStmt {
            table_name,
            columns,
            if_not_exists: create.if_not_exists,
        })
    }

    fn convert_column_def(&self, col: sql_ast::ColumnDef) -> Result<Column> {
        let type_name = col.data_type.to_string();
        let data_type = DataType::from_sql_name(&type_name)
            .ok_or_else(|| DbError::TypeMismatch(format!("Unsupported data type: {}", type_name)))?;

        let mut column = Column::new(col.name.value, data_type);
        for opt in &col.options {
            let option = opt.option.to_string().to_uppercase();
            if option.contains("PRIMARY KEY") {
                column = column.not_null().unique();
            } else if option.contains("NOT NULL") {
                column = column.not_null();
            } else if option.starts_with("UNIQUE") {
                column = column.unique();
            }
        }

        Ok(column)
    }

    fn convert_drop_table(&self, names: Vec<sql_ast::ObjectName>, if_exists: bool) -> Result<DropTableStmt> {
        let [name] = names.as_slice() else {
            return Err(DbError::UnsupportedOperation("Only single table DROP supported".into()));
        };

        Ok(DropTableStmt {
            table_name: extract_table_name(name)?,
            if_exists,
        })
    }

    fn convert_insert(&self, insert: sql_ast::Insert, binder: &mut Binder<'_>) -> Result<InsertStmt> {
        let table_name = unquote(&insert.table.to_string());

        let columns = if insert.columns.is_empty() {
            None
        } else {
            Some(insert.columns.into_iter().map(|id| id.value).collect())
        };

        let Some(source) = insert.source else {
            return Err(DbError::UnsupportedOperation("INSERT requires a VALUES clause".into()));
        };
        let sql_ast::SetExpr::Values(vals) = *source.body else {
            return Err(DbError::UnsupportedOperation("Only VALUES clause supported".into()));
        };

        let values = vals
            .rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|expr| self.convert_expr(expr, binder))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(InsertStmt {
            table_name,
            columns,
            values,
        })
    }

    fn convert_query(&self, query: sql_ast::Query, binder: &mut Binder<'_>) -> Result<SelectStmt> {
        let sql_ast::SetExpr::Select(select) = *query.body else {
            return Err(DbError::UnsupportedOperation("Only SELECT queries supported".into()));
        };

        if select.distinct.is_some() || select.having.is_some() {
            return Err(DbError::UnsupportedOperation("DISTINCT and HAVING are not supported".into()));
        }
        if let sql_ast::GroupByExpr::Expressions(exprs, _) = &select.group_by
            && !exprs.is_empty()
        {
            return Err(DbError::UnsupportedOperation("GROUP BY is not supported".into()));
        }

        let projection = select
            .projection
            .into_iter()
            .map(|item| self.convert_select_item(item, binder))
            .collect::<Result<Vec<_>>>()?;

        let from = match select.from.as_slice() {
            [] => None,
            [table] if table.joins.is_empty() => match &table.relation {
                sql_ast::TableFactor::Table { name, .. } => Some(extract_table_name(name)?),
                _ => {
                    return Err(DbError::UnsupportedOperation(
                        "Complex table references not supported".into(),
                    ));
                }
            },
            _ => return Err(DbError::UnsupportedOperation("Joins are not supported".into())),
        };

        let selection = select
            .selection
            .map(|expr| self.convert_expr(expr, binder))
            .transpose()?;

        let order_by = self.convert_order_by(query.order_by, binder)?;
        let (limit, offset) = self.convert_limit_clause(query.limit_clause, binder)?;

        Ok(SelectStmt {
            projection,
            from,
            selection,
            order_by,
            limit,
            offset,
        })
    }

    fn convert_select_item(&self, item: sql_ast::SelectItem, binder: &mut Binder<'_>) -> Result<SelectItem> {
        match item {
            sql_ast::SelectItem::Wildcard(_) => Ok(SelectItem::Wildcard),
            sql_ast::SelectItem::UnnamedExpr(expr) => {
                if is_count_star(&expr) {
                    return Ok(SelectItem::CountAll {
                        label: "COUNT(*)".into(),
                    });
                }
                let label = match &expr {
                    sql_ast::Expr::Identifier(ident) => ident.value.clone(),
                    other => other.to_string(),
                };
                Ok(SelectItem::Expr {
                    expr: self.convert_expr(expr, binder)?,
                    label,
                })
            }
            sql_ast::SelectItem::ExprWithAlias { expr, alias } => {
                if is_count_star(&expr) {
                    return Ok(SelectItem::CountAll { label: alias.value });
                }
                Ok(SelectItem::Expr {
                    expr: self.convert_expr(expr, binder)?,
                    label: alias.value,
                })
            }
            _ => Err(DbError::UnsupportedOperation("Unsupported select item".into())),
        }
    }

    fn convert_order_by(&self, order_by: Option<sql_ast::OrderBy>, binder: &mut Binder<'_>) -> Result<Vec<OrderByExpr>> {
        let Some(order_by) = order_by else {
            return Ok(Vec::new());
        };

        match order_by.kind {
            sql_ast::OrderByKind::Expressions(exprs) => exprs
                .into_iter()
                .map(|order| {
                    Ok(OrderByExpr {
                        // ASC unless DESC is spelled out
                        descending: order.options.asc == Some(false),
                        expr: self.convert_expr(order.expr, binder)?,
                    })
                })
                .collect(),
            sql_ast::OrderByKind::All(_) => Err(DbError::UnsupportedOperation("ORDER BY ALL not supported".into())),
        }
    }

    fn convert_limit_clause(
        &self,
        limit_clause: Option<sql_ast::LimitClause>,
        binder: &mut Binder<'_>,
    ) -> Result<(Option<Expr>, Option<Expr>)> {
        let Some(clause) = limit_clause else {
            return Ok((None, None));
        };

        match clause {
            sql_ast::LimitClause::LimitOffset { limit, offset, .. } => {
                let limit = limit.map(|expr| self.convert_expr(expr, binder)).transpose()?;
                let offset = offset
                    .map(|offset| self.convert_expr(offset.value, binder))
                    .transpose()?;
                Ok((limit, offset))
            }
            // MySQL style: LIMIT offset, limit
            sql_ast::LimitClause::OffsetCommaLimit { offset, limit } => {
                let offset = self.convert_expr(offset, binder)?;
                let limit = self.convert_expr(limit, binder)?;
                Ok((Some(limit), Some(offset)))
            }
        }
    }

    fn convert_delete(&self, delete: sql_ast::Delete, binder: &mut Binder<'_>) -> Result<DeleteStmt> {
        let tables = match delete.from {
            sql_ast::FromTable::WithFromKeyword(tables) | sql_ast::FromTable::WithoutKeyword(tables) => tables,
        };

        let table_name = match tables.first().map(|t| &t.relation) {
            Some(sql_ast::TableFactor::Table { name, .. }) => extract_table_name(name)?,
            Some(_) => {
                return Err(DbError::UnsupportedOperation(
                    "Complex table references not supported in DELETE".into(),
                ));
            }
            None => return Err(DbError::ParseError("DELETE requires a table name".into())),
        };

        let selection = delete
            .selection
            .map(|expr| self.convert_expr(expr, binder))
            .transpose()?;

        Ok(DeleteStmt {
            table_name,
            selection,
        })
    }

    fn convert_update(
        &self,
        table: sql_ast::TableWithJoins,
        assignments: Vec<sql_ast::Assignment>,
        selection: Option<sql_ast::Expr>,
        binder: &mut Binder<'_>,
    ) -> Result<UpdateStmt> {
        let table_name = match table.relation {
            sql_ast::TableFactor::Table { name, .. } => extract_table_name(&name)?,
            _ => {
                return Err(DbError::UnsupportedOperation(
                    "Complex table references not supported in UPDATE".into(),
                ));
            }
        };

        let assignments = assignments
            .into_iter()
            .map(|assign| {
                let column = match assign.target {
                    sql_ast::AssignmentTarget::ColumnName(col_name) if col_name.0.len() == 1 => {
                        unquote(&col_name.0[0].to_string())
                    }
                    _ => {
                        return Err(DbError::UnsupportedOperation(
                            "Only simple column names supported in UPDATE".into(),
                        ));
                    }
                };

                Ok(Assignment {
                    column,
                    value: self.convert_expr(assign.value, binder)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let selection = selection
            .map(|expr| self.convert_expr(expr, binder))
            .transpose()?;

        Ok(UpdateStmt {
            table_name,
            assignments,
            selection,
        })
    }

    fn convert_expr(&self, expr: sql_ast::Expr, binder: &mut Binder<'_>) -> Result<Expr> {
        match expr {
            sql_ast::Expr::Identifier(ident) => Ok(Expr::Column(ident.value)),
            sql_ast::Expr::CompoundIdentifier(idents) => idents
                .into_iter()
                .last()
                .map(|ident| Expr::Column(ident.value))
                .ok_or_else(|| DbError::ParseError("Empty identifier".into())),
            sql_ast::Expr::Value(val) => match val.value {
                sql_ast::Value::Placeholder(p) => Ok(Expr::Literal(binder.bind(&p)?)),
                other => Ok(Expr::Literal(convert_value(&other)?)),
            },
            sql_ast::Expr::Nested(inner) => self.convert_expr(*inner, binder),
            sql_ast::Expr::IsNull(inner) => Ok(Expr::IsNull {
                expr: Box::new(self.convert_expr(*inner, binder)?),
                negated: false,
            }),
            sql_ast::Expr::IsNotNull(inner) => Ok(Expr::IsNull {
                expr: Box::new(self.convert_expr(*inner, binder)?),
                negated: true,
            }),
            sql_ast::Expr::UnaryOp { op, expr } => {
                let inner = Box::new(self.convert_expr(*expr, binder)?);
                match op {
                    sql_ast::UnaryOperator::Not => Ok(Expr::Not(inner)),
                    sql_ast::UnaryOperator::Minus => Ok(Expr::Negate(inner)),
                    sql_ast::UnaryOperator::Plus => Ok(*inner),
                    other => Err(DbError::UnsupportedOperation(format!("Unsupported operator: {}", other))),
                }
            }
            sql_ast::Expr::BinaryOp { left, op, right } => {
                let left = Box::new(self.convert_expr(*left, binder)?);
                let op = convert_binary_op(&op)?;
                let right = Box::new(self.convert_expr(*right, binder)?);
                Ok(Expr::BinaryOp { left, op, right })
            }
            other => Err(DbError::UnsupportedOperation(format!(
                "Unsupported expression: {}",
                other
            ))),
        }
    }
}

impl Default for SqlParserAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn convert_value(val: &sql_ast::Value) -> Result<Value> {
    match val {
        sql_ast::Value::Number(n, _) => {
            if let Ok(i) = n.parse::<i64>() {
                Ok(Value::Integer(i))
            } else if let Ok(f) = n.parse::<f64>() {
                Ok(Value::Float(f))
            } else {
                Err(DbError::TypeMismatch(format!("Invalid number: {}", n)))
            }
        }
        sql_ast::Value::SingleQuotedString(s) | sql_ast::Value::DoubleQuotedString(s) => Ok(Value::Text(s.clone())),
        sql_ast::Value::Boolean(b) => Ok(Value::Boolean(*b)),
        sql_ast::Value::Null => Ok(Value::Null),
        _ => Err(DbError::UnsupportedOperation(format!("Unsupported value: {}", val))),
    }
}

fn convert_binary_op(op: &sql_ast::BinaryOperator) -> Result<BinaryOp> {
    match op {
        sql_ast::BinaryOperator::Plus => Ok(BinaryOp::Add),
        sql_ast::BinaryOperator::Minus => Ok(BinaryOp::Subtract),
        sql_ast::BinaryOperator::Eq => Ok(BinaryOp::Eq),
        sql_ast::BinaryOperator::NotEq => Ok(BinaryOp::NotEq),
        sql_ast::BinaryOperator::Lt => Ok(BinaryOp::Lt),
        sql_ast::BinaryOperator::LtEq => Ok(BinaryOp::LtEq),
        sql_ast::BinaryOperator::Gt => Ok(BinaryOp::Gt),
        sql_ast::BinaryOperator::GtEq => Ok(BinaryOp::GtEq),
        sql_ast::BinaryOperator::And => Ok(BinaryOp::And),
        sql_ast::BinaryOperator::Or => Ok(BinaryOp::Or),
        other => Err(DbError::UnsupportedOperation(format!("Unsupported operator: {}", other))),
    }
}

fn is_count_star(expr: &sql_ast::Expr) -> bool {
    matches!(expr, sql_ast::Expr::Function(_))
        && expr.to_string().to_uppercase().replace(' ', "") == "COUNT(*)"
}

fn unquote(name: &str) -> String {
    name.trim_matches(|c| c == '`' || c == '"').to_string()
}

fn extract_table_name(name: &sql_ast::ObjectName) -> Result<String> {
    name.0
        .last()
        .map(|part| unquote(&part.to_string()))
        .ok_or_else(|| DbError::ParseError("Invalid table name".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(sql: &str, params: &[Value]) -> Result<Statement> {
        SqlParserAdapter::new().parse(sql, params)
    }

    #[test]
    fn test_create_table_constraints() {
        let stmt = parse(
            "CREATE TABLE IF NOT EXISTS user_data (user_id VARCHAR(36) PRIMARY KEY, email TEXT NOT NULL UNIQUE, age INT)",
            &[],
        )
        .unwrap();

        let Statement::CreateTable(create) = stmt else {
            panic!("expected CREATE TABLE");
        };
        assert!(create.if_not_exists);
        assert_eq!(create.table_name, "user_data");
        assert_eq!(create.columns[0].data_type, DataType::Text);
        assert!(!create.columns[0].nullable && create.columns[0].unique);
        assert!(!create.columns[1].nullable && create.columns[1].unique);
        assert!(create.columns[2].nullable);
    }

    #[test]
    fn test_placeholders_bind_in_order() {
        let stmt = parse(
            "SELECT name FROM users WHERE age > ? AND name != ? ORDER BY age DESC LIMIT 10 OFFSET 20",
            &[Value::Integer(30), Value::Text("bob".into())],
        )
        .unwrap();

        let Statement::Select(select) = stmt else {
            panic!("expected SELECT");
        };
        assert_eq!(select.from.as_deref(), Some("users"));
        assert_eq!(
            select.selection.unwrap().to_string(),
            "((age > 30) AND (name != bob))"
        );
        assert!(select.order_by[0].descending);
        assert_eq!(select.limit, Some(Expr::Literal(Value::Integer(10))));
        assert_eq!(select.offset, Some(Expr::Literal(Value::Integer(20))));
    }

    #[test]
    fn test_parameter_count_is_checked() {
        let too_few = parse("INSERT INTO t VALUES (?, ?)", &[Value::Integer(1)]);
        assert!(matches!(too_few, Err(DbError::InvalidArgument(_))));

        let too_many = parse("DELETE FROM t WHERE id = ?", &[Value::Integer(1), Value::Integer(2)]);
        assert!(matches!(too_many, Err(DbError::InvalidArgument(_))));
    }

    #[test]
    fn test_count_star_projection() {
        let Statement::Select(select) = parse("SELECT COUNT(*) FROM t", &[]).unwrap() else {
            panic!("expected SELECT");
        };
        assert!(select.is_count());
    }

    #[test]
    fn test_transaction_control_rejected() {
        assert!(matches!(parse("BEGIN", &[]), Err(DbError::UnsupportedOperation(_))));
        assert!(matches!(parse("commit;", &[]), Err(DbError::UnsupportedOperation(_))));
    }

    #[test]
    fn test_garbage_is_parse_error() {
        assert!(matches!(parse("SELEC * FRM", &[]), Err(DbError::ParseError(_))));
    }
}
