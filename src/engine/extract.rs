//! SQL table-reference extraction.
//!
//! A table is a *main* table when it sits in the top-level `FROM`/`JOIN` list of a
//! query statement. Every other relation the statement reads (predicate subqueries,
//! derived tables, CTE bodies) is reported with `in_subquery = true`.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlparser::ast::{ObjectName, Query, SetExpr, Statement, TableFactor, TableWithJoins, visit_relations};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::ops::ControlFlow;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableReference {
    pub table: String,
    pub in_subquery: bool,
}

pub trait TableExtractor: Send + Sync {
    fn extract(&self, sql: &str) -> Result<Vec<TableReference>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SqlTableExtractor;

impl TableExtractor for SqlTableExtractor {
    fn extract(&self, sql: &str) -> Result<Vec<TableReference>> {
        let statements = Parser::parse_sql(&GenericDialect {}, sql)?;

        let mut main: Vec<String> = Vec::new();
        for statement in &statements {
            if let Statement::Query(query) = statement {
                collect_query_from(query, &mut main);
            }
        }

        let mut all: Vec<String> = Vec::new();
        for statement in &statements {
            let _ = visit_relations(statement, |relation| {
                push_unique(&mut all, table_name(relation));
                ControlFlow::<()>::Continue(())
            });
        }

        let references = all
            .into_iter()
            .map(|table| TableReference {
                in_subquery: !main.contains(&table),
                table,
            })
            .collect();
        Ok(references)
    }
}

fn collect_query_from(query: &Query, out: &mut Vec<String>) {
    collect_set_expr_from(&query.body, out);
}

fn collect_set_expr_from(body: &SetExpr, out: &mut Vec<String>) {
    match body {
        SetExpr::Select(select) => {
            for table in &select.from {
                collect_table_with_joins(table, out);
            }
        }
        SetExpr::Query(query) => collect_query_from(query, out),
        SetExpr::SetOperation { left, right, .. } => {
            collect_set_expr_from(left, out);
            collect_set_expr_from(right, out);
        }
        _ => {}
    }
}

fn collect_table_with_joins(table: &TableWithJoins, out: &mut Vec<String>) {
    collect_factor(&table.relation, out);
    for join in &table.joins {
        collect_factor(&join.relation, out);
    }
}

fn collect_factor(factor: &TableFactor, out: &mut Vec<String>) {
    match factor {
        TableFactor::Table { name, .. } => push_unique(out, table_name(name)),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => collect_table_with_joins(table_with_joins, out),
        // Derived tables are subqueries
        _ => {}
    }
}

/// Last path segment, unquoted and lower-cased: `"TPCH".LineItem` -> `lineitem`.
fn table_name(name: &ObjectName) -> String {
    let text = name.to_string();
    let last = text.rsplit('.').next().unwrap_or(&text);
    last.trim_matches(|c| c == '"' || c == '`' || c == '[' || c == ']')
        .to_lowercase()
}

fn push_unique(out: &mut Vec<String>, name: String) {
    if !out.contains(&name) {
        out.push(name);
    }
}
