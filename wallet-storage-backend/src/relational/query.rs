//! WQL → `SeaQuery` condition translation
//!
//! Every tag predicate becomes a correlated sub-select:
//! `EXISTS (SELECT 1 FROM tags WHERE tags.item_id = items.id AND tags.name = ? AND <value test>)`.
//! `$not` negates the whole sub-condition, so it also matches items that lack
//! the tag, the same as the embedded predicate.
//!
//! `SQLite` LIKE ignores ASCII case, so `$like` is rewritten as a `GLOB`
//! pattern there.

use sea_orm::sea_query::{Condition, Expr, ExprTrait, LikeExpr, Query as SqlQuery};
use sea_orm::ColumnTrait;

use wallet_storage_core::types::TagName;
use wallet_storage_core::{Query, QueryTranslator};

use super::config::Dialect;
use super::entity::{item, tag};

/// Escape character accepted inside `$like` patterns.
pub const LIKE_ESCAPE: char = '\\';

/// Translates a [`Query`] into a `WHERE` condition over the `items` table.
#[derive(Debug, Clone, Copy)]
pub struct SqlTranslator {
    pub dialect: Dialect,
}

impl SqlTranslator {
    #[must_use]
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    fn like(&self, pattern: &str) -> Expr {
        match self.dialect {
            Dialect::Postgres => tag::Column::Value
                .like(LikeExpr::new(normalize_like(pattern)).escape(LIKE_ESCAPE)),
            Dialect::Sqlite => {
                Expr::cust_with_values(r#""tags"."value" GLOB ?"#, [like_to_glob(pattern)])
            }
        }
    }
}

impl QueryTranslator for SqlTranslator {
    type Output = Condition;

    fn translate(&self, query: &Query) -> Condition {
        match query {
            Query::And(parts) if parts.is_empty() => always(true),
            Query::And(parts) => parts
                .iter()
                .fold(Condition::all(), |cond, part| cond.add(self.translate(part))),
            Query::Or(parts) if parts.is_empty() => always(false),
            Query::Or(parts) => parts
                .iter()
                .fold(Condition::any(), |cond, part| cond.add(self.translate(part))),
            Query::Not(inner) => Condition::all().add(self.translate(inner)).not(),
            Query::Eq(name, value) => tag_exists(name, tag::Column::Value.eq(value.as_str())),
            Query::Neq(name, value) => tag_exists(name, tag::Column::Value.ne(value.as_str())),
            Query::Gt(name, value) => tag_exists(name, tag::Column::Value.gt(value.as_str())),
            Query::Gte(name, value) => tag_exists(name, tag::Column::Value.gte(value.as_str())),
            Query::Lt(name, value) => tag_exists(name, tag::Column::Value.lt(value.as_str())),
            Query::Lte(name, value) => tag_exists(name, tag::Column::Value.lte(value.as_str())),
            Query::Like(name, pattern) => tag_exists(name, self.like(pattern)),
            Query::In(name, values) => tag_exists(
                name,
                tag::Column::Value.is_in(values.iter().map(String::as_str)),
            ),
        }
    }
}

/// Constant condition; an empty `Condition` would be dropped from the SQL.
fn always(value: bool) -> Condition {
    Condition::all().add(Expr::cust(if value { "1 = 1" } else { "1 = 0" }))
}

/// A trailing lone escape stands for itself.
fn normalize_like(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 1);
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        out.push(c);
        if c == LIKE_ESCAPE {
            out.push(chars.next().unwrap_or(LIKE_ESCAPE));
        }
    }
    out
}

/// Rewrite a LIKE pattern as an equivalent, case-sensitive GLOB pattern.
fn like_to_glob(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        let literal = match c {
            '%' => {
                out.push('*');
                continue;
            }
            '_' => {
                out.push('?');
                continue;
            }
            LIKE_ESCAPE => chars.next().unwrap_or(LIKE_ESCAPE),
            other => other,
        };
        match literal {
            '*' | '?' | '[' => {
                out.push('[');
                out.push(literal);
                out.push(']');
            }
            other => out.push(other),
        }
    }
    out
}

fn tag_exists(name: &TagName, value_test: Expr) -> Condition {
    let filter = Condition::all()
        .add(Expr::col((tag::Entity, tag::Column::ItemId)).equals((item::Entity, item::Column::Id)))
        .add(tag::Column::Name.eq(name.storage_key()))
        .add(value_test);
    let sub_select = SqlQuery::select()
        .expr(Expr::val(1))
        .from(tag::Entity)
        .cond_where(filter)
        .to_owned();
    Condition::all().add(Expr::exists(sub_select))
}
