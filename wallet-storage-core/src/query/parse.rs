//! WQL JSON parser

use serde_json::{Map, Value};

use crate::error::{StorageError, StorageResult};
use crate::types::TagName;

use super::Query;

fn malformed(msg: impl Into<String>) -> StorageError {
    StorageError::MalformedQuery(msg.into())
}

/// Parse a raw predicate structure into a [`Query`].
///
/// Fails with `MalformedQuery` on unknown operators, wrong arity, non-scalar
/// comparison operands, or range/pattern operators on encrypted tags.
pub fn parse(raw: &Value) -> StorageResult<Query> {
    let obj = raw
        .as_object()
        .ok_or_else(|| malformed("query must be a JSON object"))?;
    parse_object(obj)
}

fn parse_object(obj: &Map<String, Value>) -> StorageResult<Query> {
    let mut clauses = obj
        .iter()
        .map(|(key, value)| parse_clause(key, value))
        .collect::<StorageResult<Vec<_>>>()?;

    // Several keys in one object form an implicit `$and`.
    if clauses.len() == 1 {
        Ok(clauses.remove(0))
    } else {
        Ok(Query::And(clauses))
    }
}

fn parse_clause(key: &str, value: &Value) -> StorageResult<Query> {
    match key {
        "$and" => Ok(Query::And(parse_children(key, value)?)),
        "$or" => Ok(Query::Or(parse_children(key, value)?)),
        "$not" => Ok(Query::Not(Box::new(parse_single_child(value)?))),
        op if op.starts_with('$') => Err(malformed(format!("unknown operator '{op}'"))),
        tag => parse_tag_predicate(parse_tag_name(tag)?, value),
    }
}

fn parse_children(op: &str, value: &Value) -> StorageResult<Vec<Query>> {
    let items = value
        .as_array()
        .ok_or_else(|| malformed(format!("'{op}' expects an array of subqueries")))?;
    if items.is_empty() {
        return Err(malformed(format!("'{op}' requires at least one subquery")));
    }
    items.iter().map(parse).collect()
}

fn parse_single_child(value: &Value) -> StorageResult<Query> {
    match value {
        Value::Object(obj) => parse_object(obj),
        Value::Array(items) if items.len() == 1 => parse(&items[0]),
        _ => Err(malformed("'$not' requires exactly one subquery")),
    }
}

fn parse_tag_name(key: &str) -> StorageResult<TagName> {
    TagName::new(key)
}

fn parse_tag_predicate(name: TagName, value: &Value) -> StorageResult<Query> {
    let ops = match value {
        Value::Object(ops) => ops,
        scalar => {
            let operand = scalar_operand(&name, scalar)?;
            return Ok(Query::Eq(name, operand));
        }
    };

    let mut iter = ops.iter();
    let (op, operand) = match (iter.next(), iter.next()) {
        (Some(pair), None) => pair,
        _ => {
            return Err(malformed(format!(
                "tag '{name}' requires exactly one operator"
            )))
        }
    };

    match op.as_str() {
        "$neq" => Ok(Query::Neq(name.clone(), scalar_operand(&name, operand)?)),
        "$in" => Ok(Query::In(name.clone(), set_operand(&name, operand)?)),
        "$gt" | "$gte" | "$lt" | "$lte" | "$like" => {
            if !name.is_plaintext() {
                return Err(malformed(format!(
                    "operator '{op}' is only supported on plaintext tags, got '{name}'"
                )));
            }
            let operand = scalar_operand(&name, operand)?;
            Ok(match op.as_str() {
                "$gt" => Query::Gt(name, operand),
                "$gte" => Query::Gte(name, operand),
                "$lt" => Query::Lt(name, operand),
                "$lte" => Query::Lte(name, operand),
                _ => Query::Like(name, operand),
            })
        }
        other => Err(malformed(format!(
            "unknown operator '{other}' on tag '{name}'"
        ))),
    }
}

fn scalar_operand(name: &TagName, value: &Value) -> StorageResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(malformed(format!(
            "operand for tag '{name}' must be a scalar"
        ))),
    }
}

fn set_operand(name: &TagName, value: &Value) -> StorageResult<Vec<String>> {
    let items = value
        .as_array()
        .ok_or_else(|| malformed(format!("'$in' on tag '{name}' expects an array")))?;
    if items.is_empty() {
        return Err(malformed(format!(
            "'$in' on tag '{name}' requires at least one value"
        )));
    }
    items.iter().map(|v| scalar_operand(name, v)).collect()
}
