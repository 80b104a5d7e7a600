//! Query-parameter to predicate translation.
//!
//! A parameter is either `<attribute>` (equality) or `<attribute>__<operator>`. Every
//! name must resolve against the resource's attributes; anything else is rejected
//! rather than ignored. Operators registered on the descriptor with
//! [`param_filter`](crate::ResourceDescriptorBuilder::param_filter) are resolved before
//! the built-in ones, so a registration can also replace a built-in.

use sea_orm::{
    ColumnTrait, Condition, EntityTrait, Value,
    sea_query::{Expr, Func, LikeExpr, SimpleExpr},
};
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    ApiError,
    core::descriptor::{Attribute, ParamFilter, ResourceDescriptor},
    values,
};

/// Parameters owned by the sort/page planner
pub const RESERVED_PARAMS: [&str; 3] = ["__sort", "__offset", "__limit"];

const SEPARATOR: &str = "__";
const LIKE_ESCAPE: char = '\\';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    IContains,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    Null,
    In,
}

impl Operator {
    #[must_use]
    pub fn parse(suffix: &str) -> Option<Self> {
        Some(match suffix {
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            "contains" => Self::Contains,
            "icontains" => Self::IContains,
            "startswith" => Self::StartsWith,
            "istartswith" => Self::IStartsWith,
            "endswith" => Self::EndsWith,
            "iendswith" => Self::IEndsWith,
            "null" => Self::Null,
            "in" => Self::In,
            _ => return None,
        })
    }

    /// LIKE-based operators, defined only for text attributes.
    #[must_use]
    pub fn is_pattern(self) -> bool {
        matches!(
            self,
            Self::Contains
                | Self::IContains
                | Self::StartsWith
                | Self::IStartsWith
                | Self::EndsWith
                | Self::IEndsWith
        )
    }
}

/// How a resolved parameter compares its attribute.
pub enum Comparison<'d, E: EntityTrait> {
    Builtin(Operator),
    Registered(&'d ParamFilter<E>),
}

#[must_use]
pub fn is_reserved(name: &str) -> bool {
    RESERVED_PARAMS.contains(&name)
}

/// Split `<attribute>[__<suffix>]`, rejecting anything with more than one separator.
fn split_param(name: &str) -> Option<(&str, Option<&str>)> {
    let mut parts = name.split(SEPARATOR);
    let attribute = parts.next().filter(|a| !a.is_empty())?;
    let suffix = parts.next();
    if parts.next().is_some() {
        return None;
    }
    Some((attribute, suffix))
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | LIKE_ESCAPE) {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(c);
    }
    escaped
}

fn like(column: SimpleExpr, pattern: String) -> SimpleExpr {
    Expr::expr(column).like(LikeExpr::new(pattern).escape(LIKE_ESCAPE))
}

fn upper(column: SimpleExpr) -> SimpleExpr {
    SimpleExpr::FunctionCall(Func::upper(column))
}

fn coerce<E: EntityTrait>(attr: &Attribute<E>, param: &str, raw: &str) -> Result<Value, ApiError> {
    values::coerce_param(&attr.column_type, raw)
        .map_err(|message| ApiError::invalid_parameter(param, message))
}

fn parse_list<E: EntityTrait>(
    attr: &Attribute<E>,
    param: &str,
    raw: &str,
) -> Result<Vec<Value>, ApiError> {
    let inner = raw
        .trim()
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| ApiError::invalid_parameter(param, "expected a list formatted as [a,b,c]"))?;
    if inner.trim().is_empty() {
        return Err(ApiError::invalid_parameter(param, "the list must not be empty"));
    }
    inner
        .split(',')
        .map(|item| coerce(attr, param, item.trim()))
        .collect()
}

/// Build the predicate for one `<attribute>__<operator>=<raw>` parameter.
pub(crate) fn predicate<E: EntityTrait>(
    attr: &Attribute<E>,
    operator: Operator,
    param: &str,
    raw: &str,
) -> Result<SimpleExpr, ApiError> {
    if operator.is_pattern() && !values::is_text(&attr.column_type) {
        return Err(ApiError::invalid_parameter(
            param,
            "pattern matching is only supported on text attributes",
        ));
    }
    let column = Expr::col((attr.column.entity_name(), attr.column));
    let expr = match operator {
        Operator::Eq => column.eq(coerce(attr, param, raw)?),
        Operator::Gt => column.gt(coerce(attr, param, raw)?),
        Operator::Gte => column.gte(coerce(attr, param, raw)?),
        Operator::Lt => column.lt(coerce(attr, param, raw)?),
        Operator::Lte => column.lte(coerce(attr, param, raw)?),
        Operator::Null => match values::truthy(raw) {
            Some(true) => column.is_null(),
            Some(false) => column.is_not_null(),
            None => {
                return Err(ApiError::invalid_parameter(param, "expected 1 or 0"));
            }
        },
        Operator::In => column.is_in(parse_list(attr, param, raw)?),
        Operator::Contains => like(column.into(), format!("%{}%", escape_like(raw))),
        Operator::StartsWith => like(column.into(), format!("{}%", escape_like(raw))),
        Operator::EndsWith => like(column.into(), format!("%{}", escape_like(raw))),
        Operator::IContains => like(
            upper(column.into()),
            format!("%{}%", escape_like(&raw.to_uppercase())),
        ),
        Operator::IStartsWith => like(
            upper(column.into()),
            format!("{}%", escape_like(&raw.to_uppercase())),
        ),
        Operator::IEndsWith => like(
            upper(column.into()),
            format!("%{}", escape_like(&raw.to_uppercase())),
        ),
    };
    Ok(expr)
}

/// Resolve one parameter name against the resource's attributes and operators.
///
/// # Errors
/// `UnrecognizedParameter` when the attribute or the operator is unknown.
pub fn resolve<'d, E: EntityTrait>(
    descriptor: &'d ResourceDescriptor<E>,
    name: &str,
) -> Result<(&'d Attribute<E>, Comparison<'d, E>), ApiError> {
    let unrecognized = || ApiError::unrecognized_parameter(name);
    let (attribute, suffix) = split_param(name).ok_or_else(unrecognized)?;
    let attr = descriptor.attribute(attribute).ok_or_else(unrecognized)?;
    let comparison = match suffix {
        None => Comparison::Builtin(Operator::Eq),
        Some(suffix) => match descriptor.param_filter(suffix) {
            Some(filter) => Comparison::Registered(filter),
            None => Comparison::Builtin(Operator::parse(suffix).ok_or_else(unrecognized)?),
        },
    };
    Ok((attr, comparison))
}

/// Translate the request's query parameters into one AND-ed condition.
///
/// Reserved paging/sort names and names in `consumed` (claimed by `attr_map` builders or
/// a `get_filter` hook) are skipped. The result depends only on the inputs.
///
/// # Errors
/// `UnrecognizedParameter` for unresolvable names, `InvalidParameter` for values that do
/// not fit the attribute's type.
pub fn translate<E: EntityTrait>(
    descriptor: &ResourceDescriptor<E>,
    params: &BTreeMap<String, String>,
    consumed: &BTreeSet<String>,
) -> Result<Condition, ApiError> {
    let mut condition = Condition::all();
    for (name, raw) in params {
        if is_reserved(name) || consumed.contains(name) {
            continue;
        }
        let (attr, comparison) = resolve(descriptor, name).inspect_err(|_| {
            tracing::debug!(resource = descriptor.name(), param = %name, "Rejected query parameter");
        })?;
        condition = match comparison {
            Comparison::Builtin(operator) => condition.add(predicate(attr, operator, name, raw)?),
            Comparison::Registered(filter) => condition
                .add(filter(attr, raw).map_err(|message| ApiError::invalid_parameter(name, message))?),
        };
    }
    Ok(condition)
}
