//! Mapping request bodies and path parameters onto active models.

use sea_orm::{ActiveModelTrait, ColumnTrait, ModelTrait, Value};
use serde_json::{Map, Value as Json};
use std::collections::BTreeMap;

use super::{
    CrudEntity,
    descriptor::{Attribute, ResourceDescriptor},
};
use crate::{ApiError, filtering::QueryPlan, filtering::conditions, values};

/// How a body is applied to an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Write {
    /// New instance: every required attribute must end up set
    Create,
    /// PUT: every required attribute must be in the body, omitted nullable ones are cleared
    Replace,
    /// PATCH: only the attributes present change
    Merge,
}

/// Set one attribute from a JSON value, trying each representation the column allows.
fn set_json<E: CrudEntity>(
    model: &mut E::ActiveModel,
    attr: &Attribute<E>,
    json: &Json,
) -> Result<(), String> {
    if json.is_null() && !attr.nullable {
        return Err(format!("{}: must not be null", attr.name));
    }
    let candidates = values::coerce_json(&attr.column_type, json)
        .map_err(|message| format!("{}: {message}", attr.name))?;
    set_first(model, attr, candidates)
}

fn set_first<E: CrudEntity>(
    model: &mut E::ActiveModel,
    attr: &Attribute<E>,
    candidates: Vec<Value>,
) -> Result<(), String> {
    let mut last = None;
    for value in candidates {
        match model.try_set(attr.column, value) {
            Ok(()) => return Ok(()),
            Err(err) => last = Some(err),
        }
    }
    Err(format!(
        "{}: value does not fit the attribute ({})",
        attr.name,
        last.map_or_else(|| "no representation".to_string(), |e| e.to_string())
    ))
}

/// Apply `body` (with `defaults` for omitted attributes) onto `model`.
///
/// Primary keys in the body are ignored except on create. Returns every problem found
/// so [`validate`] can report them together with missing attributes.
pub(crate) fn apply<E: CrudEntity>(
    descriptor: &ResourceDescriptor<E>,
    model: &mut E::ActiveModel,
    body: &Map<String, Json>,
    defaults: &Map<String, Json>,
    write: Write,
) -> Vec<String> {
    let mut errors = Vec::new();

    for key in body.keys() {
        if descriptor.attribute(key).is_none() {
            errors.push(format!("{key}: unknown attribute"));
        }
    }

    for attr in descriptor.attributes() {
        if attr.primary_key && write != Write::Create {
            continue;
        }
        let supplied = body.get(&attr.name).or_else(|| defaults.get(&attr.name));
        let outcome = match supplied {
            Some(json) => set_json(model, attr, json),
            None if write == Write::Replace && attr.is_required() => {
                Err(format!("{}: attribute is required", attr.name))
            }
            None if write == Write::Replace && attr.nullable && !attr.storage_assigned => {
                set_json(model, attr, &Json::Null)
            }
            None => Ok(()),
        };
        if let Err(message) = outcome {
            errors.push(message);
        }
    }
    errors
}

fn reported(errors: &[String], attribute: &str) -> bool {
    errors
        .iter()
        .any(|e| e.split_once(':').is_some_and(|(name, _)| name == attribute))
}

/// Fail with everything collected so far plus any required attribute still unset.
///
/// An attribute that already has a problem on the list is not reported again.
///
/// # Errors
/// `ValidationFailed` when the list is not empty.
pub(crate) fn validate<E: CrudEntity>(
    descriptor: &ResourceDescriptor<E>,
    model: &E::ActiveModel,
    write: Write,
    mut errors: Vec<String>,
) -> Result<(), ApiError> {
    if write == Write::Create {
        let missing: Vec<String> = descriptor
            .attributes()
            .iter()
            .filter(|a| a.is_required() && model.is_not_set(a.column))
            .filter(|a| !reported(&errors, &a.name))
            .map(|a| format!("{}: attribute is required", a.name))
            .collect();
        errors.extend(missing);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::validation_failed(errors))
    }
}

/// Set the attributes named by path parameters, e.g. a parent id on a nested collection.
///
/// # Errors
/// `Internal` for an unmapped path parameter, `NotFound` for a value the column cannot hold.
pub(crate) fn inject_path<E: CrudEntity>(
    descriptor: &ResourceDescriptor<E>,
    model: &mut E::ActiveModel,
    path: &BTreeMap<String, String>,
) -> Result<(), ApiError> {
    for (param, raw) in path {
        let attr = path_attribute(descriptor, param)?;
        let value = path_value(descriptor, attr, raw)?;
        set_first(model, attr, vec![value]).map_err(ApiError::programming)?;
    }
    Ok(())
}

/// Equality predicates for every path parameter.
///
/// # Errors
/// As for [`inject_path`].
pub(crate) fn path_scope<E: CrudEntity>(
    descriptor: &ResourceDescriptor<E>,
    path: &BTreeMap<String, String>,
    mut plan: QueryPlan<E>,
) -> Result<QueryPlan<E>, ApiError> {
    for (param, raw) in path {
        let attr = path_attribute(descriptor, param)?;
        path_value(descriptor, attr, raw)?;
        plan = plan.filter(conditions::predicate(
            attr,
            conditions::Operator::Eq,
            param,
            raw,
        )?);
    }
    Ok(plan)
}

fn path_attribute<'d, E: CrudEntity>(
    descriptor: &'d ResourceDescriptor<E>,
    param: &str,
) -> Result<&'d Attribute<E>, ApiError> {
    descriptor.path_attribute(param).ok_or_else(|| {
        ApiError::programming(format!(
            "path parameter '{param}' is not mapped on resource '{}'",
            descriptor.name()
        ))
    })
}

/// An identifier the column cannot hold names no row.
fn path_value<E: CrudEntity>(
    descriptor: &ResourceDescriptor<E>,
    attr: &Attribute<E>,
    raw: &str,
) -> Result<Value, ApiError> {
    values::coerce_param(&attr.column_type, raw)
        .map_err(|_| ApiError::not_found(descriptor.name(), Some(raw.to_string())))
}

/// The identifier echoed in `NotFound` errors for a single-item request.
pub(crate) fn describe_id(path: &BTreeMap<String, String>) -> Option<String> {
    match path.len() {
        0 => None,
        1 => path.values().next().cloned(),
        _ => Some(
            path.iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(","),
        ),
    }
}

/// A primary-key predicate for a loaded model, used to re-check preconditions.
pub(crate) fn key_plan<E: CrudEntity>(
    descriptor: &ResourceDescriptor<E>,
    model: &E::Model,
) -> QueryPlan<E> {
    let column = descriptor.primary_key().column;
    QueryPlan::new().filter(column.eq(model.get(column)))
}
