//! Field Projector: render only the visible attributes of a model.
//!
//! Values are read per column through [`ModelTrait::get`], so the output is keyed by
//! attribute (column) name even where the Rust field is named differently.

use chrono::SecondsFormat;
use sea_orm::{ModelTrait, Value, sea_query::value::sea_value_to_json_value};
use serde_json::{Map, Value as Json};

use crate::core::descriptor::Attribute;

/// Key under which hook-supplied metadata is attached to a representation
pub const META_KEY: &str = "meta";

const NAIVE_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Render one storage value as JSON.
///
/// Temporal values use the formats the body coercion accepts, so a representation can
/// be sent back unchanged.
#[must_use]
pub fn to_json(value: &Value) -> Json {
    match value {
        Value::ChronoDate(Some(date)) => Json::String(date.to_string()),
        Value::ChronoTime(Some(time)) => Json::String(time.to_string()),
        Value::ChronoDateTime(Some(dt)) => Json::String(dt.format(NAIVE_DATETIME_FORMAT).to_string()),
        Value::ChronoDateTimeUtc(Some(dt)) => {
            Json::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        }
        Value::ChronoDateTimeLocal(Some(dt)) => Json::String(dt.to_rfc3339()),
        Value::ChronoDateTimeWithTimeZone(Some(dt)) => Json::String(dt.to_rfc3339()),
        Value::ChronoDate(None)
        | Value::ChronoTime(None)
        | Value::ChronoDateTime(None)
        | Value::ChronoDateTimeUtc(None)
        | Value::ChronoDateTimeLocal(None)
        | Value::ChronoDateTimeWithTimeZone(None) => Json::Null,
        Value::Bytes(Some(bytes)) => Json::String(String::from_utf8_lossy(bytes).into_owned()),
        other => sea_value_to_json_value(other),
    }
}

/// Render `model` keeping only `fields`, in the order given.
///
/// `fields` is expected in declared attribute order; the descriptor resolves it that way.
/// Names that match no attribute are skipped.
#[must_use]
pub fn project<M: ModelTrait>(
    attributes: &[Attribute<M::Entity>],
    model: &M,
    fields: &[String],
) -> Json {
    let mut shaped = Map::with_capacity(fields.len());
    for field in fields {
        if let Some(attr) = attributes.iter().find(|a| &a.name == field) {
            shaped.insert(field.clone(), to_json(&model.get(attr.column)));
        }
    }
    Json::Object(shaped)
}

/// Project every model of a result set.
#[must_use]
pub fn project_all<M: ModelTrait>(
    attributes: &[Attribute<M::Entity>],
    models: &[M],
    fields: &[String],
) -> Json {
    Json::Array(
        models
            .iter()
            .map(|model| project(attributes, model, fields))
            .collect(),
    )
}

/// Attach hook-supplied metadata to a projected object under [`META_KEY`].
#[must_use]
pub fn with_meta(mut representation: Json, meta: Option<Map<String, Json>>) -> Json {
    if let (Json::Object(fields), Some(meta)) = (&mut representation, meta) {
        fields.insert(META_KEY.to_string(), Json::Object(meta));
    }
    representation
}
