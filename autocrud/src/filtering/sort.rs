use sea_orm::{EntityTrait, Order};

use crate::{ApiError, core::descriptor::ResourceDescriptor};

pub const SORT_PARAM: &str = "__sort";

/// Parse one sort key, `name` or `-name`.
fn parse_key(key: &str) -> Option<(&str, Order)> {
    let key = key.trim();
    let (field, order) = match key.strip_prefix('-') {
        Some(field) => (field, Order::Desc),
        None => (key, Order::Asc),
    };
    if field.is_empty() {
        None
    } else {
        Some((field, order))
    }
}

/// Resolve a comma-separated sort spec against the resource's attributes.
///
/// # Errors
/// `InvalidParameter` for empty segments or unknown fields.
pub fn parse_sort<E: EntityTrait>(
    descriptor: &ResourceDescriptor<E>,
    spec: &str,
) -> Result<Vec<(E::Column, Order)>, ApiError> {
    spec.split(',')
        .map(|key| {
            let (field, order) = parse_key(key)
                .ok_or_else(|| ApiError::invalid_parameter(SORT_PARAM, "empty sort key"))?;
            let attr = descriptor.attribute(field).ok_or_else(|| {
                ApiError::invalid_parameter(SORT_PARAM, format!("unknown sort field '{field}'"))
            })?;
            Ok((attr.column, order))
        })
        .collect()
}

/// The request's `__sort`, else the declared default, else no ordering.
///
/// # Errors
/// `InvalidParameter` when the requested spec does not resolve.
pub fn plan_sort<E: EntityTrait>(
    descriptor: &ResourceDescriptor<E>,
    requested: Option<&str>,
) -> Result<Vec<(E::Column, Order)>, ApiError> {
    match requested {
        Some(spec) => parse_sort(descriptor, spec),
        None if descriptor.default_sort().is_empty() => Ok(Vec::new()),
        None => parse_sort(descriptor, &descriptor.default_sort().join(","))
            .map_err(|err| ApiError::programming(format!("default sort does not resolve: {err}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::employee_descriptor;
    use sea_orm::IdenStatic;

    fn keys(sort: &[(crate::testing::employee::Column, Order)]) -> Vec<String> {
        sort.iter()
            .map(|(c, o)| match o {
                Order::Desc => format!("-{}", c.as_str()),
                _ => c.as_str().to_string(),
            })
            .collect()
    }

    #[test]
    fn test_parse_key() {
        assert_eq!(parse_key("name"), Some(("name", Order::Asc)));
        assert_eq!(parse_key(" -salary "), Some(("salary", Order::Desc)));
        assert_eq!(parse_key("-"), None);
        assert_eq!(parse_key(""), None);
    }

    #[test]
    fn test_multi_key_sort_keeps_order() {
        let descriptor = employee_descriptor();
        let sort = parse_sort(&descriptor, "name,-salary").unwrap();
        assert_eq!(keys(&sort), ["name", "-salary"]);
    }

    #[test]
    fn test_unknown_sort_field_is_invalid() {
        let descriptor = employee_descriptor();
        let err = parse_sort(&descriptor, "name,height").unwrap_err();
        assert!(matches!(err, ApiError::InvalidParameter { .. }));
        assert!(err.user_message().contains("height"));
    }

    #[test]
    fn test_empty_segment_is_invalid() {
        let descriptor = employee_descriptor();
        assert!(parse_sort(&descriptor, "name,,salary").is_err());
        assert!(parse_sort(&descriptor, "").is_err());
    }

    #[test]
    fn test_default_sort_is_used_without_request() {
        let descriptor = employee_descriptor();
        let sort = plan_sort(&descriptor, None).unwrap();
        assert_eq!(keys(&sort), ["id"]);

        let sort = plan_sort(&descriptor, Some("-name")).unwrap();
        assert_eq!(keys(&sort), ["-name"]);
    }
}
