use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Sorting and paging parameters accepted by every collection GET.
///
/// Filters are not listed here: any attribute name, optionally suffixed with an
/// operator, is accepted.
///
/// # Filtering
/// - Equality: `name=Jim`
/// - Comparisons: `salary__gt=1000`, `salary__gte`, `salary__lt`, `salary__lte`
/// - Text: `name__contains=John`, `__startswith`, `__endswith`, and the case-insensitive
///   `__icontains`, `__istartswith`, `__iendswith`
/// - Presence: `company_id__null=1` (absent) or `company_id__null=0` (present)
/// - Membership: `id__in=[1,2,3]`
#[derive(Debug, Deserialize, IntoParams, ToSchema, Default)]
#[into_params(parameter_in = Query)]
pub struct ListParams {
    /// Comma-separated sort keys, `-` prefix for descending.
    ///
    /// Example: `name,-salary`
    #[serde(rename = "__sort")]
    #[param(example = "name,-salary")]
    pub sort: Option<String>,
    /// Rows to skip after sorting.
    #[serde(rename = "__offset")]
    #[param(example = 10)]
    pub offset: Option<u64>,
    /// Maximum rows to return.
    #[serde(rename = "__limit")]
    #[param(example = 10)]
    pub limit: Option<u64>,
}

/// Body of a bulk PATCH on a collection.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({"patches": [{"op": "add", "path": "/", "value": {"name": "Jim"}}]}))]
pub struct PatchDocument {
    pub patches: Vec<PatchOperation>,
}

/// One entry of a bulk PATCH. Only `add` to `/` is defined.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PatchOperation {
    #[schema(example = "add")]
    pub op: String,
    #[schema(example = "/")]
    pub path: String,
    /// Attributes of the instance to create
    #[serde(default)]
    #[schema(value_type = Object)]
    pub value: serde_json::Value,
}
