//! # Filtering, Sorting & Paging
//!
//! Turns the raw query-parameter mapping of a request into a [`QueryPlan`].
//!
//! ## Query Parameter Examples
//!
//! ```rust,ignore
//! // Equality and comparisons
//! GET /employees?name=Jim
//! GET /employees?salary__gte=1000&salary__lt=5000
//!
//! // Substring matching (LIKE, wildcards in the value are escaped)
//! GET /employees?name__contains=John
//! GET /employees?name__istartswith=jo
//!
//! // NULL checks and membership
//! GET /employees?company_id__null=1
//! GET /employees?id__in=[1,2,3]
//!
//! // Sorting and paging
//! GET /employees?__sort=name,-salary&__offset=10&__limit=10
//! ```
//!
//! ## Stage Order
//!
//! 1. `attr_map` builders claim their parameters and add their predicates.
//! 2. The `get_filter` hook may narrow the plan and claim further parameters.
//! 3. The translator handles everything left; unknown names are rejected.
//! 4. Sort and window are applied last.

pub mod conditions;
pub mod pagination;
pub mod plan;
pub mod sort;

pub use conditions::{Operator, RESERVED_PARAMS, translate};
pub use pagination::{calculate_content_range, parse_window};
pub use plan::QueryPlan;
pub use sort::{parse_sort, plan_sort};

use sea_orm::EntityTrait;
use std::collections::{BTreeMap, BTreeSet};

use crate::{ApiError, core::descriptor::ResourceDescriptor};

/// Run the descriptor's `attr_map` builders over the parameters they claim.
///
/// # Errors
/// Whatever a builder reports for a value it cannot use.
pub fn apply_attr_map<E: EntityTrait>(
    descriptor: &ResourceDescriptor<E>,
    params: &BTreeMap<String, String>,
    mut plan: QueryPlan<E>,
) -> Result<(QueryPlan<E>, BTreeSet<String>), ApiError> {
    let mut consumed = BTreeSet::new();
    for (name, raw) in params {
        if let Some(builder) = descriptor.attr_filter(name) {
            plan = plan.filter(builder(raw)?);
            consumed.insert(name.clone());
        }
    }
    Ok((plan, consumed))
}

/// Translate the unclaimed parameters, then apply sort and window.
///
/// # Errors
/// `UnrecognizedParameter` or `InvalidParameter` from the translator and planner.
pub fn complete_plan<E: EntityTrait>(
    descriptor: &ResourceDescriptor<E>,
    params: &BTreeMap<String, String>,
    consumed: &BTreeSet<String>,
    mut plan: QueryPlan<E>,
) -> Result<QueryPlan<E>, ApiError> {
    plan = plan.filter(translate(descriptor, params, consumed)?);
    let requested = params.get(sort::SORT_PARAM).map(String::as_str);
    // a hook-chosen order stands unless the client asked for one
    if requested.is_some() || plan.sort.is_empty() {
        plan.sort = plan_sort(descriptor, requested)?;
    }
    let (offset, limit) = parse_window(params)?;
    plan.offset = offset;
    plan.limit = limit;
    Ok(plan)
}
