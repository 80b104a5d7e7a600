use sea_orm::{
    Condition, EntityTrait, Order, QueryFilter, QueryOrder, QuerySelect, Select,
    sea_query::IntoCondition,
};
use std::fmt;

/// SQLite and MySQL need a limit whenever an offset is given
const UNBOUNDED_LIMIT: u64 = i64::MAX as u64;

/// Predicates, ordering and window for one collection read, built fresh per request.
pub struct QueryPlan<E: EntityTrait> {
    pub condition: Condition,
    pub sort: Vec<(E::Column, Order)>,
    pub offset: u64,
    pub limit: Option<u64>,
}

impl<E: EntityTrait> QueryPlan<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            condition: Condition::all(),
            sort: Vec::new(),
            offset: 0,
            limit: None,
        }
    }

    /// AND another predicate into the plan.
    #[must_use]
    pub fn filter<F: IntoCondition>(mut self, predicate: F) -> Self {
        self.condition = self.condition.add(predicate.into_condition());
        self
    }

    /// The filtered query without ordering or window, for counting.
    pub(crate) fn filtered(&self) -> Select<E> {
        E::find().filter(self.condition.clone())
    }

    /// The full query: predicates, then ordering, then the window.
    pub(crate) fn select(&self) -> Select<E> {
        let mut query = self.filtered();
        for (column, order) in &self.sort {
            query = query.order_by(*column, order.clone());
        }
        if self.offset > 0 {
            query = query
                .offset(self.offset)
                .limit(self.limit.unwrap_or(UNBOUNDED_LIMIT));
        } else if let Some(limit) = self.limit {
            query = query.limit(limit);
        }
        query
    }
}

impl<E: EntityTrait> Default for QueryPlan<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: EntityTrait> Clone for QueryPlan<E> {
    fn clone(&self) -> Self {
        Self {
            condition: self.condition.clone(),
            sort: self.sort.clone(),
            offset: self.offset,
            limit: self.limit,
        }
    }
}

impl<E: EntityTrait> fmt::Debug for QueryPlan<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryPlan")
            .field("condition", &self.condition)
            .field("sort", &self.sort)
            .field("offset", &self.offset)
            .field("limit", &self.limit)
            .finish()
    }
}
