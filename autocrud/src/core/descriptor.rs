//! Resource Descriptor: immutable per-endpoint configuration.

use axum::http::Method;
use sea_orm::{
    ColumnTrait, ColumnType, Condition, EntityTrait, IdenStatic, Iterable, PrimaryKeyToColumn,
    PrimaryKeyTrait, Value,
};
use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::{
    ApiError,
    context::{Authorizer, Identifier},
    filtering::conditions,
    values,
};

pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;
pub const DEFAULT_ID_PARAM: &str = "id";

/// Builds the predicate for a derived or joined filter from the parameter's raw value.
pub type AttrFilter = Arc<dyn Fn(&str) -> Result<Condition, ApiError> + Send + Sync>;

/// Builds the predicate for a registered `<attribute>__<suffix>` operator. An `Err`
/// message is reported to the client as an invalid value.
pub type ParamFilter<E> =
    Arc<dyn Fn(&Attribute<E>, &str) -> Result<Condition, String> + Send + Sync>;

/// Body shapes a collection POST accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostType {
    /// One object, answered with the created resource
    Object,
    /// An array of objects created in one transaction, answered with an array
    Array,
}

/// One column of the underlying table, resolved once at registration.
#[derive(Debug, Clone)]
pub struct Attribute<E: EntityTrait> {
    pub name: String,
    pub column: E::Column,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
    /// Filled in by storage (defaults, triggers); never required on create
    pub storage_assigned: bool,
}

impl<E: EntityTrait> Attribute<E> {
    /// Whether a create request must supply this attribute.
    #[must_use]
    pub fn is_required(&self) -> bool {
        !self.nullable && !self.storage_assigned && !(self.primary_key && self.auto_increment)
    }

    /// Coerce a raw query value to this attribute's storage type.
    ///
    /// # Errors
    /// A message naming the expected format.
    pub fn parse(&self, raw: &str) -> Result<Value, String> {
        values::coerce_param(&self.column_type, raw)
    }
}

/// A collaborator optionally restricted to some verbs.
struct Scoped<T: ?Sized> {
    methods: Option<Vec<Method>>,
    inner: Arc<T>,
}

impl<T: ?Sized> Scoped<T> {
    fn applies_to(&self, method: &Method) -> bool {
        self.methods.as_ref().is_none_or(|m| m.contains(method))
    }
}

pub struct ResourceDescriptor<E: EntityTrait> {
    name: String,
    attributes: Vec<Attribute<E>>,
    primary_key: usize,
    collection_methods: Vec<Method>,
    item_methods: Vec<Method>,
    default_sort: Vec<String>,
    fields: Vec<String>,
    attr_map: BTreeMap<String, AttrFilter>,
    param_filters: BTreeMap<String, ParamFilter<E>>,
    path_map: BTreeMap<String, String>,
    post_types: Vec<PostType>,
    allow_put_insert: bool,
    max_batch_size: usize,
    identifiers: Vec<Scoped<dyn Identifier>>,
    authorizers: Vec<Scoped<dyn Authorizer>>,
}

impl<E: EntityTrait> ResourceDescriptor<E> {
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ResourceDescriptorBuilder<E> {
        ResourceDescriptorBuilder::new(name)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn attributes(&self) -> &[Attribute<E>] {
        &self.attributes
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Attribute<E>> {
        self.attributes.iter().find(|a| a.name == name)
    }

    #[must_use]
    pub fn primary_key(&self) -> &Attribute<E> {
        &self.attributes[self.primary_key]
    }

    #[must_use]
    pub fn default_sort(&self) -> &[String] {
        &self.default_sort
    }

    /// Visible fields in declared order.
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    #[must_use]
    pub fn attr_filter(&self, param: &str) -> Option<&AttrFilter> {
        self.attr_map.get(param)
    }

    /// The operator registered for a parameter suffix, if any.
    #[must_use]
    pub fn param_filter(&self, suffix: &str) -> Option<&ParamFilter<E>> {
        self.param_filters.get(suffix)
    }

    #[must_use]
    pub fn accepts_post(&self, post_type: PostType) -> bool {
        self.post_types.contains(&post_type)
    }

    /// The attribute a path parameter scopes, if it is mapped.
    #[must_use]
    pub fn path_attribute(&self, param: &str) -> Option<&Attribute<E>> {
        self.path_map.get(param).and_then(|name| self.attribute(name))
    }

    #[must_use]
    pub fn collection_methods(&self) -> &[Method] {
        &self.collection_methods
    }

    #[must_use]
    pub fn item_methods(&self) -> &[Method] {
        &self.item_methods
    }

    #[must_use]
    pub fn allow_put_insert(&self) -> bool {
        self.allow_put_insert
    }

    #[must_use]
    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// The first identifier registered for `method`.
    #[must_use]
    pub fn identifier(&self, method: &Method) -> Option<&Arc<dyn Identifier>> {
        self.identifiers
            .iter()
            .find(|s| s.applies_to(method))
            .map(|s| &s.inner)
    }

    /// Every authorizer registered for `method`, in registration order.
    pub fn authorizers<'a>(
        &'a self,
        method: &'a Method,
    ) -> impl Iterator<Item = &'a Arc<dyn Authorizer>> + 'a {
        self.authorizers
            .iter()
            .filter(move |s| s.applies_to(method))
            .map(|s| &s.inner)
    }

    /// Resolve a per-request field list (from the `response_fields` hook) to declared order.
    ///
    /// # Errors
    /// `InvalidParameter` naming the first unknown field.
    pub fn resolve_fields(&self, requested: &[String]) -> Result<Vec<String>, ApiError> {
        if let Some(unknown) = requested.iter().find(|f| self.attribute(f).is_none()) {
            return Err(ApiError::invalid_parameter(
                "fields",
                format!("unknown field '{unknown}'"),
            ));
        }
        Ok(self
            .attributes
            .iter()
            .filter(|a| requested.contains(&a.name))
            .map(|a| a.name.clone())
            .collect())
    }
}

impl<E: EntityTrait> fmt::Debug for ResourceDescriptor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDescriptor")
            .field("name", &self.name)
            .field(
                "attributes",
                &self.attributes.iter().map(|a| &a.name).collect::<Vec<_>>(),
            )
            .field("collection_methods", &self.collection_methods)
            .field("item_methods", &self.item_methods)
            .field("default_sort", &self.default_sort)
            .field("fields", &self.fields)
            .field("attr_map", &self.attr_map.keys().collect::<Vec<_>>())
            .field("param_filters", &self.param_filters.keys().collect::<Vec<_>>())
            .field("path_map", &self.path_map)
            .field("post_types", &self.post_types)
            .field("allow_put_insert", &self.allow_put_insert)
            .field("max_batch_size", &self.max_batch_size)
            .finish_non_exhaustive()
    }
}

/// Declares a resource; [`build`](Self::build) validates the declaration.
///
/// ```rust,ignore
/// let employees = ResourceDescriptor::<employee::Entity>::builder("employee")
///     .default_sort(["name", "-salary"])
///     .fields(["id", "name", "salary"])
///     .item_methods(&[Method::GET, Method::PATCH])
///     .build()?;
/// ```
pub struct ResourceDescriptorBuilder<E: EntityTrait> {
    name: String,
    collection_methods: Vec<Method>,
    item_methods: Vec<Method>,
    default_sort: Vec<String>,
    fields: Option<Vec<String>>,
    attr_map: BTreeMap<String, AttrFilter>,
    param_filters: BTreeMap<String, ParamFilter<E>>,
    path_map: Option<BTreeMap<String, String>>,
    post_types: Vec<PostType>,
    storage_assigned: Vec<String>,
    allow_put_insert: bool,
    max_batch_size: usize,
    identifiers: Vec<Scoped<dyn Identifier>>,
    authorizers: Vec<Scoped<dyn Authorizer>>,
    _entity: std::marker::PhantomData<E>,
}

impl<E: EntityTrait> ResourceDescriptorBuilder<E> {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection_methods: vec![Method::GET, Method::POST, Method::PATCH],
            item_methods: vec![Method::GET, Method::PUT, Method::PATCH, Method::DELETE],
            default_sort: Vec::new(),
            fields: None,
            attr_map: BTreeMap::new(),
            param_filters: BTreeMap::new(),
            path_map: None,
            post_types: vec![PostType::Object],
            storage_assigned: Vec::new(),
            allow_put_insert: false,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            identifiers: Vec::new(),
            authorizers: Vec::new(),
            _entity: std::marker::PhantomData,
        }
    }

    #[must_use]
    pub fn collection_methods(mut self, methods: &[Method]) -> Self {
        self.collection_methods = methods.to_vec();
        self
    }

    #[must_use]
    pub fn item_methods(mut self, methods: &[Method]) -> Self {
        self.item_methods = methods.to_vec();
        self
    }

    /// Sort keys used when the request has no `__sort`; `-` prefix for descending.
    #[must_use]
    pub fn default_sort<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_sort = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Attributes serialized in responses. All attributes when unset.
    #[must_use]
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Delegate query parameter `param` to a predicate builder, e.g. a join on a related table.
    #[must_use]
    pub fn attr_filter<F>(mut self, param: impl Into<String>, builder: F) -> Self
    where
        F: Fn(&str) -> Result<Condition, ApiError> + Send + Sync + 'static,
    {
        self.attr_map.insert(param.into(), Arc::new(builder));
        self
    }

    /// Register a comparison operator for `<attribute>__<suffix>` parameters.
    ///
    /// ```rust,ignore
    /// builder.param_filter("ne", |attr, raw| {
    ///     Ok(Condition::all().add(attr.column.ne(attr.parse(raw)?)))
    /// })
    /// ```
    #[must_use]
    pub fn param_filter<F>(mut self, suffix: impl Into<String>, builder: F) -> Self
    where
        F: Fn(&Attribute<E>, &str) -> Result<Condition, String> + Send + Sync + 'static,
    {
        self.param_filters.insert(suffix.into(), Arc::new(builder));
        self
    }

    /// Body shapes accepted by collection POST. Objects only by default.
    #[must_use]
    pub fn post_types(mut self, types: &[PostType]) -> Self {
        self.post_types = types.to_vec();
        self
    }

    /// Map a path parameter onto an attribute. Replaces the default `id` mapping.
    #[must_use]
    pub fn path_param(mut self, param: impl Into<String>, attribute: impl Into<String>) -> Self {
        self.path_map
            .get_or_insert_with(BTreeMap::new)
            .insert(param.into(), attribute.into());
        self
    }

    #[must_use]
    pub fn storage_assigned(mut self, attribute: impl Into<String>) -> Self {
        self.storage_assigned.push(attribute.into());
        self
    }

    /// Let PUT on a missing identifier create the row.
    #[must_use]
    pub fn allow_put_insert(mut self, allow: bool) -> Self {
        self.allow_put_insert = allow;
        self
    }

    #[must_use]
    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    #[must_use]
    pub fn identifier(mut self, identifier: Arc<dyn Identifier>) -> Self {
        self.identifiers.push(Scoped {
            methods: None,
            inner: identifier,
        });
        self
    }

    #[must_use]
    pub fn identifier_for(mut self, methods: &[Method], identifier: Arc<dyn Identifier>) -> Self {
        self.identifiers.push(Scoped {
            methods: Some(methods.to_vec()),
            inner: identifier,
        });
        self
    }

    #[must_use]
    pub fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizers.push(Scoped {
            methods: None,
            inner: authorizer,
        });
        self
    }

    #[must_use]
    pub fn authorizer_for(mut self, methods: &[Method], authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizers.push(Scoped {
            methods: Some(methods.to_vec()),
            inner: authorizer,
        });
        self
    }

    /// Validate the declaration against the entity.
    ///
    /// # Errors
    /// `ApiError::Internal` describing the first misconfiguration found.
    pub fn build(self) -> Result<ResourceDescriptor<E>, ApiError> {
        let invalid = |details: String| {
            ApiError::programming(format!("resource '{}': {details}", self.name))
        };

        let pk_columns: Vec<E::Column> = E::PrimaryKey::iter()
            .map(PrimaryKeyToColumn::into_column)
            .collect();
        let [pk_column] = pk_columns.as_slice() else {
            return Err(invalid(format!(
                "expected a single-column primary key, found {}",
                pk_columns.len()
            )));
        };
        let pk_name = pk_column.as_str().to_string();
        let auto_increment = <E::PrimaryKey as PrimaryKeyTrait>::auto_increment();

        let attributes: Vec<Attribute<E>> = E::Column::iter()
            .map(|column| {
                let def = column.def();
                let name = column.as_str().to_string();
                let primary_key = name == pk_name;
                Attribute {
                    storage_assigned: self.storage_assigned.contains(&name),
                    name,
                    column,
                    column_type: def.get_column_type().clone(),
                    nullable: def.is_null(),
                    primary_key,
                    auto_increment: primary_key && auto_increment,
                }
            })
            .collect();
        let known = |name: &str| attributes.iter().any(|a| a.name == name);

        let primary_key = attributes
            .iter()
            .position(|a| a.primary_key)
            .ok_or_else(|| invalid(format!("primary key '{pk_name}' is not a column")))?;

        for method in &self.collection_methods {
            if ![Method::GET, Method::POST, Method::PATCH].contains(method) {
                return Err(invalid(format!("{method} is not a collection operation")));
            }
        }
        for method in &self.item_methods {
            if ![Method::GET, Method::PUT, Method::PATCH, Method::DELETE].contains(method) {
                return Err(invalid(format!("{method} is not an item operation")));
            }
        }

        for key in &self.default_sort {
            let field = key.trim().trim_start_matches('-');
            if !known(field) {
                return Err(invalid(format!("default sort field '{field}' is not an attribute")));
            }
        }

        let fields = match &self.fields {
            Some(requested) => {
                if let Some(unknown) = requested.iter().find(|f| !known(f)) {
                    return Err(invalid(format!("visible field '{unknown}' is not an attribute")));
                }
                attributes
                    .iter()
                    .filter(|a| requested.contains(&a.name))
                    .map(|a| a.name.clone())
                    .collect()
            }
            None => attributes.iter().map(|a| a.name.clone()).collect(),
        };

        for param in self.attr_map.keys() {
            if conditions::is_reserved(param) {
                return Err(invalid(format!("'{param}' is reserved for sorting and paging")));
            }
        }

        for suffix in self.param_filters.keys() {
            if suffix.is_empty() || suffix.contains("__") {
                return Err(invalid(format!("'{suffix}' is not a valid operator suffix")));
            }
        }

        if self.post_types.is_empty() {
            return Err(invalid("post_types must allow objects or arrays".to_string()));
        }

        let path_map = self
            .path_map
            .clone()
            .unwrap_or_else(|| BTreeMap::from([(DEFAULT_ID_PARAM.to_string(), pk_name.clone())]));
        for (param, attribute) in &path_map {
            if !known(attribute) {
                return Err(invalid(format!(
                    "path parameter '{param}' maps to unknown attribute '{attribute}'"
                )));
            }
        }

        for attribute in &self.storage_assigned {
            if !known(attribute) {
                return Err(invalid(format!("storage-assigned '{attribute}' is not an attribute")));
            }
        }

        if self.max_batch_size == 0 {
            return Err(invalid("max_batch_size must be at least 1".to_string()));
        }

        Ok(ResourceDescriptor {
            name: self.name,
            attributes,
            primary_key,
            collection_methods: self.collection_methods,
            item_methods: self.item_methods,
            default_sort: self.default_sort,
            fields,
            attr_map: self.attr_map,
            param_filters: self.param_filters,
            path_map,
            post_types: self.post_types,
            allow_put_insert: self.allow_put_insert,
            max_batch_size: self.max_batch_size,
            identifiers: self.identifiers,
            authorizers: self.authorizers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{employee, employee_descriptor};

    #[test]
    fn attributes_come_from_the_entity() {
        let descriptor = employee_descriptor();
        let names: Vec<_> = descriptor.attributes().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["id", "name", "salary", "company_id", "owner", "deleted"]);
        assert_eq!(descriptor.primary_key().name, "id");
        assert!(descriptor.primary_key().auto_increment);
    }

    #[test]
    fn required_attributes() {
        let descriptor = employee_descriptor();
        let required: Vec<_> = descriptor
            .attributes()
            .iter()
            .filter(|a| a.is_required())
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(required, ["name", "salary"]);
    }

    #[test]
    fn defaults() {
        let descriptor = ResourceDescriptor::<employee::Entity>::builder("employee")
            .build()
            .unwrap();
        assert_eq!(
            descriptor.collection_methods(),
            [Method::GET, Method::POST, Method::PATCH]
        );
        assert_eq!(descriptor.item_methods().len(), 4);
        assert_eq!(descriptor.max_batch_size(), DEFAULT_MAX_BATCH_SIZE);
        assert_eq!(descriptor.path_attribute("id").map(|a| a.name.as_str()), Some("id"));
        assert_eq!(descriptor.fields().len(), 6);
        assert!(descriptor.accepts_post(PostType::Object));
        assert!(!descriptor.accepts_post(PostType::Array));
        assert!(descriptor.param_filter("ne").is_none());
    }

    #[test]
    fn attributes_parse_raw_values_by_type() {
        let descriptor = employee_descriptor();
        let salary = descriptor.attribute("salary").unwrap();
        assert_eq!(salary.parse("12"), Ok(Value::Int(Some(12))));
        assert!(salary.parse("twelve").is_err());
    }

    #[test]
    fn visible_fields_follow_declared_order() {
        let descriptor = ResourceDescriptor::<employee::Entity>::builder("employee")
            .fields(["salary", "id"])
            .build()
            .unwrap();
        assert_eq!(descriptor.fields(), ["id", "salary"]);
        assert_eq!(
            descriptor.resolve_fields(&["name".to_string(), "id".to_string()]).unwrap(),
            ["id", "name"]
        );
        assert!(descriptor.resolve_fields(&["height".to_string()]).is_err());
    }

    #[test]
    fn misconfiguration_fails_at_build() {
        let cases = [
            ResourceDescriptor::<employee::Entity>::builder("employee").default_sort(["-height"]),
            ResourceDescriptor::<employee::Entity>::builder("employee").fields(["height"]),
            ResourceDescriptor::<employee::Entity>::builder("employee").path_param("id", "uuid"),
            ResourceDescriptor::<employee::Entity>::builder("employee")
                .collection_methods(&[Method::DELETE]),
            ResourceDescriptor::<employee::Entity>::builder("employee").max_batch_size(0),
            ResourceDescriptor::<employee::Entity>::builder("employee")
                .attr_filter("__limit", |_| Ok(Condition::all())),
            ResourceDescriptor::<employee::Entity>::builder("employee").post_types(&[]),
            ResourceDescriptor::<employee::Entity>::builder("employee")
                .param_filter("not__in", |_, _| Ok(Condition::all())),
        ];
        for builder in cases {
            let err = builder.build().unwrap_err();
            assert!(err.is_internal());
        }
    }
}
