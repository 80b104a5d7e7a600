//! Fixtures shared by unit tests.

use crate::core::descriptor::ResourceDescriptor;

pub mod employee {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "employee")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub name: String,
        pub salary: i32,
        pub company_id: Option<i32>,
        pub owner: Option<String>,
        pub deleted: Option<bool>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub fn employee_descriptor() -> ResourceDescriptor<employee::Entity> {
    ResourceDescriptor::builder("employee")
        .default_sort(["id"])
        .build()
        .expect("employee descriptor is valid")
}
