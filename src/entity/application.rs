use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "t_application")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub opportunity_id: i32,
    pub opportunity_title: Option<String>,
    pub student_id: i32,
    pub cover_letter: Option<String>,
    pub resume_base64: Option<String>,
    pub resume_name: Option<String>,
    pub cgpa: Option<f64>,
    pub tenth_percentage: Option<f64>,
    pub twelfth_percentage: Option<f64>,
    pub status: String,
    pub created: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
