use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "attendance")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub subject: String,
    pub class_id: i32,
    pub date: Date,
    pub timestamp: i64,
    pub status: String,              // "PRESENT" | "ABSENT" | "LATE" | "EXCUSED"
    pub verification_method: String, // "manual" | "geofence" | "biometric+geofence" | "testing"
    pub note: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
