use crate::entities;
use crate::errors::RollcallError;
use crate::geo::{Coordinate, Geofence};
use crate::settings::Database as DbCfg;
use crate::types::{
    AttendanceEvent, AttendanceStatus, ClassRecord, Credential, NewAttendance,
};
use chrono::{NaiveDate, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Database, DatabaseConnection, EntityTrait, NotSet,
    QueryFilter, QueryOrder, Set, SqlErr, TransactionTrait,
};

pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, RollcallError> {
    let db = Database::connect(&cfg.url).await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

// Class functions

pub async fn create_class(
    db: &DatabaseConnection,
    name: &str,
    geofence: Option<Geofence>,
) -> Result<ClassRecord, RollcallError> {
    let now = Utc::now().timestamp();

    let class = entities::class::ActiveModel {
        id: NotSet,
        name: Set(name.to_string()),
        geofence_latitude: Set(geofence.map(|g| g.center.latitude())),
        geofence_longitude: Set(geofence.map(|g| g.center.longitude())),
        geofence_radius_m: Set(geofence.map(|g| g.radius_m)),
        created_at: Set(now),
    };

    let model = class.insert(db).await?;
    class_from_model(model)
}

pub async fn get_class(
    db: &DatabaseConnection,
    class_id: i32,
) -> Result<Option<ClassRecord>, RollcallError> {
    use entities::class::Entity;

    match Entity::find_by_id(class_id).one(db).await? {
        Some(model) => Ok(Some(class_from_model(model)?)),
        None => Ok(None),
    }
}

/// Replace or clear a class geofence. Returns `None` when the class does not exist.
pub async fn set_class_geofence(
    db: &DatabaseConnection,
    class_id: i32,
    geofence: Option<Geofence>,
) -> Result<Option<ClassRecord>, RollcallError> {
    use entities::class::Entity;

    let Some(model) = Entity::find_by_id(class_id).one(db).await? else {
        return Ok(None);
    };

    let mut active: entities::class::ActiveModel = model.into();
    active.geofence_latitude = Set(geofence.map(|g| g.center.latitude()));
    active.geofence_longitude = Set(geofence.map(|g| g.center.longitude()));
    active.geofence_radius_m = Set(geofence.map(|g| g.radius_m));
    let updated = active.update(db).await?;

    Ok(Some(class_from_model(updated)?))
}

fn class_from_model(model: entities::class::Model) -> Result<ClassRecord, RollcallError> {
    // A fence only counts when all three columns are populated
    let geofence = match (
        model.geofence_latitude,
        model.geofence_longitude,
        model.geofence_radius_m,
    ) {
        (Some(lat), Some(lon), Some(radius)) => {
            Some(Geofence::new(Coordinate::new(lat, lon)?, radius)?)
        }
        _ => None,
    };

    Ok(ClassRecord {
        id: model.id,
        name: model.name,
        geofence,
        created_at: model.created_at,
    })
}

// Attendance functions

pub async fn find_attendance(
    db: &DatabaseConnection,
    subject: &str,
    class_id: i32,
    date: NaiveDate,
) -> Result<Option<AttendanceEvent>, RollcallError> {
    use entities::attendance::{Column, Entity};

    match Entity::find()
        .filter(Column::Subject.eq(subject))
        .filter(Column::ClassId.eq(class_id))
        .filter(Column::Date.eq(date))
        .one(db)
        .await?
    {
        Some(model) => Ok(Some(event_from_model(model)?)),
        None => Ok(None),
    }
}

/// Insert a new record. A second record for the same subject, class and day
/// fails with [`RollcallError::Duplicate`].
pub async fn insert_attendance(
    db: &DatabaseConnection,
    input: NewAttendance,
) -> Result<AttendanceEvent, RollcallError> {
    let record = entities::attendance::ActiveModel {
        id: NotSet,
        subject: Set(input.subject.clone()),
        class_id: Set(input.class_id),
        date: Set(input.date),
        timestamp: Set(input.timestamp),
        status: Set(input.status.as_str().to_string()),
        verification_method: Set(input.verification_method.as_str().to_string()),
        note: Set(input.note.clone()),
        latitude: Set(input.coordinate.map(|c| c.latitude())),
        longitude: Set(input.coordinate.map(|c| c.longitude())),
    };

    match record.insert(db).await {
        Ok(model) => event_from_model(model),
        Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
            Err(RollcallError::Duplicate(format!(
                "attendance for {} in class {} on {}",
                input.subject, input.class_id, input.date
            )))
        }
        Err(e) => Err(e.into()),
    }
}

/// Correct the status and optionally the note of a record. Identity fields
/// are never touched.
pub async fn update_attendance(
    db: &DatabaseConnection,
    id: i32,
    status: AttendanceStatus,
    note: Option<String>,
) -> Result<Option<AttendanceEvent>, RollcallError> {
    use entities::attendance::Entity;

    let Some(model) = Entity::find_by_id(id).one(db).await? else {
        return Ok(None);
    };

    let mut active: entities::attendance::ActiveModel = model.into();
    active.status = Set(status.as_str().to_string());
    if note.is_some() {
        active.note = Set(note);
    }
    let updated = active.update(db).await?;

    Ok(Some(event_from_model(updated)?))
}

pub async fn list_class_attendance(
    db: &DatabaseConnection,
    class_id: i32,
    date: NaiveDate,
) -> Result<Vec<AttendanceEvent>, RollcallError> {
    use entities::attendance::{Column, Entity};

    Entity::find()
        .filter(Column::ClassId.eq(class_id))
        .filter(Column::Date.eq(date))
        .order_by_asc(Column::Timestamp)
        .all(db)
        .await?
        .into_iter()
        .map(event_from_model)
        .collect()
}

pub async fn list_subject_attendance(
    db: &DatabaseConnection,
    subject: &str,
) -> Result<Vec<AttendanceEvent>, RollcallError> {
    use entities::attendance::{Column, Entity};

    Entity::find()
        .filter(Column::Subject.eq(subject))
        .order_by_desc(Column::Date)
        .order_by_asc(Column::ClassId)
        .all(db)
        .await?
        .into_iter()
        .map(event_from_model)
        .collect()
}

fn event_from_model(model: entities::attendance::Model) -> Result<AttendanceEvent, RollcallError> {
    let coordinate = match (model.latitude, model.longitude) {
        (Some(lat), Some(lon)) => Some(Coordinate::new(lat, lon)?),
        _ => None,
    };

    Ok(AttendanceEvent {
        id: model.id,
        subject: model.subject,
        class_id: model.class_id,
        date: model.date,
        timestamp: model.timestamp,
        status: model.status.parse()?,
        verification_method: model.verification_method.parse()?,
        note: model.note,
        coordinate,
    })
}

// Credential functions

pub async fn get_credential_by_subject(
    db: &DatabaseConnection,
    subject: &str,
) -> Result<Option<Credential>, RollcallError> {
    use entities::credential::{Column, Entity};

    let credential = Entity::find()
        .filter(Column::Subject.eq(subject))
        .one(db)
        .await?;

    Ok(credential.map(credential_from_model))
}

/// Store `credential` as the only credential of its subject, dropping any
/// previous one in the same transaction.
///
/// A credential id already bound to another subject fails with
/// [`RollcallError::Duplicate`] and leaves both subjects untouched.
pub async fn replace_credential(
    db: &DatabaseConnection,
    credential: &Credential,
) -> Result<Credential, RollcallError> {
    use entities::credential::{Column, Entity};

    let txn = db.begin().await?;

    Entity::delete_many()
        .filter(Column::Subject.eq(credential.subject.as_str()))
        .exec(&txn)
        .await?;

    let inserted = entities::credential::ActiveModel {
        credential_id: Set(credential.credential_id.clone()),
        subject: Set(credential.subject.clone()),
        public_key: Set(credential.public_key.clone()),
        created_at: Set(credential.created_at),
        last_used_at: Set(credential.last_used_at),
    }
    .insert(&txn)
    .await;

    // Dropping `txn` without commit rolls the delete back
    let model = match inserted {
        Ok(model) => model,
        Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
            return Err(RollcallError::Duplicate(format!(
                "credential {} is registered to another subject",
                credential.credential_id
            )));
        }
        Err(e) => return Err(e.into()),
    };

    txn.commit().await?;

    Ok(credential_from_model(model))
}

pub async fn touch_credential(
    db: &DatabaseConnection,
    subject: &str,
    used_at: i64,
) -> Result<(), RollcallError> {
    use entities::credential::{Column, Entity};

    if let Some(credential) = Entity::find()
        .filter(Column::Subject.eq(subject))
        .one(db)
        .await?
    {
        let mut active: entities::credential::ActiveModel = credential.into();
        active.last_used_at = Set(Some(used_at));
        active.update(db).await?;
    }

    Ok(())
}

pub async fn delete_credential(db: &DatabaseConnection, subject: &str) -> Result<bool, RollcallError> {
    use entities::credential::{Column, Entity};

    let result = Entity::delete_many()
        .filter(Column::Subject.eq(subject))
        .exec(db)
        .await?;

    Ok(result.rows_affected > 0)
}

fn credential_from_model(model: entities::credential::Model) -> Credential {
    Credential {
        subject: model.subject,
        credential_id: model.credential_id,
        public_key: model.public_key,
        created_at: model.created_at,
        last_used_at: model.last_used_at,
    }
}
