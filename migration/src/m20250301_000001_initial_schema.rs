use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Enable foreign keys for SQLite
        if manager.get_database_backend() == sea_orm::DatabaseBackend::Sqlite {
            manager
                .get_connection()
                .execute_unprepared("PRAGMA foreign_keys = ON")
                .await?;
        }

        // Classes carry an optional circular geofence
        manager
            .create_table(
                Table::create()
                    .table(Classes::Table)
                    .if_not_exists()
                    .col(pk_auto(Classes::Id))
                    .col(string(Classes::Name))
                    .col(double_null(Classes::GeofenceLatitude))
                    .col(double_null(Classes::GeofenceLongitude))
                    .col(double_null(Classes::GeofenceRadiusM))
                    .col(big_integer(Classes::CreatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Attendance::Table)
                    .if_not_exists()
                    .col(pk_auto(Attendance::Id))
                    .col(string(Attendance::Subject))
                    .col(integer(Attendance::ClassId))
                    .col(date(Attendance::Date))
                    .col(big_integer(Attendance::Timestamp))
                    .col(string(Attendance::Status))
                    .col(string(Attendance::VerificationMethod))
                    .col(string_null(Attendance::Note))
                    .col(double_null(Attendance::Latitude))
                    .col(double_null(Attendance::Longitude))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_attendance_class")
                            .from(Attendance::Table, Attendance::ClassId)
                            .to(Classes::Table, Classes::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One record per subject, class and day. Concurrent marks race on this index.
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_attendance_subject_class_date")
                    .table(Attendance::Table)
                    .col(Attendance::Subject)
                    .col(Attendance::ClassId)
                    .col(Attendance::Date)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Roster lookups
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_attendance_class_date")
                    .table(Attendance::Table)
                    .col(Attendance::ClassId)
                    .col(Attendance::Date)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Attendance::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Classes::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Classes {
    Table,
    Id,
    Name,
    GeofenceLatitude,
    GeofenceLongitude,
    GeofenceRadiusM,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Attendance {
    Table,
    Id,
    Subject,
    ClassId,
    Date,
    Timestamp,
    Status,
    VerificationMethod,
    Note,
    Latitude,
    Longitude,
}
