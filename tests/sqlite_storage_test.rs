use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use tempfile::tempdir;
use timetable_api::domain::{AcademicYear, Department, University};
use timetable_api::service::ResourceService;
use timetable_api::storage::{SqliteStorage, Storage};

#[tokio::test]
async fn records_survive_reopening_the_database() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("nested").join("timetable.db");

    let (university, department) = {
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open(&path)?);
        let svc = ResourceService::new(storage);
        let university: University = svc
            .create(&json!({"name": "Université Assane Seck", "code": "UASZ"}))
            .await?;
        let department: Department = svc
            .create(&json!({"name": "Informatique", "university_id": university.id}))
            .await?;
        (university, department)
    };

    // Migrations are idempotent; the second open must not fail or wipe data.
    let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open(&path)?);
    let svc = ResourceService::new(storage);
    let found: Department = svc.show(department.id).await?;
    assert_eq!(found.name, "Informatique");
    assert_eq!(found.university_id, university.id);
    Ok(())
}

#[tokio::test]
async fn cascading_delete_is_atomic_in_sqlite() -> Result<()> {
    let dir = tempdir()?;
    let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open(dir.path().join("t.db"))?);
    let svc = ResourceService::new(storage);

    let university: University = svc.create(&json!({"name": "UADB"})).await?;
    let year: AcademicYear = svc
        .create(&json!({"label": "2024-2025", "university_id": university.id}))
        .await?;
    svc.create::<Department>(&json!({"name": "Chimie", "university_id": university.id}))
        .await?;

    svc.delete::<University>(university.id).await?;

    assert!(svc.find::<AcademicYear>(year.id).await?.is_none());
    let departments: Vec<Department> = svc.list(&Default::default()).await?;
    assert!(departments.is_empty());
    Ok(())
}
