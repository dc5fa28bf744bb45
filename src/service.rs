//! Resource operations behind the REST routes.
//!
//! `ResourceService` owns the rules a plain storage call cannot enforce on
//! its own: references must point at existing rows, unique fields must stay
//! unique and deletes follow each reference's `OnDelete` policy.

use crate::domain::{
    Course, Notification, Resource, Schedule, Student, Teacher, TimetableEntry, User,
};
use crate::error::{Result, TimetableError, ValidationErrors};
use crate::metrics::ResourceMetrics;
use crate::schema::{FieldKind, OnDelete, Table};
use crate::storage::{row_id, ListQuery, Mutation, Row, Storage};
use crate::validation::{self, Mode};
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Timestamp format stored in `created_at`/`updated_at`. Fixed width, so
/// string order is time order.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn from_row<T: Resource>(row: Row) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

/// Validation hashes passwords, so tables with a password field are
/// validated on the blocking pool.
async fn validate_payload(table: Table, payload: &Value, mode: Mode) -> Result<Row> {
    let hashes = table
        .fields()
        .iter()
        .any(|field| matches!(field.kind, FieldKind::Password { .. }));
    if !hashes {
        return validation::validate(table, payload, mode);
    }
    let payload = payload.clone();
    tokio::task::spawn_blocking(move || validation::validate(table, &payload, mode))
        .await
        .map_err(|e| TimetableError::Storage(format!("validation task failed: {e}")))?
}

#[derive(Clone)]
pub struct ResourceService {
    storage: Arc<dyn Storage>,
}

impl ResourceService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub async fn list<T: Resource>(&self, params: &HashMap<String, String>) -> Result<Vec<T>> {
        let query = validation::parse_filters(T::TABLE, params)?;
        let rows = self.storage.list(T::TABLE, &query).await?;
        ResourceMetrics::record(T::TABLE, "index");
        rows.into_iter().map(from_row::<T>).collect()
    }

    pub async fn show<T: Resource>(&self, id: Uuid) -> Result<T> {
        let row = self.require(T::TABLE, id).await?;
        ResourceMetrics::record(T::TABLE, "show");
        from_row(row)
    }

    pub async fn create<T: Resource>(&self, payload: &Value) -> Result<T> {
        let row = self.prepare_insert(T::TABLE, payload).await?;
        let id = row_id(&row);
        self.storage
            .apply(vec![Mutation::Insert {
                table: T::TABLE,
                row: row.clone(),
            }])
            .await?;
        info!("Created {} {:?}", T::TABLE.label(), id);
        ResourceMetrics::record(T::TABLE, "store");
        from_row(row)
    }

    pub async fn update<T: Resource>(&self, id: Uuid, payload: &Value) -> Result<T> {
        let table = T::TABLE;
        let mut row = self.require(table, id).await?;
        let mut changes = validate_payload(table, payload, Mode::Update).await?;

        let mut errors = self.check_references(table, &changes, &[]).await?;
        errors.merge(self.check_unique(table, &changes, Some(id)).await?);
        errors.into_result()?;

        for (column, value) in &changes {
            row.insert(column.clone(), value.clone());
        }
        validation::check_row(table, &row).into_result()?;

        let now = Value::String(timestamp());
        changes.insert("updated_at".to_string(), now.clone());
        row.insert("updated_at".to_string(), now);
        self.storage
            .apply(vec![Mutation::Update { table, id, changes }])
            .await?;
        info!("Updated {} {}", table.label(), id);
        ResourceMetrics::record(table, "update");
        from_row(row)
    }

    pub async fn delete<T: Resource>(&self, id: Uuid) -> Result<()> {
        let plan = self.plan_delete(T::TABLE, id).await?;
        let removed = plan
            .iter()
            .filter(|m| matches!(m, Mutation::Delete { .. }))
            .count();
        self.storage.apply(plan).await?;
        info!(
            "Deleted {} {} ({} rows removed)",
            T::TABLE.label(),
            id,
            removed
        );
        ResourceMetrics::record(T::TABLE, "destroy");
        Ok(())
    }

    /// Validates a create payload and returns the complete row to insert,
    /// with a fresh id and timestamps.
    pub async fn prepare_insert(&self, table: Table, payload: &Value) -> Result<Row> {
        self.prepare_insert_with(table, payload, &[]).await
    }

    /// Like [`prepare_insert`](Self::prepare_insert), treating `pending` rows
    /// as existing. Used when one batch inserts a row and its dependents.
    pub async fn prepare_insert_with(
        &self,
        table: Table,
        payload: &Value,
        pending: &[(Table, Uuid)],
    ) -> Result<Row> {
        let mut row = validate_payload(table, payload, Mode::Create).await?;

        let mut errors = self.check_references(table, &row, pending).await?;
        errors.merge(self.check_unique(table, &row, None).await?);
        errors.merge(validation::check_row(table, &row));
        errors.into_result()?;

        let now = timestamp();
        row.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));
        row.insert("created_at".to_string(), Value::String(now.clone()));
        row.insert("updated_at".to_string(), Value::String(now));
        Ok(row)
    }

    pub async fn require(&self, table: Table, id: Uuid) -> Result<Row> {
        self.storage
            .get(table, id)
            .await?
            .ok_or(TimetableError::NotFound {
                resource: table.label(),
                id,
            })
    }

    pub async fn find<T: Resource>(&self, id: Uuid) -> Result<Option<T>> {
        self.storage
            .get(T::TABLE, id)
            .await?
            .map(from_row::<T>)
            .transpose()
    }

    pub async fn find_by<T: Resource>(&self, query: ListQuery) -> Result<Vec<T>> {
        let rows = self.storage.list(T::TABLE, &query).await?;
        rows.into_iter().map(from_row::<T>).collect()
    }

    async fn check_references(
        &self,
        table: Table,
        row: &Row,
        pending: &[(Table, Uuid)],
    ) -> Result<ValidationErrors> {
        let mut errors = ValidationErrors::new();
        for field in table.fields() {
            let Some((target, _)) = field.reference() else {
                continue;
            };
            let Some(id) = row
                .get(field.column())
                .and_then(Value::as_str)
                .and_then(|s| Uuid::parse_str(s).ok())
            else {
                continue;
            };
            if pending.contains(&(target, id)) {
                continue;
            }
            if self.storage.get(target, id).await?.is_none() {
                errors.add(field.name, format!("The selected {} is invalid.", field.name));
            }
        }
        Ok(errors)
    }

    async fn check_unique(
        &self,
        table: Table,
        row: &Row,
        except: Option<Uuid>,
    ) -> Result<ValidationErrors> {
        let mut errors = ValidationErrors::new();
        for field in table.fields().iter().filter(|f| f.unique) {
            let Some(value) = row.get(field.column()).filter(|v| !v.is_null()) else {
                continue;
            };
            let query = ListQuery::new().filter(field.column(), value.clone());
            let taken = self
                .storage
                .list(table, &query)
                .await?
                .iter()
                .any(|existing| row_id(existing) != except);
            if taken {
                errors.add(
                    field.name,
                    format!("The {} has already been taken.", field.name),
                );
            }
        }
        Ok(errors)
    }

    /// Works out every mutation needed to delete `(table, id)`.
    ///
    /// Cascading references pull their rows into the deletion set. A
    /// restricting reference from outside the set aborts the delete, and
    /// nullable references from outside the set are cleared.
    pub async fn plan_delete(&self, table: Table, id: Uuid) -> Result<Vec<Mutation>> {
        self.require(table, id).await?;

        let mut doomed: Vec<(Table, Uuid)> = Vec::new();
        let mut seen: HashSet<(Table, Uuid)> = HashSet::new();
        let mut queue = VecDeque::from([(table, id)]);
        seen.insert((table, id));
        while let Some((current, current_id)) = queue.pop_front() {
            doomed.push((current, current_id));
            for (dependent, field, on_delete) in Table::referencing(current) {
                if on_delete != OnDelete::Cascade {
                    continue;
                }
                for dep_id in self.dependents(dependent, field.column(), current_id).await? {
                    if seen.insert((dependent, dep_id)) {
                        queue.push_back((dependent, dep_id));
                    }
                }
            }
        }

        let mut blockers: Vec<String> = Vec::new();
        let mut mutations = Vec::new();
        let now = timestamp();
        for &(current, current_id) in &doomed {
            for (dependent, field, on_delete) in Table::referencing(current) {
                if on_delete == OnDelete::Cascade {
                    continue;
                }
                let outside: Vec<Uuid> = self
                    .dependents(dependent, field.column(), current_id)
                    .await?
                    .into_iter()
                    .filter(|dep_id| !seen.contains(&(dependent, *dep_id)))
                    .collect();
                if outside.is_empty() {
                    continue;
                }
                match on_delete {
                    OnDelete::Restrict => blockers.push(format!(
                        "{} {} is still referenced by {} {}(s) through {}",
                        current.label(),
                        current_id,
                        outside.len(),
                        dependent.label(),
                        field.name
                    )),
                    OnDelete::SetNull => {
                        for dep_id in outside {
                            let mut changes = Row::new();
                            changes.insert(field.column().to_string(), Value::Null);
                            changes.insert("updated_at".to_string(), Value::String(now.clone()));
                            mutations.push(Mutation::Update {
                                table: dependent,
                                id: dep_id,
                                changes,
                            });
                        }
                    }
                    OnDelete::Cascade => {}
                }
            }
        }

        if !blockers.is_empty() {
            return Err(TimetableError::Conflict(format!(
                "Cannot delete {} {}: {}",
                table.label(),
                id,
                blockers.join("; ")
            )));
        }

        debug!(
            "Delete plan for {} {}: {} deletions, {} detachments",
            table.label(),
            id,
            doomed.len(),
            mutations.len()
        );
        // Children first.
        mutations.extend(
            doomed
                .into_iter()
                .rev()
                .map(|(table, id)| Mutation::Delete { table, id }),
        );
        Ok(mutations)
    }

    async fn dependents(&self, table: Table, column: &str, id: Uuid) -> Result<Vec<Uuid>> {
        let query = ListQuery::new().filter(column, id.to_string());
        Ok(self
            .storage
            .list(table, &query)
            .await?
            .iter()
            .filter_map(row_id)
            .collect())
    }

    /// Weekly slots of every course taught by `teacher_id`.
    pub async fn teacher_timetable(&self, teacher_id: Uuid) -> Result<Vec<TimetableEntry>> {
        let teacher: Teacher = from_row(self.require(Table::Teachers, teacher_id).await?)?;
        let courses: Vec<Course> = self
            .find_by(ListQuery::new().filter("teacher_id", teacher.id.to_string()))
            .await?;
        ResourceMetrics::record(Table::Teachers, "timetable");
        self.timetable_for(courses, None).await
    }

    /// Weekly slots of every course in the student's department.
    pub async fn student_timetable(
        &self,
        student_id: Uuid,
        academic_year_id: Option<Uuid>,
    ) -> Result<Vec<TimetableEntry>> {
        let student: Student = from_row(self.require(Table::Students, student_id).await?)?;
        let courses: Vec<Course> = self
            .find_by(ListQuery::new().filter("department_id", student.department_id.to_string()))
            .await?;
        ResourceMetrics::record(Table::Students, "timetable");
        self.timetable_for(courses, academic_year_id).await
    }

    async fn timetable_for(
        &self,
        courses: Vec<Course>,
        academic_year_id: Option<Uuid>,
    ) -> Result<Vec<TimetableEntry>> {
        let mut entries = Vec::new();
        for course in courses {
            let mut query = ListQuery::new().filter("course_id", course.id.to_string());
            if let Some(year) = academic_year_id {
                query = query.filter("academic_year_id", year.to_string());
            }
            let schedules: Vec<Schedule> = self.find_by(query).await?;
            entries.extend(schedules.into_iter().map(|schedule| TimetableEntry {
                schedule,
                course_title: course.title.clone(),
            }));
        }
        entries.sort_by(|a, b| {
            (a.schedule.day, a.schedule.start_time, &a.schedule.room).cmp(&(
                b.schedule.day,
                b.schedule.start_time,
                &b.schedule.room,
            ))
        });
        Ok(entries)
    }

    /// Notifications `user_id` should see, newest first.
    pub async fn inbox(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        let user: User = from_row(self.require(Table::Users, user_id).await?)?;
        let mut direct: Vec<Notification> = self
            .find_by(ListQuery::new().filter("user_id", user.id.to_string()))
            .await?;
        let broadcasts: Vec<Notification> = self
            .find_by(ListQuery::new().filter("user_id", Value::Null))
            .await?;
        direct.extend(broadcasts.into_iter().filter(|n| n.is_addressed_to(&user)));
        direct.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        ResourceMetrics::record(Table::Notifications, "inbox");
        Ok(direct)
    }
}
