//! Resource catalogue
//!
//! Every table the API exposes is described here as data: its fillable
//! fields, how they validate, which of them are references and what happens
//! to a referencing row when its target is deleted. Storage, validation and
//! delete planning all read from this one place.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What happens to a referencing row when the referenced row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDelete {
    Restrict,
    SetNull,
    Cascade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text { min: usize, max: usize },
    Email,
    Password { min: usize },
    Bool,
    Role,
    Weekday,
    Time,
    Reference { table: Table, on_delete: OnDelete },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub unique: bool,
    /// Alternate input key accepted in payloads.
    pub alias: Option<&'static str>,
}

impl Field {
    const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: false,
            unique: false,
            alias: None,
        }
    }

    const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    const fn alias(mut self, alias: &'static str) -> Self {
        self.alias = Some(alias);
        self
    }

    /// Storage column backing this field.
    pub fn column(&self) -> &'static str {
        match self.kind {
            FieldKind::Password { .. } => "password_hash",
            _ => self.name,
        }
    }

    pub fn reference(&self) -> Option<(Table, OnDelete)> {
        match self.kind {
            FieldKind::Reference { table, on_delete } => Some((table, on_delete)),
            _ => None,
        }
    }
}

const fn text(name: &'static str, min: usize, max: usize) -> Field {
    Field::new(name, FieldKind::Text { min, max })
}

const fn reference(name: &'static str, table: Table, on_delete: OnDelete) -> Field {
    Field::new(name, FieldKind::Reference { table, on_delete })
}

const USER_FIELDS: &[Field] = &[
    text("name", 3, 255).required(),
    Field::new("email", FieldKind::Email).required().unique(),
    Field::new("password", FieldKind::Password { min: 8 }).required(),
    Field::new("role", FieldKind::Role).required(),
    text("phone", 8, 32),
    reference("university_id", Table::Universities, OnDelete::SetNull),
];

const UNIVERSITY_FIELDS: &[Field] = &[
    text("name", 2, 255).required(),
    text("code", 2, 32).unique(),
    text("address", 5, 255),
    text("logo", 1, 2048),
    reference("admin_id", Table::Users, OnDelete::SetNull),
];

const ACADEMIC_YEAR_FIELDS: &[Field] = &[
    text("label", 1, 64).required(),
    Field::new("is_active", FieldKind::Bool),
    reference("university_id", Table::Universities, OnDelete::Cascade).required(),
];

const DEPARTMENT_FIELDS: &[Field] = &[
    text("name", 2, 255).required(),
    reference("university_id", Table::Universities, OnDelete::Cascade).required(),
];

const TEACHER_FIELDS: &[Field] = &[
    reference("user_id", Table::Users, OnDelete::Cascade)
        .required()
        .unique(),
    reference("department_id", Table::Departments, OnDelete::Restrict).required(),
    reference("university_id", Table::Universities, OnDelete::Cascade).required(),
    text("speciality", 1, 255).required(),
    text("staff_number", 1, 64),
];

const STUDENT_FIELDS: &[Field] = &[
    reference("user_id", Table::Users, OnDelete::Cascade)
        .required()
        .unique(),
    reference("department_id", Table::Departments, OnDelete::Restrict).required(),
    reference("university_id", Table::Universities, OnDelete::Cascade).required(),
    text("matricule", 1, 64).required().unique(),
];

const COURSE_FIELDS: &[Field] = &[
    text("title", 1, 255).required(),
    text("description", 1, 5000),
    reference("teacher_id", Table::Teachers, OnDelete::SetNull),
    reference("department_id", Table::Departments, OnDelete::Restrict).required(),
    reference("university_id", Table::Universities, OnDelete::Cascade).required(),
    reference("academic_year_id", Table::AcademicYears, OnDelete::SetNull),
];

const SCHEDULE_FIELDS: &[Field] = &[
    reference("course_id", Table::Courses, OnDelete::Cascade).required(),
    reference("academic_year_id", Table::AcademicYears, OnDelete::SetNull),
    reference("university_id", Table::Universities, OnDelete::Cascade).required(),
    Field::new("day", FieldKind::Weekday).required(),
    Field::new("start_time", FieldKind::Time).required(),
    Field::new("end_time", FieldKind::Time).required(),
    text("room", 1, 64),
];

const NOTIFICATION_FIELDS: &[Field] = &[
    text("title", 1, 255).required(),
    text("message", 1, 5000).required(),
    reference("user_id", Table::Users, OnDelete::Cascade),
    reference("university_id", Table::Universities, OnDelete::Cascade).alias("universite_id"),
    Field::new("target_role", FieldKind::Role),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Users,
    Universities,
    AcademicYears,
    Departments,
    Teachers,
    Students,
    Courses,
    Schedules,
    Notifications,
}

impl Table {
    pub const ALL: [Table; 9] = [
        Table::Users,
        Table::Universities,
        Table::AcademicYears,
        Table::Departments,
        Table::Teachers,
        Table::Students,
        Table::Courses,
        Table::Schedules,
        Table::Notifications,
    ];

    /// SQL table name.
    pub fn name(&self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::Universities => "universities",
            Table::AcademicYears => "academic_years",
            Table::Departments => "departments",
            Table::Teachers => "teachers",
            Table::Students => "students",
            Table::Courses => "courses",
            Table::Schedules => "schedules",
            Table::Notifications => "notifications",
        }
    }

    /// URL segment under `/api`.
    pub fn path(&self) -> &'static str {
        match self {
            Table::AcademicYears => "academic-years",
            other => other.name(),
        }
    }

    /// Singular name used in messages.
    pub fn label(&self) -> &'static str {
        match self {
            Table::Users => "user",
            Table::Universities => "university",
            Table::AcademicYears => "academic year",
            Table::Departments => "department",
            Table::Teachers => "teacher",
            Table::Students => "student",
            Table::Courses => "course",
            Table::Schedules => "schedule",
            Table::Notifications => "notification",
        }
    }

    pub fn fields(&self) -> &'static [Field] {
        match self {
            Table::Users => USER_FIELDS,
            Table::Universities => UNIVERSITY_FIELDS,
            Table::AcademicYears => ACADEMIC_YEAR_FIELDS,
            Table::Departments => DEPARTMENT_FIELDS,
            Table::Teachers => TEACHER_FIELDS,
            Table::Students => STUDENT_FIELDS,
            Table::Courses => COURSE_FIELDS,
            Table::Schedules => SCHEDULE_FIELDS,
            Table::Notifications => NOTIFICATION_FIELDS,
        }
    }

    pub fn field(&self, name: &str) -> Option<&'static Field> {
        self.fields().iter().find(|f| f.name == name)
    }

    /// All storage columns, in table order.
    pub fn columns(&self) -> Vec<&'static str> {
        let mut columns = vec!["id"];
        columns.extend(self.fields().iter().map(Field::column));
        columns.push("created_at");
        columns.push("updated_at");
        columns
    }

    /// Whether `column` holds a boolean (stored as an integer in SQLite).
    pub fn is_bool_column(&self, column: &str) -> bool {
        self.fields()
            .iter()
            .any(|f| f.column() == column && f.kind == FieldKind::Bool)
    }

    /// Every `(table, field, on_delete)` whose reference points at `target`.
    pub fn referencing(target: Table) -> Vec<(Table, &'static Field, OnDelete)> {
        Table::ALL
            .iter()
            .flat_map(|table| {
                table.fields().iter().filter_map(move |field| match field.reference() {
                    Some((to, on_delete)) if to == target => Some((*table, field, on_delete)),
                    _ => None,
                })
            })
            .collect()
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_password_is_stored_as_hash_column() {
        let columns = Table::Users.columns();
        assert!(columns.contains(&"password_hash"));
        assert!(!columns.contains(&"password"));
        assert_eq!(columns.first(), Some(&"id"));
        assert_eq!(columns.last(), Some(&"updated_at"));
    }

    #[test]
    fn departments_are_referenced_by_people_and_courses() {
        let refs: Vec<(Table, &str, OnDelete)> = Table::referencing(Table::Departments)
            .into_iter()
            .map(|(t, f, d)| (t, f.name, d))
            .collect();
        assert_eq!(
            refs,
            vec![
                (Table::Teachers, "department_id", OnDelete::Restrict),
                (Table::Students, "department_id", OnDelete::Restrict),
                (Table::Courses, "department_id", OnDelete::Restrict),
            ]
        );
    }

    #[test]
    fn notification_university_accepts_legacy_key() {
        let field = Table::Notifications.field("university_id").unwrap();
        assert_eq!(field.alias, Some("universite_id"));
    }

    #[test]
    fn academic_years_use_dashed_path() {
        assert_eq!(Table::AcademicYears.path(), "academic-years");
        assert_eq!(Table::AcademicYears.name(), "academic_years");
        assert!(Table::AcademicYears.is_bool_column("is_active"));
    }
}
