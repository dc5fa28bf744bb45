//! Signup and login.
//!
//! Signup is a two-step wizard on the client (pick a role, then fill in the
//! form for that role). Here it is one request tagged by `role`; each role
//! validates its own form and creates its records in one atomic batch.
//! Login only checks credentials, no session or token is issued.

use crate::domain::{Department, Role, Teacher, University, User};
use crate::error::{Result, TimetableError, ValidationErrors};
use crate::password::verify_password;
use crate::schema::Table;
use crate::service::{from_row, ResourceService};
use crate::storage::{row_id, ListQuery, Mutation, Row};
use crate::validation::is_valid_email;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

pub const USERNAME_MIN: usize = 3;
pub const PASSWORD_MIN: usize = 8;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub email: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(alias = "confirmPassword")]
    pub confirm_password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AdminSignup {
    #[serde(flatten)]
    pub credentials: Credentials,
    #[serde(alias = "universityName")]
    pub university_name: Option<String>,
    #[serde(alias = "universityCode")]
    pub university_code: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TeacherSignup {
    #[serde(flatten)]
    pub credentials: Credentials,
    pub university: Option<String>,
    #[serde(alias = "teacherId")]
    pub teacher_id: Option<String>,
    pub department: Option<String>,
    pub subject: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StudentSignup {
    #[serde(flatten)]
    pub credentials: Credentials,
    pub university: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SignupOutcome {
    pub user: User,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub university: Option<University>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teacher: Option<Teacher>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    #[serde(alias = "rememberMe")]
    pub remember_me: bool,
}

#[derive(Debug, Serialize)]
pub struct LoginOutcome {
    pub user: User,
    pub remember_me: bool,
}

/// Trimmed, non-empty value of `value`, recording an error when it is
/// missing or shorter than `min` characters.
fn required(
    errors: &mut ValidationErrors,
    field: &str,
    value: &Option<String>,
    min: usize,
) -> Option<String> {
    let trimmed = value.as_deref().map(str::trim).filter(|s| !s.is_empty());
    match trimmed {
        None => {
            errors.add(field, format!("The {field} field is required."));
            None
        }
        Some(s) if s.chars().count() < min => {
            errors.add(
                field,
                format!("The {field} field must be at least {min} characters."),
            );
            None
        }
        Some(s) => Some(s.to_string()),
    }
}

fn required_id(errors: &mut ValidationErrors, field: &str, value: &Option<String>) -> Option<Uuid> {
    let raw = required(errors, field, value, 1)?;
    match Uuid::parse_str(&raw) {
        Ok(id) => Some(id),
        Err(_) => {
            errors.add(field, format!("The selected {field} is invalid."));
            None
        }
    }
}

/// Validated email, username and password.
struct Account {
    email: String,
    username: String,
    password: String,
}

fn check_credentials(errors: &mut ValidationErrors, credentials: &Credentials) -> Option<Account> {
    let email = required(errors, "email", &credentials.email, 1).and_then(|email| {
        let email = email.to_lowercase();
        if is_valid_email(&email) {
            Some(email)
        } else {
            errors.add("email", "The email field must be a valid email address.");
            None
        }
    });
    let username = required(errors, "username", &credentials.username, USERNAME_MIN);

    // Passwords are compared untrimmed.
    let password = match credentials.password.as_deref().filter(|p| !p.is_empty()) {
        None => {
            errors.add("password", "The password field is required.");
            None
        }
        Some(p) if p.chars().count() < PASSWORD_MIN => {
            errors.add(
                "password",
                format!("The password field must be at least {PASSWORD_MIN} characters."),
            );
            None
        }
        Some(p) => Some(p.to_string()),
    };
    if credentials.password != credentials.confirm_password {
        errors.add("confirm_password", "The passwords do not match.");
    }

    Some(Account {
        email: email?,
        username: username?,
        password: password?,
    })
}

fn parse_form<T: DeserializeOwned>(payload: &Value) -> Result<T> {
    serde_json::from_value(payload.clone()).map_err(|e| {
        TimetableError::validation("payload", format!("The signup form is malformed: {e}"))
    })
}

/// Maps storage field names back to the form's names.
fn form_error(err: TimetableError, rename: impl Fn(&str) -> &str) -> TimetableError {
    match err {
        TimetableError::Validation(errors) => TimetableError::Validation(errors.renamed(rename)),
        other => other,
    }
}

fn user_field(field: &str) -> &str {
    match field {
        "name" => "username",
        "university_id" => "university",
        other => other,
    }
}

pub async fn signup(svc: &ResourceService, payload: &Value) -> Result<SignupOutcome> {
    let role = payload
        .get("role")
        .and_then(Value::as_str)
        .map(str::parse::<Role>);
    let outcome = match role {
        Some(Ok(Role::Admin)) => signup_admin(svc, parse_form(payload)?).await?,
        Some(Ok(Role::Teacher)) => signup_teacher(svc, parse_form(payload)?).await?,
        Some(Ok(Role::Student)) => signup_student(svc, parse_form(payload)?).await?,
        Some(Err(_)) => {
            return Err(TimetableError::validation(
                "role",
                "The selected role is invalid.",
            ))
        }
        None => {
            return Err(TimetableError::validation(
                "role",
                "The role field is required.",
            ))
        }
    };
    info!(
        "Signed up {} {} ({})",
        outcome.user.role, outcome.user.id, outcome.user.email
    );
    Ok(outcome)
}

async fn signup_admin(svc: &ResourceService, form: AdminSignup) -> Result<SignupOutcome> {
    let mut errors = ValidationErrors::new();
    let account = check_credentials(&mut errors, &form.credentials);
    let university_name = required(&mut errors, "university_name", &form.university_name, 2);
    let university_code = required(&mut errors, "university_code", &form.university_code, 2);
    let address = required(&mut errors, "address", &form.address, 5);
    let phone = required(&mut errors, "phone", &form.phone, 8);
    errors.into_result()?;
    let (Some(account), Some(name), Some(code), Some(address), Some(phone)) =
        (account, university_name, university_code, address, phone)
    else {
        return Err(TimetableError::validation("payload", "The signup form is incomplete."));
    };

    let mut user_row = svc
        .prepare_insert(
            Table::Users,
            &json!({
                "name": account.username,
                "email": account.email,
                "password": account.password,
                "role": Role::Admin,
                "phone": phone,
            }),
        )
        .await
        .map_err(|e| form_error(e, user_field))?;
    let user_id = require_id(&user_row)?;

    let mut university_row = svc
        .prepare_insert_with(
            Table::Universities,
            &json!({
                "name": name,
                "code": code,
                "address": address,
                "admin_id": user_id,
            }),
            &[(Table::Users, user_id)],
        )
        .await
        .map_err(|e| {
            form_error(e, |field| match field {
                "name" => "university_name",
                "code" => "university_code",
                other => other,
            })
        })?;
    let university_id = require_id(&university_row)?;
    user_row.insert(
        "university_id".to_string(),
        Value::String(university_id.to_string()),
    );
    university_row.insert("admin_id".to_string(), Value::String(user_id.to_string()));

    svc.storage()
        .apply(vec![
            Mutation::Insert {
                table: Table::Users,
                row: user_row.clone(),
            },
            Mutation::Insert {
                table: Table::Universities,
                row: university_row.clone(),
            },
        ])
        .await?;

    Ok(SignupOutcome {
        user: from_row(user_row)?,
        university: Some(from_row(university_row)?),
        teacher: None,
    })
}

async fn signup_teacher(svc: &ResourceService, form: TeacherSignup) -> Result<SignupOutcome> {
    let mut errors = ValidationErrors::new();
    let account = check_credentials(&mut errors, &form.credentials);
    let university_id = required_id(&mut errors, "university", &form.university);
    let staff_number = required(&mut errors, "teacher_id", &form.teacher_id, 1);
    let department_id = required_id(&mut errors, "department", &form.department);
    let subject = required(&mut errors, "subject", &form.subject, 1);
    errors.into_result()?;
    let (Some(account), Some(university_id), Some(staff_number), Some(department_id), Some(subject)) =
        (account, university_id, staff_number, department_id, subject)
    else {
        return Err(TimetableError::validation("payload", "The signup form is incomplete."));
    };

    // The department must belong to the chosen university.
    let department = svc.find::<Department>(department_id).await?;
    if department.map(|d| d.university_id) != Some(university_id) {
        warn!(
            "Teacher signup with department {} outside university {}",
            department_id, university_id
        );
        return Err(TimetableError::validation(
            "department",
            "The selected department is invalid.",
        ));
    }

    let user_row = svc
        .prepare_insert(
            Table::Users,
            &json!({
                "name": account.username,
                "email": account.email,
                "password": account.password,
                "role": Role::Teacher,
                "university_id": university_id,
            }),
        )
        .await
        .map_err(|e| form_error(e, user_field))?;
    let user_id = require_id(&user_row)?;

    let teacher_row = svc
        .prepare_insert_with(
            Table::Teachers,
            &json!({
                "user_id": user_id,
                "department_id": department_id,
                "university_id": university_id,
                "speciality": subject,
                "staff_number": staff_number,
            }),
            &[(Table::Users, user_id)],
        )
        .await
        .map_err(|e| {
            form_error(e, |field| match field {
                "speciality" => "subject",
                "staff_number" => "teacher_id",
                "department_id" => "department",
                "university_id" => "university",
                other => other,
            })
        })?;

    svc.storage()
        .apply(vec![
            Mutation::Insert {
                table: Table::Users,
                row: user_row.clone(),
            },
            Mutation::Insert {
                table: Table::Teachers,
                row: teacher_row.clone(),
            },
        ])
        .await?;

    Ok(SignupOutcome {
        user: from_row(user_row)?,
        university: None,
        teacher: Some(from_row(teacher_row)?),
    })
}

async fn signup_student(svc: &ResourceService, form: StudentSignup) -> Result<SignupOutcome> {
    let mut errors = ValidationErrors::new();
    let account = check_credentials(&mut errors, &form.credentials);
    let university_id = required_id(&mut errors, "university", &form.university);
    errors.into_result()?;
    let (Some(account), Some(university_id)) = (account, university_id) else {
        return Err(TimetableError::validation("payload", "The signup form is incomplete."));
    };

    let user_row = svc
        .prepare_insert(
            Table::Users,
            &json!({
                "name": account.username,
                "email": account.email,
                "password": account.password,
                "role": Role::Student,
                "university_id": university_id,
            }),
        )
        .await
        .map_err(|e| form_error(e, user_field))?;

    svc.storage()
        .apply(vec![Mutation::Insert {
            table: Table::Users,
            row: user_row.clone(),
        }])
        .await?;

    Ok(SignupOutcome {
        user: from_row(user_row)?,
        university: None,
        teacher: None,
    })
}

fn require_id(row: &Row) -> Result<Uuid> {
    row_id(row).ok_or_else(|| TimetableError::Storage("prepared row has no id".to_string()))
}

pub async fn login(svc: &ResourceService, request: LoginRequest) -> Result<LoginOutcome> {
    let mut errors = ValidationErrors::new();
    let email = required(&mut errors, "email", &request.email, 1).map(|e| e.to_lowercase());
    if let Some(email) = &email {
        if !is_valid_email(email) {
            errors.add("email", "The email field must be a valid email address.");
        }
    }
    let password = match request.password.as_deref().filter(|p| !p.is_empty()) {
        Some(p) => Some(p.to_string()),
        None => {
            errors.add("password", "The password field is required.");
            None
        }
    };
    errors.into_result()?;
    let (Some(email), Some(password)) = (email, password) else {
        return Err(TimetableError::validation("payload", "The login form is incomplete."));
    };

    let candidate = svc
        .find_by::<User>(ListQuery::new().filter("email", email.clone()))
        .await?
        .into_iter()
        .next();
    let user = match candidate {
        Some(user) => {
            let stored = user.password_hash.clone();
            let matches = tokio::task::spawn_blocking(move || verify_password(&password, &stored))
                .await
                .map_err(|e| TimetableError::Storage(format!("password check failed: {e}")))?;
            matches.then_some(user)
        }
        None => None,
    };

    match user {
        Some(user) => {
            info!("User {} logged in", user.id);
            Ok(LoginOutcome {
                user,
                remember_me: request.remember_me,
            })
        }
        None => {
            warn!("Failed login for {}", email);
            Err(TimetableError::Unauthorized(
                "These credentials do not match our records.".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use std::sync::Arc;

    fn service() -> ResourceService {
        ResourceService::new(Arc::new(InMemoryStorage::new()))
    }

    fn admin_form() -> Value {
        json!({
            "role": "admin",
            "email": "Rectorat@UCAD.sn",
            "username": "rectorat",
            "password": "motdepasse",
            "confirmPassword": "motdepasse",
            "universityName": "Université Cheikh Anta Diop",
            "universityCode": "UCAD",
            "address": "Avenue Cheikh Anta Diop, Dakar",
            "phone": "+221338249596",
        })
    }

    #[tokio::test]
    async fn admin_signup_links_user_and_university() {
        let svc = service();
        let outcome = signup(&svc, &admin_form()).await.unwrap();
        let university = outcome.university.unwrap();
        assert_eq!(outcome.user.email, "rectorat@ucad.sn");
        assert_eq!(outcome.user.role, Role::Admin);
        assert_eq!(outcome.user.university_id, Some(university.id));
        assert_eq!(university.admin_id, Some(outcome.user.id));
        assert_eq!(university.code.as_deref(), Some("UCAD"));
    }

    #[tokio::test]
    async fn mismatched_confirmation_is_reported_on_confirm_field() {
        let svc = service();
        let mut form = admin_form();
        form["confirmPassword"] = json!("autrechose");
        let err = signup(&svc, &form).await.unwrap_err();
        match err {
            TimetableError::Validation(errors) => {
                assert!(errors.has("confirm_password"));
                assert!(!errors.has("password"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn role_specific_fields_are_required() {
        let svc = service();
        let err = signup(
            &svc,
            &json!({
                "role": "teacher",
                "email": "prof@ucad.sn",
                "username": "pr",
                "password": "motdepasse",
                "confirm_password": "motdepasse",
            }),
        )
        .await
        .unwrap_err();
        let TimetableError::Validation(errors) = err else {
            panic!("expected validation failure");
        };
        let fields: Vec<&str> = errors.fields().collect();
        assert_eq!(
            fields,
            vec!["department", "subject", "teacher_id", "university", "username"]
        );
    }

    #[tokio::test]
    async fn duplicate_email_maps_to_form_field() {
        let svc = service();
        signup(&svc, &admin_form()).await.unwrap();
        let mut again = admin_form();
        again["universityCode"] = json!("UCAD2");
        let err = signup(&svc, &again).await.unwrap_err();
        assert!(matches!(err, TimetableError::Validation(ref e) if e.has("email")));
    }

    #[tokio::test]
    async fn unknown_role_is_rejected() {
        let svc = service();
        let err = signup(&svc, &json!({"role": "dean"})).await.unwrap_err();
        assert!(matches!(err, TimetableError::Validation(ref e) if e.has("role")));
    }

    #[tokio::test]
    async fn login_checks_password() {
        let svc = service();
        signup(&svc, &admin_form()).await.unwrap();

        let ok = login(
            &svc,
            LoginRequest {
                email: Some("RECTORAT@ucad.sn".into()),
                password: Some("motdepasse".into()),
                remember_me: true,
            },
        )
        .await
        .unwrap();
        assert!(ok.remember_me);
        assert_eq!(ok.user.name, "rectorat");

        let err = login(
            &svc,
            LoginRequest {
                email: Some("rectorat@ucad.sn".into()),
                password: Some("wrongpassword".into()),
                remember_me: false,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TimetableError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn teacher_department_must_belong_to_the_chosen_university() {
        let svc = service();
        let ucad: University = svc.create(&json!({"name": "UCAD"})).await.unwrap();
        let ugb: University = svc.create(&json!({"name": "UGB"})).await.unwrap();
        let elsewhere: Department = svc
            .create(&json!({"name": "Informatique", "university_id": ugb.id}))
            .await
            .unwrap();

        let err = signup(
            &svc,
            &json!({
                "role": "teacher",
                "email": "prof@ucad.sn",
                "username": "prof",
                "password": "motdepasse",
                "confirm_password": "motdepasse",
                "university": ucad.id,
                "teacherId": "ENS-007",
                "department": elsewhere.id,
                "subject": "Réseaux",
            }),
        )
        .await
        .unwrap_err();
        let TimetableError::Validation(errors) = err else {
            panic!("expected validation failure");
        };
        assert_eq!(
            errors.messages("department"),
            ["The selected department is invalid.".to_string()]
        );

        let users: Vec<User> = svc.find_by(ListQuery::new()).await.unwrap();
        assert!(users.is_empty());
        let teachers: Vec<Teacher> = svc.find_by(ListQuery::new()).await.unwrap();
        assert!(teachers.is_empty());
    }
}
