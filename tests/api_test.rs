use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use timetable_api::server::create_server;
use timetable_api::storage::{InMemoryStorage, SqliteStorage, Storage};
use tower::ServiceExt;

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(builder.body(body)?).await?;
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, value))
}

async fn send_raw(
    app: &Router,
    method: &str,
    uri: &str,
    content_type: Option<&str>,
    body: &'static str,
) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(content_type) = content_type {
        builder = builder.header("content-type", content_type);
    }
    let response = app.clone().oneshot(builder.body(Body::from(body))?).await?;
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await?;
    Ok((status, serde_json::from_slice(&bytes)?))
}

fn id_of(value: &Value) -> String {
    value["id"].as_str().expect("record has an id").to_string()
}

/// Walks the whole platform: an admin opens a university, a teacher and a
/// student join, courses get scheduled and everyone reads their views.
async fn run_semester(storage: Arc<dyn Storage>) -> Result<()> {
    let app = create_server(storage);

    let (status, admin) = send(
        &app,
        "POST",
        "/api/signup",
        Some(json!({
            "role": "admin",
            "email": "scolarite@ugb.sn",
            "username": "scolarite",
            "password": "saintlouis",
            "confirm_password": "saintlouis",
            "university_name": "Université Gaston Berger",
            "university_code": "UGB",
            "address": "Route de Ngallèle, Saint-Louis",
            "phone": "+221339612300",
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{admin}");
    assert!(admin["user"].get("password_hash").is_none());
    let university_id = id_of(&admin["university"]);

    let (status, department) = send(
        &app,
        "POST",
        "/api/departments",
        Some(json!({"name": "Mathématiques", "university_id": university_id})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let department_id = id_of(&department);

    let (status, year) = send(
        &app,
        "POST",
        "/api/academic-years",
        Some(json!({"label": "2025-2026", "is_active": true, "university_id": university_id})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(year["is_active"], json!(true));
    let year_id = id_of(&year);

    let (status, teacher) = send(
        &app,
        "POST",
        "/api/signup",
        Some(json!({
            "role": "teacher",
            "email": "m.ndiaye@ugb.sn",
            "username": "mndiaye",
            "password": "algebre2025",
            "confirmPassword": "algebre2025",
            "university": university_id,
            "teacherId": "ENS-042",
            "department": department_id,
            "subject": "Algèbre",
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{teacher}");
    assert_eq!(teacher["teacher"]["speciality"], "Algèbre");
    let teacher_id = id_of(&teacher["teacher"]);
    let teacher_user_id = id_of(&teacher["user"]);

    let (status, course) = send(
        &app,
        "POST",
        "/api/courses",
        Some(json!({
            "title": "Algèbre linéaire",
            "teacher_id": teacher_id,
            "department_id": department_id,
            "university_id": university_id,
            "academic_year_id": year_id,
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let course_id = id_of(&course);

    for (day, start, end) in [("wednesday", "10:00", "12:00"), ("monday", "08:00", "10:00")] {
        let (status, slot) = send(
            &app,
            "POST",
            "/api/schedules",
            Some(json!({
                "course_id": course_id,
                "academic_year_id": year_id,
                "university_id": university_id,
                "day": day,
                "start_time": start,
                "end_time": end,
                "room": "Amphi A",
            })),
        )
        .await?;
        assert_eq!(status, StatusCode::CREATED, "{slot}");
    }

    let (status, timetable) = send(
        &app,
        "GET",
        &format!("/api/teachers/{teacher_id}/schedule"),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let days: Vec<&str> = timetable
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["day"].as_str().unwrap())
        .collect();
    assert_eq!(days, vec!["monday", "wednesday"]);
    assert_eq!(timetable[0]["course_title"], "Algèbre linéaire");
    assert_eq!(timetable[0]["start_time"], "08:00:00");

    let (status, student) = send(
        &app,
        "POST",
        "/api/signup",
        Some(json!({
            "role": "student",
            "email": "awa.fall@ugb.sn",
            "username": "awafall",
            "password": "etudiante1",
            "confirm_password": "etudiante1",
            "university": university_id,
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let student_user_id = id_of(&student["user"]);

    let (status, profile) = send(
        &app,
        "POST",
        "/api/students",
        Some(json!({
            "user_id": student_user_id,
            "department_id": department_id,
            "university_id": university_id,
            "matricule": "P31-2025-001",
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let student_id = id_of(&profile);

    let (status, duplicate) = send(
        &app,
        "POST",
        "/api/students",
        Some(json!({
            "user_id": teacher_user_id,
            "department_id": department_id,
            "university_id": university_id,
            "matricule": "P31-2025-001",
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        duplicate["errors"]["matricule"][0],
        "The matricule has already been taken."
    );

    let (status, timetable) = send(
        &app,
        "GET",
        &format!("/api/students/{student_id}/schedule?academic_year_id={year_id}"),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(timetable.as_array().unwrap().len(), 2);

    for body in [
        json!({"title": "Rentrée", "message": "Les cours commencent lundi",
               "universite_id": university_id, "target_role": "student"}),
        json!({"title": "Salle", "message": "Amphi A indisponible", "user_id": teacher_user_id}),
    ] {
        let (status, _) = send(&app, "POST", "/api/notifications", Some(body)).await?;
        assert_eq!(status, StatusCode::CREATED);
    }
    let (status, inbox) = send(
        &app,
        "GET",
        &format!("/api/users/{student_user_id}/notifications"),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(inbox.as_array().unwrap().len(), 1);
    assert_eq!(inbox[0]["title"], "Rentrée");

    let (status, login) = send(
        &app,
        "POST",
        "/api/login",
        Some(json!({"email": "awa.fall@ugb.sn", "password": "etudiante1", "rememberMe": true})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(login["user"]["role"], "student");
    let (status, _) = send(
        &app,
        "POST",
        "/api/login",
        Some(json!({"email": "awa.fall@ugb.sn", "password": "mauvaismdp"})),
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, listed) = send(
        &app,
        "GET",
        &format!("/api/departments?university_id={university_id}"),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let (status, renamed) = send(
        &app,
        "PATCH",
        &format!("/api/departments/{department_id}"),
        Some(json!({"name": "Mathématiques appliquées"})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(renamed["name"], "Mathématiques appliquées");

    let (status, replaced) = send(
        &app,
        "PUT",
        &format!("/api/departments/{department_id}"),
        Some(json!({"name": "Mathématiques et applications"})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{replaced}");
    assert_eq!(replaced["name"], "Mathématiques et applications");
    assert_eq!(replaced["university_id"], university_id.as_str());

    // Teachers, students and courses still sit in the department.
    let (status, blocked) = send(
        &app,
        "DELETE",
        &format!("/api/departments/{department_id}"),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT, "{blocked}");

    let (status, _) = send(&app, "DELETE", &format!("/api/courses/{course_id}"), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, schedules) = send(&app, "GET", "/api/schedules", None).await?;
    assert!(schedules.as_array().unwrap().is_empty());

    let (status, _) = send(&app, "GET", &format!("/api/courses/{course_id}"), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Removing the teacher's account removes the teacher profile with it.
    let (status, _) = send(&app, "DELETE", &format!("/api/users/{teacher_user_id}"), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, teachers) = send(&app, "GET", "/api/teachers", None).await?;
    assert!(teachers.as_array().unwrap().is_empty());

    Ok(())
}

#[tokio::test]
async fn semester_on_in_memory_storage() -> Result<()> {
    run_semester(Arc::new(InMemoryStorage::new())).await
}

#[tokio::test]
async fn semester_on_sqlite_storage() -> Result<()> {
    run_semester(Arc::new(SqliteStorage::open_in_memory()?)).await
}

#[tokio::test]
async fn validation_failures_use_laravel_shape() -> Result<()> {
    let app = create_server(Arc::new(InMemoryStorage::new()));
    let (status, body) = send(
        &app,
        "POST",
        "/api/schedules",
        Some(json!({"day": "funday", "start_time": "25:00"})),
    )
    .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["message"], "The given data was invalid.");
    assert_eq!(body["errors"]["day"][0], "The selected day is invalid.");
    assert_eq!(
        body["errors"]["start_time"][0],
        "The start_time field must match the format H:i."
    );
    assert_eq!(body["errors"]["course_id"][0], "The course_id field is required.");

    let (status, body) = send(&app, "GET", "/api/courses?colour=blue", None).await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["colour"].is_array());
    Ok(())
}

#[tokio::test]
async fn unknown_records_are_not_found() -> Result<()> {
    let app = create_server(Arc::new(InMemoryStorage::new()));
    let missing = uuid::Uuid::new_v4();
    for uri in [
        format!("/api/universities/{missing}"),
        format!("/api/teachers/{missing}/schedule"),
        format!("/api/users/{missing}/notifications"),
    ] {
        let (status, body) = send(&app, "GET", &uri, None).await?;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert!(body["message"].as_str().unwrap().contains(&missing.to_string()));
    }
    let (status, _) = send(&app, "DELETE", &format!("/api/schedules/{missing}"), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn health_reports_service() -> Result<()> {
    let app = create_server(Arc::new(InMemoryStorage::new()));
    let (status, body) = send(&app, "GET", "/health", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    Ok(())
}

#[tokio::test]
async fn malformed_requests_get_json_errors() -> Result<()> {
    let app = create_server(Arc::new(InMemoryStorage::new()));

    for uri in [
        "/api/universities/not-a-uuid",
        "/api/teachers/42/schedule",
        "/api/users/abc/notifications",
    ] {
        let (status, body) = send(&app, "GET", uri, None).await?;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert!(body["message"].as_str().unwrap().starts_with("No "), "{body}");
    }
    let (status, _) = send(&app, "DELETE", "/api/courses/not-a-uuid", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send_raw(
        &app,
        "POST",
        "/api/universities",
        Some("application/json"),
        "{not json",
    )
    .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["message"], "The given data was invalid.");
    assert!(body["errors"]["payload"].is_array());

    let (status, body) =
        send_raw(&app, "POST", "/api/universities", None, r#"{"name": "UCAD"}"#).await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        body["errors"]["payload"][0],
        "The request body must be sent as application/json."
    );

    let (status, body) = send_raw(
        &app,
        "POST",
        "/api/login",
        Some("application/json"),
        "[1, 2",
    )
    .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["payload"].is_array());

    let student = uuid::Uuid::new_v4();
    let (status, body) = send(
        &app,
        "GET",
        &format!("/api/students/{student}/schedule?academic_year_id=2025"),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["academic_year_id"].is_array());
    Ok(())
}

async fn check_out_of_range_offsets(storage: Arc<dyn Storage>) -> Result<()> {
    let app = create_server(storage);
    let (status, body) = send(&app, "GET", "/api/universities?offset=18446744073709551615", None).await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");
    assert!(body["errors"]["offset"].is_array());

    let (status, body) = send(&app, "GET", "/api/universities?offset=9223372036854775807", None).await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body, json!([]));
    Ok(())
}

#[tokio::test]
async fn out_of_range_offsets_on_in_memory_storage() -> Result<()> {
    check_out_of_range_offsets(Arc::new(InMemoryStorage::new())).await
}

#[tokio::test]
async fn out_of_range_offsets_on_sqlite_storage() -> Result<()> {
    check_out_of_range_offsets(Arc::new(SqliteStorage::open_in_memory()?)).await
}

