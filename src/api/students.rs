use crate::{
    auth::auth::AuthUser,
    config::Config,
    error::{AppError, is_unique_violation},
    model::student::Student,
    sync::realtime::{AttendanceEvent, Realtime},
    utils::{
        db_utils::{build_update_sql, execute_update},
        query_cache::QueryCache,
        roll_filter,
        student_import::{StudentInput, parse_upload, summarize_errors, validate_rows},
    },
};
use actix_web::{HttpResponse, web};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::MySqlPool;
use tracing::{debug, error, info};
use utoipa::{IntoParams, ToSchema};

/// Columns a client may change through `PUT /students/{id}`.
const UPDATABLE_COLUMNS: &[&str] = &[
    "name",
    "roll_number",
    "room_number",
    "floor_number",
    "bed_number",
    "email",
    "phone",
    "photo_url",
];

const STUDENT_COLUMNS: &str =
    "id, name, roll_number, room_number, floor_number, bed_number, email, phone, photo_url";

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StudentQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub floor_number: Option<u8>,
    pub room_number: Option<String>,
    /// Matches name, roll number or room number
    pub search: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct StudentListResponse {
    pub data: Vec<Student>,
    #[schema(example = 1)]
    pub page: u32,
    #[schema(example = 20)]
    pub per_page: u32,
    #[schema(example = 240)]
    pub total: i64,
}

#[derive(Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct UpdateStudent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roll_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub floor_number: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bed_number: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

impl UpdateStudent {
    /// The student as it would look after the update.
    fn applied_to(&self, current: &Student) -> StudentInput {
        StudentInput {
            name: self.name.clone().unwrap_or_else(|| current.name.clone()),
            roll_number: self
                .roll_number
                .clone()
                .unwrap_or_else(|| current.roll_number.clone()),
            room_number: self
                .room_number
                .clone()
                .unwrap_or_else(|| current.room_number.clone()),
            floor_number: self.floor_number.unwrap_or(i64::from(current.floor_number)),
            bed_number: self.bed_number.unwrap_or(i64::from(current.bed_number)),
            email: self.email.clone().or_else(|| current.email.clone()),
            phone: self.phone.clone().or_else(|| current.phone.clone()),
        }
        .normalized()
    }

    /// Trims text fields so stored values match what validation saw.
    fn trimmed(mut self) -> Self {
        let trim = |v: Option<String>| v.map(|s| s.trim().to_string());
        self.name = trim(self.name);
        self.roll_number = trim(self.roll_number);
        self.room_number = trim(self.room_number);
        self.email = trim(self.email);
        self.phone = trim(self.phone);
        self.photo_url = trim(self.photo_url);
        self
    }
}

async fn fetch_student(pool: &MySqlPool, id: u64) -> Result<Student, AppError> {
    sqlx::query_as::<_, Student>(&format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("Student not found"))
}

fn students_changed(cache: &QueryCache, realtime: &Realtime) {
    cache.invalidate_all();
    realtime.publish(AttendanceEvent::students_changed());
}

/// Resolves paging input to `(page, per_page, offset)`.
fn page_window(page: Option<u32>, per_page: Option<u32>) -> (u32, u32, u64) {
    let page = page.unwrap_or(1).max(1);
    let per_page = per_page.unwrap_or(20).clamp(1, 100);
    (page, per_page, u64::from(page - 1) * u64::from(per_page))
}

// -------------------- Handlers --------------------

#[utoipa::path(
    get,
    path = "/api/students",
    params(StudentQuery),
    responses(
        (status = 200, description = "Paginated student list", body = StudentListResponse),
        (status = 401, description = "Unauthorized")
    ),
    tag = "Students",
    security(("bearer_auth" = []))
)]
pub async fn list_students(
    pool: web::Data<MySqlPool>,
    query: web::Query<StudentQuery>,
) -> Result<HttpResponse, AppError> {
    let (page, per_page, offset) = page_window(query.page, query.per_page);

    let room = query
        .room_number
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty());
    let search = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{s}%"));

    const FILTER: &str = r#"
        WHERE (? IS NULL OR floor_number = ?)
          AND (? IS NULL OR room_number = ?)
          AND (? IS NULL OR name LIKE ? OR roll_number LIKE ? OR room_number LIKE ?)
    "#;

    let total = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM students {FILTER}"))
        .bind(query.floor_number)
        .bind(query.floor_number)
        .bind(room)
        .bind(room)
        .bind(&search)
        .bind(&search)
        .bind(&search)
        .bind(&search)
        .fetch_one(pool.get_ref())
        .await?;

    let data = sqlx::query_as::<_, Student>(&format!(
        "SELECT {STUDENT_COLUMNS} FROM students {FILTER} \
         ORDER BY floor_number, room_number, bed_number LIMIT ? OFFSET ?"
    ))
    .bind(query.floor_number)
    .bind(query.floor_number)
    .bind(room)
    .bind(room)
    .bind(&search)
    .bind(&search)
    .bind(&search)
    .bind(&search)
    .bind(per_page)
    .bind(offset)
    .fetch_all(pool.get_ref())
    .await?;

    debug!(page, per_page, total, "Listed students");

    Ok(HttpResponse::Ok().json(StudentListResponse {
        data,
        page,
        per_page,
        total,
    }))
}

#[utoipa::path(
    get,
    path = "/api/students/{id}",
    params(("id" = u64, Path, description = "Student ID")),
    responses(
        (status = 200, description = "Student found", body = Student),
        (status = 404, description = "Student not found")
    ),
    tag = "Students",
    security(("bearer_auth" = []))
)]
pub async fn get_student(
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let student = fetch_student(pool.get_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(student))
}

/// Create Student
#[utoipa::path(
    post,
    path = "/api/students",
    request_body = StudentInput,
    responses(
        (status = 201, description = "Student created", body = Object, example = json!({
            "message": "Student created",
            "id": 7
        })),
        (status = 400, description = "Validation failed"),
        (status = 409, description = "Roll number already exists")
    ),
    tag = "Students",
    security(("bearer_auth" = []))
)]
pub async fn create_student(
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    cache: web::Data<QueryCache>,
    realtime: web::Data<Realtime>,
    payload: web::Json<StudentInput>,
) -> Result<HttpResponse, AppError> {
    let input = payload.into_inner().normalized();
    input
        .validate(config.floor_count)
        .map_err(AppError::BadRequest)?;

    if !roll_filter::is_roll_available(&input.roll_number, pool.get_ref()).await? {
        return Err(AppError::conflict("Roll number already exists"));
    }

    let result = sqlx::query(
        r#"
        INSERT INTO students
        (name, roll_number, room_number, floor_number, bed_number, email, phone)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&input.name)
    .bind(&input.roll_number)
    .bind(&input.room_number)
    .bind(input.floor_number)
    .bind(input.bed_number)
    .bind(&input.email)
    .bind(&input.phone)
    .execute(pool.get_ref())
    .await;

    match result {
        Ok(done) => {
            roll_filter::insert(&input.roll_number);
            students_changed(&cache, &realtime);
            info!(roll_number = %input.roll_number, "Student created");
            Ok(HttpResponse::Created().json(json!({
                "message": "Student created",
                "id": done.last_insert_id()
            })))
        }
        Err(e) if is_unique_violation(&e) => Err(AppError::conflict("Roll number already exists")),
        Err(e) => {
            error!(error = %e, "Failed to create student");
            Err(AppError::Internal)
        }
    }
}

#[utoipa::path(
    put,
    path = "/api/students/{id}",
    params(("id" = u64, Path, description = "Student ID")),
    request_body = UpdateStudent,
    responses(
        (status = 200, description = "Student updated", body = Student),
        (status = 400, description = "Validation failed"),
        (status = 404, description = "Student not found"),
        (status = 409, description = "Roll number already exists")
    ),
    tag = "Students",
    security(("bearer_auth" = []))
)]
pub async fn update_student(
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    cache: web::Data<QueryCache>,
    realtime: web::Data<Realtime>,
    path: web::Path<u64>,
    payload: web::Json<UpdateStudent>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let changes = payload.into_inner().trimmed();
    let current = fetch_student(pool.get_ref(), id).await?;

    let updated = changes.applied_to(&current);
    updated
        .validate(config.floor_count)
        .map_err(AppError::BadRequest)?;

    let roll_changed = !updated.roll_number.eq_ignore_ascii_case(&current.roll_number);
    if roll_changed && !roll_filter::is_roll_available(&updated.roll_number, pool.get_ref()).await? {
        return Err(AppError::conflict("Roll number already exists"));
    }

    let value = serde_json::to_value(&changes).map_err(|e| {
        error!(error = %e, "Failed to encode student update");
        AppError::Internal
    })?;
    let update = build_update_sql("students", &value, UPDATABLE_COLUMNS, "id", id)?;

    execute_update(pool.get_ref(), update).await?;

    if roll_changed {
        roll_filter::remove(&current.roll_number);
        roll_filter::insert(&updated.roll_number);
    }
    students_changed(&cache, &realtime);
    info!(id, "Student updated");

    let student = fetch_student(pool.get_ref(), id).await?;
    Ok(HttpResponse::Ok().json(student))
}

#[utoipa::path(
    delete,
    path = "/api/students/{id}",
    params(("id" = u64, Path, description = "Student ID")),
    responses(
        (status = 204, description = "Student deleted"),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Student not found")
    ),
    tag = "Students",
    security(("bearer_auth" = []))
)]
pub async fn delete_student(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    cache: web::Data<QueryCache>,
    realtime: web::Data<Realtime>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let id = path.into_inner();

    let roll_number = sqlx::query_scalar::<_, String>("SELECT roll_number FROM students WHERE id = ?")
        .bind(id)
        .fetch_optional(pool.get_ref())
        .await?
        .ok_or_else(|| AppError::not_found("Student not found"))?;

    sqlx::query("DELETE FROM students WHERE id = ?")
        .bind(id)
        .execute(pool.get_ref())
        .await?;

    roll_filter::remove(&roll_number);
    students_changed(&cache, &realtime);
    info!(id, %roll_number, deleted_by = auth.user_id, "Student deleted");

    Ok(HttpResponse::NoContent().finish())
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UploadQuery {
    /// Original file name; the extension picks the parser
    pub filename: String,
}

#[derive(Serialize, ToSchema)]
pub struct UploadResponse {
    pub success: bool,
    #[schema(example = "Successfully uploaded 42 students")]
    pub message: String,
    pub uploaded: usize,
    pub failed: usize,
}

/// Bulk import students from a CSV or Excel sheet. All rows are written or none.
#[utoipa::path(
    post,
    path = "/api/students/upload",
    params(UploadQuery),
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    responses(
        (status = 200, description = "Students imported", body = UploadResponse),
        (status = 400, description = "Unreadable file or invalid rows"),
        (status = 409, description = "A roll number already exists")
    ),
    tag = "Students",
    security(("bearer_auth" = []))
)]
pub async fn upload_students(
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    cache: web::Data<QueryCache>,
    realtime: web::Data<Realtime>,
    query: web::Query<UploadQuery>,
    body: web::Bytes,
) -> Result<HttpResponse, AppError> {
    let rows = parse_upload(&query.filename, &body).map_err(|e| AppError::bad_request(e.to_string()))?;
    let students = validate_rows(&rows, config.floor_count)
        .map_err(|errors| AppError::BadRequest(summarize_errors(&errors)))?;

    let mut tx = pool.begin().await?;
    for student in &students {
        let result = sqlx::query(
            r#"
            INSERT INTO students
            (name, roll_number, room_number, floor_number, bed_number, email, phone)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&student.name)
        .bind(&student.roll_number)
        .bind(&student.room_number)
        .bind(student.floor_number)
        .bind(student.bed_number)
        .bind(&student.email)
        .bind(&student.phone)
        .execute(&mut *tx)
        .await;

        if let Err(e) = result {
            // dropping the transaction rolls back the rows already written
            if is_unique_violation(&e) {
                return Err(AppError::conflict(format!(
                    "Roll Number {} already exists",
                    student.roll_number
                )));
            }
            return Err(e.into());
        }
    }
    tx.commit().await?;

    for student in &students {
        roll_filter::insert(&student.roll_number);
    }
    students_changed(&cache, &realtime);
    info!(uploaded = students.len(), filename = %query.filename, "Students imported");

    Ok(HttpResponse::Ok().json(UploadResponse {
        success: true,
        message: format!("Successfully uploaded {} students", students.len()),
        uploaded: students.len(),
        failed: 0,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, http::StatusCode, test as http};
    use sqlx::mysql::MySqlPoolOptions;
    use std::time::Duration;

    // nothing listens on port 1, so every query fails to connect
    fn unreachable_pool() -> MySqlPool {
        MySqlPoolOptions::new()
            .acquire_timeout(Duration::from_millis(300))
            .connect_lazy("mysql://hosteltrack@127.0.0.1:1/hosteltrack")
            .unwrap()
    }

    fn current() -> Student {
        Student {
            id: 7,
            name: "Arif Hossain".to_string(),
            roll_number: "CSE-2101".to_string(),
            room_number: "204".to_string(),
            floor_number: 2,
            bed_number: 1,
            email: Some("arif@example.edu".to_string()),
            phone: None,
            photo_url: None,
        }
    }

    #[test]
    fn partial_update_keeps_untouched_fields() {
        let changes = UpdateStudent {
            room_number: Some(" 305 ".to_string()),
            floor_number: Some(3),
            ..Default::default()
        }
        .trimmed();

        let merged = changes.applied_to(&current());
        assert_eq!(merged.name, "Arif Hossain");
        assert_eq!(merged.room_number, "305");
        assert_eq!(merged.floor_number, 3);
        assert_eq!(merged.email.as_deref(), Some("arif@example.edu"));
        assert!(merged.validate(8).is_ok());
    }

    #[test]
    fn update_payload_only_carries_provided_columns() {
        let changes = UpdateStudent {
            bed_number: Some(2),
            ..Default::default()
        };
        let value = serde_json::to_value(&changes).unwrap();
        let update = build_update_sql("students", &value, UPDATABLE_COLUMNS, "id", 7).unwrap();

        assert_eq!(update.sql, "UPDATE students SET bed_number = ? WHERE id = ?");
    }

    #[test]
    fn out_of_range_floor_fails_validation_after_merge() {
        let changes = UpdateStudent {
            floor_number: Some(12),
            ..Default::default()
        };
        let err = changes.applied_to(&current()).validate(8).unwrap_err();
        assert_eq!(err, "Floor Number must be between 1 and 8");
    }

    #[test]
    fn paging_input_is_clamped() {
        assert_eq!(page_window(None, None), (1, 20, 0));
        assert_eq!(page_window(Some(0), Some(0)), (1, 1, 0));
        assert_eq!(page_window(Some(3), Some(500)), (3, 100, 200));
        assert_eq!(
            page_window(Some(u32::MAX), Some(100)),
            (u32::MAX, 100, (u64::from(u32::MAX) - 1) * 100)
        );
    }

    #[actix_web::test]
    async fn far_page_reaches_the_database_instead_of_overflowing() {
        let app = http::init_service(
            App::new()
                .app_data(web::Data::new(unreachable_pool()))
                .route("/students", web::get().to(list_students)),
        )
        .await;

        let req = http::TestRequest::get()
            .uri("/students?page=50000000&per_page=100")
            .to_request();
        let resp = http::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[actix_web::test]
    async fn upload_rejects_unsupported_file_types() {
        let app = http::init_service(
            App::new()
                .app_data(web::Data::new(unreachable_pool()))
                .app_data(web::Data::new(Config::for_tests()))
                .app_data(web::Data::new(QueryCache::new(16, Duration::from_secs(30))))
                .app_data(web::Data::new(Realtime::new(8)))
                .route("/students/upload", web::post().to(upload_students)),
        )
        .await;

        let req = http::TestRequest::post()
            .uri("/students/upload?filename=roster.pdf")
            .set_payload("%PDF-1.4")
            .to_request();
        let resp = http::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = http::read_body_json(resp).await;
        assert_eq!(
            body["error"],
            "Please upload a CSV or Excel file (.csv, .xlsx, .xls)"
        );
    }
}
