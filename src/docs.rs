use crate::api::attendance::{HistoryResponse, SubmitAttendance};
use crate::api::floors::{CreateRoom, RoomStudent};
use crate::api::students::{StudentListResponse, UpdateStudent, UploadResponse};
use crate::model::attendance::{AttendanceEntry, AttendanceRecord, AttendanceStatus};
use crate::model::floor::FloorSummary;
use crate::model::room::{BedType, Room, RoomSummary};
use crate::model::student::Student;
use crate::models::{LoginReqDto, RegisterReqDto, TokenPair};
use crate::sync::offline_queue::{FlushReport, QueueStatus};
use crate::sync::realtime::{AttendanceEvent, EventKind};
use crate::utils::dates::ReportType;
use crate::utils::stats::DashboardStats;
use crate::utils::student_import::StudentInput;
use utoipa::Modify;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{OpenApi, openapi};

/// Registers the `bearer_auth` scheme the protected paths refer to.
pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "HostelTrack API",
        version = "1.0.0",
        description = r#"
## Hostel Attendance Tracking

Backend for wardens taking the nightly head count of a multi-floor hostel.

### Key Features
- **Floors & Rooms**: browse the hostel with live head counts
- **Students**: manage the roster, bulk import from CSV or Excel
- **Attendance**: submit a room at a time, review history and the dashboard
- **Reports**: download attendance and daily summary workbooks
- **Sync**: offline queue status and a server-sent change feed

### Security
Everything outside `/auth` needs a **JWT Bearer** access token.
Deleting students and creating rooms is reserved for **Admin** users.
"#,
    ),
    paths(
        crate::auth::handlers::register,
        crate::auth::handlers::login,
        crate::auth::handlers::refresh_token,
        crate::auth::handlers::logout,
        crate::auth::handlers::me,

        crate::api::floors::list_floors,
        crate::api::floors::list_rooms,
        crate::api::floors::room_students,
        crate::api::floors::create_room,

        crate::api::students::list_students,
        crate::api::students::get_student,
        crate::api::students::create_student,
        crate::api::students::update_student,
        crate::api::students::delete_student,
        crate::api::students::upload_students,

        crate::api::attendance::submit_attendance,
        crate::api::attendance::list_records,
        crate::api::attendance::today_records,
        crate::api::attendance::history,
        crate::api::attendance::dashboard,

        crate::api::reports::attendance_report,
        crate::api::reports::daily_summary,

        crate::api::sync::status,
        crate::api::sync::flush,
        crate::api::events::events
    ),
    components(
        schemas(
            RegisterReqDto,
            LoginReqDto,
            TokenPair,
            FloorSummary,
            Room,
            RoomSummary,
            RoomStudent,
            BedType,
            CreateRoom,
            Student,
            StudentInput,
            UpdateStudent,
            StudentListResponse,
            UploadResponse,
            AttendanceStatus,
            AttendanceRecord,
            AttendanceEntry,
            SubmitAttendance,
            HistoryResponse,
            DashboardStats,
            ReportType,
            QueueStatus,
            FlushReport,
            AttendanceEvent,
            EventKind
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Registration, login and token rotation"),
        (name = "Floors", description = "Floors, rooms and room rosters"),
        (name = "Students", description = "Student management and bulk import"),
        (name = "Attendance", description = "Room submissions, history and dashboard"),
        (name = "Reports", description = "Spreadsheet exports"),
        (name = "Sync", description = "Offline queue and change feed"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_paths_and_bearer_scheme() {
        let doc = ApiDoc::openapi();

        assert!(doc.paths.paths.contains_key("/api/attendance/submit"));
        assert!(doc.paths.paths.contains_key("/api/students/upload"));
        assert!(doc.paths.paths.contains_key("/auth/login"));

        let components = doc.components.unwrap();
        assert!(components.security_schemes.contains_key("bearer_auth"));
    }
}
