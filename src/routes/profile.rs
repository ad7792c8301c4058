use actix_web::{web, HttpResponse};
use chrono::NaiveDate;
use log::{debug, info};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};

use crate::access::assert_owner;
use crate::auth::AuthUser;
use crate::entity::{education, experience, profile};
use crate::error::{is_unique_violation, AppError};
use crate::response::MessageDto;
use crate::routes::{load_users, map_tx_error, non_blank, UserDto};

const MAX_GRADE_LEN: usize = 10;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("")
            .route(web::get().to(list))
            .route(web::post().to(create)),
    )
    .service(web::resource("/me").route(web::get().to(me)))
    .service(
        web::resource("/education")
            .route(web::get().to(list_education))
            .route(web::post().to(add_education)),
    )
    .service(
        web::resource("/experience")
            .route(web::get().to(list_experience))
            .route(web::post().to(add_experience)),
    )
    .service(web::resource("/user/{user_id:\\d+}").route(web::get().to(by_user)))
    .service(
        web::resource("/{id:\\d+}")
            .route(web::put().to(update))
            .route(web::delete().to(remove)),
    );
}

#[derive(Deserialize, Default)]
pub struct ProfileRequest {
    pub user_id: Option<i32>,
    pub full_name: Option<String>,
    pub bio: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub skills: Option<Vec<String>>,
}

#[derive(Deserialize)]
pub struct EducationRequest {
    pub institution: Option<String>,
    pub degree: Option<String>,
    pub field_of_study: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub grade: Option<String>,
}

impl EducationRequest {
    fn validate(self) -> Result<education::ActiveModel, AppError> {
        let institution = non_blank(self.institution)
            .ok_or_else(|| AppError::param_error("institution cannot be empty"))?;
        let degree =
            non_blank(self.degree).ok_or_else(|| AppError::param_error("degree cannot be empty"))?;
        let (start_date, end_date) = date_range(self.start_date, self.end_date)?;
        let grade = non_blank(self.grade);
        if grade.as_ref().is_some_and(|g| g.chars().count() > MAX_GRADE_LEN) {
            return Err(AppError::param_error(format!(
                "grade must be at most {} characters",
                MAX_GRADE_LEN
            )));
        }
        Ok(education::ActiveModel {
            institution: Set(institution),
            degree: Set(degree),
            field_of_study: Set(non_blank(self.field_of_study)),
            start_date: Set(start_date),
            end_date: Set(end_date),
            grade: Set(grade),
            ..Default::default()
        })
    }
}

#[derive(Deserialize)]
pub struct ExperienceRequest {
    pub company: Option<String>,
    pub position: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    #[serde(default)]
    pub is_current: bool,
}

impl ExperienceRequest {
    fn validate(self) -> Result<experience::ActiveModel, AppError> {
        let company = non_blank(self.company)
            .ok_or_else(|| AppError::param_error("company cannot be empty"))?;
        let position = non_blank(self.position)
            .ok_or_else(|| AppError::param_error("position cannot be empty"))?;
        let (start_date, end_date) = date_range(self.start_date, self.end_date)?;
        if self.is_current && end_date.is_some() {
            return Err(AppError::param_error("a current position has no end_date"));
        }
        Ok(experience::ActiveModel {
            company: Set(company),
            position: Set(position),
            description: Set(self.description),
            start_date: Set(start_date),
            end_date: Set(end_date),
            is_current: Set(self.is_current),
            ..Default::default()
        })
    }
}

fn parse_date(field: &str, raw: Option<String>) -> Result<Option<NaiveDate>, AppError> {
    non_blank(raw)
        .map(|v| {
            NaiveDate::parse_from_str(&v, "%Y-%m-%d")
                .map_err(|_| AppError::param_error(format!("{} must be a YYYY-MM-DD date", field)))
        })
        .transpose()
}

fn date_range(
    start: Option<String>,
    end: Option<String>,
) -> Result<(NaiveDate, Option<NaiveDate>), AppError> {
    let start = parse_date("start_date", start)?
        .ok_or_else(|| AppError::param_error("start_date cannot be empty"))?;
    let end = parse_date("end_date", end)?;
    if end.is_some_and(|e| e < start) {
        return Err(AppError::param_error("end_date cannot precede start_date"));
    }
    Ok((start, end))
}

#[derive(Serialize)]
struct EducationDto {
    id: i32,
    profile: i32,
    institution: String,
    degree: String,
    field_of_study: Option<String>,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    grade: Option<String>,
}

impl From<education::Model> for EducationDto {
    fn from(m: education::Model) -> Self {
        Self {
            id: m.id,
            profile: m.profile_id,
            institution: m.institution,
            degree: m.degree,
            field_of_study: m.field_of_study,
            start_date: m.start_date,
            end_date: m.end_date,
            grade: m.grade,
        }
    }
}

#[derive(Serialize)]
struct ExperienceDto {
    id: i32,
    profile: i32,
    company: String,
    position: String,
    description: Option<String>,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    is_current: bool,
}

impl From<experience::Model> for ExperienceDto {
    fn from(m: experience::Model) -> Self {
        Self {
            id: m.id,
            profile: m.profile_id,
            company: m.company,
            position: m.position,
            description: m.description,
            start_date: m.start_date,
            end_date: m.end_date,
            is_current: m.is_current,
        }
    }
}

#[derive(Serialize)]
struct ProfileDto {
    id: i32,
    user_id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<UserDto>,
    full_name: Option<String>,
    bio: Option<String>,
    phone: Option<String>,
    location: Option<String>,
    skills: Vec<String>,
    role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    education: Option<Vec<EducationDto>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    experience: Option<Vec<ExperienceDto>>,
}

fn to_dto(model: profile::Model, user: Option<UserDto>) -> ProfileDto {
    ProfileDto {
        education: None,
        experience: None,
        skills: decode_skills(model.skills.as_deref()),
        id: model.id,
        user_id: model.user_id,
        user,
        full_name: model.full_name,
        bio: model.bio,
        phone: model.phone,
        location: model.location,
        role: model.role,
    }
}

fn decode_skills(raw: Option<&str>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str::<Vec<String>>(s).ok())
        .unwrap_or_default()
}

/// Blank entries are dropped, order is kept.
fn encode_skills(skills: &[String]) -> String {
    let cleaned: Vec<&str> = skills
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    serde_json::to_string(&cleaned).unwrap_or_else(|_| "[]".to_string())
}

fn apply_changes(active: &mut profile::ActiveModel, payload: &ProfileRequest) {
    if let Some(v) = payload.full_name.clone() {
        active.full_name = Set(non_blank(Some(v)));
    }
    if let Some(v) = payload.bio.clone() {
        active.bio = Set(Some(v));
    }
    if let Some(v) = payload.phone.clone() {
        active.phone = Set(non_blank(Some(v)));
    }
    if let Some(v) = payload.location.clone() {
        active.location = Set(non_blank(Some(v)));
    }
    if let Some(v) = &payload.skills {
        active.skills = Set(Some(encode_skills(v)));
    }
}

/// Profile with its education and experience entries.
async fn to_detailed_dto(
    db: &DatabaseConnection,
    model: profile::Model,
) -> Result<ProfileDto, AppError> {
    let education = load_education(db, model.id).await?;
    let experience = load_experience(db, model.id).await?;
    let mut dto = to_dto(model, None);
    dto.education = Some(education.into_iter().map(EducationDto::from).collect());
    dto.experience = Some(experience.into_iter().map(ExperienceDto::from).collect());
    Ok(dto)
}

async fn load_education<C: ConnectionTrait>(
    db: &C,
    profile_id: i32,
) -> Result<Vec<education::Model>, AppError> {
    education::Entity::find()
        .filter(education::Column::ProfileId.eq(profile_id))
        .order_by_desc(education::Column::StartDate)
        .order_by_desc(education::Column::Id)
        .all(db)
        .await
        .map_err(AppError::db)
}

async fn load_experience<C: ConnectionTrait>(
    db: &C,
    profile_id: i32,
) -> Result<Vec<experience::Model>, AppError> {
    experience::Entity::find()
        .filter(experience::Column::ProfileId.eq(profile_id))
        .order_by_desc(experience::Column::StartDate)
        .order_by_desc(experience::Column::Id)
        .all(db)
        .await
        .map_err(AppError::db)
}

async fn find_profile(db: &DatabaseConnection, id: i32) -> Result<profile::Model, AppError> {
    profile::Entity::find_by_id(id)
        .one(db)
        .await
        .map_err(AppError::db)?
        .ok_or_else(|| AppError::not_found("Profile"))
}

async fn find_by_user_id(
    db: &DatabaseConnection,
    user_id: i32,
) -> Result<Option<profile::Model>, AppError> {
    profile::Entity::find()
        .filter(profile::Column::UserId.eq(user_id))
        .one(db)
        .await
        .map_err(AppError::db)
}

async fn insert_for(
    db: &DatabaseConnection,
    auth: &AuthUser,
    payload: &ProfileRequest,
) -> Result<profile::Model, AppError> {
    let mut active = profile::ActiveModel {
        user_id: Set(auth.id),
        full_name: Set(Some(auth.full_name.clone())),
        role: Set(Some(auth.role.as_str().to_string())),
        skills: Set(Some("[]".to_string())),
        ..Default::default()
    };
    apply_changes(&mut active, payload);
    active.insert(db).await.map_err(|e| {
        if is_unique_violation(&e) {
            AppError::conflict("Profile already exists for this user")
        } else {
            AppError::db(e)
        }
    })
}

async fn list(db: web::Data<DatabaseConnection>) -> Result<HttpResponse, AppError> {
    let rows = profile::Entity::find()
        .order_by_asc(profile::Column::Id)
        .all(db.get_ref())
        .await
        .map_err(AppError::db)?;
    let users = load_users(db.get_ref(), rows.iter().map(|p| p.user_id)).await?;
    let list: Vec<ProfileDto> = rows
        .into_iter()
        .map(|p| {
            let user = users.get(&p.user_id).map(UserDto::from);
            to_dto(p, user)
        })
        .collect();
    Ok(HttpResponse::Ok().json(list))
}

async fn by_user(
    db: web::Data<DatabaseConnection>,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let profile = find_by_user_id(db.get_ref(), path.into_inner())
        .await?
        .ok_or_else(|| AppError::not_found("Profile"))?;
    Ok(HttpResponse::Ok().json(to_detailed_dto(db.get_ref(), profile).await?))
}

async fn create(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    payload: web::Json<ProfileRequest>,
) -> Result<HttpResponse, AppError> {
    if let Some(user_id) = payload.user_id {
        assert_owner(user_id, &auth, "Cannot create a profile for another user")?;
    }
    if find_by_user_id(db.get_ref(), auth.id).await?.is_some() {
        return Err(AppError::conflict("Profile already exists for this user"));
    }
    let created = insert_for(db.get_ref(), &auth, &payload).await?;
    info!("profile created id={} user_id={}", created.id, created.user_id);
    Ok(HttpResponse::Created().json(to_dto(created, None)))
}

/// The caller's profile, created on first access.
async fn me(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
) -> Result<HttpResponse, AppError> {
    let profile = match find_by_user_id(db.get_ref(), auth.id).await? {
        Some(p) => p,
        None => {
            let created = insert_for(db.get_ref(), &auth, &ProfileRequest::default()).await?;
            info!("profile created lazily user_id={}", auth.id);
            created
        }
    };
    Ok(HttpResponse::Ok().json(to_detailed_dto(db.get_ref(), profile).await?))
}

async fn update(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    path: web::Path<i32>,
    payload: web::Json<ProfileRequest>,
) -> Result<HttpResponse, AppError> {
    let existing = find_profile(db.get_ref(), path.into_inner()).await?;
    assert_owner(existing.user_id, &auth, "Not authorized")?;

    let mut active: profile::ActiveModel = existing.clone().into();
    apply_changes(&mut active, &payload);
    if !active.is_changed() {
        return Ok(HttpResponse::Ok().json(to_dto(existing, None)));
    }
    let updated = active.update(db.get_ref()).await.map_err(AppError::db)?;
    Ok(HttpResponse::Ok().json(to_dto(updated, None)))
}

async fn remove(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let existing = find_profile(db.get_ref(), path.into_inner()).await?;
    assert_owner(existing.user_id, &auth, "Not authorized")?;

    let profile_id = existing.id;
    db.transaction::<_, (), AppError>(|txn| {
        Box::pin(async move {
            let removed = education::Entity::delete_many()
                .filter(education::Column::ProfileId.eq(profile_id))
                .exec(txn)
                .await
                .map_err(AppError::db)?;
            debug!("removed {} education entries of profile {}", removed.rows_affected, profile_id);
            let removed = experience::Entity::delete_many()
                .filter(experience::Column::ProfileId.eq(profile_id))
                .exec(txn)
                .await
                .map_err(AppError::db)?;
            debug!("removed {} experience entries of profile {}", removed.rows_affected, profile_id);
            profile::Entity::delete_by_id(profile_id)
                .exec(txn)
                .await
                .map_err(AppError::db)?;
            Ok(())
        })
    })
    .await
    .map_err(map_tx_error)?;
    info!("profile deleted id={}", existing.id);
    Ok(HttpResponse::Ok().json(MessageDto::new("Profile deleted")))
}

async fn caller_profile(
    db: &DatabaseConnection,
    auth: &AuthUser,
) -> Result<profile::Model, AppError> {
    find_by_user_id(db, auth.id)
        .await?
        .ok_or_else(|| AppError::not_found("Profile"))
}

async fn list_education(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
) -> Result<HttpResponse, AppError> {
    let profile = caller_profile(db.get_ref(), &auth).await?;
    let rows = load_education(db.get_ref(), profile.id).await?;
    let list: Vec<EducationDto> = rows.into_iter().map(EducationDto::from).collect();
    Ok(HttpResponse::Ok().json(list))
}

async fn add_education(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    payload: web::Json<EducationRequest>,
) -> Result<HttpResponse, AppError> {
    let profile = caller_profile(db.get_ref(), &auth).await?;
    let mut active = payload.into_inner().validate()?;
    active.profile_id = Set(profile.id);
    let created = active.insert(db.get_ref()).await.map_err(AppError::db)?;
    info!("education added id={} profile_id={}", created.id, profile.id);
    Ok(HttpResponse::Created().json(EducationDto::from(created)))
}

async fn list_experience(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
) -> Result<HttpResponse, AppError> {
    let profile = caller_profile(db.get_ref(), &auth).await?;
    let rows = load_experience(db.get_ref(), profile.id).await?;
    let list: Vec<ExperienceDto> = rows.into_iter().map(ExperienceDto::from).collect();
    Ok(HttpResponse::Ok().json(list))
}

async fn add_experience(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    payload: web::Json<ExperienceRequest>,
) -> Result<HttpResponse, AppError> {
    let profile = caller_profile(db.get_ref(), &auth).await?;
    let mut active = payload.into_inner().validate()?;
    active.profile_id = Set(profile.id);
    let created = active.insert(db.get_ref()).await.map_err(AppError::db)?;
    info!("experience added id={} profile_id={}", created.id, profile.id);
    Ok(HttpResponse::Created().json(ExperienceDto::from(created)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skills_keep_order_and_drop_blanks() {
        let encoded = encode_skills(&["Rust".into(), " ".into(), " SQL ".into(), "Go".into()]);
        assert_eq!(encoded, r#"["Rust","SQL","Go"]"#);
        assert_eq!(decode_skills(Some(&encoded)), vec!["Rust", "SQL", "Go"]);
    }

    #[test]
    fn unreadable_skills_decode_to_empty() {
        assert!(decode_skills(None).is_empty());
        assert!(decode_skills(Some("Rust,SQL")).is_empty());
    }

    fn education(start: &str, end: Option<&str>, grade: Option<&str>) -> EducationRequest {
        EducationRequest {
            institution: Some("State University".into()),
            degree: Some("BSc".into()),
            field_of_study: Some("  ".into()),
            start_date: Some(start.into()),
            end_date: end.map(Into::into),
            grade: grade.map(Into::into),
        }
    }

    #[test]
    fn education_dates_are_checked() {
        let ok = education("2020-08-01", Some("2024-05-31"), Some("A")).validate().unwrap();
        assert_eq!(ok.start_date, Set(NaiveDate::from_ymd_opt(2020, 8, 1).unwrap()));
        assert_eq!(ok.field_of_study, Set(None));

        for bad in [
            education("", None, None),
            education("01/08/2020", None, None),
            education("2020-08-01", Some("2019-01-01"), None),
            education("2020-08-01", None, Some("first class honours")),
        ] {
            assert!(matches!(bad.validate(), Err(AppError::BadRequest(_))));
        }
    }

    #[test]
    fn current_experience_has_no_end() {
        let request = |end: Option<&str>, is_current| ExperienceRequest {
            company: Some("Acme".into()),
            position: Some("Engineer".into()),
            description: None,
            start_date: Some("2023-01-01".into()),
            end_date: end.map(Into::into),
            is_current,
        };
        assert!(request(None, true).validate().is_ok());
        assert!(request(Some("2023-06-30"), false).validate().is_ok());
        assert!(matches!(
            request(Some("2023-06-30"), true).validate(),
            Err(AppError::BadRequest(_))
        ));
    }
}
