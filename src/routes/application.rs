use std::collections::HashMap;

use actix_web::{web, HttpResponse};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use log::{debug, info};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Select, Set,
};
use serde::{Deserialize, Serialize};

use crate::access::{assert_owner, require_student};
use crate::auth::AuthUser;
use crate::entity::{application, opportunity};
use crate::error::{is_unique_violation, AppError};
use crate::model::{ApplicationStatus, NumberOrText, Role};
use crate::response::MessageDto;
use crate::routes::opportunity::find_opportunity;
use crate::routes::{load_users, non_blank, to_rfc3339};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("")
            .route(web::get().to(list))
            .route(web::post().to(create)),
    )
    .service(web::resource("/my-applications").route(web::get().to(mine)))
    .service(web::resource("/opportunity/{id:\\d+}").route(web::get().to(for_opportunity)))
    .service(
        web::resource("/{id:\\d+}")
            .route(web::get().to(get))
            .route(web::patch().to(update_status))
            .route(web::delete().to(remove)),
    );
}

#[derive(Deserialize)]
pub struct ApplyRequest {
    pub opportunity: Option<i32>,
    pub cover_letter: Option<String>,
    pub resume_base64: Option<String>,
    pub resume_name: Option<String>,
    pub cgpa: Option<NumberOrText>,
    pub tenth_percentage: Option<NumberOrText>,
    pub twelfth_percentage: Option<NumberOrText>,
}

struct NewApplication {
    opportunity_id: i32,
    cover_letter: Option<String>,
    resume_base64: Option<String>,
    resume_name: Option<String>,
    cgpa: Option<f64>,
    tenth_percentage: Option<f64>,
    twelfth_percentage: Option<f64>,
}

impl ApplyRequest {
    fn validate(self) -> Result<NewApplication, AppError> {
        let opportunity_id = self
            .opportunity
            .ok_or_else(|| AppError::param_error("opportunity cannot be empty"))?;
        let resume_base64 = non_blank(self.resume_base64).map(strip_data_url);
        if let Some(resume) = &resume_base64 {
            STANDARD
                .decode(resume)
                .map_err(|_| AppError::param_error("resume_base64 is not valid base64"))?;
        }
        let metric = |value: Option<NumberOrText>, field: &str, max: f64| match value {
            Some(v) => v.to_metric(field, max),
            None => Ok(None),
        };
        Ok(NewApplication {
            opportunity_id,
            cover_letter: self.cover_letter,
            resume_name: non_blank(self.resume_name),
            cgpa: metric(self.cgpa, "cgpa", 10.0)?,
            tenth_percentage: metric(self.tenth_percentage, "tenth_percentage", 100.0)?,
            twelfth_percentage: metric(self.twelfth_percentage, "twelfth_percentage", 100.0)?,
            resume_base64,
        })
    }
}

/// Accepts a full `data:<mime>;base64,<payload>` URL as well as the bare payload.
fn strip_data_url(raw: String) -> String {
    if raw.starts_with("data:") {
        if let Some((_, payload)) = raw.split_once(',') {
            return payload.to_string();
        }
    }
    raw
}

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: Option<String>,
}

#[derive(Serialize)]
struct OpportunityBriefDto {
    id: i32,
    title: String,
    company: Option<String>,
    location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    salary: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

impl OpportunityBriefDto {
    fn brief(model: &opportunity::Model) -> Self {
        Self {
            id: model.id,
            title: model.title.clone(),
            company: model.company.clone(),
            location: model.location.clone(),
            salary: None,
            kind: None,
            description: None,
        }
    }

    fn detailed(model: &opportunity::Model) -> Self {
        Self {
            salary: model.salary.clone(),
            kind: Some(model.kind.clone()),
            description: model.description.clone(),
            ..Self::brief(model)
        }
    }
}

#[derive(Serialize)]
struct StudentDto {
    id: i32,
    email: String,
    full_name: String,
}

#[derive(Serialize)]
struct ApplicationDto {
    id: i32,
    opportunity: Option<OpportunityBriefDto>,
    opportunity_id: i32,
    opportunity_title: Option<String>,
    student: Option<StudentDto>,
    student_id: i32,
    cover_letter: Option<String>,
    resume_base64: Option<String>,
    resume_name: Option<String>,
    cgpa: Option<f64>,
    tenth_percentage: Option<f64>,
    twelfth_percentage: Option<f64>,
    status: String,
    created_at: Option<String>,
}

async fn to_dto_list(
    db: &DatabaseConnection,
    rows: Vec<application::Model>,
    detailed: bool,
) -> Result<Vec<ApplicationDto>, AppError> {
    let students = load_users(db, rows.iter().map(|a| a.student_id)).await?;
    let mut opp_ids: Vec<i32> = rows.iter().map(|a| a.opportunity_id).collect();
    opp_ids.sort_unstable();
    opp_ids.dedup();
    let opportunities: HashMap<i32, opportunity::Model> = if opp_ids.is_empty() {
        HashMap::new()
    } else {
        opportunity::Entity::find()
            .filter(opportunity::Column::Id.is_in(opp_ids))
            .all(db)
            .await
            .map_err(AppError::db)?
            .into_iter()
            .map(|o| (o.id, o))
            .collect()
    };

    Ok(rows
        .into_iter()
        .map(|a| ApplicationDto {
            opportunity: opportunities.get(&a.opportunity_id).map(|o| {
                if detailed {
                    OpportunityBriefDto::detailed(o)
                } else {
                    OpportunityBriefDto::brief(o)
                }
            }),
            student: students.get(&a.student_id).map(|u| StudentDto {
                id: u.id,
                email: u.email.clone(),
                full_name: u.full_name.clone(),
            }),
            id: a.id,
            opportunity_id: a.opportunity_id,
            opportunity_title: a.opportunity_title,
            student_id: a.student_id,
            cover_letter: a.cover_letter,
            resume_base64: a.resume_base64,
            resume_name: a.resume_name,
            cgpa: a.cgpa,
            tenth_percentage: a.tenth_percentage,
            twelfth_percentage: a.twelfth_percentage,
            status: a.status,
            created_at: a.created.map(to_rfc3339),
        })
        .collect())
}

async fn to_single_dto(
    db: &DatabaseConnection,
    model: application::Model,
    detailed: bool,
) -> Result<ApplicationDto, AppError> {
    Ok(to_dto_list(db, vec![model], detailed).await?.remove(0))
}

async fn find_application(
    db: &DatabaseConnection,
    id: i32,
) -> Result<application::Model, AppError> {
    application::Entity::find_by_id(id)
        .one(db)
        .await
        .map_err(AppError::db)?
        .ok_or_else(|| AppError::not_found("Application"))
}

fn newest_first(select: Select<application::Entity>) -> Select<application::Entity> {
    select
        .order_by_desc(application::Column::Created)
        .order_by_desc(application::Column::Id)
}

/// Students see what they authored; posters see applications to their own
/// opportunities.
async fn list(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
) -> Result<HttpResponse, AppError> {
    let select = match auth.role {
        Role::Student => {
            application::Entity::find().filter(application::Column::StudentId.eq(auth.id))
        }
        Role::Alumni | Role::Faculty => {
            let owned: Vec<i32> = opportunity::Entity::find()
                .select_only()
                .column(opportunity::Column::Id)
                .filter(opportunity::Column::PostedBy.eq(auth.id))
                .into_tuple()
                .all(db.get_ref())
                .await
                .map_err(AppError::db)?;
            debug!("user {} owns {} opportunities", auth.id, owned.len());
            if owned.is_empty() {
                return Ok(HttpResponse::Ok().json(Vec::<ApplicationDto>::new()));
            }
            application::Entity::find().filter(application::Column::OpportunityId.is_in(owned))
        }
    };
    let rows = newest_first(select)
        .all(db.get_ref())
        .await
        .map_err(AppError::db)?;
    Ok(HttpResponse::Ok().json(to_dto_list(db.get_ref(), rows, false).await?))
}

async fn mine(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
) -> Result<HttpResponse, AppError> {
    let rows = newest_first(
        application::Entity::find().filter(application::Column::StudentId.eq(auth.id)),
    )
    .all(db.get_ref())
    .await
    .map_err(AppError::db)?;
    Ok(HttpResponse::Ok().json(to_dto_list(db.get_ref(), rows, false).await?))
}

async fn for_opportunity(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let opp = find_opportunity(db.get_ref(), path.into_inner()).await?;
    assert_owner(
        opp.posted_by,
        &auth,
        "You can only view applications for your own opportunities",
    )?;
    let rows = newest_first(
        application::Entity::find().filter(application::Column::OpportunityId.eq(opp.id)),
    )
    .all(db.get_ref())
    .await
    .map_err(AppError::db)?;
    Ok(HttpResponse::Ok().json(to_dto_list(db.get_ref(), rows, false).await?))
}

async fn create(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    payload: web::Json<ApplyRequest>,
) -> Result<HttpResponse, AppError> {
    require_student(&auth)?;
    let new_app = payload.into_inner().validate()?;
    let opp = find_opportunity(db.get_ref(), new_app.opportunity_id).await?;

    let existing = application::Entity::find()
        .filter(application::Column::OpportunityId.eq(opp.id))
        .filter(application::Column::StudentId.eq(auth.id))
        .one(db.get_ref())
        .await
        .map_err(AppError::db)?;
    if existing.is_some() {
        return Err(AppError::conflict("Already applied to this opportunity"));
    }

    // the unique index settles concurrent duplicates that pass the check above
    let created = application::ActiveModel {
        opportunity_id: Set(opp.id),
        opportunity_title: Set(Some(opp.title.clone())),
        student_id: Set(auth.id),
        cover_letter: Set(new_app.cover_letter),
        resume_base64: Set(new_app.resume_base64),
        resume_name: Set(new_app.resume_name),
        cgpa: Set(new_app.cgpa),
        tenth_percentage: Set(new_app.tenth_percentage),
        twelfth_percentage: Set(new_app.twelfth_percentage),
        status: Set(ApplicationStatus::Pending.as_str().to_string()),
        created: Set(Some(Utc::now())),
        ..Default::default()
    }
    .insert(db.get_ref())
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::conflict("Already applied to this opportunity")
        } else {
            AppError::db(e)
        }
    })?;

    info!(
        "application created id={} opportunity={} student={}",
        created.id, opp.id, auth.id
    );
    Ok(HttpResponse::Created().json(to_single_dto(db.get_ref(), created, false).await?))
}

async fn get(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let app = find_application(db.get_ref(), path.into_inner()).await?;
    let is_student = app.student_id == auth.id;
    let is_owner = if is_student {
        false
    } else {
        opportunity::Entity::find_by_id(app.opportunity_id)
            .one(db.get_ref())
            .await
            .map_err(AppError::db)?
            .map(|o| o.posted_by == auth.id)
            .unwrap_or(false)
    };
    if !is_student && !is_owner {
        return Err(AppError::forbidden("Not authorized"));
    }
    Ok(HttpResponse::Ok().json(to_single_dto(db.get_ref(), app, true).await?))
}

async fn update_status(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    path: web::Path<i32>,
    payload: web::Json<StatusRequest>,
) -> Result<HttpResponse, AppError> {
    let status = payload
        .status
        .as_deref()
        .ok_or_else(|| AppError::param_error("status cannot be empty"))
        .and_then(ApplicationStatus::parse_decision)?;

    let app = find_application(db.get_ref(), path.into_inner()).await?;
    let opp = find_opportunity(db.get_ref(), app.opportunity_id).await?;
    assert_owner(
        opp.posted_by,
        &auth,
        "Not authorized to update this application",
    )?;

    let previous = app.status.clone();
    let mut active: application::ActiveModel = app.into();
    active.status = Set(status.as_str().to_string());
    let updated = active.update(db.get_ref()).await.map_err(AppError::db)?;

    info!(
        "application {} status {} -> {} by user {}",
        updated.id, previous, updated.status, auth.id
    );
    Ok(HttpResponse::Ok().json(to_single_dto(db.get_ref(), updated, false).await?))
}

async fn remove(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let app = find_application(db.get_ref(), path.into_inner()).await?;
    assert_owner(app.student_id, &auth, "Not authorized")?;

    application::Entity::delete_by_id(app.id)
        .exec(db.get_ref())
        .await
        .map_err(AppError::db)?;
    info!("application deleted id={}", app.id);
    Ok(HttpResponse::Ok().json(MessageDto::new("Application deleted")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(opportunity: Option<i32>) -> ApplyRequest {
        ApplyRequest {
            opportunity,
            cover_letter: Some("Keen to join".to_string()),
            resume_base64: None,
            resume_name: None,
            cgpa: Some(NumberOrText::Text("8.7".to_string())),
            tenth_percentage: Some(NumberOrText::Number(91.0)),
            twelfth_percentage: None,
        }
    }

    #[test]
    fn data_url_prefix_is_stripped() {
        assert_eq!(strip_data_url("data:application/pdf;base64,SGk=".to_string()), "SGk=");
        assert_eq!(strip_data_url("SGk=".to_string()), "SGk=");
    }

    #[test]
    fn validates_metrics_and_resume() {
        let ok = apply(Some(4)).validate().unwrap();
        assert_eq!(ok.opportunity_id, 4);
        assert_eq!(ok.cgpa, Some(8.7));
        assert_eq!(ok.tenth_percentage, Some(91.0));
        assert_eq!(ok.twelfth_percentage, None);

        assert!(apply(None).validate().is_err());

        let mut bad_resume = apply(Some(4));
        bad_resume.resume_base64 = Some("%%% not base64".to_string());
        assert!(bad_resume.validate().is_err());

        let mut bad_cgpa = apply(Some(4));
        bad_cgpa.cgpa = Some(NumberOrText::Number(11.0));
        assert!(bad_cgpa.validate().is_err());
    }
}
