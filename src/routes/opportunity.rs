use actix_web::{web, HttpResponse};
use chrono::Utc;
use log::{debug, info};
use sea_orm::{
    sea_query::{Expr, LikeExpr},
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};

use crate::access::{assert_owner, require_poster};
use crate::auth::AuthUser;
use crate::entity::{application, opportunity, user};
use crate::error::AppError;
use crate::model::{NumberOrText, OpportunityKind};
use crate::response::MessageDto;
use crate::routes::{load_users, map_tx_error, non_blank, to_rfc3339};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("")
            .route(web::get().to(list))
            .route(web::post().to(create)),
    )
    .service(web::resource("/my-opportunities").route(web::get().to(mine)))
    .service(
        web::resource("/{id:\\d+}")
            .route(web::get().to(get))
            .route(web::put().to(update))
            .route(web::delete().to(remove)),
    );
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub search: Option<String>,
}

#[derive(Deserialize)]
pub struct OpportunityRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub salary: Option<NumberOrText>,
}

#[derive(Serialize)]
struct PosterDto {
    id: i32,
    email: String,
    full_name: String,
}

#[derive(Serialize)]
struct OpportunityDto {
    id: i32,
    title: String,
    description: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    company: Option<String>,
    location: Option<String>,
    salary: Option<String>,
    posted_by: Option<PosterDto>,
    posted_by_id: i32,
    created_at: Option<String>,
}

fn to_dto(model: opportunity::Model, poster: Option<&user::Model>) -> OpportunityDto {
    OpportunityDto {
        posted_by: poster.map(|u| PosterDto {
            id: u.id,
            email: u.email.clone(),
            full_name: u.full_name.clone(),
        }),
        posted_by_id: model.posted_by,
        id: model.id,
        title: model.title,
        description: model.description,
        kind: model.kind,
        company: model.company,
        location: model.location,
        salary: model.salary,
        created_at: model.created.map(to_rfc3339),
    }
}

async fn to_dto_list(
    db: &DatabaseConnection,
    rows: Vec<opportunity::Model>,
) -> Result<Vec<OpportunityDto>, AppError> {
    let posters = load_users(db, rows.iter().map(|o| o.posted_by)).await?;
    Ok(rows
        .into_iter()
        .map(|o| {
            let poster = posters.get(&o.posted_by);
            to_dto(o, poster)
        })
        .collect())
}

async fn to_single_dto(
    db: &DatabaseConnection,
    model: opportunity::Model,
) -> Result<OpportunityDto, AppError> {
    Ok(to_dto_list(db, vec![model]).await?.remove(0))
}

pub(crate) async fn find_opportunity(
    db: &DatabaseConnection,
    id: i32,
) -> Result<opportunity::Model, AppError> {
    opportunity::Entity::find_by_id(id)
        .one(db)
        .await
        .map_err(AppError::db)?
        .ok_or_else(|| AppError::not_found("Opportunity"))
}

const LIKE_ESCAPE: char = '\\';

/// `%needle%` with the needle's own LIKE wildcards escaped.
fn contains_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | LIKE_ESCAPE) {
            pattern.push(LIKE_ESCAPE);
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

async fn list(
    db: web::Data<DatabaseConnection>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, AppError> {
    let mut select = opportunity::Entity::find();
    if let Some(kind) = non_blank(query.kind.clone()) {
        let kind = kind.parse::<OpportunityKind>()?;
        select = select.filter(opportunity::Column::Kind.eq(kind.as_str()));
    }
    if let Some(search) = non_blank(query.search.clone()) {
        debug!("opportunity search {:?}", search);
        let pattern = contains_pattern(&search);
        let mut any = Condition::any();
        for column in [
            opportunity::Column::Title,
            opportunity::Column::Description,
            opportunity::Column::Company,
        ] {
            any = any.add(
                Expr::col((opportunity::Entity, column))
                    .like(LikeExpr::new(pattern.clone()).escape(LIKE_ESCAPE)),
            );
        }
        select = select.filter(any);
    }
    let rows = select
        .order_by_desc(opportunity::Column::Created)
        .order_by_desc(opportunity::Column::Id)
        .all(db.get_ref())
        .await
        .map_err(AppError::db)?;
    Ok(HttpResponse::Ok().json(to_dto_list(db.get_ref(), rows).await?))
}

async fn mine(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
) -> Result<HttpResponse, AppError> {
    let rows = opportunity::Entity::find()
        .filter(opportunity::Column::PostedBy.eq(auth.id))
        .order_by_desc(opportunity::Column::Created)
        .order_by_desc(opportunity::Column::Id)
        .all(db.get_ref())
        .await
        .map_err(AppError::db)?;
    Ok(HttpResponse::Ok().json(to_dto_list(db.get_ref(), rows).await?))
}

async fn get(
    db: web::Data<DatabaseConnection>,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let opp = find_opportunity(db.get_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(to_single_dto(db.get_ref(), opp).await?))
}

async fn create(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    payload: web::Json<OpportunityRequest>,
) -> Result<HttpResponse, AppError> {
    require_poster(&auth)?;
    let payload = payload.into_inner();
    let title = non_blank(payload.title)
        .ok_or_else(|| AppError::param_error("title cannot be empty"))?;
    let kind = payload
        .kind
        .as_deref()
        .ok_or_else(|| AppError::param_error("type cannot be empty"))?
        .parse::<OpportunityKind>()?;

    let created = opportunity::ActiveModel {
        title: Set(title),
        description: Set(payload.description),
        kind: Set(kind.as_str().to_string()),
        company: Set(non_blank(payload.company)),
        location: Set(non_blank(payload.location)),
        salary: Set(non_blank(payload.salary.map(NumberOrText::into_text))),
        posted_by: Set(auth.id),
        created: Set(Some(Utc::now())),
        ..Default::default()
    }
    .insert(db.get_ref())
    .await
    .map_err(AppError::db)?;

    info!("opportunity created id={} posted_by={}", created.id, auth.id);
    Ok(HttpResponse::Created().json(to_single_dto(db.get_ref(), created).await?))
}

async fn update(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    path: web::Path<i32>,
    payload: web::Json<OpportunityRequest>,
) -> Result<HttpResponse, AppError> {
    let existing = find_opportunity(db.get_ref(), path.into_inner()).await?;
    assert_owner(existing.posted_by, &auth, "Not authorized")?;

    let payload = payload.into_inner();
    let mut active: opportunity::ActiveModel = existing.clone().into();
    let mut retitled = None;
    if let Some(title) = payload.title {
        let title = non_blank(Some(title))
            .ok_or_else(|| AppError::param_error("title cannot be empty"))?;
        if title != existing.title {
            retitled = Some(title.clone());
        }
        active.title = Set(title);
    }
    if let Some(kind) = payload.kind {
        active.kind = Set(kind.parse::<OpportunityKind>()?.as_str().to_string());
    }
    if let Some(v) = payload.description {
        active.description = Set(Some(v));
    }
    if let Some(v) = payload.company {
        active.company = Set(non_blank(Some(v)));
    }
    if let Some(v) = payload.location {
        active.location = Set(non_blank(Some(v)));
    }
    if let Some(v) = payload.salary {
        active.salary = Set(non_blank(Some(v.into_text())));
    }
    if !active.is_changed() {
        return Ok(HttpResponse::Ok().json(to_single_dto(db.get_ref(), existing).await?));
    }

    let opp_id = existing.id;
    let updated = db
        .transaction::<_, opportunity::Model, AppError>(|txn| {
            Box::pin(async move {
                let updated = active.update(txn).await.map_err(AppError::db)?;
                // applications keep a copy of the title
                if let Some(title) = retitled {
                    application::Entity::update_many()
                        .col_expr(application::Column::OpportunityTitle, Expr::value(title))
                        .filter(application::Column::OpportunityId.eq(opp_id))
                        .exec(txn)
                        .await
                        .map_err(AppError::db)?;
                }
                Ok(updated)
            })
        })
        .await
        .map_err(map_tx_error)?;

    info!("opportunity updated id={}", updated.id);
    Ok(HttpResponse::Ok().json(to_single_dto(db.get_ref(), updated).await?))
}

async fn remove(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let existing = find_opportunity(db.get_ref(), path.into_inner()).await?;
    assert_owner(existing.posted_by, &auth, "Not authorized")?;

    let opp_id = existing.id;
    db.transaction::<_, (), AppError>(|txn| {
        Box::pin(async move {
            let removed = application::Entity::delete_many()
                .filter(application::Column::OpportunityId.eq(opp_id))
                .exec(txn)
                .await
                .map_err(AppError::db)?;
            debug!("removed {} applications of opportunity {}", removed.rows_affected, opp_id);
            opportunity::Entity::delete_by_id(opp_id)
                .exec(txn)
                .await
                .map_err(AppError::db)?;
            Ok(())
        })
    })
    .await
    .map_err(map_tx_error)?;

    info!("opportunity deleted id={}", opp_id);
    Ok(HttpResponse::Ok().json(MessageDto::new("Opportunity deleted")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_wildcards_are_literal() {
        assert_eq!(contains_pattern("rust"), "%rust%");
        assert_eq!(contains_pattern("100%"), "%100\\%%");
        assert_eq!(contains_pattern("c_sharp"), "%c\\_sharp%");
        assert_eq!(contains_pattern("a\\b"), "%a\\\\b%");
    }
}
