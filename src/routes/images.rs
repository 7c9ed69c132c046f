use axum::{
    extract::{Path, RawQuery, State},
    response::IntoResponse,
    Json,
};

use crate::{
    error::{validation, AppError, AppResult, OptionExt},
    repo,
    state::AppState,
    types::{ImageFilters, TagLogic},
};

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 500;

/// Parsed listing parameters. `tags` is repeatable, which
/// `serde_urlencoded` cannot express, so the query string is parsed by
/// hand via `url::form_urlencoded`.
#[derive(Debug, Default)]
pub struct ListParams {
    pub filters: ImageFilters,
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

pub fn parse_list_params(query: Option<&str>) -> AppResult<ListParams> {
    let mut params = ListParams::default();
    let Some(query) = query else { return Ok(params) };

    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "tags" => {
                let v = value.trim();
                if !v.is_empty() {
                    params.filters.tags.push(v.to_string());
                }
            }
            "logic" => {
                params.filters.logic = match value.as_ref() {
                    "and" => TagLogic::And,
                    "or" => TagLogic::Or,
                    other => {
                        return Err(AppError::ValidationError {
                            field: "logic".into(),
                            message: format!("must be 'and' or 'or', got '{}'", other),
                        })
                    }
                };
            }
            "library_id" => {
                let v = value.trim();
                if !v.is_empty() {
                    params.filters.library_id = Some(v.to_string());
                }
            }
            "no_tags" => {
                params.filters.no_tags = matches!(value.as_ref(), "1" | "true");
            }
            "cursor" => {
                let v = value.into_owned();
                // Cursors are image ids; every id carries the library prefix
                if !v.contains(':') {
                    return Err(AppError::ValidationError {
                        field: "cursor".into(),
                        message: "not a valid image-id cursor".into(),
                    });
                }
                params.cursor = Some(v);
            }
            "limit" => {
                let parsed = value.parse::<i64>().map_err(|_| AppError::ValidationError {
                    field: "limit".into(),
                    message: format!("not a number: '{}'", value),
                })?;
                params.limit = Some(parsed);
            }
            _ => {}
        }
    }
    Ok(params)
}

/// Cursor-paged, filtered listing. Responses are projected to
/// `(id, relative_path, width, height)` to bound payload size.
pub async fn list_images(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> AppResult<impl IntoResponse> {
    let params = parse_list_params(query.as_deref())?;
    let limit = validation::validate_limit(params.limit, DEFAULT_LIMIT, MAX_LIMIT)?;
    let page =
        repo::list_images(&state.db, &params.filters, params.cursor.as_deref(), limit).await?;
    Ok(Json(page))
}

/// Full document fetch, the only response carrying the tag list. The id
/// embeds a relative path, hence the wildcard route and the
/// separator-tolerant lookup underneath.
pub async fn get_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let doc = repo::fetch_image(&state.db, &id).await?.ok_or_not_found("image")?;
    Ok(Json(doc))
}
