use super::{AppJson, AppState};
use crate::analysis::{analyze_or_log, cluster_or_log, ClusterResult};
use crate::auth::CurrentUser;
use crate::error::{validate_not_blank, AppError};
use crate::journal_entries::{
    self, DailyAggregate, DateRange, JournalEntry, MoodPoint, PhraseCount, MOOD_MAX, MOOD_MIN,
};
use crate::JOURNAL_API;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use diesel::Connection;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const DEFAULT_TRENDS_LIMIT: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEntryRequest {
    pub text: String,
    pub entry_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateEntryRequest {
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRangeParams {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl DateRangeParams {
    fn range(&self) -> Result<DateRange, AppError> {
        DateRange::new(self.start_date, self.end_date)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendsParams {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordParams {
    pub keyword: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoodParams {
    pub min_mood: Option<f64>,
    pub max_mood: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRequest {
    pub n_clusters: usize,
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route(
            format!("/{JOURNAL_API}").as_str(),
            get(list_entries).post(create_entry),
        )
        .route(format!("/{JOURNAL_API}/mood-data").as_str(), get(mood_data))
        .route(format!("/{JOURNAL_API}/daily").as_str(), get(daily))
        .route(format!("/{JOURNAL_API}/trends").as_str(), get(trends))
        .route(
            format!("/{JOURNAL_API}/search/keyword").as_str(),
            get(search_keyword),
        )
        .route(format!("/{JOURNAL_API}/search/mood").as_str(), get(search_mood))
        .route(format!("/{JOURNAL_API}/cluster").as_str(), post(cluster))
        .route(
            format!("/{JOURNAL_API}/:id").as_str(),
            get(get_entry).put(update_entry).delete(delete_entry),
        )
}

/// Analyses the entry in a background task and attaches the result. The
/// entry has already been returned to the caller with null annotations.
/// The attach is skipped if the text changed while the analysis ran.
fn spawn_deferred_analysis(state: AppState, owner_id: i32, entry_id: i32, text: String) {
    tokio::spawn(async move {
        let Some(annotations) =
            analyze_or_log(state.analyzer.as_ref(), &text, state.analysis_timeout).await
        else {
            return;
        };

        let attached = state
            .pool
            .get()
            .map_err(AppError::from)
            .and_then(|mut conn| {
                journal_entries::attach_analysis_if_current(
                    &mut conn,
                    owner_id,
                    entry_id,
                    &text,
                    &annotations,
                )
            });
        match attached {
            Ok(Some(_)) => info!(entry_id, "deferred analysis attached"),
            Ok(None) => info!(entry_id, "deferred analysis skipped, text changed"),
            Err(err) => warn!(entry_id, error = %err, "deferred analysis dropped"),
        }
    });
}

pub async fn create_entry(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppJson(payload): AppJson<CreateEntryRequest>,
) -> Result<(StatusCode, Json<JournalEntry>), AppError> {
    validate_not_blank(&payload.text, "text")?;
    let entry_date = payload
        .entry_date
        .unwrap_or_else(|| chrono::Local::now().date_naive());

    if state.defer_analysis {
        let mut conn = state.pool.get()?;
        let entry = journal_entries::create_entry(&mut conn, user.id, entry_date, &payload.text)?;
        drop(conn);
        spawn_deferred_analysis(state, user.id, entry.id, payload.text);
        return Ok((StatusCode::CREATED, Json(entry)));
    }

    // No pooled connection is held while waiting on the scorer.
    let annotations =
        analyze_or_log(state.analyzer.as_ref(), &payload.text, state.analysis_timeout).await;

    let mut conn = state.pool.get()?;
    let entry = conn.transaction::<_, AppError, _>(|conn| {
        let entry = journal_entries::create_entry(conn, user.id, entry_date, &payload.text)?;
        match &annotations {
            Some(annotations) => {
                journal_entries::attach_analysis(conn, user.id, entry.id, annotations)
            }
            None => Ok(entry),
        }
    })?;

    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn list_entries(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<DateRangeParams>,
) -> Result<Json<Vec<JournalEntry>>, AppError> {
    let range = params.range()?;
    let mut conn = state.pool.get()?;
    let entries = journal_entries::list_entries(&mut conn, user.id, Some(range))?;
    Ok(Json(entries))
}

pub async fn get_entry(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(entry_id): Path<i32>,
) -> Result<Json<JournalEntry>, AppError> {
    let mut conn = state.pool.get()?;
    let entry = journal_entries::get_entry(&mut conn, user.id, entry_id)?;
    Ok(Json(entry))
}

/// Replaces the text and re-runs analysis. A failed analysis clears the old
/// annotations rather than keeping ones that describe different text.
pub async fn update_entry(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(entry_id): Path<i32>,
    AppJson(payload): AppJson<UpdateEntryRequest>,
) -> Result<Json<JournalEntry>, AppError> {
    validate_not_blank(&payload.text, "text")?;
    {
        let mut conn = state.pool.get()?;
        journal_entries::get_entry(&mut conn, user.id, entry_id)?;
    }

    if state.defer_analysis {
        let mut conn = state.pool.get()?;
        let entry =
            journal_entries::update_entry_text(&mut conn, user.id, entry_id, &payload.text, None)?;
        drop(conn);
        spawn_deferred_analysis(state, user.id, entry_id, payload.text);
        return Ok(Json(entry));
    }

    let annotations =
        analyze_or_log(state.analyzer.as_ref(), &payload.text, state.analysis_timeout).await;

    let mut conn = state.pool.get()?;
    let entry = journal_entries::update_entry_text(
        &mut conn,
        user.id,
        entry_id,
        &payload.text,
        annotations.as_ref(),
    )?;
    Ok(Json(entry))
}

pub async fn delete_entry(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(entry_id): Path<i32>,
) -> Result<StatusCode, AppError> {
    let mut conn = state.pool.get()?;
    journal_entries::delete_entry(&mut conn, user.id, entry_id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mood_data(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<DateRangeParams>,
) -> Result<Json<Vec<MoodPoint>>, AppError> {
    let range = params.range()?;
    let mut conn = state.pool.get()?;
    let entries = journal_entries::list_entries(&mut conn, user.id, Some(range))?;
    Ok(Json(journal_entries::mood_series(&entries)))
}

pub async fn daily(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<DateRangeParams>,
) -> Result<Json<Vec<DailyAggregate>>, AppError> {
    let range = params.range()?;
    let mut conn = state.pool.get()?;
    let entries = journal_entries::list_entries(&mut conn, user.id, Some(range))?;
    Ok(Json(journal_entries::daily_aggregates(&entries)))
}

pub async fn trends(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<TrendsParams>,
) -> Result<Json<Vec<PhraseCount>>, AppError> {
    let range = DateRange::new(params.start_date, params.end_date)?;
    let limit = params.limit.unwrap_or(DEFAULT_TRENDS_LIMIT);
    let mut conn = state.pool.get()?;
    let entries = journal_entries::list_entries(&mut conn, user.id, Some(range))?;
    Ok(Json(journal_entries::top_key_phrases(&entries, limit)))
}

pub async fn search_keyword(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<KeywordParams>,
) -> Result<Json<Vec<JournalEntry>>, AppError> {
    let mut conn = state.pool.get()?;
    let entries = journal_entries::search_by_keyword(&mut conn, user.id, &params.keyword)?;
    Ok(Json(entries))
}

pub async fn search_mood(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<MoodParams>,
) -> Result<Json<Vec<JournalEntry>>, AppError> {
    let min = params.min_mood.unwrap_or(MOOD_MIN);
    let max = params.max_mood.unwrap_or(MOOD_MAX);
    let mut conn = state.pool.get()?;
    let entries = journal_entries::search_by_mood(&mut conn, user.id, min, max)?;
    Ok(Json(entries))
}

/// Groups all of the caller's entries. Any scorer failure yields an empty
/// result and leaves existing cluster ids alone.
pub async fn cluster(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppJson(payload): AppJson<ClusterRequest>,
) -> Result<Json<ClusterResult>, AppError> {
    if payload.n_clusters < 1 {
        return Err(AppError::Validation("nClusters must be at least 1".to_string()));
    }

    let entries = {
        let mut conn = state.pool.get()?;
        journal_entries::entries_in_creation_order(&mut conn, user.id)?
    };
    if entries.is_empty() {
        return Ok(Json(ClusterResult::default()));
    }

    let texts: Vec<String> = entries.iter().map(|entry| entry.raw_text.clone()).collect();
    let Some(result) = cluster_or_log(
        state.analyzer.as_ref(),
        user.id,
        &texts,
        payload.n_clusters,
        state.analysis_timeout,
    )
    .await
    else {
        return Ok(Json(ClusterResult::default()));
    };

    let assignments: Vec<(i32, i32)> = entries
        .iter()
        .zip(&result.entry_clusters)
        .map(|(entry, cluster)| (entry.id, *cluster))
        .collect();
    let mut conn = state.pool.get()?;
    let updated = journal_entries::assign_clusters(&mut conn, user.id, &assignments)?;
    info!(user_id = user.id, updated, clusters = result.num_clusters, "entries clustered");

    Ok(Json(result))
}
