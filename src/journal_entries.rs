use crate::auth::require_owner;
use crate::error::{validate_not_blank, AppError};
use crate::schema::journal_entries;
use crate::tables::{AnnotationChanges, JournalEntryRow, NewJournalEntry};
use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::info;

pub const MOOD_MIN: f64 = -1.0;
pub const MOOD_MAX: f64 = 1.0;

/// AI-derived fields for one entry, as produced by the analysis service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotations {
    pub mood_score: f64,
    #[serde(default)]
    pub emotions: BTreeMap<String, f64>,
    #[serde(default)]
    pub core_concerns: Vec<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub growth_tips: Vec<String>,
    #[serde(default)]
    pub key_phrases: Vec<String>,
}

impl Annotations {
    /// Rejects values that cannot be stored as-is: a mood score outside
    /// [-1, 1] or any non-finite number.
    pub fn validate(&self) -> Result<(), String> {
        if !self.mood_score.is_finite() || !(MOOD_MIN..=MOOD_MAX).contains(&self.mood_score) {
            return Err(format!("mood score {} is outside [-1, 1]", self.mood_score));
        }
        if let Some((label, _)) = self.emotions.iter().find(|(_, v)| !v.is_finite()) {
            return Err(format!("emotion '{label}' has a non-finite confidence"));
        }
        Ok(())
    }
}

impl TryFrom<&Annotations> for AnnotationChanges {
    type Error = serde_json::Error;

    fn try_from(annotations: &Annotations) -> Result<Self, Self::Error> {
        Ok(Self {
            mood_score: Some(annotations.mood_score),
            emotions: Some(serde_json::to_string(&annotations.emotions)?),
            core_concerns: Some(serde_json::to_string(&annotations.core_concerns)?),
            summary: Some(annotations.summary.clone()),
            growth_tips: Some(serde_json::to_string(&annotations.growth_tips)?),
            key_phrases: Some(serde_json::to_string(&annotations.key_phrases)?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub id: i32,
    pub user_id: i32,
    pub entry_date: NaiveDate,
    pub creation_timestamp: NaiveDateTime,
    pub raw_text: String,
    pub mood_score: Option<f64>,
    pub emotions: Option<BTreeMap<String, f64>>,
    pub core_concerns: Option<Vec<String>>,
    pub summary: Option<String>,
    pub growth_tips: Option<Vec<String>>,
    pub key_phrases: Option<Vec<String>>,
    pub cluster_id: Option<i32>,
}

fn decode_column<T: DeserializeOwned>(column: Option<String>) -> serde_json::Result<Option<T>> {
    column.map(|text| serde_json::from_str(&text)).transpose()
}

impl TryFrom<JournalEntryRow> for JournalEntry {
    type Error = serde_json::Error;

    fn try_from(row: JournalEntryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            entry_date: row.entry_date,
            creation_timestamp: row.creation_timestamp,
            raw_text: row.raw_text,
            mood_score: row.mood_score,
            emotions: decode_column(row.emotions)?,
            core_concerns: decode_column(row.core_concerns)?,
            summary: row.summary,
            growth_tips: decode_column(row.growth_tips)?,
            key_phrases: decode_column(row.key_phrases)?,
            cluster_id: row.cluster_id,
        })
    }
}

fn into_entries(rows: Vec<JournalEntryRow>) -> Result<Vec<JournalEntry>, AppError> {
    rows.into_iter()
        .map(|row| JournalEntry::try_from(row).map_err(AppError::from))
        .collect()
}

/// Inclusive date bounds; either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<Self, AppError> {
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(AppError::Validation(format!(
                    "startDate {start} is after endDate {end}"
                )));
            }
        }
        Ok(Self { start, end })
    }
}

fn load_owned(
    conn: &mut SqliteConnection,
    owner_id: i32,
    entry_id: i32,
) -> Result<JournalEntryRow, AppError> {
    let row = journal_entries::table
        .find(entry_id)
        .select(JournalEntryRow::as_select())
        .first(conn)
        .map_err(AppError::from_query("journal entry"))?;
    require_owner(owner_id, row.user_id, "journal entry")?;
    Ok(row)
}

/// Persists a new entry with every annotation field null.
pub fn create_entry(
    conn: &mut SqliteConnection,
    owner_id: i32,
    entry_date: NaiveDate,
    raw_text: &str,
) -> Result<JournalEntry, AppError> {
    validate_not_blank(raw_text, "text")?;

    let new_entry = NewJournalEntry {
        user_id: owner_id,
        entry_date,
        creation_timestamp: chrono::Utc::now().naive_utc(),
        raw_text,
    };

    let row = diesel::insert_into(journal_entries::table)
        .values(&new_entry)
        .returning(JournalEntryRow::as_returning())
        .get_result(conn)?;

    info!(entry_id = row.id, user_id = owner_id, %entry_date, "journal entry created");
    Ok(row.try_into()?)
}

pub fn get_entry(
    conn: &mut SqliteConnection,
    owner_id: i32,
    entry_id: i32,
) -> Result<JournalEntry, AppError> {
    Ok(load_owned(conn, owner_id, entry_id)?.try_into()?)
}

fn write_annotations(
    conn: &mut SqliteConnection,
    entry_id: i32,
    changes: AnnotationChanges,
) -> Result<JournalEntry, AppError> {
    let row = diesel::update(journal_entries::table.find(entry_id))
        .set(&changes)
        .returning(JournalEntryRow::as_returning())
        .get_result(conn)?;
    Ok(row.try_into()?)
}

/// Replaces the whole annotation set of an existing entry in one statement.
pub fn attach_analysis(
    conn: &mut SqliteConnection,
    owner_id: i32,
    entry_id: i32,
    annotations: &Annotations,
) -> Result<JournalEntry, AppError> {
    annotations.validate().map_err(AppError::Validation)?;
    let changes = AnnotationChanges::try_from(annotations)?;

    load_owned(conn, owner_id, entry_id)?;
    let entry = write_annotations(conn, entry_id, changes)?;
    info!(entry_id, "analysis attached");
    Ok(entry)
}

/// Attaches annotations only while the entry still holds `analysed_text`.
/// Returns `None` when the text was replaced after the analysis started.
pub fn attach_analysis_if_current(
    conn: &mut SqliteConnection,
    owner_id: i32,
    entry_id: i32,
    analysed_text: &str,
    annotations: &Annotations,
) -> Result<Option<JournalEntry>, AppError> {
    annotations.validate().map_err(AppError::Validation)?;
    let changes = AnnotationChanges::try_from(annotations)?;

    load_owned(conn, owner_id, entry_id)?;
    let row = diesel::update(
        journal_entries::table
            .find(entry_id)
            .filter(journal_entries::raw_text.eq(analysed_text)),
    )
    .set(&changes)
    .returning(JournalEntryRow::as_returning())
    .get_result(conn)
    .optional()?;

    match row {
        Some(row) => {
            info!(entry_id, "analysis attached");
            Ok(Some(row.try_into()?))
        }
        None => {
            info!(entry_id, "analysis superseded by newer text");
            Ok(None)
        }
    }
}

/// Nulls every annotation field, leaving text and cluster untouched.
pub fn clear_analysis(
    conn: &mut SqliteConnection,
    owner_id: i32,
    entry_id: i32,
) -> Result<JournalEntry, AppError> {
    load_owned(conn, owner_id, entry_id)?;
    write_annotations(conn, entry_id, AnnotationChanges::default())
}

/// Rewrites the text and, in the same statement, the annotations: `None`
/// clears them. The creation timestamp is never touched.
pub fn update_entry_text(
    conn: &mut SqliteConnection,
    owner_id: i32,
    entry_id: i32,
    raw_text: &str,
    annotations: Option<&Annotations>,
) -> Result<JournalEntry, AppError> {
    validate_not_blank(raw_text, "text")?;
    let changes = match annotations {
        Some(annotations) => {
            annotations.validate().map_err(AppError::Validation)?;
            AnnotationChanges::try_from(annotations)?
        }
        None => AnnotationChanges::default(),
    };

    load_owned(conn, owner_id, entry_id)?;
    let row = diesel::update(journal_entries::table.find(entry_id))
        .set((journal_entries::raw_text.eq(raw_text), &changes))
        .returning(JournalEntryRow::as_returning())
        .get_result(conn)?;

    info!(entry_id, user_id = owner_id, "journal entry updated");
    Ok(row.try_into()?)
}

pub fn delete_entry(
    conn: &mut SqliteConnection,
    owner_id: i32,
    entry_id: i32,
) -> Result<(), AppError> {
    load_owned(conn, owner_id, entry_id)?;
    diesel::delete(journal_entries::table.find(entry_id)).execute(conn)?;
    info!(entry_id, user_id = owner_id, "journal entry deleted");
    Ok(())
}

/// The owner's entries ordered by entry date ascending.
pub fn list_entries(
    conn: &mut SqliteConnection,
    owner_id: i32,
    range: Option<DateRange>,
) -> Result<Vec<JournalEntry>, AppError> {
    let mut query = journal_entries::table
        .filter(journal_entries::user_id.eq(owner_id))
        .select(JournalEntryRow::as_select())
        .into_boxed();

    if let Some(range) = range {
        if let Some(start) = range.start {
            query = query.filter(journal_entries::entry_date.ge(start));
        }
        if let Some(end) = range.end {
            query = query.filter(journal_entries::entry_date.le(end));
        }
    }

    let rows = query
        .order((
            journal_entries::entry_date.asc(),
            journal_entries::creation_timestamp.asc(),
            journal_entries::id.asc(),
        ))
        .load(conn)?;

    into_entries(rows)
}

/// Every entry of the owner in creation order; the order clustering results
/// are mapped back in.
pub fn entries_in_creation_order(
    conn: &mut SqliteConnection,
    owner_id: i32,
) -> Result<Vec<JournalEntry>, AppError> {
    let rows = journal_entries::table
        .filter(journal_entries::user_id.eq(owner_id))
        .select(JournalEntryRow::as_select())
        .order((
            journal_entries::creation_timestamp.asc(),
            journal_entries::id.asc(),
        ))
        .load(conn)?;
    into_entries(rows)
}

/// Writes `(entry_id, cluster_id)` pairs in one transaction. Pairs naming
/// entries of other users are skipped.
pub fn assign_clusters(
    conn: &mut SqliteConnection,
    owner_id: i32,
    assignments: &[(i32, i32)],
) -> Result<usize, AppError> {
    conn.transaction::<_, AppError, _>(|conn| {
        let mut updated = 0;
        for (entry_id, cluster) in assignments {
            updated += diesel::update(
                journal_entries::table
                    .filter(journal_entries::id.eq(entry_id))
                    .filter(journal_entries::user_id.eq(owner_id)),
            )
            .set(journal_entries::cluster_id.eq(Some(*cluster)))
            .execute(conn)?;
        }
        Ok(updated)
    })
}

/// Case-insensitive substring search over raw text, newest first.
///
/// SQLite only folds ASCII case in `LIKE` and `lower()`, so matching runs
/// on Unicode-lowercased text here.
pub fn search_by_keyword(
    conn: &mut SqliteConnection,
    owner_id: i32,
    keyword: &str,
) -> Result<Vec<JournalEntry>, AppError> {
    validate_not_blank(keyword, "keyword")?;
    let needle = keyword.trim().to_lowercase();

    let rows: Vec<JournalEntryRow> = journal_entries::table
        .filter(journal_entries::user_id.eq(owner_id))
        .select(JournalEntryRow::as_select())
        .order((
            journal_entries::creation_timestamp.desc(),
            journal_entries::id.desc(),
        ))
        .load(conn)?;
    into_entries(
        rows.into_iter()
            .filter(|row| row.raw_text.to_lowercase().contains(&needle))
            .collect(),
    )
}

/// Entries whose mood score lies in `[min, max]`, newest first. Unscored
/// entries never match.
pub fn search_by_mood(
    conn: &mut SqliteConnection,
    owner_id: i32,
    min: f64,
    max: f64,
) -> Result<Vec<JournalEntry>, AppError> {
    if min > max {
        return Err(AppError::Validation(format!(
            "minMood {min} is greater than maxMood {max}"
        )));
    }

    let rows = journal_entries::table
        .filter(journal_entries::user_id.eq(owner_id))
        .filter(journal_entries::mood_score.between(min, max))
        .select(JournalEntryRow::as_select())
        .order((
            journal_entries::creation_timestamp.desc(),
            journal_entries::id.desc(),
        ))
        .load(conn)?;
    into_entries(rows)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoodPoint {
    pub date: NaiveDate,
    pub mood_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyAggregate {
    pub date: NaiveDate,
    pub average_mood: Option<f64>,
    pub total_words: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhraseCount {
    pub phrase: String,
    pub count: i64,
}

/// Scored entries as chart points, date ascending.
pub fn mood_series(entries: &[JournalEntry]) -> Vec<MoodPoint> {
    let mut points: Vec<MoodPoint> = entries
        .iter()
        .filter_map(|entry| {
            entry.mood_score.map(|mood_score| MoodPoint {
                date: entry.entry_date,
                mood_score,
            })
        })
        .collect();
    points.sort_by_key(|point| point.date);
    points
}

/// One row per entry date: mean mood over the scored entries of that day and
/// the total whitespace-separated word count.
pub fn daily_aggregates(entries: &[JournalEntry]) -> Vec<DailyAggregate> {
    let mut days: BTreeMap<NaiveDate, (f64, usize, i64)> = BTreeMap::new();
    for entry in entries {
        let day = days.entry(entry.entry_date).or_default();
        if let Some(mood) = entry.mood_score {
            day.0 += mood;
            day.1 += 1;
        }
        day.2 += entry.raw_text.split_whitespace().count() as i64;
    }

    days.into_iter()
        .map(|(date, (mood_sum, scored, total_words))| DailyAggregate {
            date,
            average_mood: (scored > 0).then(|| mood_sum / scored as f64),
            total_words,
        })
        .collect()
}

/// Most frequent key phrases: count descending, then phrase ascending.
pub fn top_key_phrases(entries: &[JournalEntry], limit: usize) -> Vec<PhraseCount> {
    let mut counts: HashMap<&str, i64> = HashMap::new();
    for phrase in entries.iter().flat_map(|e| e.key_phrases.iter().flatten()) {
        *counts.entry(phrase.as_str()).or_default() += 1;
    }

    let mut ranked: Vec<PhraseCount> = counts
        .into_iter()
        .map(|(phrase, count)| PhraseCount {
            phrase: phrase.to_string(),
            count,
        })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.phrase.cmp(&b.phrase)));
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;

    pub fn sample_annotations() -> Annotations {
        Annotations {
            mood_score: -0.4,
            emotions: BTreeMap::from([("sadness".to_string(), 0.7), ("hope".to_string(), 0.3)]),
            core_concerns: vec!["work".to_string(), "stress/anxiety".to_string()],
            summary: "A difficult day at work.".to_string(),
            growth_tips: vec!["Take a short walk.".to_string()],
            key_phrases: vec!["deadline".to_string(), "long meeting".to_string()],
        }
    }
}
