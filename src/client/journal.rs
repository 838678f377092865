use super::{send, ClientError, ClusterRequest, CreateEntryRequest, UpdateEntryRequest};
use crate::analysis::ClusterResult;
use crate::journal_entries::{DailyAggregate, JournalEntry, MoodPoint, PhraseCount};
use crate::JOURNAL_API;
use chrono::NaiveDate;

fn date_params(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Vec<(&'static str, String)> {
    let mut params = Vec::new();
    if let Some(start) = start {
        params.push(("startDate", start.to_string()));
    }
    if let Some(end) = end {
        params.push(("endDate", end.to_string()));
    }
    params
}

pub async fn create_entry(
    base_url: &str,
    token: &str,
    text: &str,
    entry_date: Option<NaiveDate>,
) -> Result<JournalEntry, ClientError> {
    let url = format!("{base_url}/{JOURNAL_API}");
    let request = CreateEntryRequest {
        text: text.to_string(),
        entry_date,
    };
    let response = send(reqwest::Client::new().post(url).json(&request), Some(token)).await?;
    Ok(response.json().await?)
}

pub async fn fetch_entries(
    base_url: &str,
    token: &str,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<Vec<JournalEntry>, ClientError> {
    let url = format!("{base_url}/{JOURNAL_API}");
    let request = reqwest::Client::new().get(url).query(&date_params(start, end));
    Ok(send(request, Some(token)).await?.json().await?)
}

pub async fn fetch_entry(base_url: &str, token: &str, id: i32) -> Result<JournalEntry, ClientError> {
    let url = format!("{base_url}/{JOURNAL_API}/{id}");
    Ok(send(reqwest::Client::new().get(url), Some(token)).await?.json().await?)
}

pub async fn update_entry(
    base_url: &str,
    token: &str,
    id: i32,
    text: &str,
) -> Result<JournalEntry, ClientError> {
    let url = format!("{base_url}/{JOURNAL_API}/{id}");
    let request = UpdateEntryRequest {
        text: text.to_string(),
    };
    let response = send(reqwest::Client::new().put(url).json(&request), Some(token)).await?;
    Ok(response.json().await?)
}

pub async fn delete_entry(base_url: &str, token: &str, id: i32) -> Result<(), ClientError> {
    let url = format!("{base_url}/{JOURNAL_API}/{id}");
    send(reqwest::Client::new().delete(url), Some(token)).await?;
    Ok(())
}

pub async fn fetch_mood_data(
    base_url: &str,
    token: &str,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<Vec<MoodPoint>, ClientError> {
    let url = format!("{base_url}/{JOURNAL_API}/mood-data");
    let request = reqwest::Client::new().get(url).query(&date_params(start, end));
    Ok(send(request, Some(token)).await?.json().await?)
}

pub async fn fetch_daily(
    base_url: &str,
    token: &str,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<Vec<DailyAggregate>, ClientError> {
    let url = format!("{base_url}/{JOURNAL_API}/daily");
    let request = reqwest::Client::new().get(url).query(&date_params(start, end));
    Ok(send(request, Some(token)).await?.json().await?)
}

pub async fn fetch_trends(
    base_url: &str,
    token: &str,
    limit: Option<usize>,
) -> Result<Vec<PhraseCount>, ClientError> {
    let url = format!("{base_url}/{JOURNAL_API}/trends");
    let mut request = reqwest::Client::new().get(url);
    if let Some(limit) = limit {
        request = request.query(&[("limit", limit)]);
    }
    Ok(send(request, Some(token)).await?.json().await?)
}

pub async fn search_by_keyword(
    base_url: &str,
    token: &str,
    keyword: &str,
) -> Result<Vec<JournalEntry>, ClientError> {
    let url = format!("{base_url}/{JOURNAL_API}/search/keyword");
    let request = reqwest::Client::new().get(url).query(&[("keyword", keyword)]);
    Ok(send(request, Some(token)).await?.json().await?)
}

pub async fn search_by_mood(
    base_url: &str,
    token: &str,
    min_mood: f64,
    max_mood: f64,
) -> Result<Vec<JournalEntry>, ClientError> {
    let url = format!("{base_url}/{JOURNAL_API}/search/mood");
    let request = reqwest::Client::new()
        .get(url)
        .query(&[("minMood", min_mood), ("maxMood", max_mood)]);
    Ok(send(request, Some(token)).await?.json().await?)
}

pub async fn cluster_entries(
    base_url: &str,
    token: &str,
    n_clusters: usize,
) -> Result<ClusterResult, ClientError> {
    let url = format!("{base_url}/{JOURNAL_API}/cluster");
    let request = ClusterRequest { n_clusters };
    let response = send(reqwest::Client::new().post(url).json(&request), Some(token)).await?;
    Ok(response.json().await?)
}
