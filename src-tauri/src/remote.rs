use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, warn};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};

use crate::card_store::CardStore;
use crate::error::{FlashcardError, Result};
use crate::models::{normalize_category, Card, CardPatch, NewCard, Rating};

// PostgREST page, insert payload and `in.(...)` URL limits
pub const PAGE_SIZE: usize = 1000;
pub const INSERT_CHUNK_SIZE: usize = 500;
pub const ID_CHUNK_SIZE: usize = 50;

const TABLE: &str = "flashcards";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`.
    pub url: String,
    pub anon_key: String,
}

/// The signed-in account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUser {
    pub id: String,
    pub access_token: String,
}

/// A row of the `flashcards` table.
#[derive(Debug, Clone, Deserialize)]
struct CardRow {
    id: String,
    front: String,
    back: String,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    difficulty: Option<Rating>,
    #[serde(default)]
    last_reviewed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    review_count: Option<u32>,
    #[serde(default)]
    next_review_date: Option<DateTime<Utc>>,
    #[serde(default)]
    interval: Option<u32>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl From<CardRow> for Card {
    fn from(row: CardRow) -> Self {
        // the first tag doubles as the category
        let category = row.tags.and_then(|tags| tags.into_iter().next());
        Card {
            id: row.id,
            front: row.front,
            back: row.back,
            category: normalize_category(category),
            difficulty: row.difficulty,
            last_reviewed_at: row.last_reviewed_at,
            review_count: row.review_count.unwrap_or(0),
            next_review_at: row.next_review_date,
            last_interval: row.interval,
            created_at: row.created_at.unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, Serialize)]
struct InsertRow<'a> {
    user_id: &'a str,
    front: &'a str,
    back: &'a str,
    tags: Vec<&'a str>,
    review_count: u32,
}

#[derive(Debug, Default, PartialEq, Serialize)]
struct PatchRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    front: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    back: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    difficulty: Option<Rating>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_reviewed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    review_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_review_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    interval: Option<u32>,
}

impl From<&CardPatch> for PatchRow {
    fn from(patch: &CardPatch) -> Self {
        PatchRow {
            front: patch.front.clone(),
            back: patch.back.clone(),
            tags: patch.category.clone().map(|c| vec![c]),
            difficulty: patch.difficulty,
            last_reviewed_at: patch.last_reviewed_at,
            review_count: patch.review_count,
            next_review_date: patch.next_review_at,
            interval: patch.last_interval,
        }
    }
}

/// PostgREST `in` filter value: `in.("a","b")`.
fn in_filter(ids: &[String]) -> String {
    let quoted: Vec<String> = ids.iter().map(|id| format!("\"{}\"", id.replace('"', "\\\""))).collect();
    format!("in.({})", quoted.join(","))
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Fetch pages of `page_size` until a short page comes back.
pub async fn fetch_all_pages<T, F, Fut>(page_size: usize, mut fetch_page: F) -> Result<Vec<T>>
where
    F: FnMut(usize, usize) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let mut all = Vec::new();
    let mut offset = 0;
    loop {
        let page = fetch_page(offset, page_size).await?;
        let len = page.len();
        all.extend(page);
        if len < page_size {
            break;
        }
        offset += page_size;
    }
    Ok(all)
}

/// Run `send` once per chunk of at most `size` items, stopping at the first failure.
pub async fn for_each_chunk<T, F, Fut, O>(items: &[T], size: usize, mut send: F) -> Result<Vec<O>>
where
    T: Clone,
    F: FnMut(Vec<T>) -> Fut,
    Fut: Future<Output = Result<Vec<O>>>,
{
    let mut out = Vec::new();
    for chunk in items.chunks(size.max(1)) {
        out.extend(send(chunk.to_vec()).await?);
    }
    Ok(out)
}

/// Due cards first, then never-reviewed cards up to `limit`, without repeating an id.
fn merge_due_with_new(due: Vec<Card>, fresh: Vec<Card>, limit: usize) -> Vec<Card> {
    let mut seen = HashSet::new();
    due.into_iter()
        .chain(fresh)
        .filter(|card| seen.insert(card.id.clone()))
        .take(limit)
        .collect()
}

/// Account-scoped cards in a Supabase `flashcards` table.
pub struct RemoteCardStore {
    client: Client,
    config: RemoteConfig,
    user: Option<RemoteUser>,
}

impl RemoteCardStore {
    pub fn new(config: RemoteConfig, user: Option<RemoteUser>) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(RemoteCardStore { client, config, user })
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.config.url.trim_end_matches('/'), TABLE)
    }

    fn signed_in(&self) -> Result<&RemoteUser> {
        self.user.as_ref().ok_or(FlashcardError::NotSignedIn)
    }

    fn request(&self, method: Method, user: &RemoteUser) -> RequestBuilder {
        self.client
            .request(method, self.table_url())
            .header("apikey", &self.config.anon_key)
            .bearer_auth(&user.access_token)
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(FlashcardError::Remote {
            status: status.as_u16(),
            message,
        })
    }

    async fn select(&self, user: &RemoteUser, query: Vec<(&str, String)>) -> Result<Vec<Card>> {
        let response = self.request(Method::GET, user).query(&query).send().await?;
        let rows: Vec<CardRow> = Self::check(response).await?.json().await?;
        Ok(rows.into_iter().map(Card::from).collect())
    }

    async fn insert_chunk(&self, user: &RemoteUser, chunk: Vec<NewCard>) -> Result<Vec<Card>> {
        let rows: Vec<InsertRow<'_>> = chunk
            .iter()
            .map(|card| InsertRow {
                user_id: &user.id,
                front: &card.front,
                back: &card.back,
                tags: vec![card.category.as_str()],
                review_count: 0,
            })
            .collect();
        let response = self
            .request(Method::POST, user)
            .header("Prefer", "return=representation")
            .json(&rows)
            .send()
            .await?;
        let created: Vec<CardRow> = Self::check(response).await?.json().await?;
        Ok(created.into_iter().map(Card::from).collect())
    }

    async fn patch_where(&self, user: &RemoteUser, id_filter: String, body: &PatchRow) -> Result<()> {
        let response = self
            .request(Method::PATCH, user)
            .query(&[("id", id_filter)])
            .json(body)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl CardStore for RemoteCardStore {
    async fn get_cards(&self) -> Result<Vec<Card>> {
        let Some(user) = self.user.as_ref() else {
            return Ok(Vec::new());
        };
        let cards = fetch_all_pages(PAGE_SIZE, move |offset, limit| {
            self.select(
                user,
                vec![
                    ("select", "*".to_string()),
                    ("order", "created_at.desc".to_string()),
                    ("offset", offset.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
        })
        .await?;
        debug!("Fetched {} remote cards", cards.len());
        Ok(cards)
    }

    async fn add_cards(&self, cards: Vec<NewCard>) -> Result<Vec<Card>> {
        let user = self.signed_in()?;
        let valid: Vec<NewCard> = cards.into_iter().filter(NewCard::is_valid).collect();
        for_each_chunk(&valid, INSERT_CHUNK_SIZE, move |chunk| self.insert_chunk(user, chunk)).await
    }

    async fn update_card(&self, id: &str, patch: &CardPatch) -> Result<()> {
        let user = self.signed_in()?;
        if patch.is_empty() {
            return Ok(());
        }
        self.patch_where(user, format!("eq.{}", id), &PatchRow::from(patch)).await
    }

    async fn delete_cards(&self, ids: &[String]) -> Result<()> {
        let user = self.signed_in()?;
        for_each_chunk(ids, ID_CHUNK_SIZE, move |chunk| async move {
            let response = self
                .request(Method::DELETE, user)
                .query(&[("id", in_filter(&chunk))])
                .send()
                .await?;
            Self::check(response).await?;
            Ok::<_, FlashcardError>(Vec::<()>::new())
        })
        .await?;
        Ok(())
    }

    async fn update_category(&self, ids: &[String], category: &str) -> Result<()> {
        let user = self.signed_in()?;
        let category = category.trim();
        if category.is_empty() {
            return Err(FlashcardError::InvalidInput("Category must not be empty".to_string()));
        }
        let body = PatchRow {
            tags: Some(vec![category.to_string()]),
            ..Default::default()
        };
        let body = &body;
        for_each_chunk(ids, ID_CHUNK_SIZE, move |chunk| async move {
            self.patch_where(user, in_filter(&chunk), body).await?;
            Ok::<_, FlashcardError>(Vec::<()>::new())
        })
        .await?;
        Ok(())
    }

    async fn get_due_cards(&self, limit: usize) -> Result<Vec<Card>> {
        let Some(user) = self.user.as_ref() else {
            return Ok(Vec::new());
        };
        let due = self
            .select(
                user,
                vec![
                    ("select", "*".to_string()),
                    ("next_review_date", format!("lte.{}", timestamp(Utc::now()))),
                    ("order", "next_review_date.asc".to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        if due.len() >= limit {
            return Ok(due);
        }

        // New cards may also be due; fetch a full `limit` so duplicates can be skipped.
        let fresh = match self
            .select(
                user,
                vec![
                    ("select", "*".to_string()),
                    ("review_count", "eq.0".to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await
        {
            Ok(cards) => cards,
            Err(e) => {
                warn!("Failed to top up due cards with new cards: {}", e);
                Vec::new()
            }
        };
        Ok(merge_due_with_new(due, fresh, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;

    fn row(json: serde_json::Value) -> Card {
        let row: CardRow = serde_json::from_value(json).unwrap();
        Card::from(row)
    }

    #[test]
    fn test_row_uses_first_tag_as_category() {
        let card = row(json!({
            "id": "1", "front": "Q", "back": "A",
            "tags": ["Verbs", "Spanish"],
            "review_count": 2,
            "interval": 5,
            "difficulty": "medium",
            "next_review_date": "2024-05-01T10:00:00.123456+00:00",
            "created_at": "2024-04-01T10:00:00+00:00"
        }));
        assert_eq!(card.category, "Verbs");
        assert_eq!(card.review_count, 2);
        assert_eq!(card.last_interval, Some(5));
        assert_eq!(card.difficulty, Some(Rating::Medium));
        assert!(card.next_review_at.is_some());
    }

    #[test]
    fn test_row_without_tags_is_uncategorized() {
        let card = row(json!({"id": "1", "front": "Q", "back": "A", "tags": [], "review_count": null}));
        assert_eq!(card.category, "Uncategorized");
        assert_eq!(card.review_count, 0);
        assert!(card.difficulty.is_none());

        let card = row(json!({"id": "2", "front": "Q", "back": "A", "tags": null}));
        assert_eq!(card.category, "Uncategorized");
    }

    #[test]
    fn test_patch_row_writes_interval() {
        let patch = CardPatch {
            difficulty: Some(Rating::Hard),
            review_count: Some(3),
            last_interval: Some(1),
            category: Some("Nouns".to_string()),
            ..Default::default()
        };
        let body = serde_json::to_value(PatchRow::from(&patch)).unwrap();
        assert_eq!(
            body,
            json!({"difficulty": "hard", "review_count": 3, "interval": 1, "tags": ["Nouns"]})
        );
    }

    #[test]
    fn test_in_filter() {
        let ids = vec!["a".to_string(), "b".to_string()];
        assert_eq!(in_filter(&ids), "in.(\"a\",\"b\")");
    }

    #[tokio::test]
    async fn test_fetch_all_pages_stops_on_short_page() {
        let calls = RefCell::new(Vec::new());
        let total = 2 * 3 + 2;
        let all = fetch_all_pages(3, |offset, limit| {
            calls.borrow_mut().push(offset);
            let page: Vec<usize> = (offset..(offset + limit).min(total)).collect();
            async move { Ok::<_, FlashcardError>(page) }
        })
        .await
        .unwrap();
        assert_eq!(all, (0..total).collect::<Vec<_>>());
        assert_eq!(*calls.borrow(), vec![0, 3, 6]);
    }

    #[tokio::test]
    async fn test_fetch_all_pages_exact_multiple_needs_empty_page() {
        let calls = RefCell::new(0);
        let all = fetch_all_pages(2, |offset, _limit| {
            *calls.borrow_mut() += 1;
            let page: Vec<usize> = if offset < 4 { vec![offset, offset + 1] } else { Vec::new() };
            async move { Ok::<_, FlashcardError>(page) }
        })
        .await
        .unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(*calls.borrow(), 3);
    }

    #[tokio::test]
    async fn test_chunking_sizes() {
        let ids: Vec<String> = (0..120).map(|i| i.to_string()).collect();
        let sizes = RefCell::new(Vec::new());
        for_each_chunk(&ids, ID_CHUNK_SIZE, |chunk| {
            sizes.borrow_mut().push(chunk.len());
            async { Ok::<_, FlashcardError>(Vec::<()>::new()) }
        })
        .await
        .unwrap();
        assert_eq!(*sizes.borrow(), vec![50, 50, 20]);
    }

    #[tokio::test]
    async fn test_chunking_stops_on_error() {
        let cards: Vec<usize> = (0..1200).collect();
        let calls = RefCell::new(0);
        let result = for_each_chunk(&cards, INSERT_CHUNK_SIZE, |_chunk| {
            *calls.borrow_mut() += 1;
            let n = *calls.borrow();
            async move {
                if n == 2 {
                    Err(FlashcardError::Remote {
                        status: 413,
                        message: "Payload too large".to_string(),
                    })
                } else {
                    Ok(vec![n])
                }
            }
        })
        .await;
        assert!(matches!(result, Err(FlashcardError::Remote { status: 413, .. })));
        assert_eq!(*calls.borrow(), 2);
    }

    #[test]
    fn test_merge_due_with_new_dedupes() {
        let card = |id: &str| {
            let mut c = Card::new("Q", "A", None);
            c.id = id.to_string();
            c
        };
        let merged = merge_due_with_new(vec![card("1"), card("2")], vec![card("2"), card("3"), card("4")], 3);
        let ids: Vec<&str> = merged.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_signed_out_reads_are_empty_and_writes_fail() {
        let store = RemoteCardStore::new(
            RemoteConfig {
                url: "http://127.0.0.1:9".to_string(),
                anon_key: "anon".to_string(),
            },
            None,
        )
        .unwrap();
        assert!(store.get_cards().await.unwrap().is_empty());
        assert!(store.get_due_cards(10).await.unwrap().is_empty());
        let result = store.add_cards(vec![NewCard::new("Q", "A", None)]).await;
        assert!(matches!(result, Err(FlashcardError::NotSignedIn)));
        let result = store.update_card("1", &CardPatch::default()).await;
        assert!(matches!(result, Err(FlashcardError::NotSignedIn)));
    }

    #[test]
    fn test_table_url() {
        let store = RemoteCardStore::new(
            RemoteConfig {
                url: "https://example.supabase.co/".to_string(),
                anon_key: "anon".to_string(),
            },
            None,
        )
        .unwrap();
        assert_eq!(store.table_url(), "https://example.supabase.co/rest/v1/flashcards");
    }
}
