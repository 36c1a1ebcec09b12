use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;

use crate::card_service::CardService;
use crate::error::Result;
use crate::models::{BulkUpdateRequest, Card, CardPatch, CategoryStats, DifficultyBucket, NewCard, ReviewStats};
use crate::spaced_repetition::SpacedRepetition;

#[async_trait]
pub trait CardStore: Send + Sync {
    /// Every card, newest first.
    async fn get_cards(&self) -> Result<Vec<Card>>;

    async fn add_cards(&self, cards: Vec<NewCard>) -> Result<Vec<Card>>;

    /// Partial update; fields absent from `patch` are left unchanged.
    async fn update_card(&self, id: &str, patch: &CardPatch) -> Result<()>;

    async fn delete_cards(&self, ids: &[String]) -> Result<()>;

    async fn update_category(&self, ids: &[String], category: &str) -> Result<()>;

    /// Up to `limit` cards due now, oldest first, topped up with never-reviewed cards.
    async fn get_due_cards(&self, limit: usize) -> Result<Vec<Card>>;

    async fn get_review_stats(&self, now: DateTime<Utc>) -> Result<ReviewStats> {
        Ok(SpacedRepetition::calculate_stats(&self.get_cards().await?, now))
    }

    async fn get_categories(&self) -> Result<Vec<String>> {
        Ok(SpacedRepetition::categories(&self.get_cards().await?))
    }

    async fn get_category_stats(&self, now: DateTime<Utc>) -> Result<Vec<CategoryStats>> {
        Ok(SpacedRepetition::category_stats(&self.get_cards().await?, now))
    }

    async fn count_matching(&self, category: Option<&str>, difficulty: DifficultyBucket) -> Result<usize> {
        Ok(SpacedRepetition::count_matching(&self.get_cards().await?, category, difficulty))
    }
}

/// [`CardStore`] over the locally persisted collection.
#[derive(Clone)]
pub struct LocalCardStore {
    service: Arc<CardService>,
}

impl LocalCardStore {
    pub fn new(service: Arc<CardService>) -> Self {
        LocalCardStore { service }
    }

    pub fn service(&self) -> &CardService {
        &self.service
    }
}

#[async_trait]
impl CardStore for LocalCardStore {
    async fn get_cards(&self) -> Result<Vec<Card>> {
        Ok(self.service.get_cards())
    }

    async fn add_cards(&self, cards: Vec<NewCard>) -> Result<Vec<Card>> {
        self.service.import_cards(cards)
    }

    async fn update_card(&self, id: &str, patch: &CardPatch) -> Result<()> {
        self.service.update_card(id, patch).map(|_| ())
    }

    async fn delete_cards(&self, ids: &[String]) -> Result<()> {
        self.service.delete_multiple_cards(ids).map(|_| ())
    }

    async fn update_category(&self, ids: &[String], category: &str) -> Result<()> {
        let request = BulkUpdateRequest {
            card_ids: ids.to_vec(),
            category: category.to_string(),
        };
        self.service.bulk_update_category(&request).map(|_| ())
    }

    async fn get_due_cards(&self, limit: usize) -> Result<Vec<Card>> {
        Ok(self.service.get_due_cards(limit, Utc::now()))
    }
}

/// Copy every card of `from` into `to`. Returns the number of cards uploaded.
pub async fn sync_cards(from: &dyn CardStore, to: &dyn CardStore) -> Result<usize> {
    let cards: Vec<NewCard> = from.get_cards().await?.iter().map(NewCard::from).collect();
    if cards.is_empty() {
        return Ok(0);
    }
    let count = cards.len();
    to.add_cards(cards).await?;
    info!("Synced {} cards", count);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FlashcardError;
    use crate::models::Rating;
    use crate::storage::MemoryStore;

    fn local_store() -> LocalCardStore {
        let service = CardService::new(Arc::new(MemoryStore::new())).unwrap();
        LocalCardStore::new(Arc::new(service))
    }

    #[tokio::test]
    async fn test_local_store_crud() {
        let store = local_store();
        let added = store
            .add_cards(vec![NewCard::new("Q1", "A1", None), NewCard::new("Q2", "A2", Some("Math".to_string()))])
            .await
            .unwrap();
        assert_eq!(added.len(), 2);

        let patch = CardPatch {
            difficulty: Some(Rating::Easy),
            ..Default::default()
        };
        store.update_card(&added[0].id, &patch).await.unwrap();
        store.update_category(&[added[0].id.clone()], "Verbs").await.unwrap();
        let updated = store.service().get_card(&added[0].id).unwrap();
        assert_eq!(updated.difficulty, Some(Rating::Easy));
        assert_eq!(updated.category, "Verbs");

        store.delete_cards(&[added[1].id.clone()]).await.unwrap();
        assert_eq!(store.get_cards().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_local_update_missing_card() {
        let store = local_store();
        let result = store.update_card("missing", &CardPatch::default()).await;
        assert!(matches!(result, Err(FlashcardError::CardNotFound(_))));
    }

    #[tokio::test]
    async fn test_due_cards_include_new() {
        let store = local_store();
        store.add_cards(vec![NewCard::new("Q1", "A1", None)]).await.unwrap();
        assert_eq!(store.get_due_cards(5).await.unwrap().len(), 1);
    }

    /// Read-only store over a fixed list, standing in for a remote account.
    struct FixedStore {
        cards: Vec<Card>,
    }

    #[async_trait]
    impl CardStore for FixedStore {
        async fn get_cards(&self) -> Result<Vec<Card>> {
            Ok(self.cards.clone())
        }
        async fn add_cards(&self, _cards: Vec<NewCard>) -> Result<Vec<Card>> {
            Err(FlashcardError::NotSignedIn)
        }
        async fn update_card(&self, _id: &str, _patch: &CardPatch) -> Result<()> {
            Err(FlashcardError::NotSignedIn)
        }
        async fn delete_cards(&self, _ids: &[String]) -> Result<()> {
            Err(FlashcardError::NotSignedIn)
        }
        async fn update_category(&self, _ids: &[String], _category: &str) -> Result<()> {
            Err(FlashcardError::NotSignedIn)
        }
        async fn get_due_cards(&self, limit: usize) -> Result<Vec<Card>> {
            Ok(self.cards.iter().take(limit).cloned().collect())
        }
    }

    #[tokio::test]
    async fn test_stats_come_from_the_store() {
        let now = Utc::now();
        let mut rated = Card::new("Q1", "A1", Some("Verbs".to_string()));
        rated.difficulty = Some(Rating::Medium);
        rated.next_review_at = Some(now + chrono::Duration::days(2));
        let store = FixedStore {
            cards: vec![rated, Card::new("Q2", "A2", Some("Verbs".to_string())), Card::new("Q3", "A3", None)],
        };

        let stats = store.get_review_stats(now).await.unwrap();
        assert_eq!(stats.total_cards, 3);
        assert_eq!(stats.cards_medium, 1);
        assert_eq!(stats.cards_new, 2);

        assert_eq!(store.get_categories().await.unwrap(), vec!["Uncategorized", "Verbs"]);
        let by_category = store.get_category_stats(now).await.unwrap();
        assert_eq!(by_category[0].name, "Verbs");
        assert_eq!(by_category[0].total_cards, 2);
        assert_eq!(store.count_matching(Some("Verbs"), DifficultyBucket::New).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_local_stats_ignore_other_stores() {
        let local = local_store();
        local.add_cards(vec![NewCard::new("Q1", "A1", None)]).await.unwrap();
        let remote = FixedStore { cards: Vec::new() };
        assert_eq!(local.get_review_stats(Utc::now()).await.unwrap().total_cards, 1);
        assert_eq!(remote.get_review_stats(Utc::now()).await.unwrap().total_cards, 0);
        assert!(remote.get_categories().await.unwrap().is_empty());
    }

    #[test]
    fn test_sync_cards() {
        let from = local_store();
        let to = local_store();
        tokio_test::block_on(async {
            from.add_cards(vec![NewCard::new("Q1", "A1", Some("X".to_string()))]).await.unwrap();
            let count = sync_cards(&from, &to).await.unwrap();
            assert_eq!(count, 1);

            let copied = to.get_cards().await.unwrap();
            assert_eq!(copied[0].front, "Q1");
            assert_eq!(copied[0].category, "X");
            assert_eq!(sync_cards(&local_store(), &to).await.unwrap(), 0);
        });
    }
}
