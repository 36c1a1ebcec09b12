use crate::error::{FlashcardError, Result};
use crate::models::{BulkUpdateRequest, Card, CardPatch, NewCard};
use crate::spaced_repetition::SpacedRepetition;
use crate::storage::{load_json, save_json, KeyValueStore, CARDS_KEY};
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// The locally persisted card collection.
pub struct CardService {
    cards: Mutex<HashMap<String, Card>>,
    storage: Arc<dyn KeyValueStore>,
}

impl CardService {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Result<Self> {
        let stored: Vec<Card> = load_json(storage.as_ref(), CARDS_KEY)?.unwrap_or_default();
        let mut cards = HashMap::with_capacity(stored.len());
        for mut card in stored {
            if card.category.trim().is_empty() {
                card.category = crate::models::default_category();
            }
            if cards.contains_key(&card.id) {
                warn!("Dropping duplicate card id {} from local storage", card.id);
                continue;
            }
            cards.insert(card.id.clone(), card);
        }
        Ok(CardService {
            cards: Mutex::new(cards),
            storage,
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Card>> {
        self.cards.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn create_card(&self, request: NewCard) -> Result<Card> {
        if !request.is_valid() {
            return Err(FlashcardError::InvalidInput("Front and back must not be empty".to_string()));
        }
        let mut cards = self.lock();
        let card = request.into_card();
        cards.insert(card.id.clone(), card.clone());
        self.save_cards(&cards)?;
        Ok(card)
    }

    /// Add a batch of cards. Cards with an empty side are skipped; nothing is written
    /// when no valid card remains.
    pub fn import_cards(&self, requests: Vec<NewCard>) -> Result<Vec<Card>> {
        let submitted = requests.len();
        let new_cards: Vec<Card> = requests
            .into_iter()
            .filter(NewCard::is_valid)
            .map(NewCard::into_card)
            .collect();

        if new_cards.is_empty() {
            return Err(FlashcardError::InvalidInput("No valid cards found".to_string()));
        }

        let mut cards = self.lock();
        for card in &new_cards {
            cards.insert(card.id.clone(), card.clone());
        }
        self.save_cards(&cards)?;
        info!("Imported {} of {} cards", new_cards.len(), submitted);
        Ok(new_cards)
    }

    /// All cards, newest first.
    pub fn get_cards(&self) -> Vec<Card> {
        let cards = self.lock();
        let mut all: Vec<Card> = cards.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    pub fn get_card(&self, id: &str) -> Option<Card> {
        self.lock().get(id).cloned()
    }

    pub fn update_card(&self, id: &str, patch: &CardPatch) -> Result<Card> {
        let blank = |side: &Option<String>| side.as_ref().is_some_and(|s| s.trim().is_empty());
        if blank(&patch.front) || blank(&patch.back) {
            return Err(FlashcardError::InvalidInput("Front and back must not be empty".to_string()));
        }

        let mut cards = self.lock();
        let card = cards
            .get_mut(id)
            .ok_or_else(|| FlashcardError::CardNotFound(id.to_string()))?;
        card.apply(patch);
        let updated_card = card.clone();
        self.save_cards(&cards)?;
        Ok(updated_card)
    }

    /// Remove every listed card that exists. Returns how many were removed.
    pub fn delete_multiple_cards(&self, card_ids: &[String]) -> Result<usize> {
        let mut cards = self.lock();
        let deleted_count = card_ids.iter().filter(|id| cards.remove(id.as_str()).is_some()).count();

        if deleted_count > 0 {
            self.save_cards(&cards)?;
        }
        Ok(deleted_count)
    }

    pub fn bulk_update_category(&self, request: &BulkUpdateRequest) -> Result<Vec<Card>> {
        let category = request.category.trim();
        if category.is_empty() {
            return Err(FlashcardError::InvalidInput("Category must not be empty".to_string()));
        }

        let mut cards = self.lock();
        let mut updated_cards = Vec::new();
        for card_id in &request.card_ids {
            if let Some(card) = cards.get_mut(card_id) {
                card.category = category.to_string();
                updated_cards.push(card.clone());
            }
        }

        if !updated_cards.is_empty() {
            self.save_cards(&cards)?;
        }
        Ok(updated_cards)
    }

    /// Up to `limit` cards whose review date has passed, oldest first, topped up with
    /// never-reviewed cards when there are not enough.
    pub fn get_due_cards(&self, limit: usize, now: DateTime<Utc>) -> Vec<Card> {
        let cards = self.lock();
        let all: Vec<Card> = cards.values().cloned().collect();
        drop(cards);

        let mut selected = SpacedRepetition::get_due_cards_from_vec(&all, now);
        selected.truncate(limit);

        if selected.len() < limit {
            let taken: HashSet<String> = selected.iter().map(|c| c.id.clone()).collect();
            let mut fresh: Vec<Card> = all
                .into_iter()
                .filter(|c| c.review_count == 0 && !taken.contains(&c.id))
                .collect();
            fresh.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            let remaining = limit - selected.len();
            selected.extend(fresh.into_iter().take(remaining));
        }
        selected
    }

    pub fn clear_all(&self) -> Result<()> {
        let mut cards = self.lock();
        cards.clear();
        self.storage.clear(CARDS_KEY)
    }

    // Helper method to save cards
    fn save_cards(&self, cards: &HashMap<String, Card>) -> Result<()> {
        let mut ordered: Vec<&Card> = cards.values().collect();
        ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        save_json(self.storage.as_ref(), CARDS_KEY, &ordered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Rating;
    use crate::storage::{MemoryStore, Storage};
    use chrono::Duration;
    use serial_test::serial;
    use tempfile::TempDir;

    // Create a test storage instance
    fn create_test_storage() -> (Arc<dyn KeyValueStore>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::new(temp_dir.path()).unwrap();
        (Arc::new(storage), temp_dir)
    }

    // Create a test card service
    fn create_test_service() -> (CardService, TempDir) {
        let (storage, temp_dir) = create_test_storage();
        let service = CardService::new(storage).unwrap();
        (service, temp_dir)
    }

    fn create_test_request(front: &str, back: &str, category: Option<&str>) -> NewCard {
        NewCard::new(front, back, category.map(|c| c.to_string()))
    }

    #[test]
    #[serial]
    fn test_create_card() {
        let (service, _temp_dir) = create_test_service();
        let card = service
            .create_card(create_test_request("What is 2+2?", "4", Some("Math")))
            .unwrap();

        assert_eq!(card.front, "What is 2+2?");
        assert_eq!(card.back, "4");
        assert_eq!(card.category, "Math");
        assert_eq!(card.review_count, 0);
        assert!(card.difficulty.is_none());
        assert!(card.last_reviewed_at.is_none());
        assert!(!card.id.is_empty());
    }

    #[test]
    #[serial]
    fn test_create_card_no_category() {
        let (service, _temp_dir) = create_test_service();
        let card = service.create_card(create_test_request("Question", "Answer", None)).unwrap();
        assert_eq!(card.category, "Uncategorized");
    }

    #[test]
    #[serial]
    fn test_create_card_rejects_empty_side() {
        let (service, _temp_dir) = create_test_service();
        let result = service.create_card(create_test_request("Question", "  ", None));
        assert!(matches!(result, Err(FlashcardError::InvalidInput(_))));
        assert!(service.get_cards().is_empty());
    }

    #[test]
    #[serial]
    fn test_import_skips_invalid_rows() {
        let (service, _temp_dir) = create_test_service();
        let imported = service
            .import_cards(vec![
                create_test_request("Q1", "A1", Some("Cat")),
                create_test_request("", "A2", None),
                create_test_request("Q3", "A3", None),
            ])
            .unwrap();
        assert_eq!(imported.len(), 2);
        assert_eq!(service.get_cards().len(), 2);
    }

    #[test]
    #[serial]
    fn test_import_with_no_valid_rows_changes_nothing() {
        let (service, _temp_dir) = create_test_service();
        service.create_card(create_test_request("Q", "A", None)).unwrap();
        let result = service.import_cards(vec![create_test_request("", "", None)]);
        assert!(matches!(result, Err(FlashcardError::InvalidInput(_))));
        assert_eq!(service.get_cards().len(), 1);
    }

    #[test]
    #[serial]
    fn test_get_card_exists() {
        let (service, _temp_dir) = create_test_service();
        let created = service.create_card(create_test_request("Question", "Answer", None)).unwrap();

        let card = service.get_card(&created.id).unwrap();
        assert_eq!(card.id, created.id);
        assert_eq!(card.front, "Question");
        assert!(service.get_card("nonexistent-id").is_none());
    }

    #[test]
    #[serial]
    fn test_update_card_partial() {
        let (service, _temp_dir) = create_test_service();
        let created = service
            .create_card(create_test_request("Original", "Original Answer", Some("Original")))
            .unwrap();

        let patch = CardPatch {
            back: Some("Updated Answer".to_string()),
            ..Default::default()
        };
        let updated = service.update_card(&created.id, &patch).unwrap();
        assert_eq!(updated.front, "Original");
        assert_eq!(updated.back, "Updated Answer");
        assert_eq!(updated.category, "Original");

        let retrieved = service.get_card(&created.id).unwrap();
        assert_eq!(retrieved.back, "Updated Answer");
    }

    #[test]
    #[serial]
    fn test_update_card_not_found() {
        let (service, _temp_dir) = create_test_service();
        let result = service.update_card("nonexistent-id", &CardPatch::default());
        assert!(matches!(result, Err(FlashcardError::CardNotFound(_))));
    }

    #[test]
    #[serial]
    fn test_delete_multiple_cards_partial() {
        let (service, _temp_dir) = create_test_service();
        let card1 = service.create_card(create_test_request("Q1", "A1", None)).unwrap();
        let card2 = service.create_card(create_test_request("Q2", "A2", None)).unwrap();

        let deleted = service
            .delete_multiple_cards(&[card1.id.clone(), "nonexistent".to_string()])
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(service.get_card(&card1.id).is_none());
        assert!(service.get_card(&card2.id).is_some());
    }

    #[test]
    #[serial]
    fn test_bulk_update_category() {
        let (service, _temp_dir) = create_test_service();
        let card1 = service.create_card(create_test_request("Q1", "A1", Some("Old"))).unwrap();
        let card2 = service.create_card(create_test_request("Q2", "A2", Some("Other"))).unwrap();

        let updated = service
            .bulk_update_category(&BulkUpdateRequest {
                card_ids: vec![card1.id.clone(), "missing".to_string()],
                category: "New".to_string(),
            })
            .unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(service.get_card(&card1.id).unwrap().category, "New");
        assert_eq!(service.get_card(&card2.id).unwrap().category, "Other");
    }

    #[test]
    #[serial]
    fn test_bulk_update_rejects_empty_category() {
        let (service, _temp_dir) = create_test_service();
        let card = service.create_card(create_test_request("Q1", "A1", Some("Old"))).unwrap();
        let result = service.bulk_update_category(&BulkUpdateRequest {
            card_ids: vec![card.id.clone()],
            category: " ".to_string(),
        });
        assert!(matches!(result, Err(FlashcardError::InvalidInput(_))));
        assert_eq!(service.get_card(&card.id).unwrap().category, "Old");
    }

    #[test]
    fn test_due_cards_topped_up_with_new() {
        let service = CardService::new(Arc::new(MemoryStore::new())).unwrap();
        let now = Utc::now();

        let due = service.create_card(create_test_request("due", "A", None)).unwrap();
        service
            .update_card(
                &due.id,
                &CardPatch {
                    difficulty: Some(Rating::Hard),
                    review_count: Some(1),
                    next_review_at: Some(now - Duration::days(1)),
                    last_interval: Some(1),
                    ..Default::default()
                },
            )
            .unwrap();
        let later = service.create_card(create_test_request("later", "A", None)).unwrap();
        service
            .update_card(
                &later.id,
                &CardPatch {
                    review_count: Some(1),
                    next_review_at: Some(now + Duration::days(3)),
                    ..Default::default()
                },
            )
            .unwrap();
        service.create_card(create_test_request("fresh1", "A", None)).unwrap();
        service.create_card(create_test_request("fresh2", "A", None)).unwrap();

        let selected = service.get_due_cards(2, now);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].front, "due");
        assert_eq!(selected[1].review_count, 0);

        let all = service.get_due_cards(10, now);
        assert_eq!(all.len(), 3);
        let ids: HashSet<&str> = all.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    #[serial]
    fn test_persistence_across_instances() {
        let (storage, _temp_dir) = create_test_storage();

        {
            let service = CardService::new(storage.clone()).unwrap();
            service
                .create_card(create_test_request("Persistent", "Data", Some("Test")))
                .unwrap();
        }

        let new_service = CardService::new(storage).unwrap();
        let cards = new_service.get_cards();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].front, "Persistent");
        assert_eq!(cards[0].back, "Data");
        assert_eq!(cards[0].category, "Test");
    }

    #[test]
    #[serial]
    fn test_clear_all() {
        let (storage, _temp_dir) = create_test_storage();
        let service = CardService::new(storage.clone()).unwrap();
        service.create_card(create_test_request("Q", "A", None)).unwrap();
        service.clear_all().unwrap();
        assert!(service.get_cards().is_empty());
        assert!(CardService::new(storage).unwrap().get_cards().is_empty());
    }
}
