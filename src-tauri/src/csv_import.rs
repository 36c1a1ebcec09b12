use crate::error::{FlashcardError, Result};
use crate::models::{normalize_category, NewCard};
use csv::{ReaderBuilder, Trim};
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedCsv {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ParsedCsv {
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() || self.rows.is_empty()
    }
}

/// Parse CSV text. The first non-blank line is the header row.
///
/// The delimiter is `,` when the text contains a comma anywhere, `;` otherwise.
/// Rows whose column count differs from the header are dropped.
pub fn parse(text: &str) -> Result<ParsedCsv> {
    let delimiter = if text.contains(',') { b',' } else { b';' };
    let cleaned: String = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .trim(Trim::All)
        .from_reader(cleaned.as_bytes());

    let mut records = reader.records();
    let headers: Vec<String> = match records.next() {
        Some(record) => record?.iter().map(str::to_string).collect(),
        None => return Ok(ParsedCsv::default()),
    };

    let mut rows = Vec::new();
    let mut dropped = 0usize;
    for record in records {
        let record = record?;
        if record.len() == headers.len() {
            rows.push(record.iter().map(str::to_string).collect());
        } else {
            dropped += 1;
        }
    }
    if dropped > 0 {
        debug!("Dropped {} CSV rows with a mismatched column count", dropped);
    }

    Ok(ParsedCsv { headers, rows })
}

/// Where an imported card's category comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CategorySource {
    /// Every card is "Uncategorized".
    None,
    /// Read from this column; empty cells become "Uncategorized".
    Column(usize),
    /// Every card gets this category.
    Custom(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub front: usize,
    pub back: usize,
    pub category: CategorySource,
}

impl ColumnMapping {
    /// First column front, second column back, third column (if any) category.
    pub fn default_for(headers: &[String]) -> Self {
        ColumnMapping {
            front: 0,
            back: 1,
            category: if headers.len() > 2 {
                CategorySource::Column(2)
            } else {
                CategorySource::None
            },
        }
    }

    pub fn validate(&self, headers: &[String]) -> Result<()> {
        if self.front == self.back {
            return Err(FlashcardError::InvalidInput(
                "Please select different columns for Front and Back".to_string(),
            ));
        }
        let columns = headers.len();
        let mut indexes = vec![self.front, self.back];
        match &self.category {
            CategorySource::None => {}
            CategorySource::Column(index) => indexes.push(*index),
            CategorySource::Custom(name) if name.trim().is_empty() => {
                return Err(FlashcardError::InvalidInput("Custom category must not be empty".to_string()));
            }
            CategorySource::Custom(_) => {}
        }
        if let Some(index) = indexes.into_iter().find(|index| *index >= columns) {
            return Err(FlashcardError::InvalidInput(format!(
                "Column {} does not exist (file has {} columns)",
                index + 1,
                columns
            )));
        }
        Ok(())
    }
}

/// Turn parsed rows into cards. Rows with an empty front or back are skipped.
///
/// Fails without producing anything when the file is empty, the mapping is invalid,
/// or no row yields a valid card.
pub fn build_cards(parsed: &ParsedCsv, mapping: &ColumnMapping) -> Result<Vec<NewCard>> {
    if parsed.is_empty() {
        return Err(FlashcardError::InvalidInput("CSV file is empty or invalid".to_string()));
    }
    mapping.validate(&parsed.headers)?;

    let cards: Vec<NewCard> = parsed
        .rows
        .iter()
        .map(|row| {
            let category = match &mapping.category {
                CategorySource::None => None,
                CategorySource::Column(index) => row.get(*index).cloned(),
                CategorySource::Custom(name) => Some(name.clone()),
            };
            NewCard {
                front: row[mapping.front].clone(),
                back: row[mapping.back].clone(),
                category: normalize_category(category),
            }
        })
        .filter(NewCard::is_valid)
        .collect();

    if cards.is_empty() {
        return Err(FlashcardError::InvalidInput("No valid cards found".to_string()));
    }
    Ok(cards)
}
