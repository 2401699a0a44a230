use crate::cli::opts::ExportFormat;
use anyhow::Result;
use serde::Serialize;
use std::fmt::Write as _;
use studydeck_core::{Deck, Flashcard};

#[derive(Serialize)]
struct ExportBundle<'a> {
    deck: &'a Deck,
    cards: &'a [Flashcard],
}

pub fn render(deck: &Deck, cards: &[Flashcard], format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(&ExportBundle { deck, cards })?),
        ExportFormat::Csv => render_csv(cards),
        ExportFormat::Txt => Ok(render_text(deck, cards)),
    }
}

fn render_csv(cards: &[Flashcard]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(["id", "deckId", "front", "back", "createdAt", "updatedAt"])?;
    for c in cards {
        let created = c.created_at.to_rfc3339();
        let updated = c.updated_at.to_rfc3339();
        wtr.write_record([
            c.id.as_str(),
            c.deck_id.as_str(),
            c.front.as_str(),
            c.back.as_str(),
            created.as_str(),
            updated.as_str(),
        ])?;
    }
    let bytes = wtr.into_inner().map_err(|e| e.into_error())?;
    Ok(String::from_utf8(bytes)?)
}

fn render_text(deck: &Deck, cards: &[Flashcard]) -> String {
    let mut out = String::new();
    let noun = if deck.card_count == 1 { "card" } else { "cards" };
    let _ = writeln!(out, "{} ({} {noun})", deck.title, deck.card_count);
    for (i, c) in cards.iter().enumerate() {
        let _ = writeln!(out, "\n{}. Q: {}", i + 1, c.front);
        let _ = writeln!(out, "   A: {}", c.back);
    }
    out
}
