use crate::cli::opts::*;
use crate::export;

use anyhow::{bail, Result};
use std::sync::Arc;
use studydeck_core::{
    Deck, DeckStore, KeyValueStore, MemoryKv, NewCard, StoreConfig, SystemClock, UuidIds,
};
use studydeck_json::paths::{data_root, store_files_in};
use studydeck_json::JsonFileKv;
use tracing::info;

pub fn run_cli(args: Cli) -> Result<()> {
    let store = open_store(&args)?;
    match args.cmd {
        Command::Deck(cmd) => deck_cmd(&store, cmd),
        Command::Card(cmd) => card_cmd(&store, cmd),
        Command::Check => check_cmd(&store),
        Command::Repair => {
            let n = store.repair_counts()?;
            println!("repaired {n} deck(s)");
            Ok(())
        }
        Command::Export(cmd) => export_cmd(&store, cmd),
    }
}

pub fn open_store(args: &Cli) -> Result<DeckStore> {
    let config = StoreConfig {
        require_deck: args.require_deck,
        ..StoreConfig::default()
    };
    let kv: Arc<dyn KeyValueStore> = if args.memory {
        Arc::new(MemoryKv::new())
    } else {
        let root = args.data_dir.clone().unwrap_or_else(data_root);
        let (file, backups) = store_files_in(&root);
        info!(path = %file.display(), "opening store");
        Arc::new(JsonFileKv::open_with(file, backups, args.backups)?)
    };
    Ok(DeckStore::with_parts(kv, Arc::new(UuidIds), Arc::new(SystemClock), config))
}

fn deck_cmd(store: &DeckStore, cmd: DeckCmd) -> Result<()> {
    match cmd {
        DeckCmd::Add { title } => {
            let id = store.create_deck(&title)?;
            println!("{id}");
        }
        DeckCmd::List => {
            for d in store.list_decks() {
                println!("{}\t{}\t{}", d.id, d.title, d.card_count);
            }
        }
        DeckCmd::Show { deck } => {
            let d = resolve_deck(store, &deck)?;
            println!("id:      {}", d.id);
            println!("title:   {}", d.title);
            println!("cards:   {}", d.card_count);
            println!("created: {}", d.created_at.to_rfc3339());
            println!("updated: {}", d.updated_at.to_rfc3339());
        }
        DeckCmd::Rename { deck, title } => {
            let mut d = resolve_deck(store, &deck)?;
            d.title = title;
            d.updated_at = store.now();
            store.save_deck(&d)?;
            println!("ok");
        }
        DeckCmd::Rm { deck } => {
            let d = resolve_deck(store, &deck)?;
            store.delete_deck(&d.id)?;
            println!("ok");
        }
    }
    Ok(())
}

// The store only replaces whole collections; single-card edits are read, change, write back.
fn card_cmd(store: &DeckStore, cmd: CardCmd) -> Result<()> {
    match cmd {
        CardCmd::Add(a) => {
            let deck = resolve_deck(store, &a.deck)?;
            let mut cards = store.list_cards(&deck.id);
            let card = store.new_card(&deck.id, &NewCard::new(a.front, a.back));
            let id = card.id.clone();
            cards.push(card);
            store.save_cards(&deck.id, &cards)?;
            println!("{id}");
        }
        CardCmd::List { deck } => {
            let deck = resolve_deck(store, &deck)?;
            for c in store.list_cards(&deck.id) {
                println!("{}\t{}\t{}", c.id, c.front, c.back);
            }
        }
        CardCmd::Rm { card_id, deck } => {
            let deck = resolve_deck(store, &deck)?;
            let mut cards = store.list_cards(&deck.id);
            let before = cards.len();
            cards.retain(|c| c.id != card_id);
            if cards.len() == before {
                bail!("card not found: {card_id}");
            }
            store.save_cards(&deck.id, &cards)?;
            println!("ok");
        }
        CardCmd::Edit(e) => {
            let deck = resolve_deck(store, &e.deck)?;
            let mut cards = store.list_cards(&deck.id);
            let Some(card) = cards.iter_mut().find(|c| c.id == e.card_id) else {
                bail!("card not found: {}", e.card_id);
            };
            if card.edit(e.front, e.back, store.now()) {
                store.save_cards(&deck.id, &cards)?;
            }
            println!("ok");
        }
    }
    Ok(())
}

fn check_cmd(store: &DeckStore) -> Result<()> {
    let findings = store.check()?;
    if findings.is_empty() {
        println!("ok");
        return Ok(());
    }
    for f in &findings {
        println!("{f}");
    }
    bail!("{} problem(s) found", findings.len())
}

fn export_cmd(store: &DeckStore, cmd: ExportCmd) -> Result<()> {
    let deck = resolve_deck(store, &cmd.deck)?;
    let cards = store.list_cards(&deck.id);
    let rendered = export::render(&deck, &cards, cmd.format)?;
    match cmd.out {
        Some(path) => {
            std::fs::write(&path, rendered)?;
            println!("wrote {}", path.display());
        }
        None => print!("{rendered}"),
    }
    Ok(())
}

// ===== Helpers =====

/// Match by id first, then by case-insensitive title.
pub fn resolve_deck(store: &DeckStore, sel: &str) -> Result<Deck> {
    let decks = store.list_decks();
    if let Some(d) = decks.iter().find(|d| d.id == sel) {
        return Ok(d.clone());
    }
    if let Some(d) = decks.into_iter().find(|d| d.title.eq_ignore_ascii_case(sel)) {
        return Ok(d);
    }
    bail!("deck not found: {}", sel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn memory_store() -> DeckStore {
        let args = Cli::parse_from(["studydeck", "--memory", "check"]);
        open_store(&args).unwrap()
    }

    #[test]
    fn require_deck_flag_reaches_the_store() {
        assert!(!memory_store().config().require_deck);
        let args = Cli::parse_from(["studydeck", "--memory", "--require-deck", "check"]);
        let store = open_store(&args).unwrap();
        assert!(store.config().require_deck);
        assert!(card_cmd(
            &store,
            CardCmd::List { deck: "missing".into() }
        )
        .is_err());
    }

    #[test]
    fn resolve_by_id_or_title() {
        let store = memory_store();
        let id = store.create_deck("Biology 101").unwrap();
        assert_eq!(resolve_deck(&store, &id).unwrap().id, id);
        assert_eq!(resolve_deck(&store, "biology 101").unwrap().id, id);
        assert!(resolve_deck(&store, "chemistry").is_err());
    }

    #[test]
    fn card_commands_keep_count_in_step() {
        let store = memory_store();
        let id = store.create_deck("Lang").unwrap();
        for (f, b) in [("hola", "hello"), ("adios", "goodbye")] {
            card_cmd(
                &store,
                CardCmd::Add(CardAdd {
                    deck: "Lang".into(),
                    front: f.into(),
                    back: b.into(),
                }),
            )
            .unwrap();
        }
        assert_eq!(store.get_deck(&id).unwrap().card_count, 2);

        let first = store.list_cards(&id)[0].id.clone();
        card_cmd(
            &store,
            CardCmd::Edit(CardEdit {
                card_id: first.clone(),
                deck: id.clone(),
                front: None,
                back: Some("hi".into()),
            }),
        )
        .unwrap();
        assert_eq!(store.list_cards(&id)[0].back, "hi");

        card_cmd(&store, CardCmd::Rm { card_id: first, deck: id.clone() }).unwrap();
        assert_eq!(store.get_deck(&id).unwrap().card_count, 1);
        assert!(card_cmd(&store, CardCmd::Rm { card_id: "nope".into(), deck: id.clone() }).is_err());
    }

    #[test]
    fn rename_keeps_identity() {
        let store = memory_store();
        let id = store.create_deck("Old").unwrap();
        let created = store.get_deck(&id).unwrap().created_at;
        deck_cmd(&store, DeckCmd::Rename { deck: "old".into(), title: "New".into() }).unwrap();
        let d = store.get_deck(&id).unwrap();
        assert_eq!(d.title, "New");
        assert_eq!(d.created_at, created);
        assert!(d.updated_at >= created);
    }

    #[test]
    fn file_store_opens_under_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let dir_arg = dir.path().to_string_lossy().to_string();
        let args = Cli::parse_from(["studydeck", "--data-dir", dir_arg.as_str(), "--backups", "0", "check"]);
        let store = open_store(&args).unwrap();
        store.create_deck("persisted").unwrap();

        let again = open_store(&args).unwrap();
        assert_eq!(again.list_decks().len(), 1);
        assert!(dir.path().join("studydeck.json").exists());
    }
}
